//! Read live weight and battery level from Acaia-compatible scales over Bluetooth Low Energy
//!
//! Built for self-service bulk candy kiosks, where a scale streams readings for hours on end
//! and the radio link drops now and then.
//!
//! The scale exposes a serial-like GATT service. On top of that sits a binary protocol of
//! marker-delimited frames, which may arrive split across notifications or several to a
//! notification. After connecting, the scale has to be identified and asked for
//! notifications, and then kept awake with periodic heartbeats.
//!
//! The crate is split along those lines:
//!
//! - [`frame`] cuts frames from received bytes and encodes commands
//! - [`message`] turns frames into weight, battery and button events
//! - [`ScaleClient`] runs the connection: discovery, handshake, heartbeat, tare and
//!   automatic reconnection after a drop
//! - [`diagnostics`] counts traffic and keeps a short history of past sessions
//! - [`transport`] is the seam to the radio stack. With the `ble` feature enabled,
//!   `transport::BluestTransport` uses the platform Bluetooth stack through `bluest`.
//!
//! # Example
//!
//! ```no_run
//! # use std::time::Duration;
//! # use candyscale::transport::Transport;
//! #
//! # async fn run<T: Transport>(transport: T) -> Result<(), candyscale::ScaleError> {
//!     let scale = candyscale::ScaleClient::spawn(transport, candyscale::ScaleConfig::default());
//!     scale.connect().await?;
//!     scale.tare().await?;
//!     loop {
//!         println!("{:.1} g, battery {:?} %", scale.current_weight_grams(), scale.battery_percent());
//!         tokio::time::sleep(Duration::from_secs(1)).await;
//!     }
//! # }
//! ```

mod config;
pub mod diagnostics;
mod error;
pub mod frame;
mod link;
pub mod message;
mod scale_client;
mod scale_state;
pub mod transport;

pub use config::ScaleConfig;
pub use diagnostics::{Diagnostics, SessionRecord};
pub use error::{ScaleError, TransportError};
pub use scale_client::{ScaleClient, ScaleEvent};
pub use scale_state::{
    BatteryLevel, ButtonPressed, ConnectionState, Grams, Sign, UnitScale, WeightSample,
};
