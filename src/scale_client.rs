//! Handle to a scale link running in the background.
//!
//! Currently the following data can be read:
//!
//! - Weight (g), updated on every reading the scale sends
//! - Battery level (%)
//! - Buttons pressed on the scale
//! - Connection state and link diagnostics

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::ScaleConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsRecorder};
use crate::error::ScaleError;
use crate::link::{Link, Published, Request};
use crate::scale_state::{BatteryLevel, ButtonPressed, ConnectionState, WeightSample};
use crate::transport::Transport;

/// A decoded value, as broadcast to [`ScaleClient::subscribe_events`] receivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleEvent {
    Weight(WeightSample),
    Battery(BatteryLevel),
    Button(ButtonPressed),
}

/// Connects to the scale and publishes what it reports.
///
/// Cloning gives another handle to the same link. The link is torn down once every handle
/// has been dropped.
#[derive(Clone)]
pub struct ScaleClient {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    weight: watch::Receiver<Option<WeightSample>>,
    battery: watch::Receiver<Option<BatteryLevel>>,
    last_error: watch::Receiver<Option<ScaleError>>,
    events: broadcast::Sender<ScaleEvent>,
    diagnostics: Arc<DiagnosticsRecorder>,
}

impl ScaleClient {
    const REQUEST_QUEUE_LEN: usize = 16;
    const EVENT_QUEUE_LEN: usize = 64;

    /// Start the link task on the current Tokio runtime. Nothing is done until
    /// [`connect`](Self::connect) is called.
    pub fn spawn<T: Transport>(transport: T, config: ScaleConfig) -> Self {
        let (requests, request_rx) = mpsc::channel(Self::REQUEST_QUEUE_LEN);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (weight_tx, weight) = watch::channel(None);
        let (battery_tx, battery) = watch::channel(None);
        let (last_error_tx, last_error) = watch::channel(None);
        let (events, _) = broadcast::channel(Self::EVENT_QUEUE_LEN);
        let diagnostics = Arc::new(DiagnosticsRecorder::new(config.session_history_len));

        let published = Published {
            state: state_tx,
            weight: weight_tx,
            battery: battery_tx,
            last_error: last_error_tx,
            events: events.clone(),
            diagnostics: diagnostics.clone(),
        };
        tokio::spawn(Link::new(transport, config, request_rx, published).run());

        Self { requests, state, weight, battery, last_error, events, diagnostics }
    }

    /// Find the scale, connect and complete the handshake.
    ///
    /// Resolves once the link is `Connected` or the attempt has failed. Failures are not
    /// retried. Succeeds at once if already connected, and fails with
    /// [`ScaleError::InvalidState`] while another attempt is running.
    pub async fn connect(&self) -> Result<(), ScaleError> {
        self.request(Request::Connect).await?
    }

    /// Disconnect from the scale and stop any reconnection. Valid in every state.
    pub async fn disconnect(&self) -> Result<(), ScaleError> {
        self.request(Request::Disconnect).await
    }

    /// Zero the scale. Fails with [`ScaleError::NotConnected`] without writing anything
    /// unless the link is `Connected`.
    pub async fn tare(&self) -> Result<(), ScaleError> {
        self.request(Request::Tare).await?
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The latest weight in grams, 0 before the first reading
    pub fn current_weight_grams(&self) -> f64 {
        self.weight().map(|sample| sample.grams.as_f64()).unwrap_or_default()
    }

    /// The latest weight reading, if any arrived yet
    pub fn weight(&self) -> Option<WeightSample> {
        *self.weight.borrow()
    }

    pub fn watch_weight(&self) -> watch::Receiver<Option<WeightSample>> {
        self.weight.clone()
    }

    pub fn battery_percent(&self) -> Option<u8> {
        (*self.battery.borrow()).map(BatteryLevel::percent)
    }

    pub fn watch_battery(&self) -> watch::Receiver<Option<BatteryLevel>> {
        self.battery.clone()
    }

    /// Receive every decoded weight, battery and button event from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<ScaleEvent> {
        self.events.subscribe()
    }

    /// The most recent failure of a connection attempt, including ones made by automatic
    /// reconnection. Cleared when a connection succeeds.
    pub fn last_error(&self) -> Option<ScaleError> {
        self.last_error.borrow().clone()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.snapshot()
    }

    async fn request<R>(
        &self,
        request: impl FnOnce(oneshot::Sender<R>) -> Request,
    ) -> Result<R, ScaleError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| ScaleError::ClientClosed)?;
        response.await.map_err(|_| ScaleError::ClientClosed)
    }
}
