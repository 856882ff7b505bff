//! [`Transport`] over the platform's Bluetooth Low Energy stack, using `bluest`.
//!
//! Acaia-compatible scales expose a serial-like GATT service with one characteristic for
//! commands and one for notifications.

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{DeviceFilter, Transport};
use crate::error::TransportError;

/// An open connection to a scale
#[derive(Clone)]
pub struct BluestSession {
    device: Device,
    write: Characteristic,
    notify: Characteristic,
}

pub struct BluestTransport {
    adapter: Adapter,
}

impl BluestTransport {
    const SCALE_SERVICE_ID: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
    const WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x49535343_6daa_4d02_abf6_19569aca69fe);
    const NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x49535343_1023_4bd4_bba4_00e6539e5aa7);
    // Notifications buffered between the radio and the link
    const NOTIFICATION_QUEUE_LEN: usize = 64;

    /// Use the platform's default Bluetooth adapter
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or(TransportError::Unavailable("Default adapter not found".to_string()))?;
        Ok(Self { adapter })
    }

    async fn discover_characteristic(
        device: &Device,
        characteristic_id: Uuid,
    ) -> Result<Characteristic, TransportError> {
        let service = device
            .discover_services_with_uuid(Self::SCALE_SERVICE_ID)
            .await?
            .first()
            .ok_or(TransportError::MissingCharacteristic("the scale service".to_string()))?
            .clone();
        let characteristic = service
            .discover_characteristics_with_uuid(characteristic_id)
            .await?
            .first()
            .ok_or(TransportError::MissingCharacteristic(format!(
                "the characteristic {characteristic_id}"
            )))?
            .clone();
        Ok(characteristic)
    }
}

#[async_trait]
impl Transport for BluestTransport {
    type Device = Device;
    type Session = BluestSession;

    async fn wait_available(&self) -> Result<(), TransportError> {
        self.adapter
            .wait_available()
            .await
            .map_err(|err| TransportError::Unavailable(err.to_string()))
    }

    async fn scan(&self, filter: &DeviceFilter) -> Result<Device, TransportError> {
        let mut adapter_events = self.adapter.scan(&[]).await?;
        while let Some(found) = adapter_events.next().await {
            let device_name = found.device.name_async().await.unwrap_or_default();
            if filter.matches(&device_name) {
                info!("Found scale {device_name}");
                return Ok(found.device);
            }
            debug!("Skipping device {device_name:?}");
        }

        Err(TransportError::NotFound)
    }

    async fn connect(&self, device: Device) -> Result<BluestSession, TransportError> {
        self.adapter.connect_device(&device).await?;

        let characteristics = async {
            let write = Self::discover_characteristic(&device, Self::WRITE_CHARACTERISTIC_ID).await?;
            let notify = Self::discover_characteristic(&device, Self::NOTIFY_CHARACTERISTIC_ID).await?;
            Ok::<_, TransportError>((write, notify))
        }
        .await;

        match characteristics {
            Ok((write, notify)) => Ok(BluestSession { device, write, notify }),
            Err(err) => {
                if let Err(disconnect_err) = self.adapter.disconnect_device(&device).await {
                    warn!("Failed to disconnect after discovery error: {disconnect_err}");
                }
                Err(err)
            }
        }
    }

    async fn disconnect(&self, session: &BluestSession) -> Result<(), TransportError> {
        self.adapter.disconnect_device(&session.device).await?;
        Ok(())
    }

    async fn write(&self, session: &BluestSession, bytes: &[u8]) -> Result<(), TransportError> {
        if !session.device.is_connected().await {
            return Err(TransportError::NotConnected);
        }
        session.write.write(bytes).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        session: &BluestSession,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let notify = session.notify.clone();
        let (tx, rx) = mpsc::channel(Self::NOTIFICATION_QUEUE_LEN);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), TransportError>>();

        tokio::spawn(async move {
            let mut reader = match notify.notify().await {
                Ok(reader) => {
                    let _ = ready_tx.send(Ok(()));
                    reader
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err.into()));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    item = reader.next() => match item {
                        Some(Ok(data)) => {
                            if tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!("Notification error: {err}");
                            break;
                        }
                        None => {
                            debug!("End of notification stream");
                            break;
                        }
                    },
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| TransportError::Other("notification task ended early".to_string()))??;
        Ok(rx)
    }
}
