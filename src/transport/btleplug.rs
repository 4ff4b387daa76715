//! btleplug-backed transport adapter.
//!
//! Wraps a [`btleplug::platform::Peripheral`] behind the transport
//! traits: connect with exponential-backoff retry, characteristic
//! lookup after service discovery, and notification fan-in onto a
//! channel. Also provides the passive scan glue that feeds broadcast
//! payloads into the advertisement parser.

use crate::advertisement::{parse_advertisement, DiscoveredPlug};
use crate::retry::{build_exponential_backoff, RetryPolicy};
use crate::transport::{PlugConnection, PlugTransport, TransportError};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection factory for one BLE peripheral.
pub struct BtleplugTransport {
    peripheral: Peripheral,
    retry: RetryPolicy,
    label: String,
}

impl BtleplugTransport {
    pub fn new(peripheral: Peripheral, retry: RetryPolicy) -> Self {
        let label = peripheral.address().to_string();
        Self {
            peripheral,
            retry,
            label,
        }
    }

    async fn try_connect(&self) -> Result<(), btleplug::Error> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;
        Ok(())
    }
}

#[async_trait]
impl PlugTransport for BtleplugTransport {
    async fn connect(&self) -> Result<Box<dyn PlugConnection>, TransportError> {
        let mut backoff = build_exponential_backoff(&self.retry);
        let max_attempts = self.retry.max_attempts.unwrap_or(u32::MAX).max(1);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.try_connect().await {
                Ok(()) => break,
                Err(e) => {
                    let delay = if attempts >= max_attempts {
                        None
                    } else {
                        backoff.next_backoff()
                    };
                    let Some(delay) = delay else {
                        return Err(TransportError::ConnectFailed {
                            attempts,
                            reason: e.to_string(),
                        });
                    };
                    warn!(
                        device = %self.label,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connect retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(Box::new(BtleplugConnection {
            peripheral: self.peripheral.clone(),
            forwarders: Mutex::new(Vec::new()),
        }))
    }
}

struct BtleplugConnection {
    peripheral: Peripheral,
    /// Notification fan-in tasks, aborted on disconnect.
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleplugConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl PlugConnection for BtleplugConnection {
    async fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<(), TransportError> {
        let ch = self.characteristic(characteristic)?;
        self.peripheral
            .write(&ch, payload, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Bytes>, TransportError> {
        let ch = self.characteristic(characteristic)?;
        self.peripheral
            .subscribe(&ch)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let mut stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if tx.send(Bytes::from(notification.value)).is_err() {
                    break;
                }
            }
        });
        self.forwarders.lock().push(handle);

        Ok(rx)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let ch = self.characteristic(characteristic)?;
        self.peripheral
            .unsubscribe(&ch)
            .await
            .map_err(|e| TransportError::UnsubscribeFailed(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        for handle in self.forwarders.lock().drain(..) {
            handle.abort();
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::DisconnectFailed(e.to_string()))
    }
}

/// The system's first Bluetooth adapter.
pub async fn default_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new()
        .await
        .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
    manager
        .adapters()
        .await
        .map_err(|e| TransportError::ScanFailed(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::ScanFailed("no Bluetooth adapter found".into()))
}

/// Scan for `duration` and return every recognized plug broadcast.
pub async fn discover_plugs(
    adapter: &Adapter,
    duration: Duration,
) -> Result<Vec<DiscoveredPlug>, TransportError> {
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| TransportError::ScanFailed(e.to_string()))?;

    let mut found = Vec::new();
    for peripheral in peripherals {
        let props = match peripheral.properties().await {
            Ok(Some(props)) => props,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "skipping peripheral without properties");
                continue;
            }
        };
        if let Some(plug) = parse_advertisement(
            &peripheral.address().to_string(),
            props.local_name.as_deref(),
            &props.manufacturer_data,
        ) {
            found.push(plug);
        }
    }

    if let Err(e) = adapter.stop_scan().await {
        debug!(error = %e, "stop_scan failed");
    }

    Ok(found)
}

/// Locate a previously discovered peripheral by hardware address.
pub async fn find_peripheral(
    adapter: &Adapter,
    address: &str,
) -> Result<Option<Peripheral>, TransportError> {
    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
    Ok(peripherals
        .into_iter()
        .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
}
