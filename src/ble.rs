//! [`Channel`] adapter over an already connected btleplug peripheral.
//!
//! Frames go out on the `AE01` characteristic, split into ATT-sized writes.
//! Replies come back as notifications on `AE02`. The printer throttles the
//! host with `0xAE` flow control notifications; while it asks for a pause,
//! [`Channel::send`] waits.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use log::{debug, trace};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::Channel;
use crate::error::Error;
use crate::protocol::{Notification, chunk_data};

/// Host to printer writes.
pub const TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ae01_0000_1000_8000_00805f9b34fb);
/// Printer to host notifications.
pub const RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ae02_0000_1000_8000_00805f9b34fb);

/// Default ATT payload per write (23-byte MTU minus 3 bytes of header).
pub const DEFAULT_WRITE_MTU: usize = 20;

struct Pump {
    task: JoinHandle<()>,
    packets: mpsc::UnboundedReceiver<Vec<u8>>,
    paused: watch::Receiver<bool>,
}

impl Pump {
    /// Returns once the printer is not asking for a pause.
    async fn resumed(&mut self) -> Result<(), Error> {
        while *self.paused.borrow_and_update() {
            // the pump drops its sender when the link goes away
            self.paused
                .changed()
                .await
                .map_err(|_| Error::ChannelClosed)?;
        }
        Ok(())
    }
}

pub struct BleChannel {
    peripheral: Peripheral,
    tx: Characteristic,
    rx: Characteristic,
    /// Bytes per BLE write.
    pub write_mtu: usize,
    /// Pause between consecutive writes.
    pub write_delay: Duration,
    pump: Option<Pump>,
}

impl BleChannel {
    /// Wraps a connected peripheral and locates the printer characteristics.
    pub async fn attach(peripheral: Peripheral) -> Result<Self, Error> {
        if !peripheral.is_connected().await? {
            return Err(Error::ChannelClosed);
        }
        peripheral.discover_services().await?;
        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| Error::violation(format!("missing characteristic {uuid}"), None))
        };
        let tx = find(TX_CHARACTERISTIC)?;
        let rx = find(RX_CHARACTERISTIC)?;
        Ok(Self {
            peripheral,
            tx,
            rx,
            write_mtu: DEFAULT_WRITE_MTU,
            write_delay: Duration::from_millis(20),
            pump: None,
        })
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

fn write_error(err: btleplug::Error) -> Error {
    match err {
        btleplug::Error::NotConnected => Error::ChannelClosed,
        other => Error::WriteRejected(other.to_string()),
    }
}

#[async_trait]
impl Channel for BleChannel {
    async fn acquire(&mut self) -> Result<(), Error> {
        self.release();
        self.peripheral.subscribe(&self.rx).await?;
        let mut stream = self.peripheral.notifications().await?;
        let (packets_tx, packets) = mpsc::unbounded_channel();
        let (paused_tx, paused) = watch::channel(false);
        let rx_uuid = self.rx.uuid;

        let task = tokio::spawn(async move {
            while let Some(n) = stream.next().await {
                if n.uuid != rx_uuid {
                    continue;
                }
                let flow = Notification::parse(&n.value)
                    .ok()
                    .and_then(|p| p.flow_paused());
                match flow {
                    Some(pause) => {
                        debug!("printer flow control: paused={}", pause);
                        let _ = paused_tx.send(pause);
                    }
                    None => {
                        if packets_tx.send(n.value).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("notification stream ended");
        });

        self.pump = Some(Pump {
            task,
            packets,
            paused,
        });
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for chunk in chunk_data(bytes, self.write_mtu) {
            if let Some(pump) = self.pump.as_mut() {
                pump.resumed().await?;
            }
            trace!("ble write {} bytes", chunk.len());
            self.peripheral
                .write(&self.tx, chunk, WriteType::WithoutResponse)
                .await
                .map_err(write_error)?;
            if !self.write_delay.is_zero() {
                tokio::time::sleep(self.write_delay).await;
            }
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
        let pump = self.pump.as_mut().ok_or(Error::ChannelClosed)?;
        match tokio::time::timeout(timeout, pump.packets.recv()).await {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(Error::ChannelClosed),
            Err(_) => Err(Error::ChannelTimeout(timeout)),
        }
    }

    fn release(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.task.abort();
        }
    }
}

impl Drop for BleChannel {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_uuids() {
        assert_eq!(
            TX_CHARACTERISTIC.to_string(),
            "0000ae01-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            RX_CHARACTERISTIC.to_string(),
            "0000ae02-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn write_errors_are_classified() {
        assert!(matches!(
            write_error(btleplug::Error::NotConnected),
            Error::ChannelClosed
        ));
        let busy = write_error(btleplug::Error::TimedOut(Duration::from_millis(10)));
        assert!(busy.is_transient());
    }

    fn pump() -> (Pump, watch::Sender<bool>) {
        let (_, packets) = mpsc::unbounded_channel();
        let (paused_tx, paused) = watch::channel(false);
        let pump = Pump {
            task: tokio::spawn(async {}),
            packets,
            paused,
        };
        (pump, paused_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_writes_until_resume() {
        let (mut pump, paused) = pump();
        pump.resumed().await.unwrap();

        paused.send(true).unwrap();
        let held = tokio::time::timeout(Duration::from_secs(1), pump.resumed()).await;
        assert!(held.is_err());

        let resume = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            paused.send(false).unwrap();
            paused
        });
        pump.resumed().await.unwrap();
        let paused = resume.await.unwrap();

        // a pause that lands between two writes is honoured by the next one
        paused.send(true).unwrap();
        drop(paused);
        assert!(matches!(pump.resumed().await, Err(Error::ChannelClosed)));
    }
}
