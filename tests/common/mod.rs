//! Scripted in-memory channel shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use catprint::protocol::{CMD_GET_DEVICE_STATE, build_packet};
use catprint::{Channel, Error};

/// Counters the test keeps after handing the channel to a printer.
#[derive(Clone, Default)]
pub struct Probe {
    pub attempts: Arc<AtomicUsize>,
    pub acquires: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Probe {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Successfully written packets, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// Command bytes of the written packets.
    pub fn commands(&self) -> Vec<u8> {
        self.written().iter().map(|p| p[2]).collect()
    }
}

/// Printer-to-host packet.
pub fn notification(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = build_packet(command, payload);
    packet[3] = 0x01;
    packet
}

/// Payload of a host-to-printer packet.
pub fn payload(packet: &[u8]) -> &[u8] {
    let len = u16::from_le_bytes([packet[4], packet[5]]) as usize;
    &packet[6..6 + len]
}

type Responder = Box<dyn FnMut(u8) -> Vec<Vec<u8>> + Send>;

pub struct ScriptedChannel {
    pub probe: Probe,
    /// Write attempts with these indices (0-based) fail with `WriteRejected`.
    reject: Box<dyn Fn(usize) -> bool + Send>,
    /// From this write attempt on, the channel reports itself closed.
    closed_from: Option<usize>,
    /// After this many successful writes, `send` never completes.
    stall_after: Option<usize>,
    responder: Responder,
    inbox: VecDeque<Vec<u8>>,
}

impl ScriptedChannel {
    /// A healthy printer: answers the state query with "ready".
    pub fn new() -> Self {
        Self {
            probe: Probe::default(),
            reject: Box::new(|_| false),
            closed_from: None,
            stall_after: None,
            responder: Box::new(|command| match command {
                CMD_GET_DEVICE_STATE => vec![notification(CMD_GET_DEVICE_STATE, &[0x00])],
                _ => vec![],
            }),
            inbox: VecDeque::new(),
        }
    }

    pub fn rejecting(mut self, reject: impl Fn(usize) -> bool + Send + 'static) -> Self {
        self.reject = Box::new(reject);
        self
    }

    pub fn closed_from(mut self, attempt: usize) -> Self {
        self.closed_from = Some(attempt);
        self
    }

    pub fn stalling_after(mut self, writes: usize) -> Self {
        self.stall_after = Some(writes);
        self
    }

    pub fn responding(
        mut self,
        responder: impl FnMut(u8) -> Vec<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.responder = Box::new(responder);
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn acquire(&mut self) -> Result<(), Error> {
        self.probe.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let attempt = self.probe.attempts.fetch_add(1, Ordering::SeqCst);
        if self.closed_from.is_some_and(|n| attempt >= n) {
            return Err(Error::ChannelClosed);
        }
        if (self.reject)(attempt) {
            return Err(Error::WriteRejected("buffer full".into()));
        }
        let written = self.probe.written.lock().unwrap().len();
        if self.stall_after.is_some_and(|n| written >= n) {
            std::future::pending::<()>().await;
        }
        self.probe.written.lock().unwrap().push(bytes.to_vec());
        let replies = (self.responder)(bytes[2]);
        self.inbox.extend(replies);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
        match self.inbox.pop_front() {
            Some(packet) => Ok(packet),
            None => {
                tokio::time::sleep(timeout).await;
                Err(Error::ChannelTimeout(timeout))
            }
        }
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}
