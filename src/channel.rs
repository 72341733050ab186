//! The byte channel a session talks through.
//!
//! Implement [`Channel`] for your transport (the [`crate::ble`] adapter does it
//! for a connected BLE peripheral, tests use in-memory fakes). The channel must
//! preserve write order; the printer has no reordering buffer.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::error::Error;

#[async_trait]
pub trait Channel: Send {
    /// Prepares the channel for one job, e.g. subscribes to notifications.
    async fn acquire(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Writes one encoded frame. Suspends while the transport applies
    /// backpressure. `WriteRejected` is retryable, `ChannelClosed` is not.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Next packet from the printer, or `ChannelTimeout` after `timeout`.
    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, Error>;

    /// Undoes [`Channel::acquire`]. Called exactly once per acquired job.
    fn release(&mut self);
}

/// Holds an acquired channel and releases it when dropped, whichever way the
/// job ends (success, error, or the future being dropped).
pub struct ChannelGuard<'a, C: Channel + ?Sized> {
    channel: &'a mut C,
}

impl<'a, C: Channel + ?Sized> ChannelGuard<'a, C> {
    pub async fn acquire(channel: &'a mut C) -> Result<Self, Error> {
        channel.acquire().await?;
        Ok(Self { channel })
    }
}

impl<C: Channel + ?Sized> Deref for ChannelGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.channel
    }
}

impl<C: Channel + ?Sized> DerefMut for ChannelGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.channel
    }
}

impl<C: Channel + ?Sized> Drop for ChannelGuard<'_, C> {
    fn drop(&mut self) {
        debug!("releasing channel");
        self.channel.release();
    }
}
