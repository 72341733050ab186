//! Transport session: delivers one job's frames over a [`Channel`].
//!
//! The session is an explicit state machine. [`transition`] is the whole
//! transition table; [`Session::run`] performs the side effect each
//! transition asks for and feeds the outcome back in as the next event.
//!
//! ```text
//! Idle -> Handshaking -> Transmitting -> AwaitingCompletion -> Done
//!   \________________\_______________\____________________-> Failed
//! ```
//!
//! Sends are retried on transient errors (`WriteRejected`, `ChannelTimeout`)
//! with a fixed backoff; anything else fails the session at once. A failed
//! job is not resumable, rerun it from the start.

use std::iter::Peekable;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::channel::{Channel, ChannelGuard};
use crate::config::{AckMode, Completion, PrinterProfile};
use crate::error::Error;
use crate::packetizer::{Frames, Packetizer};
use crate::protocol::{
    CMD_GET_DEVICE_STATE, CMD_PRINT_COMPLETE, Frame, Notification, PrinterStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Handshaking,
    Transmitting,
    AwaitingCompletion,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

/// Outcome of the previous step, fed into [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    /// Printer answered the query and the leading control frames are out.
    Ready,
    /// Every frame has been sent.
    Drained,
    Completed,
    Fault,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Query,
    Transmit,
    AwaitCompletion,
    Finish,
    Abort,
    Nothing,
}

/// The session transition table.
///
/// Terminal phases ignore every event. `Fault` fails any live phase, and so
/// does an event that makes no sense in the current phase.
pub fn transition(phase: Phase, event: Event) -> (Phase, Action) {
    match (phase, event) {
        (Phase::Done | Phase::Failed, _) => (phase, Action::Nothing),
        (_, Event::Fault) => (Phase::Failed, Action::Abort),
        (Phase::Idle, Event::Start) => (Phase::Handshaking, Action::Query),
        (Phase::Handshaking, Event::Ready) => (Phase::Transmitting, Action::Transmit),
        (Phase::Transmitting, Event::Drained) => {
            (Phase::AwaitingCompletion, Action::AwaitCompletion)
        }
        (Phase::AwaitingCompletion, Event::Completed) => (Phase::Done, Action::Finish),
        _ => (Phase::Failed, Action::Abort),
    }
}

/// Timing and retry knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Extra attempts per frame after the first one.
    pub retries: u32,
    pub backoff: Duration,
    /// Bound on each query reply or frame acknowledgement.
    pub response_timeout: Duration,
    /// Bound on the print-complete notification.
    pub completion_timeout: Duration,
    /// Added to the estimated print time when settling.
    pub settle_base: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(50),
            response_timeout: Duration::from_secs(2),
            completion_timeout: Duration::from_secs(60),
            settle_base: Duration::from_millis(500),
        }
    }
}

/// Summary of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub frames_sent: usize,
    pub rows: usize,
    /// Retries spent across all frames.
    pub retries: u32,
}

/// Terminal result of a session that ended in [`Phase::Failed`].
#[derive(Error, Debug)]
#[error("print session failed while {phase:?}: {error}")]
pub struct SessionFailure {
    /// Phase the session was in when the error happened.
    pub phase: Phase,
    #[source]
    pub error: Error,
    /// Last raw packet received from the printer.
    pub last_response: Option<Vec<u8>>,
}

/// One print job over an exclusively borrowed channel.
pub struct Session<'a, C: Channel + ?Sized> {
    channel: ChannelGuard<'a, C>,
    profile: &'a PrinterProfile,
    settings: SessionSettings,
    phase: Phase,
    frames_sent: usize,
    retries: u32,
    last_response: Option<Vec<u8>>,
    fault: Option<(Phase, Error)>,
}

impl<'a, C: Channel + ?Sized> Session<'a, C> {
    /// Acquires the channel. It is released when the session is dropped.
    pub async fn open(
        channel: &'a mut C,
        profile: &'a PrinterProfile,
        settings: SessionSettings,
    ) -> Result<Self, Error> {
        let channel = ChannelGuard::acquire(channel).await?;
        Ok(Self {
            channel,
            profile,
            settings,
            phase: Phase::Idle,
            frames_sent: 0,
            retries: 0,
            last_response: None,
            fault: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Asks the printer for its device state.
    pub async fn status(&mut self) -> Result<PrinterStatus, Error> {
        let reply = self
            .exchange(&Frame::device_state_query(), Some(CMD_GET_DEVICE_STATE))
            .await?
            .ok_or_else(|| Error::violation("no device state reply", None))?;
        PrinterStatus::from_payload(&reply.payload)
    }

    /// Drives the job to `Done` or `Failed`.
    pub async fn run(mut self, job: &Packetizer<'_>) -> Result<JobReport, SessionFailure> {
        let mut frames = job.frames().peekable();
        let mut event = Event::Start;
        info!(
            "printing {} rows in {} frames on {}",
            job.rows(),
            job.frame_count(),
            self.profile.name
        );
        loop {
            let (next, action) = transition(self.phase, event);
            debug!("{:?} --{:?}--> {:?}", self.phase, event, next);
            let from = self.phase;
            self.phase = next;
            let outcome = match action {
                Action::Query => self.handshake(&mut frames).await.map(|()| Event::Ready),
                Action::Transmit => self.transmit(&mut frames).await.map(|()| Event::Drained),
                Action::AwaitCompletion => self
                    .await_completion(job.paper_rows())
                    .await
                    .map(|()| Event::Completed),
                Action::Finish => {
                    info!(
                        "job done: {} frames, {} retries",
                        self.frames_sent, self.retries
                    );
                    return Ok(JobReport {
                        frames_sent: self.frames_sent,
                        rows: job.rows(),
                        retries: self.retries,
                    });
                }
                Action::Abort | Action::Nothing => return Err(self.into_failure(from, event)),
            };
            event = match outcome {
                Ok(event) => event,
                Err(err) => {
                    self.fault = Some((self.phase, err));
                    Event::Fault
                }
            };
        }
    }

    fn into_failure(mut self, from: Phase, event: Event) -> SessionFailure {
        let (phase, error) = self.fault.take().unwrap_or_else(|| {
            let reason = format!("unexpected {:?} while {:?}", event, from);
            (from, Error::violation(reason, None))
        });
        warn!("session failed while {:?}: {}", phase, error);
        SessionFailure {
            phase,
            error,
            last_response: self.last_response.take(),
        }
    }

    async fn handshake(&mut self, frames: &mut Peekable<Frames<'_>>) -> Result<(), Error> {
        let status = self.status().await?;
        debug!("printer status: {}", status);
        if !status.is_ready() {
            return Err(Error::PrinterNotReady(status));
        }
        while let Some(frame) = frames.next_if(|f| !f.is_data()) {
            self.deliver(&frame).await?;
        }
        Ok(())
    }

    async fn transmit(&mut self, frames: &mut Peekable<Frames<'_>>) -> Result<(), Error> {
        for frame in frames {
            self.deliver(&frame).await?;
        }
        Ok(())
    }

    async fn await_completion(&mut self, paper_rows: usize) -> Result<(), Error> {
        match self.profile.completion {
            Completion::Notify => {
                let timeout = self.settings.completion_timeout;
                self.await_notification(CMD_PRINT_COMPLETE, timeout)
                    .await
                    .map(drop)
            }
            Completion::Settle => {
                let delay = self.settings.settle_base + self.profile.print_time(paper_rows);
                debug!("settling for {:?}", delay);
                sleep(delay).await;
                Ok(())
            }
        }
    }

    fn wants_ack(&self, frame: &Frame) -> bool {
        match self.profile.ack {
            AckMode::None => false,
            AckMode::Control => !frame.is_data() && self.phase == Phase::Handshaking,
            AckMode::EveryFrame => true,
        }
    }

    async fn deliver(&mut self, frame: &Frame) -> Result<(), Error> {
        let ack = self.wants_ack(frame).then_some(frame.command);
        self.exchange(frame, ack).await?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Sends `frame` and, if `reply` is set, waits for a notification with that
    /// command id. The pair is retried as a unit on transient errors.
    async fn exchange(
        &mut self,
        frame: &Frame,
        reply: Option<u8>,
    ) -> Result<Option<Notification>, Error> {
        let bytes = frame.encode();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match self.channel.send(&bytes).await {
                Ok(()) => match reply {
                    Some(command) => {
                        let timeout = self.settings.response_timeout;
                        self.await_notification(command, timeout).await.map(Some)
                    }
                    None => Ok(None),
                },
                Err(err) => Err(err),
            };
            match result {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_transient() => {
                    if attempts > self.settings.retries {
                        return Err(Error::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    warn!(
                        "frame {:#04x} attempt {} failed: {}; retrying",
                        frame.command, attempts, err
                    );
                    self.retries += 1;
                    sleep(self.settings.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Waits for a notification with `command`, skipping unrelated ones.
    async fn await_notification(
        &mut self,
        command: u8,
        timeout: Duration,
    ) -> Result<Notification, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::ChannelTimeout(timeout));
            }
            let raw = self.channel.receive(remaining).await?;
            let notification = Notification::parse(&raw);
            self.last_response = Some(raw);
            let notification = notification?;
            if notification.command_id == command {
                return Ok(notification);
            }
            debug!(
                "ignoring notification {:#04x} while waiting for {:#04x}",
                notification.command_id, command
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let steps = [
            (Phase::Idle, Event::Start, Phase::Handshaking, Action::Query),
            (Phase::Handshaking, Event::Ready, Phase::Transmitting, Action::Transmit),
            (
                Phase::Transmitting,
                Event::Drained,
                Phase::AwaitingCompletion,
                Action::AwaitCompletion,
            ),
            (Phase::AwaitingCompletion, Event::Completed, Phase::Done, Action::Finish),
        ];
        for (phase, event, next, action) in steps {
            assert_eq!(transition(phase, event), (next, action));
        }
    }

    #[test]
    fn fault_fails_every_live_phase() {
        for phase in [
            Phase::Idle,
            Phase::Handshaking,
            Phase::Transmitting,
            Phase::AwaitingCompletion,
        ] {
            assert_eq!(transition(phase, Event::Fault), (Phase::Failed, Action::Abort));
        }
    }

    #[test]
    fn terminal_phases_are_sticky() {
        for phase in [Phase::Done, Phase::Failed] {
            assert!(phase.is_terminal());
            for event in [Event::Start, Event::Ready, Event::Fault, Event::Completed] {
                assert_eq!(transition(phase, event), (phase, Action::Nothing));
            }
        }
    }

    #[test]
    fn out_of_order_events_fail() {
        assert_eq!(
            transition(Phase::Idle, Event::Drained),
            (Phase::Failed, Action::Abort)
        );
        assert_eq!(
            transition(Phase::Transmitting, Event::Start),
            (Phase::Failed, Action::Abort)
        );
    }
}
