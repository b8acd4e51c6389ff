//! Transport worker: drains the command slot onto the controller link.
//!
//! Lifecycle: `Unopened` (connecting) -> `Open` -> `Closed` on a normal
//! stop, or `Failed` on an open failure or a non-timeout I/O error. The
//! worker never reconnects. Whatever happens here, vision keeps running.

use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::link::{decode_echo, CommandLink, LinkOpener, SendOutcome};
use crate::command::Command;
use crate::lifecycle::{StopSignal, WorkerHandle};
use crate::steer::CommandSlot;

const ECHO_BUFFER_BYTES: usize = 128;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
    Failed,
}

/// Shared read-only view of a session's state.
#[derive(Clone, Debug)]
pub struct SessionMonitor {
    state: Arc<Mutex<SessionState>>,
}

impl SessionMonitor {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::Unopened)),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set(&self, next: SessionState) {
        match self.state.lock() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

// ----------------------------------------------------------------------------
// SerialSession
// ----------------------------------------------------------------------------

/// The open connection to the controller. Owned by the transport worker.
pub struct SerialSession {
    link: Option<Box<dyn CommandLink>>,
    monitor: SessionMonitor,
}

impl SerialSession {
    pub fn new() -> Self {
        Self {
            link: None,
            monitor: SessionMonitor::new(),
        }
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    pub fn open(&mut self, opener: &dyn LinkOpener) -> Result<()> {
        if self.state() != SessionState::Unopened {
            return Err(anyhow!("session already used ({:?})", self.state()));
        }
        match opener.open() {
            Ok(link) => {
                self.link = Some(link);
                self.monitor.set(SessionState::Open);
                Ok(())
            }
            Err(err) => {
                self.monitor.set(SessionState::Failed);
                Err(err)
            }
        }
    }

    /// Write one command. Timeouts are reported, other errors fail the
    /// session.
    pub fn send(&mut self, command: Command) -> Result<SendOutcome> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| anyhow!("session is not open"))?;
        match link.write_line(&command.to_wire()) {
            Ok(()) => Ok(SendOutcome::Sent(command)),
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(SendOutcome::TimedOut(command)),
            Err(err) => {
                self.fail();
                Err(err).with_context(|| format!("write {} failed", command))
            }
        }
    }

    /// Pull pending controller output, decoded for display.
    pub fn poll_echo(&mut self) -> Result<Option<String>> {
        let Some(link) = self.link.as_mut() else {
            return Ok(None);
        };
        let mut buf = [0u8; ECHO_BUFFER_BYTES];
        match link.read_available(&mut buf) {
            Ok(0) => Ok(None),
            Ok(read) => Ok(decode_echo(&buf[..read])),
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(err) => {
                self.fail();
                Err(err).context("read from controller failed")
            }
        }
    }

    /// Release the link. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            log::info!("transport: closed {}", link.describe());
        }
        if self.state() == SessionState::Open {
            self.monitor.set(SessionState::Closed);
        }
    }

    fn fail(&mut self) {
        self.link = None;
        self.monitor.set(SessionState::Failed);
    }
}

impl Default for SerialSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// TransportWorker
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct TransportSettings {
    /// How long each wait on the command slot may block.
    pub command_poll: Duration,
    /// Log controller output.
    pub echo: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            command_poll: Duration::from_millis(50),
            echo: true,
        }
    }
}

/// Totals reported when the worker returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportSummary {
    pub sent: u64,
    pub timeouts: u64,
    pub echoes: u64,
    pub final_state: Option<SessionState>,
}

pub struct TransportWorker {
    opener: Box<dyn LinkOpener>,
    commands: Arc<CommandSlot>,
    stop: StopSignal,
    settings: TransportSettings,
    session: SerialSession,
}

/// Running transport worker plus a view of its session.
pub struct TransportHandle {
    pub worker: WorkerHandle<TransportSummary>,
    pub session: SessionMonitor,
}

impl TransportWorker {
    pub fn new(
        opener: Box<dyn LinkOpener>,
        commands: Arc<CommandSlot>,
        stop: StopSignal,
        settings: TransportSettings,
    ) -> Self {
        Self {
            opener,
            commands,
            stop,
            settings,
            session: SerialSession::new(),
        }
    }

    pub fn spawn(self) -> Result<TransportHandle> {
        let session = self.session.monitor();
        let worker = WorkerHandle::spawn("transport", move || self.run())?;
        Ok(TransportHandle { worker, session })
    }

    pub fn run(mut self) -> TransportSummary {
        let mut summary = TransportSummary::default();
        let target = self.opener.describe();
        log::info!("transport: connecting to {}", target);

        if let Err(err) = self.session.open(self.opener.as_ref()) {
            log::error!("transport: could not connect to {}: {:#}", target, err);
            log::error!(
                "transport: check the controller is plugged in, no other program holds the port, and the port name is right"
            );
            summary.final_state = Some(self.session.state());
            return summary;
        }
        log::info!("transport: connected to {}", target);

        let mut last_health_log = Instant::now();
        while !self.stop.is_set() {
            if let Some(command) = self.commands.get(self.settings.command_poll) {
                match self.session.send(command) {
                    Ok(SendOutcome::Sent(command)) => {
                        summary.sent += 1;
                        log::debug!("transport: sent {}", command);
                    }
                    Ok(SendOutcome::TimedOut(command)) => {
                        summary.timeouts += 1;
                        log::warn!("transport: timed out sending {}", command);
                    }
                    Err(err) => {
                        log::error!("transport: {:#}; giving up on the link", err);
                        break;
                    }
                }
            }

            if self.settings.echo {
                match self.session.poll_echo() {
                    Ok(Some(text)) => {
                        summary.echoes += 1;
                        log::info!("controller: {}", text);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        log::error!("transport: {:#}; giving up on the link", err);
                        break;
                    }
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.commands.stats();
                log::info!(
                    "transport: sent={} timeouts={} slot_evicted={} slot_skipped={}",
                    summary.sent,
                    summary.timeouts,
                    stats.evicted,
                    stats.skipped
                );
                last_health_log = Instant::now();
            }
        }

        if self.stop.is_set() {
            log::info!("transport: stop requested, exiting loop");
        }
        self.session.close();
        summary.final_state = Some(self.session.state());
        summary
    }
}
