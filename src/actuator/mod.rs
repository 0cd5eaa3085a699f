//! Door-lock actuator control.
//!
//! `ActuatorController` owns a `CommandChannel` behind a mutex so engage and
//! disengage commands from concurrent recognition completions are issued one
//! at a time. The last successful command determines the state; a command that
//! still fails after its retries leaves the state `Unknown`.

mod command;
mod mqtt;

pub use command::{ProcessChannel, ProcessChannelConfig};
pub use mqtt::{MqttChannel, MqttChannelConfig};

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActuatorState {
    Engaged,
    Disengaged,
    Unknown,
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Engaged => "engaged",
            Self::Disengaged => "disengaged",
            Self::Unknown => "unknown",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActuatorCommand {
    Engage,
    Disengage,
}

impl ActuatorCommand {
    fn target_state(self) -> ActuatorState {
        match self {
            Self::Engage => ActuatorState::Engaged,
            Self::Disengage => ActuatorState::Disengaged,
        }
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Engage => "engage",
            Self::Disengage => "disengage",
        })
    }
}

/// Wire protocol to the physical actuator.
///
/// `send` must return within a bounded time; the controller holds its lock
/// for the duration of the call.
pub trait CommandChannel: Send {
    fn name(&self) -> &'static str;

    fn send(&mut self, command: ActuatorCommand) -> Result<()>;
}

/// Dry-run channel: logs commands and always succeeds.
#[derive(Default)]
pub struct NullChannel;

impl CommandChannel for NullChannel {
    fn name(&self) -> &'static str {
        "none"
    }

    fn send(&mut self, command: ActuatorCommand) -> Result<()> {
        log::info!("actuator (dry run): {}", command);
        Ok(())
    }
}

/// Snapshot of controller counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActuatorStats {
    pub commands: u64,
    pub failures: u64,
}

struct Inner {
    channel: Box<dyn CommandChannel>,
    state: ActuatorState,
    stats: ActuatorStats,
}

/// Serializes actuator commands and tracks the resulting state.
pub struct ActuatorController {
    inner: Mutex<Inner>,
    retries: u32,
}

impl ActuatorController {
    pub fn new(channel: Box<dyn CommandChannel>, retries: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                channel,
                state: ActuatorState::Unknown,
                stats: ActuatorStats::default(),
            }),
            retries,
        }
    }

    pub fn engage(&self) -> Result<()> {
        self.command(ActuatorCommand::Engage)
    }

    pub fn disengage(&self) -> Result<()> {
        self.command(ActuatorCommand::Disengage)
    }

    pub fn state(&self) -> ActuatorState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(ActuatorState::Unknown)
    }

    pub fn stats(&self) -> ActuatorStats {
        self.inner
            .lock()
            .map(|inner| inner.stats)
            .unwrap_or_default()
    }

    pub fn channel_name(&self) -> &'static str {
        self.inner
            .lock()
            .map(|inner| inner.channel.name())
            .unwrap_or("poisoned")
    }

    /// Issue `command`, retrying up to the configured count.
    pub fn command(&self, command: ActuatorCommand) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("actuator lock poisoned"))?;
        inner.stats.commands += 1;

        let mut last_error = None;
        for attempt in 0..=self.retries {
            match inner.channel.send(command) {
                Ok(()) => {
                    inner.state = command.target_state();
                    log::debug!("actuator {} -> {}", command, inner.state);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "actuator {} via {} failed (attempt {}/{}): {:#}",
                        command,
                        inner.channel.name(),
                        attempt + 1,
                        self.retries + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        inner.state = ActuatorState::Unknown;
        inner.stats.failures += 1;
        let e = last_error.unwrap_or_else(|| anyhow!("no attempt made"));
        Err(e.context(format!("actuator {} failed", command)))
    }
}
