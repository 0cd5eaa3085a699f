use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{ActuatorCommand, CommandChannel};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Programs to run for each command, e.g.
/// `["ssh", "pi@door.local", "python3", "led.py", "on"]`.
#[derive(Clone, Debug)]
pub struct ProcessChannelConfig {
    pub engage: Vec<String>,
    pub disengage: Vec<String>,
    pub timeout: Duration,
}

/// Runs an external program per command and checks its exit status.
pub struct ProcessChannel {
    config: ProcessChannelConfig,
}

impl ProcessChannel {
    pub fn new(config: ProcessChannelConfig) -> Result<Self> {
        if config.engage.is_empty() || config.disengage.is_empty() {
            return Err(anyhow!(
                "command actuator needs both an engage and a disengage command"
            ));
        }
        Ok(Self { config })
    }

    fn argv(&self, command: ActuatorCommand) -> &[String] {
        match command {
            ActuatorCommand::Engage => &self.config.engage,
            ActuatorCommand::Disengage => &self.config.disengage,
        }
    }
}

impl CommandChannel for ProcessChannel {
    fn name(&self) -> &'static str {
        "command"
    }

    fn send(&mut self, command: ActuatorCommand) -> Result<()> {
        let argv = self.argv(command);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty {} command", command))?;
        run_with_timeout(program, args, self.config.timeout)
    }
}

fn run_with_timeout(program: &str, args: &[String], timeout: Duration) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn {}", program))?;

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("wait for actuator command")? {
            if status.success() {
                return Ok(());
            }
            return Err(anyhow!("{} exited with {}", program, status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("{} timed out after {:?}", program, timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
