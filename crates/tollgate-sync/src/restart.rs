//! Forwarder restart control.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SyncError;

/// How the external forwarder is told to pick up a new configuration.
///
/// The forwarder is fully external; this trait is the only thing the sync
/// coordinator knows about it. Tests substitute a recording fake.
#[async_trait::async_trait]
pub trait ForwarderControl: Send + Sync {
    async fn restart(&self) -> Result<(), SyncError>;
}

/// Runs a configured command (e.g. `systemctl restart gost`, or a
/// `kill -HUP` argv for forwarders that hot-reload on a signal).
pub struct CommandControl {
    argv: Vec<String>,
}

impl CommandControl {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait::async_trait]
impl ForwarderControl for CommandControl {
    async fn restart(&self) -> Result<(), SyncError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(SyncError::Restart("restart command is empty".to_string()));
        };
        debug!(command = %self.argv.join(" "), "restarting forwarder");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SyncError::Restart(format!("spawn {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Restart(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        info!(command = %self.argv.join(" "), "forwarder restarted");
        Ok(())
    }
}

/// Writes only; something else (the forwarder itself, or a supervisor)
/// watches the rendered file.
pub struct NoopControl;

#[async_trait::async_trait]
impl ForwarderControl for NoopControl {
    async fn restart(&self) -> Result<(), SyncError> {
        debug!("restart mode is none; config file write is the whole apply");
        Ok(())
    }
}
