// SSH backend driving the system `ssh` client
//
// Authentication is whatever the local ssh configuration provides (agent, key
// file). `BatchMode` keeps a missing credential from blocking on a prompt; the
// session then exits and the caller's reconnect policy takes over.

use super::{LineSource, ReaderLines, RemoteAccess};
use crate::error::{MonitorError, MonitorResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

pub struct SshRemote {
    host: String,
    user: String,
    port: u16,
    identity: Option<PathBuf>,
}

impl SshRemote {
    pub fn new(host: String, user: String, port: u16, identity: Option<PathBuf>) -> Self {
        Self {
            host,
            user,
            port,
            identity,
        }
    }

    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o").arg("ConnectTimeout=30");
        cmd.arg("-o").arg("ServerAliveInterval=15");
        cmd.arg("-o").arg("ServerAliveCountMax=3");
        cmd.arg("-p").arg(self.port.to_string());

        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity);
        }

        cmd.arg(format!("{}@{}", self.user, self.host));
        cmd.arg(remote_command);
        cmd
    }

    async fn spawn(&self, remote_command: &str) -> MonitorResult<Box<dyn LineSource>> {
        let mut cmd = self.command(remote_command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning ssh session: {:?}", cmd.as_std());

        let mut child = cmd.spawn().map_err(|e| {
            MonitorError::Connection(format!("Failed to spawn ssh to {}: {}", self.host, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MonitorError::Connection("ssh session has no stdout".to_string()))?;

        // Drain stderr so a chatty remote process cannot stall on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let host = self.host.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{} stderr] {}", host, line);
                }
            });
        }

        Ok(Box::new(ReaderLines::with_child(Box::new(stdout), child)))
    }
}

#[async_trait]
impl RemoteAccess for SshRemote {
    async fn open_tail(&self, path: &str) -> MonitorResult<Box<dyn LineSource>> {
        // `-n 0` starts at the current end, `-F` follows across rotation
        self.spawn(&format!("tail -n 0 -F {}", shell_quote(path)))
            .await
    }

    async fn execute(&self, command: &str) -> MonitorResult<Box<dyn LineSource>> {
        self.spawn(command).await
    }

    fn describe(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Single-quote `value` for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
