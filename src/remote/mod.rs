// Remote access backends
//
// The monitor never speaks a remote-shell protocol itself. It consumes two
// operations from whatever reaches the device: tail an append-only file from its
// current end, and run a process whose stdout is newline-delimited text.
//
// - `ssh`: drives the system `ssh` client
// - `local`: tails local files and runs local processes (bench setups, tests)

mod local;
mod ssh;

use crate::config::{MonitorConfig, RemoteMode};
use crate::error::MonitorResult;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;

pub use local::{FileTail, LocalRemote};
pub use ssh::SshRemote;

/// A connected session yielding text lines
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator. `Ok(None)` means the session ended.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Operations consumed from the device host
#[async_trait]
pub trait RemoteAccess: Send + Sync {
    /// Open `path` positioned at its current end; only lines appended afterwards are yielded.
    async fn open_tail(&self, path: &str) -> MonitorResult<Box<dyn LineSource>>;

    /// Run `command` and stream its stdout line by line.
    async fn execute(&self, command: &str) -> MonitorResult<Box<dyn LineSource>>;

    /// Human-readable target for log lines
    fn describe(&self) -> String;
}

/// Decode one raw line: terminators stripped, invalid UTF-8 replaced.
///
/// Device and printer logs occasionally carry stray bytes (line noise, a
/// firmware glitch); those lines are kept rather than failing the session.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Line reader over any byte stream, optionally owning the process producing it.
///
/// Dropping it kills the process (spawned with `kill_on_drop`).
pub struct ReaderLines {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    buf: Vec<u8>,
    _child: Option<Child>,
}

impl ReaderLines {
    pub fn new(reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            _child: None,
        }
    }

    pub fn with_child(reader: Box<dyn AsyncRead + Send + Unpin>, child: Child) -> Self {
        Self {
            _child: Some(child),
            ..Self::new(reader)
        }
    }
}

#[async_trait]
impl LineSource for ReaderLines {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        Ok(Some(decode_line(&self.buf)))
    }
}

/// Build the remote backend selected by configuration
pub fn create_remote(config: &MonitorConfig) -> Arc<dyn RemoteAccess> {
    match config.remote_mode {
        RemoteMode::Ssh => Arc::new(SshRemote::new(
            config.printer_host.clone(),
            config.ssh_user.clone(),
            config.ssh_port,
            config.ssh_identity.clone(),
        )),
        RemoteMode::Local => Arc::new(LocalRemote::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_lines_strips_terminators() {
        let reader = tokio_test::io::Builder::new()
            .read(b"G1 X1 Y2\r\n")
            .read(b"G1 X3")
            .read(b" Y4\n")
            .build();
        let mut source = ReaderLines::new(Box::new(reader));

        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("G1 X1 Y2"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("G1 X3 Y4"));
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_lines_replaces_invalid_utf8() {
        let reader = tokio_test::io::Builder::new()
            .read(b"\xff\xfeX1\n")
            .read(b"G1 X1 Y1\n")
            .build();
        let mut source = ReaderLines::new(Box::new(reader));

        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some("\u{FFFD}\u{FFFD}X1")
        );
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("G1 X1 Y1"));
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[test]
    fn test_decode_line_strips_one_terminator() {
        assert_eq!(decode_line(b"ok\r\n"), "ok");
        assert_eq!(decode_line(b"ok\n"), "ok");
        assert_eq!(decode_line(b"ok"), "ok");
        assert_eq!(decode_line(b"\n"), "");
    }
}
