// Local backend: file tail with end-of-file polling and `sh -c` processes

use super::{decode_line, LineSource, ReaderLines, RemoteAccess};
use crate::error::{MonitorError, MonitorResult};
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::process::Command;
use tokio::time::{sleep, Duration};

const EOF_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct LocalRemote;

impl LocalRemote {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteAccess for LocalRemote {
    async fn open_tail(&self, path: &str) -> MonitorResult<Box<dyn LineSource>> {
        let tail = FileTail::open(path).await?;
        Ok(Box::new(tail))
    }

    async fn execute(&self, command: &str) -> MonitorResult<Box<dyn LineSource>> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MonitorError::Connection(format!("Failed to spawn '{}': {}", command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MonitorError::Connection("Process has no stdout".to_string()))?;

        Ok(Box::new(ReaderLines::with_child(Box::new(stdout), child)))
    }

    fn describe(&self) -> String {
        "localhost".to_string()
    }
}

/// Follows a growing file from the position it had when opened.
///
/// At end-of-file it polls every 100 ms. A partially written last line is held
/// back until its terminator arrives. Invalid UTF-8 is replaced, never fatal. If the file shrinks (rotation or
/// truncation) reading restarts from the beginning.
pub struct FileTail {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    partial: Vec<u8>,
}

impl FileTail {
    pub async fn open(path: &str) -> MonitorResult<Self> {
        let mut file = File::open(path).await?;
        let position = file.seek(SeekFrom::End(0)).await?;

        Ok(Self {
            path: PathBuf::from(path),
            reader: BufReader::new(file),
            position,
            partial: Vec::new(),
        })
    }

    async fn check_truncated(&mut self) -> io::Result<()> {
        let len = tokio::fs::metadata(&self.path).await?.len();
        if len < self.position {
            tracing::warn!("{} shrank, restarting from the beginning", self.path.display());
            self.reader = BufReader::new(File::open(&self.path).await?);
            self.position = 0;
            self.partial.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl LineSource for FileTail {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.partial).await?;
            self.position += read as u64;

            if read == 0 {
                sleep(EOF_POLL_INTERVAL).await;
                self.check_truncated().await?;
                continue;
            }

            if self.partial.ends_with(b"\n") {
                let line = decode_line(&self.partial);
                self.partial.clear();
                return Ok(Some(line));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_tail_skips_existing_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "old line").unwrap();
        file.flush().unwrap();

        let path = file.path().to_string_lossy().to_string();
        let mut tail = FileTail::open(&path).await.unwrap();

        writeln!(file, "G1 X1 Y1").unwrap();
        file.flush().unwrap();

        let line = tail.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("G1 X1 Y1"));
    }

    #[tokio::test]
    async fn test_tail_holds_back_partial_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        let mut tail = FileTail::open(&path).await.unwrap();

        write!(file, "G1 X5").unwrap();
        file.flush().unwrap();

        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            writeln!(file, " Y6").unwrap();
            file.flush().unwrap();
            file
        });

        let line = tail.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("G1 X5 Y6"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_tail_survives_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        let mut tail = FileTail::open(&path).await.unwrap();

        file.write_all(b"Recv: \xc3(\n").unwrap();
        writeln!(file, "G1 X2 Y3").unwrap();
        file.flush().unwrap();

        let line = tail.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("Recv: \u{FFFD}("));
        let line = tail.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("G1 X2 Y3"));
    }

    #[tokio::test]
    async fn test_local_execute_streams_stdout() {
        let remote = LocalRemote::new();
        let mut source = remote.execute("printf 'a\\nb\\n'").await.unwrap();

        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(source.next_line().await.unwrap(), None);
    }
}
