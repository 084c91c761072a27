// Resilient line tailing over remote sessions
//
// A `RemoteTail` keeps one session open against the device and forwards every
// line into a channel. Any failure (connect, read, session exit) closes the
// session, waits out the backoff and reconnects. Every new session starts at
// the current end of the stream, so no backlog is replayed.

use crate::remote::{LineSource, RemoteAccess};
use crate::error::MonitorResult;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Doubling reconnect delay with an upper cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns twice as much, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// What a tail session reads from
#[derive(Debug, Clone)]
pub enum TailTarget {
    /// Append-only file, followed from its end
    File(String),
    /// Process whose stdout is followed
    Process(String),
}

pub struct RemoteTail {
    name: String,
    remote: Arc<dyn RemoteAccess>,
    target: TailTarget,
    backoff: Backoff,
}

impl RemoteTail {
    pub fn new(name: impl Into<String>, remote: Arc<dyn RemoteAccess>, target: TailTarget) -> Self {
        Self {
            name: name.into(),
            remote,
            target,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn open(&self) -> MonitorResult<Box<dyn LineSource>> {
        match &self.target {
            TailTarget::File(path) => self.remote.open_tail(path).await,
            TailTarget::Process(command) => self.remote.execute(command).await,
        }
    }

    /// Forward lines into `sender` until cancelled or the receiver goes away.
    pub async fn run(mut self, sender: mpsc::Sender<String>, cancel: CancellationToken) {
        info!("[{}] tailing {:?} on {}", self.name, self.target, self.remote.describe());

        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                opened = self.open() => opened,
            };

            match opened {
                Ok(mut source) => {
                    info!("[{}] session open", self.name);

                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                info!("[{}] cancelled", self.name);
                                return;
                            }
                            next = source.next_line() => next,
                        };

                        match next {
                            Ok(Some(line)) => {
                                self.backoff.reset();
                                let sent = tokio::select! {
                                    biased;
                                    _ = cancel.cancelled() => return,
                                    sent = sender.send(line) => sent,
                                };
                                if sent.is_err() {
                                    debug!("[{}] line receiver closed", self.name);
                                    return;
                                }
                            }
                            Ok(None) => {
                                warn!("[{}] session ended", self.name);
                                break;
                            }
                            Err(e) => {
                                warn!("[{}] read error: {}", self.name, e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("[{}] connect failed: {}", self.name, e),
            }

            let delay = self.backoff.next_delay();
            warn!("[{}] reconnecting in {}s", self.name, delay.as_secs());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!("[{}] stopped", self.name);
    }
}
