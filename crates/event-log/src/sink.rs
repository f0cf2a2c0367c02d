use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::{EventEntry, EventLabel, FileFormat};
use crate::writer::{EventWriteError, EventWriter};

/// Flush the file writer after this many seconds without new entries.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// History kept by [`EventLog::in_memory`].
const IN_MEMORY_CAPACITY: usize = 10_000;

/// Settings for [`EventLog::start`].
#[derive(Debug, Clone, Default)]
pub struct EventLogConfig {
    /// Mirror entries to stdout.
    pub echo: bool,
    /// When echoing, only print `SHELL` entries.
    pub quiet: bool,
    /// Number of recent entries kept in memory; `0` keeps none.
    pub history_capacity: usize,
    /// Optional append-only durable sink.
    pub file: Option<PathBuf>,
    pub file_format: FileFormat,
}

/// Cheap, cloneable handle for recording relay events.
///
/// Recording never blocks on I/O and never fails: the stdout mirror and the
/// durable sink are both fed through a channel drained by a background task.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Inner>,
}

struct Inner {
    started: Instant,
    history_capacity: usize,
    /// Guards emission so every sink observes the same order.
    sinks: Mutex<Sinks>,
}

struct Sinks {
    history: VecDeque<EventEntry>,
    output_tx: Option<mpsc::UnboundedSender<EventEntry>>,
}

/// Live mirror of the log on a terminal-like writer.
struct Echo<W> {
    out: W,
    quiet: bool,
}

impl<W: AsyncWrite + Unpin> Echo<W> {
    async fn write(&mut self, entry: &EventEntry) {
        if self.quiet && entry.label != EventLabel::Shell {
            return;
        }
        let line = format!("{}\n", entry.render());
        // A closed or broken stdout must not stop the file sink.
        let _ = self.out.write_all(line.as_bytes()).await;
        let _ = self.out.flush().await;
    }
}

impl EventLog {
    /// Build the log and, when stdout echo or a file is configured, spawn
    /// the writer task that feeds them.
    ///
    /// The returned join handle completes after [`EventLog::close`] is called
    /// (or the last clone is dropped) and the final flush has run.
    pub async fn start(
        config: EventLogConfig,
    ) -> Result<(Self, Option<JoinHandle<()>>), EventWriteError> {
        Self::start_with_echo(config, tokio::io::stdout()).await
    }

    async fn start_with_echo<W>(
        config: EventLogConfig,
        out: W,
    ) -> Result<(Self, Option<JoinHandle<()>>), EventWriteError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let file = match &config.file {
            Some(path) => Some(EventWriter::new(path, config.file_format).await?),
            None => None,
        };
        let echo = config.echo.then_some(Echo {
            out,
            quiet: config.quiet,
        });

        let (output_tx, handle) = if echo.is_some() || file.is_some() {
            let (tx, rx) = mpsc::unbounded_channel::<EventEntry>();
            let handle = tokio::spawn(run_writer_loop(echo, file, rx));
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        let log = Self {
            inner: Arc::new(Inner {
                started: Instant::now(),
                history_capacity: config.history_capacity,
                sinks: Mutex::new(Sinks {
                    history: VecDeque::new(),
                    output_tx,
                }),
            }),
        };
        Ok((log, handle))
    }

    /// A log that only keeps history. Nothing is printed or written.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                started: Instant::now(),
                history_capacity: IN_MEMORY_CAPACITY,
                sinks: Mutex::new(Sinks {
                    history: VecDeque::new(),
                    output_tx: None,
                }),
            }),
        }
    }

    pub fn record(&self, label: EventLabel, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(label = %label, %message, "relay event");

        let mut sinks = self.lock_sinks();

        let elapsed_ms = self.inner.started.elapsed().as_millis() as u64;
        let entry = EventEntry::new(elapsed_ms, label, message);

        if let Some(tx) = &sinks.output_tx {
            if tx.send(entry.clone()).is_err() {
                tracing::warn!(%label, "event log writer has stopped; entry not written");
            }
        }

        if self.inner.history_capacity > 0 {
            if sinks.history.len() == self.inner.history_capacity {
                sinks.history.pop_front();
            }
            sinks.history.push_back(entry);
        }
    }

    /// All retained entries, oldest first.
    pub fn history(&self) -> Vec<EventEntry> {
        self.recent(usize::MAX)
    }

    /// The last `n` retained entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<EventEntry> {
        let sinks = self.lock_sinks();
        let skip = sinks.history.len().saturating_sub(n);
        sinks.history.iter().skip(skip).cloned().collect()
    }

    pub fn keeps_history(&self) -> bool {
        self.inner.history_capacity > 0
    }

    /// Stop feeding stdout and the durable sink so the writer task flushes
    /// and exits, even while other clones are still alive. Later entries
    /// only reach history.
    pub fn close(&self) {
        self.lock_sinks().output_tx = None;
    }

    fn lock_sinks(&self) -> std::sync::MutexGuard<'_, Sinks> {
        self.inner
            .sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drain entries to stdout and the file, flushing the file when the channel
/// goes idle and once more when it closes.
async fn run_writer_loop<W>(
    mut echo: Option<Echo<W>>,
    mut file: Option<EventWriter>,
    mut rx: mpsc::UnboundedReceiver<EventEntry>,
) where
    W: AsyncWrite + Unpin,
{
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        let maybe_entry = tokio::time::timeout(flush_interval, rx.recv()).await;

        match maybe_entry {
            Ok(Some(entry)) => {
                if let Some(echo) = echo.as_mut() {
                    echo.write(&entry).await;
                }
                if let Some(writer) = file.as_mut() {
                    if let Err(err) = writer.write(&entry).await {
                        tracing::error!(%err, "failed to write event log entry");
                    } else {
                        dirty = true;
                    }
                }
            }
            Ok(None) => {
                if let Some(writer) = file.as_mut().filter(|_| dirty) {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush event log on shutdown");
                    }
                }
                tracing::debug!("event log writer shutting down");
                return;
            }
            Err(_) => {
                if let Some(writer) = file.as_mut().filter(|_| dirty) {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "periodic event log flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }
}
