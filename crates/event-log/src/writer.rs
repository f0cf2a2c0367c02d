use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::entry::{EventEntry, FileFormat};

/// Errors that can occur during event log file I/O.
#[derive(Debug, thiserror::Error)]
pub enum EventWriteError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open event log file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize event entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to event log: {0}")]
    Write(std::io::Error),

    #[error("failed to flush event log: {0}")]
    Flush(std::io::Error),
}

/// Append-only file writer for [`EventEntry`] values.
///
/// Each call to [`write`](Self::write) appends exactly one newline-terminated
/// line, either the rendered console line or a JSON object.
pub struct EventWriter {
    file: tokio::fs::File,
    format: FileFormat,
}

impl EventWriter {
    /// Open (or create) the log file at `path` in append mode.
    ///
    /// Parent directories are created automatically if they do not exist.
    pub async fn new(path: impl AsRef<Path>, format: FileFormat) -> Result<Self, EventWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(EventWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(EventWriteError::OpenFile)?;

        Ok(Self { file, format })
    }

    pub async fn write(&mut self, entry: &EventEntry) -> Result<(), EventWriteError> {
        let mut line = match self.format {
            FileFormat::Text => entry.render().into_bytes(),
            FileFormat::Jsonl => serde_json::to_vec(entry)?,
        };
        line.push(b'\n');

        self.file
            .write_all(&line)
            .await
            .map_err(EventWriteError::Write)?;

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), EventWriteError> {
        self.file.flush().await.map_err(EventWriteError::Flush)
    }
}
