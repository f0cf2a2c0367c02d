//! Timestamped record of everything the relay does to a call.
//!
//! Each event carries the milliseconds elapsed since startup, a label
//! (`CALL`, `BLOCKED`, `REMAPPED`, `CALLBACK`, `RESULT`, `ERROR`, `SHELL`) and
//! a free-form message. Events are mirrored to stdout, optionally kept in a
//! bounded in-memory history, and optionally appended to a file by a
//! background writer task.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use event_log::{EventLabel, EventLog, EventLogConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (log, _writer) = EventLog::start(EventLogConfig {
//!     echo: true,
//!     file: Some("relay.log".into()),
//!     ..Default::default()
//! })
//! .await?;
//!
//! log.record(EventLabel::Call, "rig.get_mode()");
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{EventEntry, EventLabel, FileFormat};
pub use sink::{EventLog, EventLogConfig};
pub use writer::{EventWriteError, EventWriter};
