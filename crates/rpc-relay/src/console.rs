//! Operator console reading line commands from any async reader.
//!
//! Calls issued here go straight to the [`DispatchQueue`], bypassing routing
//! and hooks, and share the same FIFO as inbound calls.

use event_log::{EventLabel, EventLog};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::call::{Call, CallResult, Value};
use crate::dispatch::DispatchQueue;

const DEFAULT_HISTORY: usize = 20;

const HELP: &str = "\
commands:
  call <method> [args]   call a downstream method; args is a JSON array or
                         whitespace separated values (quote strings that
                         contain spaces: \"My Rig\")
  log <text>             write a note to the event log
  history [n]            show the last n event log lines (default 20)
  help                   show this help
  quit | exit            stop the relay
";

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid arguments: {0}")]
    BadArgs(#[from] serde_json::Error),

    #[error("console i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Call(Call),
    Log(String),
    History(usize),
    Help,
    Quit,
    Empty,
}

/// Parse one console line.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => Ok(ConsoleCommand::Empty),
        "call" => {
            let (method, args) = match rest.split_once(char::is_whitespace) {
                Some((method, args)) => (method, args.trim()),
                None => (rest, ""),
            };
            if method.is_empty() {
                return Err(ConsoleError::Usage("call <method> [args]"));
            }
            Ok(ConsoleCommand::Call(Call::new(method, parse_args(args)?)))
        }
        "log" => {
            if rest.is_empty() {
                return Err(ConsoleError::Usage("log <text>"));
            }
            Ok(ConsoleCommand::Log(rest.to_string()))
        }
        "history" => {
            if rest.is_empty() {
                return Ok(ConsoleCommand::History(DEFAULT_HISTORY));
            }
            rest.parse()
                .map(ConsoleCommand::History)
                .map_err(|_| ConsoleError::Usage("history [n]"))
        }
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(ConsoleError::UnknownCommand(other.to_string())),
    }
}

fn parse_args(args: &str) -> Result<Vec<Value>, ConsoleError> {
    if args.is_empty() {
        return Ok(Vec::new());
    }
    if args.starts_with('[') {
        return Ok(serde_json::from_str(args)?);
    }
    Ok(split_args(args)
        .into_iter()
        .map(|token| {
            serde_json::from_str(token).unwrap_or_else(|_| Value::String(token.to_string()))
        })
        .collect())
}

/// Split on whitespace, keeping double-quoted JSON strings whole.
fn split_args(args: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in args.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(&args[s..i]);
            }
            continue;
        }
        start.get_or_insert(i);
        if c == '"' {
            in_string = true;
        }
    }
    if let Some(s) = start {
        tokens.push(&args[s..]);
    }
    tokens
}

pub struct InteractiveConsole {
    queue: DispatchQueue,
    events: EventLog,
}

impl InteractiveConsole {
    pub fn new(queue: DispatchQueue, events: EventLog) -> Self {
        Self { queue, events }
    }

    /// Submit a call directly to the dispatch queue.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> CallResult {
        let call = Call::new(method, args);
        self.events.record(EventLabel::Shell, format!("call {call}"));
        let result = self.queue.submit(call).await;
        self.events
            .record(EventLabel::Shell, format!("{method} -> {result}"));
        result
    }

    /// Run until `quit`, `exit` or end of input.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<(), ConsoleError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        writer.write_all(b"> ").await?;
        writer.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let output = match parse_line(&line) {
                Ok(ConsoleCommand::Quit) => break,
                Ok(ConsoleCommand::Empty) => String::new(),
                Ok(ConsoleCommand::Help) => HELP.to_string(),
                Ok(ConsoleCommand::Call(call)) => {
                    format!("{}\n", self.call(&call.method, call.args).await)
                }
                Ok(ConsoleCommand::Log(text)) => {
                    self.events.record(EventLabel::Shell, text);
                    String::new()
                }
                Ok(ConsoleCommand::History(n)) => self.history(n),
                Err(err) => format!("error: {err}\n"),
            };
            writer.write_all(output.as_bytes()).await?;
            writer.write_all(b"> ").await?;
            writer.flush().await?;
        }

        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn history(&self, n: usize) -> String {
        if !self.events.keeps_history() {
            return "history is disabled\n".to_string();
        }
        self.events
            .recent(n)
            .iter()
            .map(|entry| format!("{}\n", entry.render()))
            .collect()
    }
}
