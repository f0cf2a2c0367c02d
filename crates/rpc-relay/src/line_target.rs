//! Downstream target speaking the line-oriented bridge protocol.
//!
//! A zero-argument call `m` is sent as `<CMD>m</CMD>`, a one-argument call as
//! `<SET>m=value</SET>`, and the peer answers with `<RESPONSE>text</RESPONSE>`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::call::{Call, CallResult, Value};
use crate::downstream::{Downstream, DownstreamError};

const RESPONSE_OPEN: &str = "<RESPONSE>";
const RESPONSE_CLOSE: &str = "</RESPONSE>";
const UNKNOWN_COMMAND: &str = "Unknown command";

/// Bridge-protocol client holding one TCP connection, reopened after errors.
pub struct LineTarget {
    addr: String,
    stream: Option<TcpStream>,
}

impl LineTarget {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            stream: None,
        }
    }

    async fn exchange(&mut self, request: &str) -> Result<String, DownstreamError> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|source| DownstreamError::Connect {
                    target: self.addr.clone(),
                    source,
                })?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(DownstreamError::Closed(self.addr.clone()));
        };

        stream.write_all(request.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;

        // Read until the closing tag; the peer does not frame replies otherwise.
        let mut reply = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(DownstreamError::Closed(self.addr.clone()));
            }
            reply.extend_from_slice(&buf[..n]);
            if String::from_utf8_lossy(&reply).contains(RESPONSE_CLOSE) {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

impl Downstream for LineTarget {
    async fn call(&mut self, call: &Call) -> Result<CallResult, DownstreamError> {
        let request = match encode_request(call) {
            Ok(request) => request,
            Err(result) => return Ok(result),
        };

        let reply = match self.exchange(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                self.reset();
                return Err(err);
            }
        };
        decode_response(&reply)
    }

    fn reset(&mut self) {
        self.stream = None;
    }

    fn describe(&self) -> String {
        format!("line://{}", self.addr)
    }
}

/// Encode a call as a bridge command, or explain why it cannot be sent.
fn encode_request(call: &Call) -> Result<String, CallResult> {
    match call.args.as_slice() {
        [] => Ok(format!("<CMD>{}</CMD>", call.method)),
        [value] => {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(format!("<SET>{}={}</SET>", call.method, text))
        }
        _ => Err(CallResult::relay_fault(format!(
            "{} takes at most one argument over the line protocol",
            call.method
        ))),
    }
}

fn decode_response(reply: &str) -> Result<CallResult, DownstreamError> {
    let reply = reply.trim();
    let body = reply
        .strip_prefix(RESPONSE_OPEN)
        .and_then(|rest| rest.strip_suffix(RESPONSE_CLOSE))
        .ok_or_else(|| DownstreamError::Protocol(format!("unexpected reply: {reply}")))?;

    if body == UNKNOWN_COMMAND {
        return Ok(CallResult::relay_fault(UNKNOWN_COMMAND));
    }
    if body == "None" {
        return Ok(CallResult::Value(Value::Null));
    }
    let value = serde_json::from_str::<serde_json::Number>(body)
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(body.to_string()));
    Ok(CallResult::Value(value))
}
