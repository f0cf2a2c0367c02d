use serde::{Deserialize, Serialize};

use crate::call::{Call, CallResult, Fault, Value};

/// JSON envelope carried in WebSocket text frames, both between callers and
/// the relay and between the relay and an RPC downstream target.
///
/// Every response echoes the `id` of its request, so a connection may have
/// several requests outstanding and receive their answers in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RpcMessage {
    #[serde(rename = "req")]
    Request {
        id: String,
        method: String,
        #[serde(default)]
        params: Vec<Value>,
    },

    /// Exactly one of `result` / `fault` is meaningful; a response carrying
    /// neither stands for the value `null`.
    #[serde(rename = "res")]
    Response {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault: Option<Fault>,
    },
}

impl RpcMessage {
    pub fn request(id: impl Into<String>, call: &Call) -> Self {
        RpcMessage::Request {
            id: id.into(),
            method: call.method.clone(),
            params: call.args.clone(),
        }
    }

    pub fn response(id: impl Into<String>, result: CallResult) -> Self {
        let id = id.into();
        match result {
            CallResult::Value(value) => RpcMessage::Response {
                id,
                result: Some(value),
                fault: None,
            },
            CallResult::Fault(fault) => RpcMessage::Response {
                id,
                result: None,
                fault: Some(fault),
            },
        }
    }
}

/// Convert the payload of a `res` message into a [`CallResult`].
pub fn response_result(result: Option<Value>, fault: Option<Fault>) -> CallResult {
    match fault {
        Some(fault) => CallResult::Fault(fault),
        None => CallResult::Value(result.unwrap_or(Value::Null)),
    }
}

/// One sub-call of a `system.multicall` batch.
///
/// Accepts both the XML-RPC spelling (`methodName` / `params`) and the plain
/// one (`method` / `args`).
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEntry {
    #[serde(rename = "methodName", alias = "method")]
    pub method: String,
    #[serde(default, alias = "args")]
    pub params: Vec<Value>,
}

impl From<BatchEntry> for Call {
    fn from(entry: BatchEntry) -> Self {
        Call::new(entry.method, entry.params)
    }
}
