use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, transport-representable RPC value.
pub type Value = serde_json::Value;

/// Fault code used for every fault the relay produces itself (blocked
/// methods, transport failures, timeouts, malformed input).
pub const RELAY_FAULT_CODE: i64 = 1;

/// Method name of a batched call.
pub const MULTICALL_METHOD: &str = "system.multicall";

/// A method name plus positional arguments.
///
/// Calls are never mutated once handed to the dispatcher; hooks and the
/// router produce new `Call` values instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// The same arguments under a different method name.
    pub fn renamed(&self, method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: self.args.clone(),
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A structured error returned as an ordinary value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub fault_code: i64,
    pub fault_message: String,
}

impl Fault {
    pub fn new(fault_code: i64, fault_message: impl Into<String>) -> Self {
        Self {
            fault_code,
            fault_message: fault_message.into(),
        }
    }

    /// A fault raised by the relay itself.
    pub fn relay(fault_message: impl Into<String>) -> Self {
        Self::new(RELAY_FAULT_CODE, fault_message)
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "fault_code": self.fault_code,
            "fault_message": self.fault_message,
        })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Fault {}: {}>", self.fault_code, self.fault_message)
    }
}

/// The outcome of one call: a value or a fault, never a thrown error.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Value(Value),
    Fault(Fault),
}

impl CallResult {
    pub fn relay_fault(message: impl Into<String>) -> Self {
        CallResult::Fault(Fault::relay(message))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, CallResult::Fault(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            CallResult::Value(v) => Some(v),
            CallResult::Fault(_) => None,
        }
    }

    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            CallResult::Value(_) => None,
            CallResult::Fault(f) => Some(f),
        }
    }

    /// Encode as one slot of a batched result: `[value]` on success, the
    /// fault object otherwise.
    pub fn into_batch_entry(self) -> Value {
        match self {
            CallResult::Value(v) => Value::Array(vec![v]),
            CallResult::Fault(f) => f.to_value(),
        }
    }
}

impl fmt::Display for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallResult::Value(v) => write!(f, "{v}"),
            CallResult::Fault(fault) => write!(f, "{fault}"),
        }
    }
}

impl From<Fault> for CallResult {
    fn from(fault: Fault) -> Self {
        CallResult::Fault(fault)
    }
}
