//! In-process rig emulator used when no real downstream server is available.
//!
//! Keeps the last frequency, mode, bandwidth and TX/RX state and answers the
//! subset of the rig-control method set that logging programs poll.

use serde_json::json;

use crate::call::{Call, CallResult, Fault, Value, RELAY_FAULT_CODE};
use crate::downstream::{Downstream, DownstreamError};

const METHODS: &[(&str, &str, &str)] = &[
    ("rig.set_frequency", "d:d", "Set frequency in Hz; returns the previous frequency"),
    ("rig.get_frequency", "d:n", "Current frequency in Hz"),
    ("main.get_frequency", "d:n", "Current frequency in Hz"),
    ("rig.set_mode", "n:s", "Set operating mode"),
    ("rig.get_mode", "s:n", "Current operating mode"),
    ("rig.set_bandwidth", "n:s", "Set filter bandwidth"),
    ("rig.get_bandwidth", "s:n", "Current filter bandwidth"),
    ("main.get_trx_state", "s:n", "RX or TX"),
    ("rig.take_control", "n:n", "Claim rig control"),
    ("rig.release_control", "n:n", "Release rig control"),
    ("rig.set_name", "n:s", "Set the rig name"),
    ("system.listMethods", "A:n", "List available methods"),
    ("system.methodHelp", "s:s", "Help text for a method"),
    ("system.methodSignature", "A:s", "Signature of a method"),
];

pub struct SimulatedRig {
    frequency: Value,
    mode: Value,
    bandwidth: Value,
    trx: Value,
    name: Value,
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self {
            frequency: json!(7000000),
            mode: json!("CW"),
            bandwidth: json!("500"),
            trx: json!("RX"),
            name: Value::Null,
        }
    }
}

impl SimulatedRig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer one call against the emulated state.
    pub fn handle(&mut self, call: &Call) -> CallResult {
        let first = call.args.first().cloned();
        let value = match (call.method.as_str(), first) {
            ("rig.set_frequency", Some(freq)) => std::mem::replace(&mut self.frequency, freq),
            ("rig.get_frequency" | "main.get_frequency", _) => self.frequency.clone(),
            ("rig.set_mode", Some(mode)) => {
                self.mode = mode;
                Value::Null
            }
            ("rig.get_mode", _) => self.mode.clone(),
            ("rig.set_bandwidth", Some(bw)) => {
                self.bandwidth = bw;
                Value::Null
            }
            ("rig.get_bandwidth", _) => self.bandwidth.clone(),
            ("main.get_trx_state", _) => self.trx.clone(),
            ("rig.take_control" | "rig.release_control", _) => Value::Null,
            ("rig.set_name", Some(name)) => {
                self.name = name;
                Value::Null
            }
            ("system.listMethods", _) => {
                Value::Array(METHODS.iter().map(|(name, _, _)| json!(name)).collect())
            }
            ("system.methodHelp", Some(Value::String(name))) => match lookup(&name) {
                Some((_, _, help)) => json!(help),
                None => return unknown(&name),
            },
            ("system.methodSignature", Some(Value::String(name))) => match lookup(&name) {
                Some((_, signature, _)) => {
                    let types: Vec<&str> = signature.split(':').collect();
                    json!([types])
                }
                None => return unknown(&name),
            },
            (method, None) if lookup(method).is_some() => {
                return CallResult::Fault(Fault::new(
                    RELAY_FAULT_CODE,
                    format!("{method} requires an argument"),
                ))
            }
            (method, _) => return unknown(method),
        };
        CallResult::Value(value)
    }
}

impl Downstream for SimulatedRig {
    async fn call(&mut self, call: &Call) -> Result<CallResult, DownstreamError> {
        Ok(self.handle(call))
    }

    fn describe(&self) -> String {
        "simulated rig".to_string()
    }
}

fn lookup(method: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    METHODS.iter().find(|(name, _, _)| *name == method)
}

fn unknown(method: &str) -> CallResult {
    CallResult::Fault(Fault::new(
        RELAY_FAULT_CODE,
        format!("method \"{method}\" is not supported"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(method: &str, args: Vec<Value>) -> Call {
        Call::new(method, args)
    }

    #[test]
    fn set_frequency_returns_previous_value() {
        let mut rig = SimulatedRig::new();
        let prev = rig.handle(&call("rig.set_frequency", vec![json!(14250000)]));
        assert_eq!(prev, CallResult::Value(json!(7000000)));
        let now = rig.handle(&call("rig.get_frequency", vec![]));
        assert_eq!(now, CallResult::Value(json!(14250000)));
    }

    #[test]
    fn mode_round_trips_through_state() {
        let mut rig = SimulatedRig::new();
        assert_eq!(rig.handle(&call("rig.get_mode", vec![])), CallResult::Value(json!("CW")));
        assert_eq!(
            rig.handle(&call("rig.set_mode", vec![json!("USB")])),
            CallResult::Value(Value::Null)
        );
        assert_eq!(rig.handle(&call("rig.get_mode", vec![])), CallResult::Value(json!("USB")));
    }

    #[test]
    fn unknown_methods_fault() {
        let mut rig = SimulatedRig::new();
        let result = rig.handle(&call("rig.bad_method", vec![]));
        let fault = result.as_fault().unwrap();
        assert_eq!(fault.fault_code, 1);
        assert!(fault.fault_message.contains("rig.bad_method"));
    }

    #[test]
    fn setters_require_an_argument() {
        let mut rig = SimulatedRig::new();
        assert!(rig.handle(&call("rig.set_mode", vec![])).is_fault());
    }

    #[test]
    fn introspection() {
        let mut rig = SimulatedRig::new();
        let list = rig.handle(&call("system.listMethods", vec![]));
        let names = list.as_value().unwrap().as_array().unwrap();
        assert!(names.contains(&json!("rig.get_mode")));

        let help = rig.handle(&call("system.methodHelp", vec![json!("rig.get_mode")]));
        assert_eq!(help, CallResult::Value(json!("Current operating mode")));

        let sig = rig.handle(&call("system.methodSignature", vec![json!("rig.set_mode")]));
        assert_eq!(sig, CallResult::Value(json!([["n", "s"]])));
    }
}
