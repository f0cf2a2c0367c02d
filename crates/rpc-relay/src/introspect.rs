use serde_json::json;

use crate::call::{Call, CallResult, Value};
use crate::dispatch::DispatchQueue;

/// One downstream method as reported by the target's introspection calls.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub signature: Option<Value>,
    pub help: Option<String>,
}

impl MethodInfo {
    pub fn render(&self) -> String {
        let mut line = self.name.clone();
        if let Some(signature) = &self.signature {
            line.push_str(&format!("  {signature}"));
        }
        if let Some(help) = self.help.as_deref().filter(|h| !h.is_empty()) {
            line.push_str(&format!("  {help}"));
        }
        line
    }
}

/// Ask the downstream target which methods it supports.
///
/// With `verbose`, each method's signature and help text are requested as
/// well; a failure for one method leaves those fields empty.
pub async fn list_methods(queue: &DispatchQueue, verbose: bool) -> anyhow::Result<Vec<MethodInfo>> {
    let names = match queue.submit(Call::new("system.listMethods", vec![])).await {
        CallResult::Value(Value::Array(names)) => names,
        CallResult::Value(other) => anyhow::bail!("system.listMethods returned {other}"),
        CallResult::Fault(fault) => anyhow::bail!("system.listMethods failed: {fault}"),
    };

    let mut methods = Vec::with_capacity(names.len());
    for name in names {
        let name = match name {
            Value::String(name) => name,
            other => other.to_string(),
        };

        let (signature, help) = if verbose {
            let signature = queue
                .submit(Call::new("system.methodSignature", vec![json!(name)]))
                .await;
            let help = queue
                .submit(Call::new("system.methodHelp", vec![json!(name)]))
                .await;
            (
                signature.as_value().cloned(),
                help.as_value().and_then(Value::as_str).map(str::to_string),
            )
        } else {
            (None, None)
        };

        methods.push(MethodInfo {
            name,
            signature,
            help,
        });
    }
    Ok(methods)
}
