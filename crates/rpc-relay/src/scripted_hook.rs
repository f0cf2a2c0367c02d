//! Declarative hooks loaded from YAML.
//!
//! A hook file names an ordered list of pre-call rules and post-call rules.
//! Each rule matches the method name and describes one rewrite. The first
//! matching rule of a stage wins.
//!
//! ```yaml
//! version: "1.0"
//! name: kcat-tweaks
//! pre:
//!   - method: "rig.set_mode"
//!     rename_to: "main.set_rig_mode"
//!   - method: "rig\\.debug_.*"
//!     is_regex: true
//!     fail: "debug calls are not allowed"
//! post:
//!   - method: "rig.get_mode|rig.get_modes"
//!     result: "CW"
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use tracing::trace;

use crate::call::{Call, CallResult, Fault, Value};
use crate::hook::{CallHook, HookError};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct HookScript {
    /// Schema version; currently must be "1.0".
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub pre: Vec<PreRule>,
    #[serde(default)]
    pub post: Vec<PostRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreRule {
    /// `|`-separated glob alternatives, or a regex when `is_regex` is set.
    pub method: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub rename_to: Option<String>,
    /// Replacement argument list.
    #[serde(default)]
    pub args: Option<Vec<Value>>,
    /// Make the hook fail with this message.
    #[serde(default)]
    pub fail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostRule {
    pub method: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub fault: Option<Fault>,
    #[serde(default)]
    pub fail: Option<String>,
}

// ---------------------------------------------------------------------------
// Method matching
// ---------------------------------------------------------------------------

/// A pre-compiled method-name pattern.
#[derive(Debug)]
enum MethodPattern {
    Glob(GlobSet),
    Regex(Regex),
}

impl MethodPattern {
    fn compile(pattern: &str, is_regex: bool) -> Result<Self> {
        if is_regex {
            let regex = Regex::new(pattern)
                .with_context(|| format!("invalid method regex: {pattern}"))?;
            return Ok(MethodPattern::Regex(regex));
        }

        let mut builder = GlobSetBuilder::new();
        for alt in pattern.split('|').map(str::trim).filter(|a| !a.is_empty()) {
            builder.add(
                Glob::new(alt).with_context(|| format!("invalid method glob: {alt}"))?,
            );
        }
        let set = builder
            .build()
            .with_context(|| format!("failed to compile method pattern: {pattern}"))?;
        Ok(MethodPattern::Glob(set))
    }

    fn is_match(&self, method: &str) -> bool {
        match self {
            MethodPattern::Glob(set) => set.is_match(method),
            MethodPattern::Regex(regex) => regex.is_match(method),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedHook
// ---------------------------------------------------------------------------

/// A [`CallHook`] driven by a [`HookScript`].
pub struct ScriptedHook {
    name: String,
    pre: Vec<(MethodPattern, PreRule)>,
    post: Vec<(MethodPattern, PostRule)>,
}

impl std::fmt::Debug for ScriptedHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedHook")
            .field("name", &self.name)
            .field("num_pre_rules", &self.pre.len())
            .field("num_post_rules", &self.post.len())
            .finish()
    }
}

impl ScriptedHook {
    /// Validate a script and compile its method patterns.
    pub fn new(script: HookScript) -> Result<Self> {
        validate(&script)?;

        let pre = script
            .pre
            .into_iter()
            .map(|rule| Ok((MethodPattern::compile(&rule.method, rule.is_regex)?, rule)))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("failed to compile pre rules of hook '{}'", script.name))?;
        let post = script
            .post
            .into_iter()
            .map(|rule| Ok((MethodPattern::compile(&rule.method, rule.is_regex)?, rule)))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("failed to compile post rules of hook '{}'", script.name))?;

        Ok(Self {
            name: script.name,
            pre,
            post,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let script: HookScript =
            serde_yml::from_str(yaml).context("YAML deserialization failed")?;
        Self::new(script)
    }

    /// Load a hook file from disk. Any failure here is a startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read hook file: {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("failed to load hook file: {}", path.display()))
    }
}

impl CallHook for ScriptedHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_call(&self, call: &Call) -> Result<Option<Call>, HookError> {
        let Some((_, rule)) = self.pre.iter().find(|(p, _)| p.is_match(&call.method)) else {
            return Ok(None);
        };
        trace!(hook = %self.name, method = %call.method, "pre rule matched");

        if let Some(message) = &rule.fail {
            return Err(HookError::Failed(message.clone()));
        }
        Ok(Some(Call::new(
            rule.rename_to.clone().unwrap_or_else(|| call.method.clone()),
            rule.args.clone().unwrap_or_else(|| call.args.clone()),
        )))
    }

    fn post_call(&self, call: &Call, _result: &CallResult) -> Result<Option<CallResult>, HookError> {
        let Some((_, rule)) = self.post.iter().find(|(p, _)| p.is_match(&call.method)) else {
            return Ok(None);
        };
        trace!(hook = %self.name, method = %call.method, "post rule matched");

        if let Some(message) = &rule.fail {
            return Err(HookError::Failed(message.clone()));
        }
        if let Some(fault) = &rule.fault {
            return Ok(Some(CallResult::Fault(fault.clone())));
        }
        Ok(rule.result.clone().map(CallResult::Value))
    }
}

fn validate(script: &HookScript) -> Result<()> {
    if script.version != "1.0" {
        bail!(
            "unsupported hook version '{}'; only '1.0' is supported",
            script.version
        );
    }
    if script.name.trim().is_empty() {
        bail!("hook name must not be empty");
    }

    for rule in &script.pre {
        if rule.method.trim().is_empty() {
            bail!("pre rule method pattern must not be empty");
        }
        if rule.rename_to.is_none() && rule.args.is_none() && rule.fail.is_none() {
            bail!("pre rule for '{}' has no effect", rule.method);
        }
        if rule.rename_to.as_deref().is_some_and(|m| m.trim().is_empty()) {
            bail!("pre rule for '{}' has an empty rename_to", rule.method);
        }
    }

    for rule in &script.post {
        if rule.method.trim().is_empty() {
            bail!("post rule method pattern must not be empty");
        }
        if rule.result.is_none() && rule.fault.is_none() && rule.fail.is_none() {
            bail!("post rule for '{}' has no effect", rule.method);
        }
        if rule.result.is_some() && rule.fault.is_some() {
            bail!("post rule for '{}' sets both result and fault", rule.method);
        }
    }

    Ok(())
}
