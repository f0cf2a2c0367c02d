use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::schema::{RoutingConfig, RoutingRule, RuleAction};

/// Load a [`RoutingConfig`] from a YAML file on disk.
///
/// Validates the config after deserialization (version check, unique and
/// well-formed rules).
pub fn load_routes(path: impl AsRef<Path>) -> Result<RoutingConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read routing file: {}", path.display()))?;
    load_routes_from_str(&contents)
        .with_context(|| format!("failed to parse routing file: {}", path.display()))
}

/// Parse and validate a [`RoutingConfig`] from a YAML string.
pub fn load_routes_from_str(yaml: &str) -> Result<RoutingConfig> {
    let config: RoutingConfig =
        serde_yml::from_str(yaml).context("YAML deserialization failed")?;
    validate(&config)?;
    Ok(config)
}

/// Parse a command-line rule of the form `method=action`.
///
/// `BLOCK` blocks the method and `PASS` forwards it unchanged (both
/// case-insensitive); any other action is the name to forward the call under.
pub fn parse_rule(spec: &str) -> Result<RoutingRule> {
    let Some((method, action)) = spec.split_once('=') else {
        bail!("routing rule '{spec}' must have the form method=action");
    };
    let method = method.trim();
    let action = action.trim();
    if method.is_empty() {
        bail!("routing rule '{spec}' has an empty method name");
    }
    if action.is_empty() {
        bail!("routing rule '{spec}' has an empty action");
    }

    let rule = if action.eq_ignore_ascii_case("BLOCK") {
        RoutingRule {
            method: method.to_string(),
            action: RuleAction::Block,
            rename_to: None,
        }
    } else if action.eq_ignore_ascii_case("PASS") {
        RoutingRule {
            method: method.to_string(),
            action: RuleAction::PassThrough,
            rename_to: None,
        }
    } else {
        RoutingRule {
            method: method.to_string(),
            action: RuleAction::Rename,
            rename_to: Some(action.to_string()),
        }
    };
    Ok(rule)
}

/// Parse a list of command-line rules, rejecting duplicate methods.
pub fn parse_rules<S: AsRef<str>>(specs: &[S]) -> Result<Vec<RoutingRule>> {
    let rules = specs
        .iter()
        .map(|s| parse_rule(s.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    check_unique(&rules)?;
    Ok(rules)
}

/// Run post-deserialization validation checks.
fn validate(config: &RoutingConfig) -> Result<()> {
    if config.version != "1.0" {
        bail!(
            "unsupported routing version '{}'; only '1.0' is supported",
            config.version
        );
    }

    for rule in &config.routes {
        if rule.method.trim().is_empty() {
            bail!("route method must not be empty");
        }
        match (&rule.action, rule.rename_to.as_deref()) {
            (RuleAction::Rename, None) => {
                bail!("route '{}' is a rename but has no rename_to", rule.method)
            }
            (RuleAction::Rename, Some(target)) if target.trim().is_empty() => {
                bail!("route '{}' has an empty rename_to", rule.method)
            }
            (RuleAction::Block | RuleAction::PassThrough, Some(_)) => {
                bail!("route '{}' sets rename_to but is not a rename", rule.method)
            }
            _ => {}
        }
    }

    check_unique(&config.routes)
}

fn check_unique(rules: &[RoutingRule]) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.method.as_str()) {
            bail!("duplicate route for method: '{}'", rule.method);
        }
    }
    Ok(())
}
