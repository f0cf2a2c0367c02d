use serde::{Deserialize, Serialize};

/// Top-level routing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Schema version; currently must be "1.0".
    pub version: String,
    #[serde(default)]
    pub routes: Vec<RoutingRule>,
}

/// One entry of the routing table, keyed by the inbound method name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub method: String,
    pub action: RuleAction,
    /// Target method name; required when `action` is `rename`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Forward under the original name.
    PassThrough,
    /// Answer with a fault without contacting the downstream target.
    Block,
    /// Forward under `rename_to`.
    Rename,
}
