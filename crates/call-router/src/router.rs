use std::collections::HashMap;

use tracing::{debug, info};

use crate::schema::{RoutingRule, RuleAction};

/// What the relay should do with an inbound method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    PassThrough,
    Block,
    Rename(String),
}

/// Immutable method routing table.
///
/// Built once at startup; [`route`](Self::route) is a single hash lookup and
/// is never re-entered with its own output, so a rename chain `a -> b -> c`
/// only ever applies the first step.
#[derive(Default)]
pub struct CallRouter {
    table: HashMap<String, Route>,
}

impl std::fmt::Debug for CallRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRouter")
            .field("num_routes", &self.table.len())
            .finish()
    }
}

impl CallRouter {
    /// Build a router from validated rules. Later rules replace earlier ones
    /// for the same method, which is how command-line rules override a
    /// routing file.
    pub fn new(rules: impl IntoIterator<Item = RoutingRule>) -> Self {
        let mut table = HashMap::new();
        for rule in rules {
            let route = match rule.action {
                RuleAction::PassThrough => Route::PassThrough,
                RuleAction::Block => Route::Block,
                RuleAction::Rename => match rule.rename_to {
                    Some(target) => Route::Rename(target),
                    None => Route::PassThrough,
                },
            };
            if let Some(previous) = table.insert(rule.method.clone(), route) {
                info!(method = %rule.method, ?previous, "route overridden");
            }
        }
        Self { table }
    }

    pub fn route(&self, method: &str) -> Route {
        let route = self
            .table
            .get(method)
            .cloned()
            .unwrap_or(Route::PassThrough);
        debug!(method, ?route, "routed method");
        route
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
