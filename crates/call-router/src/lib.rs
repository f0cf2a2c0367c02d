//! # call-router
//!
//! Method routing for the RPC relay. Each inbound method name maps to one of
//! pass-through, block, or rename. Rules come from a YAML routing file and
//! from `method=action` command-line rules, and are compiled into an
//! immutable lookup table at startup.
//!
//! ## Quick start
//!
//! ```rust
//! use call_router::{loader, CallRouter, Route};
//!
//! let rules = loader::parse_rules(&["rig.take_control=BLOCK"]).unwrap();
//! let router = CallRouter::new(rules);
//! assert_eq!(router.route("rig.take_control"), Route::Block);
//! ```

pub mod loader;
mod router;
mod schema;

pub use router::{CallRouter, Route};
pub use schema::{RoutingConfig, RoutingRule, RuleAction};
