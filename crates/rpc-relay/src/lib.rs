//! Serializing RPC relay for rig-control servers.
//!
//! Callers connect over WebSocket and issue calls concurrently. Each call is
//! routed (pass, block, or rename), passed through optional hooks, and then
//! queued; a single dispatcher delivers queued calls to the downstream target
//! one at a time, in submission order.
//!
//! # Architecture
//!
//! ```text
//! Callers <--WS-->  RelayServer -> ProxyFrontend -> DispatchQueue -> Downstream
//!                                   |        |            ^
//!                              CallRouter  HookChain      |
//!                                                InteractiveConsole
//! ```
//!
//! Faults are values: a blocked method, a failing hook, a transport error,
//! or a timeout all come back to the caller as a [`Fault`] rather than a
//! dropped connection.

pub mod call;
pub mod console;
pub mod dispatch;
pub mod downstream;
pub mod frontend;
pub mod hook;
pub mod introspect;
pub mod line_target;
pub mod listener;
pub mod scripted_hook;
pub mod sim_rig;
pub mod wire;

pub use call::{Call, CallResult, Fault, Value, MULTICALL_METHOD, RELAY_FAULT_CODE};
pub use console::{ConsoleCommand, ConsoleError, InteractiveConsole};
pub use dispatch::{DispatchConfig, DispatchQueue, DispatcherHandle, ResultSlot};
pub use downstream::{Downstream, DownstreamError, RpcTarget, Target};
pub use frontend::{BatchHookMode, ProxyFrontend};
pub use hook::{CallHook, HookChain, HookError, HookStage};
pub use introspect::{list_methods, MethodInfo};
pub use line_target::LineTarget;
pub use listener::RelayServer;
pub use scripted_hook::ScriptedHook;
pub use sim_rig::SimulatedRig;
pub use wire::RpcMessage;
