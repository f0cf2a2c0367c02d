use std::sync::Arc;

use call_router::{CallRouter, Route};
use event_log::{EventLabel, EventLog};
use serde::Deserialize;

use crate::call::{Call, CallResult, Fault, Value, MULTICALL_METHOD};
use crate::dispatch::DispatchQueue;
use crate::hook::HookChain;
use crate::wire::BatchEntry;

/// Where hooks run for a `system.multicall` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchHookMode {
    /// Hooks see every expanded sub-call and its result.
    #[default]
    PerSubCall,
    /// Hooks see the batch call and the assembled batch result once.
    OuterCall,
}

/// Entry point for every inbound call.
///
/// Routing and hooks run in the caller's task, so unrelated inbound calls
/// proceed in parallel right up to the [`DispatchQueue`], which is the only
/// point where they are serialized.
pub struct ProxyFrontend {
    router: Arc<CallRouter>,
    hooks: Arc<HookChain>,
    queue: DispatchQueue,
    events: EventLog,
    batch_mode: BatchHookMode,
}

impl ProxyFrontend {
    pub fn new(
        router: Arc<CallRouter>,
        hooks: Arc<HookChain>,
        queue: DispatchQueue,
        events: EventLog,
        batch_mode: BatchHookMode,
    ) -> Self {
        Self {
            router,
            hooks,
            queue,
            events,
            batch_mode,
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Handle one inbound call: route, pre-hooks, dispatch, post-hooks.
    pub async fn handle(&self, call: Call) -> CallResult {
        if call.method == MULTICALL_METHOD {
            return self.handle_batch(call).await;
        }
        self.handle_single(call, true).await
    }

    async fn handle_single(&self, call: Call, run_hooks: bool) -> CallResult {
        self.events.record(EventLabel::Call, call.to_string());

        let call = match self.apply_route(call) {
            Ok(call) => call,
            Err(fault) => return CallResult::Fault(fault),
        };

        let call = if run_hooks {
            self.hooks.apply_pre(call).await
        } else {
            call
        };

        let result = self.queue.submit(call.clone()).await;

        let result = if run_hooks {
            self.hooks.apply_post(&call, result).await
        } else {
            result
        };

        self.events
            .record(EventLabel::Result, format!("{} -> {}", call.method, result));
        result
    }

    /// Apply the routing table once. A blocked call never reaches hooks or
    /// the queue.
    fn apply_route(&self, call: Call) -> Result<Call, Fault> {
        match self.router.route(&call.method) {
            Route::PassThrough => Ok(call),
            Route::Block => {
                self.events
                    .record(EventLabel::Blocked, format!("{} call blocked", call.method));
                Err(Fault::relay(format!("{} is blocked by proxy", call.method)))
            }
            Route::Rename(target) => {
                self.events
                    .record(EventLabel::Remapped, format!("{} -> {}", call.method, target));
                Ok(call.renamed(target))
            }
        }
    }

    /// Expand a batch into sub-calls handled like top-level calls. Each slot
    /// of the result corresponds to the sub-call at the same position, and a
    /// failing sub-call never affects its siblings.
    async fn handle_batch(&self, call: Call) -> CallResult {
        self.events.record(EventLabel::Call, call.to_string());

        let call = match self.apply_route(call) {
            Ok(call) => call,
            Err(fault) => return CallResult::Fault(fault),
        };

        let outer_hooks = self.batch_mode == BatchHookMode::OuterCall;
        let call = if outer_hooks {
            self.hooks.apply_pre(call).await
        } else {
            call
        };

        let entries = match call.args.first() {
            Some(Value::Array(entries)) => entries.clone(),
            _ => {
                let fault = Fault::relay(format!(
                    "{MULTICALL_METHOD} expects a list of calls as its first argument"
                ));
                self.events.record(
                    EventLabel::Result,
                    format!("{} -> {}", call.method, fault),
                );
                return CallResult::Fault(fault);
            }
        };

        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = match serde_json::from_value::<BatchEntry>(entry) {
                Ok(entry) if entry.method == MULTICALL_METHOD => {
                    CallResult::relay_fault(format!("recursive {MULTICALL_METHOD} is not allowed"))
                }
                Ok(entry) => self.handle_single(entry.into(), !outer_hooks).await,
                Err(err) => CallResult::relay_fault(format!("malformed batch entry: {err}")),
            };
            slots.push(outcome.into_batch_entry());
        }

        let result = CallResult::Value(Value::Array(slots));
        let result = if outer_hooks {
            self.hooks.apply_post(&call, result).await
        } else {
            result
        };

        self.events
            .record(EventLabel::Result, format!("{} -> {}", call.method, result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchConfig, DispatcherHandle};
    use crate::hook::{CallHook, HookError, HookStage};
    use crate::sim_rig::SimulatedRig;
    use serde_json::json;

    fn frontend_with(
        rules: &[&str],
        stages: Vec<HookStage>,
        batch_mode: BatchHookMode,
    ) -> (ProxyFrontend, EventLog, DispatcherHandle) {
        let events = EventLog::in_memory();
        let router = CallRouter::new(call_router::loader::parse_rules(rules).unwrap());
        let hooks = HookChain::new(stages, None, events.clone());
        let (queue, handle) =
            DispatchQueue::start(SimulatedRig::new(), DispatchConfig::default(), events.clone());
        let frontend = ProxyFrontend::new(
            Arc::new(router),
            Arc::new(hooks),
            queue,
            events.clone(),
            batch_mode,
        );
        (frontend, events, handle)
    }

    fn lines(events: &EventLog) -> Vec<String> {
        events
            .history()
            .iter()
            .map(|e| format!("{} {}", e.label, e.message))
            .collect()
    }

    struct BandwidthHook;

    impl CallHook for BandwidthHook {
        fn name(&self) -> &str {
            "bandwidth"
        }

        fn pre_call(&self, call: &Call) -> Result<Option<Call>, HookError> {
            if call.method == "rig.get_mode" {
                return Ok(Some(call.renamed("rig.get_bandwidth")));
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn plain_call_logs_call_then_result() {
        let (frontend, events, handle) = frontend_with(&[], vec![], BatchHookMode::PerSubCall);

        let result = frontend
            .handle(Call::new("rig.set_frequency", vec![json!(14250000)]))
            .await;
        assert_eq!(result, CallResult::Value(json!(7000000)));
        assert_eq!(
            lines(&events),
            vec![
                "CALL rig.set_frequency(14250000)",
                "RESULT rig.set_frequency -> 7000000",
            ]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn blocked_call_faults_without_dispatch() {
        let (frontend, events, handle) =
            frontend_with(&["rig.take_control=BLOCK"], vec![], BatchHookMode::PerSubCall);

        let result = frontend.handle(Call::new("rig.take_control", vec![])).await;
        let fault = result.as_fault().unwrap();
        assert_eq!(fault.fault_code, 1);
        assert!(fault.fault_message.contains("rig.take_control"));
        assert_eq!(
            lines(&events),
            vec!["CALL rig.take_control()", "BLOCKED rig.take_control call blocked"]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn rename_is_logged_before_the_renamed_result() {
        let (frontend, events, handle) = frontend_with(
            &["rig.get_frequency=main.get_frequency"],
            vec![],
            BatchHookMode::PerSubCall,
        );

        let result = frontend.handle(Call::new("rig.get_frequency", vec![])).await;
        assert_eq!(result, CallResult::Value(json!(7000000)));
        assert_eq!(
            lines(&events),
            vec![
                "CALL rig.get_frequency()",
                "REMAPPED rig.get_frequency -> main.get_frequency",
                "RESULT main.get_frequency -> 7000000",
            ]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn batch_preserves_order_and_isolates_faults() {
        let (frontend, _events, handle) = frontend_with(&[], vec![], BatchHookMode::PerSubCall);

        let batch = Call::new(
            MULTICALL_METHOD,
            vec![json!([
                {"methodName": "rig.get_mode", "params": []},
                {"methodName": "rig.bad_method", "params": []},
                {"methodName": "rig.get_bandwidth", "params": []},
            ])],
        );
        let result = frontend.handle(batch).await;
        let slots = result.as_value().unwrap().as_array().unwrap().clone();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0], json!(["CW"]));
        assert_eq!(slots[1]["fault_code"], json!(1));
        assert!(slots[1]["fault_message"].as_str().unwrap().contains("rig.bad_method"));
        assert_eq!(slots[2], json!(["500"]));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn batch_sub_calls_are_routed_individually() {
        let (frontend, _events, handle) =
            frontend_with(&["rig.take_control=BLOCK"], vec![], BatchHookMode::PerSubCall);

        let batch = Call::new(
            MULTICALL_METHOD,
            vec![json!([
                {"methodName": "rig.take_control"},
                {"methodName": "rig.get_mode"},
                {"bogus": true},
                {"methodName": MULTICALL_METHOD, "params": [[]]},
            ])],
        );
        let slots = frontend.handle(batch).await.as_value().unwrap().clone();
        assert!(slots[0]["fault_message"].as_str().unwrap().contains("blocked"));
        assert_eq!(slots[1], json!(["CW"]));
        assert!(slots[2]["fault_message"].as_str().unwrap().contains("malformed"));
        assert!(slots[3]["fault_message"].as_str().unwrap().contains("recursive"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_batch_is_a_single_fault() {
        let (frontend, _events, handle) = frontend_with(&[], vec![], BatchHookMode::PerSubCall);
        let result = frontend
            .handle(Call::new(MULTICALL_METHOD, vec![json!("nope")]))
            .await;
        assert!(result.is_fault());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn hooks_run_per_sub_call_by_default() {
        let stage = HookStage {
            hook: Arc::new(BandwidthHook),
            pre: true,
            post: false,
        };
        let (frontend, _events, handle) =
            frontend_with(&[], vec![stage], BatchHookMode::PerSubCall);

        let batch = Call::new(MULTICALL_METHOD, vec![json!([{"methodName": "rig.get_mode"}])]);
        let slots = frontend.handle(batch).await.as_value().unwrap().clone();
        // The hook rewrote the sub-call to fetch the bandwidth instead.
        assert_eq!(slots, json!([["500"]]));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn outer_call_mode_skips_sub_call_hooks() {
        let stage = HookStage {
            hook: Arc::new(BandwidthHook),
            pre: true,
            post: false,
        };
        let (frontend, _events, handle) =
            frontend_with(&[], vec![stage], BatchHookMode::OuterCall);

        let batch = Call::new(MULTICALL_METHOD, vec![json!([{"methodName": "rig.get_mode"}])]);
        let slots = frontend.handle(batch).await.as_value().unwrap().clone();
        assert_eq!(slots, json!([["CW"]]));
        handle.shutdown().await;
    }
}
