use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use event_log::{EventLabel, EventLog};

use crate::call::{Call, CallResult};

/// Why a hook invocation was discarded.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("returned an empty method name")]
    EmptyMethod,

    #[error("did not return within {0:?}")]
    TimedOut(Duration),

    #[error("panicked: {0}")]
    Panicked(String),
}

/// Operator-supplied extension point around each dispatched call.
///
/// Both capabilities default to "unchanged", so a hook only implements the
/// side it cares about. Hooks run on the blocking thread pool and may do
/// synchronous work, but anything slower than the chain's timeout is
/// abandoned.
pub trait CallHook: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Return a replacement call, or `None` to leave it as is.
    fn pre_call(&self, call: &Call) -> Result<Option<Call>, HookError> {
        let _ = call;
        Ok(None)
    }

    /// Return a replacement result, or `None` to leave it as is.
    fn post_call(&self, call: &Call, result: &CallResult) -> Result<Option<CallResult>, HookError> {
        let _ = (call, result);
        Ok(None)
    }
}

/// One hook in the chain with the capabilities it was configured for.
#[derive(Clone)]
pub struct HookStage {
    pub hook: Arc<dyn CallHook>,
    pub pre: bool,
    pub post: bool,
}

/// Ordered pre-call and post-call hooks, fixed at startup.
///
/// Every invocation is isolated: an error, panic, timeout, or malformed
/// return is recorded as an `ERROR` event and the stage's input is passed on
/// unchanged.
pub struct HookChain {
    stages: Vec<HookStage>,
    timeout: Option<Duration>,
    events: EventLog,
}

impl HookChain {
    pub fn new(stages: Vec<HookStage>, timeout: Option<Duration>, events: EventLog) -> Self {
        Self {
            stages,
            timeout,
            events,
        }
    }

    pub fn empty(events: EventLog) -> Self {
        Self::new(Vec::new(), None, events)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub async fn apply_pre(&self, call: Call) -> Call {
        let mut current = call;

        for stage in self.stages.iter().filter(|s| s.pre) {
            let hook = Arc::clone(&stage.hook);
            let input = current.clone();
            let outcome = self
                .isolate(move || hook.pre_call(&input))
                .await
                .and_then(|rewritten| match rewritten {
                    Some(call) if call.method.trim().is_empty() => Err(HookError::EmptyMethod),
                    other => Ok(other),
                });

            match outcome {
                Ok(Some(rewritten)) => {
                    self.events.record(
                        EventLabel::Callback,
                        format!("on_request {} -> {}", stage.hook.name(), rewritten),
                    );
                    current = rewritten;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(hook = stage.hook.name(), %err, "pre-call hook failed");
                    self.events.record(
                        EventLabel::Error,
                        format!("pre-call hook '{}' failed: {}", stage.hook.name(), err),
                    );
                }
            }
        }

        current
    }

    pub async fn apply_post(&self, call: &Call, result: CallResult) -> CallResult {
        let mut current = result;

        for stage in self.stages.iter().filter(|s| s.post) {
            let hook = Arc::clone(&stage.hook);
            let call_in = call.clone();
            let result_in = current.clone();
            let outcome = self
                .isolate(move || hook.post_call(&call_in, &result_in))
                .await;

            match outcome {
                Ok(Some(rewritten)) => {
                    self.events.record(
                        EventLabel::Callback,
                        format!(
                            "on_response {} -> {} -> {}",
                            stage.hook.name(),
                            call.method,
                            rewritten
                        ),
                    );
                    current = rewritten;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(hook = stage.hook.name(), %err, "post-call hook failed");
                    self.events.record(
                        EventLabel::Error,
                        format!("post-call hook '{}' failed: {}", stage.hook.name(), err),
                    );
                }
            }
        }

        current
    }

    /// Run `f` on the blocking pool, bounded by the chain's timeout. A hook
    /// that overruns keeps its thread but its answer is ignored.
    async fn isolate<T, F>(&self, f: F) -> Result<T, HookError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, HookError> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(f);
        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => return Err(HookError::TimedOut(limit)),
            },
            None => task.await,
        };

        match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => Err(HookError::Panicked(panic_message(err.into_panic()))),
            Err(err) => Err(HookError::Failed(err.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    impl CallHook for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn pre_call(&self, call: &Call) -> Result<Option<Call>, HookError> {
            let args = call
                .args
                .iter()
                .map(|a| match a.as_str() {
                    Some(s) => json!(s.to_uppercase()),
                    None => a.clone(),
                })
                .collect();
            Ok(Some(Call::new(call.method.clone(), args)))
        }

        fn post_call(&self, _call: &Call, result: &CallResult) -> Result<Option<CallResult>, HookError> {
            Ok(result
                .as_value()
                .and_then(|v| v.as_str())
                .map(|s| CallResult::Value(json!(format!("{s}!")))))
        }
    }

    struct Broken;

    impl CallHook for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn pre_call(&self, _call: &Call) -> Result<Option<Call>, HookError> {
            Err(HookError::Failed("boom".into()))
        }

        fn post_call(&self, _call: &Call, _result: &CallResult) -> Result<Option<CallResult>, HookError> {
            panic!("post hook exploded");
        }
    }

    struct Slow;

    impl CallHook for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn pre_call(&self, _call: &Call) -> Result<Option<Call>, HookError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Some(Call::new("too.late", vec![])))
        }
    }

    struct Blank;

    impl CallHook for Blank {
        fn name(&self) -> &str {
            "blank"
        }

        fn pre_call(&self, call: &Call) -> Result<Option<Call>, HookError> {
            Ok(Some(call.renamed("")))
        }
    }

    fn stage(hook: impl CallHook, pre: bool, post: bool) -> HookStage {
        HookStage {
            hook: Arc::new(hook),
            pre,
            post,
        }
    }

    fn labels(events: &EventLog) -> Vec<EventLabel> {
        events.history().iter().map(|e| e.label).collect()
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let events = EventLog::in_memory();
        let chain = HookChain::empty(events.clone());
        let call = Call::new("rig.get_mode", vec![]);

        assert_eq!(chain.apply_pre(call.clone()).await, call);
        let result = chain.apply_post(&call, CallResult::Value(json!("CW"))).await;
        assert_eq!(result, CallResult::Value(json!("CW")));
        assert!(events.history().is_empty());
    }

    #[tokio::test]
    async fn rewrites_are_applied_and_logged() {
        let events = EventLog::in_memory();
        let chain = HookChain::new(vec![stage(Upper, true, true)], None, events.clone());
        let call = Call::new("rig.set_mode", vec![json!("usb")]);

        let rewritten = chain.apply_pre(call).await;
        assert_eq!(rewritten.args, vec![json!("USB")]);

        let result = chain.apply_post(&rewritten, CallResult::Value(json!("ok"))).await;
        assert_eq!(result, CallResult::Value(json!("ok!")));
        assert_eq!(labels(&events), vec![EventLabel::Callback, EventLabel::Callback]);
    }

    #[tokio::test]
    async fn failing_hooks_fall_back_and_log_one_error_each() {
        let events = EventLog::in_memory();
        let chain = HookChain::new(
            vec![stage(Broken, true, true), stage(Upper, true, false)],
            Some(Duration::from_secs(2)),
            events.clone(),
        );
        let call = Call::new("rig.set_mode", vec![json!("usb")]);

        // The broken hook is skipped; the next hook still sees the original.
        let rewritten = chain.apply_pre(call.clone()).await;
        assert_eq!(rewritten.args, vec![json!("USB")]);

        let result = chain.apply_post(&rewritten, CallResult::Value(json!(1))).await;
        assert_eq!(result, CallResult::Value(json!(1)));

        let history = events.history();
        let errors: Vec<&str> = history
            .iter()
            .filter(|e| e.label == EventLabel::Error)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("pre-call hook 'broken' failed: boom"));
        assert!(errors[1].contains("panicked: post hook exploded"));
    }

    #[tokio::test]
    async fn slow_hook_times_out() {
        let events = EventLog::in_memory();
        let chain = HookChain::new(
            vec![stage(Slow, true, false)],
            Some(Duration::from_millis(50)),
            events.clone(),
        );
        let call = Call::new("rig.get_mode", vec![]);

        assert_eq!(chain.apply_pre(call.clone()).await, call);
        let history = events.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].message.contains("did not return within"));
    }

    #[tokio::test]
    async fn empty_method_name_is_rejected() {
        let events = EventLog::in_memory();
        let chain = HookChain::new(vec![stage(Blank, true, false)], None, events.clone());
        let call = Call::new("rig.get_mode", vec![]);

        assert_eq!(chain.apply_pre(call.clone()).await, call);
        assert_eq!(labels(&events), vec![EventLabel::Error]);
    }

    #[tokio::test]
    async fn stage_capabilities_are_respected() {
        let events = EventLog::in_memory();
        let chain = HookChain::new(vec![stage(Upper, false, true)], None, events.clone());
        let call = Call::new("rig.set_mode", vec![json!("usb")]);

        assert_eq!(chain.apply_pre(call.clone()).await, call);
        assert_eq!(chain.len(), 1);
    }
}
