use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use call_router::CallRouter;
use event_log::{EventLabel, EventLog};
use futures_util::{SinkExt, StreamExt};
use rpc_relay::{
    BatchHookMode, Call, CallHook, CallResult, DispatchConfig, DispatchQueue, DispatcherHandle,
    Downstream, DownstreamError, HookChain, HookError, HookStage, ProxyFrontend, RelayServer,
    RpcTarget, MULTICALL_METHOD,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

/// Downstream that records what it receives and how many calls overlap.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Call>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Recorder {
    fn methods(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|c| c.method.clone()).collect()
    }
}

impl Downstream for Recorder {
    async fn call(&mut self, call: &Call) -> Result<CallResult, DownstreamError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(3)).await;
        self.seen.lock().unwrap().push(call.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(match call.method.as_str() {
            "rig.bad_method" => CallResult::relay_fault("method \"rig.bad_method\" is not supported"),
            "rig.get_mode" => CallResult::Value(json!("CW")),
            "rig.get_bandwidth" => CallResult::Value(json!("500")),
            "main.get_frequency" => CallResult::Value(json!(7000000)),
            _ => CallResult::Value(json!({ "echo": call.method, "args": call.args })),
        })
    }

    fn describe(&self) -> String {
        "recorder".into()
    }
}

struct BrokenHook;

impl CallHook for BrokenHook {
    fn name(&self) -> &str {
        "broken"
    }

    fn pre_call(&self, _call: &Call) -> Result<Option<Call>, HookError> {
        Err(HookError::Failed("boom".into()))
    }
}

struct Relay {
    addr: SocketAddr,
    events: EventLog,
    recorder: Recorder,
    dispatcher: DispatcherHandle,
    shutdown: broadcast::Sender<()>,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Relay {
    async fn start(rules: &[&str], stages: Vec<HookStage>) -> Self {
        let events = EventLog::in_memory();
        let recorder = Recorder::default();
        let router = CallRouter::new(call_router::loader::parse_rules(rules).unwrap());
        let hooks = HookChain::new(stages, Some(Duration::from_secs(2)), events.clone());
        let (queue, dispatcher) =
            DispatchQueue::start(recorder.clone(), DispatchConfig::default(), events.clone());
        let frontend = ProxyFrontend::new(
            Arc::new(router),
            Arc::new(hooks),
            queue,
            events.clone(),
            BatchHookMode::PerSubCall,
        );

        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(frontend))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown, rx) = broadcast::channel(1);
        let server = tokio::spawn(server.serve(rx));

        Self {
            addr,
            events,
            recorder,
            dispatcher,
            shutdown,
            server,
        }
    }

    fn client(&self) -> RpcTarget {
        RpcTarget::new("127.0.0.1", self.addr.port())
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.server.await.unwrap().unwrap();
        self.dispatcher.shutdown().await;
    }
}

#[tokio::test]
async fn blocked_method_never_reaches_the_target() {
    let relay = Relay::start(&["rig.take_control=BLOCK"], vec![]).await;
    let mut client = relay.client();

    let result = client.call(&Call::new("rig.take_control", vec![])).await.unwrap();
    let fault = result.as_fault().unwrap();
    assert_eq!(fault.fault_code, 1);
    assert!(fault.fault_message.contains("rig.take_control"));
    assert!(relay.recorder.methods().is_empty());

    let labels: Vec<EventLabel> = relay.events.history().iter().map(|e| e.label).collect();
    assert_eq!(labels, vec![EventLabel::Call, EventLabel::Blocked]);
    relay.stop().await;
}

#[tokio::test]
async fn renamed_method_is_delivered_under_its_new_name() {
    let relay = Relay::start(&["rig.get_frequency=main.get_frequency"], vec![]).await;
    let mut client = relay.client();

    let result = client.call(&Call::new("rig.get_frequency", vec![])).await.unwrap();
    assert_eq!(result, CallResult::Value(json!(7000000)));
    assert_eq!(relay.recorder.methods(), vec!["main.get_frequency"]);

    let history = relay.events.history();
    let remapped = history
        .iter()
        .position(|e| e.label == EventLabel::Remapped)
        .unwrap();
    let result_at = history
        .iter()
        .position(|e| e.label == EventLabel::Result)
        .unwrap();
    assert!(remapped < result_at);
    relay.stop().await;
}

#[tokio::test]
async fn batch_results_line_up_with_sub_calls() {
    let relay = Relay::start(&[], vec![]).await;
    let mut client = relay.client();

    let batch = Call::new(
        MULTICALL_METHOD,
        vec![json!([
            {"methodName": "rig.get_mode", "params": []},
            {"methodName": "rig.bad_method", "params": []},
            {"methodName": "rig.get_bandwidth", "params": []},
        ])],
    );
    let result = client.call(&batch).await.unwrap();
    let slots = result.as_value().unwrap().as_array().unwrap().clone();
    assert_eq!(slots[0], json!(["CW"]));
    assert_eq!(slots[1]["fault_code"], json!(1));
    assert_eq!(slots[2], json!(["500"]));
    assert_eq!(
        relay.recorder.methods(),
        vec!["rig.get_mode", "rig.bad_method", "rig.get_bandwidth"]
    );
    relay.stop().await;
}

#[tokio::test]
async fn concurrent_callers_are_serialized() {
    let relay = Relay::start(&[], vec![]).await;

    let mut tasks = Vec::new();
    for caller in 0..8 {
        let mut client = relay.client();
        tasks.push(tokio::spawn(async move {
            for n in 0..5 {
                let call = Call::new(format!("caller{caller}.call{n}"), vec![json!(n)]);
                let result = client.call(&call).await.unwrap();
                assert_eq!(result.as_value().unwrap()["echo"], json!(call.method));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let seen = relay.recorder.methods();
    assert_eq!(seen.len(), 40);
    assert_eq!(relay.recorder.max_in_flight.load(Ordering::SeqCst), 1);

    // Each caller's own calls arrive in the order it issued them.
    for caller in 0..8 {
        let prefix = format!("caller{caller}.");
        let mine: Vec<&String> = seen.iter().filter(|m| m.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..5).map(|n| format!("caller{caller}.call{n}")).collect();
        assert_eq!(mine, expected.iter().collect::<Vec<_>>());
    }
    relay.stop().await;
}

#[tokio::test]
async fn failing_hook_does_not_fail_the_call() {
    let stage = HookStage {
        hook: Arc::new(BrokenHook),
        pre: true,
        post: false,
    };
    let relay = Relay::start(&[], vec![stage]).await;
    let mut client = relay.client();

    let result = client.call(&Call::new("rig.get_mode", vec![])).await.unwrap();
    assert_eq!(result, CallResult::Value(json!("CW")));

    let errors = relay
        .events
        .history()
        .into_iter()
        .filter(|e| e.label == EventLabel::Error)
        .count();
    assert_eq!(errors, 1);
    relay.stop().await;
}

#[tokio::test]
async fn malformed_frames_get_a_fault_response() {
    let relay = Relay::start(&[], vec![]).await;
    let url = format!("ws://{}", relay.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    ws.send(Message::Text("not json".into())).await.unwrap();
    let reply = loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => break serde_json::from_str::<Value>(&text).unwrap(),
            _ => continue,
        }
    };
    assert_eq!(reply["type"], json!("res"));
    assert_eq!(reply["id"], json!(""));
    assert_eq!(reply["fault"]["fault_code"], json!(1));

    ws.send(Message::Text(
        json!({"type": "req", "id": "7", "method": "rig.get_mode", "params": []})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();
    let reply = loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => break serde_json::from_str::<Value>(&text).unwrap(),
            _ => continue,
        }
    };
    assert_eq!(reply["id"], json!("7"));
    assert_eq!(reply["result"], json!("CW"));

    let _ = ws.close(None).await;
    relay.stop().await;
}
