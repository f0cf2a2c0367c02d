use std::time::Duration;

use event_log::{EventLabel, EventLog};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::call::{Call, CallResult};
use crate::downstream::Downstream;

/// A call waiting for the dispatcher, with the slot its result goes into.
struct PendingCall {
    call: Call,
    slot: oneshot::Sender<CallResult>,
}

impl PendingCall {
    /// Fulfil the slot. A caller that has gone away is not an error.
    fn fulfil(self, result: CallResult) {
        if self.slot.send(result).is_err() {
            tracing::debug!(method = %self.call.method, "caller dropped before its result arrived");
        }
    }
}

/// Single-assignment receiver for one dispatched call.
pub struct ResultSlot {
    rx: oneshot::Receiver<CallResult>,
}

impl ResultSlot {
    /// Wait for the dispatcher to fulfil this slot.
    pub async fn wait(self) -> CallResult {
        self.rx
            .await
            .unwrap_or_else(|_| CallResult::relay_fault("dispatcher stopped before answering"))
    }
}

/// Settings for the dispatcher task.
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    /// Abandon a downstream call that takes longer than this.
    pub call_timeout: Option<Duration>,
}

/// Submission side of the FIFO between callers and the downstream target.
///
/// Cloning is cheap; every clone feeds the same dispatcher. The queue is
/// unbounded: a caller waits on its own [`ResultSlot`], never on queue depth.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<PendingCall>,
}

impl DispatchQueue {
    /// Spawn the dispatcher task that owns `downstream`.
    pub fn start<D: Downstream>(
        downstream: D,
        config: DispatchConfig,
        events: EventLog,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let join = tokio::spawn(run_dispatcher(downstream, rx, stop_rx, config, events));

        (
            Self { tx },
            DispatcherHandle {
                stop: Some(stop_tx),
                join,
            },
        )
    }

    /// Queue a call. The returned slot is fulfilled exactly once.
    pub fn enqueue(&self, call: Call) -> ResultSlot {
        let (slot, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(pending)) = self.tx.send(PendingCall { call, slot }) {
            pending.fulfil(CallResult::relay_fault("relay is shutting down"));
        }
        ResultSlot { rx }
    }

    /// Queue a call and wait for its result.
    pub async fn submit(&self, call: Call) -> CallResult {
        self.enqueue(call).wait().await
    }
}

/// Owner-side control of the dispatcher task.
pub struct DispatcherHandle {
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop after the in-flight call completes. Calls still queued are
    /// answered with a shutdown fault.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.join).await {
            tracing::error!(%err, "dispatcher task failed");
        }
    }
}

/// Drain the queue strictly in submission order, one downstream call at a
/// time.
async fn run_dispatcher<D: Downstream>(
    mut downstream: D,
    mut rx: mpsc::UnboundedReceiver<PendingCall>,
    mut stop: oneshot::Receiver<()>,
    config: DispatchConfig,
    events: EventLog,
) {
    tracing::info!(target = %downstream.describe(), "dispatcher started");

    // A dropped handle only detaches the dispatcher; it keeps serving.
    let mut detached = false;

    loop {
        let pending = tokio::select! {
            biased;
            signal = &mut stop, if !detached => match signal {
                Ok(()) => break,
                Err(_) => {
                    detached = true;
                    continue;
                }
            },
            next = rx.recv() => match next {
                Some(pending) => pending,
                None => break,
            },
        };

        let result = dispatch_one(&mut downstream, &pending.call, &config, &events).await;
        pending.fulfil(result);
    }

    rx.close();
    let mut abandoned = 0usize;
    while let Some(pending) = rx.recv().await {
        abandoned += 1;
        pending.fulfil(CallResult::relay_fault("relay is shutting down"));
    }
    tracing::info!(abandoned, "dispatcher stopped");
}

async fn dispatch_one<D: Downstream>(
    downstream: &mut D,
    call: &Call,
    config: &DispatchConfig,
    events: &EventLog,
) -> CallResult {
    let outcome = match config.call_timeout {
        Some(limit) => match tokio::time::timeout(limit, downstream.call(call)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                downstream.reset();
                let message = format!("no response within {} ms", limit.as_millis());
                events.record(EventLabel::Error, format!("{} failed: {}", call.method, message));
                return CallResult::relay_fault(message);
            }
        },
        None => downstream.call(call).await,
    };

    match outcome {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(method = %call.method, %err, "downstream call failed");
            events.record(EventLabel::Error, format!("{} failed: {}", call.method, err));
            CallResult::relay_fault(err.to_string())
        }
    }
}
