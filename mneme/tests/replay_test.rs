//! Replay semantics: re-driving a flow executes only the work that never
//! finished, and an incompatible code change is caught before anything
//! runs.

use mneme::prelude::*;
use mneme::{EngineError, InvocationStatus};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

async fn wait_for_status(
    storage: &Arc<InMemoryExecutionLog>,
    id: Uuid,
    step: i32,
    status: InvocationStatus,
) {
    for _ in 0..500 {
        if let Some(inv) = storage.get_invocation(id, step).await.unwrap() {
            if inv.status() == status {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("step {step} never reached {status:?}");
}

#[derive(Clone, Serialize, Deserialize, FlowType)]
struct HelloFlow {
    greeting: String,
}

static HELLO_CALLS: AtomicU32 = AtomicU32::new(0);
static HELLO_BLOCK: AtomicBool = AtomicBool::new(true);

impl HelloFlow {
    #[step]
    async fn say(self: Arc<Self>, name: String, i: i32) -> i32 {
        let crash_here = i == 3 && HELLO_BLOCK.swap(false, Ordering::SeqCst);
        HELLO_CALLS.fetch_add(1, Ordering::SeqCst);
        if crash_here {
            // Simulated crash point: the first attempt of step 4 hangs
            // here until the driving task is killed.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        println!("{}, {} #{}", self.greeting, name, i);
        i
    }
}

#[tokio::test]
async fn test_hello_world_replay_after_crash() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    let flow = HelloFlow {
        greeting: "Hello".to_string(),
    };

    // First drive dies inside step 4's body.
    let handle = engine.flow(flow.clone(), id).unwrap();
    let first_drive = handle.run_detached(|f| async move {
        let mut last = 0;
        for i in 0..5 {
            last = f.clone().say("World".to_string(), i).await;
        }
        last
    });

    wait_for_status(&storage, id, 3, InvocationStatus::Complete).await;
    wait_for_status(&storage, id, 4, InvocationStatus::Pending).await;
    // The body of step 4 counts itself before hanging; once the count
    // reaches 4 the task is parked at the crash point and safe to kill.
    for _ in 0..500 {
        if HELLO_CALLS.load(Ordering::SeqCst) == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    first_drive.abort();

    let calls_before_redrive = HELLO_CALLS.load(Ordering::SeqCst);
    assert_eq!(calls_before_redrive, 4);

    // The crash left a contiguous prefix: completions ascend and only
    // the interrupted step is unfinished.
    let rows = storage.get_invocations_for_flow(id).await.unwrap();
    assert_eq!(
        rows.iter().map(|r| r.step()).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    for row in &rows[1..4] {
        assert_eq!(row.status(), InvocationStatus::Complete);
    }
    assert_eq!(rows[4].status(), InvocationStatus::Pending);

    // Re-drive on a fresh handle: steps 1..3 replay, 4 and 5 execute.
    let handle = engine.flow(flow, id).unwrap();
    let outcome = handle
        .run(|f| async move {
            let mut last = 0;
            for i in 0..5 {
                last = f.clone().say("World".to_string(), i).await;
            }
            last
        })
        .await
        .unwrap();

    assert_eq!(outcome.completed(), Some(4));
    let calls_in_second_run = HELLO_CALLS.load(Ordering::SeqCst) - calls_before_redrive;
    assert_eq!(calls_in_second_run, 2);

    let rows = storage.get_invocations_for_flow(id).await.unwrap();
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|r| r.status() == InvocationStatus::Complete));
    assert_eq!(
        rows.iter().map(|r| r.step()).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4, 5]
    );
    // The interrupted attempt shows up in the retry count of step 4.
    assert_eq!(rows[4].attempts(), 2);
    assert_eq!(rows[4].return_value(), Some("3"));
}

#[derive(Clone, Serialize, Deserialize, FlowType)]
struct OrderFlow {
    order_id: String,
    amount: i64,
    #[serde(skip)]
    validate_calls: Arc<AtomicU32>,
    #[serde(skip)]
    charge_calls: Arc<AtomicU32>,
    #[serde(skip)]
    charge_fail_once: Arc<AtomicBool>,
}

impl OrderFlow {
    fn new(order_id: &str, amount: i64) -> Self {
        Self {
            order_id: order_id.to_string(),
            amount,
            validate_calls: Arc::new(AtomicU32::new(0)),
            charge_calls: Arc::new(AtomicU32::new(0)),
            charge_fail_once: Arc::new(AtomicBool::new(false)),
        }
    }

    #[flow]
    async fn process(self: Arc<Self>) -> Result<String, String> {
        let amount = self.clone().validate().await?;
        let receipt = self.clone().charge(amount).await?;
        Ok(receipt)
    }

    #[step]
    async fn validate(self: Arc<Self>) -> Result<i64, String> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.amount)
    }

    #[step]
    async fn charge(self: Arc<Self>, amount: i64) -> Result<String, String> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        if self.charge_fail_once.swap(false, Ordering::SeqCst) {
            return Err("payment gateway unavailable".to_string());
        }
        Ok(format!("receipt-{}-{}", self.order_id, amount))
    }
}

#[tokio::test]
async fn test_flow_method_owns_entry_row() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    let flow = OrderFlow::new("ORD-7", 250);
    let handle = engine.flow(flow, id).unwrap();
    let receipt = handle.execute(|f| f.process()).await.unwrap().unwrap();
    assert_eq!(receipt, "receipt-ORD-7-250");

    let entry = storage.get_invocation(id, 0).await.unwrap().unwrap();
    assert_eq!(entry.status(), InvocationStatus::Complete);
    assert_eq!(entry.method_name(), "process()");
    // The entry row's parameters are the flow value, ready for recovery.
    assert!(entry.parameters().contains("ORD-7"));

    let rows = storage.get_invocations_for_flow(id).await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_failed_step_leaves_flow_redrivable() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    let flow = OrderFlow::new("ORD-8", 99);
    flow.charge_fail_once.store(true, Ordering::SeqCst);
    let validate_calls = Arc::clone(&flow.validate_calls);

    let handle = engine.flow(flow.clone(), id).unwrap();
    let first = handle.execute(|f| f.process()).await.unwrap();
    assert_eq!(first, Err("payment gateway unavailable".to_string()));

    // No completion was written for the failed step or the entry.
    let entry = storage.get_invocation(id, 0).await.unwrap().unwrap();
    assert_eq!(entry.status(), InvocationStatus::Pending);
    let charge_row = storage.get_invocation(id, 2).await.unwrap().unwrap();
    assert_eq!(charge_row.status(), InvocationStatus::Pending);
    assert_eq!(charge_row.attempts(), 1);

    // Re-drive: validate replays, charge retries and succeeds.
    let handle = engine.flow(flow, id).unwrap();
    let second = handle.execute(|f| f.process()).await.unwrap();
    assert_eq!(second, Ok("receipt-ORD-8-99".to_string()));

    assert_eq!(validate_calls.load(Ordering::SeqCst), 1);
    let charge_row = storage.get_invocation(id, 2).await.unwrap().unwrap();
    assert_eq!(charge_row.attempts(), 2);
    let entry = storage.get_invocation(id, 0).await.unwrap().unwrap();
    assert_eq!(entry.status(), InvocationStatus::Complete);
}

#[tokio::test]
async fn test_completed_flow_replays_without_execution() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    let flow = OrderFlow::new("ORD-9", 10);
    let validate_calls = Arc::clone(&flow.validate_calls);
    let charge_calls = Arc::clone(&flow.charge_calls);

    let handle = engine.flow(flow.clone(), id).unwrap();
    let first = handle.execute(|f| f.process()).await.unwrap().unwrap();

    let handle = engine.flow(flow, id).unwrap();
    let second = handle.execute(|f| f.process()).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(validate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(charge_calls.load(Ordering::SeqCst), 1);
}

#[derive(Clone, Serialize, Deserialize, FlowType)]
struct DriftFlow;

impl DriftFlow {
    #[step]
    async fn first_shape(self: Arc<Self>) -> i32 {
        1
    }

    #[step]
    async fn second_shape(self: Arc<Self>) -> i32 {
        2
    }
}

#[tokio::test]
async fn test_structural_drift_is_fatal_and_leaves_row_untouched() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    let handle = engine.flow(DriftFlow, id).unwrap();
    handle
        .run(|f| async move {
            f.first_shape().await;
        })
        .await
        .unwrap();

    // A re-driven flow reaching the same step with a different method is
    // an incompatible structure change.
    let handle = engine.flow(DriftFlow, id).unwrap();
    let err = handle
        .run(|f| async move {
            f.second_shape().await;
        })
        .await
        .unwrap_err();

    match err {
        EngineError::StructuralDrift {
            step,
            logged_method,
            called_method,
            ..
        } => {
            assert_eq!(step, 1);
            assert_eq!(logged_method, "first_shape()");
            assert_eq!(called_method, "second_shape()");
        }
        other => panic!("expected structural drift, got {other}"),
    }

    let row = storage.get_invocation(id, 1).await.unwrap().unwrap();
    assert_eq!(row.method_name(), "first_shape()");
    assert_eq!(row.attempts(), 1);
}

#[derive(Clone, Serialize, Deserialize, FlowType)]
struct QuickFlow;

impl QuickFlow {
    #[step(delay = 0, unit = "MILLIS")]
    async fn zero_delay(self: Arc<Self>) -> u8 {
        1
    }

    #[step]
    async fn no_delay(self: Arc<Self>) -> u8 {
        2
    }
}

#[tokio::test]
async fn test_zero_delay_behaves_like_no_delay() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    let started = std::time::Instant::now();
    let handle = engine.flow(QuickFlow, id).unwrap();
    handle
        .run(|f| async move {
            f.clone().zero_delay().await;
            f.no_delay().await;
        })
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));

    let zero = storage.get_invocation(id, 1).await.unwrap().unwrap();
    let none = storage.get_invocation(id, 2).await.unwrap().unwrap();
    assert_eq!(zero.delay(), none.delay());
}

#[derive(Clone, Serialize, Deserialize, FlowType)]
struct ReminderFlow;

impl ReminderFlow {
    #[step(delay = 600, unit = "MILLIS")]
    async fn send_reminder(self: Arc<Self>) -> bool {
        true
    }
}

#[tokio::test]
async fn test_retry_serves_only_the_remaining_delay() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    // First attempt dies while sleeping through its declared delay.
    let handle = engine.flow(ReminderFlow, id).unwrap();
    let first_drive = handle.run_detached(|f| f.send_reminder());

    wait_for_status(&storage, id, 1, InvocationStatus::Pending).await;
    let first_start = storage
        .get_invocation(id, 1)
        .await
        .unwrap()
        .unwrap()
        .timestamp();

    tokio::time::sleep(Duration::from_millis(250)).await;
    first_drive.abort();

    // The retry owes only what is left of the 600ms, so the total
    // wall-clock wait stays anchored to the first start.
    let redrive_started = std::time::Instant::now();
    let handle = engine.flow(ReminderFlow, id).unwrap();
    let outcome = handle.run(|f| f.send_reminder()).await.unwrap();
    assert_eq!(outcome.completed(), Some(true));

    let redrive_elapsed = redrive_started.elapsed();
    assert!(redrive_elapsed < Duration::from_millis(550));

    let total_ms = (chrono::Utc::now() - first_start).num_milliseconds();
    assert!(total_ms >= 590, "total wait was only {total_ms}ms");

    let row = storage.get_invocation(id, 1).await.unwrap().unwrap();
    assert_eq!(row.attempts(), 2);
    assert_eq!(row.timestamp(), first_start);
}

#[tokio::test]
async fn test_stale_delayed_row_executes_without_extra_wait() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    let engine = Engine::new(Arc::clone(&storage));
    let id = Uuid::new_v4();

    let handle = engine.flow(ReminderFlow, id).unwrap();
    let first_drive = handle.run_detached(|f| f.send_reminder());
    wait_for_status(&storage, id, 1, InvocationStatus::Pending).await;

    // Die during the delay, then come back long after it elapsed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    first_drive.abort();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let redrive_started = std::time::Instant::now();
    let handle = engine.flow(ReminderFlow, id).unwrap();
    let outcome = handle.run(|f| f.send_reminder()).await.unwrap();
    assert_eq!(outcome.completed(), Some(true));
    assert!(redrive_started.elapsed() < Duration::from_millis(150));
}

#[tokio::test]
async fn test_unknown_flow_lookup_is_absent() {
    let storage = Arc::new(InMemoryExecutionLog::new());
    assert!(storage
        .get_invocation(Uuid::new_v4(), 0)
        .await
        .unwrap()
        .is_none());
}
