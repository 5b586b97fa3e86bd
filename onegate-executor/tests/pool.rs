use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use onegate_core::Error;
use onegate_executor::{
    Delegate, Executor, ExecutorConfig, Payload, Priority, TaskContext, TaskOptions,
};

/// Test delegate: payloads are command strings.
/// `sleep:<ms>` sleeps, `panic` panics, anything else echoes back.
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Delegate for Recorder {
    fn execute(&mut self, _ctx: &TaskContext, payload: Payload) -> Result<Payload, Error> {
        let command = *payload
            .downcast::<String>()
            .map_err(|_| Error::internal("unexpected payload type"))?;
        if let Some(ms) = command.strip_prefix("sleep:") {
            std::thread::sleep(Duration::from_millis(ms.parse().unwrap_or(10)));
        }
        if command == "panic" {
            panic!("delegate exploded");
        }
        self.log.lock().unwrap().push(command.clone());
        Ok(Box::new(command))
    }
}

fn recorder_pool(config: ExecutorConfig) -> (Executor, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory_log = log.clone();
    let executor = Executor::new(config, move || {
        Box::new(Recorder {
            log: factory_log.clone(),
        }) as Box<dyn Delegate>
    })
    .unwrap();
    (executor, log)
}

fn payload(command: &str) -> Payload {
    Box::new(command.to_string())
}

#[tokio::test]
async fn submit_round_trips_payload() {
    let (executor, _) = recorder_pool(ExecutorConfig::default());
    let result = executor
        .submit(
            CancellationToken::new(),
            payload("hello"),
            TaskOptions::default(),
        )
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.into_data::<String>().unwrap(), "hello");
}

#[tokio::test]
async fn shutdown_drains_all_queued_tasks() {
    let (executor, _) = recorder_pool(ExecutorConfig::default());

    let mut receivers = Vec::new();
    for _ in 0..10 {
        receivers.push(
            executor
                .submit_async(
                    CancellationToken::new(),
                    payload("sleep:100"),
                    TaskOptions::priority(Priority::Medium),
                )
                .unwrap(),
        );
    }

    executor.shutdown(Duration::from_secs(1)).await.unwrap();

    let stats = executor.stats();
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.queued, 0);

    for rx in receivers {
        assert!(rx.await.unwrap().is_success());
    }
}

#[tokio::test]
async fn submissions_after_shutdown_are_rejected() {
    let (executor, _) = recorder_pool(ExecutorConfig::default());
    executor.shutdown(Duration::from_secs(1)).await.unwrap();
    let err = executor
        .submit_async(CancellationToken::new(), payload("x"), TaskOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), onegate_core::code::CONFLICT);
}

#[tokio::test]
async fn high_priority_overtakes_low() {
    let config = ExecutorConfig {
        min_workers: 1,
        max_workers: 1,
        ..ExecutorConfig::default()
    };
    let (executor, log) = recorder_pool(config);

    // Occupy the single worker, then enqueue low before high.
    let gate = executor
        .submit_async(
            CancellationToken::new(),
            payload("sleep:150"),
            TaskOptions::default(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let low = executor
        .submit_async(
            CancellationToken::new(),
            payload("low"),
            TaskOptions::priority(Priority::Low),
        )
        .unwrap();
    let high = executor
        .submit_async(
            CancellationToken::new(),
            payload("high"),
            TaskOptions::priority(Priority::High),
        )
        .unwrap();

    gate.await.unwrap();
    high.await.unwrap();
    low.await.unwrap();

    let order = log.lock().unwrap().clone();
    let high_pos = order.iter().position(|c| c == "high").unwrap();
    let low_pos = order.iter().position(|c| c == "low").unwrap();
    assert!(high_pos < low_pos, "high must run before low: {order:?}");
}

#[tokio::test]
async fn panic_in_execute_fails_task_but_worker_survives() {
    let config = ExecutorConfig {
        min_workers: 1,
        max_workers: 1,
        ..ExecutorConfig::default()
    };
    let (executor, _) = recorder_pool(config);

    let result = executor
        .submit(CancellationToken::new(), payload("panic"), TaskOptions::default())
        .await
        .unwrap();
    assert!(!result.is_success());
    assert_eq!(
        result.error.unwrap().code(),
        onegate_core::code::INTERNAL
    );

    // The same (sole) worker keeps processing.
    let result = executor
        .submit(CancellationToken::new(), payload("after"), TaskOptions::default())
        .await
        .unwrap();
    assert!(result.is_success());

    let stats = executor.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn cancelled_task_still_resolves_its_channel() {
    let config = ExecutorConfig {
        min_workers: 1,
        max_workers: 1,
        ..ExecutorConfig::default()
    };
    let (executor, _) = recorder_pool(config);

    // Block the worker, then queue a task and cancel it while it waits.
    let gate = executor
        .submit_async(
            CancellationToken::new(),
            payload("sleep:100"),
            TaskOptions::default(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancel = CancellationToken::new();
    let queued = executor
        .submit_async(cancel.clone(), payload("never"), TaskOptions::default())
        .unwrap();
    cancel.cancel();

    gate.await.unwrap();
    let result = queued.await.expect("channel resolves even when cancelled");
    assert!(!result.is_success());
}

#[tokio::test]
async fn pool_grows_under_queue_pressure() {
    let config = ExecutorConfig {
        min_workers: 1,
        max_workers: 4,
        ..ExecutorConfig::default()
    };
    let (executor, _) = recorder_pool(config);
    assert_eq!(executor.worker_count(), 1);

    let mut receivers = Vec::new();
    for _ in 0..8 {
        receivers.push(
            executor
                .submit_async(
                    CancellationToken::new(),
                    payload("sleep:50"),
                    TaskOptions::default(),
                )
                .unwrap(),
        );
    }
    assert!(executor.worker_count() > 1, "pool should have grown");

    for rx in receivers {
        rx.await.unwrap();
    }
}

#[test]
fn init_failure_aborts_construction() {
    struct BrokenInit;
    impl Delegate for BrokenInit {
        fn init(&mut self) -> Result<(), Error> {
            Err(Error::internal("no cipher context available"))
        }
        fn execute(&mut self, _ctx: &TaskContext, payload: Payload) -> Result<Payload, Error> {
            Ok(payload)
        }
    }

    let result = Executor::new(ExecutorConfig::default(), || {
        Box::new(BrokenInit) as Box<dyn Delegate>
    });
    assert!(result.is_err());
}

#[test]
fn init_panic_aborts_construction() {
    struct PanickyInit;
    impl Delegate for PanickyInit {
        fn init(&mut self) -> Result<(), Error> {
            panic!("init blew up");
        }
        fn execute(&mut self, _ctx: &TaskContext, payload: Payload) -> Result<Payload, Error> {
            Ok(payload)
        }
    }

    let result = Executor::new(ExecutorConfig::default(), || {
        Box::new(PanickyInit) as Box<dyn Delegate>
    });
    assert!(result.is_err());
}

#[tokio::test]
async fn destroy_runs_on_retirement() {
    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    struct Counting;
    impl Delegate for Counting {
        fn execute(&mut self, _ctx: &TaskContext, payload: Payload) -> Result<Payload, Error> {
            Ok(payload)
        }
        fn destroy(&mut self) {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
        }
    }

    let config = ExecutorConfig {
        min_workers: 2,
        max_workers: 2,
        idle_timeout: Duration::from_millis(50),
        ..ExecutorConfig::default()
    };
    let executor = Executor::new(config, || Box::new(Counting) as Box<dyn Delegate>).unwrap();

    executor
        .submit(CancellationToken::new(), Box::new(0u8), TaskOptions::default())
        .await
        .unwrap();
    executor.shutdown(Duration::from_secs(1)).await.unwrap();

    // Workers exit after the drain; give their threads a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(DESTROYED.load(Ordering::SeqCst) >= 1);
}
