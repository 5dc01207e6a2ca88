//! Worker lifecycle: calls pulled from the queue, executed, results
//! published, clean shutdown.

use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use washost::clock::{Clock, ClockMode};
use washost::dispatch::Resolver;
use washost::layout;
use washost::module::{FnGuest, Guest, RunEnv};
use washost::providers::{MemoryObjectStore, MemoryQueue, Queue};
use washost::{hostcalls, CallStatus, Config, FunctionCall, Loader, Worker};

struct EchoLoader;

impl Loader for EchoLoader {
    fn load(&self, call: &FunctionCall) -> Result<Arc<dyn Guest>> {
        match call.function.as_str() {
            "echo" => Ok(Arc::new(FnGuest::new(vec![], |vm| {
                let mut mem = vm.memory();
                let len = mem.read_u32(layout::INPUT_START as u32).unwrap();
                let input = mem.read_bytes(layout::INPUT_START as u32 + 4, len).unwrap();
                mem.write_u32(layout::OUTPUT_START as u32, len).unwrap();
                mem.write_bytes(layout::OUTPUT_START as u32 + 4, &input)
                    .unwrap();
                Ok(())
            }))),
            other => anyhow::bail!("unknown function {other}"),
        }
    }
}

#[test]
fn worker_drains_queue_and_publishes_results() {
    let root = tempfile::tempdir().unwrap();
    let queue = Arc::new(MemoryQueue::new());
    let mut resolver = Resolver::new();
    hostcalls::register_all(&mut resolver).unwrap();
    let env = Arc::new(RunEnv {
        config: Config {
            shared_root: root.path().to_path_buf(),
            threads: 2,
            ..Config::default()
        },
        resolver,
        clock: Clock::new(ClockMode::Fake),
        queue: queue.clone(),
        object_store: Arc::new(MemoryObjectStore::new()),
    });

    for i in 0..5 {
        queue
            .push(FunctionCall::new("u", "echo", format!("payload-{i}").into_bytes()).unwrap())
            .unwrap();
    }
    // One call for a function the loader does not know.
    queue
        .push(FunctionCall::new("u", "missing", vec![]).unwrap())
        .unwrap();

    let worker = Worker::new(Arc::clone(&env), Arc::new(EchoLoader));
    let stop = worker.stop_flag();
    let handle = std::thread::spawn(move || worker.run());

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut results = Vec::new();
    while results.len() < 6 && Instant::now() < deadline {
        results.extend(queue.drain_results());
        std::thread::sleep(Duration::from_millis(20));
    }
    stop.store(false, Ordering::Relaxed);
    handle.join().unwrap().unwrap();

    assert_eq!(results.len(), 6);
    let mut ok: Vec<_> = results
        .iter()
        .filter(|r| r.status == CallStatus::Success)
        .map(|r| String::from_utf8(r.output.clone()).unwrap())
        .collect();
    ok.sort();
    assert_eq!(
        ok,
        (0..5).map(|i| format!("payload-{i}")).collect::<Vec<_>>()
    );

    let failed: Vec<_> = results
        .iter()
        .filter(|r| r.status == CallStatus::InternalError)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_ref().unwrap().contains("unknown function"));
}
