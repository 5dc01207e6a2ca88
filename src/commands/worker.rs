//! The `washost worker` command.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use washost::clock::{Clock, ClockMode};
use washost::executor::Loader;
use washost::layout;
use washost::module::{FnGuest, Guest, RunEnv, Vm};
use washost::providers::{MemoryKvStore, MemoryObjectStore, MemoryQueue, Providers};
use washost::{hostcalls, Config, FunctionCall, Worker};

/// Runs a worker process executing WebAssembly functions
#[derive(Parser)]
pub struct WorkerCommand {
    /// Host directory guest paths are masked under
    #[arg(long, value_name = "DIR", env = "WASHOST_SHARED_ROOT")]
    shared_root: PathBuf,

    /// Number of executor threads
    #[arg(long, default_value = "1", env = "WASHOST_THREADS")]
    threads: usize,

    /// Mirror guest stdout into call results
    #[arg(long, env = "WASHOST_CAPTURE_STDOUT")]
    capture_stdout: bool,

    /// Use wall-clock time instead of the deterministic clock
    #[arg(long, env = "WASHOST_REAL_CLOCK")]
    real_clock: bool,

    /// Object store endpoint for blob-backed files
    #[arg(long, default_value = "localhost:9000", env = "WASHOST_OBJECT_STORE")]
    object_store_endpoint: String,

    /// Object store bucket
    #[arg(long, default_value = "washost", env = "WASHOST_BUCKET")]
    object_store_bucket: String,

    /// Object store user
    #[arg(long, default_value = "minio", env = "WASHOST_OBJECT_STORE_USER")]
    object_store_user: String,

    /// Object store password
    #[arg(long, default_value = "minio123", env = "WASHOST_OBJECT_STORE_PASSWORD")]
    object_store_password: String,

    /// Queue endpoint calls are pulled from and chained calls published to
    #[arg(long, default_value = "localhost:6379", env = "WASHOST_QUEUE")]
    queue_endpoint: String,
}

impl WorkerCommand {
    pub fn execute(self) -> Result<()> {
        init_logging();

        let config = Config {
            shared_root: self.shared_root.clone(),
            capture_stdout: self.capture_stdout,
            real_clock: self.real_clock,
            threads: self.threads,
            object_store_endpoint: self.object_store_endpoint,
            object_store_bucket: self.object_store_bucket,
            object_store_user: self.object_store_user,
            object_store_password: self.object_store_password,
            queue_endpoint: self.queue_endpoint,
        };
        std::fs::create_dir_all(&config.shared_root)
            .with_context(|| format!("creating shared root {}", config.shared_root.display()))?;

        // Process-local backends; clustered deployments swap these for the
        // networked clients behind the same traits.
        let object_store = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(MemoryQueue::new());
        washost::providers::install(Providers {
            object_store: object_store.clone(),
            queue: queue.clone(),
            kv_store: Arc::new(MemoryKvStore::default()),
        })?;

        let mut resolver = washost::dispatch::Resolver::new();
        hostcalls::register_all(&mut resolver)?;

        let clock_mode = if config.real_clock {
            ClockMode::Real
        } else {
            ClockMode::Fake
        };
        let env = Arc::new(RunEnv {
            config,
            resolver,
            clock: Clock::new(clock_mode),
            queue,
            object_store,
        });

        tracing::info!(
            "shared root at {}, queue at {}",
            env.config.shared_root.display(),
            env.config.queue_endpoint
        );
        let worker = Worker::new(env, Arc::new(BuiltinLoader));
        worker.run()
    }
}

fn init_logging() {
    use std::io::IsTerminal;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let b = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_env("WASHOST_LOG"))
        .with_ansi(std::io::stderr().is_terminal());
    b.init();
}

/// Resolves the built-in functions shipped with the worker. Compiled user
/// modules arrive through an engine-backed loader instead.
struct BuiltinLoader;

impl Loader for BuiltinLoader {
    fn load(&self, call: &FunctionCall) -> Result<Arc<dyn Guest>> {
        match call.function.as_str() {
            "echo" => Ok(Arc::new(FnGuest::new(vec![], echo))),
            other => anyhow::bail!("no module registered for function {other}"),
        }
    }
}

/// Copies the call input into the output region unchanged.
fn echo(vm: &mut Vm<'_>) -> std::result::Result<(), washost::dispatch::Trap> {
    let mut mem = vm.memory();
    let len = mem
        .read_u32(layout::INPUT_START as u32)
        .map_err(|_| washost::dispatch::Trap::MemoryFault)?;
    let input = mem
        .read_bytes(layout::INPUT_START as u32 + 4, len)
        .map_err(|_| washost::dispatch::Trap::MemoryFault)?;
    mem.write_u32(layout::OUTPUT_START as u32, len)
        .map_err(|_| washost::dispatch::Trap::MemoryFault)?;
    mem.write_bytes(layout::OUTPUT_START as u32 + 4, &input)
        .map_err(|_| washost::dispatch::Trap::MemoryFault)?;
    Ok(())
}
