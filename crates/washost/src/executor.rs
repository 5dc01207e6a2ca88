//! Executors drive one call at a time from queue pull to result
//! publication. A worker owns N executor threads; module instances never
//! cross between them.

use crate::call::{CallStatus, FunctionCall};
use crate::module::{resolve_imports, status_for_trap, Guest, ModuleInstance, RunEnv, Vm};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Maps a call's function name onto an instantiable module. The compiler
/// sits behind this seam.
pub trait Loader: Send + Sync {
    fn load(&self, call: &FunctionCall) -> Result<Arc<dyn Guest>>;
}

pub struct Executor {
    env: Arc<RunEnv>,
    cancel: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(env: Arc<RunEnv>) -> Self {
        Self {
            env,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cooperative abort of the in-flight call; it takes effect
    /// at the next intrinsic boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run one call to completion and return the finished record. Never
    /// panics on guest misbehaviour: traps become failure tags.
    pub fn execute(&self, guest: &dyn Guest, call: FunctionCall) -> FunctionCall {
        let function = call.function.clone();

        let imports = match resolve_imports(&self.env.resolver, guest) {
            Ok(imports) => imports,
            Err(e) => {
                tracing::error!("instantiation of {} failed: {}", function, e);
                let mut call = call;
                call.status = CallStatus::InternalError;
                call.error = Some(e.to_string());
                return call;
            }
        };

        let mut instance = ModuleInstance::new(call, guest.memory_pages(), &self.env);
        if let Err(trap) = instance.stage_input() {
            instance.call.status = status_for_trap(&trap);
            instance.call.error = Some(trap.to_string());
            return instance.into_call(false);
        }

        let run_result = {
            let mut vm = Vm::new(&mut instance, &self.env, imports, &self.cancel);
            guest.run(&mut vm)
        };

        let capture = self.env.config.capture_stdout;
        match run_result {
            Ok(()) => {
                let drained = instance.extract_output();
                match drained.and_then(|output| {
                    instance
                        .call
                        .set_output(output)
                        .map_err(|e| crate::dispatch::Trap::internal(e.to_string()))
                }) {
                    Ok(()) => {
                        instance.call.status = CallStatus::Success;
                        tracing::debug!("call to {} succeeded", function);
                    }
                    Err(trap) => {
                        instance.call.status = status_for_trap(&trap);
                        instance.call.error = Some(trap.to_string());
                    }
                }
                instance.into_call(capture)
            }
            Err(trap) => {
                // Failed calls publish no partial output.
                tracing::debug!("call to {} failed: {}", function, trap);
                instance.call.status = status_for_trap(&trap);
                instance.call.error = Some(trap.to_string());
                instance.call.output.clear();
                instance.into_call(capture)
            }
        }
    }
}

/// The worker process body: N executor threads pulling from the shared
/// queue until asked to stop.
pub struct Worker {
    env: Arc<RunEnv>,
    loader: Arc<dyn Loader>,
    running: Arc<AtomicBool>,
}

const POP_TIMEOUT: Duration = Duration::from_millis(500);

impl Worker {
    pub fn new(env: Arc<RunEnv>, loader: Arc<dyn Loader>) -> Self {
        Self {
            env,
            loader,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Block until every executor thread exits (i.e. until the stop flag is
    /// cleared).
    pub fn run(&self) -> Result<()> {
        let threads = self.env.config.threads.max(1);
        tracing::info!("worker starting with {} executor threads", threads);
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(threads);
            for i in 0..threads {
                let env = Arc::clone(&self.env);
                let loader = Arc::clone(&self.loader);
                let running = Arc::clone(&self.running);
                handles.push(
                    thread::Builder::new()
                        .name(format!("executor-{i}"))
                        .spawn_scoped(scope, move || executor_loop(env, loader, running))
                        .context("spawning executor thread")?,
                );
            }
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("executor exited with error: {e:#}"),
                    Err(_) => tracing::error!("executor thread panicked"),
                }
            }
            Ok(())
        })
    }
}

fn executor_loop(env: Arc<RunEnv>, loader: Arc<dyn Loader>, running: Arc<AtomicBool>) -> Result<()> {
    let executor = Executor::new(Arc::clone(&env));
    while running.load(Ordering::Relaxed) {
        let call = match env.queue.pop(POP_TIMEOUT) {
            Ok(Some(call)) => call,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("queue pop failed: {e:#}");
                thread::sleep(POP_TIMEOUT);
                continue;
            }
        };

        tracing::debug!("executing {}/{}", call.user, call.function);
        let finished = match loader.load(&call) {
            Ok(guest) => executor.execute(guest.as_ref(), call),
            Err(e) => {
                let mut call = call;
                call.status = CallStatus::InternalError;
                call.error = Some(format!("load failed: {e:#}"));
                call
            }
        };
        if let Err(e) = env.queue.push_result(finished) {
            tracing::error!("result publish failed: {e:#}");
        }
    }
    Ok(())
}
