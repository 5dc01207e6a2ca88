//! Module instances and the execution surface the intrinsics see.
//!
//! The compiler/interpreter is an external collaborator: all the core needs
//! from it is the [`Guest`] contract, i.e. an import list to resolve and an
//! entrypoint that drives the resolved intrinsics against a linear memory.
//! One instance serves exactly one call, on one thread, and is torn down
//! when the call completes.

use crate::call::{CallStatus, FunctionCall};
use crate::clock::Clock;
use crate::config::Config;
use crate::dispatch::{
    Args, ImportRequest, InstantiationError, Intrinsic, Resolver, Trap, Value,
};
use crate::filesystem::FileSystem;
use crate::layout;
use crate::memory::GuestMemory;
use crate::providers::{ObjectStore, Queue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The contract an instantiated wasm module presents to the executor.
pub trait Guest: Send + Sync {
    /// Imports to resolve before the entrypoint may run.
    fn imports(&self) -> Vec<ImportRequest>;

    /// Linear memory size in 64 KiB pages.
    fn memory_pages(&self) -> u32 {
        layout::MIN_MEMORY_PAGES
    }

    /// The module's `run` export.
    fn run(&self, vm: &mut Vm<'_>) -> Result<(), Trap>;
}

/// A [`Guest`] backed by a host closure. Used for built-in functions and the
/// test suite's scripted guests.
pub struct FnGuest {
    imports: Vec<ImportRequest>,
    pages: u32,
    body: Box<dyn Fn(&mut Vm<'_>) -> Result<(), Trap> + Send + Sync>,
}

impl FnGuest {
    pub fn new(
        imports: Vec<ImportRequest>,
        body: impl Fn(&mut Vm<'_>) -> Result<(), Trap> + Send + Sync + 'static,
    ) -> Self {
        Self {
            imports,
            pages: layout::MIN_MEMORY_PAGES,
            body: Box::new(body),
        }
    }

    pub fn with_pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }
}

impl Guest for FnGuest {
    fn imports(&self) -> Vec<ImportRequest> {
        self.imports.clone()
    }

    fn memory_pages(&self) -> u32 {
        self.pages
    }

    fn run(&self, vm: &mut Vm<'_>) -> Result<(), Trap> {
        (self.body)(vm)
    }
}

/// Per-process execution environment shared read-only by every executor.
pub struct RunEnv {
    pub config: Config,
    pub resolver: Resolver,
    pub clock: Clock,
    pub queue: Arc<dyn Queue>,
    pub object_store: Arc<dyn ObjectStore>,
}

/// Everything owned by one in-flight call.
pub struct ModuleInstance {
    memory: Vec<u8>,
    pub fs: FileSystem,
    pub call: FunctionCall,
    pub captured_stdout: Vec<u8>,
}

impl ModuleInstance {
    pub fn new(call: FunctionCall, pages: u32, env: &RunEnv) -> Self {
        // Clamp to the 32-bit addressable range (65536 wasm pages).
        let pages = pages.clamp(layout::MIN_MEMORY_PAGES, 65536);
        let fs = FileSystem::new(
            env.config.shared_root.clone(),
            Some(Arc::clone(&env.object_store)),
        );
        Self {
            memory: vec![0; pages as usize * layout::WASM_PAGE_SIZE],
            fs,
            call,
            captured_stdout: Vec::new(),
        }
    }

    pub fn memory(&mut self) -> GuestMemory<'_> {
        GuestMemory::new(&mut self.memory)
    }

    /// Split borrow for scatter/gather hostcalls that need guest memory and
    /// the fd table at the same time.
    pub fn memory_and_fs(&mut self) -> (&mut [u8], &mut FileSystem) {
        (&mut self.memory, &mut self.fs)
    }

    /// As [`Self::memory_and_fs`], plus the stdout capture buffer.
    pub fn memory_fs_capture(&mut self) -> (&mut [u8], &mut FileSystem, &mut Vec<u8>) {
        (&mut self.memory, &mut self.fs, &mut self.captured_stdout)
    }

    /// Write the call input into the input region: little-endian u32 length,
    /// then the payload.
    pub fn stage_input(&mut self) -> Result<(), Trap> {
        let len = self.call.input.len();
        if len > layout::MAX_INPUT_PAYLOAD {
            return Err(Trap::internal(format!("input of {len} bytes exceeds region")));
        }
        let start = layout::INPUT_START;
        self.memory[start..start + 4].copy_from_slice(&(len as u32).to_le_bytes());
        self.memory[start + 4..start + 4 + len].copy_from_slice(&self.call.input);
        Ok(())
    }

    /// Read the guest's output back out of the output region, trusting the
    /// explicit length only after bounds-checking it.
    pub fn extract_output(&self) -> Result<Vec<u8>, Trap> {
        let start = layout::OUTPUT_START;
        let len = u32::from_le_bytes(self.memory[start..start + 4].try_into().unwrap()) as usize;
        if len > layout::MAX_OUTPUT_PAYLOAD {
            return Err(Trap::internal(format!(
                "guest declared {len} output bytes, limit is {}",
                layout::MAX_OUTPUT_PAYLOAD
            )));
        }
        Ok(self.memory[start + 4..start + 4 + len].to_vec())
    }

    /// Tear down into the finished call record. Native handles drop with
    /// the fd table here, on success and failure paths alike.
    pub fn into_call(self, capture_stdout: bool) -> FunctionCall {
        let mut call = self.call;
        if capture_stdout {
            call.captured_stdout = Some(self.captured_stdout);
        }
        call
    }
}

/// What a handler sees: the instance it is operating on plus the
/// process-wide environment.
pub struct CallCtx<'a> {
    pub instance: &'a mut ModuleInstance,
    pub env: &'a RunEnv,
}

impl CallCtx<'_> {
    pub fn memory(&mut self) -> GuestMemory<'_> {
        self.instance.memory()
    }

    pub fn capture_enabled(&self) -> bool {
        self.env.config.capture_stdout
    }
}

/// The guest's handle onto its instance during `run`: linear memory plus the
/// symbol-resolved import table.
pub struct Vm<'a> {
    instance: &'a mut ModuleInstance,
    env: &'a RunEnv,
    imports: Vec<Intrinsic>,
    cancel: &'a AtomicBool,
}

impl<'a> Vm<'a> {
    pub fn new(
        instance: &'a mut ModuleInstance,
        env: &'a RunEnv,
        imports: Vec<Intrinsic>,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            instance,
            env,
            imports,
            cancel,
        }
    }

    /// The guest's own loads and stores.
    pub fn memory(&mut self) -> GuestMemory<'_> {
        self.instance.memory()
    }

    /// Call through the resolved import table. Cancellation is cooperative
    /// and takes effect here, at the intrinsic boundary.
    pub fn invoke(&mut self, index: usize, args: &[Value]) -> Result<Option<Value>, Trap> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Trap::Cancelled);
        }
        let intrinsic = self
            .imports
            .get(index)
            .ok_or_else(|| Trap::internal(format!("import index {index} out of range")))?
            .clone();
        if args.len() != intrinsic.signature.params.len() {
            return Err(Trap::internal(format!(
                "import index {index} called with {} arguments, signature has {}",
                args.len(),
                intrinsic.signature.params.len()
            )));
        }
        let mut ctx = CallCtx {
            instance: &mut *self.instance,
            env: self.env,
        };
        (intrinsic.func)(&mut ctx, &Args(args))
    }
}

/// Resolve a guest's import list against the intrinsic table. Order in the
/// returned vector matches the guest's request order; indexes into it are
/// what [`Vm::invoke`] consumes.
pub fn resolve_imports(
    resolver: &Resolver,
    guest: &dyn Guest,
) -> Result<Vec<Intrinsic>, InstantiationError> {
    guest
        .imports()
        .iter()
        .map(|request| resolver.resolve(request).map(Intrinsic::clone))
        .collect()
}

/// Map a trap onto the status tag reported upstream.
pub fn status_for_trap(trap: &Trap) -> CallStatus {
    match trap {
        Trap::UnimplementedIntrinsic(_) => CallStatus::UnimplementedIntrinsic,
        Trap::Cancelled => CallStatus::Cancelled,
        Trap::MemoryFault => CallStatus::GuestFault,
        Trap::Internal(_) => CallStatus::InternalError,
    }
}
