//! Host-side core of the washost serverless WebAssembly runtime.
//!
//! The crate owns the host–guest boundary: the intrinsic dispatch layer,
//! the per-module virtual filesystem with its fd table and path masking,
//! the guest-memory accessor contract, and the function-chaining protocol.
//! The wasm engine itself and the storage/queue backends sit behind the
//! [`module::Guest`] and [`providers`] seams.

#![deny(trivial_numeric_casts, unused_extern_crates, unstable_features)]
#![warn(unused_import_braces)]

pub mod call;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod fdentry;
pub mod filesystem;
pub mod hostcalls;
pub mod layout;
pub mod memory;
pub mod module;
pub mod providers;
pub mod wasi;

pub use call::{CallStatus, FunctionCall};
pub use config::Config;
pub use error::{Error, WasiError};
pub use executor::{Executor, Loader, Worker};
pub use module::{FnGuest, Guest, ModuleInstance, RunEnv, Vm};

pub type Result<T> = std::result::Result<T, Error>;
