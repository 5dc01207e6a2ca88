//! The intrinsic surface imported by guests.
//!
//! Two import modules exist: `wasi_snapshot_preview1` for the WASI
//! filesystem/clock ABI and `env` for the libc-level and chaining
//! intrinsics. Handlers translate guest ABI arguments, call into the
//! module's filesystem or the providers, and hand errors back in the
//! convention each intrinsic documents: most return a positive WASI errno
//! (0 on success), the `env` syscall-style calls use the Linux negative
//! convention, and `chainFunction` returns a call id or zero.

use crate::dispatch::{Resolver, Signature, Trap, ValType, Value};
use crate::error::Error;

mod chain;
mod fs;
mod misc;

pub(crate) use ValType::{I32, I64, U32, U64};

/// The import module names the guest links against.
pub const WASI_MODULE: &str = "wasi_snapshot_preview1";
pub const ENV_MODULE: &str = "env";

pub(crate) fn sig(params: &[ValType], result: Option<ValType>) -> Signature {
    Signature::new(params, result)
}

/// Success in the positive-errno convention.
pub(crate) fn success() -> Result<Option<Value>, Trap> {
    Ok(Some(Value::I32(0)))
}

/// An errno in the positive-errno convention.
pub(crate) fn errno(err: Error) -> Result<Option<Value>, Trap> {
    Ok(Some(Value::I32(err.as_wasi_errno() as i32)))
}

/// Collapse a fallible body into the positive-errno convention.
pub(crate) fn errno_result(res: Result<(), Error>) -> Result<Option<Value>, Trap> {
    match res {
        Ok(()) => success(),
        Err(e) => errno(e),
    }
}

/// A value in the Linux sign convention: the value itself, or `-errno`.
pub(crate) fn linux_result(res: Result<i32, Error>) -> Result<Option<Value>, Trap> {
    let val = match res {
        Ok(v) => v,
        Err(e) => -(e.as_wasi_errno() as i32),
    };
    Ok(Some(Value::I32(val)))
}

macro_rules! unimplemented_intrinsic {
    ($fname:ident, $name:literal) => {
        pub(crate) fn $fname(
            _ctx: &mut $crate::module::CallCtx<'_>,
            _args: &$crate::dispatch::Args<'_>,
        ) -> Result<Option<$crate::dispatch::Value>, $crate::dispatch::Trap> {
            tracing::debug!(concat!("S - ", $name, " - unimplemented"));
            Err($crate::dispatch::Trap::UnimplementedIntrinsic($name))
        }
    };
}
pub(crate) use unimplemented_intrinsic;

/// Build the full intrinsic table. Called once per process; executors share
/// the result read-only.
pub fn register_all(resolver: &mut Resolver) -> anyhow::Result<()> {
    fs::register(resolver)?;
    misc::register(resolver)?;
    chain::register(resolver)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_table_registers_without_collisions() {
        let mut resolver = Resolver::new();
        register_all(&mut resolver).unwrap();
        assert!(resolver.len() > 40);
    }
}
