//! The chaining intrinsic: one guest invoking another through the host.
//!
//! Return convention: a nonzero call id on success, zero on rejection. A
//! rejected chain (bad name, oversized input, full chain list) leaves the
//! queue untouched and the call running.

use super::sig;
use super::I32;
use crate::dispatch::{Args, Resolver, Trap, Value};
use crate::layout::{MAX_INPUT_BYTES, MAX_NAME_LENGTH};
use crate::module::CallCtx;

pub(super) fn register(resolver: &mut Resolver) -> anyhow::Result<()> {
    resolver.define(
        super::ENV_MODULE,
        "chainFunction",
        sig(&[I32, I32, I32, I32], Some(I32)),
        chain_function,
    )?;
    Ok(())
}

fn rejected(reason: &str) -> Result<Option<Value>, Trap> {
    tracing::debug!("chain rejected: {}", reason);
    Ok(Some(Value::I32(0)))
}

pub(crate) fn chain_function(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let name_ptr = args.u32(0)?;
    let name_len = args.u32(1)?;
    let input_ptr = args.u32(2)?;
    let input_len = args.u32(3)?;
    tracing::debug!(
        "S - chainFunction - {} {} {} {}",
        name_ptr,
        name_len,
        input_ptr,
        input_len
    );

    if name_len == 0 || name_len as usize > MAX_NAME_LENGTH {
        return rejected("name length out of range");
    }
    // A chain-input slot is the full 1 MiB; there is no length prefix to
    // reserve space for.
    if input_len as usize > MAX_INPUT_BYTES {
        return rejected("input too large");
    }

    let (name, input) = {
        let mem = ctx.memory();
        let name = match mem.read_str(name_ptr, name_len) {
            Ok(s) => s.to_string(),
            Err(_) => return rejected("name is not valid utf-8 in bounds"),
        };
        let input = match mem.read_bytes(input_ptr, input_len) {
            Ok(b) => b,
            Err(_) => return rejected("input out of bounds"),
        };
        (name, input)
    };

    let call = &mut ctx.instance.call;
    let id = match call.add_chain(&name, input) {
        Ok(id) => id,
        Err(e) => return rejected(&e.to_string()),
    };

    // Publication order follows invocation order within this call; the
    // parent never blocks on the child.
    let child = call.child_call(&call.chains[id as usize - 1]);
    ctx.env
        .queue
        .push(child)
        .map_err(|e| Trap::internal(format!("queue publish failed: {e:#}")))?;

    tracing::debug!("chained {} as call {}", name, id);
    Ok(Some(Value::I32(id as i32)))
}
