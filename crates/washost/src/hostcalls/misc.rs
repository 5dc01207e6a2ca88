//! Clock, stdio-adjacent and libc-level intrinsics, plus the deliberate
//! stubs for operations outside the supported surface.

use super::{errno_result, sig, success, unimplemented_intrinsic};
use super::{I32, I64, U32};
use crate::dispatch::{Args, Resolver, Trap, Value};
use crate::module::CallCtx;
use std::io::Write;

pub(super) fn register(resolver: &mut Resolver) -> anyhow::Result<()> {
    let wasi = super::WASI_MODULE;
    resolver
        .define(wasi, "args_get", sig(&[I32, I32], Some(I32)), args_get)?
        .define(wasi, "args_sizes_get", sig(&[I32, I32], Some(I32)), args_sizes_get)?
        .define(wasi, "environ_get", sig(&[I32, I32], Some(I32)), environ_get)?
        .define(
            wasi,
            "environ_sizes_get",
            sig(&[I32, I32], Some(I32)),
            environ_sizes_get,
        )?
        .define(wasi, "clock_res_get", sig(&[I32, I32], Some(I32)), clock_res_get)?
        .define(
            wasi,
            "clock_time_get",
            sig(&[I32, I64, I32], Some(I32)),
            clock_time_get,
        )?
        .define(wasi, "proc_exit", sig(&[I32], None), proc_exit)?
        .define(
            wasi,
            "poll_oneoff",
            sig(&[I32, I32, I32, I32], Some(I32)),
            poll_oneoff,
        )?;

    let env = super::ENV_MODULE;
    resolver
        .define(env, "puts", sig(&[I32], Some(I32)), puts)?
        .define(env, "putc", sig(&[I32, I32], Some(I32)), putc)?
        .define(env, "vfprintf", sig(&[I32, U32, I32], Some(I32)), vfprintf)?
        .define(env, "bzero", sig(&[I32, I32], None), bzero)?
        .define(env, "explicit_bzero", sig(&[I32, I32], None), bzero)?
        .define(env, "clock_gettime", sig(&[I32, I32], Some(I32)), clock_gettime)?
        .define(env, "ioctl", sig(&[I32, I32, I32], Some(I32)), ioctl)?
        .define(
            env,
            "__syscall_ioctl",
            sig(&[I32, I32, I32, I32, I32, I32], Some(I32)),
            ioctl6,
        )?
        .define(env, "gethostbyname", sig(&[I32], Some(I32)), gethostbyname)?
        .define(env, "poll", sig(&[I32, I32, I32], Some(I32)), poll)?
        .define(env, "__syscall_exit_group", sig(&[I32], Some(I32)), exit_group)?
        .define(
            env,
            "__syscall_futex",
            sig(&[I32, I32, I32, I32, I32, I32], Some(I32)),
            futex,
        )?
        .define(env, "tempnam", sig(&[I32, I32], Some(I32)), tempnam)?
        .define(env, "lockf", sig(&[I32, I32, I64], Some(I32)), lockf)?
        .define(env, "sendfile", sig(&[I32, I32, I32, I32], Some(I32)), sendfile)?
        .define(env, "realpath", sig(&[I32, U32], Some(I32)), realpath)?
        .define(env, "dirfd", sig(&[I32], Some(I32)), dirfd)?
        .define(env, "umask", sig(&[I32], Some(I32)), umask)?
        .define(env, "tmpfile", sig(&[], Some(I32)), tmpfile)?
        .define(env, "memfd_create", sig(&[I32, I32], Some(I32)), memfd_create)?;
    Ok(())
}

/// No arguments or environment are passed to functions; both size calls
/// report zero and the copy calls have nothing to do.
pub(crate) fn args_get(_ctx: &mut CallCtx<'_>, _args: &Args<'_>) -> Result<Option<Value>, Trap> {
    success()
}

pub(crate) fn args_sizes_get(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let count_ptr = args.u32(0)?;
    let size_ptr = args.u32(1)?;
    let body = (|| {
        let mut mem = ctx.memory();
        mem.write_u32(count_ptr, 0)?;
        mem.write_u32(size_ptr, 0)?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn environ_get(_ctx: &mut CallCtx<'_>, _args: &Args<'_>) -> Result<Option<Value>, Trap> {
    success()
}

pub(crate) fn environ_sizes_get(
    ctx: &mut CallCtx<'_>,
    args: &Args<'_>,
) -> Result<Option<Value>, Trap> {
    args_sizes_get(ctx, args)
}

pub(crate) fn clock_res_get(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let _clock_id = args.i32(0)?;
    let res_ptr = args.u32(1)?;
    let resolution = ctx.env.clock.resolution_ns();
    errno_result(ctx.memory().write_u64(res_ptr, resolution))
}

pub(crate) fn clock_time_get(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let clock_id = args.i32(0)?;
    let _precision = args.i64(1)?;
    let res_ptr = args.u32(2)?;
    tracing::trace!("S - clock_time_get - {} {}", clock_id, res_ptr);
    let now = ctx.env.clock.now_ns();
    errno_result(ctx.memory().write_u64(res_ptr, now))
}

/// The libc-level clock intrinsic writes a 32-bit timespec.
pub(crate) fn clock_gettime(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let clock_id = args.i32(0)?;
    let res_ptr = args.u32(1)?;
    tracing::trace!("S - clock_gettime - {} {}", clock_id, res_ptr);
    let now = ctx.env.clock.now_ns();
    let body = (|| {
        let mut mem = ctx.memory();
        mem.write_i32(res_ptr, (now / 1_000_000_000) as i32)?;
        mem.write_i32(res_ptr + 4, (now % 1_000_000_000) as i32)?;
        Ok(())
    })();
    errno_result(body)
}

/// Assumes a NUL-terminated string, like its libc namesake.
pub(crate) fn puts(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let str_ptr = args.u32(0)?;
    tracing::debug!("S - puts - {}", str_ptr);
    let line = match ctx.memory().read_cstr(str_ptr) {
        Ok(s) => s.to_string(),
        Err(e) => return super::errno(e),
    };
    if ctx.capture_enabled() {
        ctx.instance.captured_stdout.extend_from_slice(line.as_bytes());
        ctx.instance.captured_stdout.push(b'\n');
    }
    println!("{line}");
    Ok(Some(Value::I32(0)))
}

pub(crate) fn putc(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let c = args.i32(0)?;
    let stream_ptr = args.i32(1)?;
    tracing::debug!("S - putc - {} {}", c, stream_ptr);
    if ctx.capture_enabled() {
        ctx.instance.captured_stdout.push(c as u8);
    }
    if let Err(e) = std::io::stdout().write_all(&[c as u8]) {
        tracing::debug!("stdout write failed: {}", e);
    }
    Ok(Some(Value::I32(0)))
}

/// Prints the raw format string without expanding varargs; enough for guest
/// debugging output, and documented as such.
pub(crate) fn vfprintf(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.i32(0)?;
    let format_ptr = args.u32(1)?;
    let _arg_list = args.i32(2)?;
    let format = match ctx.memory().read_cstr(format_ptr) {
        Ok(s) => s.to_string(),
        Err(e) => return super::errno(e),
    };
    tracing::debug!("S - vfprintf - {} {}", fd, format);
    if ctx.capture_enabled() {
        ctx.instance.captured_stdout.extend_from_slice(format.as_bytes());
        ctx.instance.captured_stdout.push(b'\n');
    }
    println!("{format}");
    Ok(Some(Value::I32(0)))
}

/// Void return; a bad range has no errno channel and is a guest fault.
pub(crate) fn bzero(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let ptr = args.u32(0)?;
    let len = args.u32(1)?;
    let mut mem = ctx.memory();
    let slice = mem.slice_mut(ptr, len).map_err(|_| Trap::MemoryFault)?;
    slice.fill(0);
    Ok(None)
}

pub(crate) fn ioctl(_ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    tracing::debug!("S - ioctl - {} {} {}", args.i32(0)?, args.i32(1)?, args.i32(2)?);
    Ok(Some(Value::I32(0)))
}

pub(crate) fn ioctl6(_ctx: &mut CallCtx<'_>, _args: &Args<'_>) -> Result<Option<Value>, Trap> {
    tracing::debug!("S - __syscall_ioctl");
    Ok(Some(Value::I32(0)))
}

/// Outbound name resolution is stubbed; guests get a null result.
pub(crate) fn gethostbyname(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let name_ptr = args.u32(0)?;
    if let Ok(name) = ctx.memory().read_cstr(name_ptr) {
        tracing::debug!("S - gethostbyname - {}", name);
    }
    Ok(Some(Value::I32(0)))
}

unimplemented_intrinsic!(proc_exit, "proc_exit");
unimplemented_intrinsic!(poll_oneoff, "poll_oneoff");
unimplemented_intrinsic!(poll, "poll");
unimplemented_intrinsic!(exit_group, "__syscall_exit_group");
unimplemented_intrinsic!(futex, "__syscall_futex");
unimplemented_intrinsic!(tempnam, "tempnam");
unimplemented_intrinsic!(lockf, "lockf");
unimplemented_intrinsic!(sendfile, "sendfile");
unimplemented_intrinsic!(realpath, "realpath");
unimplemented_intrinsic!(dirfd, "dirfd");
unimplemented_intrinsic!(umask, "umask");
unimplemented_intrinsic!(tmpfile, "tmpfile");
unimplemented_intrinsic!(memfd_create, "memfd_create");
