//! WASI filesystem intrinsics.

use super::{errno, errno_result, linux_result, sig, success, unimplemented_intrinsic};
use super::{I32, I64, U32, U64};
use crate::dispatch::{Args, Resolver, Trap, Value};
use crate::error::{Error, WasiError};
use crate::fdentry::{DirIterator, Stat};
use crate::memory::GuestMemory;
use crate::module::CallCtx;
use crate::wasi::{
    self, dirent_bytes, Fdflags, Lookupflags, Oflags, Rights, Whence, DIRCOOKIE_START,
    DIRENT_SIZE, PREOPENTYPE_DIR,
};
use std::io::{IoSlice, IoSliceMut};

pub(super) fn register(resolver: &mut Resolver) -> anyhow::Result<()> {
    let wasi = super::WASI_MODULE;
    resolver
        .define(wasi, "fd_prestat_get", sig(&[I32, I32], Some(I32)), fd_prestat_get)?
        .define(
            wasi,
            "fd_prestat_dir_name",
            sig(&[I32, I32, I32], Some(I32)),
            fd_prestat_dir_name,
        )?
        .define(
            wasi,
            "path_open",
            sig(&[I32, I32, I32, I32, U32, U64, U64, I32, I32], Some(I32)),
            path_open,
        )?
        .define(wasi, "fd_read", sig(&[I32, I32, I32, I32], Some(I32)), fd_read)?
        .define(wasi, "fd_write", sig(&[I32, I32, I32, I32], Some(I32)), fd_write)?
        .define(
            wasi,
            "fd_readdir",
            sig(&[I32, I32, I32, U64, I32], Some(I32)),
            fd_readdir,
        )?
        .define(wasi, "fd_seek", sig(&[I32, I64, I32, I32], Some(I32)), fd_seek)?
        .define(wasi, "fd_tell", sig(&[I32, I32], Some(I32)), fd_tell)?
        .define(wasi, "fd_close", sig(&[I32], Some(I32)), fd_close)?
        .define(wasi, "fd_fdstat_get", sig(&[I32, I32], Some(I32)), fd_fdstat_get)?
        .define(
            wasi,
            "fd_fdstat_set_flags",
            sig(&[I32, I32], Some(I32)),
            fd_fdstat_set_flags,
        )?
        .define(
            wasi,
            "fd_fdstat_set_rights",
            sig(&[I32, I64, I64], Some(I32)),
            fd_fdstat_set_rights,
        )?
        .define(wasi, "fd_filestat_get", sig(&[I32, I32], Some(I32)), fd_filestat_get)?
        .define(wasi, "fd_advise", sig(&[I32, I64, I64, I32], Some(I32)), fd_advise)?
        .define(
            wasi,
            "path_create_directory",
            sig(&[I32, I32, I32], Some(I32)),
            path_create_directory,
        )?
        .define(
            wasi,
            "path_rename",
            sig(&[I32, I32, I32, I32, I32, I32], Some(I32)),
            path_rename,
        )?
        .define(
            wasi,
            "path_unlink_file",
            sig(&[I32, I32, I32], Some(I32)),
            path_unlink_file,
        )?
        .define(
            wasi,
            "path_readlink",
            sig(&[I32, I32, I32, I32, I32, I32], Some(I32)),
            path_readlink,
        )?
        .define(
            wasi,
            "path_filestat_get",
            sig(&[I32, I32, I32, I32, I32], Some(I32)),
            path_filestat_get,
        )?
        .define(wasi, "fd_renumber", sig(&[I32, I32], Some(I32)), fd_renumber)?
        .define(wasi, "fd_datasync", sig(&[I32], Some(I32)), fd_datasync)?
        .define(wasi, "fd_sync", sig(&[I32], Some(I32)), fd_sync)?
        .define(wasi, "fd_allocate", sig(&[I32, I64, I64], Some(I32)), fd_allocate)?
        .define(
            wasi,
            "fd_pread",
            sig(&[I32, I32, I32, I64, I32], Some(I32)),
            fd_pread,
        )?
        .define(
            wasi,
            "fd_pwrite",
            sig(&[I32, I32, I32, I64, I32], Some(I32)),
            fd_pwrite,
        )?
        .define(
            wasi,
            "fd_filestat_set_size",
            sig(&[I32, I64], Some(I32)),
            fd_filestat_set_size,
        )?
        .define(
            wasi,
            "fd_filestat_set_times",
            sig(&[I32, I64, I64, I32], Some(I32)),
            fd_filestat_set_times,
        )?
        .define(
            wasi,
            "path_filestat_set_times",
            sig(&[I32, I32, I32, I32, I64, I64, I32], Some(I32)),
            path_filestat_set_times,
        )?
        .define(
            wasi,
            "path_link",
            sig(&[I32, I32, I32, I32, I32, I32, I32], Some(I32)),
            path_link,
        )?
        .define(
            wasi,
            "path_symlink",
            sig(&[I32, I32, I32, I32, I32], Some(I32)),
            path_symlink,
        )?
        .define(
            wasi,
            "path_remove_directory",
            sig(&[I32, I32, I32], Some(I32)),
            path_remove_directory,
        )?;

    let env = super::ENV_MODULE;
    resolver
        .define(env, "dup", sig(&[I32], Some(I32)), env_dup)?
        .define(env, "__syscall_writev", sig(&[I32, I32, I32], Some(I32)), syscall_writev)?;
    Ok(())
}

/// Serialise a [`Stat`] into the guest `filestat` layout. The pointer must
/// be 8-aligned, which every field write below checks.
fn write_filestat(mem: &mut GuestMemory<'_>, ptr: u32, stat: &Stat) -> Result<(), Error> {
    mem.write_u64(ptr, stat.dev)?;
    mem.write_u64(ptr + 8, stat.ino)?;
    mem.write_u64(ptr + 16, stat.filetype_raw as u64)?;
    mem.write_u64(ptr + 24, stat.nlink)?;
    mem.write_u64(ptr + 32, stat.size)?;
    mem.write_u64(ptr + 40, stat.atim)?;
    mem.write_u64(ptr + 48, stat.mtim)?;
    mem.write_u64(ptr + 56, stat.ctim)?;
    Ok(())
}

pub(crate) fn fd_prestat_get(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let res_ptr = args.u32(1)?;
    tracing::trace!("S - fd_prestat_get - {} {}", fd, res_ptr);

    let body = (|| {
        let (name_len, is_preopen) = {
            let entry = ctx.instance.fs.get(fd)?;
            (entry.virtual_path.len(), entry.is_preopen)
        };
        if !is_preopen {
            return Err(WasiError::EBADF.into());
        }
        let mut mem = ctx.memory();
        mem.write_u8(res_ptr, PREOPENTYPE_DIR)?;
        mem.write_u32(res_ptr + 4, name_len as u32)?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn fd_prestat_dir_name(
    ctx: &mut CallCtx<'_>,
    args: &Args<'_>,
) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let buf_ptr = args.u32(1)?;
    let buf_len = args.u32(2)?;
    tracing::trace!("S - fd_prestat_dir_name - {} {} {}", fd, buf_ptr, buf_len);

    let body = (|| {
        let path = {
            let entry = ctx.instance.fs.get(fd)?;
            if !entry.is_preopen {
                return Err(WasiError::EBADF.into());
            }
            entry.virtual_path.clone()
        };
        if path.len() > buf_len as usize {
            return Err(WasiError::ENAMETOOLONG.into());
        }
        ctx.memory().write_bytes(buf_ptr, path.as_bytes())?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn path_open(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let root_fd = args.u32(0)?;
    let lookup_flags = Lookupflags::from_bits_truncate(args.u32(1)?);
    let path_ptr = args.u32(2)?;
    let path_len = args.u32(3)?;
    let open_flags = Oflags::from_bits_truncate(args.u32(4)? as u16);
    let rights_base = Rights::from_bits_truncate(args.u64(5)?);
    let rights_inheriting = Rights::from_bits_truncate(args.u64(6)?);
    let fd_flags = Fdflags::from_bits_truncate(args.u32(7)? as u16);
    let res_fd_ptr = args.u32(8)?;

    let body = (|| {
        let path = ctx.memory().read_str(path_ptr, path_len)?.to_string();
        tracing::debug!(
            "S - path_open - {} {:?} {} {:?} {:?}",
            root_fd,
            lookup_flags,
            path,
            open_flags,
            fd_flags
        );
        let new_fd = ctx.instance.fs.open(
            root_fd,
            &path,
            rights_base,
            rights_inheriting,
            lookup_flags,
            open_flags,
            fd_flags,
        )?;
        ctx.memory().write_u32(res_fd_ptr, new_fd)?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn fd_read(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let iovs_ptr = args.u32(1)?;
    let iovs_len = args.u32(2)?;
    let res_ptr = args.u32(3)?;
    tracing::trace!(
        "S - fd_read - {} {} {} ({})",
        fd,
        iovs_ptr,
        iovs_len,
        ctx.instance.fs.path_for_fd(fd)
    );

    let body = (|| {
        let (bytes, fs) = ctx.instance.memory_and_fs();
        let ranges = GuestMemory::new(&mut *bytes).iovecs(iovs_ptr, iovs_len)?;
        let pieces = crate::memory::disjoint_slices_mut(&mut *bytes, &ranges)?;
        let mut slices: Vec<IoSliceMut<'_>> = pieces.into_iter().map(IoSliceMut::new).collect();
        let n = fs.readv(fd, &mut slices)?;
        drop(slices);
        GuestMemory::new(&mut *bytes).write_u32(res_ptr, n as u32)?;
        Ok(())
    })();
    errno_result(body)
}

/// Shared gather-write path for `fd_write` and `__syscall_writev`; returns
/// the byte count so each caller can apply its own return convention.
fn do_gather_write(ctx: &mut CallCtx<'_>, fd: u32, iovs_ptr: u32, iovs_len: u32) -> Result<usize, Error> {
    let capture_on = ctx.capture_enabled();
    let (bytes, fs, capture) = ctx.instance.memory_fs_capture();
    let ranges = GuestMemory::new(&mut *bytes).iovecs(iovs_ptr, iovs_len)?;
    let n = {
        let raw: &[u8] = bytes;
        let slices: Vec<IoSlice<'_>> = ranges
            .iter()
            .map(|r| IoSlice::new(&raw[r.base..r.base + r.len]))
            .collect();
        fs.writev(fd, &slices)?
    };
    // Stdout capture mirrors whatever went to the stdio descriptors.
    if capture_on && fd <= wasi::STDERR_FD {
        let mut remaining = n;
        for r in &ranges {
            let take = remaining.min(r.len);
            capture.extend_from_slice(&bytes[r.base..r.base + take]);
            remaining -= take;
            if remaining == 0 {
                break;
            }
        }
    }
    Ok(n)
}

pub(crate) fn fd_write(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let iovs_ptr = args.u32(1)?;
    let iovs_len = args.u32(2)?;
    let res_ptr = args.u32(3)?;
    tracing::trace!(
        "S - fd_write - {} {} {} ({})",
        fd,
        iovs_ptr,
        iovs_len,
        ctx.instance.fs.path_for_fd(fd)
    );

    let body = (|| {
        let n = do_gather_write(ctx, fd, iovs_ptr, iovs_len)?;
        ctx.memory().write_u32(res_ptr, n as u32)?;
        Ok(())
    })();
    errno_result(body)
}

/// Linux sign convention: byte count, or `-errno`.
pub(crate) fn syscall_writev(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let iovs_ptr = args.u32(1)?;
    let iovs_len = args.u32(2)?;
    tracing::trace!("S - __syscall_writev - {} {} {}", fd, iovs_ptr, iovs_len);
    linux_result(do_gather_write(ctx, fd, iovs_ptr, iovs_len).map(|n| n as i32))
}

pub(crate) fn fd_readdir(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let buf_ptr = args.u32(1)?;
    let buf_len = args.u32(2)?;
    let cookie = args.u64(3)?;
    let res_ptr = args.u32(4)?;
    tracing::trace!(
        "S - fd_readdir - {} {} {} {} {}",
        fd,
        buf_ptr,
        buf_len,
        cookie,
        res_ptr
    );

    let started = match ctx.instance.fs.get(fd) {
        Ok(entry) => entry.dir_iter.is_some(),
        Err(e) => return errno(e),
    };
    let is_start = cookie == DIRCOOKIE_START;
    if started && is_start {
        // Restarting a live iterator is a guest error.
        return errno(WasiError::EINVAL.into());
    }
    if !started && !is_start {
        // A continuation cookie without an iterator means the host and
        // guest have lost sync; there is no safe recovery.
        return Err(Trap::internal(
            "no directory iterator exists, and this is not the start cookie",
        ));
    }

    let body = (|| {
        if !started {
            let entries = ctx.instance.fs.dir_entries(fd)?;
            ctx.instance.fs.get_mut(fd)?.dir_iter = Some(DirIterator::new(entries));
        }

        let (bytes, fs) = ctx.instance.memory_and_fs();
        let mut mem = GuestMemory::new(&mut *bytes);
        // Validate the whole buffer up front so a partial fill cannot fault.
        mem.slice_mut(buf_ptr, buf_len)?;

        let entry = fs.get_mut(fd)?;
        entry.check_rights(Rights::FD_READDIR)?;
        let iter = entry
            .dir_iter
            .as_mut()
            .ok_or(WasiError::EBADF)?;
        if !is_start {
            iter.seek_to(cookie)?;
        }

        // Fill whole entries only; stop before the first one that would
        // overflow. The cursor advances past exactly the entries written.
        let mut buf_used = 0usize;
        while iter.cursor < iter.entries.len() {
            let rec = &iter.entries[iter.cursor];
            let total = DIRENT_SIZE + rec.name.len();
            if buf_used + total > buf_len as usize {
                break;
            }
            let header = dirent_bytes(
                (iter.cursor + 1) as u64,
                rec.ino,
                rec.name.len() as u32,
                rec.filetype,
            );
            mem.write_bytes(buf_ptr + buf_used as u32, &header)?;
            mem.write_bytes(
                buf_ptr + (buf_used + DIRENT_SIZE) as u32,
                rec.name.as_bytes(),
            )?;
            buf_used += total;
            iter.cursor += 1;
        }
        mem.write_u32(res_ptr, buf_used as u32)?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn fd_seek(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let offset = args.i64(1)?;
    let whence_raw = args.i32(2)?;
    let res_ptr = args.u32(3)?;
    tracing::trace!("S - fd_seek - {} {} {} {}", fd, offset, whence_raw, res_ptr);

    let body = (|| {
        let whence = Whence::from_raw(whence_raw).ok_or(WasiError::EINVAL)?;
        let new_offset = ctx.instance.fs.seek(fd, offset, whence)?;
        ctx.memory().write_u64(res_ptr, new_offset)?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn fd_tell(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let res_ptr = args.u32(1)?;
    tracing::trace!("S - fd_tell - {} {}", fd, res_ptr);

    let body = (|| {
        let offset = ctx.instance.fs.tell(fd)?;
        ctx.memory().write_u64(res_ptr, offset)?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn fd_close(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    tracing::debug!("S - fd_close - {}", fd);
    errno_result(ctx.instance.fs.close(fd))
}

pub(crate) fn fd_fdstat_get(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let stat_ptr = args.u32(1)?;
    tracing::debug!(
        "S - fd_fdstat_get - {} {} ({})",
        fd,
        stat_ptr,
        ctx.instance.fs.path_for_fd(fd)
    );

    let body = (|| {
        let (file_type, flags, base, inheriting) = {
            let entry = ctx.instance.fs.get(fd)?;
            (
                entry.file_type as u8,
                entry.fd_flags.bits(),
                entry.rights_base.bits(),
                entry.rights_inheriting.bits(),
            )
        };
        let mut mem = ctx.memory();
        mem.write_u8(stat_ptr, file_type)?;
        mem.write_u8(stat_ptr + 1, 0)?;
        mem.write_bytes(stat_ptr + 2, &flags.to_le_bytes())?;
        mem.write_u32(stat_ptr + 4, 0)?;
        mem.write_u64(stat_ptr + 8, base)?;
        mem.write_u64(stat_ptr + 16, inheriting)?;
        Ok(())
    })();
    errno_result(body)
}

pub(crate) fn fd_fdstat_set_flags(
    ctx: &mut CallCtx<'_>,
    args: &Args<'_>,
) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let flags = Fdflags::from_bits_truncate(args.u32(1)? as u16);
    tracing::debug!("S - fd_fdstat_set_flags - {} {:?}", fd, flags);
    errno_result(ctx.instance.fs.set_fd_flags(fd, flags))
}

pub(crate) fn fd_filestat_get(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let stat_ptr = args.u32(1)?;
    tracing::debug!("S - fd_filestat_get - {} {}", fd, stat_ptr);

    let body = (|| {
        let stat = ctx.instance.fs.filestat(fd)?;
        write_filestat(&mut ctx.memory(), stat_ptr, &stat)
    })();
    errno_result(body)
}

pub(crate) fn path_filestat_get(
    ctx: &mut CallCtx<'_>,
    args: &Args<'_>,
) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let lookup_flags = Lookupflags::from_bits_truncate(args.u32(1)?);
    let path_ptr = args.u32(2)?;
    let path_len = args.u32(3)?;
    let stat_ptr = args.u32(4)?;

    let body = (|| {
        let path = ctx.memory().read_str(path_ptr, path_len)?.to_string();
        tracing::trace!("S - path_filestat_get - {} {} {}", fd, path, stat_ptr);
        let follow = lookup_flags.contains(Lookupflags::SYMLINK_FOLLOW);
        let stat = ctx.instance.fs.filestat_at(fd, &path, follow)?;
        write_filestat(&mut ctx.memory(), stat_ptr, &stat)
    })();
    errno_result(body)
}

/// Ignore fadvise; nothing useful to do with it.
pub(crate) fn fd_advise(_ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    tracing::debug!(
        "S - fd_advise - {} {} {} {}",
        args.u32(0)?,
        args.i64(1)?,
        args.i64(2)?,
        args.i32(3)?
    );
    success()
}

pub(crate) fn path_create_directory(
    ctx: &mut CallCtx<'_>,
    args: &Args<'_>,
) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let path_ptr = args.u32(1)?;
    let path_len = args.u32(2)?;

    let body = (|| {
        let path = ctx.memory().read_str(path_ptr, path_len)?.to_string();
        tracing::debug!("S - path_create_directory - {} {}", fd, path);
        ctx.instance.fs.create_dir(fd, &path)
    })();
    errno_result(body)
}

pub(crate) fn path_rename(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let old_fd = args.u32(0)?;
    let old_ptr = args.u32(1)?;
    let old_len = args.u32(2)?;
    let new_fd = args.u32(3)?;
    let new_ptr = args.u32(4)?;
    let new_len = args.u32(5)?;

    let body = (|| {
        let (old_path, new_path) = {
            let mem = ctx.memory();
            (
                mem.read_str(old_ptr, old_len)?.to_string(),
                mem.read_str(new_ptr, new_len)?.to_string(),
            )
        };
        tracing::debug!(
            "S - path_rename - {} {} {} {}",
            old_fd,
            old_path,
            new_fd,
            new_path
        );
        ctx.instance.fs.rename(old_fd, &old_path, new_fd, &new_path)
    })();
    errno_result(body)
}

pub(crate) fn path_unlink_file(
    ctx: &mut CallCtx<'_>,
    args: &Args<'_>,
) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let path_ptr = args.u32(1)?;
    let path_len = args.u32(2)?;

    let body = (|| {
        let path = ctx.memory().read_str(path_ptr, path_len)?.to_string();
        tracing::debug!("S - path_unlink_file - {} {}", fd, path);
        ctx.instance.fs.unlink_file(fd, &path)
    })();
    errno_result(body)
}

pub(crate) fn path_readlink(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    let path_ptr = args.u32(1)?;
    let path_len = args.u32(2)?;
    let buf_ptr = args.u32(3)?;
    let buf_len = args.u32(4)?;
    let res_ptr = args.u32(5)?;

    let body = (|| {
        let path = ctx.memory().read_str(path_ptr, path_len)?.to_string();
        tracing::debug!("S - path_readlink - {} {} {} {}", fd, path, buf_ptr, buf_len);
        let target = ctx.instance.fs.readlink(fd, &path)?;
        let n = target.len().min(buf_len as usize);
        let mut mem = ctx.memory();
        mem.write_bytes(buf_ptr, &target[..n])?;
        mem.write_u32(res_ptr, n as u32)?;
        Ok(())
    })();
    errno_result(body)
}

/// `env.dup`, Linux sign convention: the new fd, or `-errno`.
pub(crate) fn env_dup(ctx: &mut CallCtx<'_>, args: &Args<'_>) -> Result<Option<Value>, Trap> {
    let fd = args.u32(0)?;
    tracing::debug!("S - dup - {}", fd);
    linux_result(ctx.instance.fs.dup(fd).map(|fd| fd as i32))
}

unimplemented_intrinsic!(fd_fdstat_set_rights, "fd_fdstat_set_rights");
unimplemented_intrinsic!(fd_renumber, "fd_renumber");
unimplemented_intrinsic!(fd_datasync, "fd_datasync");
unimplemented_intrinsic!(fd_sync, "fd_sync");
unimplemented_intrinsic!(fd_allocate, "fd_allocate");
unimplemented_intrinsic!(fd_pread, "fd_pread");
unimplemented_intrinsic!(fd_pwrite, "fd_pwrite");
unimplemented_intrinsic!(fd_filestat_set_size, "fd_filestat_set_size");
unimplemented_intrinsic!(fd_filestat_set_times, "fd_filestat_set_times");
unimplemented_intrinsic!(path_filestat_set_times, "path_filestat_set_times");
unimplemented_intrinsic!(path_link, "path_link");
unimplemented_intrinsic!(path_symlink, "path_symlink");
unimplemented_intrinsic!(path_remove_directory, "path_remove_directory");
