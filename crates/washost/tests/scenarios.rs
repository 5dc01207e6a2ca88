//! End-to-end scenarios driving scripted guests through the full stack:
//! executor, intrinsic dispatch, virtual filesystem and chaining.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use washost::clock::{Clock, ClockMode};
use washost::dispatch::{ImportRequest, Resolver, Trap, ValType, Value};
use washost::layout;
use washost::module::{FnGuest, RunEnv, Vm};
use washost::providers::{MemoryObjectStore, MemoryQueue};
use washost::wasi::{self, Rights, DIRENT_SIZE};
use washost::{hostcalls, CallStatus, Config, Executor, FunctionCall};

use ValType::{I32, U32, U64};

/// The preopen descriptor guests discover through `fd_prestat_get`.
const ROOT_FD: i32 = 3;

fn test_env(
    root: &Path,
    capture_stdout: bool,
) -> (Arc<RunEnv>, Arc<MemoryQueue>, Arc<MemoryObjectStore>) {
    let queue = Arc::new(MemoryQueue::new());
    let object_store = Arc::new(MemoryObjectStore::new());
    let mut resolver = Resolver::new();
    hostcalls::register_all(&mut resolver).unwrap();
    let env = Arc::new(RunEnv {
        config: Config {
            shared_root: root.to_path_buf(),
            capture_stdout,
            ..Config::default()
        },
        resolver,
        clock: Clock::new(ClockMode::Fake),
        queue: queue.clone(),
        object_store: object_store.clone(),
    });
    (env, queue, object_store)
}

fn run(env: &Arc<RunEnv>, guest: &FnGuest, call: FunctionCall) -> FunctionCall {
    Executor::new(Arc::clone(env)).execute(guest, call)
}

fn ret_i32(ret: Option<Value>) -> i32 {
    match ret {
        Some(Value::I32(v)) => v,
        other => panic!("expected i32 return, got {other:?}"),
    }
}

fn write_guest_bytes(vm: &mut Vm<'_>, ptr: u32, bytes: &[u8]) -> Result<(), Trap> {
    vm.memory()
        .write_bytes(ptr, bytes)
        .map_err(|_| Trap::MemoryFault)
}

#[test]
fn echo_copies_input_to_output() {
    let root = tempfile::tempdir().unwrap();
    let (env, _queue, _store) = test_env(root.path(), false);

    let guest = FnGuest::new(vec![], |vm| {
        let mut mem = vm.memory();
        let len = mem.read_u32(layout::INPUT_START as u32).unwrap();
        let input = mem.read_bytes(layout::INPUT_START as u32 + 4, len).unwrap();
        mem.write_u32(layout::OUTPUT_START as u32, len).unwrap();
        mem.write_bytes(layout::OUTPUT_START as u32 + 4, &input)
            .unwrap();
        Ok(())
    });
    let call = FunctionCall::new("alice", "echo", b"hello".to_vec()).unwrap();
    let finished = run(&env, &guest, call);

    assert_eq!(finished.status, CallStatus::Success);
    assert_eq!(finished.output, b"hello");
}

#[test]
fn two_chain_fanout_publishes_in_order() {
    let root = tempfile::tempdir().unwrap();
    let (env, queue, _store) = test_env(root.path(), false);

    let imports = vec![ImportRequest::new(
        "env",
        "chainFunction",
        &[I32, I32, I32, I32],
        Some(I32),
    )];
    let pages = ((layout::CHAIN_DATA_START + 2 * layout::MAX_INPUT_BYTES)
        / layout::WASM_PAGE_SIZE) as u32
        + 1;

    let guest = FnGuest::new(imports, |vm| {
        // Stage name and input through the chain tables, the way the SDK
        // does, then hand their addresses to the intrinsic.
        for (slot, input) in [b"a", b"b"].iter().enumerate() {
            let name_ptr = (layout::CHAIN_NAMES_START + slot * layout::MAX_NAME_LENGTH) as u32;
            let input_ptr = (layout::CHAIN_DATA_START + slot * layout::MAX_INPUT_BYTES) as u32;
            write_guest_bytes(vm, name_ptr, b"child")?;
            write_guest_bytes(vm, input_ptr, *input)?;
            let id = ret_i32(vm.invoke(
                0,
                &[
                    Value::I32(name_ptr as i32),
                    Value::I32(5),
                    Value::I32(input_ptr as i32),
                    Value::I32(1),
                ],
            )?);
            assert_eq!(id, slot as i32 + 1);
        }
        Ok(())
    })
    .with_pages(pages);

    let call = FunctionCall::new("alice", "parent", vec![]).unwrap();
    let finished = run(&env, &guest, call);

    assert_eq!(finished.status, CallStatus::Success);
    assert_eq!(finished.chains.len(), 2);

    let published = queue.drain_calls();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].function, "child");
    assert_eq!(published[0].input, b"a");
    assert_eq!(published[1].function, "child");
    assert_eq!(published[1].input, b"b");
    assert_eq!(published[0].user, "alice");
}

#[test]
fn oversized_chain_name_is_rejected_without_enqueue() {
    let root = tempfile::tempdir().unwrap();
    let (env, queue, _store) = test_env(root.path(), false);

    let imports = vec![ImportRequest::new(
        "env",
        "chainFunction",
        &[I32, I32, I32, I32],
        Some(I32),
    )];
    let guest = FnGuest::new(imports, |vm| {
        let name_ptr = 0x1000;
        write_guest_bytes(vm, name_ptr, &[b'x'; 21])?;
        let id = ret_i32(vm.invoke(
            0,
            &[
                Value::I32(name_ptr as i32),
                Value::I32(21),
                Value::I32(0),
                Value::I32(0),
            ],
        )?);
        assert_eq!(id, 0);
        Ok(())
    });

    let finished = run(&env, &guest, FunctionCall::new("u", "parent", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::Success);
    assert!(finished.chains.is_empty());
    assert!(queue.drain_calls().is_empty());
}

/// Walk `fd_prestat_get` the way wasi-libc discovers preopens.
#[test]
fn preopen_discovery_ends_with_ebadf() {
    let root = tempfile::tempdir().unwrap();
    let (env, _queue, _store) = test_env(root.path(), false);

    let imports = vec![
        ImportRequest::new("wasi_snapshot_preview1", "fd_prestat_get", &[I32, I32], Some(I32)),
        ImportRequest::new(
            "wasi_snapshot_preview1",
            "fd_prestat_dir_name",
            &[I32, I32, I32],
            Some(I32),
        ),
    ];
    let found = Arc::new(Mutex::new(Vec::new()));
    let found_in_guest = Arc::clone(&found);

    let guest = FnGuest::new(imports, move |vm| {
        let prestat_ptr = 0x100;
        let name_ptr = 0x200;
        let mut fd = ROOT_FD;
        loop {
            let errno = ret_i32(vm.invoke(
                0,
                &[Value::I32(fd), Value::I32(prestat_ptr)],
            )?);
            if errno == washost::WasiError::EBADF as i32 {
                break;
            }
            assert_eq!(errno, 0);
            let (tag, name_len) = {
                let mem = vm.memory();
                (
                    mem.read_u8(prestat_ptr as u32).unwrap(),
                    mem.read_u32(prestat_ptr as u32 + 4).unwrap(),
                )
            };
            assert_eq!(tag, wasi::PREOPENTYPE_DIR);
            let errno = ret_i32(vm.invoke(
                1,
                &[Value::I32(fd), Value::I32(name_ptr), Value::I32(name_len as i32)],
            )?);
            assert_eq!(errno, 0);
            let name = vm
                .memory()
                .read_bytes(name_ptr as u32, name_len)
                .unwrap();
            found_in_guest
                .lock()
                .unwrap()
                .push(String::from_utf8(name).unwrap());
            fd += 1;
        }
        Ok(())
    });

    let finished = run(&env, &guest, FunctionCall::new("u", "ls", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::Success);
    assert_eq!(*found.lock().unwrap(), vec!["/".to_string()]);
}

#[test]
fn directory_listing_streams_each_entry_exactly_once() {
    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("data");
    std::fs::create_dir(&data).unwrap();
    for i in 0..300 {
        std::fs::write(data.join(format!("file-{i:03}")), b"x").unwrap();
    }
    let (env, _queue, _store) = test_env(root.path(), false);

    let imports = vec![
        ImportRequest::new(
            "wasi_snapshot_preview1",
            "path_open",
            &[I32, I32, I32, I32, U32, U64, U64, I32, I32],
            Some(I32),
        ),
        ImportRequest::new(
            "wasi_snapshot_preview1",
            "fd_readdir",
            &[I32, I32, I32, U64, I32],
            Some(I32),
        ),
    ];

    let names = Arc::new(Mutex::new(Vec::new()));
    let names_in_guest = Arc::clone(&names);

    const BUF_LEN: u32 = 4096;
    let guest = FnGuest::new(imports, move |vm| {
        let path_ptr = 0x100u32;
        let res_fd_ptr = 0x180u32;
        let buf_ptr = 0x1000u32;
        let res_size_ptr = 0x188u32;

        write_guest_bytes(vm, path_ptr, b"data")?;
        let errno = ret_i32(vm.invoke(
            0,
            &[
                Value::I32(ROOT_FD),
                Value::I32(0),
                Value::I32(path_ptr as i32),
                Value::I32(4),
                Value::U32(wasi::Oflags::DIRECTORY.bits() as u32),
                Value::U64(Rights::all().bits()),
                Value::U64(Rights::all().bits()),
                Value::I32(0),
                Value::I32(res_fd_ptr as i32),
            ],
        )?);
        assert_eq!(errno, 0);
        let dir_fd = vm.memory().read_u32(res_fd_ptr).unwrap() as i32;

        let mut cookie = wasi::DIRCOOKIE_START;
        loop {
            let errno = ret_i32(vm.invoke(
                1,
                &[
                    Value::I32(dir_fd),
                    Value::I32(buf_ptr as i32),
                    Value::I32(BUF_LEN as i32),
                    Value::U64(cookie),
                    Value::I32(res_size_ptr as i32),
                ],
            )?);
            assert_eq!(errno, 0);
            let used = vm.memory().read_u32(res_size_ptr).unwrap();

            // Parse the dirents we were handed.
            let mut offset = 0u32;
            while offset < used {
                let mem = vm.memory();
                let header = mem.read_bytes(buf_ptr + offset, DIRENT_SIZE as u32).unwrap();
                let next = u64::from_le_bytes(header[0..8].try_into().unwrap());
                let namlen = u32::from_le_bytes(header[16..20].try_into().unwrap());
                let name = mem
                    .read_bytes(buf_ptr + offset + DIRENT_SIZE as u32, namlen)
                    .unwrap();
                names_in_guest
                    .lock()
                    .unwrap()
                    .push(String::from_utf8(name).unwrap());
                cookie = next;
                offset += DIRENT_SIZE as u32 + namlen;
            }

            if used < BUF_LEN {
                break;
            }
        }
        Ok(())
    });

    let finished = run(&env, &guest, FunctionCall::new("u", "ls", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::Success);

    let names = names.lock().unwrap();
    assert_eq!(names.len(), 300);
    let unique: HashSet<_> = names.iter().collect();
    assert_eq!(unique.len(), 300, "every entry must appear exactly once");
}

#[test]
fn path_escape_returns_notcapable_and_touches_nothing() {
    let root = tempfile::tempdir().unwrap();
    let (env, _queue, _store) = test_env(root.path(), false);

    let imports = vec![ImportRequest::new(
        "wasi_snapshot_preview1",
        "path_open",
        &[I32, I32, I32, I32, U32, U64, U64, I32, I32],
        Some(I32),
    )];
    let guest = FnGuest::new(imports, |vm| {
        let path = b"../etc/passwd";
        let path_ptr = 0x100u32;
        write_guest_bytes(vm, path_ptr, path)?;
        let errno = ret_i32(vm.invoke(
            0,
            &[
                Value::I32(ROOT_FD),
                Value::I32(0),
                Value::I32(path_ptr as i32),
                Value::I32(path.len() as i32),
                Value::U32(0),
                Value::U64(Rights::all().bits()),
                Value::U64(0),
                Value::I32(0),
                Value::I32(0x200),
            ],
        )?);
        assert_eq!(errno, washost::WasiError::ENOTCAPABLE as i32);
        Ok(())
    });

    let finished = run(&env, &guest, FunctionCall::new("u", "esc", vec![]).unwrap());
    // The guest sees the errno and carries on; the call itself succeeds.
    assert_eq!(finished.status, CallStatus::Success);
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn stdout_capture_collects_printf_family() {
    let root = tempfile::tempdir().unwrap();
    let (env, _queue, _store) = test_env(root.path(), true);

    let imports = vec![
        ImportRequest::new("env", "puts", &[I32], Some(I32)),
        ImportRequest::new("env", "putc", &[I32, I32], Some(I32)),
        ImportRequest::new("env", "vfprintf", &[I32, U32, I32], Some(I32)),
    ];
    let guest = FnGuest::new(imports, |vm| {
        let str_ptr = 0x100u32;
        write_guest_bytes(vm, str_ptr, b"trace\0")?;
        let ret = ret_i32(vm.invoke(0, &[Value::I32(str_ptr as i32)])?);
        assert_eq!(ret, 0);

        let ret = ret_i32(vm.invoke(1, &[Value::I32(b'!' as i32), Value::I32(0)])?);
        assert_eq!(ret, 0);

        let fmt_ptr = 0x200u32;
        write_guest_bytes(vm, fmt_ptr, b"done\0")?;
        let ret = ret_i32(vm.invoke(
            2,
            &[Value::I32(1), Value::U32(fmt_ptr), Value::I32(0)],
        )?);
        assert_eq!(ret, 0);
        Ok(())
    });

    let finished = run(&env, &guest, FunctionCall::new("u", "log", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::Success);
    assert_eq!(
        finished.captured_stdout.as_deref(),
        Some(&b"trace\n!done\n"[..])
    );
}

#[test]
fn unimplemented_intrinsic_fails_the_call_without_output() {
    let root = tempfile::tempdir().unwrap();
    let (env, queue, _store) = test_env(root.path(), false);

    let imports = vec![ImportRequest::new("env", "poll", &[I32, I32, I32], Some(I32))];
    let guest = FnGuest::new(imports, |vm| {
        // Stage some output first; a failing call must not publish it.
        vm.memory()
            .write_u32(layout::OUTPUT_START as u32, 4)
            .unwrap();
        vm.memory()
            .write_bytes(layout::OUTPUT_START as u32 + 4, b"data")
            .unwrap();
        vm.invoke(0, &[Value::I32(0), Value::I32(0), Value::I32(0)])?;
        Ok(())
    });

    let finished = run(&env, &guest, FunctionCall::new("u", "poller", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::UnimplementedIntrinsic);
    assert!(finished.output.is_empty());
    assert!(finished.error.unwrap().contains("poll"));
    assert!(queue.drain_results().is_empty());
}

#[test]
fn unresolved_import_fails_instantiation() {
    let root = tempfile::tempdir().unwrap();
    let (env, _queue, _store) = test_env(root.path(), false);

    let imports = vec![ImportRequest::new("env", "no_such_intrinsic", &[], None)];
    let guest = FnGuest::new(imports, |_vm| Ok(()));

    let finished = run(&env, &guest, FunctionCall::new("u", "bad", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::InternalError);
    assert!(finished.error.unwrap().contains("no_such_intrinsic"));
}

#[test]
fn cancellation_takes_effect_at_intrinsic_boundary() {
    let root = tempfile::tempdir().unwrap();
    let (env, _queue, _store) = test_env(root.path(), false);

    let imports = vec![ImportRequest::new("env", "puts", &[I32], Some(I32))];
    let guest = FnGuest::new(imports, |vm| {
        write_guest_bytes(vm, 0x100, b"never printed\0")?;
        vm.invoke(0, &[Value::I32(0x100)])?;
        panic!("intrinsic boundary should have cancelled the call");
    });

    let executor = Executor::new(Arc::clone(&env));
    executor
        .cancel_flag()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let finished = executor.execute(&guest, FunctionCall::new("u", "slow", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::Cancelled);
}

#[test]
fn readdir_buffer_smaller_than_one_entry_reads_nothing() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("d")).unwrap();
    std::fs::write(root.path().join("d/only-entry"), b"x").unwrap();
    let (env, _queue, _store) = test_env(root.path(), false);

    let imports = vec![
        ImportRequest::new(
            "wasi_snapshot_preview1",
            "path_open",
            &[I32, I32, I32, I32, U32, U64, U64, I32, I32],
            Some(I32),
        ),
        ImportRequest::new(
            "wasi_snapshot_preview1",
            "fd_readdir",
            &[I32, I32, I32, U64, I32],
            Some(I32),
        ),
    ];
    let guest = FnGuest::new(imports, |vm| {
        let path_ptr = 0x100u32;
        write_guest_bytes(vm, path_ptr, b"d")?;
        let errno = ret_i32(vm.invoke(
            0,
            &[
                Value::I32(ROOT_FD),
                Value::I32(0),
                Value::I32(path_ptr as i32),
                Value::I32(1),
                Value::U32(wasi::Oflags::DIRECTORY.bits() as u32),
                Value::U64(Rights::all().bits()),
                Value::U64(Rights::all().bits()),
                Value::I32(0),
                Value::I32(0x180),
            ],
        )?);
        assert_eq!(errno, 0);
        let dir_fd = vm.memory().read_u32(0x180).unwrap() as i32;

        // A buffer too small for even one dirent yields zero bytes.
        let errno = ret_i32(vm.invoke(
            1,
            &[
                Value::I32(dir_fd),
                Value::I32(0x1000),
                Value::I32(8),
                Value::U64(wasi::DIRCOOKIE_START),
                Value::I32(0x188),
            ],
        )?);
        assert_eq!(errno, 0);
        assert_eq!(vm.memory().read_u32(0x188).unwrap(), 0);

        // The iterator is live now, so the start cookie is invalid.
        let errno = ret_i32(vm.invoke(
            1,
            &[
                Value::I32(dir_fd),
                Value::I32(0x1000),
                Value::I32(4096),
                Value::U64(wasi::DIRCOOKIE_START),
                Value::I32(0x188),
            ],
        )?);
        assert_eq!(errno, washost::WasiError::EINVAL as i32);
        Ok(())
    });

    let finished = run(&env, &guest, FunctionCall::new("u", "ls", vec![]).unwrap());
    assert_eq!(finished.status, CallStatus::Success);
}
