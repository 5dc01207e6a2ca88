//! Types and constants of the WASI snapshot-preview1 ABI as seen from the
//! host side of the boundary.
//!
//! The guest agrees to these layouts via wasi-libc; the authoritative
//! reference is the snapshot witx:
//! <https://github.com/WebAssembly/WASI/blob/main/phases/snapshot/docs.md>
//!
//! Everything here is plain data. Marshalling in and out of guest memory is
//! the job of `crate::memory` and the hostcall layer.

use bitflags::bitflags;

pub type Fd = u32;
pub type Size = u32;
pub type Filesize = u64;
pub type Timestamp = u64;
pub type Dircookie = u64;
pub type Inode = u64;

/// Cookie value a guest passes to begin a directory iteration.
pub const DIRCOOKIE_START: Dircookie = 0;

pub const CLOCKID_REALTIME: u32 = 0;
pub const CLOCKID_MONOTONIC: u32 = 1;

/// Reserved descriptors; the fd table allocates densely above these.
pub const STDIN_FD: Fd = 0;
pub const STDOUT_FD: Fd = 1;
pub const STDERR_FD: Fd = 2;
pub const FIRST_NONSTDIO_FD: Fd = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Filetype {
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

impl From<std::fs::FileType> for Filetype {
    fn from(ftype: std::fs::FileType) -> Self {
        if ftype.is_file() {
            Self::RegularFile
        } else if ftype.is_dir() {
            Self::Directory
        } else if ftype.is_symlink() {
            Self::SymbolicLink
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl Whence {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Set),
            1 => Some(Self::Cur),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

/// Preopen kind reported through `fd_prestat_get`. Only directory preopens
/// exist in preview1.
pub const PREOPENTYPE_DIR: u8 = 0;

bitflags! {
    /// Per-descriptor capability bits, split into rights held on the
    /// descriptor itself (base) and rights passed on to descriptors opened
    /// through it (inheriting).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
    }
}

impl Rights {
    /// Rights a directory descriptor starts out with.
    pub fn directory_base() -> Self {
        Self::FD_FDSTAT_SET_FLAGS
            | Self::FD_SYNC
            | Self::FD_ADVISE
            | Self::PATH_CREATE_DIRECTORY
            | Self::PATH_CREATE_FILE
            | Self::PATH_LINK_SOURCE
            | Self::PATH_LINK_TARGET
            | Self::PATH_OPEN
            | Self::FD_READDIR
            | Self::PATH_READLINK
            | Self::PATH_RENAME_SOURCE
            | Self::PATH_RENAME_TARGET
            | Self::PATH_FILESTAT_GET
            | Self::PATH_FILESTAT_SET_SIZE
            | Self::PATH_FILESTAT_SET_TIMES
            | Self::FD_FILESTAT_GET
            | Self::FD_FILESTAT_SET_TIMES
            | Self::PATH_SYMLINK
            | Self::PATH_UNLINK_FILE
            | Self::PATH_REMOVE_DIRECTORY
            | Self::POLL_FD_READWRITE
    }

    /// Directories may yield descriptors to anything below them.
    pub fn directory_inheriting() -> Self {
        Self::all() ^ Self::SOCK_SHUTDOWN
    }

    pub fn regular_file_base() -> Self {
        Self::FD_DATASYNC
            | Self::FD_READ
            | Self::FD_SEEK
            | Self::FD_FDSTAT_SET_FLAGS
            | Self::FD_SYNC
            | Self::FD_TELL
            | Self::FD_WRITE
            | Self::FD_ADVISE
            | Self::FD_ALLOCATE
            | Self::FD_FILESTAT_GET
            | Self::FD_FILESTAT_SET_SIZE
            | Self::FD_FILESTAT_SET_TIMES
            | Self::POLL_FD_READWRITE
    }

    pub fn regular_file_inheriting() -> Self {
        Self::empty()
    }

    pub fn tty_base() -> Self {
        Self::FD_READ | Self::FD_FDSTAT_SET_FLAGS | Self::FD_WRITE | Self::FD_FILESTAT_GET
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fdflags: u16 {
        const APPEND = 1;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Oflags: u16 {
        const CREAT = 1;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lookupflags: u32 {
        const SYMLINK_FOLLOW = 1;
    }
}

/// Guest layout sizes for the structs the hostcalls serialise by hand.
/// `filestat` is 64 bytes, `fdstat` 24, `prestat` 8, and a `dirent` header
/// is 24 bytes followed by the name.
pub const FILESTAT_SIZE: usize = 64;
pub const FDSTAT_SIZE: usize = 24;
pub const PRESTAT_SIZE: usize = 8;
pub const DIRENT_SIZE: usize = 24;

/// Serialise a dirent header into its guest layout:
/// `d_next: u64, d_ino: u64, d_namlen: u32, d_type: u8` plus padding.
pub fn dirent_bytes(next: Dircookie, ino: Inode, namlen: u32, ftype: Filetype) -> [u8; DIRENT_SIZE] {
    let mut raw = [0u8; DIRENT_SIZE];
    raw[0..8].copy_from_slice(&next.to_le_bytes());
    raw[8..16].copy_from_slice(&ino.to_le_bytes());
    raw[16..20].copy_from_slice(&namlen.to_le_bytes());
    raw[20] = ftype as u8;
    raw
}
