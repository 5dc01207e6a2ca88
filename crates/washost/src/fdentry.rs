//! Per-descriptor state for the module's fd table.

use crate::error::{Error, WasiError};
use crate::wasi::{Dircookie, Fdflags, Filetype, Inode, Rights};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

/// The host-side object a descriptor resolves to. Directories are
/// path-addressed (their operations re-resolve below the masked path), so
/// only regular files keep a native handle open.
#[derive(Debug)]
pub enum Descriptor {
    Stdin,
    Stdout,
    Stderr,
    /// Shared so `dup` can alias the handle; the file closes when the last
    /// entry referencing it is removed from the table.
    File(Rc<fs::File>),
    Dir,
}

impl Descriptor {
    pub fn as_file(&self) -> Result<&Rc<fs::File>, Error> {
        match self {
            Self::File(f) => Ok(f),
            _ => Err(WasiError::EBADF.into()),
        }
    }

    pub fn is_std(&self) -> bool {
        matches!(self, Self::Stdin | Self::Stdout | Self::Stderr)
    }
}

/// POSIX-shaped stat produced by the filesystem layer. The hostcall layer
/// serialises it into the guest `filestat` layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub filetype_raw: u8,
    pub nlink: u64,
    pub size: u64,
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

impl Stat {
    #[cfg(unix)]
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            filetype_raw: Filetype::from(meta.file_type()) as u8,
            nlink: meta.nlink(),
            size: meta.size(),
            atim: (meta.atime() as u64)
                .wrapping_mul(1_000_000_000)
                .wrapping_add(meta.atime_nsec() as u64),
            mtim: (meta.mtime() as u64)
                .wrapping_mul(1_000_000_000)
                .wrapping_add(meta.mtime_nsec() as u64),
            ctim: (meta.ctime() as u64)
                .wrapping_mul(1_000_000_000)
                .wrapping_add(meta.ctime_nsec() as u64),
        }
    }
}

/// One directory entry captured by a readdir snapshot.
#[derive(Debug, Clone)]
pub struct DirEntryRec {
    pub ino: Inode,
    pub filetype: Filetype,
    pub name: String,
}

/// Explicit iterator state for `fd_readdir`. The position survives between
/// calls on the descriptor; the cookie handed back to the guest is the index
/// of the next entry.
#[derive(Debug)]
pub struct DirIterator {
    pub entries: Vec<DirEntryRec>,
    pub cursor: usize,
}

impl DirIterator {
    pub fn new(entries: Vec<DirEntryRec>) -> Self {
        Self { entries, cursor: 0 }
    }

    pub fn seek_to(&mut self, cookie: Dircookie) -> Result<(), Error> {
        let pos = usize::try_from(cookie).map_err(|_| WasiError::EINVAL)?;
        if pos > self.entries.len() {
            return Err(WasiError::EINVAL.into());
        }
        self.cursor = pos;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FdEntry {
    /// Guest-visible path, canonical, rooted at a preopen.
    pub virtual_path: String,
    /// Host path after masking; always under the shared root.
    pub host_path: PathBuf,
    pub file_type: Filetype,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
    pub fd_flags: Fdflags,
    pub is_preopen: bool,
    pub descriptor: Descriptor,
    pub dir_iter: Option<DirIterator>,
}

impl FdEntry {
    pub fn stdio(which: Descriptor) -> Self {
        debug_assert!(which.is_std());
        Self {
            virtual_path: String::new(),
            host_path: PathBuf::new(),
            file_type: Filetype::CharacterDevice,
            rights_base: Rights::tty_base(),
            rights_inheriting: Rights::empty(),
            fd_flags: Fdflags::empty(),
            is_preopen: false,
            descriptor: which,
            dir_iter: None,
        }
    }

    pub fn preopen_dir(virtual_path: String, host_path: PathBuf) -> Self {
        Self {
            virtual_path,
            host_path,
            file_type: Filetype::Directory,
            rights_base: Rights::directory_base(),
            rights_inheriting: Rights::directory_inheriting(),
            fd_flags: Fdflags::empty(),
            is_preopen: true,
            descriptor: Descriptor::Dir,
            dir_iter: None,
        }
    }

    /// `Notcapable` unless every requested right bit is held.
    pub fn check_rights(&self, required: Rights) -> Result<(), Error> {
        if self.rights_base.contains(required) {
            Ok(())
        } else {
            tracing::trace!(
                "rights check failed: required {:?}, held {:?}",
                required,
                self.rights_base
            );
            Err(WasiError::ENOTCAPABLE.into())
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == Filetype::Directory
    }

    /// Duplicate for `dup`: a second entry over the same native handle.
    pub fn duplicate(&self) -> Result<Self, Error> {
        let descriptor = match &self.descriptor {
            Descriptor::File(f) => Descriptor::File(Rc::clone(f)),
            Descriptor::Dir => Descriptor::Dir,
            Descriptor::Stdin => Descriptor::Stdin,
            Descriptor::Stdout => Descriptor::Stdout,
            Descriptor::Stderr => Descriptor::Stderr,
        };
        Ok(Self {
            virtual_path: self.virtual_path.clone(),
            host_path: self.host_path.clone(),
            file_type: self.file_type,
            rights_base: self.rights_base,
            rights_inheriting: self.rights_inheriting,
            fd_flags: self.fd_flags,
            // A duplicate of a preopen is an ordinary descriptor.
            is_preopen: false,
            descriptor,
            dir_iter: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rights_check_requires_superset() {
        let entry = FdEntry::preopen_dir("/".to_string(), PathBuf::from("/tmp/x"));
        assert!(entry.check_rights(Rights::PATH_OPEN).is_ok());
        assert!(entry
            .check_rights(Rights::PATH_OPEN | Rights::FD_READDIR)
            .is_ok());
        assert!(entry.check_rights(Rights::FD_WRITE).is_err());
    }

    #[test]
    fn dir_iterator_cursor_bounds() {
        let mut iter = DirIterator::new(vec![]);
        assert!(iter.seek_to(0).is_ok());
        assert!(iter.seek_to(1).is_err());
    }

    #[test]
    fn duplicate_shares_handle_and_drops_preopen_bit() {
        let dir = tempfile::tempdir().unwrap();
        let file = fs::File::create(dir.path().join("f")).unwrap();
        let entry = FdEntry {
            virtual_path: "/f".to_string(),
            host_path: dir.path().join("f"),
            file_type: Filetype::RegularFile,
            rights_base: Rights::regular_file_base(),
            rights_inheriting: Rights::regular_file_inheriting(),
            fd_flags: Fdflags::empty(),
            is_preopen: true,
            descriptor: Descriptor::File(Rc::new(file)),
            dir_iter: None,
        };
        let dup = entry.duplicate().unwrap();
        assert!(!dup.is_preopen);
        let (a, b) = (
            entry.descriptor.as_file().unwrap(),
            dup.descriptor.as_file().unwrap(),
        );
        assert!(Rc::ptr_eq(a, b));
    }
}
