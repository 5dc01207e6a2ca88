//! The module's virtual filesystem: fd table, path masking and the policy
//! layer between hostcalls and the host OS.
//!
//! Every guest-visible path is resolved symbolically (never through the OS)
//! against the preopen it is rooted at, then masked under the configured
//! shared root. A resolved path that would escape the root is rejected with
//! `ENOTCAPABLE` before any native call is made.
//!
//! The table is per-module and single-threaded, so no locking.

use crate::error::{Error, WasiError};
use crate::fdentry::{Descriptor, DirEntryRec, FdEntry, Stat};
use crate::providers::ObjectStore;
use crate::wasi::{Fd, Fdflags, Filetype, Lookupflags, Oflags, Rights, FIRST_NONSTDIO_FD};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

pub struct FileSystem {
    entries: HashMap<Fd, FdEntry>,
    shared_root: PathBuf,
    store: Option<Arc<dyn ObjectStore>>,
}

impl FileSystem {
    /// Seed the table: stdio on 0/1/2 and the `/` directory preopen on the
    /// first free descriptor, which guests discover via `fd_prestat_get`.
    pub fn new(shared_root: PathBuf, store: Option<Arc<dyn ObjectStore>>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(0, FdEntry::stdio(Descriptor::Stdin));
        entries.insert(1, FdEntry::stdio(Descriptor::Stdout));
        entries.insert(2, FdEntry::stdio(Descriptor::Stderr));
        let mut fs = Self {
            entries,
            shared_root,
            store,
        };
        let root = FdEntry::preopen_dir("/".to_string(), fs.shared_root.clone());
        fs.insert(root);
        fs
    }

    pub fn shared_root(&self) -> &PathBuf {
        &self.shared_root
    }

    pub fn exists(&self, fd: Fd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn get(&self, fd: Fd) -> Result<&FdEntry, Error> {
        self.entries.get(&fd).ok_or_else(|| WasiError::EBADF.into())
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut FdEntry, Error> {
        self.entries
            .get_mut(&fd)
            .ok_or_else(|| WasiError::EBADF.into())
    }

    /// For log lines; absent descriptors render as "?".
    pub fn path_for_fd(&self, fd: Fd) -> &str {
        self.entries
            .get(&fd)
            .map(|e| e.virtual_path.as_str())
            .unwrap_or("?")
    }

    /// Insert at the lowest unused descriptor at or above 3.
    fn insert(&mut self, entry: FdEntry) -> Fd {
        let mut fd = FIRST_NONSTDIO_FD;
        while self.entries.contains_key(&fd) {
            fd += 1;
        }
        self.entries.insert(fd, entry);
        fd
    }

    /// Resolve a guest path to its canonical virtual form.
    ///
    /// Separators are collapsed, `.` is dropped and `..` pops a component;
    /// popping past the root is a containment violation. Absolute paths are
    /// accepted only because `/` is the sole preopen; they resolve from it.
    pub fn canonicalize(base: &str, path: &str) -> Result<String, Error> {
        if path.contains('\0') {
            return Err(WasiError::EILSEQ.into());
        }
        let mut stack: Vec<&str> = if path.starts_with('/') {
            Vec::new()
        } else {
            base.split('/').filter(|c| !c.is_empty()).collect()
        };
        for comp in path.split('/') {
            match comp {
                "" | "." => {}
                ".." => {
                    if stack.pop().is_none() {
                        return Err(WasiError::ENOTCAPABLE.into());
                    }
                }
                other => stack.push(other),
            }
        }
        Ok(format!("/{}", stack.join("/")))
    }

    /// Apply the mask: rewrite a canonical virtual path into a host path
    /// under the shared root, with a final containment check.
    pub fn masked_path(&self, virtual_path: &str) -> Result<PathBuf, Error> {
        let relative = virtual_path.trim_start_matches('/');
        let host = if relative.is_empty() {
            self.shared_root.clone()
        } else {
            self.shared_root.join(relative)
        };
        if !host.starts_with(&self.shared_root) {
            return Err(WasiError::ENOTCAPABLE.into());
        }
        Ok(host)
    }

    /// Resolve a path relative to a directory descriptor into
    /// (virtual, masked host) form, after validating the descriptor and the
    /// required right.
    fn resolve_at(
        &self,
        dirfd: Fd,
        path: &str,
        required: Rights,
    ) -> Result<(String, PathBuf), Error> {
        let entry = self.get(dirfd)?;
        if !entry.is_directory() {
            return Err(WasiError::ENOTDIR.into());
        }
        entry.check_rights(required)?;
        let virtual_path = Self::canonicalize(&entry.virtual_path, path)?;
        let host = self.masked_path(&virtual_path)?;
        Ok((virtual_path, host))
    }

    /// Pull a blob-backed file into the shared root on first access. This is
    /// the only point where the filesystem talks to the object store.
    fn materialize_blob(&self, virtual_path: &str, host: &PathBuf) -> Result<(), Error> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(()),
        };
        if host.exists() {
            return Ok(());
        }
        let key = virtual_path.trim_start_matches('/');
        let bytes = match store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::error!("object store fetch failed for {key}: {e:#}");
                return Err(WasiError::EIO.into());
            }
        };
        tracing::debug!("materialising {} ({} bytes) from object store", key, bytes.len());
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(host, bytes)?;
        Ok(())
    }

    /// Open a path below `root_fd` and allocate a fresh descriptor for it.
    ///
    /// Requested rights are clamped to what the parent may pass on.
    pub fn open(
        &mut self,
        root_fd: Fd,
        path: &str,
        rights_base: Rights,
        rights_inheriting: Rights,
        lookup_flags: Lookupflags,
        open_flags: Oflags,
        fd_flags: Fdflags,
    ) -> Result<Fd, Error> {
        let (virtual_path, host) = self.resolve_at(root_fd, path, Rights::PATH_OPEN)?;
        let parent_inheriting = self.get(root_fd)?.rights_inheriting;
        let rights_base = rights_base & parent_inheriting;
        let rights_inheriting = rights_inheriting & parent_inheriting;

        if !open_flags.contains(Oflags::CREAT) {
            self.materialize_blob(&virtual_path, &host)?;
        }

        let follow = lookup_flags.contains(Lookupflags::SYMLINK_FOLLOW);
        let existing = if follow {
            host.metadata().ok()
        } else {
            host.symlink_metadata().ok()
        };

        if let Some(meta) = &existing {
            if meta.is_dir() {
                if open_flags.contains(Oflags::EXCL) {
                    return Err(WasiError::EEXIST.into());
                }
                let entry = FdEntry {
                    virtual_path,
                    host_path: host,
                    file_type: Filetype::Directory,
                    rights_base: rights_base & Rights::directory_base(),
                    rights_inheriting,
                    fd_flags,
                    is_preopen: false,
                    descriptor: Descriptor::Dir,
                    dir_iter: None,
                };
                return Ok(self.insert(entry));
            }
        }
        if open_flags.contains(Oflags::DIRECTORY) {
            return if existing.is_some() {
                Err(WasiError::ENOTDIR.into())
            } else {
                Err(WasiError::ENOENT.into())
            };
        }

        let mut opts = fs::OpenOptions::new();
        opts.read(rights_base.contains(Rights::FD_READ));
        let writing = rights_base.contains(Rights::FD_WRITE)
            || open_flags.contains(Oflags::TRUNC)
            || fd_flags.contains(Fdflags::APPEND);
        opts.write(writing);
        if fd_flags.contains(Fdflags::APPEND) {
            opts.append(true);
        }
        if open_flags.contains(Oflags::CREAT) {
            if !self.get(root_fd)?.rights_base.contains(Rights::PATH_CREATE_FILE) {
                return Err(WasiError::ENOTCAPABLE.into());
            }
            if open_flags.contains(Oflags::EXCL) {
                opts.create_new(true);
            } else {
                opts.create(true);
            }
        }
        if open_flags.contains(Oflags::TRUNC) {
            opts.truncate(true);
        }
        // A rights-free open (stat-style) still needs an access mode.
        if !rights_base.contains(Rights::FD_READ) && !writing {
            opts.read(true);
        }

        let file = opts.open(&host)?;
        let file_type = Filetype::from(file.metadata()?.file_type());
        let entry = FdEntry {
            virtual_path,
            host_path: host,
            file_type,
            rights_base,
            rights_inheriting,
            fd_flags,
            is_preopen: false,
            descriptor: Descriptor::File(Rc::new(file)),
            dir_iter: None,
        };
        let fd = self.insert(entry);
        tracing::trace!("opened {} as fd {}", self.path_for_fd(fd), fd);
        Ok(fd)
    }

    /// Second descriptor over the same native handle.
    pub fn dup(&mut self, fd: Fd) -> Result<Fd, Error> {
        let dup = self.get(fd)?.duplicate()?;
        Ok(self.insert(dup))
    }

    /// Preopens are immortal: closing one succeeds without touching the
    /// table, so the guest cannot invalidate its root. Regular descriptors
    /// are removed; the native handle drops with its last reference.
    pub fn close(&mut self, fd: Fd) -> Result<(), Error> {
        if self.get(fd)?.is_preopen {
            return Ok(());
        }
        self.entries.remove(&fd);
        Ok(())
    }

    pub fn readv(&mut self, fd: Fd, bufs: &mut [io::IoSliceMut<'_>]) -> Result<usize, Error> {
        let entry = self.get(fd)?;
        match &entry.descriptor {
            Descriptor::Stdin => Ok(0),
            Descriptor::Stdout | Descriptor::Stderr => Err(WasiError::EBADF.into()),
            Descriptor::Dir => Err(WasiError::EISDIR.into()),
            Descriptor::File(f) => {
                entry.check_rights(Rights::FD_READ)?;
                let n = (&**f).read_vectored(bufs)?;
                Ok(n)
            }
        }
    }

    pub fn writev(&mut self, fd: Fd, bufs: &[io::IoSlice<'_>]) -> Result<usize, Error> {
        let entry = self.get(fd)?;
        match &entry.descriptor {
            Descriptor::Stdin => Err(WasiError::EBADF.into()),
            Descriptor::Stdout => {
                let n = io::stdout().write_vectored(bufs)?;
                Ok(n)
            }
            Descriptor::Stderr => {
                let n = io::stderr().write_vectored(bufs)?;
                Ok(n)
            }
            Descriptor::Dir => Err(WasiError::EISDIR.into()),
            Descriptor::File(f) => {
                entry.check_rights(Rights::FD_WRITE)?;
                let n = (&**f).write_vectored(bufs)?;
                Ok(n)
            }
        }
    }

    pub fn seek(&mut self, fd: Fd, offset: i64, whence: crate::wasi::Whence) -> Result<u64, Error> {
        use crate::wasi::Whence;
        let entry = self.get(fd)?;
        entry.check_rights(Rights::FD_SEEK)?;
        let file = entry.descriptor.as_file()?;
        let pos = match whence {
            Whence::Set => SeekFrom::Start(offset.try_into().map_err(|_| WasiError::EINVAL)?),
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        let new_offset = (&**file).seek(pos)?;
        Ok(new_offset)
    }

    pub fn tell(&mut self, fd: Fd) -> Result<u64, Error> {
        let entry = self.get(fd)?;
        entry.check_rights(Rights::FD_TELL)?;
        let file = entry.descriptor.as_file()?;
        let pos = (&**file).seek(SeekFrom::Current(0))?;
        Ok(pos)
    }

    /// Record updated fd-flags on the entry. The append behaviour of an
    /// already-open native handle cannot be changed retroactively, so this
    /// only affects what `fd_fdstat_get` reports.
    pub fn set_fd_flags(&mut self, fd: Fd, flags: Fdflags) -> Result<(), Error> {
        let entry = self.get_mut(fd)?;
        entry.check_rights(Rights::FD_FDSTAT_SET_FLAGS)?;
        entry.fd_flags = flags;
        Ok(())
    }

    pub fn filestat(&self, fd: Fd) -> Result<Stat, Error> {
        let entry = self.get(fd)?;
        match &entry.descriptor {
            Descriptor::Stdin | Descriptor::Stdout | Descriptor::Stderr => Ok(Stat {
                filetype_raw: Filetype::CharacterDevice as u8,
                ..Stat::default()
            }),
            Descriptor::File(f) => Ok(Stat::from_metadata(&f.metadata()?)),
            Descriptor::Dir => Ok(Stat::from_metadata(&entry.host_path.metadata()?)),
        }
    }

    pub fn filestat_at(
        &mut self,
        dirfd: Fd,
        path: &str,
        follow: bool,
    ) -> Result<Stat, Error> {
        let (virtual_path, host) = self.resolve_at(dirfd, path, Rights::PATH_FILESTAT_GET)?;
        self.materialize_blob(&virtual_path, &host)?;
        let meta = if follow {
            host.metadata()?
        } else {
            host.symlink_metadata()?
        };
        Ok(Stat::from_metadata(&meta))
    }

    pub fn create_dir(&mut self, dirfd: Fd, path: &str) -> Result<(), Error> {
        let (_, host) = self.resolve_at(dirfd, path, Rights::PATH_CREATE_DIRECTORY)?;
        fs::create_dir(&host)?;
        Ok(())
    }

    pub fn unlink_file(&mut self, dirfd: Fd, path: &str) -> Result<(), Error> {
        let (_, host) = self.resolve_at(dirfd, path, Rights::PATH_UNLINK_FILE)?;
        fs::remove_file(&host)?;
        Ok(())
    }

    pub fn rename(
        &mut self,
        old_fd: Fd,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> Result<(), Error> {
        let (_, old_host) = self.resolve_at(old_fd, old_path, Rights::PATH_RENAME_SOURCE)?;
        let (_, new_host) = self.resolve_at(new_fd, new_path, Rights::PATH_RENAME_TARGET)?;
        fs::rename(&old_host, &new_host)?;
        Ok(())
    }

    pub fn readlink(&mut self, dirfd: Fd, path: &str) -> Result<Vec<u8>, Error> {
        use std::os::unix::ffi::OsStrExt;
        let (_, host) = self.resolve_at(dirfd, path, Rights::PATH_READLINK)?;
        let target = fs::read_link(&host)?;
        Ok(target.as_os_str().as_bytes().to_vec())
    }

    /// Snapshot the directory listing for a readdir cursor. The entries are
    /// the directory's real children in host iteration order.
    pub fn dir_entries(&self, fd: Fd) -> Result<Vec<DirEntryRec>, Error> {
        let entry = self.get(fd)?;
        if !entry.is_directory() {
            return Err(WasiError::ENOTDIR.into());
        }
        entry.check_rights(Rights::FD_READDIR)?;
        let mut out = Vec::new();
        for dirent in fs::read_dir(&entry.host_path)? {
            let dirent = dirent?;
            let meta = dirent.metadata()?;
            #[cfg(unix)]
            let ino = {
                use std::os::unix::fs::MetadataExt;
                meta.ino()
            };
            out.push(DirEntryRec {
                ino,
                filetype: Filetype::from(meta.file_type()),
                name: dirent.file_name().to_string_lossy().into_owned(),
            });
        }
        Ok(out)
    }
}
