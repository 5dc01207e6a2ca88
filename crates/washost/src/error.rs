//! Error codes crossing the host–guest boundary.
//!
//! Guest-visible failures are WASI errnos; how an errno reaches the guest
//! (result-pointer convention, positive return, or the Linux negative
//! convention) is decided per intrinsic in the hostcall layer.

use std::num::TryFromIntError;
use std::{fmt, io, str};
use thiserror::Error;

/// The errno taxonomy of the WASI snapshot-preview1 ABI.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[repr(u16)]
pub enum WasiError {
    ESUCCESS = 0,
    E2BIG = 1,
    EACCES = 2,
    EADDRINUSE = 3,
    EADDRNOTAVAIL = 4,
    EAFNOSUPPORT = 5,
    EAGAIN = 6,
    EALREADY = 7,
    EBADF = 8,
    EBADMSG = 9,
    EBUSY = 10,
    ECANCELED = 11,
    ECHILD = 12,
    ECONNABORTED = 13,
    ECONNREFUSED = 14,
    ECONNRESET = 15,
    EDEADLK = 16,
    EDESTADDRREQ = 17,
    EDOM = 18,
    EDQUOT = 19,
    EEXIST = 20,
    EFAULT = 21,
    EFBIG = 22,
    EHOSTUNREACH = 23,
    EIDRM = 24,
    EILSEQ = 25,
    EINPROGRESS = 26,
    EINTR = 27,
    EINVAL = 28,
    EIO = 29,
    EISCONN = 30,
    EISDIR = 31,
    ELOOP = 32,
    EMFILE = 33,
    EMLINK = 34,
    EMSGSIZE = 35,
    EMULTIHOP = 36,
    ENAMETOOLONG = 37,
    ENETDOWN = 38,
    ENETRESET = 39,
    ENETUNREACH = 40,
    ENFILE = 41,
    ENOBUFS = 42,
    ENODEV = 43,
    ENOENT = 44,
    ENOEXEC = 45,
    ENOLCK = 46,
    ENOLINK = 47,
    ENOMEM = 48,
    ENOMSG = 49,
    ENOPROTOOPT = 50,
    ENOSPC = 51,
    ENOSYS = 52,
    ENOTCONN = 53,
    ENOTDIR = 54,
    ENOTEMPTY = 55,
    ENOTRECOVERABLE = 56,
    ENOTSOCK = 57,
    ENOTSUP = 58,
    ENOTTY = 59,
    ENXIO = 60,
    EOVERFLOW = 61,
    EOWNERDEAD = 62,
    EPERM = 63,
    EPIPE = 64,
    EPROTO = 65,
    EPROTONOSUPPORT = 66,
    EPROTOTYPE = 67,
    ERANGE = 68,
    EROFS = 69,
    ESPIPE = 70,
    ESRCH = 71,
    ESTALE = 72,
    ETIMEDOUT = 73,
    ETXTBSY = 74,
    EXDEV = 75,
    ENOTCAPABLE = 76,
}

impl WasiError {
    pub fn as_raw_errno(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for WasiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Host-side error for filesystem and marshalling operations. Everything
/// here eventually becomes a WASI errno at the boundary; the `Io` variant
/// carries the native error until translation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Wasi(WasiError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<WasiError> for Error {
    fn from(err: WasiError) -> Self {
        Self::Wasi(err)
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Self {
        Self::Wasi(WasiError::EOVERFLOW)
    }
}

impl From<str::Utf8Error> for Error {
    fn from(_: str::Utf8Error) -> Self {
        Self::Wasi(WasiError::EILSEQ)
    }
}

impl Error {
    pub fn as_wasi_errno(&self) -> WasiError {
        match self {
            Self::Wasi(no) => *no,
            Self::Io(e) => errno_from_ioerror(e),
        }
    }
}

fn errno_from_ioerror(e: &io::Error) -> WasiError {
    match e.raw_os_error() {
        Some(code) => errno_from_host(code),
        None => {
            tracing::debug!("inconvertible OS error: {}", e);
            WasiError::EIO
        }
    }
}

/// Fixed native-errno → WASI-errno table. Anything we do not recognise maps
/// to the catch-all `EIO`.
pub fn errno_from_host(errno: i32) -> WasiError {
    match errno {
        libc::EPERM => WasiError::EPERM,
        libc::ENOENT => WasiError::ENOENT,
        libc::ESRCH => WasiError::ESRCH,
        libc::EINTR => WasiError::EINTR,
        libc::EIO => WasiError::EIO,
        libc::ENXIO => WasiError::ENXIO,
        libc::E2BIG => WasiError::E2BIG,
        libc::ENOEXEC => WasiError::ENOEXEC,
        libc::EBADF => WasiError::EBADF,
        libc::ECHILD => WasiError::ECHILD,
        libc::EAGAIN => WasiError::EAGAIN,
        libc::ENOMEM => WasiError::ENOMEM,
        libc::EACCES => WasiError::EACCES,
        libc::EFAULT => WasiError::EFAULT,
        libc::EBUSY => WasiError::EBUSY,
        libc::EEXIST => WasiError::EEXIST,
        libc::EXDEV => WasiError::EXDEV,
        libc::ENODEV => WasiError::ENODEV,
        libc::ENOTDIR => WasiError::ENOTDIR,
        libc::EISDIR => WasiError::EISDIR,
        libc::EINVAL => WasiError::EINVAL,
        libc::ENFILE => WasiError::ENFILE,
        libc::EMFILE => WasiError::EMFILE,
        libc::ENOTTY => WasiError::ENOTTY,
        libc::ETXTBSY => WasiError::ETXTBSY,
        libc::EFBIG => WasiError::EFBIG,
        libc::ENOSPC => WasiError::ENOSPC,
        libc::ESPIPE => WasiError::ESPIPE,
        libc::EROFS => WasiError::EROFS,
        libc::EMLINK => WasiError::EMLINK,
        libc::EPIPE => WasiError::EPIPE,
        libc::EDOM => WasiError::EDOM,
        libc::ERANGE => WasiError::ERANGE,
        libc::EDEADLK => WasiError::EDEADLK,
        libc::ENAMETOOLONG => WasiError::ENAMETOOLONG,
        libc::ENOLCK => WasiError::ENOLCK,
        libc::ENOSYS => WasiError::ENOSYS,
        libc::ENOTEMPTY => WasiError::ENOTEMPTY,
        libc::ELOOP => WasiError::ELOOP,
        libc::ENOMSG => WasiError::ENOMSG,
        libc::EIDRM => WasiError::EIDRM,
        libc::ENOLINK => WasiError::ENOLINK,
        libc::EPROTO => WasiError::EPROTO,
        libc::EMULTIHOP => WasiError::EMULTIHOP,
        libc::EBADMSG => WasiError::EBADMSG,
        libc::EOVERFLOW => WasiError::EOVERFLOW,
        libc::EILSEQ => WasiError::EILSEQ,
        libc::ENOTSOCK => WasiError::ENOTSOCK,
        libc::EDESTADDRREQ => WasiError::EDESTADDRREQ,
        libc::EMSGSIZE => WasiError::EMSGSIZE,
        libc::EPROTOTYPE => WasiError::EPROTOTYPE,
        libc::ENOPROTOOPT => WasiError::ENOPROTOOPT,
        libc::EPROTONOSUPPORT => WasiError::EPROTONOSUPPORT,
        libc::ENOTSUP => WasiError::ENOTSUP,
        libc::EAFNOSUPPORT => WasiError::EAFNOSUPPORT,
        libc::EADDRINUSE => WasiError::EADDRINUSE,
        libc::EADDRNOTAVAIL => WasiError::EADDRNOTAVAIL,
        libc::ENETDOWN => WasiError::ENETDOWN,
        libc::ENETUNREACH => WasiError::ENETUNREACH,
        libc::ENETRESET => WasiError::ENETRESET,
        libc::ECONNABORTED => WasiError::ECONNABORTED,
        libc::ECONNRESET => WasiError::ECONNRESET,
        libc::ENOBUFS => WasiError::ENOBUFS,
        libc::EISCONN => WasiError::EISCONN,
        libc::ENOTCONN => WasiError::ENOTCONN,
        libc::ETIMEDOUT => WasiError::ETIMEDOUT,
        libc::ECONNREFUSED => WasiError::ECONNREFUSED,
        libc::EHOSTUNREACH => WasiError::EHOSTUNREACH,
        libc::EALREADY => WasiError::EALREADY,
        libc::EINPROGRESS => WasiError::EINPROGRESS,
        libc::ESTALE => WasiError::ESTALE,
        libc::EDQUOT => WasiError::EDQUOT,
        libc::ECANCELED => WasiError::ECANCELED,
        libc::EOWNERDEAD => WasiError::EOWNERDEAD,
        libc::ENOTRECOVERABLE => WasiError::ENOTRECOVERABLE,
        other => {
            tracing::debug!("unknown host errno {other}, mapping to EIO");
            WasiError::EIO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_errnos_translate() {
        assert_eq!(errno_from_host(libc::ENOENT), WasiError::ENOENT);
        assert_eq!(errno_from_host(libc::EACCES), WasiError::EACCES);
        assert_eq!(errno_from_host(libc::ENOTDIR), WasiError::ENOTDIR);
    }

    #[test]
    fn unknown_errno_is_eio() {
        assert_eq!(errno_from_host(-1), WasiError::EIO);
        assert_eq!(errno_from_host(9999), WasiError::EIO);
    }

    #[test]
    fn ioerror_translation_goes_through_raw_os_error() {
        let err = Error::from(io::Error::from_raw_os_error(libc::EEXIST));
        assert_eq!(err.as_wasi_errno(), WasiError::EEXIST);
    }
}
