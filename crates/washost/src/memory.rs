//! Bounds-checked accessors over a module's linear memory.
//!
//! Guest pointers are 32-bit offsets into the memory region. Every accessor
//! validates that `offset + len` neither overflows 32 bits nor runs past the
//! current memory size before producing a borrowed slice, so a hostile guest
//! can at worst fault itself. Endianness concerns are confined to this
//! module: integers cross the boundary little-endian, and typed accessors
//! require the guest ABI's natural alignment.
//!
//! Views are plain borrows of the memory byte array; they cannot be held
//! across guest re-entry (memory growth would invalidate them), which the
//! borrow checker enforces for us.

use crate::error::{Error, WasiError};

/// Upper bound for NUL scans so an unterminated guest string cannot make the
/// host walk an entire 4 GiB memory.
pub const MAX_STRING_SCAN: usize = 16 * 1024;

pub type Result<T> = std::result::Result<T, Error>;

/// A (base, len) pair in guest terms, already validated against the memory
/// bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSlice {
    pub base: usize,
    pub len: usize,
}

/// One call's view of the guest linear memory.
pub struct GuestMemory<'a> {
    bytes: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Validate `[ptr, ptr + len)` against the 32-bit address space and the
    /// current memory size.
    fn checked_range(&self, ptr: u32, len: usize) -> Result<GuestSlice> {
        let base = ptr as usize;
        let end = base.checked_add(len).ok_or(WasiError::EFAULT)?;
        if end > u32::MAX as usize + 1 || end > self.bytes.len() {
            return Err(WasiError::EFAULT.into());
        }
        Ok(GuestSlice { base, len })
    }

    fn checked_aligned(&self, ptr: u32, len: usize, align: usize) -> Result<GuestSlice> {
        if ptr as usize % align != 0 {
            return Err(WasiError::EINVAL.into());
        }
        self.checked_range(ptr, len)
    }

    pub fn slice(&self, ptr: u32, len: u32) -> Result<&[u8]> {
        let range = self.checked_range(ptr, len as usize)?;
        Ok(&self.bytes[range.base..range.base + range.len])
    }

    pub fn slice_mut(&mut self, ptr: u32, len: u32) -> Result<&mut [u8]> {
        let range = self.checked_range(ptr, len as usize)?;
        Ok(&mut self.bytes[range.base..range.base + range.len])
    }

    pub fn read_bytes(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        Ok(self.slice(ptr, len)?.to_vec())
    }

    pub fn write_bytes(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        let range = self.checked_range(ptr, data.len())?;
        self.bytes[range.base..range.base + range.len].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u8(&self, ptr: u32) -> Result<u8> {
        let range = self.checked_range(ptr, 1)?;
        Ok(self.bytes[range.base])
    }

    pub fn write_u8(&mut self, ptr: u32, val: u8) -> Result<()> {
        let range = self.checked_range(ptr, 1)?;
        self.bytes[range.base] = val;
        Ok(())
    }

    pub fn read_u32(&self, ptr: u32) -> Result<u32> {
        let range = self.checked_aligned(ptr, 4, 4)?;
        let raw: [u8; 4] = self.bytes[range.base..range.base + 4].try_into().unwrap();
        Ok(u32::from_le_bytes(raw))
    }

    pub fn write_u32(&mut self, ptr: u32, val: u32) -> Result<()> {
        let range = self.checked_aligned(ptr, 4, 4)?;
        self.bytes[range.base..range.base + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    pub fn read_i32(&self, ptr: u32) -> Result<i32> {
        Ok(self.read_u32(ptr)? as i32)
    }

    pub fn write_i32(&mut self, ptr: u32, val: i32) -> Result<()> {
        self.write_u32(ptr, val as u32)
    }

    pub fn read_u64(&self, ptr: u32) -> Result<u64> {
        let range = self.checked_aligned(ptr, 8, 8)?;
        let raw: [u8; 8] = self.bytes[range.base..range.base + 8].try_into().unwrap();
        Ok(u64::from_le_bytes(raw))
    }

    pub fn write_u64(&mut self, ptr: u32, val: u64) -> Result<()> {
        let range = self.checked_aligned(ptr, 8, 8)?;
        self.bytes[range.base..range.base + 8].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Read a UTF-8 string given an explicit (ptr, len) pair.
    pub fn read_str(&self, ptr: u32, len: u32) -> Result<&str> {
        let bytes = self.slice(ptr, len)?;
        Ok(std::str::from_utf8(bytes)?)
    }

    /// Read a NUL-terminated string, scanning at most [`MAX_STRING_SCAN`]
    /// bytes forward from `ptr`.
    pub fn read_cstr(&self, ptr: u32) -> Result<&str> {
        let base = ptr as usize;
        if base >= self.bytes.len() {
            return Err(WasiError::EFAULT.into());
        }
        let limit = (base + MAX_STRING_SCAN).min(self.bytes.len());
        let window = &self.bytes[base..limit];
        let nul = window
            .iter()
            .position(|&b| b == 0)
            .ok_or(WasiError::EILSEQ)?;
        Ok(std::str::from_utf8(&window[..nul])?)
    }

    /// Translate a guest iovec array into validated (base, len) ranges.
    ///
    /// A guest iovec is two consecutive little-endian u32s: buffer offset
    /// and length. Any invalid element aborts the whole translation.
    pub fn iovecs(&self, iovs_ptr: u32, iovs_len: u32) -> Result<Vec<GuestSlice>> {
        let mut out = Vec::with_capacity(iovs_len as usize);
        for i in 0..iovs_len {
            let ptr = iovs_ptr
                .checked_add(i.checked_mul(8).ok_or(WasiError::EOVERFLOW)?)
                .ok_or(WasiError::EOVERFLOW)?;
            let base = self.read_u32(ptr)?;
            let len = self.read_u32(ptr + 4)?;
            out.push(self.checked_range(base, len as usize)?);
        }
        Ok(out)
    }

}

/// Split a byte buffer into disjoint mutable slices for a validated set of
/// iovec ranges, preserving order. Ranges must be in-bounds (guaranteed by
/// [`GuestMemory::iovecs`]); overlapping ranges are rejected since two
/// mutable borrows of the same region cannot coexist.
pub fn disjoint_slices_mut<'m>(
    bytes: &'m mut [u8],
    ranges: &[GuestSlice],
) -> std::result::Result<Vec<&'m mut [u8]>, Error> {
    let mut order: Vec<usize> = (0..ranges.len()).collect();
    order.sort_by_key(|&i| ranges[i].base);
    for pair in order.windows(2) {
        let a = ranges[pair[0]];
        let b = ranges[pair[1]];
        if a.base + a.len > b.base {
            return Err(WasiError::EINVAL.into());
        }
    }

    let mut out: Vec<Option<&'m mut [u8]>> = Vec::with_capacity(ranges.len());
    out.resize_with(ranges.len(), || None);
    let mut rest: &'m mut [u8] = bytes;
    let mut consumed = 0;
    for &i in &order {
        let r = ranges[i];
        let taken = std::mem::take(&mut rest);
        let (_, tail) = taken.split_at_mut(r.base - consumed);
        let (piece, tail) = tail.split_at_mut(r.len);
        out[i] = Some(piece);
        rest = tail;
        consumed = r.base + r.len;
    }
    Ok(out.into_iter().map(|s| s.unwrap()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(bytes: &mut Vec<u8>) -> GuestMemory<'_> {
        GuestMemory::new(bytes.as_mut_slice())
    }

    #[test]
    fn rejects_out_of_bounds_and_overflow() {
        let mut buf = vec![0u8; 64];
        let m = mem(&mut buf);
        assert!(m.slice(60, 8).is_err());
        assert!(m.slice(u32::MAX, 2).is_err());
        assert!(m.slice(64, 1).is_err());
        assert!(m.slice(0, 64).is_ok());
    }

    #[test]
    fn typed_access_is_little_endian_and_aligned() {
        let mut buf = vec![0u8; 32];
        let mut m = mem(&mut buf);
        m.write_u32(4, 0x0102_0304).unwrap();
        assert_eq!(m.read_u32(4).unwrap(), 0x0102_0304);
        assert_eq!(m.slice(4, 4).unwrap(), &[0x04, 0x03, 0x02, 0x01]);
        // 32-bit loads must be 4-aligned, 64-bit loads 8-aligned.
        assert!(m.read_u32(2).is_err());
        assert!(m.read_u64(4).is_err());
        m.write_u64(8, u64::MAX).unwrap();
        assert_eq!(m.read_u64(8).unwrap(), u64::MAX);
    }

    #[test]
    fn cstr_scan_stops_at_nul_and_at_limit() {
        let mut buf = vec![0u8; MAX_STRING_SCAN + 64];
        buf[0..5].copy_from_slice(b"hello");
        buf[5] = 0;
        let m = GuestMemory::new(buf.as_mut_slice());
        assert_eq!(m.read_cstr(0).unwrap(), "hello");

        // No NUL within the scan window.
        let mut unterminated = vec![b'a'; MAX_STRING_SCAN + 64];
        let m = GuestMemory::new(unterminated.as_mut_slice());
        assert!(m.read_cstr(0).is_err());
    }

    #[test]
    fn iovec_translation_preserves_order_and_aborts_on_bad_element() {
        let mut buf = vec![0u8; 256];
        {
            let mut m = mem(&mut buf);
            // Two iovecs at offset 0: (base 100, len 4), (base 104, len 8).
            m.write_u32(0, 100).unwrap();
            m.write_u32(4, 4).unwrap();
            m.write_u32(8, 104).unwrap();
            m.write_u32(12, 8).unwrap();
        }
        let m = mem(&mut buf);
        let iovs = m.iovecs(0, 2).unwrap();
        assert_eq!(iovs[0], GuestSlice { base: 100, len: 4 });
        assert_eq!(iovs[1], GuestSlice { base: 104, len: 8 });

        // Out-of-bounds second element fails the whole translation.
        let mut buf2 = vec![0u8; 64];
        {
            let mut m = mem(&mut buf2);
            m.write_u32(0, 0).unwrap();
            m.write_u32(4, 4).unwrap();
            m.write_u32(8, 60).unwrap();
            m.write_u32(12, 16).unwrap();
        }
        let m = mem(&mut buf2);
        assert!(m.iovecs(0, 2).is_err());
    }

    #[test]
    fn disjoint_slices_reject_overlap() {
        let mut buf = vec![0u8; 32];
        let ranges = [GuestSlice { base: 0, len: 8 }, GuestSlice { base: 4, len: 8 }];
        assert!(disjoint_slices_mut(&mut buf, &ranges).is_err());

        let ranges = [GuestSlice { base: 8, len: 8 }, GuestSlice { base: 0, len: 8 }];
        let slices = disjoint_slices_mut(&mut buf, &ranges).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 8);
    }
}
