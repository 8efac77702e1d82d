#![forbid(unsafe_code)]
//! Fixed-width big-endian encoding and a bounds-checked parsing cursor.
//!
//! Every persisted integer goes through these helpers, so the on-disk byte
//! order is decided in exactly one place.

pub mod ord {
    //! Big-endian appenders.

    use crate::types::{Result, StratumError};

    /// Appends a byte.
    pub fn put_u8(dst: &mut Vec<u8>, v: u8) {
        dst.push(v);
    }

    /// Appends a big-endian u32.
    pub fn put_u32(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian u64.
    pub fn put_u64(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Longest field a u32 length prefix can describe.
    pub const MAX_FIELD_LEN: u64 = u32::MAX as u64;

    /// Rejects fields that [`put_len_prefixed`] cannot encode.
    pub fn check_field_len(len: usize) -> Result<()> {
        if len as u64 > MAX_FIELD_LEN {
            return Err(StratumError::Invalid("field longer than u32::MAX bytes"));
        }
        Ok(())
    }

    /// Appends a u32 length prefix followed by the bytes.
    ///
    /// Callers admit fields through [`check_field_len`] first.
    pub fn put_len_prefixed(dst: &mut Vec<u8>, bytes: &[u8]) {
        debug_assert!(check_field_len(bytes.len()).is_ok());
        put_u32(dst, bytes.len() as u32);
        dst.extend_from_slice(bytes);
    }
}

pub mod buf {
    //! A slice-backed cursor that reports truncation instead of panicking.

    use core::fmt;

    use crate::types::{Result, StratumError};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or_else(|| StratumError::CorruptPage("cursor offset overflow".into()))?;
            if end > self.buf.len() {
                return Err(StratumError::CorruptPage(format!(
                    "truncated page: need {} bytes, {} remaining",
                    n,
                    self.remaining()
                )));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u32.
        pub fn u32(&mut self) -> Result<u32> {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(self.take(4)?);
            Ok(u32::from_be_bytes(raw))
        }

        /// Reads a big-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(self.take(8)?);
            Ok(u64::from_be_bytes(raw))
        }

        /// Reads a u32 length prefix and the bytes it declares.
        pub fn len_prefixed(&mut self) -> Result<&'a [u8]> {
            let len = self.u32()? as usize;
            self.take(len)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Fails unless every byte was consumed.
        pub fn finish(&self) -> Result<()> {
            if self.remaining() != 0 {
                return Err(StratumError::CorruptPage(format!(
                    "{} trailing bytes after page body",
                    self.remaining()
                )));
            }
            Ok(())
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{buf::Cursor, ord};
    use crate::types::StratumError;
    use proptest::prelude::*;

    #[test]
    fn integers_are_big_endian() {
        let mut out = Vec::new();
        ord::put_u32(&mut out, 0x0102_0304);
        ord::put_u64(&mut out, 1);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert_eq!(&out[4..], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn cursor_reports_truncation() {
        let mut cur = Cursor::new(&[1, 2, 3]);
        let err = cur.u32().unwrap_err();
        assert!(matches!(err, StratumError::CorruptPage(_)));
    }

    #[test]
    fn len_prefix_longer_than_buffer_is_corrupt() {
        let mut out = Vec::new();
        ord::put_u32(&mut out, 10);
        out.extend_from_slice(&[0u8; 4]);
        let mut cur = Cursor::new(&out);
        assert!(matches!(
            cur.len_prefixed(),
            Err(StratumError::CorruptPage(_))
        ));
    }

    #[test]
    fn field_lengths_are_bounded_by_the_prefix() {
        assert!(ord::check_field_len(0).is_ok());
        assert!(ord::check_field_len(u32::MAX as usize).is_ok());
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            ord::check_field_len(u32::MAX as usize + 1),
            Err(StratumError::Invalid(_))
        ));
    }

    #[test]
    fn finish_rejects_trailing_bytes() {
        let mut cur = Cursor::new(&[7, 8]);
        assert_eq!(cur.u8().unwrap(), 7);
        assert!(cur.finish().is_err());
        assert_eq!(cur.u8().unwrap(), 8);
        assert!(cur.finish().is_ok());
    }

    proptest! {
        #[test]
        fn fields_decode_in_write_order(a in any::<u64>(), b in any::<u32>(), body in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut out = Vec::new();
            ord::put_u64(&mut out, a);
            ord::put_len_prefixed(&mut out, &body);
            ord::put_u32(&mut out, b);
            let mut cur = Cursor::new(&out);
            prop_assert_eq!(cur.u64().unwrap(), a);
            prop_assert_eq!(cur.len_prefixed().unwrap(), body.as_slice());
            prop_assert_eq!(cur.u32().unwrap(), b);
            prop_assert!(cur.finish().is_ok());
        }
    }
}
