//! CRC-framed buffered stream wrappers.
//!
//! [`CrcWriter`] / [`CrcReader`] wrap a byte sink/source with an internal
//! buffer and a running CRC32 over data bytes only. The 4-byte digest is
//! serialized through a bypass path that shares the buffer (preserving
//! byte ordering relative to buffered-but-unflushed data) but never
//! updates the running checksum. Writing or checking a digest ends the
//! current segment and resets the checksum for the next one.
//!
//! Read-side hashing happens when bytes are handed to the caller, not
//! when the buffer is filled, so bytes read ahead but never returned
//! (end of input) leave the digest untouched.

use std::io::{self, Read, Write};

const DEFAULT_BUF_LEN: usize = 64 * 1024;

// ============================================================================
// CrcWriter
// ============================================================================

/// Buffered writer that checksums every data byte written through it.
pub struct CrcWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CrcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(inner, DEFAULT_BUF_LEN)
    }

    pub fn with_capacity(inner: W, capacity: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(capacity.max(8)),
            hasher: crc32fast::Hasher::new(),
        }
    }

    #[inline]
    fn push(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.buf.len() + bytes.len() > self.buf.capacity() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        if bytes.len() >= self.buf.capacity() {
            self.inner.write_all(bytes)?;
        } else {
            self.buf.extend_from_slice(bytes);
        }
        Ok(())
    }

    /// Current digest of the segment written so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Append the 4-byte little-endian digest via the bypass path and
    /// reset the checksum, starting a new segment.
    pub fn write_crc(&mut self) -> io::Result<u32> {
        let digest = self.hasher.clone().finalize();
        self.push(&digest.to_le_bytes())?;
        self.hasher = crc32fast::Hasher::new();
        Ok(digest)
    }

    /// Flush buffered bytes and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(&self.buf)?;
        self.buf.clear();
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.hasher.update(data);
        self.push(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.write_all(&self.buf)?;
        self.buf.clear();
        self.inner.flush()
    }
}

// ============================================================================
// CrcReader
// ============================================================================

/// Buffered reader that checksums every data byte handed to the caller.
pub struct CrcReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    hasher: crc32fast::Hasher,
}

impl<R: Read> CrcReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BUF_LEN)
    }

    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: vec![0u8; capacity.max(8)],
            pos: 0,
            filled: 0,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Serve bytes from the buffer without updating the checksum.
    /// Returns the number of bytes copied (0 only at end of input).
    fn read_bypass(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.filled {
            self.filled = self.inner.read(&mut self.buf)?;
            self.pos = 0;
            if self.filled == 0 {
                return Ok(0);
            }
        }
        let n = out.len().min(self.filled - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn read_bypass_exact(&mut self, mut out: &mut [u8]) -> io::Result<()> {
        while !out.is_empty() {
            let n = self.read_bypass(out)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream while reading checksum",
                ));
            }
            out = &mut out[n..];
        }
        Ok(())
    }

    /// Current digest of the segment read so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Read the 4-byte digest via the bypass path, compare it against the
    /// running checksum, and reset the checksum. Returns `false` on
    /// mismatch; callers treat that as fatal corruption of the segment.
    pub fn check_crc(&mut self) -> io::Result<bool> {
        let expected = self.hasher.clone().finalize();
        let mut digest = [0u8; 4];
        self.read_bypass_exact(&mut digest)?;
        self.hasher = crc32fast::Hasher::new();
        Ok(u32::from_le_bytes(digest) == expected)
    }

    /// Return the inner reader. Buffered read-ahead is discarded.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.read_bypass(out)?;
        self.hasher.update(&out[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint;

    fn framed_payload(data: &[u8]) -> Vec<u8> {
        let mut w = CrcWriter::new(Vec::new());
        w.write_all(data).unwrap();
        w.write_crc().unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn test_write_then_check_round_trip() {
        let bytes = framed_payload(b"hello graphpress");
        assert_eq!(bytes.len(), 16 + 4);

        let mut r = CrcReader::new(bytes.as_slice());
        let mut data = vec![0u8; 16];
        r.read_exact(&mut data).unwrap();
        assert_eq!(&data, b"hello graphpress");
        assert!(r.check_crc().unwrap());
    }

    #[test]
    fn test_payload_corruption_detected() {
        let clean = framed_payload(b"some payload bytes");
        for i in 0..clean.len() - 4 {
            let mut corrupt = clean.clone();
            corrupt[i] ^= 0x40;
            let mut r = CrcReader::new(corrupt.as_slice());
            let mut data = vec![0u8; clean.len() - 4];
            r.read_exact(&mut data).unwrap();
            assert!(!r.check_crc().unwrap(), "flip at byte {i} went undetected");
        }
    }

    #[test]
    fn test_trailer_corruption_detected() {
        let clean = framed_payload(b"x");
        for i in clean.len() - 4..clean.len() {
            let mut corrupt = clean.clone();
            corrupt[i] ^= 0x01;
            let mut r = CrcReader::new(corrupt.as_slice());
            let mut data = [0u8; 1];
            r.read_exact(&mut data).unwrap();
            assert!(!r.check_crc().unwrap(), "flip at trailer byte {i} went undetected");
        }
    }

    #[test]
    fn test_eof_read_leaves_digest_untouched() {
        let bytes = framed_payload(b"ab");
        let mut r = CrcReader::new(bytes.as_slice());
        let mut data = [0u8; 2];
        r.read_exact(&mut data).unwrap();
        let before = r.crc();
        // Attempting to read past the digest-terminated payload returns
        // bytes of the trailer region through the data path only if asked;
        // here we ask for nothing beyond and verify EOF behavior on a
        // drained source instead.
        let mut drained = CrcReader::new(&b""[..]);
        let mut sink = [0u8; 8];
        assert_eq!(drained.read(&mut sink).unwrap(), 0);
        assert_eq!(drained.crc(), crc32fast::Hasher::new().finalize());
        assert_eq!(r.crc(), before);
        assert!(r.check_crc().unwrap());
    }

    #[test]
    fn test_multiple_segments() {
        let mut w = CrcWriter::new(Vec::new());
        w.write_all(b"first segment").unwrap();
        w.write_crc().unwrap();
        w.write_all(b"second").unwrap();
        w.write_crc().unwrap();
        let bytes = w.finish().unwrap();

        let mut r = CrcReader::new(bytes.as_slice());
        let mut a = vec![0u8; 13];
        r.read_exact(&mut a).unwrap();
        assert!(r.check_crc().unwrap());
        let mut b = vec![0u8; 6];
        r.read_exact(&mut b).unwrap();
        assert!(r.check_crc().unwrap());
        assert_eq!(&b, b"second");
    }

    #[test]
    fn test_varints_through_framed_stream() {
        let mut w = CrcWriter::new(Vec::new());
        for v in [0u64, 1, 300, 1 << 40] {
            varint::write_u64(&mut w, v).unwrap();
        }
        w.write_crc().unwrap();
        let bytes = w.finish().unwrap();

        let mut r = CrcReader::new(bytes.as_slice());
        for v in [0u64, 1, 300, 1 << 40] {
            assert_eq!(varint::read_u64(&mut r).unwrap(), v);
        }
        assert!(r.check_crc().unwrap());
    }

    #[test]
    fn test_small_buffer_ordering_preserved() {
        // Digest bytes must interleave correctly with buffered data even
        // when the buffer is tiny.
        let mut w = CrcWriter::with_capacity(Vec::new(), 8);
        w.write_all(b"0123456789abcdef").unwrap();
        w.write_crc().unwrap();
        w.write_all(b"tail").unwrap();
        w.write_crc().unwrap();
        let bytes = w.finish().unwrap();

        let mut r = CrcReader::with_capacity(bytes.as_slice(), 8);
        let mut head = vec![0u8; 16];
        r.read_exact(&mut head).unwrap();
        assert!(r.check_crc().unwrap());
        let mut tail = vec![0u8; 4];
        r.read_exact(&mut tail).unwrap();
        assert_eq!(&tail, b"tail");
        assert!(r.check_crc().unwrap());
    }
}
