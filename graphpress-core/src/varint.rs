//! Stop-bit variable-length integer codec.
//!
//! Every value is a sequence of 7-bit payload groups, least significant
//! group first. The **terminal** byte of a value has bit 7 set;
//! continuation bytes have it clear. A canonical u64 encoding is at most
//! 10 bytes (9 continuation bytes plus the terminal byte); a decoder that
//! consumes more than 9 continuation bytes without reaching a terminal
//! byte rejects the input as malformed.
//!
//! The signed variant maps `v` to `!(v << 1)` for negative values and
//! `v << 1` otherwise, so small magnitudes of either sign encode small.
//!
//! [`write_u64_cstr`] is the inverted-marker variant (bit 7 = "more bytes
//! follow") used where the encoded bytes must embed inside a C-style
//! string: for values >= 1 no emitted byte is ever zero, because every
//! continuation byte carries the marker and the terminal byte holds the
//! most significant (non-zero) group.

use std::io::{self, Read, Write};

/// Maximum encoded length of a u64 (9 continuation bytes + terminal).
pub const MAX_VARINT_LEN: usize = 10;

/// Encoded byte length of `value`.
#[inline]
pub fn len_u64(value: u64) -> usize {
    let bits = if value == 0 { 1 } else { 64 - value.leading_zeros() as usize };
    (bits - 1) / 7 + 1
}

/// Append the encoding of `value` to `buf`.
#[inline]
pub fn encode_u64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let group = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(group | 0x80);
            return;
        }
        buf.push(group);
    }
}

/// Decode a u64 from `buf` starting at `*pos`, advancing `*pos` past the
/// consumed bytes.
#[inline]
pub fn decode_u64(buf: &[u8], pos: &mut usize) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..MAX_VARINT_LEN {
        let Some(&byte) = buf.get(*pos) else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "varint: unexpected end of buffer",
            ));
        };
        *pos += 1;
        let payload = (byte & 0x7F) as u64;
        if shift >= 63 && payload > 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
        }
        result |= payload << shift;
        if byte & 0x80 != 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint: no terminal byte within 10 bytes",
    ))
}

/// Write the encoding of `value` to `out`. Returns the number of bytes
/// written.
#[inline]
pub fn write_u64<W: Write + ?Sized>(out: &mut W, mut value: u64) -> io::Result<usize> {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let mut n = 0;
    loop {
        let group = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            scratch[n] = group | 0x80;
            n += 1;
            break;
        }
        scratch[n] = group;
        n += 1;
    }
    out.write_all(&scratch[..n])?;
    Ok(n)
}

/// Read one encoded u64 from `src`.
#[inline]
pub fn read_u64<R: Read + ?Sized>(src: &mut R) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        src.read_exact(&mut byte)?;
        let payload = (byte[0] & 0x7F) as u64;
        if shift >= 63 && payload > 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
        }
        result |= payload << shift;
        if byte[0] & 0x80 != 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint: no terminal byte within 10 bytes",
    ))
}

/// Write a signed value via the bit-rotated mapping over [`write_u64`].
#[inline]
pub fn write_i64<W: Write + ?Sized>(out: &mut W, value: i64) -> io::Result<usize> {
    let mapped = if value < 0 {
        !((value as u64) << 1)
    } else {
        (value as u64) << 1
    };
    write_u64(out, mapped)
}

/// Read a signed value written by [`write_i64`].
#[inline]
pub fn read_i64<R: Read + ?Sized>(src: &mut R) -> io::Result<i64> {
    let mapped = read_u64(src)?;
    Ok(((mapped >> 1) as i64) ^ -((mapped & 1) as i64))
}

/// Write `value` (>= 1) with the inverted marker convention: bit 7 set on
/// continuation bytes, clear on the terminal byte. No emitted byte is
/// zero, so the encoding can live inside a NUL-terminated string.
#[inline]
pub fn write_u64_cstr<W: Write + ?Sized>(out: &mut W, mut value: u64) -> io::Result<usize> {
    if value == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "varint-cstr: value must be >= 1",
        ));
    }
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let mut n = 0;
    loop {
        let group = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            scratch[n] = group;
            n += 1;
            break;
        }
        scratch[n] = group | 0x80;
        n += 1;
    }
    out.write_all(&scratch[..n])?;
    Ok(n)
}

/// Read one value written by [`write_u64_cstr`].
#[inline]
pub fn read_u64_cstr<R: Read + ?Sized>(src: &mut R) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        src.read_exact(&mut byte)?;
        if byte[0] == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint-cstr: zero byte in encoding",
            ));
        }
        let payload = (byte[0] & 0x7F) as u64;
        if shift >= 63 && payload > 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
        }
        result |= payload << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint-cstr: no terminal byte within 10 bytes",
    ))
}
