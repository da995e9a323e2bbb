// Copyright 2022 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Canonical compact-size integer codec used to frame variable-length hop
//! payloads. Values below 0xfd encode as a single byte; wider values are
//! prefixed with a discriminant byte (0xfd, 0xfe, 0xff) followed by a 2, 4,
//! or 8 byte big-endian body. Decoding rejects any encoding that is not the
//! unique minimal form for the value, so higher layers can rely on one
//! encoding per value when parsing attacker-supplied lengths.

use crate::error::Error;
use std::io::{Read, Write};

/// Write `val` to `w` in its canonical compact form (1, 3, 5, or 9 bytes).
pub fn write_varint(w: &mut impl Write, val: u64) -> std::io::Result<()> {
	let mut buf = [0; 9];
	let encoded = match val {
		0..=0xfc => {
			buf[0] = val as u8;
			&buf[..1]
		},
		0xfd..=0xffff => {
			buf[0] = 0xfd;
			buf[1..3].copy_from_slice(&(val as u16).to_be_bytes());
			&buf[..3]
		},
		0x10000..=0xffff_ffff => {
			buf[0] = 0xfe;
			buf[1..5].copy_from_slice(&(val as u32).to_be_bytes());
			&buf[..5]
		},
		_ => {
			buf[0] = 0xff;
			buf[1..9].copy_from_slice(&val.to_be_bytes());
			&buf[..9]
		},
	};
	w.write_all(encoded)
}

/// Number of bytes [`write_varint`] produces for `val`.
pub fn varint_size(val: u64) -> usize {
	match val {
		0..=0xfc => 1,
		0xfd..=0xffff => 3,
		0x10000..=0xffff_ffff => 5,
		_ => 9,
	}
}

/// Read a canonically encoded compact-size integer from `r`. Fails with
/// [`Error::UnexpectedEof`] if the input ends mid-value and with
/// [`Error::NonCanonicalVarInt`] if a shorter form could have encoded the
/// same value.
pub fn read_varint(r: &mut impl Read) -> Result<u64, Error> {
	let mut discriminant = [0; 1];
	r.read_exact(&mut discriminant).map_err(|_| Error::UnexpectedEof)?;
	read_varint_body(discriminant[0], r)
}

/// As [`read_varint`], but with the discriminant byte already consumed by the
/// caller. Used when parsing hop payloads, where the leading byte doubles as
/// the legacy-format marker.
pub(crate) fn read_varint_body(discriminant: u8, r: &mut impl Read) -> Result<u64, Error> {
	let mut buf = [0; 8];
	match discriminant {
		0xfd => {
			r.read_exact(&mut buf[..2]).map_err(|_| Error::UnexpectedEof)?;
			let val = u16::from_be_bytes([buf[0], buf[1]]) as u64;
			if val < 0xfd {
				return Err(Error::NonCanonicalVarInt)
			}
			Ok(val)
		},
		0xfe => {
			r.read_exact(&mut buf[..4]).map_err(|_| Error::UnexpectedEof)?;
			let val = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
			if val <= 0xffff {
				return Err(Error::NonCanonicalVarInt)
			}
			Ok(val)
		},
		0xff => {
			r.read_exact(&mut buf).map_err(|_| Error::UnexpectedEof)?;
			let val = u64::from_be_bytes(buf);
			if val <= 0xffff_ffff {
				return Err(Error::NonCanonicalVarInt)
			}
			Ok(val)
		},
		_ => Ok(discriminant as u64),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn round_trip(val: u64) -> (usize, u64) {
		let mut encoded = Vec::new();
		write_varint(&mut encoded, val).unwrap();
		assert_eq!(encoded.len(), varint_size(val));
		let mut r = &encoded[..];
		let decoded = read_varint(&mut r).unwrap();
		assert!(r.is_empty(), "decode left trailing bytes");
		(encoded.len(), decoded)
	}

	#[test]
	fn round_trips_at_boundaries() {
		for (val, size) in [
			(0, 1),
			(0xfc, 1),
			(0xfd, 3),
			(0xffff, 3),
			(0x10000, 5),
			(0xffff_ffff, 5),
			(0x1_0000_0000, 9),
			(u64::MAX, 9),
		] {
			assert_eq!(round_trip(val), (size, val));
		}
	}

	#[test]
	fn rejects_non_canonical_forms() {
		// 0xfd prefix for a value that fits in a single byte.
		assert_eq!(read_varint(&mut &[0xfd, 0x00, 0x05][..]), Err(Error::NonCanonicalVarInt));
		assert_eq!(read_varint(&mut &[0xfd, 0x00, 0xfc][..]), Err(Error::NonCanonicalVarInt));
		// 0xfe prefix for a value that fits in two bytes.
		assert_eq!(
			read_varint(&mut &[0xfe, 0x00, 0x00, 0xff, 0xff][..]),
			Err(Error::NonCanonicalVarInt)
		);
		// 0xff prefix for a value that fits in four bytes.
		assert_eq!(
			read_varint(&mut &[0xff, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff][..]),
			Err(Error::NonCanonicalVarInt)
		);
	}

	#[test]
	fn truncation_fails_distinctly_from_non_canonical() {
		assert_eq!(read_varint(&mut &[][..]), Err(Error::UnexpectedEof));
		assert_eq!(read_varint(&mut &[0xfd, 0x01][..]), Err(Error::UnexpectedEof));
		assert_eq!(read_varint(&mut &[0xfe, 0x01, 0x02, 0x03][..]), Err(Error::UnexpectedEof));
		assert_eq!(read_varint(&mut &[0xff][..]), Err(Error::UnexpectedEof));
	}
}
