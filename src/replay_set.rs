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

//! Set of batch sequence numbers flagged as replays.

use crate::error::Error;
use std::collections::HashSet;

/// The sequence numbers within a batch whose packets were detected as
/// replays. Serializes as the concatenation of big-endian `u16`s, with no
/// framing; order is not preserved across a round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySet {
	replays: HashSet<u16>,
}

impl ReplaySet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn size(&self) -> usize {
		self.replays.len()
	}

	pub fn is_empty(&self) -> bool {
		self.replays.is_empty()
	}

	pub fn add(&mut self, seq_num: u16) {
		self.replays.insert(seq_num);
	}

	pub fn contains(&self, seq_num: u16) -> bool {
		self.replays.contains(&seq_num)
	}

	/// Union `other` into `self`.
	pub fn merge(&mut self, other: &Self) {
		self.replays.extend(&other.replays);
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut encoded = Vec::with_capacity(self.replays.len() * 2);
		for seq_num in &self.replays {
			encoded.extend_from_slice(&seq_num.to_be_bytes());
		}
		encoded
	}

	pub fn decode(encoded: &[u8]) -> Result<Self, Error> {
		let mut chunks = encoded.chunks_exact(2);
		let mut set = Self::new();
		for chunk in &mut chunks {
			set.add(u16::from_be_bytes([chunk[0], chunk[1]]));
		}
		if !chunks.remainder().is_empty() {
			return Err(Error::UnexpectedEof)
		}
		Ok(set)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{Rng, SeedableRng};
	use rand_xoshiro::Xoshiro256StarStar;

	#[test]
	fn round_trip_is_order_independent() {
		let mut rng = Xoshiro256StarStar::seed_from_u64(11);
		let values: Vec<u16> = (0..100).map(|_| rng.gen()).collect();

		let mut forward = ReplaySet::new();
		for &val in &values {
			forward.add(val);
		}
		let mut backward = ReplaySet::new();
		for &val in values.iter().rev() {
			backward.add(val);
		}

		assert_eq!(ReplaySet::decode(&forward.encode()).unwrap(), forward);
		assert_eq!(ReplaySet::decode(&backward.encode()).unwrap(), forward);
	}

	#[test]
	fn empty_input_decodes_to_empty_set() {
		let set = ReplaySet::decode(&[]).unwrap();
		assert!(set.is_empty());
		assert_eq!(set.size(), 0);
	}

	#[test]
	fn trailing_odd_byte_is_rejected() {
		assert_eq!(ReplaySet::decode(&[0, 1, 2]), Err(Error::UnexpectedEof));
	}

	#[test]
	fn merge_is_union() {
		let mut a = ReplaySet::new();
		a.add(1);
		a.add(2);
		let mut b = ReplaySet::new();
		b.add(2);
		b.add(3);
		a.merge(&b);
		assert_eq!(a.size(), 3);
		for seq_num in 1..=3 {
			assert!(a.contains(seq_num));
		}
	}
}
