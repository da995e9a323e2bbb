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

//! Persistent record of processed packets, keyed by a shortened digest of the
//! per-hop shared secret. Whoever controls the log controls replay
//! protection; everything else in packet processing is stateless.

use crate::{error::Error, replay_set::ReplaySet};
use parking_lot::Mutex;
use std::collections::{hash_map, BTreeMap, HashMap, HashSet};

/// Size in bytes of a [`HashPrefix`].
pub const HASH_PREFIX_SIZE: usize = 20;
/// Shortened digest of a shared secret; the replay-log key.
pub type HashPrefix = [u8; HASH_PREFIX_SIZE];

/// Replay-protection storage. Entries are immutable once written: `put` for a
/// present key always fails and never overwrites the stored value.
///
/// Methods take `&self` so one log can be shared across processing threads;
/// implementations must make the check-and-insert of `put` atomic, and all of
/// `put_batch` a single indivisible operation.
pub trait ReplayLog {
	/// Prepare the log for use. Must be called before any other operation.
	fn start(&self) -> Result<(), Error>;

	/// Release the log's resources. Operations after this fail with
	/// [`Error::LogNotStarted`] until the next `start`.
	fn stop(&self);

	/// Look up the value stored for `hash_prefix`, or
	/// [`Error::EntryNotFound`].
	fn get(&self, hash_prefix: &HashPrefix) -> Result<u32, Error>;

	/// Insert `hash_prefix` if absent, else fail with
	/// [`Error::ReplayedPacket`] leaving the stored value untouched.
	fn put(&self, hash_prefix: &HashPrefix, cltv: u32) -> Result<(), Error>;

	/// Remove `hash_prefix` if present. Deleting an absent entry is not an
	/// error.
	fn delete(&self, hash_prefix: &HashPrefix) -> Result<(), Error>;

	/// Commit a batch atomically, returning the sequence numbers whose
	/// entries were replays. Committing a batch with an already-committed ID
	/// replays the original result without touching the log again.
	fn put_batch(&self, batch: &mut Batch) -> Result<ReplaySet, Error>;
}

struct BatchEntry {
	hash_prefix: HashPrefix,
	cltv: u32,
}

/// A set of entries to be committed to a [`ReplayLog`] as one atomic unit.
/// Entries are keyed by a caller-assigned `u16` sequence number; the batch ID
/// makes the commit idempotent across retries.
pub struct Batch {
	id: Vec<u8>,
	entries: BTreeMap<u16, BatchEntry>,
	replay_cache: HashSet<HashPrefix>,
	replay_set: ReplaySet,
	is_committed: bool,
}

impl Batch {
	pub fn new(id: impl Into<Vec<u8>>) -> Self {
		Self {
			id: id.into(),
			entries: BTreeMap::new(),
			replay_cache: HashSet::new(),
			replay_set: ReplaySet::new(),
			is_committed: false,
		}
	}

	pub fn id(&self) -> &[u8] {
		&self.id
	}

	/// Add an entry to the batch. A hash prefix already present in the batch
	/// is not an error; the sequence number is recorded as an intra-batch
	/// replay and reported by the commit.
	pub fn put(&mut self, seq_num: u16, hash_prefix: &HashPrefix, cltv: u32) -> Result<(), Error> {
		if self.is_committed {
			return Err(Error::AlreadyCommitted)
		}
		if self.replay_cache.contains(hash_prefix) {
			self.replay_set.add(seq_num);
			return Ok(())
		}
		self.entries.insert(seq_num, BatchEntry { hash_prefix: *hash_prefix, cltv });
		self.replay_cache.insert(*hash_prefix);
		Ok(())
	}
}

#[derive(Default)]
struct MemoryLogState {
	entries: HashMap<HashPrefix, u32>,
	/// Result memo per committed batch ID, for idempotent commits.
	batches: HashMap<Vec<u8>, ReplaySet>,
}

/// In-memory [`ReplayLog`]. All operations run under a single mutex
/// acquisition, making `put` an atomic check-and-insert and `put_batch` an
/// atomic commit.
#[derive(Default)]
pub struct MemoryReplayLog {
	state: Mutex<Option<MemoryLogState>>,
}

impl MemoryReplayLog {
	pub fn new() -> Self {
		Self::default()
	}
}

fn put_in_state(state: &mut MemoryLogState, hash_prefix: &HashPrefix, cltv: u32) -> Result<(), Error> {
	match state.entries.entry(*hash_prefix) {
		hash_map::Entry::Occupied(_) => Err(Error::ReplayedPacket),
		hash_map::Entry::Vacant(entry) => {
			entry.insert(cltv);
			Ok(())
		},
	}
}

impl ReplayLog for MemoryReplayLog {
	fn start(&self) -> Result<(), Error> {
		*self.state.lock() = Some(MemoryLogState::default());
		Ok(())
	}

	fn stop(&self) {
		*self.state.lock() = None;
	}

	fn get(&self, hash_prefix: &HashPrefix) -> Result<u32, Error> {
		let state = self.state.lock();
		let state = state.as_ref().ok_or(Error::LogNotStarted)?;
		state.entries.get(hash_prefix).copied().ok_or(Error::EntryNotFound)
	}

	fn put(&self, hash_prefix: &HashPrefix, cltv: u32) -> Result<(), Error> {
		let mut state = self.state.lock();
		let state = state.as_mut().ok_or(Error::LogNotStarted)?;
		put_in_state(state, hash_prefix, cltv)
	}

	fn delete(&self, hash_prefix: &HashPrefix) -> Result<(), Error> {
		let mut state = self.state.lock();
		let state = state.as_mut().ok_or(Error::LogNotStarted)?;
		state.entries.remove(hash_prefix);
		Ok(())
	}

	fn put_batch(&self, batch: &mut Batch) -> Result<ReplaySet, Error> {
		let mut state = self.state.lock();
		let state = state.as_mut().ok_or(Error::LogNotStarted)?;

		if let Some(replays) = state.batches.get(&batch.id) {
			log::debug!(
				target: "sphinx",
				"batch {:?} already committed, replaying result", batch.id);
			batch.is_committed = true;
			return Ok(replays.clone())
		}

		let mut replays = ReplaySet::new();
		for (seq_num, entry) in &batch.entries {
			match put_in_state(state, &entry.hash_prefix, entry.cltv) {
				Ok(()) => (),
				Err(Error::ReplayedPacket) => replays.add(*seq_num),
				Err(err) => return Err(err),
			}
		}
		replays.merge(&batch.replay_set);

		state.batches.insert(batch.id.clone(), replays.clone());
		batch.is_committed = true;
		Ok(replays)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn started_log() -> MemoryReplayLog {
		let log = MemoryReplayLog::new();
		log.start().unwrap();
		log
	}

	#[test]
	fn storage_and_retrieval() {
		let log = started_log();
		let hash_prefix = [5; HASH_PREFIX_SIZE];

		assert_eq!(log.get(&hash_prefix), Err(Error::EntryNotFound));
		log.put(&hash_prefix, 1).unwrap();
		assert_eq!(log.put(&hash_prefix, 1), Err(Error::ReplayedPacket));
		assert_eq!(log.get(&hash_prefix), Ok(1));
		log.delete(&hash_prefix).unwrap();
		assert_eq!(log.get(&hash_prefix), Err(Error::EntryNotFound));
		log.put(&hash_prefix, 2).unwrap();
		assert_eq!(log.get(&hash_prefix), Ok(2));
	}

	#[test]
	fn put_never_overwrites() {
		let log = started_log();
		let hash_prefix = [7; HASH_PREFIX_SIZE];
		log.put(&hash_prefix, 100).unwrap();
		assert_eq!(log.put(&hash_prefix, 200), Err(Error::ReplayedPacket));
		assert_eq!(log.get(&hash_prefix), Ok(100));
	}

	#[test]
	fn concurrent_puts_of_one_key_succeed_exactly_once() {
		let log = started_log();
		let hash_prefix = [6; HASH_PREFIX_SIZE];

		let successes: usize = std::thread::scope(|scope| {
			let handles: Vec<_> =
				(0..8).map(|_| scope.spawn(|| log.put(&hash_prefix, 1).is_ok())).collect();
			handles.into_iter().map(|handle| handle.join().unwrap()).filter(|&ok| ok).count()
		});

		assert_eq!(successes, 1);
		assert_eq!(log.get(&hash_prefix), Ok(1));
	}

	#[test]
	fn delete_is_idempotent() {
		let log = started_log();
		let hash_prefix = [9; HASH_PREFIX_SIZE];
		log.delete(&hash_prefix).unwrap();
		log.put(&hash_prefix, 1).unwrap();
		log.delete(&hash_prefix).unwrap();
		log.delete(&hash_prefix).unwrap();
	}

	#[test]
	fn lifecycle_is_enforced() {
		let log = MemoryReplayLog::new();
		let hash_prefix = [1; HASH_PREFIX_SIZE];
		assert_eq!(log.get(&hash_prefix), Err(Error::LogNotStarted));
		assert_eq!(log.put(&hash_prefix, 1), Err(Error::LogNotStarted));

		log.start().unwrap();
		log.put(&hash_prefix, 1).unwrap();
		log.stop();
		assert_eq!(log.get(&hash_prefix), Err(Error::LogNotStarted));
	}

	#[test]
	fn put_batch_detects_replays_and_is_idempotent() {
		let log = started_log();
		let hash1 = [1; HASH_PREFIX_SIZE];
		let hash2 = [2; HASH_PREFIX_SIZE];

		// Duplicate hash prefix within one batch: accepted, reported.
		let mut batch = Batch::new(&b"batch-1"[..]);
		batch.put(0, &hash1, 1).unwrap();
		batch.put(1, &hash1, 1).unwrap();
		let replays = log.put_batch(&mut batch).unwrap();
		assert_eq!(replays.size(), 1);
		assert!(replays.contains(1));
		assert_eq!(log.get(&hash1), Ok(1));

		// A later batch replaying hash1 reports it against its own sequence
		// number; the fresh entry still commits.
		let mut batch = Batch::new(&b"batch-2"[..]);
		batch.put(1, &hash1, 3).unwrap();
		batch.put(2, &hash2, 2).unwrap();
		let replays = log.put_batch(&mut batch).unwrap();
		assert_eq!(replays.size(), 1);
		assert!(replays.contains(1));
		assert_eq!(log.get(&hash2), Ok(2));

		// Committing a batch with the same ID again replays the memoized
		// result rather than re-running the puts.
		let mut batch = Batch::new(&b"batch-2"[..]);
		batch.put(1, &hash1, 3).unwrap();
		batch.put(2, &hash2, 2).unwrap();
		let replays = log.put_batch(&mut batch).unwrap();
		assert_eq!(replays.size(), 1);
		assert!(replays.contains(1));
		assert_eq!(log.get(&hash2), Ok(2));
	}

	#[test]
	fn committed_batch_rejects_further_puts() {
		let log = started_log();
		let mut batch = Batch::new(&b"batch"[..]);
		batch.put(0, &[3; HASH_PREFIX_SIZE], 1).unwrap();
		log.put_batch(&mut batch).unwrap();
		assert_eq!(batch.put(1, &[4; HASH_PREFIX_SIZE], 1), Err(Error::AlreadyCommitted));
	}
}
