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

//! A single hop's packet processing: one onion key, one replay log.

use crate::{
	crypto::{
		blind_shared_secret, hash_shared_secret, kx_shared_secret_is_identity, KxPublic,
		SharedSecret, SingleKeyEcdh, MAC_SIZE,
	},
	error::Error,
	packet::{unwrap_packet, OnionPacket},
	path::{HopData, HopPayload},
	replay_log::{Batch, ReplayLog},
	replay_set::ReplaySet,
};

/// What the caller should do with a successfully processed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	/// Forward `next_packet` to the hop named in the payload.
	MoreHops,
	/// This node is the final hop; the payload is for local consumption.
	ExitNode,
}

/// The outcome of peeling one layer off an onion packet.
pub struct ProcessedPacket {
	pub action: Action,
	/// Decoded fixed-format forwarding instructions, for legacy payloads.
	pub hop_data: Option<HopData>,
	/// The raw payload, including its type and body.
	pub payload: HopPayload,
	/// The packet for the next hop. `None` at the exit node.
	pub next_packet: Option<Box<OnionPacket>>,
}

/// Packet processor for one node, generic over the ECDH capability and the
/// replay-log backend.
pub struct Router<K, L> {
	onion_key: K,
	log: L,
}

impl<K: SingleKeyEcdh, L: ReplayLog> Router<K, L> {
	pub fn new(onion_key: K, log: L) -> Self {
		Self { onion_key, log }
	}

	/// The public key senders address this node by.
	pub fn public_key(&self) -> &KxPublic {
		self.onion_key.public_key()
	}

	pub fn start(&self) -> Result<(), Error> {
		self.log.start()
	}

	pub fn stop(&self) {
		self.log.stop()
	}

	/// Process an incoming packet: verify, decrypt, and record it in the
	/// replay log under `incoming_cltv`.
	///
	/// The replay check is deliberately the last gate. A packet that fails
	/// the MAC or fails to parse leaves no trace in the log, so an attacker
	/// cannot poison the log with garbage carrying a victim's ephemeral key.
	pub fn process_onion_packet(
		&self,
		packet: &OnionPacket,
		assoc_data: &[u8],
		incoming_cltv: u32,
		blinding_point: Option<&KxPublic>,
	) -> Result<ProcessedPacket, Error> {
		let shared_secret = self.generate_shared_secret(&packet.ephemeral_key, blinding_point)?;
		let hash_prefix = hash_shared_secret(&shared_secret);
		let processed = process_packet(packet, &shared_secret, assoc_data)?;
		self.log.put(&hash_prefix, incoming_cltv)?;
		log::trace!(
			target: "sphinx",
			"Processed onion packet, action {:?}", processed.action);
		Ok(processed)
	}

	/// As [`Self::process_onion_packet`], but without touching the replay
	/// log. For re-deriving a previously processed packet.
	pub fn reconstruct_onion_packet(
		&self,
		packet: &OnionPacket,
		assoc_data: &[u8],
		blinding_point: Option<&KxPublic>,
	) -> Result<ProcessedPacket, Error> {
		let shared_secret = self.generate_shared_secret(&packet.ephemeral_key, blinding_point)?;
		process_packet(packet, &shared_secret, assoc_data)
	}

	/// Begin a transactional batch. Packets processed through the returned
	/// [`Tx`] only reach the replay log on [`Tx::commit`].
	pub fn begin_txn(&self, id: impl Into<Vec<u8>>) -> Tx<'_, K, L> {
		Tx { router: self, batch: Batch::new(id) }
	}

	fn generate_shared_secret(
		&self,
		ephemeral_key: &KxPublic,
		blinding_point: Option<&KxPublic>,
	) -> Result<SharedSecret, Error> {
		let shared_secret = match blinding_point {
			None => self.onion_key.ecdh(ephemeral_key),
			Some(blinding_point) => {
				let blinding_secret = self.onion_key.ecdh(blinding_point);
				if kx_shared_secret_is_identity(&blinding_secret) {
					return Err(Error::InvalidPublicKey)
				}
				blind_shared_secret(&self.onion_key.ecdh(ephemeral_key), &blinding_secret)
			},
		};
		if kx_shared_secret_is_identity(&shared_secret) {
			return Err(Error::InvalidPublicKey)
		}
		Ok(shared_secret)
	}
}

/// A batch of packets being processed transactionally. Dropping a `Tx`
/// without committing discards it; the replay log is never touched.
pub struct Tx<'a, K, L> {
	router: &'a Router<K, L>,
	batch: Batch,
}

impl<K: SingleKeyEcdh, L: ReplayLog> Tx<'_, K, L> {
	/// Process a packet, staging its replay-log entry under `seq_num` instead
	/// of writing it. Intra-batch replays succeed here and are reported by
	/// [`Self::commit`].
	pub fn process_onion_packet(
		&mut self,
		seq_num: u16,
		packet: &OnionPacket,
		assoc_data: &[u8],
		incoming_cltv: u32,
		blinding_point: Option<&KxPublic>,
	) -> Result<ProcessedPacket, Error> {
		let shared_secret =
			self.router.generate_shared_secret(&packet.ephemeral_key, blinding_point)?;
		let hash_prefix = hash_shared_secret(&shared_secret);
		let processed = process_packet(packet, &shared_secret, assoc_data)?;
		self.batch.put(seq_num, &hash_prefix, incoming_cltv)?;
		Ok(processed)
	}

	/// Commit the staged entries atomically. Returns the sequence numbers
	/// whose packets were replays, intra-batch or against the log.
	pub fn commit(mut self) -> Result<ReplaySet, Error> {
		self.router.log.put_batch(&mut self.batch)
	}
}

fn process_packet(
	packet: &OnionPacket,
	shared_secret: &SharedSecret,
	assoc_data: &[u8],
) -> Result<ProcessedPacket, Error> {
	let (next_packet, payload) = unwrap_packet(packet, shared_secret, assoc_data)?;
	let action = if payload.hmac == [0; MAC_SIZE] { Action::ExitNode } else { Action::MoreHops };
	Ok(ProcessedPacket {
		action,
		hop_data: payload.hop_data(),
		payload,
		next_packet: (action == Action::MoreHops).then(|| Box::new(next_packet)),
	})
}
