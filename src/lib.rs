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

//! Sphinx onion packet construction and processing.
//!
//! Senders build a fixed-size [`OnionPacket`] for a [`PaymentPath`] with
//! [`new_onion_packet`]; each hop peels one layer with a [`Router`], which
//! pairs the node's key-exchange capability ([`SingleKeyEcdh`]) with
//! replay-protection storage ([`ReplayLog`]). Packets are the same size at
//! every hop, so an observer cannot tell how far along its path a packet is,
//! and each hop learns nothing beyond its own forwarding instructions.

mod crypto;
mod error;
mod packet;
mod path;
mod replay_log;
mod replay_set;
mod router;
mod varint;

pub use crypto::{
	blind_kx_public, clamp_scalar, derive_kx_public, derive_kx_shared_secret, gen_kx_secret,
	generate_shared_secrets, hash_shared_secret, kx_shared_secret_is_identity, HeaderMac, KxPair,
	KxPublic, SharedSecret, SingleKeyEcdh, KX_PUBLIC_SIZE, MAC_SIZE, SHARED_SECRET_SIZE,
};
pub use error::Error;
pub use packet::{
	deterministic_packet_filler, new_onion_packet, random_packet_filler, OnionPacket,
	PacketFiller, RoutingInfo, BASE_VERSION, MAX_HOPS, PACKET_SIZE, ROUTING_INFO_SIZE,
};
pub use path::{
	Address, HopData, HopPayload, OnionHop, PaymentPath, PayloadType, ADDRESS_SIZE, HOP_DATA_SIZE,
	LEGACY_HOP_PAYLOAD_SIZE,
};
pub use replay_log::{Batch, HashPrefix, MemoryReplayLog, ReplayLog, HASH_PREFIX_SIZE};
pub use replay_set::ReplaySet;
pub use router::{Action, ProcessedPacket, Router, Tx};
pub use varint::{read_varint, varint_size, write_varint};
