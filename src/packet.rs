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

//! Onion packet construction and single-layer unwrapping.
//!
//! Packet layout:
//!
//! - Version byte (always [`BASE_VERSION`]).
//! - Ephemeral key-exchange public key for the current hop.
//! - Fixed-size routing-info blob; each hop strips its leading payload and
//!   re-encrypts the remainder.
//! - Header MAC over the routing info and associated data.
//!
//! Every packet is exactly [`PACKET_SIZE`] bytes regardless of path length;
//! filler generation keeps the routing-info blob the same size at every hop.

use crate::{
	crypto::{
		apply_keystream, blind_kx_public, compute_mac, derive_kx_public, derive_mac_key,
		derive_pad_key, derive_stream_key, generate_cipher_stream, generate_shared_secrets,
		HeaderMac, KxPublic, SharedSecret, KX_PUBLIC_SIZE, MAC_SIZE,
	},
	error::Error,
	path::{HopPayload, PaymentPath, LEGACY_HOP_PAYLOAD_SIZE},
};
use arrayref::array_refs;
use arrayvec::ArrayVec;
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use std::io::{Read, Write};

/// The only packet version currently defined.
pub const BASE_VERSION: u8 = 0;

/// Size in bytes of the routing-info blob, constant for every packet.
pub const ROUTING_INFO_SIZE: usize = 1300;
/// The encrypted routing-info blob.
pub type RoutingInfo = [u8; ROUTING_INFO_SIZE];

/// Keystream generated per hop. Twice the routing-info size so unwrapping can
/// recover the bytes the sender's filler committed past the end of the blob.
const NUM_STREAM_BYTES: usize = 2 * ROUTING_INFO_SIZE;

/// Maximum number of hops in a path; this many legacy frames exactly fill the
/// routing-info blob.
pub const MAX_HOPS: usize = ROUTING_INFO_SIZE / LEGACY_HOP_PAYLOAD_SIZE;

/// Total packet size in bytes.
pub const PACKET_SIZE: usize = 1 + KX_PUBLIC_SIZE + ROUTING_INFO_SIZE + MAC_SIZE;

/// A Sphinx onion packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionPacket {
	pub version: u8,
	/// Ephemeral public key the current hop performs ECDH against.
	pub ephemeral_key: KxPublic,
	pub routing_info: RoutingInfo,
	pub header_mac: HeaderMac,
}

impl OnionPacket {
	pub fn encode(&self, w: &mut impl Write) -> std::io::Result<()> {
		w.write_all(&[self.version])?;
		w.write_all(&self.ephemeral_key)?;
		w.write_all(&self.routing_info)?;
		w.write_all(&self.header_mac)
	}

	pub fn decode(r: &mut impl Read) -> Result<Self, Error> {
		let mut buf = [0; PACKET_SIZE];
		r.read_exact(&mut buf).map_err(|_| Error::UnexpectedEof)?;
		let (version, ephemeral_key, routing_info, header_mac) =
			array_refs![&buf, 1, KX_PUBLIC_SIZE, ROUTING_INFO_SIZE, MAC_SIZE];
		if version[0] != BASE_VERSION {
			return Err(Error::UnsupportedVersion)
		}
		Ok(Self {
			version: version[0],
			ephemeral_key: *ephemeral_key,
			routing_info: *routing_info,
			header_mac: *header_mac,
		})
	}
}

/// Strategy for filling the initial routing-info blob before the payload
/// layers are folded in. The unused tail bytes of the blob come from here.
pub type PacketFiller = fn(&Scalar, &mut RoutingInfo);

/// Fill the blob with a keystream derived from the session key. Construction
/// becomes a pure function of its inputs; intended for test vectors.
pub fn deterministic_packet_filler(session_key: &Scalar, routing_info: &mut RoutingInfo) {
	let pad_key = derive_pad_key(&session_key.to_bytes());
	let stream = generate_cipher_stream(&pad_key, ROUTING_INFO_SIZE);
	routing_info.copy_from_slice(&stream);
}

/// Fill the blob with fresh random bytes. Intended for production use.
pub fn random_packet_filler(_session_key: &Scalar, routing_info: &mut RoutingInfo) {
	rand::thread_rng().fill_bytes(routing_info);
}

/// Build an onion packet for `path`, with each layer's MAC covering
/// `assoc_data` alongside the routing info.
pub fn new_onion_packet(
	path: &PaymentPath,
	session_key: &Scalar,
	assoc_data: &[u8],
	filler: PacketFiller,
) -> Result<OnionPacket, Error> {
	let num_hops = path.len();
	if num_hops == 0 {
		return Err(Error::EmptyPath)
	}
	// Size check up front, before any key exchange.
	if path.total_payload_size() > ROUTING_INFO_SIZE {
		return Err(Error::ExceedsMaxPayloadSize)
	}

	let node_keys: ArrayVec<KxPublic, MAX_HOPS> = path.iter().map(|hop| hop.node_pub).collect();
	let shared_secrets = generate_shared_secrets(&node_keys, session_key);
	let filler_bytes = generate_header_padding(path, &shared_secrets);

	let mut routing_info = [0; ROUTING_INFO_SIZE];
	filler(session_key, &mut routing_info);

	// A zero MAC under the last hop's payload is the exit sentinel.
	let mut next_hmac = [0; MAC_SIZE];
	let mut encoded_payload = Vec::with_capacity(LEGACY_HOP_PAYLOAD_SIZE);
	for i in (0..num_hops).rev() {
		let stream_key = derive_stream_key(&shared_secrets[i]);
		let mac_key = derive_mac_key(&shared_secrets[i]);

		let mut hop_payload = path[i].hop_payload.clone();
		hop_payload.hmac = next_hmac;
		encoded_payload.clear();
		hop_payload.encode(&mut encoded_payload).expect("Writing to a Vec cannot fail");

		// Shift right to make room, prepend this hop's payload, encrypt.
		let shift = encoded_payload.len();
		routing_info.copy_within(..ROUTING_INFO_SIZE - shift, shift);
		routing_info[..shift].copy_from_slice(&encoded_payload);
		let stream = generate_cipher_stream(&stream_key, ROUTING_INFO_SIZE);
		apply_keystream(&mut routing_info, &stream);

		// The outermost layer for the last hop carries the filler, which
		// matches what the intermediate hops' keystreams will produce past
		// the end of the blob.
		if i == num_hops - 1 {
			routing_info[ROUTING_INFO_SIZE - filler_bytes.len()..].copy_from_slice(&filler_bytes);
		}

		next_hmac = compute_mac(&mac_key, &[&routing_info, assoc_data]);
	}

	Ok(OnionPacket {
		version: BASE_VERSION,
		ephemeral_key: derive_kx_public(session_key),
		routing_info,
		header_mac: next_hmac,
	})
}

/// Generate the filler the final layer carries: the bytes each intermediate
/// hop's keystream would have produced past the end of the routing-info blob,
/// accumulated over the path. This is what keeps the blob the same size at
/// every hop without revealing the path position.
fn generate_header_padding(path: &PaymentPath, shared_secrets: &[SharedSecret]) -> Vec<u8> {
	let num_hops = path.len();
	let filler_size: usize =
		path[..num_hops - 1].iter().map(|hop| hop.hop_payload.num_bytes()).sum();
	let mut filler = vec![0; filler_size];

	let mut accumulated = 0;
	for (hop, shared_secret) in path[..num_hops - 1].iter().zip(shared_secrets) {
		let hop_size = hop.hop_payload.num_bytes();
		let stream_key = derive_stream_key(shared_secret);
		let stream = generate_cipher_stream(&stream_key, NUM_STREAM_BYTES);
		apply_keystream(
			&mut filler[..accumulated + hop_size],
			&stream[ROUTING_INFO_SIZE - accumulated..ROUTING_INFO_SIZE + hop_size],
		);
		accumulated += hop_size;
	}
	filler
}

/// Peel one layer: verify the MAC, decrypt, split off the leading hop
/// payload, and derive the packet for the next hop. The returned packet is
/// only meaningful if the payload's MAC is non-zero (forward case).
pub(crate) fn unwrap_packet(
	packet: &OnionPacket,
	shared_secret: &SharedSecret,
	assoc_data: &[u8],
) -> Result<(OnionPacket, HopPayload), Error> {
	use subtle::ConstantTimeEq;

	let mac_key = derive_mac_key(shared_secret);
	let expected_mac = compute_mac(&mac_key, &[&packet.routing_info, assoc_data]);
	if expected_mac[..].ct_eq(&packet.header_mac[..]).unwrap_u8() == 0 {
		return Err(Error::InvalidMac)
	}

	// Decrypt with a doubled keystream; the zero bytes past the blob pick up
	// the filler for the next hop.
	let stream_key = derive_stream_key(shared_secret);
	let stream = generate_cipher_stream(&stream_key, NUM_STREAM_BYTES);
	let mut hop_info = vec![0; NUM_STREAM_BYTES];
	hop_info[..ROUTING_INFO_SIZE].copy_from_slice(&packet.routing_info);
	apply_keystream(&mut hop_info, &stream);

	let hop_payload = HopPayload::decode(&mut &hop_info[..])?;
	let consumed = hop_payload.num_bytes();
	let mut next_routing_info = [0; ROUTING_INFO_SIZE];
	next_routing_info.copy_from_slice(&hop_info[consumed..consumed + ROUTING_INFO_SIZE]);

	let next_packet = OnionPacket {
		version: BASE_VERSION,
		ephemeral_key: blind_kx_public(&packet.ephemeral_key, shared_secret),
		routing_info: next_routing_info,
		header_mac: hop_payload.hmac,
	};
	Ok((next_packet, hop_payload))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::clamp_scalar;
	use rand::{Rng, SeedableRng};
	use rand_xoshiro::Xoshiro256StarStar;

	fn test_path(rng: &mut Xoshiro256StarStar, payload_sizes: &[usize]) -> PaymentPath {
		let mut path = PaymentPath::new();
		for (i, &size) in payload_sizes.iter().enumerate() {
			let node_pub = derive_kx_public(&clamp_scalar(rng.gen()));
			let hop_payload = HopPayload::tlv(vec![i as u8; size]).unwrap();
			path.try_push(crate::path::OnionHop { node_pub, hop_payload }).unwrap();
		}
		path
	}

	#[test]
	fn construction_rejects_oversized_paths_before_crypto() {
		let mut rng = Xoshiro256StarStar::seed_from_u64(1);
		let path = test_path(&mut rng, &[700, 600]);
		let session_key = clamp_scalar(rng.gen());
		assert_eq!(
			new_onion_packet(&path, &session_key, b"", deterministic_packet_filler),
			Err(Error::ExceedsMaxPayloadSize)
		);
	}

	#[test]
	fn construction_rejects_empty_path() {
		let mut rng = Xoshiro256StarStar::seed_from_u64(2);
		let session_key = clamp_scalar(rng.gen());
		assert_eq!(
			new_onion_packet(&PaymentPath::new(), &session_key, b"", deterministic_packet_filler),
			Err(Error::EmptyPath)
		);
	}

	#[test]
	fn deterministic_filler_makes_construction_reproducible() {
		let mut rng = Xoshiro256StarStar::seed_from_u64(3);
		let path = test_path(&mut rng, &[100, 200]);
		let session_key = clamp_scalar(rng.gen());
		let a = new_onion_packet(&path, &session_key, b"ad", deterministic_packet_filler).unwrap();
		let b = new_onion_packet(&path, &session_key, b"ad", deterministic_packet_filler).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn packet_encoding_round_trip() {
		let mut rng = Xoshiro256StarStar::seed_from_u64(4);
		let path = test_path(&mut rng, &[50]);
		let session_key = clamp_scalar(rng.gen());
		let packet =
			new_onion_packet(&path, &session_key, b"", deterministic_packet_filler).unwrap();

		let mut encoded = Vec::new();
		packet.encode(&mut encoded).unwrap();
		assert_eq!(encoded.len(), PACKET_SIZE);
		assert_eq!(OnionPacket::decode(&mut &encoded[..]).unwrap(), packet);

		encoded.truncate(PACKET_SIZE - 1);
		assert_eq!(OnionPacket::decode(&mut &encoded[..]), Err(Error::UnexpectedEof));
	}

	#[test]
	fn decode_rejects_unknown_versions() {
		let mut rng = Xoshiro256StarStar::seed_from_u64(5);
		let path = test_path(&mut rng, &[50]);
		let session_key = clamp_scalar(rng.gen());
		let packet =
			new_onion_packet(&path, &session_key, b"", deterministic_packet_filler).unwrap();

		let mut encoded = Vec::new();
		packet.encode(&mut encoded).unwrap();
		encoded[0] = 1;
		assert_eq!(OnionPacket::decode(&mut &encoded[..]), Err(Error::UnsupportedVersion));
	}
}
