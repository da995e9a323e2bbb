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

//! Per-hop forwarding instructions, their framed on-wire form, and the
//! fixed-capacity path model.

use crate::{
	crypto::{HeaderMac, KxPublic, MAC_SIZE},
	error::Error,
	packet::{MAX_HOPS, ROUTING_INFO_SIZE},
	varint::{read_varint_body, varint_size, write_varint},
};
use arrayref::array_refs;
use arrayvec::{ArrayVec, CapacityError};
use std::io::{Read, Write};

/// Size in bytes of a serialized next-hop address.
pub const ADDRESS_SIZE: usize = 8;
/// Next-hop address (a short channel identifier).
pub type Address = [u8; ADDRESS_SIZE];

const AMT_FORWARD_SIZE: usize = 8;
const OUTGOING_CLTV_SIZE: usize = 4;
/// Reserved padding at the end of the fixed hop-data body.
const NUM_PADDING_BYTES: usize = 12;

/// Size in bytes of the fixed hop-data body (the legacy payload).
pub const HOP_DATA_SIZE: usize =
	ADDRESS_SIZE + AMT_FORWARD_SIZE + OUTGOING_CLTV_SIZE + NUM_PADDING_BYTES;

/// Total framed size of a legacy hop payload: realm byte, body, trailing MAC.
pub const LEGACY_HOP_PAYLOAD_SIZE: usize = 1 + HOP_DATA_SIZE + MAC_SIZE;

/// Realm discriminant for the fixed-size legacy format. TLV payloads are
/// distinguished by a non-zero leading byte (their varint length), so a
/// zero-length TLV payload is not representable.
const LEGACY_REALM: u8 = 0x00;

/// Forwarding instructions for a single hop. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopData {
	/// Format discriminant; zero for the legacy fixed-size format.
	pub realm: u8,
	/// Address of the next hop.
	pub next_address: Address,
	/// Amount to forward to the next hop.
	pub forward_amount: u64,
	/// Timelock for the outgoing leg.
	pub outgoing_cltv: u32,
}

impl HopData {
	fn encode(&self) -> [u8; HOP_DATA_SIZE] {
		let mut body = [0; HOP_DATA_SIZE];
		body[..ADDRESS_SIZE].copy_from_slice(&self.next_address);
		body[ADDRESS_SIZE..ADDRESS_SIZE + AMT_FORWARD_SIZE]
			.copy_from_slice(&self.forward_amount.to_be_bytes());
		body[ADDRESS_SIZE + AMT_FORWARD_SIZE..HOP_DATA_SIZE - NUM_PADDING_BYTES]
			.copy_from_slice(&self.outgoing_cltv.to_be_bytes());
		// Remaining padding bytes are reserved and stay zero.
		body
	}

	fn decode(body: &[u8; HOP_DATA_SIZE]) -> Self {
		let (next_address, forward_amount, outgoing_cltv, _padding) =
			array_refs![body, ADDRESS_SIZE, AMT_FORWARD_SIZE, OUTGOING_CLTV_SIZE, NUM_PADDING_BYTES];
		Self {
			realm: LEGACY_REALM,
			next_address: *next_address,
			forward_amount: u64::from_be_bytes(*forward_amount),
			outgoing_cltv: u32::from_be_bytes(*outgoing_cltv),
		}
	}
}

/// Framing used for a hop payload's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
	/// Fixed 32-byte body introduced by a zero realm byte.
	Legacy,
	/// Varint-length-delimited opaque body.
	Tlv,
}

/// The framed, on-wire form of one hop's instructions: a length or realm
/// delimited body plus the trailing MAC that authenticates the rest of the
/// packet. An all-zero trailing MAC marks the final (exit) hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopPayload {
	pub payload_type: PayloadType,
	pub payload: Vec<u8>,
	pub hmac: HeaderMac,
}

impl HopPayload {
	/// Frame `hop_data` in the legacy fixed-size format. The trailing MAC is
	/// filled in during packet construction.
	pub fn legacy(hop_data: &HopData) -> Self {
		Self {
			payload_type: PayloadType::Legacy,
			payload: hop_data.encode().to_vec(),
			hmac: [0; MAC_SIZE],
		}
	}

	/// Frame an opaque TLV body. Fails with [`Error::ExceedsMaxPayloadSize`]
	/// if the framed size could never fit the routing-info region, and
	/// rejects the empty body, which would be indistinguishable from the
	/// legacy realm byte on the wire.
	pub fn tlv(payload: Vec<u8>) -> Result<Self, Error> {
		if payload.is_empty() ||
			varint_size(payload.len() as u64) + payload.len() + MAC_SIZE > ROUTING_INFO_SIZE
		{
			return Err(Error::ExceedsMaxPayloadSize)
		}
		Ok(Self { payload_type: PayloadType::Tlv, payload, hmac: [0; MAC_SIZE] })
	}

	/// Framed size in bytes: delimiter, body, trailing MAC.
	pub fn num_bytes(&self) -> usize {
		let delimiter = match self.payload_type {
			PayloadType::Legacy => 1,
			PayloadType::Tlv => varint_size(self.payload.len() as u64),
		};
		delimiter + self.payload.len() + MAC_SIZE
	}

	pub fn encode(&self, w: &mut impl Write) -> std::io::Result<()> {
		match self.payload_type {
			PayloadType::Legacy => w.write_all(&[LEGACY_REALM])?,
			PayloadType::Tlv => write_varint(w, self.payload.len() as u64)?,
		}
		w.write_all(&self.payload)?;
		w.write_all(&self.hmac)
	}

	/// Parse the leading hop payload from a decrypted routing-info buffer.
	/// The body length is attacker supplied, so it is bounds checked against
	/// the routing-info capacity before anything is read.
	pub fn decode(r: &mut impl Read) -> Result<Self, Error> {
		let mut first = [0; 1];
		r.read_exact(&mut first).map_err(|_| Error::UnexpectedEof)?;

		let (payload_type, payload_len) = if first[0] == LEGACY_REALM {
			(PayloadType::Legacy, HOP_DATA_SIZE)
		} else {
			let len = read_varint_body(first[0], r)?;
			// Bound the attacker-supplied length before any size arithmetic;
			// it can be anything up to u64::MAX.
			if len > ROUTING_INFO_SIZE as u64 {
				return Err(Error::ExceedsMaxPayloadSize)
			}
			let len = len as usize;
			if varint_size(len as u64) + len + MAC_SIZE > ROUTING_INFO_SIZE {
				return Err(Error::ExceedsMaxPayloadSize)
			}
			(PayloadType::Tlv, len)
		};

		let mut payload = vec![0; payload_len];
		r.read_exact(&mut payload).map_err(|_| Error::UnexpectedEof)?;
		let mut hmac = [0; MAC_SIZE];
		r.read_exact(&mut hmac).map_err(|_| Error::UnexpectedEof)?;

		Ok(Self { payload_type, payload, hmac })
	}

	/// Decode the body as fixed-size hop data. `None` for TLV payloads, whose
	/// interpretation is up to the caller.
	pub fn hop_data(&self) -> Option<HopData> {
		match self.payload_type {
			PayloadType::Legacy => {
				let body: &[u8; HOP_DATA_SIZE] = self.payload.as_slice().try_into().ok()?;
				Some(HopData::decode(body))
			},
			PayloadType::Tlv => None,
		}
	}
}

/// One element of a payment path: the hop's public key paired with the
/// payload it will decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionHop {
	pub node_pub: KxPublic,
	pub hop_payload: HopPayload,
}

/// An ordered path of at most [`MAX_HOPS`] hops. Capacity is enforced at
/// construction time, before any cryptographic work; the tighter invariant
/// (total framed payload size fits the routing-info region) is checked by
/// packet construction.
#[derive(Debug, Clone, Default)]
pub struct PaymentPath(ArrayVec<OnionHop, MAX_HOPS>);

impl PaymentPath {
	pub fn new() -> Self {
		Self(ArrayVec::new())
	}

	pub fn try_push(&mut self, hop: OnionHop) -> Result<(), CapacityError<OnionHop>> {
		self.0.try_push(hop)
	}

	/// Combined framed size of every hop payload in the path.
	pub fn total_payload_size(&self) -> usize {
		self.0.iter().map(|hop| hop.hop_payload.num_bytes()).sum()
	}
}

impl std::ops::Deref for PaymentPath {
	type Target = [OnionHop];

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_hop_data(seed: u8) -> HopData {
		HopData {
			realm: 0,
			next_address: [seed; ADDRESS_SIZE],
			forward_amount: u64::from(seed) * 1000,
			outgoing_cltv: u32::from(seed) + 40,
		}
	}

	#[test]
	fn legacy_payload_round_trip() {
		let hop_data = test_hop_data(7);
		let mut payload = HopPayload::legacy(&hop_data);
		payload.hmac = [0xab; MAC_SIZE];
		assert_eq!(payload.num_bytes(), LEGACY_HOP_PAYLOAD_SIZE);

		let mut encoded = Vec::new();
		payload.encode(&mut encoded).unwrap();
		assert_eq!(encoded.len(), payload.num_bytes());

		let decoded = HopPayload::decode(&mut &encoded[..]).unwrap();
		assert_eq!(decoded, payload);
		assert_eq!(decoded.hop_data(), Some(hop_data));
	}

	#[test]
	fn tlv_payload_round_trip() {
		let mut payload = HopPayload::tlv(vec![0x11; 300]).unwrap();
		payload.hmac = [0xcd; MAC_SIZE];
		// 300 needs the 0xfd discriminant: 3 length bytes.
		assert_eq!(payload.num_bytes(), 3 + 300 + MAC_SIZE);

		let mut encoded = Vec::new();
		payload.encode(&mut encoded).unwrap();
		let decoded = HopPayload::decode(&mut &encoded[..]).unwrap();
		assert_eq!(decoded, payload);
		assert_eq!(decoded.hop_data(), None);
	}

	#[test]
	fn tlv_rejects_empty_and_oversized_bodies() {
		assert_eq!(HopPayload::tlv(Vec::new()), Err(Error::ExceedsMaxPayloadSize));
		assert_eq!(HopPayload::tlv(vec![0; ROUTING_INFO_SIZE]), Err(Error::ExceedsMaxPayloadSize));
	}

	#[test]
	fn decode_rejects_oversized_length_without_reading_body() {
		// Varint-framed length larger than the routing-info region.
		let mut encoded = Vec::new();
		write_varint(&mut encoded, ROUTING_INFO_SIZE as u64).unwrap();
		encoded.resize(encoded.len() + 8, 0);
		assert_eq!(HopPayload::decode(&mut &encoded[..]), Err(Error::ExceedsMaxPayloadSize));
	}

	#[test]
	fn decode_rejects_huge_tlv_length() {
		// Lengths near u64::MAX must fail cleanly; the framed-size arithmetic
		// must not be reachable with an unbounded length.
		for len in [u64::MAX, u64::MAX - 40, u64::MAX - 41] {
			let mut encoded = vec![0xff];
			encoded.extend_from_slice(&len.to_be_bytes());
			assert_eq!(HopPayload::decode(&mut &encoded[..]), Err(Error::ExceedsMaxPayloadSize));
		}
	}

	#[test]
	fn decode_truncated_payload_fails() {
		let payload = HopPayload::legacy(&test_hop_data(1));
		let mut encoded = Vec::new();
		payload.encode(&mut encoded).unwrap();
		encoded.truncate(encoded.len() - 1);
		assert_eq!(HopPayload::decode(&mut &encoded[..]), Err(Error::UnexpectedEof));
	}

	#[test]
	fn path_capacity_is_bounded() {
		let hop =
			OnionHop { node_pub: [0; 32], hop_payload: HopPayload::legacy(&test_hop_data(0)) };
		let mut path = PaymentPath::new();
		for _ in 0..MAX_HOPS {
			path.try_push(hop.clone()).unwrap();
		}
		assert!(path.try_push(hop).is_err());
		assert_eq!(path.total_payload_size(), MAX_HOPS * LEGACY_HOP_PAYLOAD_SIZE);
	}
}
