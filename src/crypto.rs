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

//! Key exchange, the per-hop blinding chain, subkey derivation, MAC
//! computation, and stream encryption.

use crate::{
	packet::MAX_HOPS,
	replay_log::{HashPrefix, HASH_PREFIX_SIZE},
};
use arrayvec::ArrayVec;
use blake2::{
	digest::{
		consts::{U20, U32},
		generic_array::{sequence::Concat, GenericArray},
		Mac,
	},
	Blake2bMac,
};
use c2_chacha::{
	stream_cipher::{NewStreamCipher, SyncStreamCipher},
	ChaCha20,
};
use curve25519_dalek::{
	constants::ED25519_BASEPOINT_TABLE,
	montgomery::MontgomeryPoint,
	scalar::{clamp_integer, Scalar},
	traits::IsIdentity,
};
use rand::{CryptoRng, Rng};
use zeroize::Zeroizing;

// Each derived secret gets its own fixed personalisation so keys are never
// reused across purposes or hops.
const STREAM_KEY_PERSONAL: &[u8; 16] = b"sphinx-rho-strea";
const MAC_KEY_PERSONAL: &[u8; 16] = b"sphinx-mu-mackey";
const PAD_KEY_PERSONAL: &[u8; 16] = b"sphinx-pad-fillr";
const KX_BLINDING_FACTOR_PERSONAL: &[u8; 16] = b"sphinx-blind-fac";
const BLINDING_POINT_PERSONAL: &[u8; 16] = b"sphinx-blind-pnt";
const REPLAY_PREFIX_PERSONAL: &[u8; 16] = b"sphinx-replay-pf";

/// Size in bytes of a [`KxPublic`].
pub const KX_PUBLIC_SIZE: usize = 32;
/// Key-exchange public key (a Montgomery point; alpha in the Sphinx paper).
pub type KxPublic = [u8; KX_PUBLIC_SIZE];

/// Size in bytes of a [`SharedSecret`].
pub const SHARED_SECRET_SIZE: usize = 32;
/// Per-hop ECDH output. Never transmitted; only used to derive subkeys.
pub type SharedSecret = [u8; SHARED_SECRET_SIZE];

const KEY_SIZE: usize = 32;
/// A subkey derived from a [`SharedSecret`] for a single purpose.
pub type DerivedKey = [u8; KEY_SIZE];

/// Size in bytes of a [`HeaderMac`].
pub const MAC_SIZE: usize = 32;
/// Header MAC authenticating the routing-info blob and associated data.
pub type HeaderMac = [u8; MAC_SIZE];

////////////////////////////////////////////////////////////////////////////////
// Key exchange
////////////////////////////////////////////////////////////////////////////////

/// Apply X25519 bit clamping to the given raw bytes to produce a scalar for
/// use with Curve25519.
pub fn clamp_scalar(scalar: [u8; 32]) -> Scalar {
	Scalar::from_bytes_mod_order(clamp_integer(scalar))
}

/// Generate a key-exchange secret key.
pub fn gen_kx_secret(rng: &mut (impl Rng + CryptoRng)) -> Scalar {
	let mut secret = [0; 32];
	rng.fill_bytes(&mut secret);
	clamp_scalar(secret)
}

/// Derive the public key corresponding to a secret key.
pub fn derive_kx_public(kx_secret: &Scalar) -> KxPublic {
	(ED25519_BASEPOINT_TABLE * kx_secret).to_montgomery().to_bytes()
}

/// Diffie-Hellman: multiply `kx_public` by `kx_secret`.
pub fn derive_kx_shared_secret(kx_public: &KxPublic, kx_secret: &Scalar) -> SharedSecret {
	(MontgomeryPoint(*kx_public) * kx_secret).to_bytes()
}

/// True for the identity element, which indicates a low-order or otherwise
/// invalid peer key. Such shared secrets must be rejected before use.
pub fn kx_shared_secret_is_identity(kx_shared_secret: &SharedSecret) -> bool {
	MontgomeryPoint(*kx_shared_secret).is_identity()
}

/// The injectable ECDH capability for one node's long-lived onion key. The
/// packet processing logic is generic over this, so curve backends and
/// key-storage schemes can be substituted without touching it.
pub trait SingleKeyEcdh {
	/// The public key peers use to address this node.
	fn public_key(&self) -> &KxPublic;

	/// Compute the shared secret with `their_public`.
	fn ecdh(&self, their_public: &KxPublic) -> SharedSecret;
}

/// Reference [`SingleKeyEcdh`] implementation holding the secret scalar in
/// process memory.
pub struct KxPair {
	/// Boxed to avoid leaving copies of the secret key around in memory if
	/// `KxPair` is moved.
	secret: Box<Zeroizing<Scalar>>,
	public: KxPublic,
}

impl KxPair {
	pub fn gen(rng: &mut (impl Rng + CryptoRng)) -> Self {
		gen_kx_secret(rng).into()
	}
}

impl SingleKeyEcdh for KxPair {
	fn public_key(&self) -> &KxPublic {
		&self.public
	}

	fn ecdh(&self, their_public: &KxPublic) -> SharedSecret {
		derive_kx_shared_secret(their_public, self.secret.as_ref())
	}
}

impl From<Scalar> for KxPair {
	fn from(secret: Scalar) -> Self {
		let secret = Box::new(Zeroizing::new(secret));
		let public = derive_kx_public(&secret);
		Self { secret, public }
	}
}

impl From<[u8; 32]> for KxPair {
	fn from(secret: [u8; 32]) -> Self {
		clamp_scalar(secret).into()
	}
}

////////////////////////////////////////////////////////////////////////////////
// Blinding chain
////////////////////////////////////////////////////////////////////////////////

fn derive_kx_blinding_factor(kx_public: &KxPublic, kx_shared_secret: &SharedSecret) -> Scalar {
	let kx_public: &GenericArray<_, _> = kx_public.into();
	let key = kx_public.concat((*kx_shared_secret).into());
	let h = Blake2bMac::<U32>::new_with_salt_and_personal(&key, b"", KX_BLINDING_FACTOR_PERSONAL)
		.expect("Key, salt, and personalisation sizes are fixed and small enough");
	clamp_scalar(h.finalize().into_bytes().into())
}

/// Rerandomize the ephemeral public key for the next hop. This is the
/// receiver side of the blinding chain: it must match the sender-side scalar
/// advance in [`generate_shared_secrets`].
pub fn blind_kx_public(kx_public: &KxPublic, kx_shared_secret: &SharedSecret) -> KxPublic {
	(MontgomeryPoint(*kx_public) * derive_kx_blinding_factor(kx_public, kx_shared_secret))
		.to_bytes()
}

/// Compute the per-hop shared secrets for a path, advancing the ephemeral
/// secret through the blinding chain after each hop. Only the first hop's
/// ephemeral public key ever appears in the transmitted packet; every hop
/// rederives the next one from its own shared secret.
pub fn generate_shared_secrets(
	their_kx_publics: &[KxPublic],
	session_key: &Scalar,
) -> ArrayVec<SharedSecret, MAX_HOPS> {
	let mut kx_secret = Zeroizing::new(*session_key);
	let mut kx_public = derive_kx_public(&kx_secret);

	let mut shared_secrets = ArrayVec::new();
	for (i, their_kx_public) in their_kx_publics.iter().enumerate() {
		if i != 0 {
			let last = shared_secrets
				.last()
				.expect("Shared secret pushed every iteration, and this is not the first");
			*kx_secret *= derive_kx_blinding_factor(&kx_public, last);
			kx_public = derive_kx_public(&kx_secret);
		}
		shared_secrets.push(derive_kx_shared_secret(their_kx_public, &kx_secret));
	}
	shared_secrets
}

/// Tweak an ECDH output by the factor committed to in a route-blinding point.
/// `blinding_kx_shared_secret` is the ECDH output between the node key and
/// the blinding point supplied alongside the packet.
pub fn blind_shared_secret(
	kx_shared_secret: &SharedSecret,
	blinding_kx_shared_secret: &SharedSecret,
) -> SharedSecret {
	let h = Blake2bMac::<U32>::new_with_salt_and_personal(
		blinding_kx_shared_secret,
		b"",
		BLINDING_POINT_PERSONAL,
	)
	.expect("Key, salt, and personalisation sizes are fixed and small enough");
	let factor = clamp_scalar(h.finalize().into_bytes().into());
	(MontgomeryPoint(*kx_shared_secret) * factor).to_bytes()
}

////////////////////////////////////////////////////////////////////////////////
// Secret derivation
////////////////////////////////////////////////////////////////////////////////

fn derive_with_personal(shared_secret: &SharedSecret, personal: &[u8; 16]) -> DerivedKey {
	let h = Blake2bMac::<U32>::new_with_salt_and_personal(shared_secret, b"", personal)
		.expect("Key, salt, and personalisation sizes are fixed and small enough");
	h.finalize().into_bytes().into()
}

/// Derive the payload-stream cipher key for one hop.
pub fn derive_stream_key(shared_secret: &SharedSecret) -> DerivedKey {
	derive_with_personal(shared_secret, STREAM_KEY_PERSONAL)
}

/// Derive the header-MAC key for one hop.
pub fn derive_mac_key(shared_secret: &SharedSecret) -> DerivedKey {
	derive_with_personal(shared_secret, MAC_KEY_PERSONAL)
}

/// Derive the deterministic padding key from the sender's session key bytes.
pub fn derive_pad_key(session_key_bytes: &[u8; 32]) -> DerivedKey {
	derive_with_personal(session_key_bytes, PAD_KEY_PERSONAL)
}

/// Shortened digest of a shared secret, used as the replay-log key. The
/// truncation trades a negligible collision probability for smaller log
/// entries.
pub fn hash_shared_secret(shared_secret: &SharedSecret) -> HashPrefix {
	let h =
		Blake2bMac::<U20>::new_with_salt_and_personal(shared_secret, b"", REPLAY_PREFIX_PERSONAL)
			.expect("Key, salt, and personalisation sizes are fixed and small enough");
	let bytes: [u8; HASH_PREFIX_SIZE] = h.finalize().into_bytes().into();
	bytes
}

////////////////////////////////////////////////////////////////////////////////
// MAC computation and stream encryption
////////////////////////////////////////////////////////////////////////////////

/// Compute the header MAC over the concatenation of `parts`.
pub fn compute_mac(key: &DerivedKey, parts: &[&[u8]]) -> HeaderMac {
	let mut h =
		Blake2bMac::<U32>::new_from_slice(key).expect("Key size is fixed and small enough");
	for part in parts {
		h.update(part);
	}
	h.finalize().into_bytes().into()
}

/// Generate `len` bytes of ChaCha20 keystream under `key`.
pub fn generate_cipher_stream(key: &DerivedKey, len: usize) -> Vec<u8> {
	// Each key is used for exactly one stream, so a zero nonce is fine.
	let mut stream = vec![0; len];
	let mut c = ChaCha20::new(key.into(), &[0; 8].into());
	c.apply_keystream(&mut stream);
	stream
}

/// XOR `keystream` into `data`. Stops at the shorter of the two.
pub fn apply_keystream(data: &mut [u8], keystream: &[u8]) {
	for (d, k) in data.iter_mut().zip(keystream) {
		*d ^= *k;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{Rng, SeedableRng};
	use rand_xoshiro::Xoshiro256StarStar;

	#[test]
	fn blinding_chain_matches_per_hop_derivation() {
		let mut rng = Xoshiro256StarStar::seed_from_u64(7);
		let session_key = clamp_scalar(rng.gen());

		let their_secrets: Vec<_> = (0..5).map(|_| clamp_scalar(rng.gen())).collect();
		let their_publics: Vec<_> = their_secrets.iter().map(derive_kx_public).collect();

		let sender_side = generate_shared_secrets(&their_publics, &session_key);

		// Each hop sees one ephemeral key, derives its shared secret with its
		// own static key, and advances the chain for the next hop.
		let mut ephemeral = derive_kx_public(&session_key);
		for (their_secret, expected) in their_secrets.iter().zip(&sender_side) {
			let shared_secret = derive_kx_shared_secret(&ephemeral, their_secret);
			assert_eq!(&shared_secret, expected);
			ephemeral = blind_kx_public(&ephemeral, &shared_secret);
		}
	}

	#[test]
	fn derived_keys_are_domain_separated() {
		let shared_secret = [3; SHARED_SECRET_SIZE];
		let stream_key = derive_stream_key(&shared_secret);
		let mac_key = derive_mac_key(&shared_secret);
		let pad_key = derive_pad_key(&shared_secret);
		assert_ne!(stream_key, mac_key);
		assert_ne!(stream_key, pad_key);
		assert_ne!(mac_key, pad_key);
	}

	#[test]
	fn keystream_application_is_an_involution() {
		let key = [9; KEY_SIZE];
		let stream = generate_cipher_stream(&key, 64);
		let mut data = [0x5a; 64];
		apply_keystream(&mut data, &stream);
		assert_ne!(data, [0x5a; 64]);
		apply_keystream(&mut data, &stream);
		assert_eq!(data, [0x5a; 64]);
	}
}
