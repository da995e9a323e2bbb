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

//! Error kinds for packet construction, processing, and the replay log.

/// Errors returned by packet construction, packet processing, the varint
/// codec, and the replay log. Every failure is terminal for the packet or
/// batch being handled; there is no partial-success state.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// The combined framed payload size of a path exceeds the fixed
	/// routing-info capacity.
	#[error("max routing info size exceeded")]
	ExceedsMaxPayloadSize,
	/// A packet cannot be built for a path with no hops.
	#[error("payment path is empty")]
	EmptyPath,
	/// Header MAC mismatch. The packet is corrupt or malicious and must be
	/// dropped.
	#[error("invalid MAC for onion packet")]
	InvalidMac,
	/// The packet's shared-secret fingerprint was already recorded in the
	/// replay log.
	#[error("sphinx packet replayed")]
	ReplayedPacket,
	/// Replay log lookup miss.
	#[error("replay log entry not found")]
	EntryNotFound,
	/// A multi-byte varint encoded a value representable in a shorter form.
	#[error("decoded varint is not canonical")]
	NonCanonicalVarInt,
	/// The input ended in the middle of a value.
	#[error("unexpected end of input")]
	UnexpectedEof,
	/// Key exchange produced the identity element; the peer key is invalid.
	#[error("invalid public key for key exchange")]
	InvalidPublicKey,
	/// The packet's version byte names a version this implementation does
	/// not speak.
	#[error("unsupported onion packet version")]
	UnsupportedVersion,
	/// The batch was already committed to the replay log.
	#[error("batch already committed")]
	AlreadyCommitted,
	/// The replay log was used outside its start/stop lifecycle.
	#[error("replay log not started")]
	LogNotStarted,
}
