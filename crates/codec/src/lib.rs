//! ## Relay control frame codec
//!
//! Every control message exchanged with the relay is a fixed 256-byte
//! frame, little-endian throughout:
//!
//! | offset | field | size |
//! |---|---|---|
//! | 0 | magic (`0x847292df`) | 4 |
//! | 4 | version (`2`) | 4 |
//! | 8 | message type | 4 |
//! | 12 | error code (i32) | 4 |
//! | 16 | time (Unix seconds, i64) | 8 |
//! | 24 | claimed source IPv4 | 4 |
//! | 28 | claimed source port | 4 |
//! | 32 | token | 16 |
//! | 48 | request correlator | 16 |
//! | 64 | username (NUL padded) | 16 |
//! | 80 | room id | 16 |
//! | 96 | padding | 140 |
//! | 236 | integrity (HMAC-SHA1) | 20 |
//!
//! Requests are signed over bytes `[0..236]` with HMAC-SHA1 keyed by
//! the user's shared secret; responses leave the integrity field
//! zeroed. Any datagram that is not exactly 256 bytes, or whose
//! magic/version/type gates do not match, is not a control message at
//! all; the relay treats it as opaque payload.

pub mod crypto;
pub mod message;

/// Total size of a control frame on the wire.
pub const FRAME_SIZE: usize = 256;

/// The signed prefix of a frame; the integrity field covers `[0..236]`.
pub const SIGNED_LEN: usize = 236;

/// Frame magic number.
pub const MAGIC: u32 = 0x847292df;

/// Protocol version carried by every frame.
pub const VERSION: u32 = 2;

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    SummaryFailed,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
