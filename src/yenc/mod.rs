//! yEnc binary encoding/decoding for Usenet
//!
//! yEnc is a binary-to-text encoding scheme designed specifically for Usenet.
//! Each byte is shifted by 42; the result is escaped with `=` when it would
//! collide with NUL, LF, CR or `=` itself. The CRC-32 of the unencoded input is
//! carried alongside for the `=yend` trailer.
//!
//! Reference: http://www.yenc.org/yenc-draft.1.3.txt

pub mod decode;
pub mod encode;

pub use decode::decode;
pub use encode::{crc32_hex, encode, encode_into, escape, YencEncoded};

/// Line length used by most posters
pub const DEFAULT_LINE_LENGTH: usize = 128;

/// Longest line permitted by the yEnc draft
pub const MAX_LINE_LENGTH: usize = 997;
