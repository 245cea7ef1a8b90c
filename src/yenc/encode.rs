use crate::error::{PostError, Result};
use crc32fast::Hasher;

use super::MAX_LINE_LENGTH;

/// yEnc encoded data lines plus the CRC-32 of the unencoded input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YencEncoded {
    /// CRLF-terminated, dot-stuffed data lines
    pub data: Vec<u8>,
    /// CRC-32 of the input bytes
    pub crc32: u32,
}

impl YencEncoded {
    /// CRC-32 as 8 lowercase hex digits, as used in `pcrc32=`
    pub fn crc32_hex(&self) -> String {
        format!("{:08x}", self.crc32)
    }
}

/// Encode binary data into yEnc data lines
///
/// Only the data lines are produced; `=ybegin`/`=ypart`/`=yend` framing is
/// added by the article that carries them.
///
/// # Example
/// ```
/// use nntp_poster::yenc;
///
/// let encoded = yenc::encode(b"Hello world", 128).unwrap();
/// assert_eq!(encoded.crc32_hex(), "8bd69e52");
/// assert!(encoded.data.ends_with(b"\r\n"));
/// ```
pub fn encode(data: &[u8], line_length: usize) -> Result<YencEncoded> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 32 + 2 * data.len() / line_length.max(1) + 4);
    let crc32 = encode_into(&mut output, data, line_length)?;
    Ok(YencEncoded {
        data: output,
        crc32,
    })
}

/// Append yEnc data lines for `data` to `output`, returning the CRC-32 of `data`
///
/// Lines hold at most `line_length` encoded bytes, except that an escape pair
/// is never split across two lines. A line starting with `.` is dot-stuffed
/// for NNTP transmission.
pub fn encode_into(output: &mut Vec<u8>, data: &[u8], line_length: usize) -> Result<u32> {
    if line_length == 0 || line_length > MAX_LINE_LENGTH {
        return Err(PostError::InvalidLineLength(line_length));
    }

    let mut line = Vec::with_capacity(line_length + 2);

    for &byte in data {
        let encoded = byte.wrapping_add(42);

        if is_critical_byte(encoded) {
            if !line.is_empty() && line.len() + 2 > line_length {
                flush_line(output, &mut line);
            }
            line.push(b'=');
            line.push(encoded.wrapping_add(64));
        } else {
            if line.len() >= line_length {
                flush_line(output, &mut line);
            }
            line.push(encoded);
        }
    }

    if !line.is_empty() {
        flush_line(output, &mut line);
    }

    Ok(crc32(data))
}

/// Apply the yEnc byte transform and escaping without any line framing
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 32);
    for &byte in data {
        let encoded = byte.wrapping_add(42);
        if is_critical_byte(encoded) {
            output.push(b'=');
            output.push(encoded.wrapping_add(64));
        } else {
            output.push(encoded);
        }
    }
    output
}

/// CRC-32 of `data` as 8 lowercase hex digits
pub fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32(data))
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn flush_line(output: &mut Vec<u8>, line: &mut Vec<u8>) {
    // NNTP dot-stuffing
    if line.first() == Some(&b'.') {
        output.push(b'.');
    }
    output.extend_from_slice(line);
    output.extend_from_slice(b"\r\n");
    line.clear();
}

/// Check if a byte must always be escaped
fn is_critical_byte(byte: u8) -> bool {
    matches!(
        byte,
        0x00 |  // NUL
        0x0A |  // LF
        0x0D |  // CR
        0x3D // '='
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yenc::decode::decode;

    const HELLO_ESCAPED: [u8; 11] = [
        0x72, 0x8F, 0x96, 0x96, 0x99, 0x4A, 0xA1, 0x99, 0x9C, 0x96, 0x8E,
    ];

    /// Bitwise CRC-32 (IEEE), kept separate from crc32fast on purpose
    fn reference_crc32(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    #[test]
    fn test_escape_hello_world() {
        assert_eq!(escape(b"Hello world"), HELLO_ESCAPED);
        assert_eq!(crc32_hex(b"Hello world"), "8bd69e52");
    }

    #[test]
    fn test_encode_hello_world() {
        let encoded = encode(b"Hello world", 128).unwrap();
        let mut expected = HELLO_ESCAPED.to_vec();
        expected.extend_from_slice(b"\r\n");
        assert_eq!(encoded.data, expected);
        assert_eq!(encoded.crc32_hex(), "8bd69e52");
    }

    #[test]
    fn test_escape_trigger() {
        // 0x13 + 42 = 0x3D ('=')
        assert_eq!(escape(&[0x13]), vec![0x3D, 0x7D]);
    }

    #[test]
    fn test_all_critical_bytes_escaped() {
        // inputs that land on NUL, LF, CR and '='
        let data = [0xD6, 0xE0, 0xE3, 0x13];
        assert_eq!(
            escape(&data),
            vec![b'=', 0x40, b'=', 0x4A, b'=', 0x4D, b'=', 0x7D]
        );
    }

    #[test]
    fn test_encode_empty() {
        let encoded = encode(b"", 128).unwrap();
        assert!(encoded.data.is_empty());
        assert_eq!(encoded.crc32_hex(), "00000000");
    }

    #[test]
    fn test_leading_dot_is_stuffed() {
        // 0x04 + 42 = '.'
        let encoded = encode(&[0x04, 0x04, 0x04], 2).unwrap();
        assert_eq!(encoded.data, b"...\r\n..\r\n".to_vec());
        assert_eq!(decode(&encoded.data).unwrap(), vec![0x04, 0x04, 0x04]);
    }

    #[test]
    fn test_line_length_respected() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 200) as u8 + 50).collect();
        let encoded = encode(&data, 64).unwrap();

        for line in encoded.data.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            let line = line.strip_suffix(b"\r").unwrap();
            assert!(line.len() <= 64, "Line too long: {} bytes", line.len());
        }
        assert_eq!(decode(&encoded.data).unwrap(), data);
    }

    #[test]
    fn test_escape_pair_never_split() {
        // 0x13 encodes to an escape pair; fill one short of the line first
        let mut data = vec![b'A'; 3];
        data.push(0x13);
        let encoded = encode(&data, 4).unwrap();
        assert_eq!(encoded.data, b"kkk\r\n=}\r\n".to_vec());
    }

    #[test]
    fn test_invalid_line_length() {
        assert!(matches!(
            encode(b"test", 0),
            Err(PostError::InvalidLineLength(0))
        ));
        assert!(encode(b"test", 998).is_err());
    }

    #[test]
    fn test_all_bytes_round_trip_and_crc() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        for line_length in [1, 2, 7, 128, 997] {
            let encoded = encode(&data, line_length).unwrap();
            assert_eq!(decode(&encoded.data).unwrap(), data, "line length {line_length}");
            assert_eq!(encoded.crc32, reference_crc32(&data));
        }
    }

    #[test]
    fn test_crc_matches_reference() {
        for sample in [&b""[..], b"a", b"Hello world", &[0u8; 300][..]] {
            assert_eq!(crc32_hex(sample), format!("{:08x}", reference_crc32(sample)));
        }
    }
}
