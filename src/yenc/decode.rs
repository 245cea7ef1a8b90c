use crate::error::{PostError, Result};

/// Decode yEnc data lines back into binary data
///
/// Accepts the output of [`encode`](super::encode): CRLF (or LF) terminated
/// lines, possibly dot-stuffed. Framing lines (`=ybegin` etc.) must already be
/// removed.
///
/// # Errors
///
/// Returns [`PostError::Decode`] if a line ends in the middle of an escape
/// sequence.
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(encoded.len());

    for raw in encoded.split(|&b| b == b'\n') {
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = if line.starts_with(b"..") {
            &line[1..]
        } else {
            line
        };
        decode_line(line, &mut output)?;
    }

    Ok(output)
}

/// yEnc decoding: output = (input - 42) mod 256, escapes are =X with X - 64
fn decode_line(line: &[u8], output: &mut Vec<u8>) -> Result<()> {
    let mut bytes = line.iter();

    while let Some(&byte) = bytes.next() {
        let value = if byte == b'=' {
            let &escaped = bytes
                .next()
                .ok_or_else(|| PostError::Decode("escape character at end of line".to_string()))?;
            escaped.wrapping_sub(64)
        } else {
            byte
        };
        output.push(value.wrapping_sub(42));
    }

    Ok(())
}
