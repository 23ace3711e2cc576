//! Wire codec for command and result batches.
//!
//! # Wire Format
//!
//! ```text
//! [count: i32 le][record]*count      record = [length: i32 le][bytes]
//! ```
//!
//! A batch of client commands and a batch of result strings share the same
//! layout; results are the UTF-8 bytes of each reply string.

use thiserror::Error;

/// Errors from decoding a batch blob.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed batch: truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("malformed batch: negative record count {0}")]
    NegativeCount(i32),

    #[error("malformed batch: record length {len} exceeds {remaining} remaining bytes")]
    LengthOverflow { len: i32, remaining: usize },

    #[error("malformed result batch: record is not valid utf-8")]
    NonUtf8Result,
}

/// Encode a batch of opaque commands.
pub fn encode_batch(commands: &[Vec<u8>]) -> Vec<u8> {
    let payload: usize = commands.iter().map(|c| 4 + c.len()).sum();
    let mut out = Vec::with_capacity(4 + payload);
    out.extend_from_slice(&(commands.len() as i32).to_le_bytes());
    for command in commands {
        out.extend_from_slice(&(command.len() as i32).to_le_bytes());
        out.extend_from_slice(command);
    }
    out
}

/// Decode a batch blob back into its commands.
///
/// Fails on truncated input and on a declared length exceeding the
/// remaining buffer. Trailing bytes after the last record are ignored.
pub fn decode_batch(data: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut offset = 0usize;
    let count = read_i32(data, &mut offset)?;
    if count < 0 {
        return Err(CodecError::NegativeCount(count));
    }
    let mut commands = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let len = read_i32(data, &mut offset)?;
        let remaining = data.len() - offset;
        if len < 0 || len as usize > remaining {
            return Err(CodecError::LengthOverflow { len, remaining });
        }
        commands.push(data[offset..offset + len as usize].to_vec());
        offset += len as usize;
    }
    Ok(commands)
}

/// Encode a batch of execution results.
pub fn encode_results(results: &[String]) -> Vec<u8> {
    let payload: usize = results.iter().map(|r| 4 + r.len()).sum();
    let mut out = Vec::with_capacity(4 + payload);
    out.extend_from_slice(&(results.len() as i32).to_le_bytes());
    for result in results {
        out.extend_from_slice(&(result.len() as i32).to_le_bytes());
        out.extend_from_slice(result.as_bytes());
    }
    out
}

/// Decode a result batch back into its reply strings.
pub fn decode_results(data: &[u8]) -> Result<Vec<String>, CodecError> {
    decode_batch(data)?
        .into_iter()
        .map(|bytes| String::from_utf8(bytes).map_err(|_| CodecError::NonUtf8Result))
        .collect()
}

fn read_i32(data: &[u8], offset: &mut usize) -> Result<i32, CodecError> {
    let end = *offset + 4;
    let bytes = data
        .get(*offset..end)
        .ok_or(CodecError::Truncated { offset: *offset })?;
    *offset = end;
    Ok(i32::from_le_bytes(bytes.try_into().expect("slice is 4 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_round_trips() {
        let commands = vec![b"SET a 1".to_vec(), b"GET a".to_vec(), Vec::new()];
        assert_eq!(decode_batch(&encode_batch(&commands)).unwrap(), commands);
    }

    #[test]
    fn empty_batch_round_trips() {
        let encoded = encode_batch(&[]);
        assert_eq!(encoded, 0i32.to_le_bytes());
        assert!(decode_batch(&encoded).unwrap().is_empty());
    }

    #[test]
    fn single_command_batch() {
        let commands = vec![b"DELETE k".to_vec()];
        assert_eq!(decode_batch(&encode_batch(&commands)).unwrap(), commands);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let encoded = encode_batch(&[b"hello".to_vec()]);
        assert!(matches!(
            decode_batch(&encoded[..3]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            decode_batch(&encoded[..6]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let mut encoded = encode_batch(&[b"hello".to_vec()]);
        // Inflate the record length beyond the buffer.
        encoded[4..8].copy_from_slice(&100i32.to_le_bytes());
        assert!(matches!(
            decode_batch(&encoded),
            Err(CodecError::LengthOverflow { len: 100, .. })
        ));
    }

    #[test]
    fn negative_count_is_rejected() {
        let encoded = (-1i32).to_le_bytes().to_vec();
        assert!(matches!(
            decode_batch(&encoded),
            Err(CodecError::NegativeCount(-1))
        ));
    }

    #[test]
    fn results_round_trip() {
        let results = vec!["OK".to_string(), "Key not found".to_string(), String::new()];
        assert_eq!(decode_results(&encode_results(&results)).unwrap(), results);
    }

    #[test]
    fn non_utf8_result_is_rejected() {
        let encoded = encode_batch(&[vec![0xff, 0xfe]]);
        assert!(matches!(
            decode_results(&encoded),
            Err(CodecError::NonUtf8Result)
        ));
    }
}
