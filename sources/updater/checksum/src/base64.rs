use crate::error::{self, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use snafu::{ensure, ResultExt};

/// Encodes `data` as standard padded base64, checking that the output length matches the
/// predicted length for the input size. A mismatch here would mean the underlying codec is
/// misbehaving, not a caller error, so this is mostly a belt-and-suspenders check before the
/// bytes are written out for a detached signature or similar.
pub fn encode(data: &[u8]) -> Result<String> {
    let encoded = STANDARD.encode(data);
    let expected = predicted_len(data.len());
    ensure!(
        encoded.len() == expected,
        error::Base64ErrorSnafu {
            expected,
            actual: encoded.len(),
        }
    );
    Ok(encoded)
}

pub fn decode(data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).context(error::Base64DecodeSnafu)
}

fn predicted_len(input_len: usize) -> usize {
    (input_len + 2) / 3 * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"manifest bytes go here";
        let encoded = encode(data).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn padded_lengths_match_prediction() {
        for len in 0..16 {
            let data = vec![0xAB; len];
            let encoded = encode(&data).unwrap();
            assert_eq!(encoded.len(), predicted_len(len));
        }
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode("not valid base64!!").is_err());
    }
}
