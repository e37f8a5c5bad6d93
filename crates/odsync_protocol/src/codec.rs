//! CBOR encoding for durable records.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
///
/// # Errors
///
/// Returns `EncodingFailed` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns `DecodingFailed` if the bytes are not valid CBOR for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        periods: Vec<u8>,
    }

    #[test]
    fn encode_then_decode() {
        let sample = Sample {
            name: "Asha".into(),
            periods: vec![1, 2, 3],
        };
        let bytes = encode(&sample).unwrap();
        let decoded: Sample = decode(&bytes).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn decode_garbage_fails() {
        let result: CodecResult<Sample> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn decode_wrong_shape_fails() {
        let bytes = encode(&42u32).unwrap();
        let result: CodecResult<Sample> = decode(&bytes);
        assert!(result.is_err());
    }
}
