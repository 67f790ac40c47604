use crate::domain::errors::CompressionError;

/// `Content-Encoding` value for remote-write bodies
pub const SNAPPY_ENCODING: &str = "snappy";

/// Compresses a serialized payload with raw (block) snappy.
///
/// An empty buffer is valid input and yields a valid empty-payload block.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CompressionError> {
    Ok(snap::raw::Encoder::new().compress_vec(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_empty_buffer() {
        let compressed = compress(&[]).expect("empty input is not an error");
        assert!(!compressed.is_empty());
        let restored = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .expect("valid block");
        assert!(restored.is_empty());
    }

    #[test]
    fn test_compress_shrinks_repetitive_payload() {
        let payload = b"pulse_flow_tweets_total".repeat(64);
        let compressed = compress(&payload).expect("compressible");
        assert!(compressed.len() < payload.len());

        let restored = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .expect("valid block");
        assert_eq!(restored, payload);
    }
}
