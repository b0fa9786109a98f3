//! Embedding blob encoding: little-endian f32, 4 bytes per component.

/// Encode an embedding as a little-endian f32 blob.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob. Returns None if the length is not a multiple of 4.
pub fn blob_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_preserves_values_exactly() {
        let original = vec![0.1f32, -0.5, 3.25, f32::MIN_POSITIVE, 0.0];
        let blob = embedding_to_blob(&original);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_embedding(&blob).unwrap(), original);
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(blob_to_embedding(&[0u8, 1, 2]).is_none());
    }
}
