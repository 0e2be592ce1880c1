//! Embeddings are stored as little-endian f32 blobs. All vectors are
//! L2-normalized before storage, so cosine distance reduces to `1 - dot`.

use anyhow::bail;

pub fn to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

pub fn from_blob(blob: &[u8]) -> anyhow::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        bail!("embedding blob length {} is not a multiple of 4", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 0.0, 3.75];
        let blob = to_blob(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(from_blob(&blob).unwrap(), v);
    }

    #[test]
    fn test_bad_blob_length() {
        assert!(from_blob(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_cosine_distance_of_unit_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_distance(&a, &a)).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }
}
