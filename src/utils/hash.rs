use std::io::{self, Read};

/// Streams `reader` through Blake3 and returns the lowercase hex digest.
/// `context` strings are hashed ahead of the content, each length-prefixed
/// so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn keyed_content_hash<R: Read>(mut reader: R, context: &[&str]) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    for part in context {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamed_hash_equals_one_shot_hash() {
        let data = vec![7u8; 100_000];
        let streamed = keyed_content_hash(data.as_slice(), &[]).unwrap();
        assert_eq!(streamed, blake3::hash(&data).to_hex().to_string());
        assert_eq!(streamed.len(), 64);
    }

    #[test]
    fn context_changes_the_digest() {
        let data = b"assembly bytes";
        let plain = keyed_content_hash(&data[..], &[]).unwrap();
        let keyed = keyed_content_hash(&data[..], &["com.a.b", "1.0.0"]).unwrap();
        assert_ne!(plain, keyed);
        assert_eq!(keyed, keyed_content_hash(&data[..], &["com.a.b", "1.0.0"]).unwrap());
        assert_ne!(keyed, keyed_content_hash(&data[..], &["com.a.b", "2.0.0"]).unwrap());
        assert_ne!(
            keyed_content_hash(&data[..], &["ab", "c"]).unwrap(),
            keyed_content_hash(&data[..], &["a", "bc"]).unwrap()
        );
    }
}
