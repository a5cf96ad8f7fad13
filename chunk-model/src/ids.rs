use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

newtype_id!(SourceId);
newtype_id!(DocumentId);
newtype_id!(ChunkId);

/// Hash of a document's canonicalized raw bytes, used for change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn of(canonical_bytes: &[u8]) -> Self {
        Self(blake3::hash(canonical_bytes).to_hex().to_string())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic chunk id: stable hash of (document_id, ordinal, canonical text).
///
/// Re-chunking an unchanged document must produce identical ids, so the hash
/// input is a plain delimited byte sequence rather than anything
/// allocation-order-dependent like a `HashMap`.
pub fn derive_chunk_id(document_id: &DocumentId, ordinal: u32, canonical_text: &str) -> ChunkId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(document_id.as_str().as_bytes());
    hasher.update(&[0x1F]);
    hasher.update(&ordinal.to_le_bytes());
    hasher.update(&[0x1F]);
    hasher.update(canonical_text.as_bytes());
    ChunkId(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic() {
        let doc = DocumentId::from("doc-1");
        let a = derive_chunk_id(&doc, 3, "hello world");
        let b = derive_chunk_id(&doc, 3, "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_id_changes_with_ordinal_or_text() {
        let doc = DocumentId::from("doc-1");
        let a = derive_chunk_id(&doc, 0, "hello world");
        let b = derive_chunk_id(&doc, 1, "hello world");
        let c = derive_chunk_id(&doc, 0, "goodbye world");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
