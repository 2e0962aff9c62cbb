//! Cache keys and deterministic output naming.

use core_sync::DataType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// File extension of completed cache files.
pub const IMAGE_EXTENSION: &str = "img";

/// Identity of a cached image.
///
/// Two keys for the same `(provider, data_type, identifier)` but different
/// source URLs are distinct entries, yet they share one output path: a new
/// avatar URL for the same contact overwrites the old file instead of
/// leaving a duplicate behind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFetchKey {
    pub provider: String,
    pub data_type: DataType,
    pub identifier: String,
    /// Lowercase hex SHA-256 of the source URL.
    pub url_hash: String,
}

impl ImageFetchKey {
    pub fn new(
        provider: impl Into<String>,
        data_type: DataType,
        identifier: impl Into<String>,
        source_url: &str,
    ) -> Self {
        Self {
            provider: provider.into(),
            data_type,
            identifier: identifier.into(),
            url_hash: sha256_hex(source_url.as_bytes()),
        }
    }

    /// Hash of `provider/DataType/identifier`, the file stem on disk.
    pub fn file_stem(&self) -> String {
        sha256_hex(
            format!(
                "{}/{}/{}",
                self.provider,
                self.data_type.display_name(),
                self.identifier
            )
            .as_bytes(),
        )
    }

    /// `<root>/<provider>/<DataType>/<file_stem>.img`
    pub fn output_path(&self, cache_root: &Path) -> PathBuf {
        cache_root
            .join(&self.provider)
            .join(self.data_type.display_name())
            .join(format!("{}.{}", self.file_stem(), IMAGE_EXTENSION))
    }
}

impl fmt::Display for ImageFetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.provider,
            self.data_type.display_name(),
            self.identifier
        )
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_ignores_source_url() {
        let root = Path::new("/cache");
        let a = ImageFetchKey::new("vk", DataType::Contacts, "42", "https://a.example/1.jpg");
        let b = ImageFetchKey::new("vk", DataType::Contacts, "42", "https://b.example/2.jpg");

        assert_ne!(a, b);
        assert_eq!(a.output_path(root), b.output_path(root));
    }

    #[test]
    fn test_path_layout() {
        let key = ImageFetchKey::new("vk", DataType::Contacts, "42", "https://x/y.jpg");
        let path = key.output_path(Path::new("/cache"));

        assert!(path.starts_with("/cache/vk/Contacts"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("img"));
        assert_eq!(key.file_stem().len(), 64);
    }

    #[test]
    fn test_known_hash() {
        // sha256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_identifiers_do_not_collide() {
        let root = Path::new("/cache");
        let a = ImageFetchKey::new("vk", DataType::Contacts, "42", "u");
        let b = ImageFetchKey::new("vk", DataType::Contacts, "43", "u");
        let c = ImageFetchKey::new("vk", DataType::Posts, "42", "u");

        assert_ne!(a.output_path(root), b.output_path(root));
        assert_ne!(a.output_path(root), c.output_path(root));
        assert_eq!(a.to_string(), "vk/Contacts/42");
    }
}
