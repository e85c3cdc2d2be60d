//! Destination key naming

use std::sync::Arc;

use crate::FileDescriptor;

/// Maps a file and caller-supplied naming parameters to a destination key.
///
/// Must be pure: the same file metadata and parameters give the same key.
pub type KeyNamer = Arc<dyn Fn(&FileDescriptor, &serde_json::Value) -> String + Send + Sync>;

/// Namer producing `{prefix}/{digest}/{file name}`.
///
/// The digest is BLAKE3 over the file name, size, content type and the
/// naming parameters, so distinct inputs land under distinct directories.
pub fn content_addressed_namer(prefix: impl Into<String>) -> KeyNamer {
    let prefix = prefix.into().trim_matches('/').to_string();

    Arc::new(move |file: &FileDescriptor, params: &serde_json::Value| {
        let mut hasher = blake3::Hasher::new();
        hasher.update(file.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&file.size.unwrap_or(0).to_le_bytes());
        hasher.update(file.content_type.as_deref().unwrap_or("").as_bytes());
        hasher.update(&[0]);
        hasher.update(params.to_string().as_bytes());
        let digest = crate::hex::encode(&hasher.finalize().as_bytes()[..8]);

        let name = sanitize_file_name(&file.name);
        if prefix.is_empty() {
            format!("{}/{}", digest, name)
        } else {
            format!("{}/{}/{}", prefix, digest, name)
        }
    })
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namer_is_deterministic() {
        let namer = content_addressed_namer("uploads");
        let file = FileDescriptor::new("cat photo.jpg").with_size(2048);
        let params = json!({"userId": 7});

        let first = namer(&file, &params);
        assert_eq!(first, namer(&file, &params));
        assert!(first.starts_with("uploads/"));
        assert!(first.ends_with("/cat_photo.jpg"));
    }

    #[test]
    fn namer_separates_distinct_params() {
        let namer = content_addressed_namer("/uploads/");
        let file = FileDescriptor::new("a.txt");
        assert_ne!(namer(&file, &json!({"userId": 1})), namer(&file, &json!({"userId": 2})));
    }

    #[test]
    fn file_names_cannot_escape_the_prefix() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..\\win.ini"), "win.ini");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }
}
