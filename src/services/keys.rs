//! Key naming policy.
//!
//! Produces collision-free physical keys. Two policies exist: a
//! human-traceable one that keeps a sanitized version of the original
//! filename, and an opaque UUID-based one. Once a key is handed out for an
//! upload it is never reused for a different logical upload; uniqueness
//! comes from the millisecond timestamp plus a random component.

use crate::models::image::OutputFormat;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

const MAX_BASENAME_LEN: usize = 48;
const RANDOM_LEN: usize = 8;

/// Which policy resolves an upload's physical key.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Naming {
    /// Keep a sanitized version of the original filename.
    #[default]
    Timestamped,
    /// Replace the filename with a UUID, keeping only the extension.
    Opaque,
}

/// Resolve a physical key for an upload under the chosen policy.
pub fn physical_key(naming: Naming, folder: &str, original: &str) -> String {
    match naming {
        Naming::Timestamped => timestamped_key(folder, original),
        Naming::Opaque => opaque_key(folder, original),
    }
}

/// Split a filename into (stem, extension-with-dot).
///
/// A name without a dot, or with only a leading dot, has no extension.
fn split_name(original: &str) -> (&str, String) {
    match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem, format!(".{}", ext.to_ascii_lowercase()))
        }
        _ => (original, String::new()),
    }
}

/// Strip a basename down to `[A-Za-z0-9._-]`, mapping whitespace runs to a
/// single `-` and dropping everything else, truncated to a bounded length.
pub fn sanitize_basename(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_BASENAME_LEN));
    let mut last_was_dash = false;
    for ch in name.chars() {
        if out.len() >= MAX_BASENAME_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
            last_was_dash = ch == '-';
        } else if ch.is_whitespace() && !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

fn join(folder: &str, basename: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        basename.to_string()
    } else {
        format!("{folder}/{basename}")
    }
}

/// Human-traceable policy: `<timestamp>-<random>-<sanitized-stem><ext>`.
pub fn timestamped_key(folder: &str, original: &str) -> String {
    let (stem, ext) = split_name(original);
    let stem = sanitize_basename(stem);
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    let random = &random[..RANDOM_LEN];
    join(folder, &format!("{millis}-{random}-{stem}{ext}"))
}

/// Opaque policy: `<uuid><ext>`.
pub fn opaque_key(folder: &str, original: &str) -> String {
    let (_, ext) = split_name(original);
    join(folder, &format!("{}{ext}", Uuid::new_v4().simple()))
}

/// Deterministic key for a derivative of `source_key`.
///
/// A pure function of the source base name, derivative name, and output
/// format, so regenerating the same derivative overwrites rather than
/// duplicates.
pub fn derivative_key(
    prefix: &str,
    source_key: &str,
    name: &str,
    format: OutputFormat,
) -> String {
    let base = source_key.rsplit('/').next().unwrap_or(source_key);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    format!(
        "{}/{stem}-{name}.{}",
        prefix.trim_matches('/'),
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sanitize_strips_unsafe_characters() {
        assert_eq!(sanitize_basename("My Photo (1)"), "My-Photo-1");
        assert_eq!(sanitize_basename("  spaced   out  "), "spaced-out");
        assert_eq!(sanitize_basename("über/weird\\name"), "berweirdname");
        assert_eq!(sanitize_basename("***"), "file");
    }

    #[test]
    fn sanitize_bounds_length() {
        let long = "a".repeat(500);
        assert!(sanitize_basename(&long).len() <= 48);
    }

    #[test]
    fn timestamped_keys_keep_folder_and_extension() {
        let key = timestamped_key("public/products", "photo.JPG");
        assert!(key.starts_with("public/products/"));
        assert!(key.ends_with("-photo.jpg"));
    }

    #[test]
    fn same_filename_yields_distinct_keys() {
        let keys: HashSet<String> = (0..1000)
            .map(|_| timestamped_key("public/temp/pending", "photo.jpg"))
            .collect();
        assert_eq!(keys.len(), 1000);
    }

    #[tokio::test]
    async fn distinct_keys_under_concurrency() {
        let mut handles = Vec::new();
        for _ in 0..100 {
            handles.push(tokio::spawn(async {
                timestamped_key("public/temp/pending", "photo.jpg")
            }));
        }
        let mut keys = HashSet::new();
        for handle in handles {
            keys.insert(handle.await.unwrap());
        }
        assert_eq!(keys.len(), 100);
    }

    #[test]
    fn derivative_keys_are_deterministic() {
        let a = derivative_key(
            "public/thumbnails",
            "public/products/1712-ab12cd34-photo.jpg",
            "small",
            OutputFormat::WebP,
        );
        let b = derivative_key(
            "public/thumbnails",
            "public/products/1712-ab12cd34-photo.jpg",
            "small",
            OutputFormat::WebP,
        );
        assert_eq!(a, b);
        assert_eq!(a, "public/thumbnails/1712-ab12cd34-photo-small.webp");
    }

    #[test]
    fn opaque_keys_are_uuid_shaped() {
        let key = opaque_key("private/catalogs", "report.pdf");
        let name = key.rsplit('/').next().unwrap();
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), 32 + 4);
    }
}
