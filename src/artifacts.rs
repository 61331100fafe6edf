//! Filesystem artifact store.
//!
//! One request produces up to N+2 artifacts, all keyed by the request's
//! generated identifier: the original upload (uploads dir), the annotated
//! image and one crop per detection (results dir). Artifacts are immutable
//! once written; concurrent requests never collide because identifiers are
//! 128-bit random.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use regex::Regex;
use thiserror::Error;

/// Shape of every reference this store hands out: `{id}.{ext}` or
/// `{id}_crop_{index}.{ext}`. Anything else never resolves.
fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{32}(_crop_[0-9]+)?\.[a-z0-9]{1,5}$").expect("valid regex")
    })
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The reference is not a bare generated filename. Traversal attempts
    /// land here, not in the filesystem.
    #[error("invalid artifact reference '{0}'")]
    InvalidReference(String),

    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("failed to read artifact '{0}': {1}")]
    Io(String, std::io::Error),
}

pub struct ArtifactStore {
    uploads_dir: PathBuf,
    results_dir: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if missing) the uploads and results directories.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(uploads_dir: P, results_dir: Q) -> Result<Self> {
        let uploads_dir = uploads_dir.as_ref().to_path_buf();
        let results_dir = results_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&uploads_dir)
            .with_context(|| format!("create uploads dir {}", uploads_dir.display()))?;
        std::fs::create_dir_all(&results_dir)
            .with_context(|| format!("create results dir {}", results_dir.display()))?;
        Ok(Self {
            uploads_dir,
            results_dir,
        })
    }

    /// Persist the original upload bytes, untouched.
    pub fn save_original(&self, request_id: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.uploads_dir.join(format!("{request_id}.{ext}"));
        std::fs::write(&path, bytes)
            .with_context(|| format!("write original upload {}", path.display()))?;
        Ok(path)
    }

    /// Encode and persist a result image (annotated image or crop) under the
    /// given bare filename.
    pub fn save_result_image(&self, filename: &str, image: &RgbImage) -> Result<PathBuf> {
        let format = format_for_name(filename);
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), format)
            .with_context(|| format!("encode result image {filename}"))?;
        let path = self.results_dir.join(filename);
        std::fs::write(&path, &encoded)
            .with_context(|| format!("write result image {}", path.display()))?;
        Ok(path)
    }

    /// Resolve an external artifact reference to its bytes + content type.
    pub fn resolve(&self, reference: &str) -> Result<(Vec<u8>, &'static str), ResolveError> {
        if !reference_pattern().is_match(reference) {
            return Err(ResolveError::InvalidReference(reference.to_string()));
        }
        let path = self.results_dir.join(reference);
        match std::fs::read(&path) {
            Ok(bytes) => Ok((bytes, content_type_for_name(reference))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ResolveError::NotFound(reference.to_string()))
            }
            Err(err) => Err(ResolveError::Io(reference.to_string(), err)),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }
}

/// Normalize an untrusted original filename into a storable extension.
///
/// Only the extension is ever derived from caller input, and only from a
/// closed set; everything unrecognized becomes `jpg`. The filename itself is
/// stored as display text, never used for paths.
pub fn normalize_extension(original_filename: &str) -> &'static str {
    let ext = original_filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" => "jpg",
        "jpeg" => "jpeg",
        "png" => "png",
        _ => "jpg",
    }
}

fn format_for_name(filename: &str) -> ImageFormat {
    if filename.ends_with(".png") {
        ImageFormat::Png
    } else {
        ImageFormat::Jpeg
    }
}

fn content_type_for_name(filename: &str) -> &'static str {
    if filename.ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            ArtifactStore::open(dir.path().join("uploads"), dir.path().join("results")).unwrap();
        (dir, store)
    }

    #[test]
    fn round_trips_a_result_image() {
        let (_dir, store) = store();
        let id = crate::new_request_id();
        let image = RgbImage::new(8, 6);
        store
            .save_result_image(&format!("{id}.png"), &image)
            .unwrap();
        let (bytes, content_type) = store.resolve(&format!("{id}.png")).unwrap();
        assert_eq!(content_type, "image/png");
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 6));
    }

    #[test]
    fn rejects_traversal_references() {
        let (_dir, store) = store();
        for reference in [
            "../etc/passwd",
            "..%2fsecret",
            "/etc/hostname",
            "a/b.jpg",
            "ABCDEF.jpg",
            "0123456789abcdef0123456789abcdef.jpg.exe",
        ] {
            assert!(matches!(
                store.resolve(reference),
                Err(ResolveError::InvalidReference(_))
            ));
        }
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let (_dir, store) = store();
        let reference = format!("{}.jpg", crate::new_request_id());
        assert!(matches!(
            store.resolve(&reference),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[test]
    fn crop_references_are_valid() {
        let (_dir, store) = store();
        let id = crate::new_request_id();
        let image = RgbImage::new(4, 4);
        store
            .save_result_image(&format!("{id}_crop_0.jpg"), &image)
            .unwrap();
        assert!(store.resolve(&format!("{id}_crop_0.jpg")).is_ok());
    }

    #[test]
    fn extension_normalization_is_closed() {
        assert_eq!(normalize_extension("photo.JPG"), "jpg");
        assert_eq!(normalize_extension("photo.jpeg"), "jpeg");
        assert_eq!(normalize_extension("shot.png"), "png");
        assert_eq!(normalize_extension("archive.tar.gz"), "jpg");
        assert_eq!(normalize_extension("noext"), "jpg");
        assert_eq!(normalize_extension("../../evil.sh"), "jpg");
    }
}
