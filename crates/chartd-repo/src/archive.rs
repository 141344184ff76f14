//! Chart archive digests and unpacking

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RepoError, Result};

/// Compute SHA256 digest of data as `sha256:<hex>`
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check if two digests match (supports various formats)
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    fn normalize(digest: &str) -> String {
        digest
            .trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    }
    normalize(expected) == normalize(actual)
}

/// Unpack a chart archive into `dest`, dropping the top-level directory
///
/// Entries that would escape `dest` are rejected.
pub fn unpack_chart(data: &[u8], dest: &Path) -> Result<()> {
    let gz = flate2::read::GzDecoder::new(data);
    let mut archive = tar::Archive::new(gz);
    let mut written = 0usize;

    std::fs::create_dir_all(dest)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let mut relative = PathBuf::new();
        for component in path.components().skip(1) {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(RepoError::InvalidArchive {
                        message: format!("unsafe path in archive: {}", path.display()),
                    });
                }
            }
        }
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        std::fs::write(&target, contents)?;
        written += 1;
    }

    if written == 0 {
        return Err(RepoError::InvalidArchive {
            message: "archive contains no files".to_string(),
        });
    }
    Ok(())
}

/// Unpack an archive under `root`, keyed by its digest
///
/// Identical archives reuse the same directory. The archive is unpacked to a
/// staging directory first and renamed into place, so a concurrent reader
/// never sees a half-written chart.
pub fn unpack_cached(data: &[u8], root: &Path) -> Result<PathBuf> {
    let digest = compute_digest(data);
    let key = &digest.trim_start_matches("sha256:")[..16];
    let dest = root.join(key);

    if is_published(&dest) {
        return Ok(dest);
    }

    let staging = staging_dir(root, key)?;
    unpack_chart(data, &staging)?;
    publish(&staging, &dest)
}

/// Whether a chart directory has been moved into place
pub(crate) fn is_published(dir: &Path) -> bool {
    dir.join(chartd_core::chart::CHART_FILE).exists()
}

/// Fresh, unique directory under `root` for building a chart before it is
/// published
pub(crate) fn staging_dir(root: &Path, key: &str) -> Result<PathBuf> {
    static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);
    let staging = root.join(format!(
        ".{}-{}-{}",
        key,
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    Ok(staging)
}

/// Rename a staged chart to `dest`; when another writer got there first the
/// staged copy is discarded in favour of theirs
pub(crate) fn publish(staging: &Path, dest: &Path) -> Result<PathBuf> {
    match std::fs::rename(staging, dest) {
        Ok(()) => Ok(dest.to_path_buf()),
        Err(_) if is_published(dest) => {
            std::fs::remove_dir_all(staging)?;
            Ok(dest.to_path_buf())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a gzipped chart archive with `top/` as its root directory
    pub(crate) fn chart_archive(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/{}", top, name), content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"hello world");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 7 + 64);
    }

    #[test]
    fn test_digest_matches() {
        assert!(digest_matches("sha256:abc123", "sha256:ABC123"));
        assert!(digest_matches("sha256:abc123", "abc123"));
        assert!(digest_matches("sha256:abc123", "sha256-abc123"));
        assert!(!digest_matches("sha256:abc123", "sha256:xyz789"));
    }

    #[test]
    fn test_unpack_strips_top_directory() {
        let temp = TempDir::new().unwrap();
        let data = chart_archive(
            "web",
            &[
                ("Chart.yaml", "apiVersion: v2\nname: web\nversion: 1.0.0\n"),
                ("templates/svc.yaml", "kind: Service\n"),
            ],
        );

        unpack_chart(&data, temp.path()).unwrap();

        assert!(temp.path().join("Chart.yaml").exists());
        assert!(temp.path().join("templates/svc.yaml").exists());
    }

    #[test]
    fn test_unpack_cached_reuses_directory() {
        let temp = TempDir::new().unwrap();
        let data = chart_archive("web", &[("Chart.yaml", "apiVersion: v2\nname: web\nversion: 1.0.0\n")]);

        let first = unpack_cached(&data, temp.path()).unwrap();
        let second = unpack_cached(&data, temp.path()).unwrap();

        assert_eq!(first, second);
        assert!(first.join("Chart.yaml").exists());
    }
}
