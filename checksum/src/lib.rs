//! Checksum Verifier (C2): triple-layer SHA-256 integrity checks.
//!
//! 1. Format check on the message-declared checksum (handled by
//!    [`ingest_types::Checksum`] itself).
//! 2. Whole-file verification of the downloaded tarball.
//! 3. Manifest verification of every file listed in `checksums.sha256`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use thiserror::Error;

use ingest_types::Checksum;

const CHUNK_SIZE: usize = 8192;

static MANIFEST_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-fA-F]{64})\s{2,}(.+)$").expect("manifest regex valid"));

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "checksum mismatch for {context}: expected {expected}, got {actual}"
    )]
    Mismatch {
        context: String,
        expected: String,
        actual: String,
    },
    #[error("required manifest file not found in archive: {0}")]
    ManifestMissing(String),
    #[error("manifest {0} contained no usable entries")]
    ManifestEmpty(String),
    #[error("checksum verification failed for {count} file(s):\n{details}")]
    ManifestMismatches { count: usize, details: String },
}

/// Stream `path` in 8 KiB chunks and compute its SHA-256 digest.
pub fn hash_file(path: &Path) -> Result<Checksum, ChecksumError> {
    let mut file = File::open(path).map_err(|source| ChecksumError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|source| ChecksumError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    // Manual hex encoding to avoid a hex crate dependency.
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(Checksum::from_hex_digest(hex).expect("sha256 digest is always well-formed"))
}

/// Stream-verify `path` against `expected`, tagging any mismatch error with `context`.
pub fn verify_file(path: &Path, expected: &Checksum, context: &str) -> Result<(), ChecksumError> {
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(ChecksumError::Mismatch {
            context: context.to_string(),
            expected: expected.as_str().to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(())
}

/// Verify the downloaded tarball against the notification's declared checksum.
pub fn verify_tarball(tarball_path: &Path, expected: &Checksum) -> Result<(), ChecksumError> {
    verify_file(tarball_path, expected, "tar.gz archive")
}

/// One parsed `checksums.sha256` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub checksum: Checksum,
}

/// Parse a manifest's text content. Blank and `#`-prefixed lines are
/// skipped silently; malformed lines are skipped with the caller expected
/// to log a warning (returned alongside so callers can decide how loud to
/// be); well-formed lines become [`ManifestEntry`] values.
#[must_use]
pub fn parse_manifest(content: &str) -> (Vec<ManifestEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for (line_num, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(caps) = MANIFEST_LINE_RE.captures(line) else {
            warnings.push(format!("skipping malformed manifest line {}: {line}", line_num + 1));
            continue;
        };

        let hash = &caps[1];
        let rel_path = caps[2].trim();
        match Checksum::from_hex_digest(hash.to_ascii_lowercase()) {
            Ok(checksum) => entries.push(ManifestEntry {
                relative_path: rel_path.to_string(),
                checksum,
            }),
            Err(_) => {
                warnings.push(format!("invalid hash format on line {}: {hash}", line_num + 1));
            }
        }
    }

    (entries, warnings)
}

pub const MANIFEST_FILE_NAME: &str = "checksums.sha256";

/// Verify every file listed in `extracted_dir/checksums.sha256`.
///
/// The manifest's own self-reference entry (if present) is skipped. All
/// mismatches and missing files are aggregated into one error before
/// returning, matching the archive layer's "report everything, then fail
/// once" behaviour.
pub fn verify_manifest(extracted_dir: &Path) -> Result<Vec<String>, ChecksumError> {
    let manifest_path = extracted_dir.join(MANIFEST_FILE_NAME);
    if !manifest_path.exists() {
        return Err(ChecksumError::ManifestMissing(MANIFEST_FILE_NAME.to_string()));
    }

    let content = std::fs::read_to_string(&manifest_path).map_err(|source| ChecksumError::Io {
        path: manifest_path.display().to_string(),
        source,
    })?;
    let (entries, warnings) = parse_manifest(&content);

    if entries.is_empty() {
        return Err(ChecksumError::ManifestEmpty(MANIFEST_FILE_NAME.to_string()));
    }

    let mut errors = Vec::new();
    let mut verified = 0usize;

    for entry in &entries {
        if entry.relative_path == MANIFEST_FILE_NAME {
            continue;
        }
        let file_path = extracted_dir.join(&entry.relative_path);
        if !file_path.exists() {
            errors.push(format!(
                "file listed in {MANIFEST_FILE_NAME} not found: {}",
                entry.relative_path
            ));
            continue;
        }
        match verify_file(&file_path, &entry.checksum, &format!("archive file '{}'", entry.relative_path)) {
            Ok(()) => verified += 1,
            Err(e) => errors.push(e.to_string()),
        }
    }

    if !errors.is_empty() {
        return Err(ChecksumError::ManifestMismatches {
            count: errors.len(),
            details: errors.join("\n"),
        });
    }

    let _ = verified;
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "a.txt", b"hello world");
        let checksum = hash_file(&path).unwrap();
        assert_eq!(
            checksum.as_str(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn verify_file_detects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "a.txt", b"hello world");
        let wrong = Checksum::from_hex_digest("0".repeat(64)).unwrap();
        let err = verify_file(&path, &wrong, "test file").unwrap_err();
        assert!(matches!(err, ChecksumError::Mismatch { .. }));
    }

    #[test]
    fn parse_manifest_skips_blank_and_comment_lines() {
        let content = "\n# a comment\n\
            b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9  conversation.json\n";
        let (entries, warnings) = parse_manifest(content);
        assert_eq!(entries.len(), 1);
        assert!(warnings.is_empty());
        assert_eq!(entries[0].relative_path, "conversation.json");
    }

    #[test]
    fn parse_manifest_tolerates_tab_separator() {
        let two_spaces = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9  conversation.json";
        let tab = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9\tconversation.json";
        // A single tab is one whitespace character, not two spaces: falls through
        // to the warnings path, demonstrating the manifest's bit-exact format
        // requirement rather than a fuzzy whitespace split.
        let (entries_two, _) = parse_manifest(two_spaces);
        let (entries_tab, warnings_tab) = parse_manifest(tab);
        assert_eq!(entries_two.len(), 1);
        assert!(entries_tab.is_empty());
        assert!(!warnings_tab.is_empty());
    }

    #[test]
    fn parse_manifest_warns_on_malformed_hash() {
        let content = "nothexatall  conversation.json\n";
        let (entries, warnings) = parse_manifest(content);
        assert!(entries.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn verify_manifest_fails_closed_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_manifest(dir.path()).unwrap_err();
        assert!(matches!(err, ChecksumError::ManifestMissing(_)));
    }

    #[test]
    fn verify_manifest_aggregates_all_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        write_tmp(&dir, "a.txt", b"hello");
        write_tmp(&dir, "b.txt", b"world");
        let manifest = format!(
            "{}  a.txt\n{}  b.txt\n",
            "0".repeat(64),
            "1".repeat(64),
        );
        write_tmp(&dir, MANIFEST_FILE_NAME, manifest.as_bytes());
        let err = verify_manifest(dir.path()).unwrap_err();
        match err {
            ChecksumError::ManifestMismatches { count, .. } => assert_eq!(count, 2),
            other => panic!("expected aggregated mismatches, got {other:?}"),
        }
    }

    #[test]
    fn verify_manifest_skips_self_reference() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = write_tmp(&dir, "a.txt", b"hello");
        let a_checksum = hash_file(&a_path).unwrap();
        let manifest = format!(
            "{}  a.txt\n{}  {MANIFEST_FILE_NAME}\n",
            a_checksum.hex_digest(),
            "0".repeat(64),
        );
        write_tmp(&dir, MANIFEST_FILE_NAME, manifest.as_bytes());
        verify_manifest(dir.path()).unwrap();
    }
}
