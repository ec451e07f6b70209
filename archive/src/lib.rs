//! Archive Fetcher (C3): unpacking and scratch-directory lifecycle.
//!
//! Downloading the raw bytes is the object store client's job (see
//! `ingest-providers`); this crate only knows how to turn those bytes into
//! an on-disk archive and find the canonical `conversation.json` inside it.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;

pub const CONVERSATION_FILE_NAME: &str = "conversation.json";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unrecognised object key extension: {0}")]
    UnknownExtension(String),
    #[error("no {CONVERSATION_FILE_NAME} found inside the extracted archive")]
    ConversationJsonMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    LegacyJson,
    LegacyJsonGz,
}

/// Classify an object key by its extension. Unknown extensions are fatal
/// (`processing_failure`) at the orchestrator layer.
#[must_use]
pub fn classify_object_key(key: &str) -> Option<ArchiveKind> {
    if key.ends_with(".tar.gz") {
        Some(ArchiveKind::TarGz)
    } else if key.ends_with(".json.gz") {
        Some(ArchiveKind::LegacyJsonGz)
    } else if key.ends_with(".json") {
        Some(ArchiveKind::LegacyJson)
    } else {
        None
    }
}

/// A per-job scratch directory, exclusive to one pipeline worker for the
/// lifetime of one message. Not cleaned up on `Drop`: the orchestrator
/// releases it explicitly on every exit path so a crash leaves it behind
/// for [`sweep_stale_scratch`] to find on the next worker startup.
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create a uniquely-named scratch directory under `base_dir` for `stable_event_id`.
    pub fn create(base_dir: &Path, stable_event_id: &str) -> Result<Self, ArchiveError> {
        let unique = uuid::Uuid::new_v4();
        let root = base_dir.join(format!("{stable_event_id}-{unique}"));
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn tarball_path(&self) -> PathBuf {
        self.root.join("archive.tar.gz")
    }

    #[must_use]
    pub fn extracted_root(&self) -> PathBuf {
        self.root.join("extracted")
    }

    /// Release the scratch directory. Called by the orchestrator on every
    /// exit path: success (after ack), validation failure, and any other
    /// failure before DLQ publication.
    pub fn release(self) -> Result<(), ArchiveError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

/// Write `tarball_bytes` to `scratch.tarball_path()` and extract it into
/// `scratch.extracted_root()`.
pub fn unpack_tar_gz(scratch: &ScratchDir, tarball_bytes: &[u8]) -> Result<(), ArchiveError> {
    let tarball_path = scratch.tarball_path();
    let mut file = File::create(&tarball_path)?;
    file.write_all(tarball_bytes)?;
    drop(file);

    let extracted_root = scratch.extracted_root();
    std::fs::create_dir_all(&extracted_root)?;

    let tar_gz = File::open(&tarball_path)?;
    let decoder = flate2::read::GzDecoder::new(tar_gz);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(&extracted_root)?;
    Ok(())
}

/// Recursively locate `conversation.json` under `root`. A single hit is
/// expected; the first one found (depth-first) is used.
pub fn find_conversation_json(root: &Path) -> Result<PathBuf, ArchiveError> {
    find_recursive(root, CONVERSATION_FILE_NAME)?.ok_or(ArchiveError::ConversationJsonMissing)
}

fn find_recursive(dir: &Path, file_name: &str) -> Result<Option<PathBuf>, ArchiveError> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_file() && path.file_name().and_then(|n| n.to_str()) == Some(file_name) {
            return Ok(Some(path));
        }
        if file_type.is_dir() {
            subdirs.push(path);
        }
    }
    for subdir in subdirs {
        if let Some(found) = find_recursive(&subdir, file_name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Decompress (if `.json.gz`) and return the legacy payload's raw bytes.
/// Legacy drops produce a synthetic wrapper with no tarball path at all.
pub fn read_legacy_payload(kind: ArchiveKind, bytes: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    match kind {
        ArchiveKind::LegacyJson => Ok(bytes.to_vec()),
        ArchiveKind::LegacyJsonGz => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        ArchiveKind::TarGz => unreachable!("read_legacy_payload is only for legacy kinds"),
    }
}

/// Sweep scratch directories under `base_dir` whose modification time is
/// older than `older_than` relative to `now`. Run once at worker startup
/// to reclaim storage orphaned by a prior crash.
pub fn sweep_stale_scratch(
    base_dir: &Path,
    older_than: Duration,
    now: SystemTime,
) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !base_dir.exists() {
        return Ok(removed);
    }
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > older_than {
            std::fs::remove_dir_all(&path)?;
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Default staleness threshold for [`sweep_stale_scratch`].
pub const DEFAULT_SCRATCH_MAX_AGE: Duration = Duration::from_secs(3600);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tar_gz() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let conversation = br#"{"stable_event_id":"rec-x"}"#;
        let mut header = tar::Header::new_gnu();
        header.set_size(conversation.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, "nested/conversation.json", &conversation[..])
            .unwrap();
        let checksums = b"0000000000000000000000000000000000000000000000000000000000000000  nested/conversation.json\n";
        let mut header2 = tar::Header::new_gnu();
        header2.set_size(checksums.len() as u64);
        header2.set_cksum();
        builder
            .append_data(&mut header2, "checksums.sha256", &checksums[..])
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn classify_by_extension() {
        assert_eq!(classify_object_key("foo.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(classify_object_key("foo.json"), Some(ArchiveKind::LegacyJson));
        assert_eq!(classify_object_key("foo.json.gz"), Some(ArchiveKind::LegacyJsonGz));
        assert_eq!(classify_object_key("foo.zip"), None);
    }

    #[test]
    fn unpack_and_locate_conversation_json_at_depth() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(base.path(), "rec-test").unwrap();
        unpack_tar_gz(&scratch, &sample_tar_gz()).unwrap();
        let found = find_conversation_json(&scratch.extracted_root()).unwrap();
        assert!(found.ends_with("nested/conversation.json"));
        scratch.release().unwrap();
        assert!(!base.path().join("rec-test").exists());
    }

    #[test]
    fn missing_conversation_json_is_an_error() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(base.path(), "rec-empty").unwrap();
        std::fs::create_dir_all(scratch.extracted_root()).unwrap();
        let err = find_conversation_json(&scratch.extracted_root()).unwrap_err();
        assert!(matches!(err, ArchiveError::ConversationJsonMissing));
    }

    #[test]
    fn legacy_json_gz_decompresses() {
        let raw = br#"{"ok":true}"#;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(raw).unwrap();
        let gz = encoder.finish().unwrap();
        let decompressed = read_legacy_payload(ArchiveKind::LegacyJsonGz, &gz).unwrap();
        assert_eq!(decompressed, raw);
    }

    #[test]
    fn sweep_removes_only_stale_directories() {
        let base = tempfile::tempdir().unwrap();
        let fresh = base.path().join("fresh-job");
        let stale = base.path().join("stale-job");
        std::fs::create_dir_all(&fresh).unwrap();
        std::fs::create_dir_all(&stale).unwrap();

        let now = SystemTime::now() + Duration::from_secs(7200);
        let removed = sweep_stale_scratch(base.path(), Duration::from_secs(3600), now).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!fresh.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn legacy_json_passthrough_is_untouched() {
        let raw = br#"{"ok":true}"#;
        assert_eq!(read_legacy_payload(ArchiveKind::LegacyJson, raw).unwrap(), raw);
    }
}
