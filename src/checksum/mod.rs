//! Checksum manifest verification
//!
//! Discs often carry a manifest (`MD5SUMS`, `.checksum.sha1`, ...) at the
//! session root listing a digest per file. Verification reads the manifest
//! line by line through the volume's file reader and hashes every listed file
//! with direct block transfers.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::config::VerifyConfig;
use crate::disc::source::{VolumeSource, BLOCK_SIZE};
use crate::disc::volume::{FileReader, Iso9660Volume, VolumeFile};
use crate::disc::{VolumeError, VolumeResult};

/// Longest manifest line kept; the rest of a longer line is dropped
const MAX_LINE: usize = 4096;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("No checksum manifest found at the session root")]
    NoManifest,

    #[error("Invalid manifest: {0}")]
    Manifest(String),
}

/// Digest algorithm of a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumKind {
    /// Length of the digest in hex digits
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumKind::Md5 => 32,
            ChecksumKind::Sha1 => 40,
            ChecksumKind::Sha256 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "MD5",
            ChecksumKind::Sha1 => "SHA-1",
            ChecksumKind::Sha256 => "SHA-256",
        }
    }
}

/// One `<digest>  <path>` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Lowercase hex digest
    pub digest: String,
    /// Path relative to the session root
    pub path: String,
}

/// Parse a manifest line in the `md5sum` / `sha1sum` output format
///
/// Both the text (`hash  path`) and binary (`hash *path`) markers are
/// accepted. Blank lines, comments and malformed lines yield `None`.
pub fn parse_manifest_line(line: &str) -> Option<ManifestEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let (digest, rest) = trimmed.split_once(|c: char| c == ' ' || c == '\t')?;
    if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let rest = rest.trim_start_matches([' ', '\t']);
    let rest = rest.strip_prefix('*').unwrap_or(rest);
    let path = rest.strip_prefix("./").unwrap_or(rest).trim_start_matches('/');
    if path.is_empty() {
        return None;
    }

    Some(ManifestEntry {
        digest: digest.to_ascii_lowercase(),
        path: path.to_string(),
    })
}

/// Outcome of verifying one session
#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    /// Manifest the entries came from
    pub manifest: String,
    pub kind: Option<ChecksumKind>,
    /// Files hashed
    pub checked: usize,
    /// Paths whose digest differs
    pub mismatched: Vec<String>,
    /// Paths listed in the manifest but absent from the volume
    pub missing: Vec<String>,
    pub cancelled: bool,
}

impl VerifyReport {
    /// Every listed file was present and matched
    pub fn is_ok(&self) -> bool {
        !self.cancelled && self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// Hash a file's contents, transferring `direct_blocks` blocks at a time
pub fn checksum_file(
    source: &VolumeSource,
    file: &VolumeFile,
    kind: ChecksumKind,
    direct_blocks: usize,
) -> VolumeResult<String> {
    let blocks = direct_blocks.max(1);
    let mut reader = FileReader::open_direct(source, file, blocks)?;
    let digest = match kind {
        ChecksumKind::Md5 => hash_with::<Md5>(&mut reader, blocks),
        ChecksumKind::Sha1 => hash_with::<Sha1>(&mut reader, blocks),
        ChecksumKind::Sha256 => hash_with::<Sha256>(&mut reader, blocks),
    };
    reader.close();
    digest
}

fn hash_with<D: Digest>(reader: &mut FileReader, blocks: usize) -> VolumeResult<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; blocks * BLOCK_SIZE];
    loop {
        let count = reader.read_direct(&mut buf, blocks)?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }
    Ok(hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect())
}

/// First configured manifest present at the session root
fn find_manifest(
    volume: &Iso9660Volume,
    config: &VerifyConfig,
) -> Result<(VolumeFile, ChecksumKind, String), ChecksumError> {
    for candidate in &config.manifests {
        match volume.file(&candidate.name) {
            Ok(file) if file.is_file() => {
                log::info!("Using {} manifest {}", candidate.kind.name(), candidate.name);
                return Ok((file, candidate.kind, candidate.name.clone()));
            }
            Ok(_) | Err(VolumeError::NotFound(_)) | Err(VolumeError::NotADirectory(_)) => {
                log::debug!("No manifest at {}", candidate.name);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ChecksumError::NoManifest)
}

/// Read every entry of a manifest
fn read_manifest(
    volume: &Iso9660Volume,
    file: &VolumeFile,
    kind: ChecksumKind,
) -> Result<Vec<ManifestEntry>, ChecksumError> {
    let mut reader = volume.open_file(file)?;
    let mut line = vec![0u8; MAX_LINE];
    let mut entries = Vec::new();
    let mut number = 0;

    while let Some(len) = reader.read_line(&mut line)? {
        number += 1;
        let text = String::from_utf8_lossy(&line[..len]);
        let Some(entry) = parse_manifest_line(&text) else {
            if !text.trim().is_empty() && !text.trim_start().starts_with('#') {
                log::warn!("Skipping malformed manifest line {}", number);
            }
            continue;
        };
        if entry.digest.len() != kind.hex_len() {
            reader.close();
            return Err(ChecksumError::Manifest(format!(
                "line {}: {} digest has {} digits, expected {}",
                number,
                kind.name(),
                entry.digest.len(),
                kind.hex_len()
            )));
        }
        entries.push(entry);
    }
    reader.close();

    if entries.is_empty() {
        return Err(ChecksumError::Manifest(format!("{} lists no files", file.display_name())));
    }
    Ok(entries)
}

/// Verify every file listed in the session's manifest
///
/// `cancel` is polled between files; a cancelled run returns the partial
/// report with `cancelled` set.
pub fn verify_session(
    volume: &Iso9660Volume,
    config: &VerifyConfig,
    cancel: &AtomicBool,
) -> Result<VerifyReport, ChecksumError> {
    let (manifest, kind, name) = find_manifest(volume, config)?;
    let entries = read_manifest(volume, &manifest, kind)?;
    log::info!("Verifying {} file(s) listed in {}", entries.len(), name);

    let mut report = VerifyReport {
        manifest: name,
        kind: Some(kind),
        ..Default::default()
    };

    for entry in entries {
        if cancel.load(Ordering::Relaxed) {
            log::info!("Verification cancelled after {} file(s)", report.checked);
            report.cancelled = true;
            break;
        }

        let file = match volume.file(&entry.path) {
            Ok(file) if file.is_file() => file,
            Ok(_) | Err(VolumeError::NotFound(_)) | Err(VolumeError::NotADirectory(_)) => {
                log::warn!("Missing: {}", entry.path);
                report.missing.push(entry.path);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let digest = checksum_file(
            volume.source(),
            &file,
            kind,
            config.reader.direct_blocks,
        )?;
        report.checked += 1;
        if digest == entry.digest {
            log::debug!("OK: {}", entry.path);
        } else {
            log::warn!("Mismatch: {} (expected {}, got {})", entry.path, entry.digest, digest);
            report.mismatched.push(entry.path);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManifestCandidate;
    use crate::disc::test_image::IsoBuilder;

    const ABC_MD5: &str = "900150983cd24fb0d6963f7d28e17f72";
    const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn volume_with(manifest_name: &str, manifest: &str) -> Iso9660Volume {
        let mut builder = IsoBuilder::rock_ridge("CHECKED");
        let data = builder.dir(builder.root(), "DATA", Some("data"));
        builder.file(data, "ABC.TXT;1", Some("abc.txt"), b"abc");
        builder.file(builder.root(), "MANIFEST.;1", Some(manifest_name), manifest.as_bytes());
        Iso9660Volume::open(&builder.source(), 0).unwrap()
    }

    #[test]
    fn test_parse_manifest_line() {
        let entry = parse_manifest_line(&format!("{}  ./data/abc.txt", ABC_MD5)).unwrap();
        assert_eq!(entry.digest, ABC_MD5);
        assert_eq!(entry.path, "data/abc.txt");

        let entry = parse_manifest_line(&format!("{} */data/abc.txt\r", ABC_MD5.to_uppercase()))
            .unwrap();
        assert_eq!(entry.digest, ABC_MD5);
        assert_eq!(entry.path, "data/abc.txt");

        assert_eq!(parse_manifest_line(""), None);
        assert_eq!(parse_manifest_line("   "), None);
        assert_eq!(parse_manifest_line("# generated by md5sum"), None);
        assert_eq!(parse_manifest_line("not-a-digest  file"), None);
        assert_eq!(parse_manifest_line(ABC_MD5), None);
    }

    #[test]
    fn test_checksum_kinds() {
        let volume = volume_with("MD5SUMS", "");
        let file = volume.file("data/abc.txt").unwrap();
        let source = volume.source();
        assert_eq!(checksum_file(source, &file, ChecksumKind::Md5, 1).unwrap(), ABC_MD5);
        assert_eq!(checksum_file(source, &file, ChecksumKind::Sha1, 1).unwrap(), ABC_SHA1);
        assert_eq!(checksum_file(source, &file, ChecksumKind::Sha256, 1).unwrap(), ABC_SHA256);
    }

    #[test]
    fn test_checksum_multi_extent_file() {
        let first: Vec<u8> = (0..3 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        let second: Vec<u8> = (0..1000).map(|i| (i % 13) as u8).collect();
        let mut builder = IsoBuilder::new("BIG");
        builder.multi_extent_file(builder.root(), "BIG.BIN;1", None, &[&first, &second]);
        let volume = Iso9660Volume::open(&builder.source(), 0).unwrap();
        let file = volume.file("BIG.BIN").unwrap();
        assert_eq!(file.extents().len(), 2);

        let mut hasher = Sha256::new();
        hasher.update(&first);
        hasher.update(&second);
        let expected: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();

        for blocks in [1, 2, 16] {
            let digest =
                checksum_file(volume.source(), &file, ChecksumKind::Sha256, blocks).unwrap();
            assert_eq!(digest, expected, "direct transfers of {} block(s)", blocks);
        }
    }

    #[test]
    fn test_verify_session() {
        let manifest = format!(
            "# checksums\n{}  ./data/abc.txt\n{}  gone.txt\n",
            ABC_MD5, ABC_MD5
        );
        let volume = volume_with("MD5SUMS", &manifest);
        let report =
            verify_session(&volume, &VerifyConfig::defaults(), &AtomicBool::new(false)).unwrap();

        assert_eq!(report.manifest, "MD5SUMS");
        assert_eq!(report.kind, Some(ChecksumKind::Md5));
        assert_eq!(report.checked, 1);
        assert!(report.mismatched.is_empty());
        assert_eq!(report.missing, vec!["gone.txt".to_string()]);
        assert!(!report.is_ok());
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let manifest = format!("{}  data/abc.txt\n", ABC_SHA1.replace('a', "b"));
        let volume = volume_with(".checksum.sha1", &manifest);
        let report =
            verify_session(&volume, &VerifyConfig::defaults(), &AtomicBool::new(false)).unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.mismatched, vec!["data/abc.txt".to_string()]);
    }

    #[test]
    fn test_verify_clean_session() {
        let manifest = format!("{} *data/abc.txt\n", ABC_SHA256);
        let volume = volume_with("SHA256SUMS", &manifest);
        let report =
            verify_session(&volume, &VerifyConfig::defaults(), &AtomicBool::new(false)).unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.is_ok());
    }

    #[test]
    fn test_verify_cancelled() {
        let manifest = format!("{}  data/abc.txt\n", ABC_MD5);
        let volume = volume_with("MD5SUMS", &manifest);
        let report =
            verify_session(&volume, &VerifyConfig::defaults(), &AtomicBool::new(true)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.checked, 0);
        assert!(!report.is_ok());
    }

    #[test]
    fn test_manifest_digest_length_checked() {
        let manifest = format!("{}  data/abc.txt\n", ABC_SHA1);
        let volume = volume_with("MD5SUMS", &manifest);
        let err = verify_session(&volume, &VerifyConfig::defaults(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, ChecksumError::Manifest(_)));
    }

    #[test]
    fn test_no_manifest() {
        let volume = volume_with("README", "nothing to see");
        let err = verify_session(&volume, &VerifyConfig::defaults(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, ChecksumError::NoManifest));
    }

    #[test]
    fn test_configured_manifest_name() {
        let manifest = format!("{}  data/abc.txt\n", ABC_SHA1);
        let volume = volume_with("hashes.txt", &manifest);
        let config = VerifyConfig {
            manifests: vec![ManifestCandidate {
                kind: ChecksumKind::Sha1,
                name: "hashes.txt".to_string(),
            }],
            ..VerifyConfig::defaults()
        };
        let report = verify_session(&volume, &config, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.is_ok());
    }
}
