//! Application configuration
//!
//! Handles loading configuration from disc-verify.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::checksum::ChecksumKind;

/// Configuration file name, looked up in the current directory and then next
/// to the executable
pub const CONFIG_FILE: &str = "disc-verify.json";

/// Global application config
static APP_CONFIG: OnceLock<VerifyConfig> = OnceLock::new();

/// Get the global application config
pub fn get_config() -> &'static VerifyConfig {
    APP_CONFIG.get_or_init(VerifyConfig::load)
}

/// Root application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VerifyConfig {
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Manifest files tried in order at the session root
    #[serde(default = "default_manifests")]
    pub manifests: Vec<ManifestCandidate>,
}

/// Sequential reader tuning
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReaderConfig {
    /// Internal buffer of the line-oriented reader, in blocks
    #[serde(default = "default_buffer_blocks")]
    pub buffer_blocks: usize,
    /// Blocks per direct transfer while hashing
    #[serde(default = "default_direct_blocks")]
    pub direct_blocks: usize,
}

fn default_buffer_blocks() -> usize {
    64
}

fn default_direct_blocks() -> usize {
    16
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_blocks: default_buffer_blocks(),
            direct_blocks: default_direct_blocks(),
        }
    }
}

/// A checksum manifest file name and the digest it holds
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ManifestCandidate {
    pub kind: ChecksumKind,
    pub name: String,
}

impl ManifestCandidate {
    fn new(kind: ChecksumKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }
}

fn default_manifests() -> Vec<ManifestCandidate> {
    vec![
        ManifestCandidate::new(ChecksumKind::Md5, ".checksum.md5"),
        ManifestCandidate::new(ChecksumKind::Sha1, ".checksum.sha1"),
        ManifestCandidate::new(ChecksumKind::Sha256, ".checksum.sha256"),
        ManifestCandidate::new(ChecksumKind::Md5, "MD5SUMS"),
        ManifestCandidate::new(ChecksumKind::Sha1, "SHA1SUMS"),
        ManifestCandidate::new(ChecksumKind::Sha256, "SHA256SUMS"),
    ]
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl VerifyConfig {
    /// Load configuration from disc-verify.json
    pub fn load() -> Self {
        // Try to load from current directory first
        if let Ok(config) = Self::load_from_path(CONFIG_FILE) {
            log::info!("Loaded config from ./{}", CONFIG_FILE);
            return config;
        }

        // Try to load from executable directory
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join(CONFIG_FILE);
                if let Ok(config) = Self::load_from_path(&config_path) {
                    log::info!("Loaded config from {}", config_path.display());
                    return config;
                }
            }
        }

        log::info!("No {} found, using defaults", CONFIG_FILE);
        Self::defaults()
    }

    /// Built-in configuration
    pub fn defaults() -> Self {
        Self {
            reader: ReaderConfig::default(),
            manifests: default_manifests(),
        }
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        let config: VerifyConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}
