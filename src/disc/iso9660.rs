//! ISO 9660 Primary Volume Descriptor parsing
//!
//! The PVD sits 16 blocks after the start of a session and carries the volume
//! identification, the volume size and the root directory record.

use super::error::{VolumeError, VolumeResult};
use super::source::{VolumeSource, BLOCK_SIZE};
use super::volume::record::DirectoryRecord;

/// Block of the Primary Volume Descriptor, relative to the session start
pub const PVD_BLOCK: u64 = 16;

/// Volume descriptor type for Primary Volume Descriptor
const PVD_TYPE: u8 = 1;

/// Standard identifier for ISO 9660 volume descriptors
pub const ISO9660_IDENTIFIER: &[u8; 5] = b"CD001";

/// Offset of the volume space size (7.3.3)
const VOLUME_SIZE_OFFSET: usize = 80;

/// Offset of the root directory record
const ROOT_RECORD_OFFSET: usize = 156;
const ROOT_RECORD_LEN: usize = 34;

/// Decode a "7.3.3" field (both-byte-order 32-bit value)
///
/// The little-endian copy is authoritative; some mastering tools get the
/// big-endian half wrong.
pub fn read_733(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Encode a "7.3.3" field
pub fn encode_733(value: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&value.to_le_bytes());
    out[4..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Decode a "7.2.3" field (both-byte-order 16-bit value)
pub fn read_723(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Whether `block` is a Primary Volume Descriptor
pub fn validate(block: &[u8]) -> bool {
    block.len() >= BLOCK_SIZE && block[0] == PVD_TYPE && &block[1..6] == ISO9660_IDENTIFIER
}

fn check(block: &[u8]) -> VolumeResult<()> {
    if block.len() < BLOCK_SIZE {
        return Err(VolumeError::format(format!(
            "Descriptor too small: {} bytes (expected {})",
            block.len(),
            BLOCK_SIZE
        )));
    }
    if !validate(block) {
        log::warn!(
            "Not a Primary Volume Descriptor (type {}, identifier {:?})",
            block[0],
            String::from_utf8_lossy(&block[1..6])
        );
        return Err(VolumeError::format(
            "Not a Primary Volume Descriptor (expected type 1 and 'CD001')",
        ));
    }
    Ok(())
}

/// Volume space size in blocks
pub fn get_size(block: &[u8]) -> VolumeResult<u32> {
    check(block)?;
    Ok(read_733(&block[VOLUME_SIZE_OFFSET..VOLUME_SIZE_OFFSET + 8]))
}

/// Volume identifier, trailing padding removed
pub fn get_label(block: &[u8]) -> VolumeResult<String> {
    check(block)?;
    Ok(extract_string(&block[40..72]))
}

/// Primary Volume Descriptor structure
#[derive(Debug, Clone)]
pub struct PrimaryVolumeDescriptor {
    /// Volume identifier (32 bytes, space-padded)
    pub volume_id: String,
    /// System identifier (32 bytes)
    pub system_id: String,
    /// Volume set identifier (128 bytes)
    pub volume_set_id: String,
    /// Publisher identifier (128 bytes)
    pub publisher_id: String,
    /// Application identifier (128 bytes)
    pub application_id: String,
    /// Volume space size in blocks
    pub volume_size: u32,
    /// Logical block size, 2048 on every volume we can read
    pub block_size: u16,
    pub root: DirectoryRecord,
}

impl PrimaryVolumeDescriptor {
    /// Read the descriptor of the session starting at `start_block`
    pub fn read_from(source: &VolumeSource, start_block: u64) -> VolumeResult<Self> {
        let mut block = [0u8; BLOCK_SIZE];
        source.read_block(start_block + PVD_BLOCK, &mut block)?;
        Self::parse(&block)
    }

    /// Parse a Primary Volume Descriptor from raw block data
    pub fn parse(block: &[u8]) -> VolumeResult<Self> {
        check(block)?;

        let block_size = read_723(&block[128..132]);
        if block_size as usize != BLOCK_SIZE {
            return Err(VolumeError::format(format!(
                "Unsupported logical block size: {}",
                block_size
            )));
        }

        // Layout according to ECMA-119:
        // Offset 8-39: System Identifier (32 bytes, a-characters)
        // Offset 40-71: Volume Identifier (32 bytes, d-characters)
        // Offset 190-317: Volume Set Identifier (128 bytes)
        // Offset 318-445: Publisher Identifier (128 bytes)
        // Offset 574-701: Application Identifier (128 bytes)
        let root =
            DirectoryRecord::parse(&block[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + ROOT_RECORD_LEN])?;
        if !root.is_directory() {
            return Err(VolumeError::format("Root directory record is not a directory"));
        }

        Ok(Self {
            volume_id: extract_string(&block[40..72]),
            system_id: extract_string(&block[8..40]),
            volume_set_id: extract_string(&block[190..318]),
            publisher_id: extract_string(&block[318..446]),
            application_id: extract_string(&block[574..702]),
            volume_size: read_733(&block[VOLUME_SIZE_OFFSET..VOLUME_SIZE_OFFSET + 8]),
            block_size,
            root,
        })
    }
}

/// Extract a string from a byte slice, trimming trailing spaces and nulls
fn extract_string(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    s.trim_end_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}
