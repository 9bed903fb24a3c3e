//! ISO 9660 directory record wire format
//!
//! ```text
//!  0      record length
//!  1      extended attribute record length
//!  2..10  extent address (7.3.3)
//! 10..18  data length (7.3.3)
//! 18..25  recording date and time
//! 25      file flags
//! 26      file unit size
//! 27      interleave gap size
//! 28..32  volume sequence number (7.2.3)
//! 32      identifier length
//! 33..    identifier, padded to even length, then the System Use area
//! ```

use crate::disc::error::{VolumeError, VolumeResult};
use crate::disc::iso9660::{read_723, read_733};
use crate::disc::source::BLOCK_SIZE;

/// Size of a directory record with an empty identifier
pub const RECORD_HEADER_LEN: usize = 33;

/// Directory record file flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags(pub u8);

impl FileFlags {
    /// Hidden from the user ("existence" bit)
    pub const EXISTENCE: u8 = 0x01;
    pub const DIRECTORY: u8 = 0x02;
    pub const ASSOCIATED: u8 = 0x04;
    pub const RECORD: u8 = 0x08;
    pub const PROTECTION: u8 = 0x10;
    /// More records follow for this file
    pub const MULTI_EXTENT: u8 = 0x80;

    pub fn is_directory(self) -> bool {
        self.0 & Self::DIRECTORY != 0
    }

    pub fn is_hidden(self) -> bool {
        self.0 & Self::EXISTENCE != 0
    }

    pub fn is_associated(self) -> bool {
        self.0 & Self::ASSOCIATED != 0
    }

    /// This record is not the final one of a multi-extent file
    pub fn is_multi_extent(self) -> bool {
        self.0 & Self::MULTI_EXTENT != 0
    }
}

/// One parsed directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub length: u8,
    pub ext_attr_length: u8,
    /// First block of the extent
    pub address: u32,
    /// Extent length in bytes
    pub size: u32,
    pub date_time: [u8; 7],
    pub flags: FileFlags,
    pub file_unit: u8,
    pub gap_size: u8,
    pub volume_sequence: u16,
    pub identifier: Vec<u8>,
    /// Full System Use area, before any per-volume skip
    pub system_use: Vec<u8>,
}

impl DirectoryRecord {
    /// Parse one record; `bytes` must hold at least the declared record length
    pub fn parse(bytes: &[u8]) -> VolumeResult<Self> {
        let length = *bytes
            .first()
            .ok_or_else(|| VolumeError::format("Empty directory record"))? as usize;

        if length < RECORD_HEADER_LEN || bytes.len() < length {
            return Err(VolumeError::format(format!(
                "Directory record length {} is invalid ({} bytes available)",
                length,
                bytes.len()
            )));
        }

        let id_len = bytes[32] as usize;
        let id_end = RECORD_HEADER_LEN + id_len;
        if id_end > length {
            return Err(VolumeError::format(format!(
                "Identifier length {} does not fit a {}-byte directory record",
                id_len, length
            )));
        }

        // Even identifier lengths are followed by a padding byte
        let su_start = (id_end + (id_len + 1) % 2).min(length);

        let mut date_time = [0u8; 7];
        date_time.copy_from_slice(&bytes[18..25]);

        Ok(Self {
            length: length as u8,
            ext_attr_length: bytes[1],
            address: read_733(&bytes[2..10]),
            size: read_733(&bytes[10..18]),
            date_time,
            flags: FileFlags(bytes[25]),
            file_unit: bytes[26],
            gap_size: bytes[27],
            volume_sequence: read_723(&bytes[28..32]),
            identifier: bytes[RECORD_HEADER_LEN..id_end].to_vec(),
            system_use: bytes[su_start..length].to_vec(),
        })
    }

    /// The "." entry of a directory
    pub fn is_self(&self) -> bool {
        self.identifier.as_slice() == [0]
    }

    /// The ".." entry of a directory
    pub fn is_parent(&self) -> bool {
        self.identifier.as_slice() == [1]
    }

    pub fn is_directory(&self) -> bool {
        self.flags.is_directory()
    }

    /// System Use area after the volume's fixed skip
    pub fn system_use_area(&self, skip: usize) -> &[u8] {
        &self.system_use[skip.min(self.system_use.len())..]
    }

    /// Number of blocks covered by the extent
    pub fn blocks(&self) -> u64 {
        blocks_for(self.size as u64)
    }

    /// ISO identifier without version suffix or trailing dot
    pub fn iso_name(&self) -> String {
        if self.is_self() {
            return ".".to_string();
        }
        if self.is_parent() {
            return "..".to_string();
        }
        clean_name(&self.identifier)
    }
}

/// Strip the ";N" version suffix and a trailing '.' from an ISO identifier
pub fn clean_name(identifier: &[u8]) -> String {
    let name = String::from_utf8_lossy(identifier);
    let name = match name.rfind(';') {
        Some(idx) => &name[..idx],
        None => &name[..],
    };
    name.strip_suffix('.').unwrap_or(name).to_string()
}

/// Blocks needed to hold `size` bytes
pub fn blocks_for(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE as u64)
}
