//! ISO 9660 / Rock Ridge volume access
//!
//! Directory records ([`record`]) are scanned block by block ([`scanner`]),
//! their System Use areas decoded ([`susp`]) and the result assembled into a
//! file tree ([`entry`]) by the [`loader`]. [`file_reader`] streams file data
//! back out of the block source.

pub mod entry;
pub mod file_reader;
pub mod loader;
pub mod record;
pub mod scanner;
pub mod susp;

pub use entry::{Extent, FileId, FileKind, VolumeFile, VolumeTree};
pub use file_reader::{FileReader, DEFAULT_BUFFER_BLOCKS};
pub use loader::{get_contents, get_directory_contents, get_file, VolumeContents};
pub use susp::VolumeCapabilities;

use super::error::VolumeResult;
use super::iso9660::PrimaryVolumeDescriptor;
use super::source::VolumeSource;

/// A session's ISO 9660 volume on a block source
#[derive(Debug, Clone)]
pub struct Iso9660Volume {
    source: VolumeSource,
    start_block: u64,
    descriptor: PrimaryVolumeDescriptor,
    buffer_blocks: usize,
}

impl Iso9660Volume {
    /// Read the descriptor of the session starting at `start_block`
    pub fn open(source: &VolumeSource, start_block: u64) -> VolumeResult<Self> {
        let descriptor = PrimaryVolumeDescriptor::read_from(source, start_block)?;
        log::info!(
            "Opened volume '{}' at block {} ({} blocks)",
            descriptor.volume_id,
            start_block,
            descriptor.volume_size
        );

        Ok(Self {
            source: source.clone(),
            start_block,
            descriptor,
            buffer_blocks: DEFAULT_BUFFER_BLOCKS,
        })
    }

    /// Buffer size used by readers opened through this volume
    pub fn with_buffer_blocks(mut self, blocks: usize) -> Self {
        self.buffer_blocks = blocks.max(1);
        self
    }

    pub fn label(&self) -> &str {
        &self.descriptor.volume_id
    }

    /// Volume space size in blocks
    pub fn size(&self) -> u32 {
        self.descriptor.volume_size
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn descriptor(&self) -> &PrimaryVolumeDescriptor {
        &self.descriptor
    }

    pub fn source(&self) -> &VolumeSource {
        &self.source
    }

    /// Parse the whole tree
    pub fn contents(&self) -> VolumeResult<VolumeContents> {
        get_contents(&self.source, &self.descriptor)
    }

    /// Resolve one path
    pub fn file(&self, path: &str) -> VolumeResult<VolumeFile> {
        get_file(&self.source, path, &self.descriptor)
    }

    /// List one directory level; `None` lists the root
    pub fn directory(&self, address: Option<u32>) -> VolumeResult<Vec<VolumeFile>> {
        get_directory_contents(&self.source, &self.descriptor, address)
    }

    pub fn open_file(&self, file: &VolumeFile) -> VolumeResult<FileReader> {
        FileReader::open(&self.source, file, self.buffer_blocks)
    }

    pub fn open_direct(&self, file: &VolumeFile) -> VolumeResult<FileReader> {
        FileReader::open_direct(&self.source, file, self.buffer_blocks)
    }

    /// Read an entire file into memory
    pub fn read_file(&self, file: &VolumeFile) -> VolumeResult<Vec<u8>> {
        let mut reader = self.open_file(file)?;
        let mut data = vec![0u8; file.size() as usize];
        let count = reader.read(&mut data)?;
        data.truncate(count);
        reader.close();
        Ok(data)
    }

    /// Release this volume's handle on the source
    pub fn close(self) {
        self.source.close();
    }
}
