//! Sequential reader over one file's extents
//!
//! Bytes come out in extent-list order, which for merged multi-extent files
//! is the on-disk discovery order rather than ascending block address.

use std::io::{self, SeekFrom};

use crate::disc::error::{VolumeError, VolumeResult};
use crate::disc::source::{check_buffer, VolumeSource, BLOCK_SIZE};

use super::entry::{Extent, VolumeFile};

/// Default size of the internal buffer, in blocks
pub const DEFAULT_BUFFER_BLOCKS: usize = 64;

/// Buffered streaming reader over a file of the volume
#[derive(Debug)]
pub struct FileReader {
    source: VolumeSource,
    extents: Vec<Extent>,
    size: u64,
    buffer_blocks: usize,
    /// Extent being read
    extent: usize,
    /// Bytes of the current extent already transferred from the source
    extent_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    /// Bytes handed to the caller
    position: u64,
}

impl FileReader {
    /// Open `file` and fill the buffer from its first extent
    pub fn open(source: &VolumeSource, file: &VolumeFile, buffer_blocks: usize) -> VolumeResult<Self> {
        let mut reader = Self::open_direct(source, file, buffer_blocks)?;
        reader.fill()?;
        Ok(reader)
    }

    /// Open `file` without touching the source yet
    ///
    /// Meant for consumers that only use [`FileReader::read_direct`]; the
    /// buffer is allocated on the first buffered read.
    pub fn open_direct(
        source: &VolumeSource,
        file: &VolumeFile,
        buffer_blocks: usize,
    ) -> VolumeResult<Self> {
        if file.is_directory() {
            return Err(VolumeError::IsDirectory(file.display_name().to_string()));
        }

        Ok(Self {
            source: source.clone(),
            extents: file.extents().to_vec(),
            size: file.size(),
            buffer_blocks: buffer_blocks.max(1),
            extent: 0,
            extent_offset: 0,
            buffer: Vec::new(),
            buffer_pos: 0,
            buffer_len: 0,
            position: 0,
        })
    }

    /// Bytes delivered so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Declared size of the file
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_eof(&self) -> bool {
        self.buffered() == 0 && self.next_extent_data().is_none()
    }

    fn buffered(&self) -> usize {
        self.buffer_len - self.buffer_pos
    }

    /// Index of the first extent with data left, if any
    fn next_extent_data(&self) -> Option<usize> {
        let mut index = self.extent;
        let mut offset = self.extent_offset;
        while let Some(extent) = self.extents.get(index) {
            if offset < extent.size as u64 {
                return Some(index);
            }
            index += 1;
            offset = 0;
        }
        None
    }

    /// Move to the next extent with data left; false once all are consumed
    fn advance_extent(&mut self) -> bool {
        let Some(index) = self.next_extent_data() else {
            self.extent = self.extents.len();
            self.extent_offset = 0;
            return false;
        };

        if index != self.extent {
            log::debug!(
                "Advancing to extent {} of {} (block {})",
                index + 1,
                self.extents.len(),
                self.extents[index].block
            );
            self.extent = index;
            self.extent_offset = 0;
        }
        true
    }

    /// Transfer up to `blocks` blocks of the current extent into `buf`,
    /// returning the byte count (short for the final partial block)
    fn transfer(&mut self, buf: &mut [u8], blocks: usize) -> VolumeResult<usize> {
        let extent = self.extents[self.extent];
        let remaining = extent.size as u64 - self.extent_offset;
        let blocks = blocks.min(remaining.div_ceil(BLOCK_SIZE as u64) as usize);

        let block = extent.block as u64 + self.extent_offset / BLOCK_SIZE as u64;
        self.source.seek(SeekFrom::Start(block))?;
        self.source.read(buf, blocks)?;

        let bytes = ((blocks * BLOCK_SIZE) as u64).min(remaining) as usize;
        self.extent_offset += bytes as u64;
        Ok(bytes)
    }

    /// Refill the buffer if it is empty; false at end of file
    fn fill(&mut self) -> VolumeResult<bool> {
        if self.buffered() > 0 {
            return Ok(true);
        }
        if !self.advance_extent() {
            return Ok(false);
        }
        if self.buffer.is_empty() {
            self.buffer = vec![0u8; self.buffer_blocks * BLOCK_SIZE];
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        let result = self.transfer(&mut buffer, self.buffer_blocks);
        self.buffer = buffer;

        self.buffer_len = result?;
        self.buffer_pos = 0;
        Ok(true)
    }

    fn consume(&mut self, count: usize) {
        self.buffer_pos += count;
        self.position += count as u64;
    }

    /// Copy up to `buf.len()` bytes, crossing buffer refills and extent
    /// boundaries; short only at end of file
    pub fn read(&mut self, buf: &mut [u8]) -> VolumeResult<usize> {
        let mut done = 0;
        while done < buf.len() && self.fill()? {
            let count = self.buffered().min(buf.len() - done);
            buf[done..done + count]
                .copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + count]);
            self.consume(count);
            done += count;
        }
        Ok(done)
    }

    /// Read one line into `buf`, without its line break
    ///
    /// Returns the number of bytes stored, or `None` at end of file. Lines
    /// longer than `buf` are truncated and the rest of the line is skipped.
    pub fn read_line(&mut self, buf: &mut [u8]) -> VolumeResult<Option<usize>> {
        let mut len = 0;
        let mut any = false;

        while self.fill()? {
            any = true;
            let chunk = &self.buffer[self.buffer_pos..self.buffer_len];
            let (content, consumed, complete) = match chunk.iter().position(|&b| b == b'\n') {
                Some(end) => (end, end + 1, true),
                None => (chunk.len(), chunk.len(), false),
            };

            let count = content.min(buf.len() - len);
            buf[len..len + count].copy_from_slice(&chunk[..count]);
            len += count;
            self.consume(consumed);

            if complete {
                return Ok(Some(len));
            }
        }

        Ok(any.then_some(len))
    }

    /// Transfer whole blocks straight into `buf`, bypassing the buffer
    ///
    /// Buffered bytes not yet consumed are delivered first. Returns the byte
    /// count, which is exact for the file's final partial block; 0 at end of
    /// file.
    pub fn read_direct(&mut self, buf: &mut [u8], blocks: usize) -> VolumeResult<usize> {
        let capacity = check_buffer(buf, blocks)?;
        let mut done = 0;

        if self.buffered() > 0 {
            let count = self.buffered().min(capacity);
            buf[..count].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + count]);
            self.consume(count);
            done = count;
        }

        while capacity - done >= BLOCK_SIZE && self.advance_extent() {
            let room = (capacity - done) / BLOCK_SIZE;
            let end = done + room * BLOCK_SIZE;
            let bytes = self.transfer(&mut buf[done..end], room)?;
            self.position += bytes as u64;
            done += bytes;
        }

        Ok(done)
    }

    /// Start over from the first extent
    pub fn rewind(&mut self) -> VolumeResult<()> {
        self.extent = 0;
        self.extent_offset = 0;
        self.buffer_pos = 0;
        self.buffer_len = 0;
        self.position = 0;

        if !self.buffer.is_empty() {
            self.fill()?;
        }
        Ok(())
    }

    /// Release the reader's handle on the source
    pub fn close(self) {
        self.source.close();
    }
}

impl io::Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FileReader::read(self, buf).map_err(|e| match e {
            VolumeError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        })
    }
}
