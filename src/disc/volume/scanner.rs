//! Directory extent scanner
//!
//! [`DirectoryScanner`] is a pure state machine over the blocks of one
//! directory extent: it is fed blocks and hands out complete records. Records
//! never touch the source, which keeps the transitions testable on plain
//! buffers; [`read_directory`] drives it against a [`VolumeSource`].
//!
//! ECMA-119 forbids records crossing a block boundary but real discs have
//! them, so a record whose length runs past the end of its block is
//! reassembled from the tail of that block and the head of the next one.

use crate::disc::error::{VolumeError, VolumeResult};
use crate::disc::source::{VolumeSource, BLOCK_SIZE};

use super::record::{blocks_for, DirectoryRecord};

/// Next step of a scan
#[derive(Debug, PartialEq, Eq)]
pub enum Scan {
    /// Raw bytes of one complete record
    Record(Vec<u8>),
    /// The scanner needs this block fed before it can continue
    NeedBlock(u64),
    /// Every block of the extent has been consumed
    End,
}

/// Scanner state over one directory extent
#[derive(Debug)]
pub struct DirectoryScanner {
    block: Vec<u8>,
    offset: usize,
    next_block: u64,
    blocks_left: u64,
    /// Tail of a record that continues in the next block
    pending: Option<Vec<u8>>,
    /// Reassembled record waiting to be handed out
    ready: Option<Vec<u8>>,
}

impl DirectoryScanner {
    /// Scanner over the extent at `address` holding `size` bytes
    pub fn new(address: u32, size: u32) -> Self {
        Self {
            block: Vec::new(),
            offset: 0,
            next_block: address as u64,
            blocks_left: blocks_for(size as u64).max(1),
            pending: None,
            ready: None,
        }
    }

    /// Blocks of the extent not yet fed
    pub fn blocks_left(&self) -> u64 {
        self.blocks_left
    }

    pub fn next_record(&mut self) -> VolumeResult<Scan> {
        if let Some(record) = self.ready.take() {
            return Ok(Scan::Record(record));
        }

        // A zero length byte pads out the rest of the block
        if self.offset >= self.block.len() || self.block[self.offset] == 0 {
            return Ok(self.block_exhausted());
        }

        let len = self.block[self.offset] as usize;
        let available = self.block.len() - self.offset;
        if len <= available {
            let record = self.block[self.offset..self.offset + len].to_vec();
            self.offset += len;
            return Ok(Scan::Record(record));
        }

        if self.blocks_left == 0 {
            return Err(VolumeError::format(format!(
                "Directory record of {} bytes at offset {} runs past the end of the extent",
                len, self.offset
            )));
        }

        log::debug!(
            "Directory record of {} bytes crosses into block {}, reassembling",
            len,
            self.next_block
        );
        self.pending = Some(self.block[self.offset..].to_vec());
        self.offset = self.block.len();
        Ok(Scan::NeedBlock(self.next_block))
    }

    fn block_exhausted(&self) -> Scan {
        if self.blocks_left == 0 {
            Scan::End
        } else {
            Scan::NeedBlock(self.next_block)
        }
    }

    /// Supply the block requested by [`Scan::NeedBlock`]
    pub fn feed(&mut self, block: &[u8]) -> VolumeResult<()> {
        if self.blocks_left == 0 {
            return Err(VolumeError::format("Fed a block past the end of the directory extent"));
        }
        let block = block.get(..BLOCK_SIZE).ok_or_else(|| {
            VolumeError::format(format!("Directory block of {} bytes is short", block.len()))
        })?;

        self.block.clear();
        self.block.extend_from_slice(block);
        self.next_block += 1;
        self.blocks_left -= 1;
        self.offset = 0;

        if let Some(mut record) = self.pending.take() {
            let missing = record[0] as usize - record.len();
            record.extend_from_slice(&self.block[..missing]);
            self.offset = missing;
            self.ready = Some(record);
        }
        Ok(())
    }
}

/// Read every record of a directory extent, in on-disk order
pub fn read_directory(
    source: &VolumeSource,
    address: u32,
    size: u32,
) -> VolumeResult<Vec<DirectoryRecord>> {
    let mut scanner = DirectoryScanner::new(address, size);
    let mut block = [0u8; BLOCK_SIZE];
    let mut records = Vec::new();

    loop {
        match scanner.next_record()? {
            Scan::Record(bytes) => records.push(DirectoryRecord::parse(&bytes)?),
            Scan::NeedBlock(number) => {
                source.read_block(number, &mut block)?;
                scanner.feed(&block)?;
            }
            Scan::End => break,
        }
    }

    Ok(records)
}
