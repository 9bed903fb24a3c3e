//! Optical drive block source
//!
//! The drive itself is opened by the caller (device enumeration is not our
//! business) and handed over as a [`DeviceHandle`], a thin MMC-style command
//! set. On open we ask the drive whether the Random Readable feature is
//! current: if so every read goes through READ(10), otherwise through READ CD.
//!
//! READ CD needs the expected sector type. We start with "any"; some drives
//! reject that on data tracks with an illegal-mode-for-track status, in which
//! case each data sector type is tried once, in order, and the first one the
//! drive accepts is kept for the rest of the source's life.

use std::fmt;
use std::io::SeekFrom;

use super::error::{VolumeError, VolumeResult};
use super::source::{check_buffer, relative_block, BlockIo, BLOCK_SIZE};

/// MMC feature codes the source queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Feature {
    /// Random Readable (0x0010): READ(10) works on the current medium
    RandomReadable = 0x0010,
}

/// Expected sector type field of READ CD
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SectorType {
    Any = 0,
    Cdda = 1,
    Mode1 = 2,
    Mode2Formless = 3,
    Mode2Form1 = 4,
    Mode2Form2 = 5,
}

impl SectorType {
    /// Data sector types probed, in order, after an illegal track mode status
    pub const DATA_MODES: [SectorType; 4] = [
        SectorType::Mode1,
        SectorType::Mode2Formless,
        SectorType::Mode2Form1,
        SectorType::Mode2Form2,
    ];
}

/// Failure status of a device command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The requested sector type does not match the track (ILLEGAL MODE FOR
    /// THIS TRACK)
    IllegalTrackMode,
    /// Any other failure, with the device or OS message
    Command(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalTrackMode => write!(f, "illegal mode for this track"),
            Self::Command(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<DeviceError> for VolumeError {
    fn from(e: DeviceError) -> Self {
        VolumeError::Device(e.to_string())
    }
}

/// Commands an opened optical drive must answer
pub trait DeviceHandle {
    /// GET CONFIGURATION: whether `feature` is reported current
    fn feature_is_current(&mut self, feature: Feature) -> Result<bool, DeviceError>;

    /// READ(10) of `count` 2048-byte blocks
    fn read10(&mut self, block: u32, count: u16, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// READ CD of `count` blocks, returning user data only
    fn read_cd(
        &mut self,
        block: u32,
        count: u32,
        sector_type: SectorType,
        buf: &mut [u8],
    ) -> Result<(), DeviceError>;

    /// Capacity of the medium in blocks
    fn capacity(&mut self) -> Result<u64, DeviceError>;
}

/// How blocks are fetched from the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCommand {
    /// READ(10)
    Range,
    /// READ CD with the given expected sector type
    Track(SectorType),
}

/// Block source over an optical drive
pub struct DeviceSource<D> {
    handle: D,
    position: u64,
    command: ReadCommand,
    /// Set once sector types have been probed; never probe twice
    probed: bool,
}

impl<D: DeviceHandle> DeviceSource<D> {
    /// Query the drive's features and pick the read command
    pub fn new(mut handle: D) -> VolumeResult<Self> {
        let command = match handle.feature_is_current(Feature::RandomReadable) {
            Ok(true) => ReadCommand::Range,
            Ok(false) => ReadCommand::Track(SectorType::Any),
            Err(e) => {
                log::warn!("GET CONFIGURATION failed ({}), falling back to READ CD", e);
                ReadCommand::Track(SectorType::Any)
            }
        };
        log::info!("Device source will read with {:?}", command);

        Ok(Self {
            handle,
            position: 0,
            command,
            probed: false,
        })
    }

    /// Read command currently in use
    pub fn command(&self) -> ReadCommand {
        self.command
    }

    /// Give back the device handle
    pub fn into_inner(self) -> D {
        self.handle
    }

    fn read_track(
        &mut self,
        block: u32,
        blocks: usize,
        sector_type: SectorType,
        buf: &mut [u8],
    ) -> VolumeResult<()> {
        match self.handle.read_cd(block, blocks as u32, sector_type, buf) {
            Ok(()) => Ok(()),
            Err(DeviceError::IllegalTrackMode) if !self.probed => {
                log::warn!(
                    "Wrong track mode at block {}, probing data sector types",
                    block
                );
                self.probe_sector_type(block, blocks, buf)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn probe_sector_type(&mut self, block: u32, blocks: usize, buf: &mut [u8]) -> VolumeResult<()> {
        self.probed = true;

        for sector_type in SectorType::DATA_MODES {
            match self.handle.read_cd(block, blocks as u32, sector_type, buf) {
                Ok(()) => {
                    log::info!("Drive accepted sector type {:?}", sector_type);
                    self.command = ReadCommand::Track(sector_type);
                    return Ok(());
                }
                Err(DeviceError::IllegalTrackMode) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(VolumeError::Device(format!(
            "No data sector type accepted at block {}",
            block
        )))
    }
}

impl<D: DeviceHandle> BlockIo for DeviceSource<D> {
    fn seek(&mut self, pos: SeekFrom) -> VolumeResult<u64> {
        let previous = self.position;
        self.position = match pos {
            SeekFrom::Start(block) => block,
            SeekFrom::Current(delta) => relative_block(self.position, delta)?,
            SeekFrom::End(delta) => relative_block(self.handle.capacity()?, delta)?,
        };
        Ok(previous)
    }

    fn read(&mut self, buf: &mut [u8], blocks: usize) -> VolumeResult<()> {
        let length = check_buffer(buf, blocks)?;
        let block = u32::try_from(self.position).map_err(|_| {
            VolumeError::Device(format!("Block {} is beyond the drive's addressing", self.position))
        })?;

        match self.command {
            ReadCommand::Range => {
                let count = u16::try_from(blocks).map_err(|_| {
                    VolumeError::Device(format!("Cannot read {} blocks in one command", blocks))
                })?;
                self.handle.read10(block, count, &mut buf[..length])?;
            }
            ReadCommand::Track(sector_type) => {
                self.read_track(block, blocks, sector_type, &mut buf[..length])?
            }
        }

        self.position += blocks as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}
