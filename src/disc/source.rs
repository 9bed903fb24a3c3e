//! Block sources
//!
//! Uniform seek/read access to fixed 2048-byte blocks, whatever holds them: an
//! image file, a descriptor handed over by the caller, an in-memory image or an
//! optical drive (see [`super::device`]).
//!
//! [`VolumeSource`] is the counted handle the rest of the crate passes around. A
//! tree builder and any number of file readers can share one source; the
//! backend is released when the last handle is closed or dropped. Sources are
//! not internally synchronized and stay on the thread that created them.

use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use super::device::{DeviceHandle, DeviceSource};
use super::error::{VolumeError, VolumeResult};

/// Logical block size of every source (ISO 9660 sector)
pub const BLOCK_SIZE: usize = 2048;

/// Seek/read contract implemented by every backend
///
/// Positions and offsets are expressed in blocks.
pub trait BlockIo {
    /// Move to a new block position, returning the position before the move
    fn seek(&mut self, pos: SeekFrom) -> VolumeResult<u64>;

    /// Read exactly `blocks` blocks into the start of `buf`
    fn read(&mut self, buf: &mut [u8], blocks: usize) -> VolumeResult<()>;

    /// Current block position
    fn position(&self) -> u64;
}

/// Block source over any seekable byte stream (image file, duplicated
/// descriptor, in-memory buffer)
pub struct ImageSource<R> {
    inner: R,
    position: u64,
}

impl<R: Read + Seek> ImageSource<R> {
    /// Wrap a stream; the stream is rewound to block 0
    pub fn new(mut inner: R) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, position: 0 })
    }
}

impl<R: Read + Seek> BlockIo for ImageSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> VolumeResult<u64> {
        let previous = self.position;
        let target = match pos {
            SeekFrom::Start(block) => SeekFrom::Start(block * BLOCK_SIZE as u64),
            SeekFrom::Current(delta) => {
                SeekFrom::Start(relative_block(self.position, delta)? * BLOCK_SIZE as u64)
            }
            SeekFrom::End(delta) => SeekFrom::End(delta * BLOCK_SIZE as i64),
        };

        let offset = self.inner.seek(target).map_err(|e| {
            io::Error::new(e.kind(), format!("Failed to seek to {:?}: {}", pos, e))
        })?;
        self.position = offset / BLOCK_SIZE as u64;
        Ok(previous)
    }

    fn read(&mut self, buf: &mut [u8], blocks: usize) -> VolumeResult<()> {
        let length = check_buffer(buf, blocks)?;
        if let Err(e) = self.inner.read_exact(&mut buf[..length]) {
            // A partial read moved the stream; put it back on the reported block
            let offset = self.position * BLOCK_SIZE as u64;
            if let Err(seek_err) = self.inner.seek(SeekFrom::Start(offset)) {
                log::warn!("Failed to restore block {} after short read: {}", self.position, seek_err);
            }
            return Err(io::Error::new(
                e.kind(),
                format!("Failed to read {} blocks at block {}: {}", blocks, self.position, e),
            )
            .into());
        }
        self.position += blocks as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Shared, counted handle to a block source
///
/// Cloning increments the handle count, [`VolumeSource::close`] (or dropping a
/// handle) decrements it.
#[derive(Clone)]
pub struct VolumeSource {
    inner: Rc<RefCell<Box<dyn BlockIo>>>,
}

impl VolumeSource {
    /// Wrap any backend
    pub fn new<B: BlockIo + 'static>(backend: B) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Box::new(backend))),
        }
    }

    /// Open an image file
    pub fn open_file(path: &Path) -> VolumeResult<Self> {
        let file = File::open(path).map_err(|e| {
            io::Error::new(e.kind(), format!("Failed to open {}: {}", path.display(), e))
        })?;
        log::debug!("Opened block source on file {}", path.display());
        Ok(Self::new(ImageSource::new(BufReader::new(file))?))
    }

    /// Open a source over a caller-owned descriptor
    ///
    /// The descriptor is duplicated, so closing the source never closes the
    /// caller's handle.
    #[cfg(unix)]
    pub fn open_fd(fd: std::os::fd::BorrowedFd<'_>) -> VolumeResult<Self> {
        let owned = fd.try_clone_to_owned()?;
        Ok(Self::new(ImageSource::new(File::from(owned))?))
    }

    /// Open a source over an already-opened optical drive
    pub fn open_device<D: DeviceHandle + 'static>(handle: D) -> VolumeResult<Self> {
        Ok(Self::new(DeviceSource::new(handle)?))
    }

    /// Open a source over any seekable stream, e.g. an in-memory image
    pub fn from_reader<R: Read + Seek + 'static>(reader: R) -> VolumeResult<Self> {
        Ok(Self::new(ImageSource::new(reader)?))
    }

    /// Seek in blocks, returning the previous block position
    pub fn seek(&self, pos: SeekFrom) -> VolumeResult<u64> {
        self.inner.borrow_mut().seek(pos)
    }

    /// Read `blocks` whole blocks at the current position
    pub fn read(&self, buf: &mut [u8], blocks: usize) -> VolumeResult<()> {
        self.inner.borrow_mut().read(buf, blocks)
    }

    /// Seek to `block` and read one block
    pub fn read_block(&self, block: u64, buf: &mut [u8]) -> VolumeResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.seek(SeekFrom::Start(block))?;
        inner.read(buf, 1)
    }

    /// Current block position
    pub fn position(&self) -> u64 {
        self.inner.borrow().position()
    }

    /// Number of live handles on this source
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Release this handle; the backend closes with the last one
    pub fn close(self) {
        log::trace!("Closing block source handle ({} live)", self.handle_count());
    }
}

impl fmt::Debug for VolumeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeSource")
            .field("position", &self.position())
            .field("handles", &self.handle_count())
            .finish()
    }
}

/// Byte length of a `blocks`-block transfer, checked against `buf`
pub(crate) fn check_buffer(buf: &[u8], blocks: usize) -> VolumeResult<usize> {
    let length = blocks * BLOCK_SIZE;
    if buf.len() < length {
        return Err(VolumeError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Buffer of {} bytes cannot hold {} blocks", buf.len(), blocks),
        )));
    }
    Ok(length)
}

/// Resolve a relative block seek
pub(crate) fn relative_block(position: u64, delta: i64) -> VolumeResult<u64> {
    position.checked_add_signed(delta).ok_or_else(|| {
        VolumeError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Seek by {} blocks from block {} is out of range", delta, position),
        ))
    })
}
