//! Disc volume handling
//!
//! Block sources over image files, descriptors and optical drives, and the
//! ISO 9660 / Rock Ridge parser reading volumes from them.

pub mod device;
pub mod error;
pub mod iso9660;
pub mod source;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_image;

pub use device::{DeviceError, DeviceHandle, DeviceSource, Feature, SectorType};
pub use error::{VolumeError, VolumeResult};
pub use iso9660::PrimaryVolumeDescriptor;
pub use source::{BlockIo, ImageSource, VolumeSource, BLOCK_SIZE};
pub use volume::{FileReader, Iso9660Volume, VolumeContents, VolumeFile, VolumeTree};
