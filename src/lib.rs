//! disc-verify library
//!
//! ISO 9660 / Rock Ridge volume reading over disc images, file descriptors
//! and optical drives, plus checksum manifest verification on top of it.

pub mod checksum;
pub mod config;
pub mod disc;
