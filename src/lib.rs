//! Read-mostly FAT32 driver for sector-addressed block devices.
//!
//! A [`VolumeManager`] discovers FAT32 partitions through the MBR, mounts
//! each one as a lettered volume, and exposes directory enumeration, file
//! reads and a small set of metadata writers (volume label, cluster
//! allocation) on top of a per-volume single-sector write-back cache.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod fat;
pub mod manager;

pub use block::BlockOps;
pub use fat::{Attributes, EntryInfo, FatError, NAME_MAX, SECTOR_SIZE};
pub use manager::{DirHandle, DiskId, FileHandle, VolumeInfo, VolumeManager};
