//! Disk registry, mounted-volume list and the public file system
//! operations.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, warn};

use crate::block::BlockOps;
use crate::fat::{
    self, dir, mount, path, table, walk, DirCursor, EntryInfo, FatError, FileCursor, Volume,
    CLUSTER_MASK, SECTOR_SIZE,
};

/// Handle to a disk registered by [`VolumeManager::mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskId(usize);

/// Listing record for one mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub letter: char,
    pub label: [u8; 11],
    pub disk: DiskId,
}

/// Cursor over the entries of an open directory.
#[derive(Debug, Clone, Copy)]
pub struct DirHandle {
    letter: u8,
    cursor: DirCursor,
}

impl DirHandle {
    pub fn letter(&self) -> char {
        self.letter as char
    }
}

/// Cursor over the bytes of an open file.
#[derive(Debug, Clone, Copy)]
pub struct FileHandle {
    letter: u8,
    cursor: FileCursor,
}

impl FileHandle {
    pub fn letter(&self) -> char {
        self.letter as char
    }

    /// File size recorded in the directory entry.
    pub fn size(&self) -> u32 {
        self.cursor.size
    }

    /// Current offset from the start of the file.
    pub fn position(&self) -> u32 {
        self.cursor.glob_offset
    }
}

/// Mounts disks and drives every volume operation.
///
/// Volumes get drive letters from `C` upward, lowest free letter first;
/// paths take the `X:/a/b/c` form. All operations run on the caller's
/// context and block only on the device transfers themselves.
pub struct VolumeManager<D: BlockOps> {
    disks: Vec<Option<D>>,
    volumes: Vec<Box<Volume>>,
    letter_bitmask: u32,
}

impl<D: BlockOps> VolumeManager<D> {
    pub fn new() -> Self {
        Self {
            disks: Vec::new(),
            volumes: Vec::new(),
            letter_bitmask: 0,
        }
    }

    /// Registers a disk and mounts every FAT32 partition found in its
    /// partition table.
    ///
    /// Partitions holding other file systems are skipped; a disk whose
    /// MBR does not validate registers no volumes and is rejected.
    pub async fn mount(&mut self, mut dev: D) -> Result<DiskId, FatError<D::Error>> {
        if !dev.status() {
            return Err(FatError::NoMedia);
        }
        dev.initialize().await.map_err(FatError::Device)?;

        let mut sector = [0u8; SECTOR_SIZE];
        dev.read(&mut sector, 0, 1).await.map_err(FatError::Device)?;
        let partitions = mount::parse_partitions(&sector).ok_or(FatError::InvalidMbr)?;

        let disk = self
            .disks
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| {
                self.disks.push(None);
                self.disks.len() - 1
            });

        for (index, part) in partitions.iter().enumerate() {
            if part.lba == 0 {
                continue;
            }
            debug!(
                "partition {}: status {:#04x}, type {:#04x}, lba {}, {} sectors",
                index, part.status, part.kind, part.lba, part.size
            );
            dev.read(&mut sector, part.lba, 1)
                .await
                .map_err(FatError::Device)?;
            if !mount::is_fat32(&sector) {
                debug!("partition {} holds no FAT32 file system, skipped", index);
                continue;
            }
            if fat::layout::load16(&sector[fat::layout::BPB_SECTOR_SIZE..]) != SECTOR_SIZE as u16 {
                warn!("partition {} uses an unsupported sector size, skipped", index);
                continue;
            }
            let Some(letter) = self.claim_letter() else {
                warn!("partition {} left unmounted, drive letters exhausted", index);
                continue;
            };

            let mut vol = Box::new(mount::build_volume(disk, part.lba, &sector));
            vol.letter = letter;

            // The in-root label wins over the BPB copy when present. A
            // failure here leaves the BPB label in place.
            match mount::read_label(&mut dev, &mut vol).await {
                Ok(Some(label)) => vol.label = label,
                Ok(None) => {}
                Err(_) => warn!("{}: root label scan failed", letter as char),
            }

            debug!(
                "mounted {}: at {}, {} sectors, {} sectors/cluster, {} sectors/FAT",
                letter as char, part.lba, vol.total_sectors, vol.cluster_size, vol.fat_size
            );
            self.volumes.push(vol);
        }

        self.disks[disk] = Some(dev);
        Ok(DiskId(disk))
    }

    /// Flushes and removes every volume of `id`, frees their letters and
    /// hands the device back.
    pub async fn eject(&mut self, id: DiskId) -> Result<D, FatError<D::Error>> {
        {
            let Self { disks, volumes, .. } = self;
            let dev = disks
                .get_mut(id.0)
                .and_then(Option::as_mut)
                .ok_or(FatError::UnknownDisk)?;
            for vol in volumes.iter_mut() {
                if vol.disk == id.0 {
                    vol.flush(dev).await?;
                }
            }
        }

        let mut index = 0;
        while index < self.volumes.len() {
            if self.volumes[index].disk == id.0 {
                let vol = self.volumes.remove(index);
                self.letter_bitmask &= !(1u32 << (vol.letter - b'C'));
                debug!("ejected {}:", vol.letter as char);
            } else {
                index += 1;
            }
        }

        match self.disks[id.0].take() {
            Some(dev) => Ok(dev),
            None => Err(FatError::UnknownDisk),
        }
    }

    /// Lists the mounted volumes in mount order.
    pub fn volumes(&self) -> impl Iterator<Item = VolumeInfo> + '_ {
        self.volumes.iter().map(|vol| VolumeInfo {
            letter: vol.letter as char,
            label: vol.label,
            disk: DiskId(vol.disk),
        })
    }

    /// Re-reads the label from the volume's root directory. Falls back to
    /// the label carried in the BPB when the root holds no label entry.
    pub async fn read_volume_label(&mut self, letter: char) -> Result<[u8; 11], FatError<D::Error>> {
        let (vol, dev) = self.parts(letter as u8)?;
        match mount::read_label(dev, vol).await? {
            Some(label) => {
                vol.label = label;
                Ok(label)
            }
            None => Ok(vol.label),
        }
    }

    /// Rewrites the volume's in-root label entry, space-padded to eleven
    /// bytes.
    pub async fn set_volume_label(
        &mut self,
        letter: char,
        name: &[u8],
    ) -> Result<(), FatError<D::Error>> {
        let (vol, dev) = self.parts(letter as u8)?;
        mount::write_label(dev, vol, name).await?;
        for i in 0..11 {
            vol.label[i] = *name.get(i).unwrap_or(&b' ');
        }
        Ok(())
    }

    /// Reserves one free cluster on the volume and marks it end-of-chain.
    pub async fn allocate_cluster(&mut self, letter: char) -> Result<u32, FatError<D::Error>> {
        let (vol, dev) = self.parts(letter as u8)?;
        table::allocate(dev, vol).await
    }

    /// Opens the directory named by `path`. When the final fragment names
    /// a file the handle points at its parent directory.
    pub async fn open_dir(&mut self, path: &str) -> Result<DirHandle, FatError<D::Error>> {
        let (letter, rel, vol, dev) = self.resolve_prefix(path)?;
        let resolved = path::follow(dev, vol, rel).await?;
        Ok(DirHandle {
            letter,
            cursor: resolved.cursor,
        })
    }

    /// Decodes the next entry of an open directory, `Ok(None)` at the
    /// end.
    pub async fn read_dir(
        &mut self,
        dir: &mut DirHandle,
    ) -> Result<Option<EntryInfo>, FatError<D::Error>> {
        let (vol, dev) = self.parts(dir.letter)?;
        dir::read_entry(dev, vol, &mut dir.cursor).await
    }

    /// Releases a directory handle, flushing the volume cache.
    pub async fn close_dir(&mut self, dir: DirHandle) -> Result<(), FatError<D::Error>> {
        let (vol, dev) = self.parts(dir.letter)?;
        vol.flush(dev).await
    }

    /// Opens the file named by `path`. The final path fragment must carry
    /// a dot; it is looked up in the parent directory reached by descent.
    pub async fn open_file(&mut self, path: &str) -> Result<FileHandle, FatError<D::Error>> {
        let (letter, rel, vol, dev) = self.resolve_prefix(path)?;
        let resolved = path::follow(dev, vol, rel).await?;
        let fragment = resolved.file_fragment.ok_or(FatError::InvalidPath)?;

        let mut cursor = resolved.cursor;
        let hit = dir::search(dev, vol, &mut cursor, fragment).await?;

        Ok(FileHandle {
            letter,
            cursor: FileCursor {
                first_cluster: hit.first_cluster,
                cluster: cursor.cluster,
                sector: cursor.sector,
                rw_offset: 0,
                glob_offset: 0,
                size: hit.size,
            },
        })
    }

    /// Copies bytes from the file into `buf`, stopping at the end of the
    /// file. Returns the number of bytes read.
    pub async fn read(
        &mut self,
        file: &mut FileHandle,
        buf: &mut [u8],
    ) -> Result<usize, FatError<D::Error>> {
        let (vol, dev) = self.parts(file.letter)?;
        let cursor = &mut file.cursor;
        let mut copied = 0usize;

        while copied < buf.len() && cursor.glob_offset < cursor.size {
            if cursor.cluster < 2 {
                return Err(FatError::EndOfChain);
            }
            if cursor.rw_offset >= vol.sector_size as u32 {
                if !walk::resolve_file(dev, vol, cursor).await? {
                    // The entry promised more data than the chain holds.
                    return Err(FatError::EndOfChain);
                }
            }
            vol.ensure(dev, cursor.sector).await?;

            let take = (buf.len() - copied)
                .min((vol.sector_size as u32 - cursor.rw_offset) as usize)
                .min((cursor.size - cursor.glob_offset) as usize);
            let base = cursor.rw_offset as usize;
            buf[copied..copied + take].copy_from_slice(&vol.buffer[base..base + take]);

            copied += take;
            cursor.rw_offset += take as u32;
            cursor.glob_offset += take as u32;
        }
        Ok(copied)
    }

    /// Repositions the file cursor at `offset` bytes from the start,
    /// following the cluster chain. Offsets beyond the file size are
    /// rejected; an offset equal to the size parks the cursor at
    /// end-of-file.
    pub async fn seek(
        &mut self,
        file: &mut FileHandle,
        offset: u32,
    ) -> Result<(), FatError<D::Error>> {
        let (vol, dev) = self.parts(file.letter)?;
        let cursor = &mut file.cursor;

        if offset > cursor.size {
            return Err(FatError::SeekPastEnd);
        }
        if cursor.first_cluster < 2 {
            // Zero-length file: only the end-of-file position exists.
            if offset == 0 {
                cursor.glob_offset = 0;
                cursor.rw_offset = 0;
                return Ok(());
            }
            return Err(FatError::EndOfChain);
        }

        let sector_size = vol.sector_size as u32;
        let sectors_in = offset / sector_size;
        let mut hops = sectors_in / vol.cluster_size as u32;
        let sector_in_cluster = sectors_in % vol.cluster_size as u32;

        let mut cluster = cursor.first_cluster;
        while hops > 0 {
            let entry = table::get(dev, vol, cluster).await?;
            if table::is_eoc(entry) {
                if offset == cursor.size {
                    // Exactly at the end on a cluster boundary.
                    cursor.glob_offset = offset;
                    cursor.rw_offset = 0;
                    return Ok(());
                }
                return Err(FatError::EndOfChain);
            }
            cluster = entry & CLUSTER_MASK;
            hops -= 1;
        }

        cursor.cluster = cluster;
        cursor.sector = vol.clust_to_sect(cluster) + sector_in_cluster;
        cursor.rw_offset = offset % sector_size;
        cursor.glob_offset = offset;
        Ok(())
    }

    /// Releases a file handle, flushing the volume cache.
    pub async fn close_file(&mut self, file: FileHandle) -> Result<(), FatError<D::Error>> {
        let (vol, dev) = self.parts(file.letter)?;
        vol.flush(dev).await
    }

    fn claim_letter(&mut self) -> Option<u8> {
        for bit in 0..32u8 {
            if self.letter_bitmask & (1u32 << bit) == 0 {
                self.letter_bitmask |= 1u32 << bit;
                return Some(b'C' + bit);
            }
        }
        None
    }

    /// Splits the `X:/` prefix off a path and borrows the matching volume
    /// together with its device. The volume lookup happens before the
    /// separator check, so an unknown letter reports `NoVolume` even for
    /// otherwise malformed paths.
    fn resolve_prefix<'a, 'p>(
        &'a mut self,
        path: &'p str,
    ) -> Result<(u8, &'p [u8], &'a mut Volume, &'a mut D), FatError<D::Error>> {
        let bytes = path.as_bytes();
        let &letter = bytes.first().ok_or(FatError::InvalidPath)?;
        let (vol, dev) = self.parts(letter)?;
        if bytes.get(1) != Some(&b':') || bytes.get(2) != Some(&b'/') {
            return Err(FatError::InvalidPath);
        }
        Ok((letter, &bytes[2..], vol, dev))
    }

    fn parts(&mut self, letter: u8) -> Result<(&mut Volume, &mut D), FatError<D::Error>> {
        let index = self
            .volumes
            .iter()
            .position(|vol| vol.letter == letter)
            .ok_or(FatError::NoVolume(letter as char))?;
        let Self { disks, volumes, .. } = self;
        let vol = &mut *volumes[index];
        let dev = disks
            .get_mut(vol.disk)
            .and_then(Option::as_mut)
            .ok_or(FatError::NoVolume(letter as char))?;
        Ok((vol, dev))
    }

    #[cfg(test)]
    pub(crate) fn volume_by_letter(&self, letter: char) -> Option<&Volume> {
        self.volumes
            .iter()
            .map(|vol| &**vol)
            .find(|vol| vol.letter == letter as u8)
    }
}

impl<D: BlockOps> Default for VolumeManager<D> {
    fn default() -> Self {
        Self::new()
    }
}
