use crate::block::BlockOps;

use super::core::{FatError, SECTOR_SIZE};

/// One mounted FAT32 partition.
///
/// Besides the BPB-derived geometry the record owns the volume's sector
/// cache: a single sector of raw bytes, the address it mirrors and a dirty
/// flag. Every metadata and data access of the driver goes through
/// [`Volume::ensure`], which keeps exactly one sector resident and writes
/// a dirty sector back before loading another.
pub(crate) struct Volume {
    pub letter: u8,
    pub disk: usize,
    pub sector_size: u16,
    /// Sectors per cluster.
    pub cluster_size: u8,
    pub total_sectors: u32,
    /// Data clusters on the volume, not counting the two reserved entries.
    pub cluster_count: u32,
    /// Sectors per FAT copy.
    pub fat_size: u32,
    pub info_lba: u32,
    pub fat_lba: u32,
    pub data_lba: u32,
    pub root_cluster: u32,
    pub root_lba: u32,
    /// Space-padded label, refreshed from the root directory when present.
    pub label: [u8; 11],
    pub buffer: [u8; SECTOR_SIZE],
    /// Address mirrored by `buffer`, `None` while the cache is invalid.
    pub buffer_lba: Option<u32>,
    pub buffer_dirty: bool,
}

impl Volume {
    /// Makes the cache mirror `lba`.
    ///
    /// A hit returns immediately. On a miss any dirty sector is written
    /// back first, then the requested sector is read. If the read fails
    /// the cache is left invalid so the next call refetches.
    pub async fn ensure<D: BlockOps>(
        &mut self,
        dev: &mut D,
        lba: u32,
    ) -> Result<(), FatError<D::Error>> {
        if self.buffer_lba == Some(lba) {
            return Ok(());
        }
        self.flush(dev).await?;
        self.buffer_lba = None;
        dev.read(&mut self.buffer, lba, 1)
            .await
            .map_err(FatError::Device)?;
        self.buffer_lba = Some(lba);
        Ok(())
    }

    /// Writes the cached sector back if it is dirty.
    pub async fn flush<D: BlockOps>(&mut self, dev: &mut D) -> Result<(), FatError<D::Error>> {
        if self.buffer_dirty {
            if let Some(lba) = self.buffer_lba {
                dev.write(&self.buffer, lba, 1)
                    .await
                    .map_err(FatError::Device)?;
            }
            self.buffer_dirty = false;
        }
        Ok(())
    }

    /// First sector of a data cluster. Valid clusters start at 2.
    pub fn clust_to_sect(&self, cluster: u32) -> u32 {
        (cluster - 2) * self.cluster_size as u32 + self.data_lba
    }

    /// Cluster containing a data-region sector.
    pub fn sect_to_clust(&self, sector: u32) -> u32 {
        (sector - self.data_lba) / self.cluster_size as u32 + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_volume() -> Volume {
        Volume {
            letter: b'C',
            disk: 0,
            sector_size: 512,
            cluster_size: 8,
            total_sectors: 526_280,
            cluster_count: 65_525,
            fat_size: 1024,
            info_lba: 2049,
            fat_lba: 2080,
            data_lba: 4128,
            root_cluster: 2,
            root_lba: 4128,
            label: [b' '; 11],
            buffer: [0; SECTOR_SIZE],
            buffer_lba: None,
            buffer_dirty: false,
        }
    }

    #[test]
    fn geometry_round_trips() {
        let vol = test_volume();
        for cluster in [2, 3, 127, 65_526] {
            assert_eq!(vol.sect_to_clust(vol.clust_to_sect(cluster)), cluster);
        }
    }

    #[test]
    fn root_cluster_maps_to_data_start() {
        let vol = test_volume();
        assert_eq!(vol.clust_to_sect(2), vol.data_lba);
        assert_eq!(vol.clust_to_sect(3), vol.data_lba + 8);
    }
}
