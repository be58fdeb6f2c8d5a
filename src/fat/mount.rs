use log::debug;

use crate::block::BlockOps;

use super::core::{Attributes, DirCursor, FatError, FAT32_MIN_CLUSTERS, SECTOR_SIZE};
use super::layout::{
    self, BOOT_SIGNATURE, BOOT_SIGNATURE_VALUE, BPB_16_FSTYPE, BPB_32_FAT_SIZE, BPB_32_FSINFO,
    BPB_32_FSTYPE, BPB_32_ROOT_CLUST, BPB_32_VOL_LABEL, BPB_CLUSTER_SIZE, BPB_FAT_SIZE_16,
    BPB_NUM_FATS, BPB_ROOT_ENT_CNT, BPB_RSVD_CNT, BPB_SECTOR_SIZE, BPB_TOT_SECT_16,
    BPB_TOT_SECT_32, MBR_PARTITION_SIZE, MBR_PARTITION_TABLE, PART_LBA, PART_SIZE, PART_STATUS,
    PART_TYPE, SFN_ATTR,
};
use super::volume::Volume;
use super::walk;

/// One MBR partition record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Partition {
    pub status: u8,
    pub kind: u8,
    pub lba: u32,
    pub size: u32,
}

/// Extracts the four partition records, or `None` without the boot
/// signature.
pub(crate) fn parse_partitions(mbr: &[u8; SECTOR_SIZE]) -> Option<[Partition; 4]> {
    if layout::load16(&mbr[BOOT_SIGNATURE..]) != BOOT_SIGNATURE_VALUE {
        return None;
    }
    let mut partitions = [Partition {
        status: 0,
        kind: 0,
        lba: 0,
        size: 0,
    }; 4];
    for (i, part) in partitions.iter_mut().enumerate() {
        let base = MBR_PARTITION_TABLE + i * MBR_PARTITION_SIZE;
        part.status = mbr[base + PART_STATUS];
        part.kind = mbr[base + PART_TYPE];
        part.lba = layout::load32(&mbr[base + PART_LBA..]);
        part.size = layout::load32(&mbr[base + PART_SIZE..]);
    }
    Some(partitions)
}

/// Data clusters described by a BPB, zero when the sector is not a
/// plausible FAT header.
fn data_clusters(bpb: &[u8; SECTOR_SIZE]) -> u32 {
    let sector_size = layout::load16(&bpb[BPB_SECTOR_SIZE..]) as u32;
    let cluster_size = bpb[BPB_CLUSTER_SIZE] as u32;
    if sector_size == 0 || cluster_size == 0 {
        return 0;
    }

    let root_entries = layout::load16(&bpb[BPB_ROOT_ENT_CNT..]) as u32;
    let root_sectors = (root_entries * 32 + sector_size - 1) / sector_size;

    let fat_size_16 = layout::load16(&bpb[BPB_FAT_SIZE_16..]) as u32;
    let fat_size = if fat_size_16 != 0 {
        fat_size_16
    } else {
        layout::load32(&bpb[BPB_32_FAT_SIZE..])
    };

    let total_16 = layout::load16(&bpb[BPB_TOT_SECT_16..]) as u32;
    let total = if total_16 != 0 {
        total_16
    } else {
        layout::load32(&bpb[BPB_TOT_SECT_32..])
    };

    let used = layout::load16(&bpb[BPB_RSVD_CNT..]) as u32
        + bpb[BPB_NUM_FATS] as u32 * fat_size
        + root_sectors;
    total.saturating_sub(used) / cluster_size
}

/// Recognizes a FAT32 file system from the first sector of a partition.
///
/// A valid header carries the boot signature and the "FAT" tag in either
/// the FAT32 or the FAT16 type field; the cluster count then separates
/// FAT32 from the smaller variants, which are rejected.
pub(crate) fn is_fat32(bpb: &[u8; SECTOR_SIZE]) -> bool {
    if layout::load16(&bpb[BOOT_SIGNATURE..]) != BOOT_SIGNATURE_VALUE {
        return false;
    }
    if &bpb[BPB_32_FSTYPE..BPB_32_FSTYPE + 3] != b"FAT"
        && &bpb[BPB_16_FSTYPE..BPB_16_FSTYPE + 3] != b"FAT"
    {
        return false;
    }
    if layout::load32(&bpb[BPB_32_ROOT_CLUST..]) < 2 {
        return false;
    }
    data_clusters(bpb) >= FAT32_MIN_CLUSTERS
}

/// Builds a volume record from a validated FAT32 BPB. The drive letter is
/// assigned by the caller.
pub(crate) fn build_volume(disk: usize, partition_lba: u32, bpb: &[u8; SECTOR_SIZE]) -> Volume {
    let fat_size = layout::load32(&bpb[BPB_32_FAT_SIZE..]);
    let fat_lba = partition_lba + layout::load16(&bpb[BPB_RSVD_CNT..]) as u32;

    let mut label = [0u8; 11];
    label.copy_from_slice(&bpb[BPB_32_VOL_LABEL..BPB_32_VOL_LABEL + 11]);

    let mut vol = Volume {
        letter: 0,
        disk,
        sector_size: layout::load16(&bpb[BPB_SECTOR_SIZE..]),
        cluster_size: bpb[BPB_CLUSTER_SIZE],
        total_sectors: layout::load32(&bpb[BPB_TOT_SECT_32..]),
        cluster_count: data_clusters(bpb),
        fat_size,
        info_lba: partition_lba + layout::load16(&bpb[BPB_32_FSINFO..]) as u32,
        fat_lba,
        data_lba: fat_lba + fat_size * bpb[BPB_NUM_FATS] as u32,
        root_cluster: layout::load32(&bpb[BPB_32_ROOT_CLUST..]),
        root_lba: 0,
        label,
        buffer: [0; SECTOR_SIZE],
        buffer_lba: None,
        buffer_dirty: false,
    };
    vol.root_lba = vol.clust_to_sect(vol.root_cluster);
    vol
}

/// Reads the volume-label entry from the root directory.
///
/// The in-root label is authoritative when present. A long-name entry's
/// attribute includes the label bit and is excluded by requiring the full
/// long-name mask to be absent.
pub(crate) async fn read_label<D: BlockOps>(
    dev: &mut D,
    vol: &mut Volume,
) -> Result<Option<[u8; 11]>, FatError<D::Error>> {
    let mut dir = DirCursor::root(vol);
    loop {
        vol.ensure(dev, dir.sector).await?;
        let base = dir.rw_offset as usize;
        let first = vol.buffer[base];

        if first == 0x00 {
            return Ok(None);
        }
        if first != 0xE5 && first != 0x05 {
            let attr = Attributes::from_bits_retain(vol.buffer[base + SFN_ATTR]);
            if attr.contains(Attributes::VOLUME_ID) && !attr.contains(Attributes::LFN) {
                let mut label = [0u8; 11];
                label.copy_from_slice(&vol.buffer[base..base + 11]);
                return Ok(Some(label));
            }
        }
        if !walk::advance_entry(dev, vol, &mut dir).await? {
            return Ok(None);
        }
    }
}

/// Overwrites the in-root volume-label entry, space-padded, and flushes.
pub(crate) async fn write_label<D: BlockOps>(
    dev: &mut D,
    vol: &mut Volume,
    name: &[u8],
) -> Result<(), FatError<D::Error>> {
    let mut dir = DirCursor::root(vol);
    loop {
        vol.ensure(dev, dir.sector).await?;
        let base = dir.rw_offset as usize;
        let first = vol.buffer[base];

        if first == 0x00 {
            return Err(FatError::NotFound);
        }
        if first != 0xE5 && first != 0x05 {
            let attr = Attributes::from_bits_retain(vol.buffer[base + SFN_ATTR]);
            if attr.contains(Attributes::VOLUME_ID) && !attr.contains(Attributes::LFN) {
                for i in 0..11 {
                    vol.buffer[base + i] = *name.get(i).unwrap_or(&b' ');
                }
                vol.buffer_dirty = true;
                vol.flush(dev).await?;
                debug!("{}: volume label rewritten", vol.letter as char);
                return Ok(());
            }
        }
        if !walk::advance_entry(dev, vol, &mut dir).await? {
            return Err(FatError::NotFound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fat32_bpb() -> [u8; SECTOR_SIZE] {
        let mut bpb = [0u8; SECTOR_SIZE];
        layout::store16(&mut bpb[BPB_SECTOR_SIZE..], 512);
        bpb[BPB_CLUSTER_SIZE] = 8;
        layout::store16(&mut bpb[BPB_RSVD_CNT..], 32);
        bpb[BPB_NUM_FATS] = 2;
        layout::store32(&mut bpb[BPB_TOT_SECT_32..], 526_280);
        layout::store32(&mut bpb[BPB_32_FAT_SIZE..], 1024);
        layout::store32(&mut bpb[BPB_32_ROOT_CLUST..], 2);
        layout::store16(&mut bpb[BPB_32_FSINFO..], 1);
        bpb[BPB_32_FSTYPE..BPB_32_FSTYPE + 8].copy_from_slice(b"FAT32   ");
        layout::store16(&mut bpb[BOOT_SIGNATURE..], BOOT_SIGNATURE_VALUE);
        bpb
    }

    #[test]
    fn recognizes_fat32_header() {
        assert!(is_fat32(&fat32_bpb()));
    }

    #[test]
    fn rejects_missing_signature() {
        let mut bpb = fat32_bpb();
        bpb[BOOT_SIGNATURE] = 0;
        assert!(!is_fat32(&bpb));
    }

    #[test]
    fn rejects_missing_fat_tag() {
        let mut bpb = fat32_bpb();
        bpb[BPB_32_FSTYPE..BPB_32_FSTYPE + 3].copy_from_slice(b"NTF");
        assert!(!is_fat32(&bpb));
    }

    #[test]
    fn rejects_fat16_cluster_count() {
        let mut bpb = fat32_bpb();
        // Small enough that the data region holds fewer than 65525
        // clusters.
        layout::store32(&mut bpb[BPB_TOT_SECT_32..], 100_000);
        assert!(!is_fat32(&bpb));
    }

    #[test]
    fn root_entry_sectors_round_up() {
        let mut bpb = fat32_bpb();
        // 512 legacy root entries fill exactly 32 sectors.
        layout::store16(&mut bpb[BPB_ROOT_ENT_CNT..], 512);
        assert_eq!(data_clusters(&bpb), 65_521);
        // One more entry rounds up to a 33rd, partly filled sector.
        layout::store16(&mut bpb[BPB_ROOT_ENT_CNT..], 513);
        assert_eq!(data_clusters(&bpb), 65_520);
    }

    #[test]
    fn volume_geometry_follows_the_bpb() {
        let vol = build_volume(0, 2048, &fat32_bpb());
        assert_eq!(vol.fat_lba, 2080);
        assert_eq!(vol.data_lba, 4128);
        assert_eq!(vol.root_lba, 4128);
        assert_eq!(vol.info_lba, 2049);
        assert_eq!(vol.cluster_size, 8);
        assert_eq!(vol.cluster_count, 65_525);
    }
}
