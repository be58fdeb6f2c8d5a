use log::warn;

use crate::block::BlockOps;

use super::core::{Attributes, DirCursor, EntryInfo, FatError, DIR_ENTRY_SIZE, NAME_MAX};
use super::layout::{
    self, LFN_CRC, LFN_NAME_OFFSETS, LFN_SEQ_MASK, SFN_ADATE, SFN_ATTR, SFN_CDATE, SFN_CLUSTH,
    SFN_CLUSTL, SFN_CTIME, SFN_CTIME_TH, SFN_FILE_SIZE, SFN_WDATE, SFN_WTIME,
};
use super::names;
use super::volume::Volume;
use super::walk;

/// Location of an entry found by [`search`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchHit {
    pub first_cluster: u32,
    pub size: u32,
}

/// Scans the directory under `dir` for `name`, matching long-name chains
/// when one precedes the anchor and falling back to the 8.3 name
/// otherwise. On a hit the cursor is repositioned to the start of the
/// found entry's own chain.
///
/// A chain whose checksum does not bind to its anchor is treated as a
/// non-match and the scan continues.
pub(crate) async fn search<D: BlockOps>(
    dev: &mut D,
    vol: &mut Volume,
    dir: &mut DirCursor,
    name: &[u8],
) -> Result<SearchHit, FatError<D::Error>> {
    // A cursor seeded from an entry without a first cluster has no chain
    // to scan.
    if dir.start_sector < vol.data_lba {
        return Err(FatError::NotFound);
    }
    // Rewind a cursor that has moved off the chain start.
    if dir.terminal || dir.sector != dir.start_sector {
        dir.sector = dir.start_sector;
        dir.cluster = vol.sect_to_clust(dir.start_sector);
        dir.rw_offset = 0;
        dir.terminal = false;
    }

    let mut lfn_crc: u8 = 0;
    let mut lfn_match = true;

    loop {
        vol.ensure(dev, dir.sector).await?;
        let base = dir.rw_offset as usize;
        let first = vol.buffer[base];

        if first == 0x00 {
            return Err(FatError::NotFound);
        }
        if first == 0x05 || first == 0xE5 {
            lfn_crc = 0;
            lfn_match = true;
        } else {
            let attr = Attributes::from_bits_retain(vol.buffer[base + SFN_ATTR]);
            if attr.contains(Attributes::LFN) {
                if !names::lfn_compare(&vol.buffer[base..base + DIR_ENTRY_SIZE], name) {
                    lfn_match = false;
                }
                lfn_crc = vol.buffer[base + LFN_CRC];
            } else if attr.contains(Attributes::VOLUME_ID) {
                lfn_crc = 0;
                lfn_match = true;
            } else {
                let matched = if lfn_crc != 0 {
                    lfn_match && lfn_crc == names::sfn_checksum(&vol.buffer[base..base + 11])
                } else {
                    names::sfn_compare(&vol.buffer[base..base + 11], name)
                };

                if matched {
                    let high = layout::load16(&vol.buffer[base + SFN_CLUSTH..]) as u32;
                    let low = layout::load16(&vol.buffer[base + SFN_CLUSTL..]) as u32;
                    let first_cluster = (high << 16) | low;
                    let size = layout::load32(&vol.buffer[base + SFN_FILE_SIZE..]);

                    dir.cluster = first_cluster;
                    dir.sector = if first_cluster >= 2 {
                        vol.clust_to_sect(first_cluster)
                    } else {
                        0
                    };
                    dir.start_sector = dir.sector;
                    dir.rw_offset = 0;
                    return Ok(SearchHit { first_cluster, size });
                }
                lfn_crc = 0;
                lfn_match = true;
            }
        }

        if !walk::advance_entry(dev, vol, dir).await? {
            return Err(FatError::NotFound);
        }
    }
}

/// Decodes the next logical entry under `dir`, accumulating long-name
/// fragments into the name buffer until the anchoring short-name entry is
/// reached. Returns `Ok(None)` at the end of the directory and
/// `BadChecksum` when a chain does not bind to its anchor.
pub(crate) async fn read_entry<D: BlockOps>(
    dev: &mut D,
    vol: &mut Volume,
    dir: &mut DirCursor,
) -> Result<Option<EntryInfo>, FatError<D::Error>> {
    if dir.terminal || dir.cluster < 2 {
        return Ok(None);
    }

    let mut info = EntryInfo::EMPTY;
    let mut lfn_crc: u8 = 0;
    let mut name_length: usize = 0;

    loop {
        vol.ensure(dev, dir.sector).await?;
        let base = dir.rw_offset as usize;
        let first = vol.buffer[base];

        if first == 0x00 {
            return Ok(None);
        }
        if first != 0xE5 && first != 0x05 {
            let attr = Attributes::from_bits_retain(vol.buffer[base + SFN_ATTR]);

            if attr.contains(Attributes::LFN) {
                let seq = (vol.buffer[base] & LFN_SEQ_MASK) as usize;
                if seq >= 1 {
                    let name_offset = 13 * (seq - 1);
                    for (i, &off) in LFN_NAME_OFFSETS.iter().enumerate() {
                        let ch = vol.buffer[base + off];
                        if ch != 0x00 && ch != 0xFF && name_offset + i < NAME_MAX {
                            info.name[name_offset + i] = ch;
                            name_length += 1;
                        }
                    }
                }
                lfn_crc = vol.buffer[base + LFN_CRC];
            } else if attr.contains(Attributes::VOLUME_ID) {
                // Label entries are not listed; drop any chain state.
                info.name = [0; NAME_MAX];
                name_length = 0;
                lfn_crc = 0;
            } else {
                if lfn_crc != 0 {
                    if lfn_crc != names::sfn_checksum(&vol.buffer[base..base + 11]) {
                        warn!(
                            "{}: long-name chain checksum mismatch",
                            vol.letter as char
                        );
                        return Err(FatError::BadChecksum);
                    }
                } else {
                    info.name[..11].copy_from_slice(&vol.buffer[base..base + 11]);
                    name_length = 11;
                }

                info.attributes = attr;
                info.created_tenths = vol.buffer[base + SFN_CTIME_TH];
                info.created_time = layout::load16(&vol.buffer[base + SFN_CTIME..]);
                info.created_date = layout::load16(&vol.buffer[base + SFN_CDATE..]);
                info.accessed_date = layout::load16(&vol.buffer[base + SFN_ADATE..]);
                info.written_time = layout::load16(&vol.buffer[base + SFN_WTIME..]);
                info.written_date = layout::load16(&vol.buffer[base + SFN_WDATE..]);
                info.size = layout::load32(&vol.buffer[base + SFN_FILE_SIZE..]);
                info.name_length = name_length as u8;

                // Leave the cursor on the next entry; the chain ending
                // right here just parks the cursor as terminal.
                walk::advance_entry(dev, vol, dir).await?;
                return Ok(Some(info));
            }
        }

        if !walk::advance_entry(dev, vol, dir).await? {
            return Ok(None);
        }
    }
}
