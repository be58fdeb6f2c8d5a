use crate::block::BlockOps;

use super::core::{DirCursor, FatError, FileCursor, CLUSTER_MASK, DIR_ENTRY_SIZE};
use super::table;
use super::volume::Volume;

/// Moves a directory cursor to the next 32-byte entry, stepping sectors
/// and clusters as boundaries are crossed. Returns `false` when the chain
/// ends instead of yielding another entry.
pub(crate) async fn advance_entry<D: BlockOps>(
    dev: &mut D,
    vol: &mut Volume,
    dir: &mut DirCursor,
) -> Result<bool, FatError<D::Error>> {
    dir.rw_offset += DIR_ENTRY_SIZE as u32;

    if dir.rw_offset >= vol.sector_size as u32 {
        dir.rw_offset -= vol.sector_size as u32;
        dir.sector += 1;

        if dir.sector >= vol.clust_to_sect(dir.cluster) + vol.cluster_size as u32 {
            let entry = table::get(dev, vol, dir.cluster).await?;
            if table::is_eoc(entry) {
                dir.terminal = true;
                return Ok(false);
            }
            dir.cluster = entry & CLUSTER_MASK;
            dir.sector = vol.clust_to_sect(dir.cluster);
        }
    }
    Ok(true)
}

/// Folds a file cursor's sector overflow back into a valid
/// (cluster, sector, offset) triple. Returns `false` when the chain ends
/// under the cursor.
pub(crate) async fn resolve_file<D: BlockOps>(
    dev: &mut D,
    vol: &mut Volume,
    file: &mut FileCursor,
) -> Result<bool, FatError<D::Error>> {
    if file.rw_offset >= vol.sector_size as u32 {
        file.rw_offset -= vol.sector_size as u32;
        file.sector += 1;

        if file.sector >= vol.clust_to_sect(file.cluster) + vol.cluster_size as u32 {
            let entry = table::get(dev, vol, file.cluster).await?;
            if table::is_eoc(entry) {
                return Ok(false);
            }
            file.cluster = entry & CLUSTER_MASK;
            file.sector = vol.clust_to_sect(file.cluster);
        }
    }
    Ok(true)
}
