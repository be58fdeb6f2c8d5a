use crate::block::BlockOps;

use super::core::{DirCursor, FatError};
use super::dir;
use super::volume::Volume;

/// Result of walking a volume-relative path.
pub(crate) struct Resolved<'a> {
    pub cursor: DirCursor,
    /// The final fragment when it names a file; the cursor then points at
    /// the parent directory.
    pub file_fragment: Option<&'a [u8]>,
}

/// Descends from the volume root along `/`-separated fragments.
///
/// `path` starts at the separator following the drive prefix. A fragment
/// containing a dot is taken to be a file name: descent stops with the
/// cursor at the parent and the fragment handed back to the caller for a
/// directory search.
pub(crate) async fn follow<'a, D: BlockOps>(
    dev: &mut D,
    vol: &mut Volume,
    path: &'a [u8],
) -> Result<Resolved<'a>, FatError<D::Error>> {
    let mut cursor = DirCursor::root(vol);
    let mut rest = &path[1..];

    loop {
        while rest.first() == Some(&b'/') {
            rest = &rest[1..];
        }
        if rest.is_empty() {
            return Ok(Resolved {
                cursor,
                file_fragment: None,
            });
        }

        let end = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
        let fragment = &rest[..end];
        rest = &rest[end..];

        if fragment.contains(&b'.') {
            return Ok(Resolved {
                cursor,
                file_fragment: Some(fragment),
            });
        }
        dir::search(dev, vol, &mut cursor, fragment).await?;
    }
}
