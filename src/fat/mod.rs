mod core;

pub(crate) mod dir;
pub(crate) mod layout;
pub(crate) mod mount;
pub(crate) mod names;
pub(crate) mod path;
pub(crate) mod table;
pub(crate) mod volume;
pub(crate) mod walk;


pub use self::core::{Attributes, EntryInfo, FatError, NAME_MAX, SECTOR_SIZE};

pub(crate) use self::core::{DirCursor, FileCursor, CLUSTER_MASK};
pub(crate) use self::volume::Volume;
