/// Capability set of a sector-addressed storage device.
///
/// Transfers are whole sectors identified by logical block address. The
/// driver issues single-sector transfers for all cached metadata and data
/// reads; `count` is carried in the signature so an implementation can also
/// serve multi-sector requests.
#[allow(async_fn_in_trait)]
pub trait BlockOps {
    type Error;

    /// Whether a medium is inserted and responding.
    fn status(&self) -> bool;

    /// Brings the device to a state where sector transfers succeed.
    async fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Reads `count` sectors starting at `lba` into `buf`.
    async fn read(&mut self, buf: &mut [u8], lba: u32, count: u32) -> Result<(), Self::Error>;

    /// Writes `count` sectors starting at `lba` from `buf`.
    async fn write(&mut self, buf: &[u8], lba: u32, count: u32) -> Result<(), Self::Error>;
}
