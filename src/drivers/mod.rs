pub mod zb25d16;

/// Byte-addressed SPI NOR flash as used by the history log.
///
/// Erases only start the operation; callers poll [`SpiFlash::is_busy`] before
/// touching the chip again.
pub trait SpiFlash {
    type Error: core::fmt::Debug;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Program `data` at `address`. Only clears bits; the range must have been erased.
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error>;

    fn erase_chip(&mut self) -> Result<(), Self::Error>;

    fn is_busy(&mut self) -> Result<bool, Self::Error>;

    fn sleep(&mut self) -> Result<(), Self::Error>;

    fn wake(&mut self) -> Result<(), Self::Error>;
}
