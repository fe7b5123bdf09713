//! Zbit ZB25D16 2 MiB SPI NOR flash.

use embedded_hal::spi::SpiDevice;

use super::SpiFlash;

pub mod ll;

pub const CAPACITY: u32 = 2 * 1024 * 1024;
pub const SECTOR_SIZE: u32 = 4 * 1024;
pub const PROGRAM_PAGE_SIZE: u32 = 256;

/// Largest single SPI transfer issued by this driver.
const CHUNK_SIZE: usize = 128;

/// Status polls before a page program is considered stuck.
const BUSY_POLLS: u32 = 10_000;

#[derive(Debug)]
pub enum Error<E> {
    Spi(E),
    Busy,
    OutOfRange,
}

impl<E> From<E> for Error<E> {
    fn from(value: E) -> Self {
        Error::Spi(value)
    }
}

pub struct Zb25d16<SPI> {
    ll: ll::Zb25d16<SPI>,
}

impl<SPI: SpiDevice> Zb25d16<SPI> {
    /// Wake the chip and identify it.
    pub fn new(spi: SPI) -> Result<Self, Error<SPI::Error>> {
        let mut ll = ll::Zb25d16::new(spi);
        ll.release_power_down()?;

        let id = ll.jedec_id()?;
        log::info!("Flash JEDEC id {:02x}{:02x}{:02x}", id[0], id[1], id[2]);

        Ok(Self { ll })
    }

    fn check_range(address: u32, len: usize) -> Result<(), Error<SPI::Error>> {
        match address.checked_add(len as u32) {
            Some(end) if end <= CAPACITY => Ok(()),
            _ => Err(Error::OutOfRange),
        }
    }

    fn wait_idle(&mut self) -> Result<(), Error<SPI::Error>> {
        for _ in 0..BUSY_POLLS {
            if !self.ll.read_status()?.busy() {
                return Ok(());
            }
        }
        Err(Error::Busy)
    }
}

impl<SPI: SpiDevice> SpiFlash for Zb25d16<SPI> {
    type Error = Error<SPI::Error>;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        Self::check_range(address, buf.len())?;

        let mut address = address;
        for chunk in buf.chunks_mut(CHUNK_SIZE) {
            self.ll.read_data(address, chunk)?;
            address += chunk.len() as u32;
        }
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        Self::check_range(address, data.len())?;

        let mut address = address;
        let mut data = data;
        while !data.is_empty() {
            let page_left = (PROGRAM_PAGE_SIZE - address % PROGRAM_PAGE_SIZE) as usize;
            let len = data.len().min(CHUNK_SIZE).min(page_left);
            let (chunk, rest) = data.split_at(len);

            self.wait_idle()?;
            self.ll.write_enable()?;
            self.ll.page_program(address, chunk)?;

            address += len as u32;
            data = rest;
        }

        self.wait_idle()
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        Self::check_range(address, SECTOR_SIZE as usize)?;
        log::debug!("Erasing sector at {:#x}", address);

        self.wait_idle()?;
        self.ll.write_enable()?;
        self.ll.sector_erase(address - address % SECTOR_SIZE)?;
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<(), Self::Error> {
        log::info!("Erasing flash chip");

        self.wait_idle()?;
        self.ll.write_enable()?;
        self.ll.chip_erase()?;
        Ok(())
    }

    fn is_busy(&mut self) -> Result<bool, Self::Error> {
        Ok(self.ll.read_status()?.busy())
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        self.ll.power_down()?;
        Ok(())
    }

    fn wake(&mut self) -> Result<(), Self::Error> {
        self.ll.release_power_down()?;
        Ok(())
    }
}
