use bitfield::bitfield;
use embedded_hal::spi::{Operation, SpiDevice};

pub mod opcode {
    pub const WRITE_ENABLE: u8 = 0x06;
    pub const READ_STATUS: u8 = 0x05;
    pub const READ_DATA: u8 = 0x03;
    pub const PAGE_PROGRAM: u8 = 0x02;
    pub const SECTOR_ERASE: u8 = 0x20;
    pub const CHIP_ERASE: u8 = 0xC7;
    pub const POWER_DOWN: u8 = 0xB9;
    pub const RELEASE_POWER_DOWN: u8 = 0xAB;
    pub const JEDEC_ID: u8 = 0x9F;
}

bitfield! {
    /// Status register 1.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Status(u8);
    impl Debug;
    /// Write in progress.
    pub busy, _: 0;
    /// Write enable latch.
    pub write_enabled, _: 1;
    pub u8, block_protect, _: 6, 2;
    pub status_protect, _: 7;
}

/// Raw command layer. Every method is a single chip-select transaction.
pub struct Zb25d16<SPI> {
    spi: SPI,
}

fn addressed(opcode: u8, address: u32) -> [u8; 4] {
    let [_, a2, a1, a0] = address.to_be_bytes();
    [opcode, a2, a1, a0]
}

impl<SPI: SpiDevice> Zb25d16<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    fn command(&mut self, opcode: u8) -> Result<(), SPI::Error> {
        self.spi.write(&[opcode])
    }

    pub fn write_enable(&mut self) -> Result<(), SPI::Error> {
        self.command(opcode::WRITE_ENABLE)
    }

    pub fn read_status(&mut self) -> Result<Status, SPI::Error> {
        let mut buf = [0u8; 1];
        self.spi.transaction(&mut [
            Operation::Write(&[opcode::READ_STATUS]),
            Operation::Read(&mut buf),
        ])?;
        Ok(Status(buf[0]))
    }

    pub fn read_data(&mut self, address: u32, buf: &mut [u8]) -> Result<(), SPI::Error> {
        self.spi.transaction(&mut [
            Operation::Write(&addressed(opcode::READ_DATA, address)),
            Operation::Read(buf),
        ])
    }

    /// Must not cross a 256 byte program page.
    pub fn page_program(&mut self, address: u32, data: &[u8]) -> Result<(), SPI::Error> {
        self.spi.transaction(&mut [
            Operation::Write(&addressed(opcode::PAGE_PROGRAM, address)),
            Operation::Write(data),
        ])
    }

    pub fn sector_erase(&mut self, address: u32) -> Result<(), SPI::Error> {
        self.spi
            .write(&addressed(opcode::SECTOR_ERASE, address))
    }

    pub fn chip_erase(&mut self) -> Result<(), SPI::Error> {
        self.command(opcode::CHIP_ERASE)
    }

    pub fn power_down(&mut self) -> Result<(), SPI::Error> {
        self.command(opcode::POWER_DOWN)
    }

    pub fn release_power_down(&mut self) -> Result<(), SPI::Error> {
        self.command(opcode::RELEASE_POWER_DOWN)
    }

    pub fn jedec_id(&mut self) -> Result<[u8; 3], SPI::Error> {
        let mut id = [0u8; 3];
        self.spi.transaction(&mut [
            Operation::Write(&[opcode::JEDEC_ID]),
            Operation::Read(&mut id),
        ])?;
        Ok(id)
    }
}
