use core::fmt::{Debug, Display};

pub mod window;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Millivolts(pub u16);

impl Debug for Millivolts {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{}mV", self.0))
    }
}

/// Lowercase hex with a space between bytes, for frame logging.
pub struct HexDump<'a>(&'a [u8]);

pub fn hexdump(bytes: &[u8]) -> HexDump<'_> {
    HexDump(bytes)
}

impl Display for HexDump<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            let mut buf = [0u8; 2];
            if hex::encode_to_slice([*byte], &mut buf).is_err() {
                return Err(core::fmt::Error);
            }
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(core::str::from_utf8(&buf).map_err(|_| core::fmt::Error)?)?;
        }
        Ok(())
    }
}
