/// Sensor serial as reported in the details response.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SerialNumber([u8; 6]);

impl From<[u8; 6]> for SerialNumber {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl core::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut buf = [0u8; 6 * 2];

        hex::encode_to_slice(self.0, &mut buf).map_err(|_| core::fmt::Error)?;

        f.write_str(core::str::from_utf8(&buf).map_err(|_| core::fmt::Error)?)
    }
}
