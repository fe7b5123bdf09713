//! Wire framing: `FF AA <cmd> <len> <payload..> <sum>`.

use heapless::Vec;

pub const MARKER: [u8; 2] = [0xFF, 0xAA];

/// Markers, command and length.
pub const HEADER_LEN: usize = 4;

/// Reassembly buffer for incoming frames.
pub const RX_FRAME_LEN: usize = 32;

/// Largest notification the link carries in one packet.
pub const TX_FRAME_LEN: usize = 244;

/// Low byte of the sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameError {
    TooShort,
    Marker,
    Checksum,
}

/// A received frame that passed marker and checksum checks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Frame<'a> {
    raw: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, FrameError> {
        if raw.len() < HEADER_LEN + 1 {
            return Err(FrameError::TooShort);
        }
        if raw[..2] != MARKER {
            return Err(FrameError::Marker);
        }

        let (body, sum) = raw.split_at(raw.len() - 1);
        if checksum(body) != sum[0] {
            return Err(FrameError::Checksum);
        }

        Ok(Self { raw })
    }

    pub fn command(&self) -> u8 {
        self.raw[2]
    }

    pub fn declared_len(&self) -> u8 {
        self.raw[3]
    }

    /// Whole frame, markers and checksum included.
    pub fn frame_len(&self) -> usize {
        self.raw.len()
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.raw[HEADER_LEN..self.raw.len() - 1]
    }

    /// Payload byte at `index`, or 0 past the end.
    pub fn byte(&self, index: usize) -> u8 {
        self.payload().get(index).copied().unwrap_or(0)
    }

    pub fn be16(&self, index: usize) -> u16 {
        u16::from_be_bytes([self.byte(index), self.byte(index + 1)])
    }

    pub fn be32(&self, index: usize) -> u32 {
        u32::from_be_bytes([
            self.byte(index),
            self.byte(index + 1),
            self.byte(index + 2),
            self.byte(index + 3),
        ])
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }
}

/// Reassembles frames from the byte stream, resynchronising on bad markers.
pub struct Framer {
    buf: [u8; RX_FRAME_LEN],
    idx: usize,
}

impl Framer {
    pub const fn new() -> Self {
        Self {
            buf: [0; RX_FRAME_LEN],
            idx: 0,
        }
    }

    pub fn reset(&mut self) {
        self.idx = 0;
    }

    pub fn pending(&self) -> usize {
        self.idx
    }

    /// Feed one byte. Returns the complete frame once its checksum byte arrived.
    pub fn push(&mut self, byte: u8) -> Option<&[u8]> {
        self.buf[self.idx] = byte;
        self.idx += 1;

        match self.idx {
            1 | 2 if byte != MARKER[self.idx - 1] => {
                self.idx = 0;
                return None;
            }
            1..=3 => return None,
            _ => {}
        }

        let total = HEADER_LEN + 1 + self.buf[3] as usize;
        if total > RX_FRAME_LEN {
            log::warn!("Frame length {} does not fit, resyncing", self.buf[3]);
            self.idx = 0;
            return None;
        }

        if self.idx == total {
            self.idx = 0;
            return Some(&self.buf[..total]);
        }

        None
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

/// An outgoing frame.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxFrame(Vec<u8, TX_FRAME_LEN>);

impl TxFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn command(&self) -> u8 {
        self.0[2]
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[HEADER_LEN..self.0.len() - 1]
    }
}

/// Builds a reply frame. The length byte is whatever the app expects for the
/// command, which is not always the number of payload bytes that follow.
#[must_use]
pub struct FrameBuilder {
    buf: Vec<u8, TX_FRAME_LEN>,
}

impl FrameBuilder {
    pub fn new(command: u8, declared_len: u8) -> Self {
        let buf = Vec::from_slice(&[MARKER[0], MARKER[1], command, declared_len]).unwrap_or_default();
        Self { buf }
    }

    /// A frame whose length byte matches `payload`.
    pub fn with_payload(command: u8, payload: &[u8]) -> Self {
        Self::new(command, payload.len() as u8).bytes(payload)
    }

    pub fn u8(mut self, value: u8) -> Self {
        if self.buf.push(value).is_err() {
            log::error!("Frame {:#04x} overflows", self.buf[2]);
        }
        self
    }

    pub fn bytes(mut self, values: &[u8]) -> Self {
        if self.buf.extend_from_slice(values).is_err() {
            log::error!("Frame {:#04x} overflows", self.buf[2]);
        }
        self
    }

    pub fn be16(self, value: u16) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn be32(self, value: u32) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn finish(mut self) -> TxFrame {
        let sum = checksum(&self.buf);
        if self.buf.push(sum).is_err() {
            // Keep the frame well formed at the cost of its last payload byte.
            let last = self.buf.len() - 1;
            self.buf[last] = checksum(&self.buf[..last]);
        }
        TxFrame(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(framer: &mut Framer, bytes: &[u8]) -> Option<std::vec::Vec<u8>> {
        let mut out = None;
        for &b in bytes {
            if let Some(frame) = framer.push(b) {
                out = Some(frame.to_vec());
            }
        }
        out
    }

    #[test]
    fn build_then_parse() {
        for payload in [&[][..], &[0x01], &[0x12, 0x34, 0x56, 0x78], &[0xFF; 27]] {
            let frame = FrameBuilder::with_payload(0x31, payload).finish();
            let bytes = frame.as_bytes();

            let mut framer = Framer::new();
            let received = feed(&mut framer, bytes).unwrap();
            let parsed = Frame::parse(&received).unwrap();

            assert_eq!(parsed.command(), 0x31);
            assert_eq!(parsed.payload(), payload);
            assert_eq!(*bytes.last().unwrap(), checksum(&bytes[..bytes.len() - 1]));
        }
    }

    #[test]
    fn any_flipped_bit_is_rejected() {
        let frame = FrameBuilder::with_payload(0x04, &[0x2A, 0x00, 0x10, 0x20]).finish();
        let bytes = frame.as_bytes();

        for index in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.to_vec();
                corrupted[index] ^= 1 << bit;
                assert!(
                    Frame::parse(&corrupted).is_err(),
                    "byte {index} bit {bit} accepted"
                );
            }
        }
    }

    #[test]
    fn resyncs_on_garbage() {
        let good = FrameBuilder::with_payload(0x01, &[]).finish();

        let mut framer = Framer::new();
        assert_eq!(feed(&mut framer, &[0x00, 0xFF, 0x00, 0xAA]), None);
        assert_eq!(framer.pending(), 0);
        assert_eq!(feed(&mut framer, good.as_bytes()).unwrap(), good.as_bytes());

        // A repeated FF resets the framer and is dropped with the rest of
        // that frame.
        let mut framer = Framer::new();
        assert_eq!(feed(&mut framer, &[0xFF, 0xFF, 0xAA, 0x01, 0x00, 0xAA]), None);
        assert_eq!(feed(&mut framer, good.as_bytes()).unwrap(), good.as_bytes());
    }

    #[test]
    fn oversized_length_resyncs() {
        let mut framer = Framer::new();
        assert_eq!(feed(&mut framer, &[0xFF, 0xAA, 0x0A, 0xF0]), None);
        assert_eq!(framer.pending(), 0);

        let good = FrameBuilder::with_payload(0x0A, &[b'a'; 27]).finish();
        assert_eq!(good.as_bytes().len(), RX_FRAME_LEN);
        assert!(feed(&mut framer, good.as_bytes()).is_some());
    }

    #[test]
    fn declared_length_can_differ() {
        let frame = FrameBuilder::new(0x01, 2).be32(0x1000).be16(800).finish();
        assert_eq!(frame.as_bytes()[3], 2);
        assert_eq!(frame.payload(), &[0x00, 0x00, 0x10, 0x00, 0x03, 0x20]);
    }
}
