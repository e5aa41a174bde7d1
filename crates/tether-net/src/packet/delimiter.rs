use bytes::{Buf, BytesMut};

use super::{PacketReader, PacketWriter, ProtocolError};

/// Reads packets terminated by a delimiter byte. The delimiter is stripped.
#[derive(Debug, Clone)]
pub struct DelimiterPacketReader {
    delimiter: u8,
    strip_carriage_return: bool,
    max_packet_size: usize,
    scanned: usize,
}

impl DelimiterPacketReader {
    /// Create a reader splitting on `delimiter`.
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            strip_carriage_return: false,
            max_packet_size: usize::MAX,
            scanned: 0,
        }
    }

    /// Newline-terminated text lines; a trailing `\r` is dropped as well.
    pub fn lines() -> Self {
        Self {
            strip_carriage_return: true,
            ..Self::new(b'\n')
        }
    }

    /// Zero-terminated packets.
    pub fn zero_delimited() -> Self {
        Self::new(0)
    }

    /// Fail once more than `max` bytes arrive without a delimiter.
    pub fn max_packet_size(mut self, max: usize) -> Self {
        self.max_packet_size = max;
        self
    }
}

impl PacketReader for DelimiterPacketReader {
    fn next_packet(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
        let start = self.scanned.min(buffer.len());
        let Some(offset) = buffer[start..].iter().position(|b| *b == self.delimiter) else {
            if buffer.len() > self.max_packet_size {
                return Err(ProtocolError::PacketTooLarge {
                    size: buffer.len(),
                    max: self.max_packet_size,
                });
            }
            self.scanned = buffer.len();
            return Ok(None);
        };

        let end = start + offset;
        self.scanned = 0;
        if end > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: end,
                max: self.max_packet_size,
            });
        }

        let mut packet = buffer.split_to(end).to_vec();
        buffer.advance(1);
        if self.strip_carriage_return && packet.last() == Some(&b'\r') {
            packet.pop();
        }
        Ok(Some(packet))
    }
}

/// Writes packets followed by a delimiter byte.
#[derive(Debug, Clone)]
pub struct DelimiterPacketWriter {
    delimiter: u8,
}

impl DelimiterPacketWriter {
    /// Create a writer terminating packets with `delimiter`.
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Newline-terminated text lines.
    pub fn lines() -> Self {
        Self::new(b'\n')
    }

    /// Zero-terminated packets.
    pub fn zero_delimited() -> Self {
        Self::new(0)
    }
}

impl PacketWriter for DelimiterPacketWriter {
    fn write(&mut self, mut packet: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        if packet.contains(&self.delimiter) {
            return Err(ProtocolError::DelimiterInPacket(self.delimiter));
        }
        packet.push(self.delimiter);
        Ok(packet)
    }
}
