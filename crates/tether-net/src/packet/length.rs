use bytes::{Buf, BytesMut};

use super::{PacketReader, PacketWriter, ProtocolError};

/// Largest packet accepted by a default-constructed codec.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on the buffer growth requested ahead of a partial frame.
const RESERVE_CHUNK: usize = 64 * 1024;

/// Byte order of a length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Most significant byte first (network order).
    #[default]
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

#[derive(Debug, Clone, Copy)]
struct LengthHeader {
    size: usize,
    order: ByteOrder,
    max_packet_size: usize,
}

impl LengthHeader {
    fn new(size: usize, order: ByteOrder) -> Result<Self, ProtocolError> {
        if !(1..=4).contains(&size) {
            return Err(ProtocolError::InvalidHeaderSize(size));
        }
        Ok(Self {
            size,
            order,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE.min(Self::representable(size)),
        })
    }

    fn representable(size: usize) -> usize {
        ((1u64 << (8 * size)) - 1).min(usize::MAX as u64) as usize
    }

    fn decode(&self, header: &[u8]) -> usize {
        let fold = |acc: usize, byte: &u8| (acc << 8) | usize::from(*byte);
        match self.order {
            ByteOrder::BigEndian => header.iter().fold(0, fold),
            ByteOrder::LittleEndian => header.iter().rev().fold(0, fold),
        }
    }

    fn encode(&self, len: usize, out: &mut Vec<u8>) {
        let bytes = (len as u64).to_be_bytes();
        let header = &bytes[bytes.len() - self.size..];
        match self.order {
            ByteOrder::BigEndian => out.extend_from_slice(header),
            ByteOrder::LittleEndian => out.extend(header.iter().rev()),
        }
    }
}

/// Reads packets preceded by a fixed-size length header.
#[derive(Debug, Clone)]
pub struct LengthPrefixedReader {
    header: LengthHeader,
}

impl Default for LengthPrefixedReader {
    fn default() -> Self {
        Self {
            header: LengthHeader {
                size: 4,
                order: ByteOrder::BigEndian,
                max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            },
        }
    }
}

impl LengthPrefixedReader {
    /// Create a reader for `header_size` byte headers (1 to 4).
    pub fn new(header_size: usize, order: ByteOrder) -> Result<Self, ProtocolError> {
        Ok(Self {
            header: LengthHeader::new(header_size, order)?,
        })
    }

    /// Reject packets announcing more than `max` bytes.
    ///
    /// Defaults to [`DEFAULT_MAX_PACKET_SIZE`], capped by what the header can express.
    pub fn max_packet_size(mut self, max: usize) -> Self {
        self.header.max_packet_size = max.min(LengthHeader::representable(self.header.size));
        self
    }
}

impl PacketReader for LengthPrefixedReader {
    fn next_packet(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
        let header_size = self.header.size;
        if buffer.len() < header_size {
            return Ok(None);
        }

        let size = self.header.decode(&buffer[..header_size]);
        if size > self.header.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: self.header.max_packet_size,
            });
        }

        let frame = header_size + size;
        if buffer.len() < frame {
            // The announced size is untrusted; grow as the bytes arrive.
            buffer.reserve((frame - buffer.len()).min(RESERVE_CHUNK));
            return Ok(None);
        }

        buffer.advance(header_size);
        Ok(Some(buffer.split_to(size).to_vec()))
    }
}

/// Writes packets behind a fixed-size length header.
#[derive(Debug, Clone)]
pub struct LengthPrefixedWriter {
    header: LengthHeader,
}

impl Default for LengthPrefixedWriter {
    fn default() -> Self {
        Self {
            header: LengthPrefixedReader::default().header,
        }
    }
}

impl LengthPrefixedWriter {
    /// Create a writer for `header_size` byte headers (1 to 4).
    pub fn new(header_size: usize, order: ByteOrder) -> Result<Self, ProtocolError> {
        Ok(Self {
            header: LengthHeader::new(header_size, order)?,
        })
    }

    /// Reject packets longer than `max` bytes.
    pub fn max_packet_size(mut self, max: usize) -> Self {
        self.header.max_packet_size = max.min(LengthHeader::representable(self.header.size));
        self
    }
}

impl PacketWriter for LengthPrefixedWriter {
    fn write(&mut self, packet: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        if packet.len() > self.header.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: packet.len(),
                max: self.header.max_packet_size,
            });
        }
        let mut out = Vec::with_capacity(self.header.size + packet.len());
        self.header.encode(packet.len(), &mut out);
        out.extend_from_slice(&packet);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_size() {
        assert_eq!(
            LengthPrefixedReader::new(0, ByteOrder::BigEndian).unwrap_err(),
            ProtocolError::InvalidHeaderSize(0)
        );
        assert!(LengthPrefixedWriter::new(5, ByteOrder::LittleEndian).is_err());
    }

    #[test]
    fn test_header_layout() {
        let mut big = LengthPrefixedWriter::new(2, ByteOrder::BigEndian).unwrap();
        let mut little = LengthPrefixedWriter::new(2, ByteOrder::LittleEndian).unwrap();
        let packet = vec![7u8; 258];

        assert_eq!(&big.write(packet.clone()).unwrap()[..2], &[0x01, 0x02]);
        assert_eq!(&little.write(packet).unwrap()[..2], &[0x02, 0x01]);
    }

    #[test]
    fn test_reader_waits_for_full_frame() {
        let mut reader = LengthPrefixedReader::default();
        let mut buffer = BytesMut::from(&[0u8, 0, 0, 5, b'h', b'e'][..]);

        assert_eq!(reader.next_packet(&mut buffer).unwrap(), None);
        assert_eq!(buffer.len(), 6);

        buffer.extend_from_slice(b"llo\x00\x00\x00\x01!");
        assert_eq!(reader.next_packet(&mut buffer).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(reader.next_packet(&mut buffer).unwrap(), Some(b"!".to_vec()));
        assert_eq!(reader.next_packet(&mut buffer).unwrap(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_one_byte_header_limits() {
        let mut writer = LengthPrefixedWriter::new(1, ByteOrder::BigEndian).unwrap();
        assert!(writer.write(vec![0; 255]).is_ok());
        assert_eq!(
            writer.write(vec![0; 256]).unwrap_err(),
            ProtocolError::PacketTooLarge { size: 256, max: 255 }
        );
    }

    #[test]
    fn test_default_limit_rejects_huge_announcement() {
        let mut reader = LengthPrefixedReader::default();
        let mut buffer = BytesMut::from(&[0xffu8, 0xff, 0xff, 0xfe][..]);

        assert_eq!(
            reader.next_packet(&mut buffer).unwrap_err(),
            ProtocolError::PacketTooLarge {
                size: 0xffff_fffe,
                max: DEFAULT_MAX_PACKET_SIZE
            }
        );
    }

    #[test]
    fn test_partial_frame_reserves_bounded_chunk() {
        let mut reader = LengthPrefixedReader::default();
        let mut buffer = BytesMut::from(&[0x00u8, 0xff, 0xff, 0xff, 1, 2][..]);

        assert_eq!(reader.next_packet(&mut buffer).unwrap(), None);
        assert!(buffer.capacity() <= buffer.len() + RESERVE_CHUNK * 2);
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn test_small_header_keeps_its_own_limit() {
        let mut writer = LengthPrefixedWriter::new(2, ByteOrder::BigEndian).unwrap();
        assert!(writer.write(vec![0; 65_535]).is_ok());
        assert!(writer.write(vec![0; 65_536]).is_err());
    }

    #[test]
    fn test_reader_rejects_oversized_announcement() {
        let mut reader = LengthPrefixedReader::default().max_packet_size(16);
        let mut buffer = BytesMut::from(&[0u8, 0, 1, 0][..]);

        assert_eq!(
            reader.next_packet(&mut buffer).unwrap_err(),
            ProtocolError::PacketTooLarge { size: 256, max: 16 }
        );
    }
}
