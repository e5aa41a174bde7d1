use bytes::BytesMut;

use super::{PacketReader, PacketWriter, ProtocolError};

/// Delivers whatever bytes are buffered as a single packet.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawPacketReader;

impl PacketReader for RawPacketReader {
    fn next_packet(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        Ok(Some(buffer.split().to_vec()))
    }
}

/// Writes packets unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawPacketWriter;

impl PacketWriter for RawPacketWriter {
    fn write(&mut self, packet: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_reader_drains_buffer() {
        let mut buffer = BytesMut::from(&b"hello"[..]);
        let mut reader = RawPacketReader;

        assert_eq!(reader.next_packet(&mut buffer).unwrap(), Some(b"hello".to_vec()));
        assert!(buffer.is_empty());
        assert_eq!(reader.next_packet(&mut buffer).unwrap(), None);
    }
}
