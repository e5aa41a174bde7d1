//! The packet codec boundary.
//!
//! Tether never decides where one packet ends and the next begins. Each
//! connection holds a [`PacketReader`] that cuts complete packets out of its
//! read buffer and a [`PacketWriter`] that turns an outgoing packet into the
//! bytes to send. Both can be swapped at any time with
//! [`Connection::set_packet_reader`](crate::Connection::set_packet_reader) and
//! [`Connection::set_packet_writer`](crate::Connection::set_packet_writer).
//!
//! Stock codecs:
//!
//! | Reader / Writer | Framing |
//! |---|---|
//! | [`RawPacketReader`] / [`RawPacketWriter`] | none, every read is a packet (default) |
//! | [`LengthPrefixedReader`] / [`LengthPrefixedWriter`] | 1 to 4 byte length header |
//! | [`DelimiterPacketReader`] / [`DelimiterPacketWriter`] | terminator byte, e.g. `\n` or `\0` |

mod delimiter;
mod length;
mod raw;

use bytes::BytesMut;
use tether_core::ExceptionSink;
use tether_core::sink::guarded;

pub use delimiter::{DelimiterPacketReader, DelimiterPacketWriter};
pub use length::{ByteOrder, DEFAULT_MAX_PACKET_SIZE, LengthPrefixedReader, LengthPrefixedWriter};
pub use raw::{RawPacketReader, RawPacketWriter};

/// Errors raised by a packet codec.
///
/// Returning one of these from a reader or writer closes the connection with
/// [`NetError::Protocol`](crate::NetError::Protocol).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A packet is larger than the codec allows.
    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge {
        /// Size of the offending packet.
        size: usize,
        /// The configured limit.
        max: usize,
    },
    /// A length header size outside 1..=4 was requested.
    #[error("unsupported length header size {0}, expected 1 to 4 bytes")]
    InvalidHeaderSize(usize),
    /// An outgoing packet contains the delimiter byte.
    #[error("packet contains the delimiter byte {0:#04x}")]
    DelimiterInPacket(u8),
    /// The reader or writer panicked; the panic went to the exception sink.
    #[error("packet codec panicked")]
    CodecPanicked,
}

/// Cuts complete packets out of a connection's read buffer.
pub trait PacketReader: Send {
    /// Remove and return the next complete packet, or `None` if the buffer
    /// does not hold one yet. Partial trailing bytes stay in `buffer`.
    fn next_packet(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError>;
}

/// Turns an outgoing packet into the bytes placed on the write queue.
pub trait PacketWriter: Send {
    /// Encode `packet` for the wire.
    fn write(&mut self, packet: Vec<u8>) -> Result<Vec<u8>, ProtocolError>;
}

/// Call into a codec, turning a panic into [`ProtocolError::CodecPanicked`].
pub(crate) fn codec_call<T>(
    sink: &dyn ExceptionSink,
    site: &'static str,
    f: impl FnOnce() -> Result<T, ProtocolError>,
) -> Result<T, ProtocolError> {
    guarded(sink, site, f).unwrap_or(Err(ProtocolError::CodecPanicked))
}
