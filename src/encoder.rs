//! Wire encoding for events: JSON, then zlib, then base64

use crate::errors::Result;
use crate::event::Event;
use base64::engine::general_purpose::STANDARD;
use base64::read::DecoderReader;
use base64::write::EncoderWriter;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::debug;

/// Turns an event into the request body sent to the collector
pub trait EventEncoder: Send + Sync {
    fn encode(&self, event: &Event) -> Result<Vec<u8>>;
}

/// Default encoder producing base64 text of zlib-compressed JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketEncoder {
    level: Compression,
}

impl PacketEncoder {
    pub fn new(level: Compression) -> Self {
        Self { level }
    }
}

impl EventEncoder for PacketEncoder {
    fn encode(&self, event: &Event) -> Result<Vec<u8>> {
        let text = EncoderWriter::new(Vec::new(), &STANDARD);
        let mut zlib = ZlibEncoder::new(text, self.level);

        serde_json::to_writer(&mut zlib, event)?;

        // Both stages buffer internally; finishing in this order flushes the
        // zlib trailer into the base64 stage before its final padding.
        let mut text = zlib.finish()?;
        let packet = text.finish()?;

        debug!("Encoded event {} into {} bytes", event.event_id, packet.len());
        Ok(packet)
    }
}

/// Reverse of [`PacketEncoder::encode`]
pub fn decode_packet(packet: &[u8]) -> Result<Event> {
    let text = DecoderReader::new(packet, &STANDARD);
    let zlib = ZlibDecoder::new(text);
    Ok(serde_json::from_reader(zlib)?)
}
