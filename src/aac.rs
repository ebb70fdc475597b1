//! AAC ADTS sub-muxer bridge.
//!
//! The core treats ADTS/LATM re-framing of raw AAC access units as a
//! plug-in concern: [`AacSubMuxer`] is the byte-in/byte-out contract, and
//! [`DefaultAdtsSubMuxer`] is the crate's built-in implementation that
//! wraps a raw AAC access unit in a 7-byte ADTS header.

use crate::codec::AacConfig;
use crate::error::Result;

/// Re-frames a raw AAC access unit that lacks ADTS sync into a
/// transport-ready byte stream (ADTS or LATM).
pub trait AacSubMuxer: Send {
    /// Wraps `raw_aac` (a bare AAC access unit with no ADTS header) using
    /// `config`, returning the bytes to carry in the PES payload.
    fn reframe(&mut self, raw_aac: &[u8], config: &AacConfig) -> Result<Vec<u8>>;
}

/// ADTS sync word, occupying the first 12 bits of a conforming frame.
pub const ADTS_SYNC_WORD: u16 = 0x0FFF;

/// True if `data` begins with ADTS sync (`0xFFF` in the top 12 bits of
/// the first two bytes).
pub fn has_adts_sync(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && (data[1] & 0xF0) == 0xF0
}

/// Builds the 7-byte ADTS header for one AAC frame of `frame_len` bytes
/// (header included), per ISO/IEC 13818-7.
fn build_adts_header(config: &AacConfig, frame_len: usize) -> [u8; 7] {
    let mut bytes = [0u8; 7];
    bytes[0] = 0xFF;
    bytes[1] = 0xF1; // MPEG-4, layer 0, no CRC
    bytes[2] = ((config.profile & 0x3) << 6)
        | ((config.sample_rate_index & 0xF) << 2)
        | ((config.channel_configuration >> 2) & 0x1);
    bytes[3] = ((config.channel_configuration & 0x3) << 6) | (((frame_len >> 11) & 0x3) as u8);
    bytes[4] = ((frame_len >> 3) & 0xFF) as u8;
    bytes[5] = (((frame_len & 0x7) as u8) << 5) | 0x1F;
    bytes[6] = 0xFC;
    bytes
}

/// The crate's built-in ADTS sub-muxer: prepends a 7-byte ADTS header to
/// each raw AAC access unit.
#[derive(Debug, Default)]
pub struct DefaultAdtsSubMuxer;

impl AacSubMuxer for DefaultAdtsSubMuxer {
    fn reframe(&mut self, raw_aac: &[u8], config: &AacConfig) -> Result<Vec<u8>> {
        let frame_len = raw_aac.len() + 7;
        let header = build_adts_header(config, frame_len);
        let mut out = Vec::with_capacity(frame_len);
        out.extend_from_slice(&header);
        out.extend_from_slice(raw_aac);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_existing_adts_sync() {
        assert!(has_adts_sync(&[0xFF, 0xF1, 0, 0]));
        assert!(!has_adts_sync(&[0x00, 0x00]));
        assert!(!has_adts_sync(&[0xFF]));
    }

    #[test]
    fn reframe_prepends_seven_byte_header() {
        let mut sub = DefaultAdtsSubMuxer;
        let config = AacConfig::default();
        let raw = vec![1u8, 2, 3, 4];
        let framed = sub.reframe(&raw, &config).unwrap();
        assert_eq!(framed.len(), 11);
        assert!(has_adts_sync(&framed));
        assert_eq!(&framed[7..], &raw[..]);
    }
}
