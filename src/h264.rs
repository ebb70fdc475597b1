//! H.264 Annex-B start-code scanning and Access Unit Delimiter insertion.
//!
//! The muxer does not parse SPS/PPS or decode anything about an H.264
//! access unit beyond its NAL unit types; that semantic parsing is an
//! external preprocessor concern. This module only scans for an existing
//! AUD and prepends one when absent, per the muxer-loop contract.

use bytes::Bytes;

/// Access Unit Delimiter NAL unit type.
const NAL_TYPE_AUD: u8 = 9;
/// Bytes prepended when no AUD is found: start code + AUD NAL with
/// `primary_pic_type = 7` (any slice type).
const AUD_PREFIX: [u8; 6] = [0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];
/// Maximum number of NAL units inspected while looking for an AUD.
const MAX_NALS_SCANNED: usize = 5;

/// True if `data` begins with an Annex-B start code (`00 00 01` or
/// `00 00 00 01`).
pub fn has_start_code(data: &[u8]) -> bool {
    (data.len() >= 3 && data[0] == 0 && data[1] == 0 && data[2] == 1)
        || (data.len() >= 4 && data[0] == 0 && data[1] == 0 && data[2] == 0 && data[3] == 1)
}

fn start_code_len(data: &[u8]) -> Option<usize> {
    if data.len() >= 4 && data[0] == 0 && data[1] == 0 && data[2] == 0 && data[3] == 1 {
        Some(4)
    } else if data.len() >= 3 && data[0] == 0 && data[1] == 0 && data[2] == 1 {
        Some(3)
    } else {
        None
    }
}

/// Scans up to [`MAX_NALS_SCANNED`] Annex-B NAL units in `data` and
/// returns true if one of them is an Access Unit Delimiter.
fn has_aud(data: &[u8]) -> bool {
    let mut offset = 0;
    for _ in 0..MAX_NALS_SCANNED {
        let Some(sc_len) = start_code_len(&data[offset..]) else {
            return false;
        };
        let nal_start = offset + sc_len;
        let Some(&header) = data.get(nal_start) else {
            return false;
        };
        if header & 0x1F == NAL_TYPE_AUD {
            return true;
        }

        // Advance to the next start code.
        let mut next = nal_start + 1;
        loop {
            match data[next..].windows(3).position(|w| w == [0, 0, 1]) {
                Some(rel) => {
                    next += rel;
                    break;
                }
                None => return false,
            }
        }
        offset = next;
    }
    false
}

/// Ensures `data` begins with an Annex-B start code and carries an AUD
/// NAL among its first few units, prepending one (`00 00 00 01 09 F0`)
/// when absent.
///
/// `is_first_frame` controls the no-start-code failure mode: on the
/// stream's first frame a missing start code is a hard error
/// (`InvalidH264`); on later frames it is passed through unchanged (the
/// caller should log a warning).
pub fn ensure_aud(data: &[u8], is_first_frame: bool) -> Result<Bytes, MissingStartCode> {
    if !has_start_code(data) {
        if is_first_frame {
            return Err(MissingStartCode);
        }
        return Ok(Bytes::copy_from_slice(data));
    }

    if has_aud(data) {
        Ok(Bytes::copy_from_slice(data))
    } else {
        let mut out = Vec::with_capacity(data.len() + AUD_PREFIX.len());
        out.extend_from_slice(&AUD_PREFIX);
        out.extend_from_slice(data);
        Ok(Bytes::from(out))
    }
}

/// Signals that the first H.264 frame on a stream had no Annex-B start
/// code; the caller maps this to `MuxError::InvalidH264`.
#[derive(Debug)]
pub struct MissingStartCode;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_aud_when_absent() {
        let frame = [0x00, 0x00, 0x00, 0x01, 0x65, 0xAA, 0xBB];
        let out = ensure_aud(&frame, true).unwrap();
        assert_eq!(&out[..6], &AUD_PREFIX);
        assert_eq!(&out[6..], &frame[..]);
    }

    #[test]
    fn leaves_frame_unchanged_when_aud_present() {
        let frame = [0x00, 0x00, 0x00, 0x01, 0x09, 0xF0, 0x00, 0x00, 0x00, 0x01, 0x65];
        let out = ensure_aud(&frame, true).unwrap();
        assert_eq!(&out[..], &frame[..]);
    }

    #[test]
    fn first_frame_without_start_code_is_an_error() {
        let frame = [0x65, 0xAA, 0xBB];
        assert!(ensure_aud(&frame, true).is_err());
    }

    #[test]
    fn later_frame_without_start_code_passes_through() {
        let frame = [0x65, 0xAA, 0xBB];
        let out = ensure_aud(&frame, false).unwrap();
        assert_eq!(&out[..], &frame[..]);
    }

    #[test]
    fn three_byte_start_code_is_recognized() {
        let frame = [0x00, 0x00, 0x01, 0x65];
        assert!(has_start_code(&frame));
    }
}
