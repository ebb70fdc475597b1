//! PES packetization: wrapping an access unit into a PES packet and
//! splitting it across TS packets with adaptation-field PCR, random-access
//! indication, and stuffing.
//!
//! Scheduling concerns — whether this emission carries a PCR, whether a
//! key frame needs `random_access_indicator`, and the CBR null/PCR-only
//! packet substitution — are decided by [`crate::muxer`] and passed in
//! here as already-resolved values; this module only knows how to turn
//! one PES into the TS packets that carry it.

use crate::codec::CodecKind;
use crate::psi::section::TsPacket;

const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;

/// Stream id byte selection for the PES header, per the stream-id table:
/// video streams use `0xE0` (or `0xFD` for Dirac and for AC-3 under
/// M2TS), audio (MPEG/AAC) uses `0xC0`, everything else is private
/// stream 1 (`0xBD`).
pub fn stream_id_for(codec: CodecKind, m2ts_mode: bool) -> u8 {
    match codec {
        CodecKind::Dirac => 0xFD,
        CodecKind::Ac3 | CodecKind::Eac3 if m2ts_mode => 0xFD,
        CodecKind::Mpeg2Video
        | CodecKind::Mpeg4Video
        | CodecKind::H264
        | CodecKind::H265
        | CodecKind::Cavs => 0xE0,
        CodecKind::Mp1Mp2Audio | CodecKind::Mp3 | CodecKind::Aac { .. } => 0xC0,
        _ => 0xBD,
    }
}

/// Inputs needed to build one PES packet's header.
pub struct PesHeaderSpec {
    /// Codec carried in this PES packet; selects the stream id and any
    /// codec-specific header quirks (subtitle/teletext/Dirac/AC-3).
    pub codec: CodecKind,
    /// Presentation timestamp, 90 kHz units.
    pub pts: Option<i64>,
    /// Decode timestamp, 90 kHz units. Omitted from the header when equal
    /// to `pts`.
    pub dts: Option<i64>,
    /// Whether M2TS (Blu-ray/AVCHD) framing conventions apply.
    pub m2ts_mode: bool,
}

/// Writes a 33-bit timestamp (PTS or DTS) as 5 bytes with the marker bit
/// pattern required by ISO/IEC 13818-1: `4bits marker | ts[32:30] | 1`,
/// then two 15-bit groups each terminated by a marker bit.
fn write_timestamp(buf: &mut Vec<u8>, marker_nibble: u8, ts: i64) {
    let ts = ts as u64 & 0x1_FFFF_FFFF;
    buf.push((marker_nibble << 4) | (((ts >> 30) & 0x7) as u8) << 1 | 1);
    let mid = ((ts >> 15) & 0x7FFF) as u16;
    buf.push((mid >> 7) as u8);
    buf.push((((mid & 0x7F) as u8) << 1) | 1);
    let low = (ts & 0x7FFF) as u16;
    buf.push((low >> 7) as u8);
    buf.push((((low & 0x7F) as u8) << 1) | 1);
}

/// Builds the PES header + payload as one contiguous buffer, ready to be
/// split into TS packets by [`emit_pes`].
///
/// DVB subtitle payloads are wrapped with a `0x20 0x00` prefix and a
/// trailing `0xFF` end-of-PES-data-field marker; DVB teletext PES headers
/// are padded with stuffing bytes to a fixed 0x24-byte header, matching
/// broadcast teletext framing conventions.
pub fn build_pes(spec: &PesHeaderSpec, payload: &[u8]) -> Vec<u8> {
    let is_subtitle = matches!(spec.codec, CodecKind::DvbSubtitle);
    let is_teletext = matches!(spec.codec, CodecKind::DvbTeletext);
    let is_data_aligned = is_subtitle || is_teletext || matches!(spec.codec, CodecKind::SmpteKlv);
    let is_dirac = matches!(spec.codec, CodecKind::Dirac);
    let is_m2ts_ac3 =
        spec.m2ts_mode && matches!(spec.codec, CodecKind::Ac3 | CodecKind::Eac3);
    let needs_extension = is_dirac || is_m2ts_ac3;

    let mut flags = 0u8;
    if spec.pts.is_some() {
        flags |= 0x80;
    }
    if spec.dts.is_some() && spec.dts != spec.pts {
        flags |= 0x40;
    }
    if needs_extension {
        flags |= 0x01;
    }

    let mut optional = Vec::new();
    if spec.pts.is_some() && flags & 0xC0 == 0x80 {
        write_timestamp(&mut optional, 0b0010, spec.pts.unwrap());
    } else if spec.pts.is_some() && flags & 0xC0 == 0xC0 {
        write_timestamp(&mut optional, 0b0011, spec.pts.unwrap());
        write_timestamp(&mut optional, 0b0001, spec.dts.unwrap());
    }
    if needs_extension {
        optional.push(0x81); // PES_extension_flag marker byte + length
        optional.push(if is_dirac { 0x60 } else { 0x71 });
    }

    let mut header_data_length = optional.len();
    if is_teletext {
        // Pad the fixed PES-header region (9 bytes of mandatory fields +
        // optional fields) to a total of 0x24 bytes with stuffing.
        let mandatory = 9;
        let target_total = 0x24;
        if mandatory + header_data_length < target_total {
            let stuffing = target_total - mandatory - header_data_length;
            optional.resize(optional.len() + stuffing, 0xFF);
            header_data_length += stuffing;
        }
    }

    let mut out = Vec::with_capacity(9 + header_data_length + payload.len() + 8);
    out.extend_from_slice(&[0x00, 0x00, 0x01]);
    out.push(stream_id_for(spec.codec, spec.m2ts_mode));

    let total_payload_len = payload.len() + if is_subtitle { 3 } else { 0 };
    let packet_length = 3 + header_data_length + total_payload_len;
    if packet_length > 0xFFFF {
        out.extend_from_slice(&[0, 0]);
    } else {
        out.extend_from_slice(&(packet_length as u16).to_be_bytes());
    }

    let marker_byte = 0x80 | (if is_data_aligned { 0x04 } else { 0x00 });
    out.push(marker_byte);
    out.push(flags);
    out.push(header_data_length as u8);
    out.extend_from_slice(&optional);

    if is_subtitle {
        out.extend_from_slice(&[0x20, 0x00]);
        out.extend_from_slice(payload);
        out.push(0xFF);
    } else {
        out.extend_from_slice(payload);
    }

    out
}

/// Writes the 48-bit PCR field (33-bit base × 300 + 6 reserved bits
/// (`0x7E`) + 9-bit extension).
pub fn write_pcr_field(buf: &mut Vec<u8>, pcr_27mhz: u64) {
    let base = (pcr_27mhz / 300) & 0x1_FFFF_FFFF;
    let ext = (pcr_27mhz % 300) as u16;
    buf.push((base >> 25) as u8);
    buf.push((base >> 17) as u8);
    buf.push((base >> 9) as u8);
    buf.push((base >> 1) as u8);
    buf.push((((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01));
    buf.push(ext as u8);
}

/// Splits `pes` (the full header+payload buffer from [`build_pes`]) into
/// TS packets on `pid`, advancing `cc` once per payload-bearing packet.
/// The first packet carries `payload_unit_start_indicator`; if `pcr` is
/// set it is written into that packet's adaptation field, and if
/// `random_access` is set the random_access_indicator bit is set
/// alongside it.
pub fn emit_pes(
    pid: u16,
    cc: &mut u8,
    pes: &[u8],
    pcr: Option<u64>,
    random_access: bool,
) -> Vec<TsPacket> {
    let mut packets = Vec::new();
    let mut offset = 0;
    let mut first = true;

    while offset < pes.len() || first {
        let mut packet = [0u8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = ((first as u8) << 6) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = pid as u8;

        let remaining = pes.len() - offset;
        let needs_af = first && (pcr.is_some() || random_access);

        let mut write_pos;
        if needs_af {
            let mut flags = 0u8;
            if random_access {
                flags |= 0x40;
            }
            if pcr.is_some() {
                flags |= 0x10;
            }

            let base_af_len = 1 + if pcr.is_some() { 6 } else { 0 };
            let max_payload_at_min_af = TS_PACKET_SIZE - 4 - 1 - base_af_len;
            let (af_length, take) = if remaining >= max_payload_at_min_af {
                (base_af_len, max_payload_at_min_af)
            } else {
                (base_af_len + (max_payload_at_min_af - remaining), remaining)
            };

            packet[3] = 0x30 | (*cc & 0x0F); // AFC = both adaptation and payload
            packet[4] = af_length as u8;
            packet[5] = flags;
            let mut w = 6;
            if let Some(pcr_value) = pcr {
                let mut pcr_buf = Vec::with_capacity(6);
                write_pcr_field(&mut pcr_buf, pcr_value);
                packet[w..w + 6].copy_from_slice(&pcr_buf);
                w += 6;
            }
            for b in packet.iter_mut().take(5 + af_length).skip(w) {
                *b = 0xFF;
            }
            write_pos = 5 + af_length;
            packet[write_pos..write_pos + take].copy_from_slice(&pes[offset..offset + take]);
            offset += take;
            *cc = (*cc + 1) & 0x0F;
        } else {
            packet[3] = 0x10 | (*cc & 0x0F); // payload only
            write_pos = 4;
            let available = TS_PACKET_SIZE - write_pos;
            let take = remaining.min(available);
            if take < available {
                // Short final packet: pad via an adaptation field whose
                // stuffing bytes are 0xFF, per the section/PES stuffing rule.
                let stuffing_len = available - take;
                packet[3] = 0x30 | (*cc & 0x0F);
                packet[4] = (stuffing_len - 1) as u8;
                if stuffing_len >= 2 {
                    packet[5] = 0x00;
                    for b in packet.iter_mut().take(5 + stuffing_len).skip(6) {
                        *b = 0xFF;
                    }
                }
                write_pos = 4 + stuffing_len;
            }
            packet[write_pos..write_pos + take].copy_from_slice(&pes[offset..offset + take]);
            offset += take;
            *cc = (*cc + 1) & 0x0F;
        }

        first = false;
        packets.push(packet);
        if offset >= pes.len() {
            break;
        }
    }

    packets
}

/// Builds a null packet (PID `0x1FFF`, payload-only, stuffed with
/// `0xFF`), used by the muxer to pad a CBR stream when no PES is ready.
pub fn null_packet() -> TsPacket {
    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = 0x1F;
    packet[2] = 0xFF;
    packet[3] = 0x10;
    packet
}

/// Builds a PCR-only packet on `pid` (adaptation field only, no payload).
/// Per ISO/IEC 13818-1 §2.4.3.3 the continuity counter is **not**
/// incremented for adaptation-field-only packets, so `cc` is read, not
/// mutated.
pub fn pcr_only_packet(pid: u16, cc: u8, pcr_27mhz: u64) -> TsPacket {
    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = (pid >> 8) as u8 & 0x1F;
    packet[2] = pid as u8;
    packet[3] = 0x20 | (cc & 0x0F); // adaptation field only
    packet[4] = 183;
    packet[5] = 0x10; // PCR_flag
    let mut pcr_buf = Vec::with_capacity(6);
    write_pcr_field(&mut pcr_buf, pcr_27mhz);
    packet[6..12].copy_from_slice(&pcr_buf);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_pes_fits_in_one_packet() {
        let spec = PesHeaderSpec {
            codec: CodecKind::H264,
            pts: Some(90_000),
            dts: None,
            m2ts_mode: false,
        };
        let pes = build_pes(&spec, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let mut cc = 0u8;
        let packets = emit_pes(0x100, &mut cc, &pes, None, true);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][0], 0x47);
        assert_eq!(packets[0][1] & 0x40, 0x40); // PUSI
    }

    #[test]
    fn pes_larger_than_one_packet_splits_with_single_pusi() {
        let spec = PesHeaderSpec {
            codec: CodecKind::H264,
            pts: Some(90_000),
            dts: None,
            m2ts_mode: false,
        };
        let payload = vec![0xAB; 500];
        let pes = build_pes(&spec, &payload);
        let mut cc = 0u8;
        let packets = emit_pes(0x100, &mut cc, &pes, None, false);
        assert!(packets.len() >= 2);
        assert_eq!(packets[0][1] & 0x40, 0x40);
        for p in &packets[1..] {
            assert_eq!(p[1] & 0x40, 0);
        }
    }

    #[test]
    fn pcr_packet_carries_pcr_flag_and_does_not_advance_cc() {
        let pkt = pcr_only_packet(0x100, 5, 123_456);
        assert_eq!(pkt[3] & 0x0F, 5);
        assert_eq!(pkt[3] & 0x30, 0x20);
        assert_eq!(pkt[5] & 0x10, 0x10);
    }

    #[test]
    fn null_packet_uses_reserved_pid() {
        let pkt = null_packet();
        let pid = (((pkt[1] as u16) & 0x1F) << 8) | pkt[2] as u16;
        assert_eq!(pid, 0x1FFF);
    }

    #[test]
    fn pts_only_timestamp_has_correct_marker_bits() {
        let mut buf = Vec::new();
        write_timestamp(&mut buf, 0b0010, 90_000);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0] >> 4, 0b0010);
        assert_eq!(buf[0] & 1, 1);
        assert_eq!(buf[2] & 1, 1);
        assert_eq!(buf[4] & 1, 1);
    }
}
