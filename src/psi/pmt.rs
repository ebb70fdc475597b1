//! Program Map Table builder: per-stream-type descriptors and the PMT
//! section itself.

use crate::bitwriter::SectionWriter;
use crate::codec::{CodecKind, StreamMetadata};
use crate::crc::Crc32Mpeg2;
use crate::error::{MuxError, Result};
use crate::psi::descriptors::{
    write_aac_latm_descriptor, write_dvb_subtitle_descriptor, write_dvb_teletext_descriptor,
    write_eac3_descriptor, write_language_descriptor, write_registration_descriptor,
    SubtitleEntry, TeletextEntry,
};
use crate::psi::section::{packetize_section, SectionHeader, TsPacket};
use crate::service::Service;

const PMT_TABLE_ID: u8 = 0x02;
/// Safety margin subtracted from the 1024-byte section limit before a PMT
/// is considered to overflow, leaving headroom for the CRC and generic
/// header already accounted for elsewhere.
const PMT_OVERFLOW_MARGIN: usize = 32;

/// One elementary stream entry for [`write_pmt`].
pub struct PmtStream<'a> {
    /// Codec carried on this elementary stream.
    pub codec: CodecKind,
    /// This stream's transport PID.
    pub pid: u16,
    /// Language/disposition metadata driving this stream's descriptors.
    pub metadata: &'a StreamMetadata,
}

/// Builds the PMT section for `service` and splits it into TS packets on
/// `service.pmt_pid`, advancing `cc`.
pub fn write_pmt(
    service: &Service,
    streams: &[PmtStream<'_>],
    version: u8,
    cc: &mut u8,
    crc: &Crc32Mpeg2,
) -> Result<Vec<TsPacket>> {
    let mut section = Vec::with_capacity(256);
    let header = SectionHeader {
        table_id: PMT_TABLE_ID,
        table_id_extension: service.sid,
        version,
        current_next: true,
        section_number: 0,
        last_section_number: 0,
        reserved_nibble: 0xB,
    };
    let length_offset = header.write(&mut section);

    let pcr_pid = if service.pcr_pid == 0x1FFF {
        0x1FFF
    } else {
        service.pcr_pid
    };
    section.extend_from_slice(&(0xE000u16 | (pcr_pid & 0x1FFF)).to_be_bytes());

    let program_info_offset = section.len();
    section.extend_from_slice(&[0, 0]); // program_info_length placeholder

    let mut program_descriptors = SectionWriter::new();
    program_descriptors.write_u8(0x55); // parental rating
    program_descriptors.write_u8(4);
    program_descriptors.write_slice(b"BRA");
    program_descriptors.write_u8(0x01);
    section.extend_from_slice(program_descriptors.as_slice());
    let program_info_len = program_descriptors.len();
    let len_field = 0xF000u16 | (program_info_len as u16 & 0x0FFF);
    section[program_info_offset] = (len_field >> 8) as u8;
    section[program_info_offset + 1] = len_field as u8;

    for stream in streams {
        section.push(stream.codec.stream_type());
        section.extend_from_slice(&(0xE000u16 | (stream.pid & 0x1FFF)).to_be_bytes());

        let es_info_offset = section.len();
        section.extend_from_slice(&[0, 0]);
        let mut descriptors = SectionWriter::new();
        write_stream_descriptors(&mut descriptors, stream.codec, stream.metadata);
        section.extend_from_slice(descriptors.as_slice());
        let es_info_len = descriptors.len();
        let len_field = 0xF000u16 | (es_info_len as u16 & 0x0FFF);
        section[es_info_offset] = (len_field >> 8) as u8;
        section[es_info_offset + 1] = len_field as u8;
    }

    let body_len = section.len() - (length_offset + 2) + 4;
    if section.len() + 4 + PMT_OVERFLOW_MARGIN > crate::psi::section::MAX_SECTION_LEN {
        return Err(MuxError::PmtOverflow(service.sid));
    }
    header.patch_length(&mut section, length_offset, body_len);

    packetize_section(service.pmt_pid, cc, section, crc)
}

fn write_stream_descriptors(w: &mut SectionWriter, codec: CodecKind, metadata: &StreamMetadata) {
    match codec {
        CodecKind::Eac3 => write_eac3_descriptor(w),
        CodecKind::Aac { latm: true } => write_aac_latm_descriptor(w),
        CodecKind::Smpte302m => write_registration_descriptor(w, b"BSSD"),
        CodecKind::Dirac => write_registration_descriptor(w, b"drac"),
        CodecKind::SmpteKlv => write_registration_descriptor(w, b"KLVA"),
        CodecKind::DvbSubtitle => write_dvb_subtitle_descriptor(w, &subtitle_entries(metadata)),
        CodecKind::DvbTeletext => write_dvb_teletext_descriptor(w, &teletext_entries(metadata)),
        _ => {}
    }

    if codec.is_audio() && !metadata.languages.is_empty() {
        write_language_descriptor(w, &metadata.languages, metadata.disposition.audio_type());
    }
}

/// Builds one [`SubtitleEntry`] per language in `metadata`, drawing
/// `composition_page_id`/`ancillary_page_id`/`subtitling_type` from a
/// 5-byte-per-language chunk of `metadata.extradata` when enough bytes
/// remain, else falling back to the documented defaults (page ids = 1,
/// type 0x10, or 0x20 when the stream is marked hearing-impaired).
fn subtitle_entries(metadata: &StreamMetadata) -> Vec<SubtitleEntry> {
    let langs: Vec<[u8; 3]> = if metadata.languages.is_empty() {
        vec![*b"por"]
    } else {
        metadata.languages.clone()
    };
    let extradata = metadata.extradata.as_deref().unwrap_or(&[]);
    let mut offset = 0;
    langs
        .into_iter()
        .map(|lang| {
            if extradata.len() - offset >= 5 {
                let composition_page_id =
                    u16::from_be_bytes([extradata[offset], extradata[offset + 1]]);
                let ancillary_page_id =
                    u16::from_be_bytes([extradata[offset + 2], extradata[offset + 3]]);
                let subtitling_type = extradata[offset + 4];
                offset += 5;
                SubtitleEntry {
                    lang,
                    subtitling_type,
                    composition_page_id,
                    ancillary_page_id,
                }
            } else {
                SubtitleEntry {
                    lang,
                    subtitling_type: if metadata.disposition.hearing_impaired {
                        0x20
                    } else {
                        0x10
                    },
                    composition_page_id: 1,
                    ancillary_page_id: 1,
                }
            }
        })
        .collect()
}

/// Builds one [`TeletextEntry`] per language in `metadata`, drawing
/// `teletext_type`/`magazine_number`/`page_number` from a 2-byte-per-language
/// chunk of `metadata.extradata` when enough bytes remain, else falling back
/// to `teletext_type=0x01, magazine=0, page=0`.
fn teletext_entries(metadata: &StreamMetadata) -> Vec<TeletextEntry> {
    let langs: Vec<[u8; 3]> = if metadata.languages.is_empty() {
        vec![*b"por"]
    } else {
        metadata.languages.clone()
    };
    let extradata = metadata.extradata.as_deref().unwrap_or(&[]);
    let mut offset = 0;
    langs
        .into_iter()
        .map(|lang| {
            if extradata.len() - offset >= 2 {
                let byte0 = extradata[offset];
                let page_number = extradata[offset + 1];
                offset += 2;
                TeletextEntry {
                    lang,
                    teletext_type: byte0 >> 3,
                    magazine_number: byte0 & 0x7,
                    page_number,
                }
            } else {
                TeletextEntry {
                    lang,
                    teletext_type: 0x01,
                    magazine_number: 0,
                    page_number: 0,
                }
            }
        })
        .collect()
}
