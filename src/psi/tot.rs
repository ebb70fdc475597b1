//! Time Offset Table builder.
//!
//! TOT carries the current wall-clock time (UTC-3, Brazil's civil time,
//! which does not observe daylight saving) plus the Local Time Offset
//! descriptor. Unlike PAT/PMT/SDT/NIT, the TOT section has no
//! version/current_next/section-number fields — it is a short-form
//! section per ISO/IEC 13818-1, just a table id, length, and payload.

use crate::bitwriter::SectionWriter;
use crate::crc::Crc32Mpeg2;
use crate::error::Result;
use crate::psi::section::{packetize_section, TsPacket};
use chrono::{DateTime, Datelike, FixedOffset, Timelike};

/// Fixed PID carrying the TOT.
pub const TOT_PID: u16 = 0x0014;
const TOT_TABLE_ID: u8 = 0x73;

/// Brazil civil time, UTC-3, no daylight saving.
pub(crate) fn brazil_offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("fixed 3h offset is always valid")
}

fn to_bcd(value: u32) -> u8 {
    (((value / 10) % 10) << 4) as u8 | (value % 10) as u8
}

/// Encodes `dt` as the 5-byte MJD + BCD(hour, minute, second) field used
/// by TOT and the Local Time Offset descriptor's change-time field.
fn encode_mjd_bcd(dt: &DateTime<FixedOffset>) -> [u8; 5] {
    let y = dt.year();
    let m = dt.month() as i64;
    let d = dt.day() as i64;
    let l: i64 = if m == 1 || m == 2 { 1 } else { 0 };
    let mjd = 14956
        + d
        + (((y as i64 - l) as f64 * 365.25) as i64)
        + (((m as f64 + 1.0 + l as f64 * 12.0) * 30.6001) as i64);

    let mut out = [0u8; 5];
    out[0] = (mjd >> 8) as u8;
    out[1] = mjd as u8;
    out[2] = to_bcd(dt.hour());
    out[3] = to_bcd(dt.minute());
    out[4] = to_bcd(dt.second());
    out
}

/// Builds the TOT section for the given instant and splits it into TS
/// packets on [`TOT_PID`].
pub fn write_tot(now: DateTime<FixedOffset>, cc: &mut u8, crc: &Crc32Mpeg2) -> Result<Vec<TsPacket>> {
    let mut section = Vec::with_capacity(32);
    section.push(TOT_TABLE_ID);
    let length_offset = section.len();
    section.extend_from_slice(&[0, 0]);
    section.extend_from_slice(&encode_mjd_bcd(&now));

    let mut descriptors = SectionWriter::new();
    descriptors.write_u8(0x58); // local time offset descriptor
    let desc_len_offset = descriptors.offset();
    descriptors.write_u8(0); // placeholder
    descriptors.write_slice(b"BRA");
    descriptors.write_u8((0x03 << 2) | 0x2);
    descriptors.write_u16_be(0x0000); // local_time_offset: UTC-3 is carried by the MJD/BCD field itself
    descriptors.write_slice(&encode_mjd_bcd(&now)); // time_of_change: no scheduled offset change
    descriptors.write_u16_be(0x0100); // next_time_offset
    let desc_body_len = descriptors.len() - desc_len_offset - 1;
    descriptors.backpatch_u8(desc_len_offset, desc_body_len as u8);

    let desc_loop_len = 0xF000u16 | (descriptors.len() as u16 & 0x0FFF);
    section.extend_from_slice(&desc_loop_len.to_be_bytes());
    section.extend_from_slice(descriptors.as_slice());

    let body_len = (section.len() - (length_offset + 2) + 4) as u16;
    let len_field = 0xB000u16 | (body_len & 0x0FFF);
    section[length_offset] = (len_field >> 8) as u8;
    section[length_offset + 1] = len_field as u8;

    packetize_section(TOT_PID, cc, section, crc)
}
