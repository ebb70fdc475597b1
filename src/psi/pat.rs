//! Program Association Table builder.

use crate::crc::Crc32Mpeg2;
use crate::error::Result;
use crate::psi::section::{packetize_section, SectionHeader, TsPacket};
use crate::service::Service;

/// Fixed PID carrying the PAT.
pub const PAT_PID: u16 = 0x0000;
const PAT_TABLE_ID: u8 = 0x00;

/// Builds the PAT section for `services` and splits it into TS packets on
/// [`PAT_PID`], advancing `cc`.
pub fn write_pat(
    services: &[Service],
    transport_stream_id: u16,
    version: u8,
    cc: &mut u8,
    crc: &Crc32Mpeg2,
) -> Result<Vec<TsPacket>> {
    let mut section = Vec::with_capacity(32);
    let header = SectionHeader {
        table_id: PAT_TABLE_ID,
        table_id_extension: transport_stream_id,
        version,
        current_next: true,
        section_number: 0,
        last_section_number: 0,
        reserved_nibble: 0xB,
    };
    let length_offset = header.write(&mut section);

    for service in services {
        section.extend_from_slice(&service.sid.to_be_bytes());
        let entry = 0xE000u16 | (service.pmt_pid & 0x1FFF);
        section.extend_from_slice(&entry.to_be_bytes());
    }

    let body_len = section.len() - (length_offset + 2) + 4; // + CRC
    header.patch_length(&mut section, length_offset, body_len);

    packetize_section(PAT_PID, cc, section, crc)
}
