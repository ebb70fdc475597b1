//! Service Description Table builder.

use crate::bitwriter::SectionWriter;
use crate::crc::Crc32Mpeg2;
use crate::error::Result;
use crate::psi::section::{packetize_section, TsPacket};
use crate::service::Service;

/// Fixed PID carrying the SDT.
pub const SDT_PID: u16 = 0x0011;
const SDT_TABLE_ID: u8 = 0x42;

/// Builds the SDT (actual transport stream, current) for `services` and
/// splits it into TS packets on [`SDT_PID`].
pub fn write_sdt(
    services: &[Service],
    transport_stream_id: u16,
    original_network_id: u16,
    version: u8,
    cc: &mut u8,
    crc: &Crc32Mpeg2,
) -> Result<Vec<TsPacket>> {
    let mut section = Vec::with_capacity(128);
    section.push(SDT_TABLE_ID);
    let length_offset = section.len();
    section.extend_from_slice(&[0, 0]);
    section.extend_from_slice(&transport_stream_id.to_be_bytes());
    section.push(0xC0 | ((version & 0x1F) << 1) | 1);
    section.push(0); // section_number
    section.push(0); // last_section_number
    section.extend_from_slice(&original_network_id.to_be_bytes());
    section.push(0xFF); // reserved_future_use

    for service in services {
        section.extend_from_slice(&service.sid.to_be_bytes());
        section.push(0xFC); // reserved + EIT flags (none scheduled/present)

        let mut descriptors = SectionWriter::new();
        descriptors.write_u8(0x48); // service descriptor
        let desc_len_offset = descriptors.offset();
        descriptors.write_u8(0); // placeholder
        descriptors.write_u8(0x01); // service_type: digital television
        descriptors.write_str8(&service.provider_name);
        descriptors.write_str8(&service.service_name);
        let desc_body_len = descriptors.len() - desc_len_offset - 1;
        descriptors.backpatch_u8(desc_len_offset, desc_body_len as u8);

        let running_status = 4u16; // running
        let free_ca = 0u16;
        let desc_loop_len = (running_status << 13) | (free_ca << 12) | (descriptors.len() as u16);
        section.extend_from_slice(&desc_loop_len.to_be_bytes());
        section.extend_from_slice(descriptors.as_slice());
    }

    let body_len = section.len() - (length_offset + 2) + 4;
    let len_field = 0xF000u16 | (body_len as u16 & 0x0FFF);
    section[length_offset] = (len_field >> 8) as u8;
    section[length_offset + 1] = len_field as u8;

    packetize_section(SDT_PID, cc, section, crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MuxerConfig;
    use crate::service::ServiceRegistry;

    #[test]
    fn sdt_carries_one_service_descriptor_per_service() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let registry = ServiceRegistry::build(&config, &[]).unwrap();
        let crc = Crc32Mpeg2::new();
        let mut cc = 0u8;
        let packets = write_sdt(&registry.services, 1, 1, 0, &mut cc, &crc).unwrap();
        assert_eq!(packets[0][0], 0x47);
    }
}
