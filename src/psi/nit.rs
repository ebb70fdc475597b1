//! Network Information Table builder, with ISDB-Tb extension descriptors.

use crate::bitwriter::SectionWriter;
use crate::config::MuxerConfig;
use crate::crc::Crc32Mpeg2;
use crate::error::Result;
use crate::psi::section::{packetize_section, SectionHeader, TsPacket};
use crate::service::Service;

/// Fixed PID carrying the NIT.
pub const NIT_PID: u16 = 0x0010;
const NIT_TABLE_ID: u8 = 0x40;

/// Builds the NIT (actual network) section for `services` and the
/// transport described by `config`, splitting it into TS packets on
/// [`NIT_PID`].
pub fn write_nit(
    config: &MuxerConfig,
    services: &[Service],
    transport_stream_id: u16,
    version: u8,
    cc: &mut u8,
    crc: &Crc32Mpeg2,
) -> Result<Vec<TsPacket>> {
    let mut section = Vec::with_capacity(256);
    let header = SectionHeader {
        table_id: NIT_TABLE_ID,
        table_id_extension: config.original_network_id,
        version,
        current_next: true,
        section_number: 0,
        last_section_number: 0,
        reserved_nibble: 0xB,
    };
    let length_offset = header.write(&mut section);

    let mut network_descriptors = SectionWriter::new();
    network_descriptors.write_u8(0x40); // network name
    network_descriptors.write_str8(&config.network_name);
    network_descriptors.write_u8(0xFE); // system management
    network_descriptors.write_u8(0x02);
    network_descriptors.write_u8(0x03);
    network_descriptors.write_u8(0x01);

    let network_desc_len = network_descriptors.len() as u16;
    section.extend_from_slice(&(0xF000u16 | (network_desc_len & 0x0FFF)).to_be_bytes());
    section.extend_from_slice(network_descriptors.as_slice());

    let ts_loop_len_offset = section.len();
    section.extend_from_slice(&[0, 0]); // transport_stream_loop_length placeholder

    section.extend_from_slice(&transport_stream_id.to_be_bytes());
    section.extend_from_slice(&config.original_network_id.to_be_bytes());

    let transport_desc_len_offset = section.len();
    section.extend_from_slice(&[0, 0]); // transport_descriptors_length placeholder

    let mut transport_descriptors = SectionWriter::new();
    write_ts_information_descriptor(&mut transport_descriptors, config, services);
    write_service_list_descriptor(&mut transport_descriptors, services);
    write_partial_reception_descriptor(&mut transport_descriptors, services);
    write_terrestrial_delivery_descriptor(&mut transport_descriptors, config);
    section.extend_from_slice(transport_descriptors.as_slice());

    let transport_desc_len = transport_descriptors.len() as u16;
    section[transport_desc_len_offset] = (0xF0 | (transport_desc_len >> 8)) as u8;
    section[transport_desc_len_offset + 1] = transport_desc_len as u8;

    let ts_loop_len = (section.len() - (ts_loop_len_offset + 2)) as u16;
    section[ts_loop_len_offset] = (0xF0 | (ts_loop_len >> 8)) as u8;
    section[ts_loop_len_offset + 1] = ts_loop_len as u8;

    let body_len = section.len() - (length_offset + 2) + 4;
    header.patch_length(&mut section, length_offset, body_len);

    packetize_section(NIT_PID, cc, section, crc)
}

/// TS Information descriptor (`0xCD`): remote control key id, ts name, and
/// one `(transmission_type_info, SID)` entry per service. The 1-seg test
/// is `(sid >> 3) & 0x3 == 0x3`, applied consistently — see
/// [`Service::is_one_seg_sid`] for why this is not the precedence-bugged
/// form the reference implementation uses in this one call site.
fn write_ts_information_descriptor(w: &mut SectionWriter, config: &MuxerConfig, services: &[Service]) {
    w.write_u8(0xCD);
    let len_offset = w.offset();
    w.write_u8(0); // placeholder
    w.write_u8(config.virtual_channel as u8);
    let name = config.network_name.as_bytes();
    let name_len = name.len().min(0x3F);
    w.write_u8(((name_len as u8) << 2) | 0x2); // transmission_type_count = 2
    w.write_slice(&name[..name_len]);
    for service in services {
        let transmission_type = if Service::is_one_seg_sid(service.sid) {
            0xAF
        } else {
            0x0F
        };
        w.write_u8(transmission_type);
        w.write_u8(0x01); // number of services in this transmission type
        w.write_u16_be(service.sid);
    }
    let body_len = w.len() - len_offset - 1;
    w.backpatch_u8(len_offset, body_len as u8);
}

/// Service List descriptor (`0x41`): `(SID, service_type)` per service.
fn write_service_list_descriptor(w: &mut SectionWriter, services: &[Service]) {
    w.write_u8(0x41);
    w.write_u8((services.len() * 3) as u8);
    for service in services {
        w.write_u16_be(service.sid);
        w.write_u8(0x01);
    }
}

/// Partial Reception descriptor (`0xFB`): one SID per 1-seg service.
fn write_partial_reception_descriptor(w: &mut SectionWriter, services: &[Service]) {
    let one_seg: Vec<&Service> = services.iter().filter(|s| s.is_one_seg).collect();
    if one_seg.is_empty() {
        return;
    }
    w.write_u8(0xFB);
    w.write_u8((one_seg.len() * 2) as u8);
    for service in one_seg {
        w.write_u16_be(service.sid);
    }
}

/// Terrestrial Delivery System descriptor (`0xFA`): area/guard/mode field
/// and RF frequency, encoded in units of 1/7 MHz. `guard_interval` and
/// `transmission_mode` pack their raw 1..4 option value directly (their enum
/// discriminants already carry that value), matching the reference
/// implementation's `area_code<<4 | guard_interval<<2 | transmission_mode`.
fn write_terrestrial_delivery_descriptor(w: &mut SectionWriter, config: &MuxerConfig) {
    w.write_u8(0xFA);
    w.write_u8(4);

    let area_guard_mode = (config.area_code << 4)
        | ((config.guard_interval as u16) << 2)
        | config.transmission_mode as u16;
    w.write_u16_be(area_guard_mode);

    // Integer division truncates 1/7 to 0, matching the reference
    // implementation's `(473 + 6*(ch-14) + 1/7) * 7`.
    let base_mhz = 473 + 6 * (config.physical_channel as i32 - 14);
    let frequency = (base_mhz * 7) as u16;
    w.write_u16_be(frequency);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MuxerConfig;
    use crate::service::ServiceRegistry;

    #[test]
    fn channel_14_frequency_matches_documented_example() {
        let config = MuxerConfig::new();
        assert_eq!(config.physical_channel, 20);
        let mut cfg = config.clone();
        cfg.physical_channel = 14;
        let mut w = SectionWriter::new();
        write_terrestrial_delivery_descriptor(&mut w, &cfg);
        // bytes: tag, len, area/guard/mode (2), frequency (2)
        let freq = u16::from_be_bytes([w.as_slice()[4], w.as_slice()[5]]);
        assert_eq!(freq, 3311);
    }

    #[test]
    fn area_guard_mode_packs_raw_option_values_not_zero_indexed_codes() {
        use crate::config::{GuardInterval, TransmissionMode};
        let mut cfg = MuxerConfig::new();
        cfg.area_code = 1;
        cfg.guard_interval = GuardInterval::OneOver32; // raw value 1
        cfg.transmission_mode = TransmissionMode::Mode1; // raw value 1
        let mut w = SectionWriter::new();
        write_terrestrial_delivery_descriptor(&mut w, &cfg);
        let area_guard_mode = u16::from_be_bytes([w.as_slice()[2], w.as_slice()[3]]);
        assert_eq!(area_guard_mode, 0x15);
    }

    #[test]
    fn area_guard_mode_matches_default_config() {
        let cfg = MuxerConfig::new(); // area_code=1, guard=OneOver32(1), mode=Mode3(3)
        let mut w = SectionWriter::new();
        write_terrestrial_delivery_descriptor(&mut w, &cfg);
        let area_guard_mode = u16::from_be_bytes([w.as_slice()[2], w.as_slice()[3]]);
        assert_eq!(area_guard_mode, 0x17);
    }

    #[test]
    fn nit_builds_without_error() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let registry = ServiceRegistry::build(&config, &[]).unwrap();
        let crc = Crc32Mpeg2::new();
        let mut cc = 0u8;
        let packets = write_nit(&config, &registry.services, 1, 0, &mut cc, &crc).unwrap();
        assert_eq!(packets[0][0], 0x47);
    }

    #[test]
    fn one_seg_sid_test_matches_corrected_form() {
        // SID with bits 3-4 == 0b11 is 1-seg.
        let sid = 0b11000u16; // (sid >> 3) & 0x3 == 0b11
        assert!(Service::is_one_seg_sid(sid));
        assert!(!Service::is_one_seg_sid(0));
    }
}
