//! Service/stream registry: service composition, SID computation, and PID
//! assignment.

use crate::codec::StreamConfig;
use crate::config::{MuxerConfig, TransmissionProfile};
use crate::error::{MuxError, Result};

/// PMT PID mask per ABNT NBR 15608 §27.4: `0x1FC8 | (sid & 0x03)`.
const PMT_PID_BASE: u16 = 0x1FC8;

/// A logical program: a service id, human-readable names, a PMT PID, and
/// a PCR PID assigned once the first eligible stream is seen.
#[derive(Debug, Clone)]
pub struct Service {
    /// Service id (16 bits).
    pub sid: u16,
    /// Service provider name.
    pub provider_name: String,
    /// Service name.
    pub service_name: String,
    /// PID carrying this service's PMT.
    pub pmt_pid: u16,
    /// PCR PID; `0x1FFF` means "not yet assigned".
    pub pcr_pid: u16,
    /// 1-seg (low-definition partial reception) service, for the ISDB-Tb
    /// TS Information / Partial Reception NIT descriptors.
    pub is_one_seg: bool,
    /// Packets carried since the last PCR was written on this service's
    /// PCR PID.
    pub pcr_packet_count: u32,
    /// How many packets on the PCR PID between two PCR writes.
    pub pcr_packet_period: u32,
    /// Elementary streams owned by this service, as indices into the
    /// muxer's stream table.
    pub stream_indices: Vec<usize>,
}

impl Service {
    fn new(sid: u16, provider_name: String, service_name: String, is_one_seg: bool) -> Self {
        Self {
            sid,
            provider_name,
            service_name,
            pmt_pid: PMT_PID_BASE | (sid & 0x03),
            pcr_pid: 0x1FFF,
            is_one_seg,
            pcr_packet_count: 0,
            pcr_packet_period: 1,
            stream_indices: Vec::new(),
        }
    }

    /// True when the 1-seg transmission-type test
    /// `(sid >> 3) & 0x3 == 0x3` holds for this service's SID. Used by the
    /// NIT TS Information descriptor and the Partial Reception descriptor.
    /// The reference implementation computes this with an operator
    /// precedence bug in one call site (`sid & 0x18 >> 3`, which evaluates
    /// `0x18 >> 3` first and always yields a nonzero mask); we implement
    /// the correctly parenthesized form everywhere.
    pub fn is_one_seg_sid(sid: u16) -> bool {
        (sid >> 3) & 0x3 == 0x3
    }
}

/// A registered elementary stream with its assigned PID and owning
/// service index.
#[derive(Debug, Clone)]
pub struct RegisteredStream {
    /// Original stream configuration supplied by the caller.
    pub config: StreamConfig,
    /// Assigned 13-bit PID.
    pub pid: u16,
    /// Index into `ServiceRegistry::services`.
    pub service_index: usize,
}

/// Builds the service set and assigns PIDs at header-write time.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    /// Every service in the current composition.
    pub services: Vec<Service>,
    /// Every registered elementary stream, indexed the same way as the
    /// stream list passed to `write_header`.
    pub streams: Vec<RegisteredStream>,
}

impl ServiceRegistry {
    /// Builds the default service composition for `config.transmission_profile`
    /// and assigns every stream in `stream_configs` to a service and PID.
    pub fn build(config: &MuxerConfig, stream_configs: &[StreamConfig]) -> Result<Self> {
        let services = match config.transmission_profile {
            TransmissionProfile::Profile1 | TransmissionProfile::Profile2 => {
                let onid = config.original_network_id & 0x7FF;
                let hd_sid = (onid << 5) | (0u16 << 3) | 0;
                let ld_sid = (onid << 5) | (0x3u16 << 3) | 0x1;
                vec![
                    Service::new(
                        hd_sid,
                        config.service_provider.clone(),
                        config.service_name.clone(),
                        Service::is_one_seg_sid(hd_sid),
                    ),
                    Service::new(
                        ld_sid,
                        config.service_provider.clone(),
                        format!("{} (1seg)", config.service_name),
                        Service::is_one_seg_sid(ld_sid),
                    ),
                ]
            }
        };
        let nb_services = services.len();

        let mut registry = ServiceRegistry {
            services,
            streams: Vec::new(),
        };

        let mut seen_pids = std::collections::HashSet::new();
        for pid in registry.services.iter().map(|s| s.pmt_pid) {
            seen_pids.insert(pid);
        }

        for (index, stream_config) in stream_configs.iter().enumerate() {
            let pid = assign_pid(config, stream_config.id, index)?;
            if !seen_pids.insert(pid) {
                return Err(MuxError::DuplicatePid(pid));
            }

            let service_index = index % nb_services;
            registry.streams.push(RegisteredStream {
                config: stream_config.clone(),
                pid,
                service_index,
            });
            registry.services[service_index].stream_indices.push(index);

            if registry.services[service_index].pcr_pid == 0x1FFF
                && stream_config.codec.is_video()
            {
                registry.services[service_index].pcr_pid = pid;
            }
        }

        // If a service saw no video stream, its first stream becomes the
        // PCR carrier.
        for service in registry.services.iter_mut() {
            if service.pcr_pid == 0x1FFF {
                if let Some(&first) = service.stream_indices.first() {
                    service.pcr_pid = registry.streams[first].pid;
                }
            }
        }

        Ok(registry)
    }

    /// Returns the service owning `stream_index`, if any.
    pub fn service_for_stream(&self, stream_index: usize) -> Option<&Service> {
        self.streams
            .get(stream_index)
            .map(|s| &self.services[s.service_index])
    }
}

/// Maps a caller-supplied stream id to a 13-bit transport PID, per
/// §4.5: ids below 16 are offsets from `start_pid`, ids below `0x1FFF`
/// are used verbatim, anything else is rejected.
fn assign_pid(config: &MuxerConfig, id: u16, index: usize) -> Result<u16> {
    if id < 16 {
        Ok(config.start_pid + index as u16)
    } else if id < 0x1FFF {
        Ok(id)
    } else {
        Err(MuxError::InvalidStreamId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;

    #[test]
    fn profile1_creates_two_services_with_expected_sids() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let registry = ServiceRegistry::build(&config, &[]).unwrap();
        assert_eq!(registry.services.len(), 2);
        assert_eq!(registry.services[0].sid, 1 << 5);
        assert_eq!(registry.services[1].sid, (1 << 5) | (0x3 << 3) | 0x1);
        assert!(!registry.services[0].is_one_seg);
        assert!(registry.services[1].is_one_seg);
    }

    #[test]
    fn pmt_pid_formula() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let registry = ServiceRegistry::build(&config, &[]).unwrap();
        for service in &registry.services {
            assert_eq!(service.pmt_pid, PMT_PID_BASE | (service.sid & 0x03));
        }
    }

    #[test]
    fn first_video_stream_becomes_pcr_pid() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let streams = vec![
            StreamConfig::new(CodecKind::H264, 0x100),
            StreamConfig::new(CodecKind::Aac { latm: false }, 0x101),
        ];
        let registry = ServiceRegistry::build(&config, &streams).unwrap();
        assert_eq!(registry.services[0].pcr_pid, 0x100);
    }

    #[test]
    fn duplicate_pid_is_rejected() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let streams = vec![
            StreamConfig::new(CodecKind::H264, 0x100),
            StreamConfig::new(CodecKind::Aac { latm: false }, 0x100),
        ];
        let err = ServiceRegistry::build(&config, &streams).unwrap_err();
        assert!(matches!(err, MuxError::DuplicatePid(0x100)));
    }

    #[test]
    fn invalid_stream_id_is_rejected() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let streams = vec![StreamConfig::new(CodecKind::H264, 0x1FFF)];
        let err = ServiceRegistry::build(&config, &streams).unwrap_err();
        assert!(matches!(err, MuxError::InvalidStreamId(0x1FFF)));
    }

    #[test]
    fn stream_id_below_16_is_offset_from_start_pid() {
        let config = MuxerConfig::new().with_ids(1, 1);
        let streams = vec![StreamConfig::new(CodecKind::H264, 2)];
        let registry = ServiceRegistry::build(&config, &streams).unwrap();
        assert_eq!(registry.streams[0].pid, config.start_pid);
    }
}
