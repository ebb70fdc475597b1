//! Muxer configuration.
//!
//! Replaces the option field-offset table of the original implementation
//! with a typed record. Every field here corresponds to one configuration
//! option the muxer accepts; defaults match the documented defaults.

/// Guard interval for the ISDB-Tb terrestrial delivery system descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardInterval {
    /// 1/32 of the useful symbol duration.
    OneOver32 = 1,
    /// 1/16.
    OneOver16 = 2,
    /// 1/8.
    OneOver8 = 3,
    /// 1/4.
    OneOver4 = 4,
}

/// ISDB-T transmission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    /// Mode 1 (2K carriers).
    Mode1 = 1,
    /// Mode 2 (4K carriers).
    Mode2 = 2,
    /// Mode 3 (8K carriers).
    Mode3 = 3,
    /// Undefined/unspecified.
    Undefined = 4,
}

/// Service composition profile selected at header-write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionProfile {
    /// Two services: one HD/full-seg, one 1-seg (LD).
    Profile1 = 1,
    /// Reserved for future profiles; currently behaves like `Profile1`.
    Profile2 = 2,
}

/// `m2ts_mode` tri-state: force on/off, or auto-detect from the output
/// file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum M2tsMode {
    /// Force M2TS framing off.
    Off,
    /// Force M2TS framing on.
    On,
    /// Detect from `MuxerConfig::output_extension`.
    Auto,
}

/// `copyts` tri-state: apply the constant PTS/DTS offset, or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyTs {
    /// Apply the `max_delay` offset (default behavior).
    Apply,
    /// Disable the offset; timestamps pass through unchanged.
    Disabled,
}

/// Reemit/LATM flag bits, mirroring the original `flags` bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxerFlags {
    /// Force PAT/PMT/SDT/NIT/TOT retransmission on the next opportunity.
    pub reemit_pat_pmt: bool,
    /// Carry AAC as LATM rather than ADTS in the PMT stream type.
    pub aac_latm: bool,
}

/// Full muxer configuration, one field per option in the external
/// interface.
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Transport stream id. Accepted and range-checked, but the muxer
    /// unconditionally sets the effective TSID to `original_network_id`
    /// at header-write time, matching the reference implementation.
    pub transport_stream_id: u16,
    /// Original network id (ONID). Feeds SID computation and NIT framing.
    pub original_network_id: u16,
    /// Service id used when building a non-default service set.
    pub service_id: u16,
    /// Number of services to create (1..=4).
    pub final_nb_services: u8,
    /// ISDB-Tb area code (1..=0x0DBF).
    pub area_code: u16,
    /// Guard interval for the terrestrial delivery descriptor.
    pub guard_interval: GuardInterval,
    /// Transmission mode for the terrestrial delivery descriptor.
    pub transmission_mode: TransmissionMode,
    /// Service composition profile.
    pub transmission_profile: TransmissionProfile,
    /// Physical (RF) channel, 14..=69.
    pub physical_channel: u8,
    /// Virtual (logical) channel, 1..=0x0D45.
    pub virtual_channel: u16,
    /// First PMT PID, 0x0010..=0x1F00.
    pub pmt_start_pid: u16,
    /// First elementary-stream PID for streams whose caller id is < 16.
    pub start_pid: u16,
    /// M2TS framing mode.
    pub m2ts_mode: M2tsMode,
    /// Output file extension, consulted only when `m2ts_mode` is `Auto`.
    pub output_extension: Option<String>,
    /// Target mux rate in bits/second; 1 denotes VBR.
    pub mux_rate: u32,
    /// Target PES payload size in bytes, rounded up to a whole number of
    /// TS packets at header-write time.
    pub pes_payload_size: usize,
    /// Reemit/LATM flags.
    pub flags: MuxerFlags,
    /// PTS/DTS offset behavior.
    pub copyts: CopyTs,
    /// PSI/SI table version (0..=31).
    pub tables_version: u8,
    /// Maximum end-to-end delay, matching the reference implementation's
    /// `max_delay` option (microseconds). Drives the PTS/DTS offset and
    /// the CBR null/PCR-only insertion threshold.
    pub max_delay_us: i64,
    /// Network name written into the NIT Network Name descriptor.
    pub network_name: String,
    /// Service name written into the SDT/NIT service descriptors.
    pub service_name: String,
    /// Service provider name written into the SDT service descriptor.
    pub service_provider: String,
    /// Deprecated standalone `reemit_pat_pmt` boolean, superseded by
    /// `flags.reemit_pat_pmt`. Accepted for backward compatibility; using it
    /// logs a deprecation warning the first time a packet is written.
    pub reemit_pat_pmt_deprecated: Option<bool>,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        // (16 - 1) * 184 + 170, rounded up to a whole TS packet at
        // header-write time.
        let pes_payload_size = 15 * 184 + 170;
        Self {
            transport_stream_id: 1,
            original_network_id: 1,
            service_id: 1,
            final_nb_services: 2,
            area_code: 1,
            guard_interval: GuardInterval::OneOver32,
            transmission_mode: TransmissionMode::Mode3,
            transmission_profile: TransmissionProfile::Profile1,
            physical_channel: 20,
            virtual_channel: 20,
            pmt_start_pid: 0x1000,
            start_pid: 0x0100,
            m2ts_mode: M2tsMode::Off,
            output_extension: None,
            mux_rate: 1,
            pes_payload_size,
            flags: MuxerFlags::default(),
            copyts: CopyTs::Apply,
            tables_version: 0,
            max_delay_us: 700_000,
            network_name: String::from("isdbtb-mux"),
            service_name: String::from("Service 1"),
            service_provider: String::from("isdbtb-mux"),
            reemit_pat_pmt_deprecated: None,
        }
    }
}

impl MuxerConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the network/service identifiers.
    pub fn with_ids(mut self, transport_stream_id: u16, original_network_id: u16) -> Self {
        self.transport_stream_id = transport_stream_id;
        self.original_network_id = original_network_id;
        self
    }

    /// Sets the mux rate; `1` selects VBR.
    pub fn with_mux_rate(mut self, mux_rate: u32) -> Self {
        self.mux_rate = mux_rate;
        self
    }

    /// Sets the reemit/LATM flags.
    pub fn with_flags(mut self, flags: MuxerFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the output file extension, used for `m2ts_mode = Auto`.
    pub fn with_output_extension(mut self, ext: impl Into<String>) -> Self {
        self.output_extension = Some(ext.into());
        self
    }

    /// Sets `m2ts_mode`.
    pub fn with_m2ts_mode(mut self, mode: M2tsMode) -> Self {
        self.m2ts_mode = mode;
        self
    }

    /// Sets the deprecated standalone `reemit_pat_pmt` option. Prefer
    /// `with_flags` with `MuxerFlags::reemit_pat_pmt` instead; using this
    /// builder logs a deprecation warning the first time a packet is
    /// written.
    pub fn with_deprecated_reemit_pat_pmt(mut self, value: bool) -> Self {
        self.reemit_pat_pmt_deprecated = Some(value);
        self
    }

    /// Resolves whether M2TS framing is active for this run, applying the
    /// `.m2ts` file-extension auto-detect when `m2ts_mode` is `Auto`.
    pub fn m2ts_enabled(&self) -> bool {
        match self.m2ts_mode {
            M2tsMode::On => true,
            M2tsMode::Off => false,
            M2tsMode::Auto => self
                .output_extension
                .as_deref()
                .map(|ext| ext.eq_ignore_ascii_case("m2ts"))
                .unwrap_or(false),
        }
    }

    /// True when the mux rate denotes CBR (anything other than the VBR
    /// sentinel value `1`).
    pub fn is_cbr(&self) -> bool {
        self.mux_rate > 1
    }

    /// `pes_payload_size` rounded up to a whole number of TS packets, per
    /// the reference implementation's header-time adjustment.
    pub fn rounded_pes_payload_size(&self) -> usize {
        (self.pes_payload_size + 14 + 183) / 184 * 184 - 14
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pes_payload_size_matches_documented_value() {
        assert_eq!(MuxerConfig::default().pes_payload_size, 2930);
    }

    #[test]
    fn m2ts_auto_detects_from_extension() {
        let cfg = MuxerConfig::new()
            .with_m2ts_mode(M2tsMode::Auto)
            .with_output_extension("m2ts");
        assert!(cfg.m2ts_enabled());

        let cfg = MuxerConfig::new()
            .with_m2ts_mode(M2tsMode::Auto)
            .with_output_extension("ts");
        assert!(!cfg.m2ts_enabled());
    }

    #[test]
    fn cbr_detection() {
        assert!(!MuxerConfig::new().is_cbr());
        assert!(MuxerConfig::new().with_mux_rate(2_000_000).is_cbr());
    }

    #[test]
    fn rounded_pes_payload_size_is_whole_packets() {
        let cfg = MuxerConfig::new();
        let rounded = cfg.rounded_pes_payload_size();
        assert_eq!((rounded + 14) % 184, 0);
    }
}
