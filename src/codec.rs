//! Stream codec classification and per-stream metadata.
//!
//! Mirrors the stream-type switch in the PMT builder: every codec the
//! muxer can carry maps to one MPEG-2 `stream_type` byte and, for some
//! codecs, a set of PMT descriptors.

/// Elementary stream codec kind, as supplied by the caller at registration
/// time. Drives the PMT `stream_type` byte and any codec-specific
/// descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// MPEG-1 or MPEG-2 video.
    Mpeg2Video,
    /// MPEG-4 part 2 video.
    Mpeg4Video,
    /// H.264 / AVC video.
    H264,
    /// H.265 / HEVC video.
    H265,
    /// Chinese AVS video.
    Cavs,
    /// Dirac video.
    Dirac,
    /// MPEG-1/2 audio layer I or II.
    Mp1Mp2Audio,
    /// MPEG-1 audio layer III.
    Mp3,
    /// AAC audio, ADTS-framed (or LATM when `latm` is set).
    Aac {
        /// True when the stream is carried as LATM rather than ADTS.
        latm: bool,
    },
    /// Dolby AC-3 audio.
    Ac3,
    /// Dolby Enhanced AC-3 (E-AC-3) audio.
    Eac3,
    /// SMPTE 302M audio.
    Smpte302m,
    /// DVB subtitle stream.
    DvbSubtitle,
    /// DVB teletext stream.
    DvbTeletext,
    /// SMPTE-KLV metadata.
    SmpteKlv,
    /// Anything without a dedicated mapping; carried as private data.
    Private,
}

impl CodecKind {
    /// Returns the MPEG-2 `stream_type` byte for this codec, per the PMT
    /// stream-type table.
    pub fn stream_type(self) -> u8 {
        match self {
            CodecKind::Mpeg2Video => 0x02,
            CodecKind::Mpeg4Video => 0x10,
            CodecKind::H264 => 0x1B,
            CodecKind::H265 => 0x24,
            CodecKind::Cavs => 0x42,
            CodecKind::Dirac => 0xD1,
            CodecKind::Mp1Mp2Audio => 0x03,
            CodecKind::Mp3 => 0x04,
            CodecKind::Aac { latm: false } => 0x0F,
            CodecKind::Aac { latm: true } => 0x11,
            CodecKind::Ac3 => 0x81,
            CodecKind::Eac3 => 0x81,
            CodecKind::Smpte302m => 0x06,
            CodecKind::DvbSubtitle => 0x06,
            CodecKind::DvbTeletext => 0x06,
            CodecKind::SmpteKlv => 0x06,
            CodecKind::Private => 0x06,
        }
    }

    /// True for streams the muxer treats as video (forced single-PES
    /// emission, eligible for PCR/AUD handling, eligible for key-frame
    /// forced PAT retransmission).
    pub fn is_video(self) -> bool {
        matches!(
            self,
            CodecKind::Mpeg2Video
                | CodecKind::Mpeg4Video
                | CodecKind::H264
                | CodecKind::H265
                | CodecKind::Cavs
                | CodecKind::Dirac
        )
    }

    /// True for streams the muxer treats as audio (eligible for payload
    /// packing up to `pes_payload_size`).
    pub fn is_audio(self) -> bool {
        matches!(
            self,
            CodecKind::Mp1Mp2Audio
                | CodecKind::Mp3
                | CodecKind::Aac { .. }
                | CodecKind::Ac3
                | CodecKind::Eac3
                | CodecKind::Smpte302m
        )
    }

    /// True for streams the muxer always emits as a single PES, bypassing
    /// the audio packing buffer (video, subtitle and teletext).
    pub fn bypasses_packing(self) -> bool {
        self.is_video() || matches!(self, CodecKind::DvbSubtitle | CodecKind::DvbTeletext)
    }
}

/// Caller-supplied disposition flags for a stream, feeding the PMT
/// audio-type byte and the DVB subtitle descriptor fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Disposition {
    /// Dialogue intended for listeners who want reduced sound effects.
    pub clean_effects: bool,
    /// Track intended for hearing-impaired audiences.
    pub hearing_impaired: bool,
    /// Track intended for visually-impaired audiences (audio description).
    pub visual_impaired: bool,
}

impl Disposition {
    /// Maps the disposition to the `audio_type` byte of the ISO-639
    /// language descriptor: clean effects → 1, hearing impaired → 2,
    /// visual impaired → 3, otherwise 0 (undefined).
    pub fn audio_type(self) -> u8 {
        if self.clean_effects {
            1
        } else if self.hearing_impaired {
            2
        } else if self.visual_impaired {
            3
        } else {
            0
        }
    }
}

/// Caller-supplied per-stream metadata, independent of the codec itself.
#[derive(Debug, Clone, Default)]
pub struct StreamMetadata {
    /// ISO-639 3-letter language codes this stream carries, in priority
    /// order (multiple for multi-language audio/subtitle tracks).
    pub languages: Vec<[u8; 3]>,
    /// Disposition flags for this stream.
    pub disposition: Disposition,
    /// Raw per-language descriptor extradata for DVB subtitle/teletext
    /// streams, consumed one chunk per entry in `languages`' order: 5 bytes
    /// per subtitle language (`composition_page_id` u16 BE,
    /// `ancillary_page_id` u16 BE, `subtitling_type` u8) or 2 bytes per
    /// teletext language (`teletext_type<<3 | magazine_number`,
    /// `page_number`). Entries past the end of `extradata` fall back to the
    /// descriptor's documented defaults.
    pub extradata: Option<Vec<u8>>,
}

/// Configuration for an AAC elementary stream, carried in its registration
/// extradata and consumed by the AAC sub-muxer bridge.
#[derive(Debug, Clone, Copy)]
pub struct AacConfig {
    /// MPEG-4 audio object type minus one (ADTS `profile` field): 0=Main,
    /// 1=LC, 2=SSR, 3=LTP.
    pub profile: u8,
    /// ADTS sampling-frequency index (0..=12).
    pub sample_rate_index: u8,
    /// ADTS channel configuration (1..=7).
    pub channel_configuration: u8,
}

impl Default for AacConfig {
    fn default() -> Self {
        Self {
            profile: 1, // LC
            sample_rate_index: 4, // 44100 Hz
            channel_configuration: 2, // stereo
        }
    }
}

/// A registered elementary stream: its codec, PID, and metadata. Built by
/// the caller and handed to [`crate::muxer::TsMuxer::write_header`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Codec carried on this stream.
    pub codec: CodecKind,
    /// Caller-requested stream id; see [`crate::service`] for how this is
    /// turned into a 13-bit PID.
    pub id: u16,
    /// Caller-supplied metadata (language, disposition).
    pub metadata: StreamMetadata,
    /// AAC-specific configuration; required for AAC streams that need the
    /// built-in ADTS sub-muxer, ignored otherwise.
    pub aac_config: Option<AacConfig>,
}

impl StreamConfig {
    /// Creates a stream configuration with default metadata.
    pub fn new(codec: CodecKind, id: u16) -> Self {
        Self {
            codec,
            id,
            metadata: StreamMetadata::default(),
            aac_config: None,
        }
    }

    /// Attaches language/disposition metadata.
    pub fn with_metadata(mut self, metadata: StreamMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches AAC configuration for the built-in ADTS sub-muxer.
    pub fn with_aac_config(mut self, config: AacConfig) -> Self {
        self.aac_config = Some(config);
        self
    }
}
