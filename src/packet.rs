//! Inbound access-unit packet passed to the muxer by the caller.

use bytes::Bytes;
use std::time::Duration;

/// One access unit for a single elementary stream, as handed to
/// [`crate::muxer::Muxer::write_packet`].
#[derive(Debug, Clone)]
pub struct Packet {
    /// Encoded access-unit bytes.
    pub data: Bytes,
    /// Presentation timestamp, in 90 kHz units. `None` means "no PTS carried".
    pub pts: Option<i64>,
    /// Decode timestamp, in 90 kHz units.
    pub dts: Option<i64>,
    /// Index into the stream list passed to `write_header`.
    pub stream_index: usize,
    /// True if this access unit is a random-access point (key frame).
    pub is_key: bool,
    /// Optional frame duration, used by VBR PCR period estimation.
    pub duration: Option<Duration>,
}

impl Packet {
    /// Creates a packet with no timestamps, not marked as a key frame.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pts: None,
            dts: None,
            stream_index: 0,
            is_key: false,
            duration: None,
        }
    }

    /// Sets the presentation timestamp.
    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Sets the decode timestamp.
    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    /// Sets the owning stream index.
    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    /// Marks the packet as a random-access point.
    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    /// Sets the frame duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}
