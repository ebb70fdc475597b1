#![doc(html_root_url = "https://docs.rs/isdbtb-mux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # isdbtb-mux
//!
//! `isdbtb-mux` builds MPEG-2 Transport Streams for Brazilian digital
//! television (ISDB-Tb / ABNT NBR 15603-15608), taking timestamped
//! elementary-stream access units in and producing a conforming transport
//! stream out: PAT, PMT, SDT, NIT (with the ISDB-Tb terrestrial-delivery
//! and partial-reception extensions) and TOT, PES packetization with PCR
//! pacing, and the H.264/AAC bitstream massaging broadcast receivers
//! expect.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use isdbtb_mux::codec::{CodecKind, StreamConfig};
//! use isdbtb_mux::config::MuxerConfig;
//! use isdbtb_mux::muxer::{Muxer, TsMuxer};
//! use isdbtb_mux::packet::Packet;
//! use bytes::Bytes;
//!
//! # async fn run() -> isdbtb_mux::error::Result<()> {
//! let config = MuxerConfig::new().with_ids(1, 1).with_mux_rate(4_000_000);
//! let mut muxer = TsMuxer::new(Vec::new(), config);
//!
//! let streams = vec![StreamConfig::new(CodecKind::H264, 0x100)];
//! muxer.write_header(streams).await?;
//!
//! let frame = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0xAA]);
//! let packet = Packet::new(frame).with_pts(90_000).with_dts(90_000).with_key_flag(true);
//! muxer.write_packet(packet).await?;
//! muxer.write_trailer().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module overview
//!
//! - [`config`]: muxer configuration, including the ISDB-Tb terrestrial
//!   parameters (area code, guard interval, transmission mode).
//! - [`codec`]: elementary-stream codec classification and metadata.
//! - [`packet`]: the inbound access-unit type.
//! - [`service`]: service/PID registry and SID assignment.
//! - [`psi`]: PAT/PMT/SDT/NIT/TOT section builders and generic section
//!   packetization.
//! - [`pes`]: PES packetization and TS-packet framing.
//! - [`muxer`]: the scheduling loop tying everything together.
//! - [`m2ts`]: optional M2TS (Blu-ray/AVCHD) per-packet timestamp framing.
//! - [`h264`] / [`aac`]: codec-specific bitstream preprocessing.
//! - [`crc`]: CRC-32/MPEG-2 for section trailers.
//! - [`error`]: the crate's error type.

/// AAC ADTS sub-muxer bridge.
pub mod aac;

/// Buffer-cursor helper for PSI/SI section construction.
pub mod bitwriter;

/// Stream codec classification and per-stream metadata.
pub mod codec;

/// Muxer configuration.
pub mod config;

/// CRC-32/MPEG-2 for PSI/SI section trailers.
pub mod crc;

/// Error types and the crate `Result` alias.
pub mod error;

/// H.264 Annex-B scanning and Access Unit Delimiter insertion.
pub mod h264;

/// M2TS per-packet timestamp framing.
pub mod m2ts;

/// The muxer loop: `TsMuxer` and the `Muxer` trait.
pub mod muxer;

/// The inbound access-unit packet type.
pub mod packet;

/// PES packetization and TS-packet framing.
pub mod pes;

/// PSI/SI table construction (PAT, PMT, SDT, NIT, TOT).
pub mod psi;

/// Service/stream registry and PID assignment.
pub mod service;

pub use error::{MuxError, Result};
pub use muxer::{Muxer, TsMuxer};
