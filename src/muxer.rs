//! The muxer loop: per-stream payload buffering, audio packing, PSI/SI
//! retransmission scheduling, PCR pacing, and the single entry point
//! (`TsMuxer`) callers drive with `write_header` / `write_packet` /
//! `write_trailer`.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::aac::{self, AacSubMuxer, DefaultAdtsSubMuxer};
use crate::codec::{CodecKind, StreamConfig};
use crate::config::MuxerConfig;
use crate::crc::Crc32Mpeg2;
use crate::error::{MuxError, Result};
use crate::h264;
use crate::m2ts;
use crate::packet::Packet;
use crate::pes::{self, PesHeaderSpec};
use crate::psi::section::TsPacket;
use crate::psi::{nit, pat, pmt, sdt, tot};
use crate::service::ServiceRegistry;

/// Retransmission periods, in milliseconds, used to derive a packet-count
/// period from the configured mux rate.
mod retrans_ms {
    pub const PAT: u32 = 100;
    pub const SDT: u32 = 500;
    pub const NIT: u32 = 50;
    pub const TOT: u32 = 100;
    pub const PCR: u32 = 20;
}

/// VBR fallback periods, in packets, when `mux_rate` denotes variable
/// bit rate.
mod vbr_period {
    pub const PAT: u32 = 40;
    pub const SDT: u32 = 200;
    pub const NIT: u32 = 200;
    pub const TOT: u32 = 200;
}

/// Async muxer contract implemented by [`TsMuxer`].
#[async_trait]
pub trait Muxer {
    /// Registers the elementary streams and emits the initial PAT/PMT/
    /// SDT/NIT/TOT set.
    async fn write_header(&mut self, streams: Vec<StreamConfig>) -> Result<()>;
    /// Pushes one access unit through the muxer loop.
    async fn write_packet(&mut self, packet: Packet) -> Result<()>;
    /// Flushes every stream's pending buffer and the underlying sink.
    async fn write_trailer(&mut self) -> Result<()>;
    /// Flushes the underlying sink without touching stream buffers.
    async fn flush(&mut self) -> Result<()>;
}

struct PendingPayload {
    data: Vec<u8>,
    pts: Option<i64>,
    dts: Option<i64>,
    is_key: bool,
}

struct StreamState {
    config: StreamConfig,
    pid: u16,
    cc: u8,
    pending: Option<PendingPayload>,
    first_pts_seen: bool,
    h264_first_frame_seen: bool,
    prev_payload_key: bool,
}

fn period_from_ms(mux_rate: u32, ms: u32) -> u32 {
    ((mux_rate as u64 * ms as u64) / (188 * 8 * 1000)).max(1) as u32
}

/// Transport-stream muxer generic over any `AsyncWrite` sink, matching
/// the teacher's `TSMuxer<W>` shape but implementing the full PSI/SI +
/// PES + PCR-pacing pipeline described by the specification this crate
/// implements.
pub struct TsMuxer<W: AsyncWrite + Unpin + Send> {
    config: MuxerConfig,
    writer: BufWriter<W>,
    crc: Crc32Mpeg2,
    registry: ServiceRegistry,

    pat_cc: u8,
    sdt_cc: u8,
    nit_cc: u8,
    tot_cc: u8,
    pmt_cc: Vec<u8>,

    pat_count: u32,
    pat_period: u32,
    sdt_count: u32,
    sdt_period: u32,
    nit_count: u32,
    nit_period: u32,
    tot_count: u32,
    tot_period: u32,

    streams: Vec<StreamState>,
    aac_submuxers: HashMap<usize, Box<dyn AacSubMuxer>>,

    bytes_written: u64,
    first_pcr: u64,
}

impl<W: AsyncWrite + Unpin + Send> TsMuxer<W> {
    /// Creates a muxer with the given configuration, writing to `writer`.
    pub fn new(writer: W, config: MuxerConfig) -> Self {
        Self {
            config,
            writer: BufWriter::new(writer),
            crc: Crc32Mpeg2::new(),
            registry: ServiceRegistry {
                services: Vec::new(),
                streams: Vec::new(),
            },
            pat_cc: 15,
            sdt_cc: 15,
            nit_cc: 15,
            tot_cc: 15,
            pmt_cc: Vec::new(),
            pat_count: 0,
            pat_period: 1,
            sdt_count: 0,
            sdt_period: 1,
            nit_count: 0,
            nit_period: 1,
            tot_count: 0,
            tot_period: 1,
            streams: Vec::new(),
            aac_submuxers: HashMap::new(),
            bytes_written: 0,
            first_pcr: 0,
        }
    }

    /// Consumes the muxer and returns the underlying sink, flushing the
    /// internal buffer is the caller's responsibility beforehand (call
    /// [`Muxer::write_trailer`] or [`Muxer::flush`] first).
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    /// CBR derives the PCR period from `mux_rate`; VBR has no fixed byte
    /// rate to anchor one to, so every PES on the PCR PID carries a PCR.
    fn pcr_period_for(&self) -> u32 {
        if self.config.is_cbr() {
            period_from_ms(self.config.mux_rate, retrans_ms::PCR)
        } else {
            1
        }
    }

    async fn write_packets(&mut self, packets: &[TsPacket]) -> Result<()> {
        for packet in packets {
            if self.config.m2ts_enabled() {
                let pcr = self.current_pcr_estimate();
                self.writer.write_all(&m2ts::m2ts_prefix(pcr)).await?;
            }
            self.writer.write_all(packet).await?;
            self.bytes_written += packet.len() as u64;
        }
        Ok(())
    }

    /// CBR: derived from output byte position. VBR: not meaningful as a
    /// standalone estimate; callers pass a dts-derived value separately
    /// when they need one.
    fn current_pcr_estimate(&self) -> u64 {
        if self.config.is_cbr() {
            (self.bytes_written + 11) * 8 * 27_000_000 / self.config.mux_rate as u64
                + self.first_pcr
        } else {
            self.first_pcr
        }
    }

    async fn emit_pat_and_pmts(&mut self) -> Result<()> {
        let packets = pat::write_pat(
            &self.registry.services,
            self.config.original_network_id,
            self.config.tables_version,
            &mut self.pat_cc,
            &self.crc,
        )?;
        self.write_packets(&packets).await?;

        for (i, service) in self.registry.services.iter().enumerate() {
            let pmt_streams: Vec<pmt::PmtStream<'_>> = service
                .stream_indices
                .iter()
                .map(|&idx| {
                    let s = &self.registry.streams[idx];
                    pmt::PmtStream {
                        codec: s.config.codec,
                        pid: s.pid,
                        metadata: &s.config.metadata,
                    }
                })
                .collect();
            let packets = pmt::write_pmt(
                service,
                &pmt_streams,
                self.config.tables_version,
                &mut self.pmt_cc[i],
                &self.crc,
            )?;
            self.write_packets(&packets).await?;
        }
        Ok(())
    }

    async fn emit_sdt(&mut self) -> Result<()> {
        let packets = sdt::write_sdt(
            &self.registry.services,
            self.config.original_network_id, // tsid := onid, preserved for compatibility
            self.config.original_network_id,
            self.config.tables_version,
            &mut self.sdt_cc,
            &self.crc,
        )?;
        self.write_packets(&packets).await
    }

    async fn emit_nit(&mut self) -> Result<()> {
        let packets = nit::write_nit(
            &self.config,
            &self.registry.services,
            self.config.original_network_id,
            self.config.tables_version,
            &mut self.nit_cc,
            &self.crc,
        )?;
        self.write_packets(&packets).await
    }

    async fn emit_tot(&mut self) -> Result<()> {
        let now = chrono::Utc::now().with_timezone(&crate::psi::tot::brazil_offset());
        let packets = tot::write_tot(now, &mut self.tot_cc, &self.crc)?;
        self.write_packets(&packets).await
    }

    async fn retransmit_si(&mut self, force_pat: bool) -> Result<()> {
        self.sdt_count += 1;
        if self.sdt_count >= self.sdt_period {
            self.sdt_count = 0;
            self.emit_sdt().await?;
        }
        self.nit_count += 1;
        if self.nit_count >= self.nit_period {
            self.nit_count = 0;
            self.emit_nit().await?;
        }
        self.tot_count += 1;
        if self.tot_count >= self.tot_period {
            self.tot_count = 0;
            self.emit_tot().await?;
        }
        self.pat_count += 1;
        if force_pat || self.pat_count >= self.pat_period {
            self.pat_count = 0;
            self.emit_pat_and_pmts().await?;
        }
        Ok(())
    }

    fn pcr_due(&mut self, service_index: usize) -> bool {
        let period = self.registry.services[service_index].pcr_packet_period.max(1);
        self.registry.services[service_index].pcr_packet_count += 1;
        if self.registry.services[service_index].pcr_packet_count >= period {
            self.registry.services[service_index].pcr_packet_count = 0;
            true
        } else {
            false
        }
    }

    fn max_delay_90k(&self) -> i64 {
        self.config.max_delay_us * 90 / 1000
    }

    /// Inserts a PCR-only packet on the service's PCR PID (falling back to a
    /// null packet when the service has no PCR PID assigned) when the
    /// output has fallen more than `max_delay` behind `dts`, keeping the PCR
    /// PID's clock current instead of merely padding the byte rate.
    async fn maybe_insert_cbr_filler(&mut self, dts: Option<i64>, service_index: usize) -> Result<()> {
        if !self.config.is_cbr() {
            return Ok(());
        }
        let Some(dts) = dts else { return Ok(()) };
        let pcr = self.current_pcr_estimate();
        if dts - (pcr as i64) / 300 > self.max_delay_90k() {
            let pcr_pid = self.registry.services[service_index].pcr_pid;
            let packet = if pcr_pid == 0x1FFF {
                pes::null_packet()
            } else {
                let cc = self
                    .streams
                    .iter()
                    .find(|s| s.pid == pcr_pid)
                    .map(|s| s.cc)
                    .unwrap_or(0);
                pes::pcr_only_packet(pcr_pid, cc, pcr)
            };
            self.write_packets(std::slice::from_ref(&packet)).await?;
        }
        Ok(())
    }

    async fn flush_stream(&mut self, stream_index: usize) -> Result<()> {
        let Some(pending) = self.streams[stream_index].pending.take() else {
            return Ok(());
        };

        let service_index = self.registry.streams[stream_index].service_index;

        let is_video = self.streams[stream_index].config.codec.is_video();
        let force_pat =
            is_video && pending.is_key && !self.streams[stream_index].prev_payload_key;
        self.retransmit_si(force_pat).await?;
        self.streams[stream_index].prev_payload_key = pending.is_key;

        self.maybe_insert_cbr_filler(pending.dts, service_index).await?;

        if self.config.is_cbr() {
            if let Some(dts) = pending.dts {
                let pcr_90k = (self.current_pcr_estimate() / 300) as i64;
                if dts < pcr_90k {
                    warn!("stream {stream_index}: dts {dts} is behind the current PCR {pcr_90k}");
                }
            }
        }

        let pid = self.streams[stream_index].pid;
        let is_pcr_pid = self.registry.services[service_index].pcr_pid == pid;
        let write_pcr = is_pcr_pid && self.pcr_due(service_index);

        let pcr_value = if write_pcr {
            Some(if self.config.is_cbr() {
                self.current_pcr_estimate()
            } else {
                let dts = pending.dts.unwrap_or(0);
                ((dts - self.max_delay_90k()) * 300).max(0) as u64
            })
        } else {
            None
        };

        let spec = PesHeaderSpec {
            codec: self.streams[stream_index].config.codec,
            pts: pending.pts,
            dts: pending.dts,
            m2ts_mode: self.config.m2ts_enabled(),
        };
        let pes_bytes = pes::build_pes(&spec, &pending.data);
        let cc = &mut self.streams[stream_index].cc;
        let packets = pes::emit_pes(pid, cc, &pes_bytes, pcr_value, pending.is_key);
        self.write_packets(&packets).await
    }

    async fn flush_stale_streams(&mut self, except: usize, reference_dts: Option<i64>) -> Result<()> {
        let Some(reference_dts) = reference_dts else {
            return Ok(());
        };
        let half_delay = self.max_delay_90k() / 2;
        let stale: Vec<usize> = self
            .streams
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                *i != except
                    && s.pending
                        .as_ref()
                        .and_then(|p| p.dts)
                        .map(|dts| reference_dts - dts > half_delay)
                        .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect();
        for i in stale {
            self.flush_stream(i).await?;
        }
        Ok(())
    }

    fn preprocess(&mut self, stream_index: usize, data: Bytes) -> Result<Vec<u8>> {
        match self.streams[stream_index].config.codec {
            CodecKind::H264 => {
                let first = !self.streams[stream_index].h264_first_frame_seen;
                self.streams[stream_index].h264_first_frame_seen = true;
                if !first && !h264::has_start_code(&data) {
                    warn!(
                        "stream {stream_index}: H.264 access unit has no Annex-B start code, passing through unchanged"
                    );
                }
                match h264::ensure_aud(&data, first) {
                    Ok(bytes) => Ok(bytes.to_vec()),
                    Err(_) => Err(MuxError::InvalidH264(stream_index)),
                }
            }
            CodecKind::Aac { .. } => {
                if aac::has_adts_sync(&data) {
                    Ok(data.to_vec())
                } else {
                    let aac_config = self.streams[stream_index]
                        .config
                        .aac_config
                        .unwrap_or_default();
                    let sub = self
                        .aac_submuxers
                        .entry(stream_index)
                        .or_insert_with(|| Box::new(DefaultAdtsSubMuxer));
                    warn!("stream {stream_index}: AAC bitstream not in ADTS format, reframing");
                    sub.reframe(&data, &aac_config)
                        .map_err(|_| MuxError::AacWithoutAdts(stream_index))
                }
            }
            _ => Ok(data.to_vec()),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Muxer for TsMuxer<W> {
    async fn write_header(&mut self, streams: Vec<StreamConfig>) -> Result<()> {
        self.registry = ServiceRegistry::build(&self.config, &streams)?;
        self.pmt_cc = vec![15; self.registry.services.len()];

        self.config.pes_payload_size = self.config.rounded_pes_payload_size();

        self.streams = streams
            .into_iter()
            .enumerate()
            .map(|(i, config)| StreamState {
                pid: self.registry.streams[i].pid,
                config,
                cc: 0,
                pending: None,
                first_pts_seen: false,
                h264_first_frame_seen: false,
                prev_payload_key: false,
            })
            .collect();

        let pcr_period = self.pcr_period_for();
        for service in self.registry.services.iter_mut() {
            service.pcr_packet_period = pcr_period;
        }

        if self.config.is_cbr() {
            self.pat_period = period_from_ms(self.config.mux_rate, retrans_ms::PAT);
            self.sdt_period = period_from_ms(self.config.mux_rate, retrans_ms::SDT);
            self.nit_period = period_from_ms(self.config.mux_rate, retrans_ms::NIT);
            self.tot_period = period_from_ms(self.config.mux_rate, retrans_ms::TOT);
        } else {
            self.pat_period = vbr_period::PAT;
            self.sdt_period = vbr_period::SDT;
            self.nit_period = vbr_period::NIT;
            self.tot_period = vbr_period::TOT;
        }
        self.emit_pat_and_pmts().await?;
        self.emit_sdt().await?;
        self.emit_nit().await?;
        self.emit_tot().await
    }

    async fn write_packet(&mut self, mut packet: Packet) -> Result<()> {
        if let Some(value) = self.config.reemit_pat_pmt_deprecated.take() {
            warn!("reemit_pat_pmt option is deprecated, use MuxerFlags::reemit_pat_pmt instead");
            self.config.flags.reemit_pat_pmt = value;
        }

        if self.config.flags.reemit_pat_pmt {
            self.pat_count = self.pat_period;
            self.sdt_count = self.sdt_period;
            self.nit_count = self.nit_period;
            self.tot_count = self.tot_period;
        }

        if !matches!(self.config.copyts, crate::config::CopyTs::Disabled) {
            let offset = self.max_delay_90k();
            packet.pts = packet.pts.map(|v| v + offset);
            packet.dts = packet.dts.map(|v| v + offset);
        }

        let stream_index = packet.stream_index;
        if stream_index >= self.streams.len() {
            return Err(MuxError::InvalidStreamId(stream_index as u16));
        }

        if !self.streams[stream_index].first_pts_seen {
            if packet.pts.is_none() {
                return Err(MuxError::MissingFirstPts(stream_index));
            }
            self.streams[stream_index].first_pts_seen = true;
        }

        let data = self.preprocess(stream_index, packet.data)?;

        self.flush_stale_streams(stream_index, packet.dts).await?;

        let pes_payload_size = self.config.pes_payload_size;
        let codec = self.streams[stream_index].config.codec;
        let bypasses_packing = codec.bypasses_packing() || data.len() > pes_payload_size;

        if bypasses_packing {
            if self.streams[stream_index].pending.is_some() {
                self.flush_stream(stream_index).await?;
            }
            self.streams[stream_index].pending = Some(PendingPayload {
                data,
                pts: packet.pts,
                dts: packet.dts,
                is_key: packet.is_key,
            });
            self.flush_stream(stream_index).await
        } else {
            let would_overflow = self.streams[stream_index]
                .pending
                .as_ref()
                .map(|p| p.data.len() + data.len() > pes_payload_size)
                .unwrap_or(false);
            if would_overflow {
                self.flush_stream(stream_index).await?;
            }

            match self.streams[stream_index].pending.as_mut() {
                Some(pending) => pending.data.extend_from_slice(&data),
                None => {
                    self.streams[stream_index].pending = Some(PendingPayload {
                        data,
                        pts: packet.pts,
                        dts: packet.dts,
                        is_key: packet.is_key,
                    })
                }
            }
            Ok(())
        }
    }

    async fn write_trailer(&mut self) -> Result<()> {
        for i in 0..self.streams.len() {
            self.flush_stream(i).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;

    fn make_muxer() -> TsMuxer<Vec<u8>> {
        let config = MuxerConfig::new().with_ids(1, 1);
        TsMuxer::new(Vec::new(), config)
    }

    #[tokio::test]
    async fn empty_transport_emits_pat_and_pmt_with_no_pes() {
        let mut muxer = make_muxer();
        muxer.write_header(vec![]).await.unwrap();
        muxer.write_trailer().await.unwrap();
        assert!(muxer.bytes_written >= 188 * 3); // PAT + 2 PMTs at minimum
        assert_eq!(muxer.bytes_written % 188, 0);
    }

    #[tokio::test]
    async fn single_video_packet_round_trips_through_the_loop() {
        let mut muxer = make_muxer();
        let streams = vec![StreamConfig::new(CodecKind::H264, 0x100)];
        muxer.write_header(streams).await.unwrap();

        let data = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0xAA, 0xBB]);
        let packet = Packet::new(data)
            .with_pts(90_000)
            .with_dts(90_000)
            .with_key_flag(true)
            .with_stream_index(0);
        muxer.write_packet(packet).await.unwrap();
        muxer.write_trailer().await.unwrap();
        assert_eq!(muxer.bytes_written % 188, 0);
    }

    #[tokio::test]
    async fn missing_first_pts_is_rejected() {
        let mut muxer = make_muxer();
        let streams = vec![StreamConfig::new(CodecKind::H264, 0x100)];
        muxer.write_header(streams).await.unwrap();
        let packet = Packet::new(Bytes::from_static(&[0, 0, 0, 1, 0x65])).with_stream_index(0);
        let err = muxer.write_packet(packet).await.unwrap_err();
        assert!(matches!(err, MuxError::MissingFirstPts(0)));
    }

    #[tokio::test]
    async fn cbr_filler_emits_pcr_only_packet_on_the_pcr_pid_when_behind_schedule() {
        let mut config = MuxerConfig::new().with_ids(1, 1).with_mux_rate(4_000_000);
        config.max_delay_us = 0;
        let mut muxer = TsMuxer::new(Vec::new(), config);
        let streams = vec![StreamConfig::new(CodecKind::H264, 0x100)];
        muxer.write_header(streams).await.unwrap();

        let frame = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0xAA]);
        let packet = Packet::new(frame)
            .with_pts(90_000)
            .with_dts(90_000)
            .with_key_flag(true)
            .with_stream_index(0);
        muxer.write_packet(packet).await.unwrap();
        muxer.write_trailer().await.unwrap();

        let out = muxer.into_inner();
        let filler = out
            .chunks(188)
            .find(|p| {
                let pid = (((p[1] as u16) & 0x1F) << 8) | p[2] as u16;
                let adaptation_field_control = (p[3] >> 4) & 0x3;
                pid == 0x100 && adaptation_field_control == 0x2
            })
            .expect("an adaptation-field-only PCR packet on the video PID must be present");
        assert_eq!(filler[5] & 0x10, 0x10, "PCR_flag must be set");
    }

    #[tokio::test]
    async fn duplicate_pid_fails_at_header_time() {
        let mut muxer = make_muxer();
        let streams = vec![
            StreamConfig::new(CodecKind::H264, 0x100),
            StreamConfig::new(CodecKind::Aac { latm: false }, 0x100),
        ];
        let err = muxer.write_header(streams).await.unwrap_err();
        assert!(matches!(err, MuxError::DuplicatePid(0x100)));
    }
}
