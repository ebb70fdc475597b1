//! End-to-end muxer scenarios driving `TsMuxer` the way a real caller would:
//! header, a handful of packets, trailer, then inspecting the resulting
//! byte stream for TS-level invariants.

use bytes::Bytes;

use isdbtb_mux::codec::{CodecKind, StreamConfig};
use isdbtb_mux::config::MuxerConfig;
use isdbtb_mux::error::MuxError;
use isdbtb_mux::muxer::{Muxer, TsMuxer};
use isdbtb_mux::packet::Packet;

const SYNC_BYTE: u8 = 0x47;

fn packets_of(bytes: &[u8]) -> Vec<&[u8]> {
    assert_eq!(bytes.len() % 188, 0, "output must be a whole number of TS packets");
    bytes.chunks(188).collect()
}

fn pid_of(packet: &[u8]) -> u16 {
    (((packet[1] as u16) & 0x1F) << 8) | packet[2] as u16
}

fn has_pusi(packet: &[u8]) -> bool {
    packet[1] & 0x40 != 0
}

#[tokio::test]
async fn empty_transport_carries_pat_and_pmt_for_both_services() {
    let config = MuxerConfig::new().with_ids(1, 1);
    let mut muxer = TsMuxer::new(Vec::new(), config);
    muxer.write_header(vec![]).await.unwrap();
    muxer.write_trailer().await.unwrap();
    muxer.flush().await.unwrap();

    let out = muxer.into_inner();
    let packets = packets_of(&out);
    assert!(packets.iter().all(|p| p[0] == SYNC_BYTE));

    let pids: Vec<u16> = packets.iter().map(|p| pid_of(p)).collect();
    assert!(pids.contains(&0x0000), "PAT PID must be present");
    assert!(pids.iter().any(|&pid| pid == (0x1FC8 | 0)), "HD PMT PID must be present");
    assert!(pids.iter().any(|&pid| pid == (0x1FC8 | 1)), "1-seg PMT PID must be present");
    assert!(pids.contains(&0x0011), "SDT PID must be present");
    assert!(pids.contains(&0x0010), "NIT PID must be present");
    assert!(pids.contains(&0x0014), "TOT PID must be present");
}

#[tokio::test]
async fn single_h264_stream_cbr_carries_pcr_and_is_packet_aligned() {
    let config = MuxerConfig::new().with_ids(1, 1).with_mux_rate(4_000_000);
    let mut muxer = TsMuxer::new(Vec::new(), config);
    let streams = vec![StreamConfig::new(CodecKind::H264, 0x100)];
    muxer.write_header(streams).await.unwrap();

    let frame = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x11, 0x22, 0x33]);
    let packet = Packet::new(frame)
        .with_pts(90_000)
        .with_dts(90_000)
        .with_key_flag(true)
        .with_stream_index(0);
    muxer.write_packet(packet).await.unwrap();
    muxer.write_trailer().await.unwrap();

    let out = muxer.into_inner();
    let packets = packets_of(&out);

    let video_packets: Vec<&&[u8]> = packets.iter().filter(|p| pid_of(p) == 0x100).collect();
    assert!(!video_packets.is_empty(), "video PID must carry at least one packet");

    let first = video_packets[0];
    assert!(has_pusi(first), "first packet of the PES must set payload_unit_start_indicator");
    let adaptation_field_control = (first[3] >> 4) & 0x3;
    assert_eq!(
        adaptation_field_control, 0x3,
        "random-access PES with PCR must carry an adaptation field"
    );
}

#[tokio::test]
async fn video_and_audio_streams_share_one_transport_without_pid_collisions() {
    let config = MuxerConfig::new().with_ids(1, 1);
    let mut muxer = TsMuxer::new(Vec::new(), config);
    let streams = vec![
        StreamConfig::new(CodecKind::H264, 0x100),
        StreamConfig::new(CodecKind::Aac { latm: false }, 0x101),
    ];
    muxer.write_header(streams).await.unwrap();

    let video = Packet::new(Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0xAA]))
        .with_pts(90_000)
        .with_dts(90_000)
        .with_key_flag(true)
        .with_stream_index(0);
    muxer.write_packet(video).await.unwrap();

    let adts_header = [0xFF, 0xF1, 0x50, 0x80, 0x00, 0x1F, 0xFC];
    let audio = Packet::new(Bytes::copy_from_slice(&adts_header))
        .with_pts(90_000)
        .with_dts(90_000)
        .with_stream_index(1);
    muxer.write_packet(audio).await.unwrap();
    muxer.write_trailer().await.unwrap();

    let out = muxer.into_inner();
    let packets = packets_of(&out);
    let video_present = packets.iter().any(|p| pid_of(p) == 0x100);
    let audio_present = packets.iter().any(|p| pid_of(p) == 0x101);
    assert!(video_present && audio_present);
}

#[tokio::test]
async fn isdbtb_nit_encodes_channel_14_frequency_and_area_guard_mode() {
    use isdbtb_mux::config::{GuardInterval, TransmissionMode};

    let mut config = MuxerConfig::new().with_ids(1, 1);
    config.physical_channel = 14;
    config.area_code = 1;
    config.guard_interval = GuardInterval::OneOver32;
    config.transmission_mode = TransmissionMode::Mode1;
    let mut muxer = TsMuxer::new(Vec::new(), config);
    muxer.write_header(vec![]).await.unwrap();
    muxer.write_trailer().await.unwrap();

    let out = muxer.into_inner();
    let packets = packets_of(&out);
    let nit_packet = packets
        .iter()
        .find(|p| pid_of(p) == 0x0010)
        .expect("NIT packet must be present");
    assert_eq!(nit_packet[0], SYNC_BYTE);

    // Locate the Terrestrial Delivery System descriptor (tag 0xFA, fixed
    // 4-byte body) by its `[0xFA, 0x04]` prefix rather than hand-computing
    // every preceding descriptor's offset.
    let tag_pos = nit_packet
        .windows(2)
        .position(|w| w == [0xFA, 0x04])
        .expect("Terrestrial Delivery System descriptor must be present");
    let area_guard_mode = u16::from_be_bytes([nit_packet[tag_pos + 2], nit_packet[tag_pos + 3]]);
    assert_eq!(
        area_guard_mode, 0x15,
        "area_code=1, guard_interval=1, transmission_mode=1 must pack as 0x15"
    );
    let frequency = u16::from_be_bytes([nit_packet[tag_pos + 4], nit_packet[tag_pos + 5]]);
    assert_eq!(frequency, 3311);
}

#[tokio::test]
async fn duplicate_pid_is_rejected_at_header_time() {
    let config = MuxerConfig::new().with_ids(1, 1);
    let mut muxer = TsMuxer::new(Vec::new(), config);
    let streams = vec![
        StreamConfig::new(CodecKind::H264, 0x100),
        StreamConfig::new(CodecKind::Aac { latm: false }, 0x100),
    ];
    let err = muxer.write_header(streams).await.unwrap_err();
    assert!(matches!(err, MuxError::DuplicatePid(0x100)));
}

#[tokio::test]
async fn packet_without_first_pts_is_rejected() {
    let config = MuxerConfig::new().with_ids(1, 1);
    let mut muxer = TsMuxer::new(Vec::new(), config);
    let streams = vec![StreamConfig::new(CodecKind::H264, 0x100)];
    muxer.write_header(streams).await.unwrap();

    let packet = Packet::new(Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65]))
        .with_stream_index(0);
    let err = muxer.write_packet(packet).await.unwrap_err();
    assert!(matches!(err, MuxError::MissingFirstPts(0)));
}

#[tokio::test]
async fn continuity_counters_increment_per_pid_independently() {
    let config = MuxerConfig::new().with_ids(1, 1).with_mux_rate(4_000_000);
    let mut muxer = TsMuxer::new(Vec::new(), config);
    let streams = vec![StreamConfig::new(CodecKind::H264, 0x100)];
    muxer.write_header(streams).await.unwrap();

    for i in 0..3u32 {
        let pts = 90_000 + i as i64 * 3_000;
        let frame = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0xAA]);
        let packet = Packet::new(frame)
            .with_pts(pts)
            .with_dts(pts)
            .with_key_flag(i == 0)
            .with_stream_index(0);
        muxer.write_packet(packet).await.unwrap();
    }
    muxer.write_trailer().await.unwrap();

    let out = muxer.into_inner();
    let packets = packets_of(&out);
    let video_ccs: Vec<u8> = packets
        .iter()
        .filter(|p| pid_of(p) == 0x100)
        .map(|p| p[3] & 0x0F)
        .collect();
    assert!(!video_ccs.is_empty());
    for window in video_ccs.windows(2) {
        assert_eq!(window[1], (window[0] + 1) & 0x0F);
    }
}
