use crate::*;

use std::io::Cursor;

use tidal_core::Supervisor;
use tidal_stream::{play, RawSink, UdpLink, WavSink};

/// A WAV file streamed into a WAV sink comes out identical.
#[tokio::test]
async fn test_wav_arrives_byte_for_byte() {
    let server = Harness::start(Duration::from_secs(2)).await.unwrap();
    let audio = pcm(40_000);
    let original = server.add_wav("take-five.wav", &cd(), &audio);

    let mut link = UdpLink::open(server.addr).await.unwrap();
    let mut sink = WavSink::new(Cursor::new(Vec::new()));
    let playback = play(&mut link, "take-five.wav", &mut sink, &Supervisor::default())
        .await
        .unwrap();

    assert_eq!(playback.format, cd());
    assert_eq!(playback.report.bytes, 40_000);
    // 39 full transfer units and one short one.
    assert_eq!(playback.report.chunks, 40);
    assert_eq!(playback.report.duplicates, 0);
    assert_eq!(sink.into_inner().into_inner(), original);

    assert!(server.wait_idle(Duration::from_secs(1)).await, "session left behind");
    server.stop().await;
}

/// Raw output is exactly the data chunk.
#[tokio::test]
async fn test_raw_output_is_the_data_chunk() {
    let server = Harness::start(Duration::from_secs(2)).await.unwrap();
    let format = AudioFormat::new(22_050, 8, 1).unwrap();
    let audio = pcm(5_000);
    server.add_wav("blip.wav", &format, &audio);

    let mut link = UdpLink::open(server.addr).await.unwrap();
    let mut sink = RawSink::new(Vec::new());
    let playback = play(&mut link, "blip.wav", &mut sink, &Supervisor::default())
        .await
        .unwrap();

    assert_eq!(playback.format, format);
    assert_eq!(sink.into_inner(), audio);
    server.stop().await;
}

/// An empty data chunk yields header, ack and fin, nothing else.
#[tokio::test]
async fn test_zero_length_file() {
    let server = Harness::start(Duration::from_secs(2)).await.unwrap();
    let original = server.add_wav("silence.wav", &cd(), &[]);

    let mut link = UdpLink::open(server.addr).await.unwrap();
    let mut sink = WavSink::new(Cursor::new(Vec::new()));
    let playback = play(&mut link, "silence.wav", &mut sink, &Supervisor::default())
        .await
        .unwrap();

    assert_eq!(playback.report.chunks, 0);
    assert_eq!(sink.into_inner().into_inner(), original);
    server.stop().await;
}

/// Delivery never outruns the audio's byte rate.
#[tokio::test]
async fn test_stream_is_paced() {
    let server = Harness::start(Duration::from_secs(2)).await.unwrap();
    // Half a second of 8 kHz mono: four transfer units.
    let format = AudioFormat::new(8_000, 8, 1).unwrap();
    server.add_wav("voice.wav", &format, &pcm(4_000));

    let mut link = UdpLink::open(server.addr).await.unwrap();
    let mut sink = RawSink::new(Vec::new());
    let started = tokio::time::Instant::now();
    play(&mut link, "voice.wav", &mut sink, &Supervisor::default())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Four paced intervals of 0.94 × 128 ms.
    assert!(elapsed >= Duration::from_millis(450), "too fast: {elapsed:?}");
    server.stop().await;
}

/// Two clients stream different files at the same time.
#[tokio::test]
async fn test_concurrent_sessions() {
    let server = Harness::start(Duration::from_secs(2)).await.unwrap();
    let first = pcm(30_000);
    let second: Vec<u8> = pcm(20_000).into_iter().rev().collect();
    server.add_wav("first.wav", &cd(), &first);
    server.add_wav("second.wav", &cd(), &second);

    let addr = server.addr;
    let fetch = |name: &'static str| async move {
        let mut link = UdpLink::open(addr).await.unwrap();
        let mut sink = RawSink::new(Vec::new());
        play(&mut link, name, &mut sink, &Supervisor::default())
            .await
            .unwrap();
        sink.into_inner()
    };

    let (got_first, got_second) = tokio::join!(fetch("first.wav"), fetch("second.wav"));
    assert_eq!(got_first, first);
    assert_eq!(got_second, second);

    assert!(server.wait_idle(Duration::from_secs(1)).await);
    server.stop().await;
}

/// The same client can stream again once its session has ended.
#[tokio::test]
async fn test_back_to_back_requests() {
    let server = Harness::start(Duration::from_secs(2)).await.unwrap();
    let audio = pcm(3_000);
    server.add_wav("loop.wav", &cd(), &audio);

    let mut link = UdpLink::open(server.addr).await.unwrap();
    for _ in 0..2 {
        assert!(server.wait_idle(Duration::from_secs(1)).await);
        let mut sink = RawSink::new(Vec::new());
        play(&mut link, "loop.wav", &mut sink, &Supervisor::default())
            .await
            .unwrap();
        assert_eq!(sink.into_inner(), audio);
    }
    server.stop().await;
}
