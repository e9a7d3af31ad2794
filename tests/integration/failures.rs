use crate::*;

use tidal_core::wire::{Datagram, ENVELOPE_LEN};
use tidal_core::{StreamError, Supervisor, WaitPoint};
use tidal_stream::{play, RawSink, UdpLink};

const CLIENT_DEADLINE: Duration = Duration::from_millis(400);

async fn request(server: &Harness, name: &str) -> Result<Vec<u8>, StreamError> {
    let mut link = UdpLink::open(server.addr).await.unwrap();
    let mut sink = RawSink::new(Vec::new());
    play(&mut link, name, &mut sink, &Supervisor::new(CLIENT_DEADLINE)).await?;
    Ok(sink.into_inner())
}

fn header_timeout(result: Result<Vec<u8>, StreamError>) -> bool {
    matches!(result, Err(StreamError::Timeout { at: WaitPoint::Header, .. }))
}

/// Requests the server cannot serve go unanswered; the client times out
/// and the server keeps serving.
#[tokio::test]
async fn test_unservable_requests_time_out_client() {
    let server = Harness::start(Duration::from_secs(1)).await.unwrap();
    server.add_file("notes.wav", b"these are not samples");
    let outside = server.library.with_extension("secret.wav");
    std::fs::write(&outside, wav_bytes(&cd(), &pcm(64))).unwrap();
    let escape = format!("../{}", outside.file_name().unwrap().to_string_lossy());

    assert!(header_timeout(request(&server, "missing.wav").await));
    assert!(header_timeout(request(&server, "notes.wav").await));
    assert!(header_timeout(request(&server, &escape).await));
    assert!(server.wait_idle(Duration::from_secs(1)).await);

    let audio = pcm(2_048);
    server.add_wav("ok.wav", &cd(), &audio);
    assert_eq!(request(&server, "ok.wav").await.unwrap(), audio);

    let _ = std::fs::remove_file(outside);
    server.stop().await;
}

/// A client that never acks gets the header resent until the server's
/// deadline, after which its session is gone and it may ask again.
#[tokio::test]
async fn test_silent_client_is_dropped_after_deadline() {
    let server = Harness::start(Duration::from_millis(300)).await.unwrap();
    server.add_wav("song.wav", &cd(), &pcm(10_000));

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = Datagram::Request {
        filename: "song.wav",
    }
    .to_vec()
    .unwrap();
    socket.send_to(&request, server.addr).await.unwrap();

    let mut buf = [0u8; ENVELOPE_LEN];
    let mut headers = 0;
    while let Ok(received) =
        tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await
    {
        let (len, _) = received.unwrap();
        match Datagram::decode(&buf[..len]).unwrap() {
            Datagram::Header(format) => {
                assert_eq!(format, cd());
                headers += 1;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(headers > 1, "header was not resent ({headers})");
    assert!(server.wait_idle(Duration::from_secs(1)).await);

    // A fresh request from the same address starts a new session.
    socket.send_to(&request, server.addr).await.unwrap();
    let (len, _) = tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(Datagram::decode(&buf[..len]), Ok(Datagram::Header(_))));
    server.stop().await;
}

/// Acks from addresses without a session are ignored.
#[tokio::test]
async fn test_rogue_ack_is_ignored() {
    let server = Harness::start(Duration::from_secs(1)).await.unwrap();
    let audio = pcm(1_500);
    server.add_wav("song.wav", &cd(), &audio);

    let rogue = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for seq in [0, 1, 7] {
        let ack = Datagram::Ack { seq }.to_vec().unwrap();
        rogue.send_to(&ack, server.addr).await.unwrap();
    }
    rogue.send_to(b"garbage", server.addr).await.unwrap();

    assert_eq!(request(&server, "song.wav").await.unwrap(), audio);
    assert!(server.wait_idle(Duration::from_secs(1)).await);
    server.stop().await;
}
