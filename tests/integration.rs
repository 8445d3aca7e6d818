//! End-to-end tests driving a session against an in-memory peer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use diameter_session::codec::{BasicCodec, Codec};
use diameter_session::protocol::{build_message, flags, Header, StreamAssembler, HEADER_SIZE};
use diameter_session::{Message, Session, SessionConfig, SessionError, SessionState};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Read one whole message off the peer side of the stream.
async fn read_message(peer: &mut DuplexStream) -> Message {
    let mut head = [0u8; HEADER_SIZE];
    peer.read_exact(&mut head).await.unwrap();
    let header = Header::decode(&head).unwrap();
    let mut body = vec![0u8; header.body_length()];
    peer.read_exact(&mut body).await.unwrap();
    Message::new(header, Bytes::from(body))
}

fn answer_to(request: &Header, body: &[u8]) -> Vec<u8> {
    let mut header = *request;
    header.flags &= !flags::REQUEST;
    header.length = (HEADER_SIZE + body.len()) as u32;
    build_message(&header, body)
}

fn raw_message(flags: u8, hop_by_hop_id: u32, body: &[u8]) -> Vec<u8> {
    let mut header = Header::new(flags, 272, 4, (HEADER_SIZE + body.len()) as u32);
    header.hop_by_hop_id = hop_by_hop_id;
    header.end_to_end_id = hop_by_hop_id ^ 0xA5A5_0000;
    build_message(&header, body)
}

#[test]
fn test_assembler_output_independent_of_chunking() {
    let mut stream = Vec::new();
    stream.extend(raw_message(flags::REQUEST, 1, b""));
    stream.extend(raw_message(0, 2, b"abc"));
    stream.extend(raw_message(flags::REQUEST | flags::PROXIABLE, 3, &[7u8; 64]));

    let mut whole = StreamAssembler::new();
    let expected = whole.ingest(&stream).unwrap();
    assert_eq!(expected.len(), 3);

    for chunk_size in [1, 3, 19, 20, 21, 50] {
        let mut assembler = StreamAssembler::new();
        let mut got = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            got.extend(assembler.ingest(chunk).unwrap());
        }
        assert_eq!(got, expected, "chunk size {}", chunk_size);
        assert!(assembler.is_empty());
    }
}

#[test]
fn test_codec_decodes_assembled_messages() {
    let codec = BasicCodec::new();
    let request = codec.construct_request(16777251, 316, Some("mme.example.org;1;7"));
    let bytes = codec.encode_message(&request.with_hop_by_hop_id(42)).unwrap();

    let mut assembler = StreamAssembler::new();
    let mut frames = assembler.ingest(&bytes[..10]).unwrap();
    frames.extend(assembler.ingest(&bytes[10..]).unwrap());
    assert_eq!(frames.len(), 1);

    let header = codec.decode_message_header(&frames[0]).unwrap();
    assert_eq!(header.hop_by_hop_id, 42);

    let decoded = codec.decode_message(frames.remove(0)).unwrap();
    let answer = codec.construct_response(&decoded);
    assert!(!answer.is_request());
    assert_eq!(answer.hop_by_hop_id(), 42);
    assert_eq!(answer.end_to_end_id(), decoded.end_to_end_id());
    assert!(answer.body().windows(7).any(|w| w == b"mme.exa"));
}

#[tokio::test(start_paused = true)]
async fn test_first_answer_wins_and_duplicate_is_ignored() {
    init_tracing();
    let (client, mut peer) = duplex(4096);
    let (session, _inbound) = Session::builder()
        .config(SessionConfig::new().with_request_timeout(Duration::from_millis(50)))
        .start(client);

    let send = session.send_request(session.create_request(4, 272));
    let peer_side = async {
        let request = read_message(&mut peer).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        peer.write_all(&answer_to(&request.header, b"first")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        peer.write_all(&answer_to(&request.header, b"again")).await.unwrap();
        request
    };

    let (result, request) = tokio::join!(send, peer_side);
    let answer = result.unwrap();
    assert_eq!(answer.hop_by_hop_id(), request.hop_by_hop_id());
    assert_eq!(answer.body(), b"first");
    assert_eq!(session.pending_requests(), 0);

    // The stray duplicate must not have disturbed the session.
    let send = session.send_request(session.create_request(4, 272));
    let peer_side = async {
        let request = read_message(&mut peer).await;
        peer.write_all(&answer_to(&request.header, b"next")).await.unwrap();
    };
    let (result, ()) = tokio::join!(send, peer_side);
    assert_eq!(result.unwrap().body(), b"next");
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_reports_id_and_duration() {
    let (client, mut peer) = duplex(4096);
    let (session, _inbound) = Session::builder().start(client);

    let send =
        session.send_request_with_timeout(session.create_request(4, 272), Duration::from_millis(50));
    let peer_side = async { read_message(&mut peer).await };

    let (result, request) = tokio::join!(send, peer_side);
    match result {
        Err(SessionError::RequestTimeout {
            hop_by_hop_id,
            timeout,
        }) => {
            assert_eq!(hop_by_hop_id, request.hop_by_hop_id());
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_matched_by_hop_by_hop_id() {
    init_tracing();
    const COUNT: usize = 16;
    let (client, mut peer) = duplex(64 * 1024);
    let (session, _inbound) = Session::builder().start(client);
    let session = Arc::new(session);

    let mut callers = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        let session = session.clone();
        callers.push(tokio::spawn(async move {
            session.send_request(session.create_request(4, 272)).await
        }));
    }

    let mut requests = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        requests.push(read_message(&mut peer).await);
    }
    let mut ids: Vec<u32> = requests.iter().map(|r| r.hop_by_hop_id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), COUNT, "hop-by-hop ids must be distinct");

    // Answer in reverse order, echoing each id in the body.
    for request in requests.iter().rev() {
        let body = request.hop_by_hop_id().to_be_bytes();
        peer.write_all(&answer_to(&request.header, &body)).await.unwrap();
    }

    for caller in callers {
        let answer = caller.await.unwrap().unwrap();
        assert_eq!(answer.body(), answer.hop_by_hop_id().to_be_bytes());
    }
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn test_inbound_request_answered_exactly_once() {
    let (client, mut peer) = duplex(4096);
    let (_session, mut inbound) = Session::builder().start(client);

    peer.write_all(&raw_message(flags::REQUEST | flags::PROXIABLE, 77, b""))
        .await
        .unwrap();

    let request = inbound.recv().await.unwrap();
    assert!(request.message.is_request());
    assert_eq!(request.message.hop_by_hop_id(), 77);

    let responder = request.responder.clone();
    let skeleton = request.response.clone();
    request.respond().await.unwrap();
    assert!(responder.is_responded());

    let answer = read_message(&mut peer).await;
    assert!(!answer.is_request());
    assert!(answer.header.is_proxiable());
    assert_eq!(answer.hop_by_hop_id(), 77);
    assert_eq!(answer.end_to_end_id(), 77 ^ 0xA5A5_0000);
    assert_eq!(answer.command_code(), 272);

    let err = responder.respond(skeleton).await.unwrap_err();
    assert!(matches!(err, SessionError::ResponseAlreadySent(77)));
}

#[tokio::test]
async fn test_answers_to_inbound_requests_in_any_order() {
    let (client, mut peer) = duplex(4096);
    let (_session, mut inbound) = Session::builder().start(client);

    peer.write_all(&raw_message(flags::REQUEST, 1, b"")).await.unwrap();
    peer.write_all(&raw_message(flags::REQUEST, 2, b"")).await.unwrap();

    let first = inbound.recv().await.unwrap();
    let second = inbound.recv().await.unwrap();
    second.respond().await.unwrap();
    first.respond().await.unwrap();

    assert_eq!(read_message(&mut peer).await.hop_by_hop_id(), 2);
    assert_eq!(read_message(&mut peer).await.hop_by_hop_id(), 1);
}

#[tokio::test]
async fn test_hooks_observe_both_directions() {
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let assigned = Arc::new(AtomicUsize::new(0));

    let (client, mut peer) = duplex(4096);
    let (session, mut inbound) = Session::builder()
        .before_any_message({
            let before = before.clone();
            let assigned = assigned.clone();
            move |message: &Message| {
                before.fetch_add(1, Ordering::SeqCst);
                assigned.store(message.hop_by_hop_id() as usize, Ordering::SeqCst);
            }
        })
        .after_any_message({
            let after = after.clone();
            move |_: &Message| {
                after.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start(client);

    // Outbound request, then its answer.
    let send = session.send_request(session.create_request(4, 272));
    let peer_side = async {
        let request = read_message(&mut peer).await;
        peer.write_all(&answer_to(&request.header, b"")).await.unwrap();
        request
    };
    let (result, request) = tokio::join!(send, peer_side);
    result.unwrap();
    assert_eq!(assigned.load(Ordering::SeqCst), request.hop_by_hop_id() as usize);
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);

    // Inbound request, then our answer.
    peer.write_all(&raw_message(flags::REQUEST, 9, b"")).await.unwrap();
    inbound.recv().await.unwrap().respond().await.unwrap();
    read_message(&mut peer).await;
    assert_eq!(before.load(Ordering::SeqCst), 2);
    assert_eq!(after.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_undecodable_message_skipped_without_closing() {
    let (client, mut peer) = duplex(4096);
    let (session, mut inbound) = Session::builder().start(client);

    // Version 2 is rejected by the codec but the framing is intact.
    let mut bad = raw_message(flags::REQUEST, 5, b"");
    bad[0] = 2;
    peer.write_all(&bad).await.unwrap();
    peer.write_all(&raw_message(flags::REQUEST, 6, b"")).await.unwrap();

    let request = inbound.recv().await.unwrap();
    assert_eq!(request.message.hop_by_hop_id(), 6);
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_config_from_json_applies_to_session() {
    let config = SessionConfig::from_json_str(
        r#"{ "session_id": "pgw.example.org;99", "request_timeout_ms": 250 }"#,
    )
    .unwrap();
    assert_eq!(config.request_timeout(), Duration::from_millis(250));

    let (session, _inbound) = Session::builder().config(config).build();
    let request = session.create_request(0, 280);
    assert!(request.body().windows(18).any(|w| w == b"pgw.example.org;99"));
}
