//! TCP sockets and listeners over loopback.

mod common;

use std::sync::Arc;

use common::{
    Event, Reactor, Recorder, ServerEvent, ServerRecorder, QUIET, accept, any_local, next, received,
    tag, wait_for,
};
use bytes::BytesMut;
use tether_net::packet::{
    LengthPrefixedReader, LengthPrefixedWriter, PacketReader, PacketWriter, ProtocolError,
};
use tether_net::tcp::{AllowAll, ConnectionAcceptor, ServerState};
use tether_net::{Connection, NetConfig, NetError, SocketObserver, TcpSocketConfig};

/// A connected pair: (client, its events, server side, its events).
fn connected(
    reactor: &Reactor,
) -> (
    tether_net::Socket,
    crossbeam_channel::Receiver<Event>,
    tether_net::Socket,
    crossbeam_channel::Receiver<Event>,
) {
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let (server_observer, server_events) = ServerRecorder::new();
    server.listen(server_observer).unwrap();

    let client = reactor.handle.open_socket(server.local_addr()).unwrap();
    let (client_observer, client_events) = Recorder::new();
    client.listen(client_observer).unwrap();

    let peer = accept(&server_events);
    let (peer_observer, peer_events) = Recorder::new();
    peer.listen(peer_observer).unwrap();

    assert_eq!(next(&client_events), Event::Opened);
    assert_eq!(next(&peer_events), Event::Opened);
    (client, client_events, peer, peer_events)
}

#[test]
fn test_packets_arrive_in_submission_order() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let (server_observer, server_events) = ServerRecorder::new();
    server.listen(server_observer).unwrap();

    let client = reactor.handle.open_socket(server.local_addr()).unwrap();
    client.set_packet_writer(Box::new(LengthPrefixedWriter::default()));
    for packet in [b"A".to_vec(), b"BB".to_vec(), b"CCC".to_vec()] {
        assert!(client.write(packet));
    }
    let (client_observer, _client_events) = Recorder::new();
    client.listen(client_observer).unwrap();

    let peer = accept(&server_events);
    peer.set_packet_reader(Box::new(LengthPrefixedReader::default()));
    let (peer_observer, peer_events) = Recorder::new();
    peer.listen(peer_observer).unwrap();

    assert_eq!(
        received(&peer_events, 3),
        vec![b"A".to_vec(), b"BB".to_vec(), b"CCC".to_vec()]
    );
    assert_eq!(peer.bytes_read(), 3 * 4 + 6);
    reactor.stop();
}

#[test]
fn test_packet_sent_tags_follow_submission_order() {
    let reactor = Reactor::start();
    let (client, client_events, _peer, _peer_events) = connected(&reactor);

    for i in 0..20u32 {
        assert!(client.write_tagged(vec![i as u8; 512], tag(i)));
    }
    let tags: Vec<Option<u32>> = (0..20)
        .map(|_| {
            wait_for(&client_events, |event| match event {
                Event::Sent(tag) => Some(tag),
                _ => None,
            })
        })
        .collect();

    assert_eq!(tags, (0..20).map(Some).collect::<Vec<_>>());
    assert!(client_events.recv_timeout(QUIET).is_err());
    reactor.stop();
}

#[test]
fn test_write_beyond_queue_limit_is_rejected_whole() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let (server_observer, server_events) = ServerRecorder::new();
    server.listen(server_observer).unwrap();

    // Nothing is flushed before the client listens, so the queue only grows.
    let client = reactor.handle.open_socket(server.local_addr()).unwrap();
    client.set_max_queue_size(Some(10));
    assert!(client.write(vec![0; 6]));
    assert!(!client.write(vec![0; 6]));
    assert_eq!(client.write_queue_size(), 6);
    assert!(client.write(vec![0; 4]));
    assert!(!client.write(vec![0; 1]));
    assert_eq!(client.write_queue_size(), 10);

    let (client_observer, client_events) = Recorder::new();
    client.listen(client_observer).unwrap();
    let _peer = accept(&server_events);

    for _ in 0..2 {
        wait_for(&client_events, |event| matches!(event, Event::Sent(None)).then_some(()));
    }
    assert_eq!(client.write_queue_size(), 0);
    assert!(client.write(vec![0; 10]));
    reactor.stop();
}

#[test]
fn test_configured_queue_limit_applies_to_new_sockets() {
    let config = NetConfig::new().socket(TcpSocketConfig::new().max_queue_size(64).no_delay(true));
    let reactor = Reactor::with_config(config);
    let server = reactor.handle.open_server_socket(any_local()).unwrap();

    let client = reactor.handle.open_socket(server.local_addr()).unwrap();
    assert_eq!(client.max_queue_size(), Some(64));
    client.set_max_queue_size(None);
    assert_eq!(client.max_queue_size(), None);
    reactor.stop();
}

#[test]
fn test_peer_close_reports_broken_exactly_once() {
    let reactor = Reactor::start();
    let (client, client_events, _peer, peer_events) = connected(&reactor);

    client.close();
    client.close();

    assert_eq!(next(&peer_events), Event::Broken(None));
    assert!(peer_events.recv_timeout(QUIET).is_err());
    assert_eq!(next(&client_events), Event::Broken(None));
    assert!(client_events.recv_timeout(QUIET).is_err());
    assert!(!client.is_open());
    assert!(!client.write(b"late".to_vec()));
    reactor.stop();
}

#[test]
fn test_close_after_write_flushes_then_closes() {
    let reactor = Reactor::start();
    let (client, client_events, _peer, peer_events) = connected(&reactor);

    assert!(client.write_tagged(b"one".to_vec(), tag(1)));
    assert!(client.write_tagged(b"two".to_vec(), tag(2)));
    client.close_after_write();
    assert!(!client.write(b"three".to_vec()));

    let events: Vec<Event> = (0..3).map(|_| next(&client_events)).collect();
    assert_eq!(
        events,
        vec![Event::Sent(Some(1)), Event::Sent(Some(2)), Event::Broken(None)]
    );

    let mut bytes = Vec::new();
    loop {
        match next(&peer_events) {
            Event::Received(packet) => bytes.extend(packet),
            Event::Broken(cause) => {
                assert_eq!(cause, None);
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(bytes, b"onetwo");
    reactor.stop();
}

#[test]
fn test_rejected_connections_are_dropped_silently() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let probe = "10.1.2.3:4".parse().unwrap();
    assert!(server.connection_acceptor().accept_connection(&probe));

    // `None` is treated as deny-all.
    server.set_connection_acceptor(None);
    assert!(!server.connection_acceptor().accept_connection(&probe));
    let (server_observer, server_events) = ServerRecorder::new();
    server.listen(server_observer).unwrap();

    let client = reactor.handle.open_socket(server.local_addr()).unwrap();
    let (client_observer, client_events) = Recorder::new();
    client.listen(client_observer).unwrap();

    wait_for(&client_events, |event| matches!(event, Event::Broken(_)).then_some(()));
    assert!(server_events.recv_timeout(QUIET).is_err());
    assert_eq!(server.total_refused(), 1);
    assert_eq!(server.total_accepted(), 0);
    assert_eq!(server.total_failed(), 0);

    server.set_connection_acceptor(Some(Arc::new(AllowAll)));
    let _client = reactor.handle.open_socket(server.local_addr()).unwrap();
    assert!(matches!(next(&server_events), ServerEvent::New(_)));
    reactor.stop();
}

#[test]
fn test_custom_admission_policy_sees_peer_address() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
    server.set_connection_acceptor(Some(Arc::new(move |addr: &std::net::SocketAddr| {
        let _ = seen_tx.send(*addr);
        addr.ip().is_loopback()
    })));
    let (server_observer, server_events) = ServerRecorder::new();
    server.listen(server_observer).unwrap();

    let _client = reactor.handle.open_socket(server.local_addr()).unwrap();
    let peer = accept(&server_events);
    assert_eq!(next(&seen_rx), peer.peer_addr());
    assert!(peer.ip().is_loopback());
    reactor.stop();
}

#[test]
fn test_second_listen_is_rejected() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let (first, _) = ServerRecorder::new();
    let (second, _) = ServerRecorder::new();
    server.listen(first).unwrap();
    assert!(matches!(server.listen(second), Err(NetError::ObserverAlreadySet)));

    let client = reactor.handle.open_socket(server.local_addr()).unwrap();
    let (first, _) = Recorder::new();
    let (second, _) = Recorder::new();
    client.listen(first).unwrap();
    assert!(matches!(client.listen(second), Err(NetError::ObserverAlreadySet)));
    reactor.stop();
}

#[test]
fn test_listen_on_closed_socket_reports_broken() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let client = reactor.handle.open_socket(server.local_addr()).unwrap();

    client.close();
    let (observer, events) = Recorder::new();
    client.listen(observer).unwrap();

    assert_eq!(next(&events), Event::Broken(None));
    assert!(events.recv_timeout(QUIET).is_err());
    reactor.stop();
}

#[test]
fn test_listen_on_closed_server_reports_died() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    assert_eq!(server.state(), ServerState::Bound);

    server.close();
    let (observer, events) = ServerRecorder::new();
    server.listen(observer).unwrap();

    assert!(matches!(next(&events), ServerEvent::Died(None)));
    assert!(!server.is_open());
    reactor.stop();
}

#[test]
fn test_failed_connect_reports_cause() {
    let reactor = Reactor::start();
    let addr = {
        let listener = std::net::TcpListener::bind(any_local()).unwrap();
        listener.local_addr().unwrap()
    };

    match reactor.handle.open_socket(addr) {
        Err(err) => assert!(matches!(err, NetError::Connect { .. })),
        Ok(client) => {
            let (observer, events) = Recorder::new();
            client.listen(observer).unwrap();
            match next(&events) {
                Event::Broken(Some(cause)) => assert!(cause.contains("Failed to connect")),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
    reactor.stop();
}

#[test]
fn test_codec_error_closes_with_protocol_cause() {
    let reactor = Reactor::start();
    let (client, _client_events, peer, peer_events) = connected(&reactor);
    peer.set_packet_reader(Box::new(LengthPrefixedReader::default().max_packet_size(4)));
    client.set_packet_writer(Box::new(LengthPrefixedWriter::default()));

    assert!(client.write(vec![7; 16]));
    match wait_for(&peer_events, |event| match event {
        Event::Broken(cause) => Some(cause),
        _ => None,
    }) {
        Some(cause) => assert!(cause.starts_with("Protocol error")),
        None => panic!("expected a protocol error"),
    }
    reactor.stop();
}

struct BrokenReader;

impl PacketReader for BrokenReader {
    fn next_packet(&mut self, _buffer: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
        panic!("reader bug");
    }
}

struct BrokenWriter;

impl PacketWriter for BrokenWriter {
    fn write(&mut self, _packet: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        panic!("writer bug");
    }
}

fn broken_cause(events: &crossbeam_channel::Receiver<Event>) -> Option<String> {
    wait_for(events, |event| match event {
        Event::Broken(cause) => Some(cause),
        _ => None,
    })
}

const CODEC_PANICKED: &str = "Protocol error: packet codec panicked";

#[test]
fn test_panicking_reader_closes_the_connection() {
    let reactor = Reactor::start();
    let (client, client_events, peer, peer_events) = connected(&reactor);
    peer.set_packet_reader(Box::new(BrokenReader));

    assert!(client.write(b"anything".to_vec()));
    assert_eq!(broken_cause(&peer_events).as_deref(), Some(CODEC_PANICKED));
    assert!(!peer.is_open());
    broken_cause(&client_events);

    let errors = reactor.errors.lock().clone();
    assert!(errors.iter().any(|e| e.contains("packet_reader") && e.contains("reader bug")));
    reactor.stop();
}

#[test]
fn test_panicking_writer_closes_the_connection() {
    let reactor = Reactor::start();
    let (client, client_events, _peer, _peer_events) = connected(&reactor);
    client.set_packet_writer(Box::new(BrokenWriter));

    assert!(client.write(b"anything".to_vec()));
    assert_eq!(broken_cause(&client_events).as_deref(), Some(CODEC_PANICKED));
    assert_eq!(client.write_queue_size(), 0);

    let errors = reactor.errors.lock().clone();
    assert!(errors.iter().any(|e| e.contains("packet_writer") && e.contains("writer bug")));
    reactor.stop();
}

struct Exploding;

impl SocketObserver for Exploding {
    fn packet_received(&mut self, _socket: &dyn Connection, _packet: Vec<u8>) {
        panic!("observer bug");
    }
}

#[test]
fn test_observer_panic_reaches_sink_and_reactor_survives() {
    let reactor = Reactor::start();
    let server = reactor.handle.open_server_socket(any_local()).unwrap();
    let (server_observer, server_events) = ServerRecorder::new();
    server.listen(server_observer).unwrap();

    let client = reactor.handle.open_socket(server.local_addr()).unwrap();
    let (client_observer, client_events) = Recorder::new();
    client.listen(client_observer).unwrap();
    accept(&server_events).listen(Box::new(Exploding)).unwrap();

    assert_eq!(next(&client_events), Event::Opened);
    assert!(client.write(b"boom".to_vec()));
    wait_for(&client_events, |event| matches!(event, Event::Sent(_)).then_some(()));

    for _ in 0..100 {
        if !reactor.errors.lock().is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert!(client.write(b"still alive".to_vec()));
    wait_for(&client_events, |event| matches!(event, Event::Sent(_)).then_some(()));

    let errors = reactor.errors.lock().clone();
    assert!(!errors.is_empty());
    assert!(errors[0].contains("packet_received"));
    assert!(errors[0].contains("observer bug"));
    reactor.stop();
}

#[test]
fn test_stop_closes_live_connections() {
    let reactor = Reactor::start();
    let (client, client_events, _peer, peer_events) = connected(&reactor);

    reactor.stop();
    assert_eq!(next(&client_events), Event::Broken(None));
    assert_eq!(next(&peer_events), Event::Broken(None));
    assert!(!client.is_open());
}
