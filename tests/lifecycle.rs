//! End-to-end lifecycle tests over the loopback engine.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use quic_endpoint::config::{EndpointOptions, SessionOptions};
use quic_endpoint::core::constants::{QUIC_VERSION_1, QUIC_VERSION_2, UV_EADDRINUSE};
use quic_endpoint::core::{
    CloseContext, CloseError, Engine, EndpointHandle, EventSink, QuicError, QuicResult,
};
use quic_endpoint::event::{EndpointEvent, SessionEvent, SessionEventKind};
use quic_endpoint::{Endpoint, LoopbackNetwork, Session};

fn pump(endpoints: &[&Endpoint]) {
    // Events on one side can produce events on the other.
    for _ in 0..4 {
        for endpoint in endpoints {
            endpoint.process_events();
        }
    }
}

fn options() -> SessionOptions {
    SessionOptions::default().with_alpn("h3")
}

struct Pair {
    server: Endpoint,
    client: Endpoint,
    server_session: Session,
    client_session: Session,
}

fn connect_pair(network: &LoopbackNetwork) -> Pair {
    let server = Endpoint::new(network, EndpointOptions::default()).unwrap();
    server.listen(options()).unwrap();
    let mut incoming = server.subscribe();
    let address = server.address().unwrap();

    let client = Endpoint::new(network, EndpointOptions::default()).unwrap();
    let client_session = client.connect(address, options()).unwrap();
    pump(&[&client, &server]);

    let server_session = match incoming.try_recv() {
        Some(EndpointEvent::Session(event)) => event.session().clone(),
        None => panic!("no inbound session"),
    };
    Pair {
        server,
        client,
        server_session,
        client_session,
    }
}

#[derive(Default)]
struct CountingEngine {
    created: AtomicUsize,
}

impl Engine for CountingEngine {
    fn create_endpoint(
        &self,
        _options: &EndpointOptions,
        _events: EventSink,
    ) -> QuicResult<Box<dyn EndpointHandle>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Err(QuicError::Native("counting engine creates nothing".into()))
    }
}

#[test]
fn test_invalid_options_never_reach_engine() {
    let engine = CountingEngine::default();
    let options = EndpointOptions {
        udp_ttl: Some(300),
        ..Default::default()
    };
    let err = Endpoint::new(&engine, options).unwrap_err();
    assert!(err.is_range_error());
    assert_eq!(engine.created.load(Ordering::SeqCst), 0);

    let err = Endpoint::new(&engine, EndpointOptions::default()).unwrap_err();
    assert!(matches!(err, QuicError::Native(_)));
    assert_eq!(engine.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exchange_then_close() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);
    let mut handshakes = pair.client_session.subscribe(SessionEventKind::Handshake);
    let mut incoming_streams = pair.server_session.subscribe(SessionEventKind::Stream);

    assert!(pair.client_session.state().is_handshake_completed());
    assert_eq!(pair.client.stats().client_sessions(), 1);
    assert_eq!(pair.server.stats().server_sessions(), 1);
    // The handshake was dispatched before we subscribed.
    assert!(handshakes.try_recv().is_none());

    let stream = pair.client_session.open_bidirectional_stream().unwrap();
    assert_eq!(stream.id().0, 0);
    let writer = stream.writer().unwrap();
    writer.write("hello").unwrap();
    writer.finish().unwrap();
    pump(&[&pair.client, &pair.server]);

    let inbound = match incoming_streams.try_recv() {
        Some(SessionEvent::Stream(event)) => event.stream().clone(),
        other => panic!("expected a stream event, got {other:?}"),
    };
    assert_eq!(inbound.id(), stream.id());
    assert_eq!(&inbound.reader().unwrap().read_to_end().await[..], b"hello");

    let reply = inbound.writer().unwrap();
    reply.write(&b"world"[..]).unwrap();
    reply.finish().unwrap();
    assert_eq!(&stream.reader().unwrap().read_to_end().await[..], b"world");
    pump(&[&pair.client, &pair.server]);

    assert!(stream.is_destroyed());
    assert!(inbound.is_destroyed());
    assert_eq!(stream.stats().bytes_sent(), 5);
    assert_eq!(stream.stats().bytes_received(), 5);
    assert!(stream.stats().is_snapshot());

    let session_closed = pair.client_session.close();
    pump(&[&pair.client, &pair.server]);
    session_closed.await.unwrap();
    assert!(pair.server_session.is_destroyed());
    assert!(pair.server_session.closed().outcome().unwrap().is_ok());
    assert!(pair.client.sessions().is_empty());
    assert!(pair.server.sessions().is_empty());

    let client_closed = pair.client.close();
    let server_closed = pair.server.close();
    pump(&[&pair.client, &pair.server]);
    client_closed.await.unwrap();
    server_closed.await.unwrap();

    // Views stay readable after finalization.
    assert!(pair.client.stats().is_snapshot());
    assert!(pair.client.stats().bytes_sent() >= 5);
    assert!(pair.client_session.stats().bytes_received() >= 5);
    assert!(pair.client_session.stats().smoothed_rtt() > 0);
    assert!(pair.client_session.state().is_destroyed());
}

#[test]
fn test_close_is_idempotent() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);

    let first = pair.client_session.close();
    let second = pair.client_session.close();
    assert!(first.same_as(&second));
    assert!(first.same_as(&pair.client_session.closed()));
    assert!(pair.client_session.path().is_none());
    assert!(matches!(
        pair.client_session.send_datagram("late"),
        Err(QuicError::InvalidState(_))
    ));

    let endpoint_first = pair.server.close();
    assert!(endpoint_first.same_as(&pair.server.close()));
    assert!(pair.server.address().is_none());
    assert!(pair.server.listen(options()).is_err());
}

#[test]
fn test_destroy_settles_once() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);

    let closed = pair.client_session.closed();
    let io = std::io::Error::other("boom");
    pair.client_session.destroy(Some(CloseError::aborted(io)));
    assert!(pair.client_session.is_destroyed());
    assert!(matches!(closed.outcome(), Some(Err(CloseError::Aborted(_)))));

    // A later clean close must not overwrite the rejection.
    pair.client_session.destroy(None);
    pump(&[&pair.client, &pair.server]);
    assert!(matches!(closed.outcome(), Some(Err(CloseError::Aborted(_)))));

    // The peer is closed cleanly.
    assert!(pair.server_session.is_destroyed());
    assert!(matches!(pair.server_session.closed().outcome(), Some(Ok(()))));
}

#[test]
fn test_stream_refused_without_handshake() {
    let network = LoopbackNetwork::new();
    let client = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    let nowhere: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let session = client.connect(nowhere, options()).unwrap();

    assert!(!session.state().is_stream_open_allowed());
    assert!(matches!(
        session.open_bidirectional_stream(),
        Err(QuicError::OpenStreamFailed)
    ));

    pump(&[&client]);
    assert!(session.is_destroyed());
    assert!(matches!(
        session.closed().outcome(),
        Some(Err(CloseError::Session { code: 0x2, .. }))
    ));
}

#[test]
fn test_text_and_binary_datagrams_match() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);
    let mut datagrams = pair.server_session.subscribe(SessionEventKind::Datagram);
    let mut statuses = pair.client_session.subscribe(SessionEventKind::DatagramStatus);
    assert!(pair.server_session.state().has_datagram_listener());

    let first = pair.client_session.send_datagram("ping").unwrap();
    let second = pair.client_session.send_datagram(b"ping").unwrap();
    assert_eq!(second, first + 1);
    assert_eq!(pair.client_session.state().last_datagram_id(), second);
    pump(&[&pair.client, &pair.server]);

    let mut payloads = Vec::new();
    while let Some(SessionEvent::Datagram(event)) = datagrams.try_recv() {
        payloads.push(event.datagram().clone());
    }
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0], payloads[1]);

    let mut acknowledged = 0;
    while let Some(SessionEvent::DatagramStatus(event)) = statuses.try_recv() {
        assert_eq!(event.status().as_str(), "acknowledged");
        acknowledged += 1;
    }
    assert_eq!(acknowledged, 2);

    drop(datagrams);
    assert!(!pair.server_session.state().has_datagram_listener());
}

#[tokio::test]
async fn test_destroy_with_error_rejects_everything() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);
    let address = pair.server.address().unwrap();
    let extra = pair.client.connect(address, options()).unwrap();
    pump(&[&pair.client, &pair.server]);
    assert_eq!(pair.client.sessions().len(), 2);

    let closed = pair.client.closed();
    let error = CloseError::aborted(std::io::Error::other("shutdown"));
    pair.client.destroy(Some(error));
    pump(&[&pair.client, &pair.server]);

    assert!(matches!(closed.await, Err(CloseError::Aborted(_))));
    for session in [&pair.client_session, &extra] {
        assert!(session.is_destroyed());
        assert!(matches!(
            session.closed().outcome(),
            Some(Err(CloseError::Aborted(_)))
        ));
    }
    assert!(pair.client.is_destroyed());
    assert!(pair.server.sessions().is_empty());
}

#[tokio::test]
async fn test_destroy_without_error_resolves() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);

    pair.client.destroy(None);
    pump(&[&pair.client, &pair.server]);

    pair.client.closed().await.unwrap();
    pair.client_session.closed().await.unwrap();
}

#[test]
fn test_snapshot_preserves_final_values() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);
    pair.client_session.send_datagram("x").unwrap();

    let closed = pair.client_session.close();
    let before = pair.client_session.stats().to_bytes();
    assert!(!pair.client_session.stats().is_snapshot());
    pump(&[&pair.client, &pair.server]);

    assert!(closed.is_settled());
    assert!(pair.client_session.stats().is_snapshot());
    assert_eq!(pair.client_session.stats().to_bytes(), before);

    let endpoint_closed = pair.client.close();
    let before = pair.client.stats().to_bytes();
    pump(&[&pair.client]);
    assert!(endpoint_closed.is_settled());
    assert_eq!(pair.client.stats().to_bytes(), before);
    assert!(!pair.client.state().is_bound());
}

#[tokio::test]
async fn test_bind_failure_rejects_close() {
    let network = LoopbackNetwork::new();
    let address: SocketAddr = "127.0.0.1:4433".parse().unwrap();
    let first = Endpoint::new(
        &network,
        EndpointOptions::builder().address(address).build().unwrap(),
    )
    .unwrap();
    first.listen(options()).unwrap();
    assert_eq!(first.address(), Some(address));

    let second = Endpoint::new(
        &network,
        EndpointOptions::builder().address(address).build().unwrap(),
    )
    .unwrap();
    second.listen(options()).unwrap();
    pump(&[&second]);

    match second.closed().await {
        Err(CloseError::EndpointClosed { context, status }) => {
            assert_eq!(context, CloseContext::BindFailure);
            assert_eq!(status, UV_EADDRINUSE);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(second.is_destroyed());
    assert!(!first.is_destroyed());
}

#[test]
fn test_busy_server_refuses() {
    let network = LoopbackNetwork::new();
    let server = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    server.listen(options()).unwrap();
    server.set_busy(true).unwrap();
    assert!(server.state().is_busy());
    let address = server.address().unwrap();

    let client = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    let session = client.connect(address, options()).unwrap();
    pump(&[&client, &server]);

    assert!(matches!(
        session.closed().outcome(),
        Some(Err(CloseError::Session { code: 0x2, .. }))
    ));
    assert_eq!(server.stats().server_busy_count(), 1);
    assert!(server.sessions().is_empty());

    server.set_busy(false).unwrap();
    let session = client.connect(address, options()).unwrap();
    pump(&[&client, &server]);
    assert!(!session.is_destroyed());
    assert_eq!(server.sessions().len(), 1);
}

#[test]
fn test_version_negotiation_closes_session() {
    let network = LoopbackNetwork::new();
    let server = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    server.listen(options()).unwrap();
    let address = server.address().unwrap();

    let client = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    let mut unsupported = options();
    unsupported.version = Some(0x0a0a_0a0a);
    unsupported.min_version = Some(QUIC_VERSION_1);
    let session = client.connect(address, unsupported).unwrap();
    let mut negotiations = session.subscribe(SessionEventKind::VersionNegotiation);
    pump(&[&client, &server]);

    match negotiations.try_recv() {
        Some(SessionEvent::VersionNegotiation(event)) => {
            assert_eq!(event.version(), 0x0a0a_0a0a);
            assert_eq!(event.supported_versions(), &[QUIC_VERSION_1, QUIC_VERSION_2]);
        }
        other => panic!("expected version negotiation, got {other:?}"),
    }
    assert!(matches!(
        session.closed().outcome(),
        Some(Err(CloseError::Session { code: 0x11, .. }))
    ));
    assert_eq!(server.stats().version_negotiation_count(), 1);
    // Subscriptions end with the session.
    assert!(negotiations.try_recv().is_none());
    assert!(!negotiations.is_active());
}

#[test]
fn test_endpoint_close_waits_for_sessions() {
    let network = LoopbackNetwork::new();
    let pair = connect_pair(&network);

    let closed = pair.server.close();
    assert!(pair.server.is_closing());
    pump(&[&pair.client, &pair.server]);
    assert!(!closed.is_settled());
    assert!(!pair.server_session.is_destroyed());

    let _session_closed = pair.client_session.close();
    pump(&[&pair.client, &pair.server]);
    assert!(matches!(closed.outcome(), Some(Ok(()))));
    assert!(pair.server.is_destroyed());
}

#[test]
fn test_session_ticket_and_preferred_address() {
    let network = LoopbackNetwork::new();
    let server = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    let mut server_options = options();
    server_options.transport_params.preferred_address_ipv4 = Some("127.0.0.2:443".parse().unwrap());
    server.listen(server_options).unwrap();
    let address = server.address().unwrap();

    let client = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    let session = client.connect(address, options()).unwrap();
    let mut tickets = session.subscribe(SessionEventKind::SessionTicket);
    let mut paths = session.subscribe(SessionEventKind::PathValidation);
    pump(&[&client, &server]);

    match tickets.try_recv() {
        Some(SessionEvent::SessionTicket(event)) => assert!(!event.ticket().is_empty()),
        other => panic!("expected a ticket, got {other:?}"),
    }
    match paths.try_recv() {
        Some(SessionEvent::PathValidation(event)) => {
            assert!(event.is_preferred_address());
            assert_eq!(event.new_path().remote, "127.0.0.2:443".parse().unwrap());
            assert_eq!(event.old_path().map(|path| path.remote), Some(address));
        }
        other => panic!("expected path validation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_drive_until_closed() {
    let network = LoopbackNetwork::new();
    let server = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    server.listen(options()).unwrap();

    let driver = {
        let server = server.clone();
        tokio::spawn(async move { server.drive().await })
    };
    let closed = server.close();
    closed.await.unwrap();
    driver.await.unwrap();
    assert!(server.is_destroyed());
}

#[test]
fn test_server_observes_inbound_handshake() {
    let network = LoopbackNetwork::new();
    let server = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    server.listen(options()).unwrap();
    let mut incoming = server.subscribe();
    let address = server.address().unwrap();

    let client = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    let _client_session = client.connect(address, options()).unwrap();

    // Dispatch pauses once the new session is handed over.
    assert_eq!(server.process_events(), 1);
    let session = match incoming.try_recv() {
        Some(EndpointEvent::Session(event)) => event.session().clone(),
        None => panic!("no inbound session"),
    };
    let mut handshakes = session.subscribe(SessionEventKind::Handshake);
    assert!(server.process_events() >= 1);

    match handshakes.try_recv() {
        Some(SessionEvent::Handshake(event)) => assert_eq!(event.alpn(), "h3"),
        other => panic!("expected a handshake, got {other:?}"),
    }
    assert!(session.state().is_handshake_completed());
}

#[tokio::test]
async fn test_drive_hands_over_sessions_before_their_events() {
    let network = LoopbackNetwork::new();
    let server = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    server.listen(options()).unwrap();
    let mut incoming = server.subscribe();
    let address = server.address().unwrap();

    let driver = {
        let server = server.clone();
        tokio::spawn(async move { server.drive().await })
    };
    let client = Endpoint::new(&network, EndpointOptions::default()).unwrap();
    let _client_session = client.connect(address, options()).unwrap();

    let session = match incoming.recv().await {
        Some(EndpointEvent::Session(event)) => event.session().clone(),
        None => panic!("no inbound session"),
    };
    let mut handshakes = session.subscribe(SessionEventKind::Handshake);
    let event = tokio::time::timeout(Duration::from_secs(5), handshakes.recv())
        .await
        .unwrap();
    assert!(matches!(event, Some(SessionEvent::Handshake(_))));

    server.destroy(None);
    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .unwrap()
        .unwrap();
    assert!(server.is_destroyed());
}
