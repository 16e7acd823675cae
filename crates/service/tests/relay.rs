use std::{
    net::{SocketAddr, SocketAddrV4},
    sync::Arc,
    thread::sleep,
    time::Duration,
};

use parking_lot::Mutex;

use codec::message::{
    CreateRoomResponse, ErrorCode, JoinRoomResponse, ReflexResponse, encode_create_request,
    encode_join_request, encode_reflex_request, sign,
};
use relay_server_service::{
    PacketSender, ServiceHandler,
    session::{RoomId, SessionManager, SessionManagerOptions},
    token::TokenRotator,
};

#[derive(Clone)]
struct Handler {
    closed: Arc<Mutex<Vec<RoomId>>>,
}

impl Default for Handler {
    fn default() -> Self {
        Self {
            closed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ServiceHandler for Handler {
    fn get_secret(&self, username: &str) -> Option<String> {
        match username {
            "user1" => Some("password1".to_string()),
            "user2" => Some("password2".to_string()),
            _ => None,
        }
    }

    fn on_session_closed(&self, room: &RoomId) {
        self.closed.lock().push(*room);
    }
}

#[derive(Clone, Default)]
struct Sender(Arc<Mutex<Vec<(SocketAddrV4, Vec<u8>)>>>);

impl Sender {
    fn take(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl PacketSender for Sender {
    fn send(&self, target: SocketAddrV4, bytes: &[u8]) {
        self.0.lock().push((target, bytes.to_vec()));
    }
}

struct Fixture {
    manager: SessionManager<Handler, Sender>,
    tokens: Arc<TokenRotator>,
    handler: Handler,
    sender: Sender,
}

fn fixture(idle_timeout: Duration) -> Fixture {
    let tokens = TokenRotator::new();
    let handler = Handler::default();
    let sender = Sender::default();

    Fixture {
        manager: SessionManager::new(SessionManagerOptions {
            idle_timeout,
            eviction_interval: Duration::ZERO,
            tokens: tokens.clone(),
            handler: handler.clone(),
            sender: sender.clone(),
        }),
        tokens,
        handler,
        sender,
    }
}

fn addr(s: &str) -> SocketAddrV4 {
    s.parse().unwrap()
}

const A: &str = "203.0.113.7:40000";
const B: &str = "198.51.100.2:50000";
const C: &str = "192.0.2.9:33333";

fn create_frame(username: &str, secret: &str, token: &[u8; 16], source: SocketAddrV4) -> [u8; 256] {
    let mut frame =
        encode_create_request(b"0123456789ABCDEF", username, token, source, 1700000000).unwrap();
    sign(&mut frame, secret.as_bytes()).unwrap();
    frame
}

/// Runs a valid CreateRoom from `source` and returns the room id.
fn create_room(fx: &mut Fixture, source: SocketAddrV4) -> RoomId {
    let token = fx.tokens.issued();
    fx.manager
        .handle_packet(SocketAddr::V4(source), &create_frame("user1", "password1", &token, source));

    let sent = fx.sender.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, source);

    let response = CreateRoomResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.code, ErrorCode::Ok);
    assert_ne!(response.room, &[0u8; 16]);
    RoomId::from(*response.room)
}

fn join_room(fx: &mut Fixture, source: SocketAddrV4, room: &RoomId) {
    let frame = encode_join_request(b"FEDCBA9876543210", "user2", room.as_bytes()).unwrap();
    fx.manager.handle_packet(SocketAddr::V4(source), &frame);

    let sent = fx.sender.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, source);

    let response = JoinRoomResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.code, ErrorCode::Ok);
    assert_eq!(response.room, room.as_bytes());
}

/// Index consistency: every binding resolves to a live session that
/// names the bound address as a peer, every peer address is bound to
/// its own session, and the binding count matches the peer count.
fn assert_indices_consistent(manager: &SessionManager<Handler, Sender>) {
    let mut peers = 0;

    for session in manager.sessions() {
        peers += 1;
        assert_eq!(manager.room_of(&session.first_addr), Some(session.room));

        if let Some(second) = session.second_addr {
            peers += 1;
            assert_eq!(manager.room_of(&second), Some(session.room));
        }
    }

    for (addr, room) in manager.bindings() {
        let session = manager.session(&room).unwrap();
        assert!(session.first_addr == addr || session.second_addr == Some(addr));
    }

    assert_eq!(manager.bindings().count(), peers);
}

#[test]
fn reflex_reports_observed_address_and_token() {
    let mut fx = fixture(Duration::from_secs(30));

    fx.manager
        .handle_packet(SocketAddr::V4(addr(A)), &encode_reflex_request());

    let sent = fx.sender.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, addr(A));

    let response = ReflexResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.ip.to_le_bytes(), addr(A).ip().octets());
    assert_eq!(response.port, u32::from(addr(A).port()));
    assert_eq!(response.token, &fx.tokens.issued());

    // A reflex probe binds nothing.
    assert!(fx.manager.is_empty());
}

#[test]
fn create_room_is_idempotent() {
    let mut fx = fixture(Duration::from_secs(30));

    let room = create_room(&mut fx, addr(A));
    let again = create_room(&mut fx, addr(A));

    assert_eq!(room, again);
    assert_eq!(fx.manager.len(), 1);
    assert_indices_consistent(&fx.manager);
}

#[test]
fn distinct_addresses_get_distinct_rooms() {
    let mut fx = fixture(Duration::from_secs(30));

    let room_a = create_room(&mut fx, addr(A));
    let room_b = create_room(&mut fx, addr(B));

    assert_ne!(room_a, room_b);
    assert_eq!(fx.manager.len(), 2);
    assert_indices_consistent(&fx.manager);
}

#[test]
fn pairing_and_relay_symmetry() {
    let mut fx = fixture(Duration::from_secs(30));

    let room = create_room(&mut fx, addr(A));
    join_room(&mut fx, addr(B), &room);
    assert!(fx.manager.session(&room).unwrap().is_paired());
    assert_indices_consistent(&fx.manager);

    // A non-control payload from the creator lands verbatim on the
    // joiner.
    let payload = b"0123456789";
    fx.manager.handle_packet(SocketAddr::V4(addr(A)), payload);

    let sent = fx.sender.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, addr(B));
    assert_eq!(sent[0].1, payload);

    // And the reverse direction.
    let payload = vec![0xa5u8; 1200];
    fx.manager.handle_packet(SocketAddr::V4(addr(B)), &payload);

    let sent = fx.sender.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, addr(A));
    assert_eq!(sent[0].1, payload);

    // A third address yields no delivery.
    fx.manager.handle_packet(SocketAddr::V4(addr(C)), b"intruder");
    assert!(fx.sender.take().is_empty());
}

#[test]
fn join_room_is_idempotent() {
    let mut fx = fixture(Duration::from_secs(30));

    let room = create_room(&mut fx, addr(A));
    join_room(&mut fx, addr(B), &room);
    join_room(&mut fx, addr(B), &room);

    assert_eq!(fx.manager.len(), 1);
    assert_eq!(fx.manager.session(&room).unwrap().second_addr, Some(addr(B)));
    assert_indices_consistent(&fx.manager);
}

#[test]
fn relay_before_pairing_delivers_nothing() {
    let mut fx = fixture(Duration::from_secs(30));

    create_room(&mut fx, addr(A));
    fx.manager.handle_packet(SocketAddr::V4(addr(A)), b"early");
    assert!(fx.sender.take().is_empty());
}

#[test]
fn address_spoofing_rejected() {
    let mut fx = fixture(Duration::from_secs(30));

    // The frame claims B's address but arrives from A.
    let token = fx.tokens.issued();
    let frame = create_frame("user1", "password1", &token, addr(B));
    fx.manager.handle_packet(SocketAddr::V4(addr(A)), &frame);

    let sent = fx.sender.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, addr(A));

    let response = CreateRoomResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.code, ErrorCode::AddressInvalid);
    assert_eq!(response.room, &[0u8; 16]);
    assert!(fx.manager.is_empty());
}

#[test]
fn wrong_password_rejected() {
    let mut fx = fixture(Duration::from_secs(30));

    let token = fx.tokens.issued();
    let frame = create_frame("user1", "wrong", &token, addr(A));
    fx.manager.handle_packet(SocketAddr::V4(addr(A)), &frame);

    let sent = fx.sender.take();
    let response = CreateRoomResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.code, ErrorCode::AuthFailed);
    assert!(fx.manager.is_empty());
}

#[test]
fn unknown_user_reads_as_auth_failure() {
    let mut fx = fixture(Duration::from_secs(30));

    let token = fx.tokens.issued();
    let frame = create_frame("nobody", "password1", &token, addr(A));
    fx.manager.handle_packet(SocketAddr::V4(addr(A)), &frame);

    let sent = fx.sender.take();
    let response = CreateRoomResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.code, ErrorCode::AuthFailed);
}

#[test]
fn token_acceptance_window() {
    let mut fx = fixture(Duration::from_secs(30));

    // A token issued before one rotation is still accepted.
    let token = fx.tokens.issued();
    fx.tokens.rotate();

    fx.manager
        .handle_packet(SocketAddr::V4(addr(A)), &create_frame("user1", "password1", &token, addr(A)));

    let sent = fx.sender.take();
    let response = CreateRoomResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.code, ErrorCode::Ok);

    // After a second rotation the same token fails.
    fx.tokens.rotate();

    fx.manager
        .handle_packet(SocketAddr::V4(addr(B)), &create_frame("user1", "password1", &token, addr(B)));

    let sent = fx.sender.take();
    let response = CreateRoomResponse::decode(&sent[0].1).unwrap();
    assert_eq!(response.code, ErrorCode::AuthFailed);
}

#[test]
fn join_unknown_room_is_silent() {
    let mut fx = fixture(Duration::from_secs(30));

    let frame = encode_join_request(&[1; 16], "user2", &[0x5a; 16]).unwrap();
    fx.manager.handle_packet(SocketAddr::V4(addr(B)), &frame);

    assert!(fx.sender.take().is_empty());
    assert!(fx.manager.is_empty());
}

#[test]
fn join_from_creator_address_is_refused() {
    let mut fx = fixture(Duration::from_secs(30));

    let room = create_room(&mut fx, addr(A));

    let frame = encode_join_request(&[1; 16], "user1", room.as_bytes()).unwrap();
    fx.manager.handle_packet(SocketAddr::V4(addr(A)), &frame);

    assert!(fx.sender.take().is_empty());
    assert!(!fx.manager.session(&room).unwrap().is_paired());
    assert_indices_consistent(&fx.manager);
}

#[test]
fn one_address_joins_one_session_only() {
    let mut fx = fixture(Duration::from_secs(30));

    let room_a = create_room(&mut fx, addr(A));
    let room_b = create_room(&mut fx, addr(B));

    // B already owns a session, so it cannot join A's room.
    let frame = encode_join_request(&[1; 16], "user2", room_a.as_bytes()).unwrap();
    fx.manager.handle_packet(SocketAddr::V4(addr(B)), &frame);

    assert!(fx.sender.take().is_empty());
    assert!(!fx.manager.session(&room_a).unwrap().is_paired());
    assert_eq!(fx.manager.room_of(&addr(B)), Some(room_b));
    assert_indices_consistent(&fx.manager);
}

#[test]
fn later_joiner_replaces_the_previous_binding() {
    let mut fx = fixture(Duration::from_secs(30));

    let room = create_room(&mut fx, addr(A));
    join_room(&mut fx, addr(B), &room);
    join_room(&mut fx, addr(C), &room);

    assert_eq!(fx.manager.session(&room).unwrap().second_addr, Some(addr(C)));
    assert_eq!(fx.manager.room_of(&addr(B)), None);
    assert_indices_consistent(&fx.manager);

    // The replaced joiner is unbound now; its datagrams go nowhere.
    fx.manager.handle_packet(SocketAddr::V4(addr(B)), b"stale");
    assert!(fx.sender.take().is_empty());

    fx.manager.handle_packet(SocketAddr::V4(addr(C)), b"fresh");
    let sent = fx.sender.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, addr(A));
}

#[test]
fn idle_sessions_are_evicted() {
    let mut fx = fixture(Duration::from_millis(20));

    let room = create_room(&mut fx, addr(A));
    join_room(&mut fx, addr(B), &room);

    sleep(Duration::from_millis(40));
    fx.manager.handle_idle();

    assert!(fx.manager.is_empty());
    assert_eq!(fx.manager.room_of(&addr(A)), None);
    assert_eq!(fx.manager.room_of(&addr(B)), None);
    assert_eq!(fx.handler.closed.lock().as_slice(), &[room]);
    assert_indices_consistent(&fx.manager);

    // A join after eviction is silently dropped.
    let frame = encode_join_request(&[1; 16], "user2", room.as_bytes()).unwrap();
    fx.manager.handle_packet(SocketAddr::V4(addr(C)), &frame);
    assert!(fx.sender.take().is_empty());
}

#[test]
fn relayed_traffic_keeps_a_session_alive() {
    let mut fx = fixture(Duration::from_millis(150));

    let room = create_room(&mut fx, addr(A));
    join_room(&mut fx, addr(B), &room);

    // Keep the session busy past the idle timeout.
    for _ in 0..4 {
        sleep(Duration::from_millis(50));
        fx.manager.handle_packet(SocketAddr::V4(addr(A)), b"keepalive");
    }

    fx.manager.handle_idle();
    assert_eq!(fx.manager.len(), 1);

    // Silence, and the session goes away.
    sleep(Duration::from_millis(250));
    fx.manager.handle_idle();
    assert!(fx.manager.is_empty());
}

#[test]
fn eviction_scans_are_rate_limited() {
    let tokens = TokenRotator::new();
    let handler = Handler::default();
    let sender = Sender::default();

    let mut manager = SessionManager::new(SessionManagerOptions {
        idle_timeout: Duration::ZERO,
        eviction_interval: Duration::from_secs(3600),
        tokens: tokens.clone(),
        handler: handler.clone(),
        sender: sender.clone(),
    });

    let token = tokens.issued();
    manager.handle_packet(
        SocketAddr::V4(addr(A)),
        &create_frame("user1", "password1", &token, addr(A)),
    );
    sender.take();

    // The session is already past the (zero) idle timeout, but the
    // next scan is an hour away.
    sleep(Duration::from_millis(5));
    manager.handle_idle();
    assert_eq!(manager.len(), 1);
}

#[test]
fn shutdown_drops_all_sessions() {
    let mut fx = fixture(Duration::from_secs(30));

    let room_a = create_room(&mut fx, addr(A));
    let room_b = create_room(&mut fx, addr(B));

    fx.manager.shutdown();

    assert!(fx.manager.is_empty());
    assert_eq!(fx.manager.bindings().count(), 0);

    let mut closed = fx.handler.closed.lock().clone();
    closed.sort_by_key(|room| *room.as_bytes());
    let mut expected = vec![room_a, room_b];
    expected.sort_by_key(|room| *room.as_bytes());
    assert_eq!(closed, expected);
}

#[test]
fn malformed_create_is_dropped_silently() {
    let mut fx = fixture(Duration::from_secs(30));

    // Valid header, garbage username field.
    let token = fx.tokens.issued();
    let mut frame = create_frame("user1", "password1", &token, addr(A));
    frame[64] = 0xff;
    frame[65] = 0xfe;

    fx.manager.handle_packet(SocketAddr::V4(addr(A)), &frame);
    assert!(fx.sender.take().is_empty());
    assert!(fx.manager.is_empty());
}
