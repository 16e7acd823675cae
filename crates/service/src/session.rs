use std::{
    fmt,
    net::{SocketAddr, SocketAddrV4},
    sync::Arc,
    time::{Duration, Instant},
};

use ahash::{HashMap, HashMapExt};
use rand::Rng;

use codec::message::{
    CreateRoomRequest, ErrorCode, JoinRoomRequest, MessageType, classify, encode_create_response,
    encode_join_response, encode_reflex_response,
};

use crate::{PacketSender, ServiceHandler, auth::Authenticator, token::TokenRotator};

/// A 128-bit room identifier, carried raw on the wire.
///
/// Generated server side with the RFC 4122 version/variant bits set so
/// the bytes read back as a well-formed v4 UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId([u8; 16]);

impl RoomId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes);

        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for RoomId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }

            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

/// A live relay session.
///
/// Created by the first successful CreateRoom from an unbound address;
/// paired when a valid JoinRoom fills in `second_addr`. `last_active`
/// moves forward on every packet handled for the session, relayed
/// datagrams included.
#[derive(Debug, Clone)]
pub struct Session {
    pub room: RoomId,
    pub first_addr: SocketAddrV4,
    pub second_addr: Option<SocketAddrV4>,
    pub last_active: Instant,
}

impl Session {
    pub fn is_paired(&self) -> bool {
        self.second_addr.is_some()
    }
}

pub struct SessionManagerOptions<T, S> {
    /// Sessions idle longer than this are evicted. Default 30 s.
    pub idle_timeout: Duration,
    /// Eviction scans run at most this often. Default 5 s.
    pub eviction_interval: Duration,
    pub tokens: Arc<TokenRotator>,
    pub handler: T,
    pub sender: S,
}

/// The packet-driven session core.
///
/// Owns every live [`Session`] in a primary store keyed by room id,
/// with a secondary index from bound address to room id. The secondary
/// index is only ever mutated alongside the primary, which keeps the
/// two consistent at every observable point: every indexed room is
/// live, every bound address resolves to a session that names it as a
/// peer, and no address belongs to two sessions.
///
/// # Test
///
/// ```
/// use std::net::{SocketAddr, SocketAddrV4};
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// use relay_server_service::session::{SessionManager, SessionManagerOptions};
/// use relay_server_service::token::TokenRotator;
/// use relay_server_service::{PacketSender, ServiceHandler};
///
/// #[derive(Clone)]
/// struct Handler;
///
/// impl ServiceHandler for Handler {
///     fn get_secret(&self, username: &str) -> Option<String> {
///         (username == "user1").then(|| "password1".to_string())
///     }
/// }
///
/// #[derive(Clone, Default)]
/// struct Sender(Arc<Mutex<Vec<(SocketAddrV4, Vec<u8>)>>>);
///
/// impl PacketSender for Sender {
///     fn send(&self, target: SocketAddrV4, bytes: &[u8]) {
///         self.0.lock().unwrap().push((target, bytes.to_vec()));
///     }
/// }
///
/// let tokens = TokenRotator::new();
/// let sender = Sender::default();
/// let mut manager = SessionManager::new(SessionManagerOptions {
///     idle_timeout: Duration::from_secs(30),
///     eviction_interval: Duration::from_secs(5),
///     tokens: tokens.clone(),
///     handler: Handler,
///     sender: sender.clone(),
/// });
///
/// let source: SocketAddr = "203.0.113.7:40000".parse().unwrap();
///
/// // A reflex probe answers with the observed address and the
/// // currently issued token.
/// manager.handle_packet(source, &codec::message::encode_reflex_request());
///
/// let sent = sender.0.lock().unwrap().pop().unwrap();
/// let reflex = codec::message::ReflexResponse::decode(&sent.1).unwrap();
/// assert_eq!(sent.0, "203.0.113.7:40000".parse::<SocketAddrV4>().unwrap());
/// assert_eq!(reflex.port, 40000);
/// assert_eq!(reflex.token, &tokens.issued());
/// ```
pub struct SessionManager<T, S> {
    rooms: HashMap<RoomId, Session>,
    addrs: HashMap<SocketAddrV4, RoomId>,
    authenticator: Authenticator<T>,
    handler: T,
    sender: S,
    tokens: Arc<TokenRotator>,
    idle_timeout: Duration,
    eviction_interval: Duration,
    last_cleanup: Instant,
}

impl<T, S> SessionManager<T, S>
where
    T: ServiceHandler + Clone,
    S: PacketSender,
{
    pub fn new(options: SessionManagerOptions<T, S>) -> Self {
        Self {
            rooms: HashMap::with_capacity(1024),
            addrs: HashMap::with_capacity(2048),
            authenticator: Authenticator::new(options.tokens.clone(), options.handler.clone()),
            handler: options.handler,
            sender: options.sender,
            tokens: options.tokens,
            idle_timeout: options.idle_timeout,
            eviction_interval: options.eviction_interval,
            last_cleanup: Instant::now(),
        }
    }

    /// Handles one received datagram.
    ///
    /// Control frames are dispatched by type; everything else received
    /// from a bound address is relayed verbatim to the session's other
    /// peer. Housekeeping runs first so eviction makes progress even
    /// under constant traffic.
    pub fn handle_packet(&mut self, source: SocketAddr, bytes: &[u8]) {
        self.evict(Instant::now());

        // The wire format is IPv4 only.
        let SocketAddr::V4(source) = source else {
            log::debug!("dropped datagram from non-IPv4 source: addr={source}");
            return;
        };

        match classify(bytes) {
            Some(MessageType::CreateRoomRequest) => self.handle_create(source, bytes),
            Some(MessageType::JoinRoomRequest) => self.handle_join(source, bytes),
            Some(MessageType::ReflexRequest) => self.handle_reflex(source),
            // Unknown bytes and unexpected control types are payload
            // for the peer, if the source is bound.
            _ => self.handle_relay(source, bytes),
        }
    }

    /// Housekeeping tick for quiet periods; only runs eviction.
    pub fn handle_idle(&mut self) {
        self.evict(Instant::now());
    }

    /// Drops every live session and notifies the handler.
    pub fn shutdown(&mut self) {
        self.addrs.clear();

        for (room, _) in self.rooms.drain() {
            self.handler.on_session_closed(&room);
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// The room an address is currently bound to.
    pub fn room_of(&self, addr: &SocketAddrV4) -> Option<RoomId> {
        self.addrs.get(addr).copied()
    }

    pub fn session(&self, room: &RoomId) -> Option<&Session> {
        self.rooms.get(room)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.rooms.values()
    }

    pub fn bindings(&self) -> impl Iterator<Item = (SocketAddrV4, RoomId)> + '_ {
        self.addrs.iter().map(|(addr, room)| (*addr, *room))
    }

    fn handle_create(&mut self, source: SocketAddrV4, bytes: &[u8]) {
        let Some(request) = CreateRoomRequest::decode(bytes) else {
            log::debug!("undecodable CreateRoomRequest: addr={source}");
            return;
        };

        let code = self.authenticator.verify(source, &request, bytes);
        if code != ErrorCode::Ok {
            log::warn!(
                "CreateRoomRequest rejected: addr={source}, username={:?}, code={code:?}",
                request.username
            );

            self.sender
                .send(source, &encode_create_response(request.id, code, &[0u8; 16]));
            return;
        }

        let room = match self.addrs.get(&source).copied() {
            // A re-sent request after a lost response gets the same
            // room id back.
            Some(room) => room,
            None => {
                let room = self.allocate_room();
                self.rooms.insert(
                    room,
                    Session {
                        room,
                        first_addr: source,
                        second_addr: None,
                        last_active: Instant::now(),
                    },
                );

                self.addrs.insert(source, room);
                self.handler.on_room_created(&source, &room);
                room
            }
        };

        self.touch(&room);
        self.sender.send(
            source,
            &encode_create_response(request.id, ErrorCode::Ok, room.as_bytes()),
        );
    }

    /// Admission to a room is gated by possession of its 128-bit id,
    /// which was only ever returned to an authenticated creator; join
    /// requests carry no integrity signature. Failures are silent so
    /// room existence cannot be probed.
    fn handle_join(&mut self, source: SocketAddrV4, bytes: &[u8]) {
        let Some(request) = JoinRoomRequest::decode(bytes) else {
            log::debug!("undecodable JoinRoomRequest: addr={source}");
            return;
        };

        if request.username.is_empty() {
            log::debug!("JoinRoomRequest without username: addr={source}");
            return;
        }

        let room = RoomId::from(*request.room);
        let Some(session) = self.rooms.get_mut(&room) else {
            log::debug!("JoinRoomRequest for unknown room: addr={source}, room={room}");
            return;
        };

        match self.addrs.get(&source).copied() {
            None => {
                // A later joiner replaces the previous one; the
                // replaced address loses its binding.
                if let Some(prev) = session.second_addr.replace(source) {
                    self.addrs.remove(&prev);
                }

                self.addrs.insert(source, room);
                self.handler.on_room_joined(&source, &room);
            }
            // A re-sent join after a lost response.
            Some(bound) if bound == room && session.second_addr == Some(source) => {}
            _ => {
                log::warn!(
                    "JoinRoomRequest from an address bound elsewhere: addr={source}, room={room}"
                );
                return;
            }
        }

        self.touch(&room);
        self.sender.send(
            source,
            &encode_join_response(request.id, ErrorCode::Ok, room.as_bytes()),
        );
    }

    fn handle_reflex(&mut self, source: SocketAddrV4) {
        self.sender
            .send(source, &encode_reflex_response(source, &self.tokens.issued()));
    }

    fn handle_relay(&mut self, source: SocketAddrV4, bytes: &[u8]) {
        let Some(room) = self.addrs.get(&source).copied() else {
            log::debug!("dropped datagram from unbound address: addr={source}");
            return;
        };

        let Some(session) = self.rooms.get_mut(&room) else {
            return;
        };

        if source == session.first_addr {
            session.last_active = Instant::now();

            if let Some(second) = session.second_addr {
                self.sender.send(second, bytes);
            }
        } else if session.second_addr == Some(source) {
            session.last_active = Instant::now();

            let first = session.first_addr;
            self.sender.send(first, bytes);
        } else {
            log::debug!("dropped datagram from stale address: addr={source}, room={room}");
        }
    }

    /// Removes every session idle longer than the timeout, from both
    /// indices. Rate limited, so calling it on every packet is cheap.
    fn evict(&mut self, now: Instant) {
        if now.duration_since(self.last_cleanup) < self.eviction_interval {
            return;
        }

        self.last_cleanup = now;

        let expired = self
            .rooms
            .values()
            .filter(|session| now.duration_since(session.last_active) > self.idle_timeout)
            .map(|session| session.room)
            .collect::<Vec<_>>();

        for room in expired {
            if let Some(session) = self.rooms.remove(&room) {
                self.addrs.remove(&session.first_addr);

                if let Some(second) = session.second_addr {
                    self.addrs.remove(&second);
                }

                self.handler.on_session_closed(&room);
            }
        }
    }

    fn touch(&mut self, room: &RoomId) {
        if let Some(session) = self.rooms.get_mut(room) {
            session.last_active = Instant::now();
        }
    }

    /// Fresh room ids retry on collision with a live room.
    fn allocate_room(&self) -> RoomId {
        loop {
            let room = RoomId::random();
            if !self.rooms.contains_key(&room) {
                return room;
            }
        }
    }
}
