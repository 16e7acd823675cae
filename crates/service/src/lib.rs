//! ## Rendezvous and relay service
//!
//! The session core of the relay: a token rotator that issues
//! short-lived admission tokens, an authenticator that gates room
//! creation, and a session manager that pairs two NAT-ed peers under a
//! 128-bit room id and forwards their datagrams to each other.
//!
//! The manager is single-owner state: exactly one task feeds it
//! packets and idle ticks, so none of its indices are locked. The only
//! shared piece is the token pair, which the rotation thread updates
//! behind a mutex.

pub mod auth;
pub mod session;
pub mod token;

use std::net::SocketAddrV4;

use crate::session::RoomId;

/// External capabilities the service needs, provided at construction.
///
/// `get_secret` is the credential lookup used to admit CreateRoom
/// requests; a `None` reads as authentication failure. The lifecycle
/// callbacks default to no-ops and exist for logging and bookkeeping
/// outside the hot path.
pub trait ServiceHandler: Send + Sync {
    /// username → shared secret lookup.
    fn get_secret(&self, username: &str) -> Option<String>;

    /// A previously unbound address created a room.
    #[allow(unused_variables)]
    fn on_room_created(&self, addr: &SocketAddrV4, room: &RoomId) {}

    /// A joiner paired with an existing room.
    #[allow(unused_variables)]
    fn on_room_joined(&self, addr: &SocketAddrV4, room: &RoomId) {}

    /// A session left the relay: idle eviction or shutdown.
    #[allow(unused_variables)]
    fn on_session_closed(&self, room: &RoomId) {}
}

/// The send primitive the session manager forwards through.
///
/// A single datagram write with UDP semantics: non-blocking and
/// infallible from the manager's point of view. Implementations drop
/// errors and short writes.
pub trait PacketSender: Send + Sync {
    fn send(&self, target: SocketAddrV4, bytes: &[u8]);
}
