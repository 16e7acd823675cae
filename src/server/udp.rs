use std::{
    io::ErrorKind::{ConnectionReset, TimedOut, WouldBlock},
    net::UdpSocket,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::BytesMut;

use service::{ServiceHandler, session::SessionManager};

use crate::{
    server::{Exit, SocketSender},
    statistics::{Statistics, Stats},
};

/// Largest possible UDP payload; the receive buffer is reused across
/// reads.
const BUFFER_SIZE: usize = 65536;

/// The datagram loop.
///
/// Reads one packet at a time under the socket's receive deadline and
/// drives the session manager: a packet goes to `handle_packet`, a
/// deadline expiry is the idle housekeeping tick. The stop flag is
/// checked between reads, so a stop request is honored within one
/// deadline interval.
pub(crate) fn listener<T>(
    socket: Arc<UdpSocket>,
    mut manager: SessionManager<T, SocketSender>,
    stop: Arc<AtomicBool>,
    statistics: Statistics,
) -> Exit
where
    T: ServiceHandler + Clone,
{
    let mut buffer = BytesMut::zeroed(BUFFER_SIZE);

    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buffer) {
            Ok((size, addr)) => {
                if size == 0 {
                    continue;
                }

                statistics.add(&[Stats::ReceivedBytes(size), Stats::ReceivedPkts(1)]);
                log::trace!("udp socket receive: size={size}, addr={addr}");

                manager.handle_packet(addr, &buffer[..size]);
            }
            // Deadline expiry is the housekeeping tick.
            Err(e) if matches!(e.kind(), WouldBlock | TimedOut) => manager.handle_idle(),
            // A remote endpoint shutting down surfaces as a reset on
            // some platforms; not fatal for UDP.
            Err(e) if e.kind() == ConnectionReset => continue,
            Err(e) => {
                log::error!("udp socket failed, terminating: error={e}");
                return Exit::Failed;
            }
        }
    }

    manager.shutdown();
    Exit::Stopped
}
