mod udp;

use std::{
    net::{SocketAddr, SocketAddrV4, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use tokio::sync::oneshot;

use service::{
    PacketSender, ServiceHandler,
    session::{SessionManager, SessionManagerOptions},
    token::TokenRotator,
};

use crate::{
    config::Config,
    statistics::{Statistics, Stats},
};

/// How the datagram loop ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Exit {
    /// The stop flag was honored.
    Stopped,
    /// An unrecoverable socket error; the socket cannot be replaced
    /// without a restart.
    Failed,
}

/// Sends one datagram through the shared server socket.
///
/// UDP semantics: errors and short writes are dropped, with a debug
/// line for the former.
#[derive(Clone)]
pub struct SocketSender {
    socket: Arc<UdpSocket>,
    statistics: Statistics,
}

impl PacketSender for SocketSender {
    fn send(&self, target: SocketAddrV4, bytes: &[u8]) {
        match self.socket.send_to(bytes, target) {
            Ok(size) => self.statistics.add(&[Stats::SendBytes(size), Stats::SendPkts(1)]),
            Err(e) => log::debug!("udp send failed: target={target}, error={e}"),
        }
    }
}

/// Cloneable stop signal for the datagram loop.
#[derive(Clone)]
pub struct Stopper(Arc<AtomicBool>);

impl Stopper {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// A handle to the running datagram loop.
pub struct Server {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    stopped: oneshot::Receiver<Exit>,
}

impl Server {
    /// The bound socket address; useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stopper(&self) -> Stopper {
        Stopper(self.stop.clone())
    }

    /// Resolves when the loop exits: within one receive deadline of
    /// the stop signal, or immediately on a fatal socket error.
    pub async fn join(self) -> Exit {
        self.stopped.await.unwrap_or(Exit::Failed)
    }
}

/// Binds the UDP socket and spawns the datagram loop on its own
/// thread.
///
/// The receive deadline doubles as the housekeeping tick, so eviction
/// makes progress even when no packet ever arrives.
pub fn start<T>(
    config: &Config,
    statistics: &Statistics,
    handler: T,
    tokens: Arc<TokenRotator>,
) -> Result<Server>
where
    T: ServiceHandler + Clone + 'static,
{
    let socket = UdpSocket::bind(config.server.listen)?;
    socket.set_read_timeout(Some(Duration::from_millis(config.runtime.recv_deadline)))?;

    let socket = Arc::new(socket);
    let local_addr = socket.local_addr()?;

    let manager = SessionManager::new(SessionManagerOptions {
        idle_timeout: Duration::from_secs(config.runtime.idle_timeout),
        eviction_interval: Duration::from_secs(config.runtime.eviction_interval),
        tokens,
        handler,
        sender: SocketSender {
            socket: socket.clone(),
            statistics: statistics.clone(),
        },
    });

    let stop = Arc::new(AtomicBool::new(false));
    let (stopped_tx, stopped_rx) = oneshot::channel();

    {
        let socket = socket.clone();
        let stop = stop.clone();
        let statistics = statistics.clone();

        thread::spawn(move || {
            let _ = stopped_tx.send(udp::listener(socket, manager, stop, statistics));
        });
    }

    log::info!("relay server listening: listen={local_addr}");

    Ok(Server {
        local_addr,
        stop,
        stopped: stopped_rx,
    })
}
