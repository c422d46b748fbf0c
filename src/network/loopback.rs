//! In-process datagram fabric.
//!
//! Every [`LoopbackSocket`] bound on a [`LoopbackNet`] can reach every other one by address.
//! Datagrams can be dropped selectively with a filter, or wholesale by isolating an address,
//! which is how the tests simulate packet loss and partitions. Datagrams to addresses nobody
//! has bound are dropped silently, like UDP.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::Datagram;

/// Returns `true` for datagrams that should be dropped. Arguments are source, destination and payload.
pub type DropFilter = dyn Fn(SocketAddr, SocketAddr, &[u8]) -> bool + Send + Sync;

type Envelope = (Vec<u8>, SocketAddr);

#[derive(Default)]
struct Fabric {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Envelope>>,
    isolated: HashSet<SocketAddr>,
    filter: Option<Arc<DropFilter>>,
}

/// Shared handle to the fabric. Cheap to clone.
#[derive(Clone, Default)]
pub struct LoopbackNet {
    fabric: Arc<Mutex<Fabric>>,
}

impl LoopbackNet {
    /// Empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    fn fabric(&self) -> MutexGuard<'_, Fabric> {
        self.fabric.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Binds a socket on `addr`. Rebinding an address takes it over from the old socket.
    pub fn bind(&self, addr: SocketAddr) -> LoopbackSocket {
        let (tx, rx) = mpsc::unbounded_channel();
        self.fabric().endpoints.insert(addr, tx);
        LoopbackSocket {
            addr,
            net: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Installs a drop filter, replacing any previous one.
    pub fn set_filter<F>(&self, filter: F)
    where
        F: Fn(SocketAddr, SocketAddr, &[u8]) -> bool + Send + Sync + 'static,
    {
        self.fabric().filter = Some(Arc::new(filter));
    }

    /// Removes the drop filter.
    pub fn clear_filter(&self) {
        self.fabric().filter = None;
    }

    /// Drops all traffic to and from `addr`.
    pub fn isolate(&self, addr: SocketAddr) {
        self.fabric().isolated.insert(addr);
    }

    /// Undoes [`LoopbackNet::isolate`].
    pub fn heal(&self, addr: SocketAddr) {
        self.fabric().isolated.remove(&addr);
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, buf: &[u8]) {
        let (tx, filter) = {
            let fabric = self.fabric();
            if fabric.isolated.contains(&from) || fabric.isolated.contains(&to) {
                return;
            }
            match fabric.endpoints.get(&to) {
                Some(tx) => (tx.clone(), fabric.filter.clone()),
                None => return,
            }
        };
        // filter runs unlocked so it may touch the fabric itself
        if filter.is_some_and(|f| (*f)(from, to, buf)) {
            return;
        }
        let _ = tx.send((buf.to_vec(), from));
    }
}

/// One endpoint on a [`LoopbackNet`].
pub struct LoopbackSocket {
    addr: SocketAddr,
    net: LoopbackNet,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl LoopbackSocket {
    /// Address this socket is bound on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Datagram for LoopbackSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.net.deliver(self.addr, target, buf);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "endpoint was rebound")),
        }
    }
}
