//! Reliable messaging on top of an unreliable [`Datagram`] transport.
//!
//! - Every message gets the next ID from a per-car counter.
//! - [`Messenger::send_reliable`] registers a pending ACK, retransmits every retry interval and
//!   returns when the ACK arrives, when the caller cancels, or when the attempt limit is hit.
//!   The registration is removed on every exit path, so an ACK that turns up later finds
//!   nothing and is dropped.
//! - [`Messenger::broadcast`] and [`Messenger::send_once`] are fire-and-forget.
//! - [`Messenger::run_receiver`] answers ACK-required messages with an `Ack` before handing
//!   them to the application, resolves incoming ACKs, and logs and drops anything it cannot
//!   decode.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;

use super::message::{Message, Payload};
use super::{Datagram, NetError};
use crate::{config, print, CarId};

/// Result of a successful reliable send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// ID the message was sent with.
    pub msg_id: u64,
    /// Transmissions before the ACK arrived.
    pub attempts: u32,
}

type PendingAcks = Mutex<HashMap<u64, oneshot::Sender<()>>>;

/// Removes a pending ACK registration when the send ends, however it ends.
struct PendingGuard<'a> {
    pending: &'a PendingAcks,
    msg_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.msg_id);
    }
}

fn lock(pending: &PendingAcks) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<()>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// One car's messaging endpoint.
pub struct Messenger<T: Datagram> {
    self_id: CarId,
    socket: T,
    peers: HashMap<CarId, SocketAddr>,
    next_id: AtomicU64,
    pending: PendingAcks,
    retry_interval: Duration,
    max_attempts: Option<u32>,
}

impl<T: Datagram> Messenger<T> {
    /// Messenger for `self_id` on `socket`. `peers` may include self, it is skipped on broadcast.
    pub fn new(
        self_id: CarId,
        socket: T,
        peers: HashMap<CarId, SocketAddr>,
        retry_interval: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        Messenger {
            self_id,
            socket,
            peers,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            retry_interval,
            max_attempts,
        }
    }

    /// Our car ID.
    pub fn self_id(&self) -> CarId {
        self.self_id
    }

    /// IDs of every other car.
    pub fn peer_ids(&self) -> Vec<CarId> {
        let mut ids: Vec<CarId> = self.peers.keys().copied().filter(|&id| id != self.self_id).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of reliable sends currently waiting for an ACK.
    pub fn pending_acks(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Wraps `payload` in an envelope with the next message ID.
    pub fn envelope(&self, payload: Payload) -> Message {
        Message {
            sender_id: self.self_id,
            msg_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            ack_of: None,
            payload,
        }
    }

    fn addr_of(&self, dest: CarId) -> Result<SocketAddr, NetError> {
        self.peers.get(&dest).copied().ok_or(NetError::UnknownPeer(dest))
    }

    /// Sends `payload` once to every other car. Per-peer failures are logged.
    pub async fn broadcast(&self, payload: Payload) -> Result<(), NetError> {
        let msg = self.envelope(payload);
        let bytes = msg.encode()?;
        let sends = self
            .peers
            .iter()
            .filter(|(&id, _)| id != self.self_id)
            .map(|(&id, &addr)| {
                let bytes = &bytes;
                async move { (id, self.socket.send_to(bytes, addr).await) }
            });
        for (id, res) in join_all(sends).await {
            if let Err(e) = res {
                print::err(format!("broadcast {:?} to car {} failed: {}", msg.kind(), id, e));
            }
        }
        Ok(())
    }

    /// Sends `payload` once to `dest`.
    pub async fn send_once(&self, dest: CarId, payload: Payload) -> Result<u64, NetError> {
        let addr = self.addr_of(dest)?;
        let msg = self.envelope(payload);
        self.socket.send_to(&msg.encode()?, addr).await?;
        Ok(msg.msg_id)
    }

    /// Sends `payload` to `dest` and retransmits until it is acknowledged.
    ///
    /// Returns [`NetError::Cancelled`] if `cancel` fires first and [`NetError::NoAck`] when the
    /// attempt limit runs out. Socket errors on a single attempt are logged and retried.
    pub async fn send_reliable(
        &self,
        dest: CarId,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<Delivery, NetError> {
        let addr = self.addr_of(dest)?;
        let msg = self.envelope(payload);
        let msg_id = msg.msg_id;
        let bytes = msg.encode()?;

        let (ack_tx, mut ack_rx) = oneshot::channel();
        lock(&self.pending).insert(msg_id, ack_tx);
        let _guard = PendingGuard { pending: &self.pending, msg_id };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                print::err(format!("send {:?} #{} to car {} failed: {}", msg.kind(), msg_id, dest, e));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NetError::Cancelled(msg_id)),
                ack = &mut ack_rx => {
                    return match ack {
                        Ok(()) => Ok(Delivery { msg_id, attempts }),
                        // registration removed under us, nobody will ever answer
                        Err(_) => Err(NetError::NoAck { msg_id, dest, attempts }),
                    };
                }
                _ = time::sleep(self.retry_interval) => {
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(NetError::NoAck { msg_id, dest, attempts });
                    }
                }
            }
        }
    }

    fn resolve_ack(&self, ack_of: u64) {
        // late or duplicate ACKs find nothing
        if let Some(tx) = lock(&self.pending).remove(&ack_of) {
            let _ = tx.send(());
        }
    }

    async fn send_ack(&self, to: &Message, from: SocketAddr) {
        let mut ack = self.envelope(Payload::Ack);
        ack.ack_of = Some(to.msg_id);
        match ack.encode() {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, from).await {
                    print::err(format!("ack of #{} to car {} failed: {}", to.msg_id, to.sender_id, e));
                }
            }
            Err(e) => print::err(format!("could not encode ack: {}", e)),
        }
    }

    /// Receives until `inbound` is closed.
    ///
    /// ACK-required messages are acknowledged before they are forwarded. `Ack`s are consumed
    /// here. Datagrams that fail to decode are logged and dropped.
    pub async fn run_receiver(self: Arc<Self>, inbound: mpsc::Sender<Message>) {
        let mut buf = vec![0u8; config::UDP_BUFFER];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    print::err(format!("car {}: receive failed: {}", self.self_id, e));
                    time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            let msg = match Message::decode(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    print::warn(format!("car {}: dropped datagram from {}: {}", self.self_id, from, e));
                    continue;
                }
            };
            if msg.sender_id == self.self_id {
                continue;
            }

            match msg.payload {
                Payload::Ack => {
                    if let Some(ack_of) = msg.ack_of {
                        self.resolve_ack(ack_of);
                    }
                    continue;
                }
                _ if msg.requires_ack() => self.send_ack(&msg, from).await,
                _ => {}
            }

            if inbound.send(msg).await.is_err() {
                print::info(format!("car {}: receiver shutting down", self.self_id));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::loopback::LoopbackNet;

    fn pair(net: &LoopbackNet) -> (Arc<Messenger<crate::network::loopback::LoopbackSocket>>, Arc<Messenger<crate::network::loopback::LoopbackSocket>>) {
        let a: SocketAddr = "10.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:1".parse().unwrap();
        let peers: HashMap<CarId, SocketAddr> = [(1, a), (2, b)].into_iter().collect();
        let ma = Arc::new(Messenger::new(1, net.bind(a), peers.clone(), Duration::from_millis(100), Some(5)));
        let mb = Arc::new(Messenger::new(2, net.bind(b), peers, Duration::from_millis(100), Some(5)));
        (ma, mb)
    }

    #[tokio::test]
    async fn message_ids_increase_per_sender() {
        let net = LoopbackNet::new();
        let (a, _b) = pair(&net);
        let first = a.envelope(Payload::Heartbeat).msg_id;
        let second = a.envelope(Payload::Heartbeat).msg_id;
        assert!(second > first);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_and_cleans_up() {
        let net = LoopbackNet::new();
        let (a, _b) = pair(&net);
        // nobody runs b's receiver, so nothing is ever acknowledged
        let err = a.send_reliable(2, Payload::ButtonEvent(crate::elevio::CallButton::new(0, crate::elevio::CallType::HallUp)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::NoAck { attempts: 5, dest: 2, .. }));
        assert_eq!(a.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_removes_the_registration() {
        let net = LoopbackNet::new();
        let (a, _b) = pair(&net);
        let cancel = CancellationToken::new();
        let task = {
            let a = a.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                a.send_reliable(2, Payload::OrderDelegation { target: 2, hall: vec![[true, false]] }, &cancel).await
            })
        };
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(a.pending_acks(), 1);

        cancel.cancel();
        let res = task.await.unwrap();
        assert!(matches!(res, Err(NetError::Cancelled(_))));
        assert_eq!(a.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_is_discarded() {
        let net = LoopbackNet::new();
        let (a, _b) = pair(&net);
        a.resolve_ack(12345);
        assert_eq!(a.pending_acks(), 0);
    }

    #[tokio::test]
    async fn unknown_peer_is_an_error() {
        let net = LoopbackNet::new();
        let (a, _b) = pair(&net);
        let err = a.send_once(9, Payload::Heartbeat).await.unwrap_err();
        assert!(matches!(err, NetError::UnknownPeer(9)));
    }

    #[tokio::test]
    async fn garbage_does_not_stop_the_receiver() {
        let net = LoopbackNet::new();
        let (a, b) = pair(&net);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(b.clone().run_receiver(tx));

        let junk = net.bind("10.0.0.9:1".parse().unwrap());
        junk.send_to(b"not a message", "10.0.0.2:1".parse().unwrap()).await.unwrap();
        a.broadcast(Payload::Heartbeat).await.unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.sender_id, 1);
        assert_eq!(got.payload, Payload::Heartbeat);
    }
}
