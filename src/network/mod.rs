//! # Network
//!
//! Car-to-car traffic is UDP datagrams, one [`message::Message`] each.
//!
//! - [`message`]: the wire types and their codec.
//! - [`messenger`]: message IDs, fire-and-forget broadcast, reliable send (retry until ACK)
//!   and the receive loop that ACKs before dispatching.
//! - [`udp`]: the real socket.
//! - [`loopback`]: an in-process datagram fabric with a drop filter, for simulation and tests.
//!
//! The messenger is generic over [`Datagram`] so it runs unchanged on either transport.

pub mod loopback;
pub mod message;
pub mod messenger;
pub mod udp;

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::CarId;
use message::WireError;

/// Raw unreliable datagram transport.
pub trait Datagram: Send + Sync + 'static {
    /// Sends one datagram. Delivery is not guaranteed.
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> impl Future<Output = io::Result<usize>> + Send;

    /// Waits for the next datagram.
    fn recv_from(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;
}

/// Errors from the messenger.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket level failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The message could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// No address configured for the car.
    #[error("no address for car {0}")]
    UnknownPeer(CarId),
    /// Gave up after the configured number of attempts.
    #[error("message {msg_id} to car {dest} not acknowledged after {attempts} attempts")]
    NoAck {
        /// Message that was never acknowledged
        msg_id: u64,
        /// Intended receiver
        dest: CarId,
        /// Attempts made
        attempts: u32,
    },
    /// The caller cancelled the send.
    #[error("send of message {0} was cancelled")]
    Cancelled(u64),
}
