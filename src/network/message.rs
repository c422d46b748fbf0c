//! Wire messages.
//!
//! Every datagram carries exactly one [`Message`]: a 4-byte header (magic + version) followed
//! by the bincode encoding of the envelope. Decoding checks the header, the encoding and the
//! basic shape of the message, and reports any failure as a [`WireError`].

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::elevio::CallButton;
use crate::world_view::ElevatorStatus;
use crate::CarId;

/// Typed payload of a [`Message`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Payload {
    /// "I am alive."
    Heartbeat,
    /// Full status of the sender.
    State(ElevatorStatus),
    /// A hall button was pressed on the sender.
    ButtonEvent(CallButton),
    /// The leader's hall assignment for `target`, one `[up, down]` pair per floor.
    OrderDelegation {
        /// Car the assignment is for
        target: CarId,
        /// Assigned hall calls
        hall: Vec<[bool; 2]>,
    },
    /// The sender served this request.
    CompletedOrder(CallButton),
    /// Acknowledges the message named in [`Message::ack_of`].
    Ack,
    /// The sender is the leader.
    MasterConfig {
        /// Announced leader
        leader_id: CarId,
    },
}

/// Message kinds, for logging and dispatch tables.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    Heartbeat,
    State,
    ButtonEvent,
    OrderDelegation,
    CompletedOrder,
    Ack,
    MasterConfig,
}

impl Payload {
    /// Kind of this payload.
    pub fn kind(&self) -> MsgKind {
        match self {
            Payload::Heartbeat => MsgKind::Heartbeat,
            Payload::State(_) => MsgKind::State,
            Payload::ButtonEvent(_) => MsgKind::ButtonEvent,
            Payload::OrderDelegation { .. } => MsgKind::OrderDelegation,
            Payload::CompletedOrder(_) => MsgKind::CompletedOrder,
            Payload::Ack => MsgKind::Ack,
            Payload::MasterConfig { .. } => MsgKind::MasterConfig,
        }
    }
}

impl MsgKind {
    /// Whether the receiver must answer with an `Ack` and the sender retries until it does.
    ///
    /// Heartbeats, states and leader announcements are periodic and superseded by the next
    /// one, so they are sent once.
    pub fn requires_ack(self) -> bool {
        matches!(self, MsgKind::ButtonEvent | MsgKind::OrderDelegation | MsgKind::CompletedOrder)
    }
}

/// Envelope around a payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    /// Sending car.
    pub sender_id: CarId,
    /// Strictly increasing per sender. Only used to correlate ACKs.
    pub msg_id: u64,
    /// For `Ack`: the `msg_id` being acknowledged.
    pub ack_of: Option<u64>,
    /// What the message says.
    pub payload: Payload,
}

/// Why a datagram could not be turned into a [`Message`].
#[derive(Debug, Error)]
pub enum WireError {
    /// Shorter than the header.
    #[error("datagram too short ({0} bytes)")]
    TooShort(usize),
    /// Not one of ours.
    #[error("bad magic bytes {0:02x?}")]
    BadMagic([u8; 2]),
    /// Sent by an incompatible build.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),
    /// Header fine, body not decodable.
    #[error("could not decode message body: {0}")]
    Codec(#[from] bincode::Error),
    /// Decodes, but does not make sense.
    #[error("malformed {kind:?} from car {sender}: {reason}")]
    Malformed {
        /// Kind of the offending message
        kind: MsgKind,
        /// Claimed sender
        sender: CarId,
        /// What is wrong with it
        reason: &'static str,
    },
}

const HEADER_LEN: usize = 4;

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(config::UDP_BUFFER as u64)
}

impl Message {
    /// Kind of the payload.
    pub fn kind(&self) -> MsgKind {
        self.payload.kind()
    }

    /// See [`MsgKind::requires_ack`].
    pub fn requires_ack(&self) -> bool {
        self.kind().requires_ack()
    }

    /// Checks the shape rules that the type system cannot express.
    pub fn validate(&self) -> Result<(), WireError> {
        let bad = |reason| Err(WireError::Malformed { kind: self.kind(), sender: self.sender_id, reason });
        if self.sender_id == 0 {
            return bad("sender id 0 is reserved");
        }
        match &self.payload {
            Payload::Ack if self.ack_of.is_none() => bad("ack without ack_of"),
            Payload::Ack => Ok(()),
            _ if self.ack_of.is_some() => bad("ack_of on a non-ack message"),
            Payload::State(status) if status.id != self.sender_id => bad("state for another car"),
            Payload::MasterConfig { leader_id } if *leader_id != self.sender_id => bad("leader announced by someone else"),
            Payload::OrderDelegation { target, hall } if *target == self.sender_id || hall.is_empty() => {
                bad("delegation to self or without floors")
            }
            _ => Ok(()),
        }
    }

    /// Header + bincode body.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let body = codec().serialize(self)?;
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(&config::WIRE_MAGIC);
        buf.extend_from_slice(&config::WIRE_VERSION.to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parses and validates one datagram.
    pub fn decode(buf: &[u8]) -> Result<Message, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::TooShort(buf.len()));
        }
        let magic = [buf[0], buf[1]];
        if magic != config::WIRE_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let version = u16::from_be_bytes([buf[2], buf[3]]);
        if version != config::WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let msg: Message = codec().deserialize(&buf[HEADER_LEN..])?;
        msg.validate()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevio::CallType;

    fn msg(payload: Payload) -> Message {
        Message { sender_id: 2, msg_id: 7, ack_of: None, payload }
    }

    #[test]
    fn every_kind_survives_the_wire() {
        let mut status = ElevatorStatus::new(2, 4);
        status.requests.set(CallButton::new(3, CallType::Cab)).unwrap();
        status.floor = 1;

        let all = vec![
            msg(Payload::Heartbeat),
            msg(Payload::State(status)),
            msg(Payload::ButtonEvent(CallButton::new(1, CallType::HallUp))),
            msg(Payload::OrderDelegation { target: 3, hall: vec![[true, false], [false, true]] }),
            msg(Payload::CompletedOrder(CallButton::new(0, CallType::Cab))),
            Message { ack_of: Some(5), ..msg(Payload::Ack) },
            msg(Payload::MasterConfig { leader_id: 2 }),
        ];
        for m in all {
            let back = Message::decode(&m.encode().unwrap()).unwrap();
            // last_updated is local and not carried
            match (&m.payload, &back.payload) {
                (Payload::State(a), Payload::State(b)) => {
                    assert_eq!((a.id, a.floor, a.dirn, a.behaviour, &a.requests), (b.id, b.floor, b.dirn, b.behaviour, &b.requests));
                }
                _ => assert_eq!(back, m),
            }
        }
    }

    #[test]
    fn foreign_and_truncated_datagrams_are_rejected() {
        assert!(matches!(Message::decode(b"EF"), Err(WireError::TooShort(2))));
        assert!(matches!(Message::decode(b"XX\0\x01abc"), Err(WireError::BadMagic(_))));
        assert!(matches!(Message::decode(b"EF\0\x09abc"), Err(WireError::UnsupportedVersion(9))));

        let mut bytes = msg(Payload::Heartbeat).encode().unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(Message::decode(&bytes), Err(WireError::Codec(_))));
    }

    #[test]
    fn shape_violations_are_typed_errors() {
        let cases = [
            msg(Payload::Ack),
            Message { ack_of: Some(1), ..msg(Payload::Heartbeat) },
            msg(Payload::MasterConfig { leader_id: 1 }),
            msg(Payload::State(ElevatorStatus::new(3, 4))),
            msg(Payload::OrderDelegation { target: 2, hall: vec![[false, false]] }),
            Message { sender_id: 0, ..msg(Payload::Heartbeat) },
        ];
        for m in cases {
            let bytes = m.encode().unwrap();
            assert!(matches!(Message::decode(&bytes), Err(WireError::Malformed { .. })), "{:?}", m.kind());
        }
    }

    #[test]
    fn state_with_uneven_request_tables_is_rejected() {
        let mut bytes = msg(Payload::State(ElevatorStatus::new(2, 4))).encode().unwrap();
        // requests come last: hall (len 4, 8 flags) then cab (len 4, 4 flags)
        let tail = [4, 0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0];
        assert!(bytes.ends_with(&tail));
        bytes.truncate(bytes.len() - tail.len());
        bytes.extend_from_slice(&[3, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0]);
        assert!(matches!(Message::decode(&bytes), Err(WireError::Codec(_))));
    }

    #[test]
    fn only_order_traffic_is_acked() {
        assert!(MsgKind::OrderDelegation.requires_ack());
        assert!(MsgKind::ButtonEvent.requires_ack());
        assert!(MsgKind::CompletedOrder.requires_ack());
        assert!(!MsgKind::Heartbeat.requires_ack());
        assert!(!MsgKind::State.requires_ack());
        assert!(!MsgKind::Ack.requires_ack());
        assert!(!MsgKind::MasterConfig.requires_ack());
    }
}
