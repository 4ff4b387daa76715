//! Fixed-length command/response frame codec.
//!
//! Every frame on the wire, in either direction, is exactly 20 bytes:
//! `[type, subtype, payload(17), checksum]` where the checksum is the
//! XOR fold of the 19 preceding bytes. Outbound frames are built and
//! checksummed here; inbound frames are classified by their type/subtype
//! bytes only. The checksum of inbound frames is intentionally NOT
//! verified: real devices are classified by opcode, and notifications
//! for opcodes this engine does not model are silently ignored rather
//! than treated as protocol errors.

use super::error::ProtocolError;

/// Total frame length, both directions.
pub const FRAME_LEN: usize = 20;

/// Payload capacity between the opcode pair and the trailing checksum.
pub const PAYLOAD_LEN: usize = 17;

/// An opcode pair: frame type byte plus subtype byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub kind: u8,
    pub sub: u8,
}

impl Opcode {
    const fn new(kind: u8, sub: u8) -> Self {
        Self { kind, sub }
    }

    /// Whether `data` starts with this opcode pair.
    fn heads(self, data: &[u8]) -> bool {
        data.len() >= 2 && data[0] == self.kind && data[1] == self.sub
    }
}

/// Session authentication request; also heads the device's auth ack.
pub const OP_AUTH: Opcode = Opcode::new(0x33, 0xB2);
/// Switch-state command; also heads the device's command ack.
pub const OP_SET_STATE: Opcode = Opcode::new(0x33, 0x01);
/// Pairing credential request; also heads the pairing responses.
pub const OP_PAIR: Opcode = Opcode::new(0xAA, 0xB1);

/// XOR fold of `data`, masked to 8 bits.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// An immutable, fully checksummed outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Frame {
    /// Build a frame from an opcode pair and a payload of at most
    /// [`PAYLOAD_LEN`] bytes. The payload is zero-padded and the checksum
    /// appended.
    pub fn command(op: Opcode, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }

        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = op.kind;
        bytes[1] = op.sub;
        bytes[2..2 + payload.len()].copy_from_slice(payload);
        bytes[FRAME_LEN - 1] = xor_checksum(&bytes[..FRAME_LEN - 1]);

        Ok(Self { bytes })
    }

    /// Raw wire representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The trailing checksum byte.
    pub fn checksum(&self) -> u8 {
        self.bytes[FRAME_LEN - 1]
    }
}

/// Classification of an inbound notification frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFrame {
    /// The device accepted the session authentication frame.
    AuthAck,
    /// The device acknowledged a switch-state command.
    CommandAck,
    /// Pairing succeeded; carries the embedded long-lived key.
    PairKeyGranted([u8; 16]),
    /// The device is not ready to pair yet (waiting for physical
    /// confirmation); the request should be retransmitted.
    PairRetry,
}

impl InboundFrame {
    /// Classify a received notification payload.
    ///
    /// Returns `None` for anything that is not exactly [`FRAME_LEN`] bytes
    /// or does not start with a known opcode pair; such frames are ignored
    /// by callers rather than surfaced as errors.
    pub fn classify(data: &[u8]) -> Option<Self> {
        if data.len() != FRAME_LEN {
            return None;
        }

        if OP_AUTH.heads(data) {
            Some(InboundFrame::AuthAck)
        } else if OP_SET_STATE.heads(data) {
            Some(InboundFrame::CommandAck)
        } else if OP_PAIR.heads(data) {
            if data[2] == 0x01 {
                // Key occupies the payload minus the subtype and checksum.
                let mut key = [0u8; 16];
                key.copy_from_slice(&data[3..FRAME_LEN - 1]);
                Some(InboundFrame::PairKeyGranted(key))
            } else {
                Some(InboundFrame::PairRetry)
            }
        } else {
            None
        }
    }
}
