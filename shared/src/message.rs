//! Application message codec
//!
//! Every message travels as `[1-byte kind][payload]`. Integers and floats are
//! written little-endian so peers on different architectures agree on the
//! layout. Decoders copy everything they need out of the input buffer.

use crate::error::NetError;

/// Identifier the transport assigns to a connected peer
pub type PeerId = u32;

/// Signature shared by every kind-specific decoder. Receives the payload
/// with the kind byte already stripped.
pub type Decoder = fn(&[u8]) -> Result<Message, NetError>;

const U32_LEN: usize = 4;
const POSITION_LEN: usize = 12;
const STAMPED_POSITION_LEN: usize = U32_LEN + POSITION_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const ZERO: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl From<[f32; 3]> for Position {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// One-byte discriminant written in front of every message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ClientIdentity = 0,
    PositionUpdate = 1,
    Chat = 2,
    Ping = 3,
    Pong = 4,
    PeerLeft = 5,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::ClientIdentity,
        MessageKind::PositionUpdate,
        MessageKind::Chat,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::PeerLeft,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Smallest payload length (kind byte excluded) this kind accepts
    pub fn min_payload_len(self) -> usize {
        match self {
            MessageKind::ClientIdentity | MessageKind::PeerLeft => U32_LEN,
            MessageKind::PositionUpdate => POSITION_LEN,
            MessageKind::Chat => U32_LEN * 2,
            MessageKind::Ping | MessageKind::Pong => 0,
        }
    }

    pub fn decoder(self) -> Decoder {
        match self {
            MessageKind::ClientIdentity => decode_client_identity,
            MessageKind::PositionUpdate => decode_position_update,
            MessageKind::Chat => decode_chat,
            MessageKind::Ping => decode_ping,
            MessageKind::Pong => decode_pong,
            MessageKind::PeerLeft => decode_peer_left,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Tells a client which id the server knows it by
    ClientIdentity { peer_id: PeerId },
    /// `origin` is `None` client→server and stamped by the server for relay
    PositionUpdate {
        origin: Option<PeerId>,
        position: Position,
    },
    Chat { sender: PeerId, text: String },
    Ping,
    Pong,
    /// Server notice that a peer disconnected
    PeerLeft { peer_id: PeerId },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ClientIdentity { .. } => MessageKind::ClientIdentity,
            Message::PositionUpdate { .. } => MessageKind::PositionUpdate,
            Message::Chat { .. } => MessageKind::Chat,
            Message::Ping => MessageKind::Ping,
            Message::Pong => MessageKind::Pong,
            Message::PeerLeft { .. } => MessageKind::PeerLeft,
        }
    }

    /// Client→server position update, payload is the bare position
    pub fn position(position: Position) -> Self {
        Message::PositionUpdate {
            origin: None,
            position,
        }
    }

    /// Server→client position update carrying the originating peer
    pub fn relayed_position(origin: PeerId, position: Position) -> Self {
        Message::PositionUpdate {
            origin: Some(origin),
            position,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.kind().min_payload_len());
        out.push(self.kind().tag());

        match self {
            Message::ClientIdentity { peer_id } | Message::PeerLeft { peer_id } => {
                out.extend_from_slice(&peer_id.to_le_bytes());
            }
            Message::PositionUpdate { origin, position } => {
                if let Some(origin) = origin {
                    out.extend_from_slice(&origin.to_le_bytes());
                }
                out.extend_from_slice(&position.x.to_le_bytes());
                out.extend_from_slice(&position.y.to_le_bytes());
                out.extend_from_slice(&position.z.to_le_bytes());
            }
            Message::Chat { sender, text } => {
                out.extend_from_slice(&sender.to_le_bytes());
                out.extend_from_slice(&(text.len() as u32).to_le_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            Message::Ping | Message::Pong => {}
        }

        out
    }

    /// Decodes a full buffer without going through a registry
    pub fn decode(bytes: &[u8]) -> Result<Message, NetError> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| NetError::malformed("empty buffer"))?;
        let kind = MessageKind::from_tag(tag).ok_or(NetError::UnknownMessageKind(tag))?;
        (kind.decoder())(payload)
    }
}

/// Bounds-checked cursor over a payload
struct PayloadReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NetError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                NetError::malformed(format!(
                    "need {} bytes at offset {}, have {}",
                    len,
                    self.offset,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, NetError> {
        let bytes = self.take(U32_LEN)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, NetError> {
        self.read_u32().map(f32::from_bits)
    }

    fn read_position(&mut self) -> Result<Position, NetError> {
        Ok(Position {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        })
    }
}

fn decode_client_identity(payload: &[u8]) -> Result<Message, NetError> {
    let peer_id = PayloadReader::new(payload).read_u32()?;
    Ok(Message::ClientIdentity { peer_id })
}

fn decode_ping(_payload: &[u8]) -> Result<Message, NetError> {
    Ok(Message::Ping)
}

fn decode_pong(_payload: &[u8]) -> Result<Message, NetError> {
    Ok(Message::Pong)
}

fn decode_peer_left(payload: &[u8]) -> Result<Message, NetError> {
    let peer_id = PayloadReader::new(payload).read_u32()?;
    Ok(Message::PeerLeft { peer_id })
}

fn decode_position_update(payload: &[u8]) -> Result<Message, NetError> {
    let mut reader = PayloadReader::new(payload);
    let origin = match payload.len() {
        POSITION_LEN => None,
        len if len >= STAMPED_POSITION_LEN => Some(reader.read_u32()?),
        len => {
            return Err(NetError::malformed(format!(
                "position update payload of {} bytes",
                len
            )))
        }
    };
    let position = reader.read_position()?;
    Ok(Message::PositionUpdate { origin, position })
}

fn decode_chat(payload: &[u8]) -> Result<Message, NetError> {
    let mut reader = PayloadReader::new(payload);
    let sender = reader.read_u32()?;
    let len = reader.read_u32()? as usize;
    let text = std::str::from_utf8(reader.take(len)?)
        .map_err(|e| NetError::malformed(format!("chat text is not UTF-8: {}", e)))?
        .to_owned();
    Ok(Message::Chat { sender, text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_position_roundtrip_is_bit_exact() {
        let samples = [
            Position::new(1.0, 2.0, 3.0),
            Position::new(-0.0, f32::MIN_POSITIVE, f32::MAX),
            Position::new(1.0e-42, -123.456, 0.1),
        ];

        for position in samples {
            let decoded = Message::decode(&Message::position(position).encode()).unwrap();
            match decoded {
                Message::PositionUpdate {
                    origin: None,
                    position: p,
                } => {
                    assert_eq!(p.x.to_bits(), position.x.to_bits());
                    assert_eq!(p.y.to_bits(), position.y.to_bits());
                    assert_eq!(p.z.to_bits(), position.z.to_bits());
                }
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    #[test]
    fn test_position_roundtrip_across_bit_space() {
        let mut values = vec![
            0.0f32,
            -0.0,
            f32::MIN,
            f32::MAX,
            f32::MIN_POSITIVE,
            -f32::MIN_POSITIVE,
            f32::EPSILON,
            f32::from_bits(1),
            f32::from_bits(0x8000_0001),
            f32::from_bits(0x007F_FFFF),
        ];
        values.extend(
            (0..=u32::MAX)
                .step_by(0x0001_0003)
                .map(f32::from_bits)
                .filter(|v| v.is_finite()),
        );

        for (i, &x) in values.iter().enumerate() {
            let y = values[(i * 7 + 3) % values.len()];
            let z = values[(i * 13 + 5) % values.len()];
            let position = Position::new(x, y, z);

            for message in [
                Message::position(position),
                Message::relayed_position(i as PeerId, position),
            ] {
                match Message::decode(&message.encode()).unwrap() {
                    Message::PositionUpdate { position: p, .. } => {
                        assert_eq!(p.x.to_bits(), x.to_bits());
                        assert_eq!(p.y.to_bits(), y.to_bits());
                        assert_eq!(p.z.to_bits(), z.to_bits());
                    }
                    other => panic!("Unexpected message: {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_client_position_omits_peer_id() {
        let bytes = Message::position(Position::new(1.0, 2.0, 3.0)).encode();
        assert_eq!(bytes.len(), 1 + 12);
        assert_eq!(bytes[0], MessageKind::PositionUpdate.tag());
    }

    #[test]
    fn test_relayed_position_layout() {
        let bytes = Message::relayed_position(0x0102_0304, Position::new(1.0, 2.0, 3.0)).encode();
        assert_eq!(bytes.len(), 1 + 4 + 12);
        assert_eq!(&bytes[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[5..9], &1.0f32.to_le_bytes());

        match Message::decode(&bytes).unwrap() {
            Message::PositionUpdate {
                origin: Some(origin),
                position,
            } => {
                assert_eq!(origin, 0x0102_0304);
                assert_approx_eq!(position.z, 3.0);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_position_is_malformed() {
        let bytes = Message::position(Position::new(1.0, 2.0, 3.0)).encode();
        for len in 1..bytes.len() {
            let result = Message::decode(&bytes[..len]);
            assert!(
                matches!(result, Err(NetError::MalformedMessage(_))),
                "length {} should be rejected",
                len
            );
        }
    }

    #[test]
    fn test_position_between_forms_is_malformed() {
        let mut bytes = Message::position(Position::ZERO).encode();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            Message::decode(&bytes),
            Err(NetError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_chat_layout_and_roundtrip() {
        let message = Message::Chat {
            sender: 9,
            text: "héllo".to_string(),
        };
        let bytes = message.encode();
        assert_eq!(bytes[0], MessageKind::Chat.tag());
        assert_eq!(&bytes[5..9], &("héllo".len() as u32).to_le_bytes());
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_chat_length_beyond_buffer() {
        let mut bytes = vec![MessageKind::Chat.tag()];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(b"short");
        assert!(matches!(
            Message::decode(&bytes),
            Err(NetError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_chat_invalid_utf8() {
        let mut bytes = vec![MessageKind::Chat.tag()];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xC3, 0x28]);
        assert!(matches!(
            Message::decode(&bytes),
            Err(NetError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_ping_pong_are_single_byte() {
        assert_eq!(Message::Ping.encode(), vec![3]);
        assert_eq!(Message::Pong.encode(), vec![4]);
        assert_eq!(Message::decode(&[3]).unwrap(), Message::Ping);
        assert_eq!(Message::decode(&[4]).unwrap(), Message::Pong);
    }

    #[test]
    fn test_identity_and_peer_left() {
        let identity = Message::ClientIdentity { peer_id: 77 };
        assert_eq!(identity.encode().len(), 5);
        assert_eq!(Message::decode(&identity.encode()).unwrap(), identity);

        let left = Message::PeerLeft { peer_id: 12 };
        assert_eq!(Message::decode(&left.encode()).unwrap(), left);

        assert!(Message::decode(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_unknown_kind_and_empty() {
        assert!(matches!(
            Message::decode(&[0xEE, 1, 2, 3]),
            Err(NetError::UnknownMessageKind(0xEE))
        ));
        assert!(matches!(
            Message::decode(&[]),
            Err(NetError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(MessageKind::ClientIdentity.tag(), 0);
        assert_eq!(MessageKind::PositionUpdate.tag(), 1);
        assert_eq!(MessageKind::Chat.tag(), 2);
        assert_eq!(MessageKind::Ping.tag(), 3);
        assert_eq!(MessageKind::Pong.tag(), 4);
        assert_eq!(MessageKind::PeerLeft.tag(), 5);
        assert_eq!(MessageKind::from_tag(6), None);
    }

    #[test]
    fn test_position_helpers() {
        let a = Position::new(0.0, 3.0, 4.0);
        assert_approx_eq!(a.distance(&Position::ZERO), 5.0);
        assert!(a.is_finite());
        assert!(!Position::new(f32::NAN, 0.0, 0.0).is_finite());
        assert_eq!(Position::from([1.0, 2.0, 3.0]), Position::new(1.0, 2.0, 3.0));
    }
}
