//! Wire framing for CryptoGram datagrams.
//!
//! Every datagram carries exactly one frame:
//!
//! ```text
//! +--------+--------+-----+---------------------------+
//! | tag[0] | tag[1] | '/' |  payload (0..n bytes)     |
//! +--------+--------+-----+---------------------------+
//! ```
//!
//! The tag is the message type rendered as two ASCII decimal digits. The
//! header is always [`FRAME_HEADER_SIZE`] bytes; the payload is never scanned
//! for further delimiters at this layer, so encrypted payloads may contain any
//! byte value.
//!
//! Human-oriented types carry `username/text` payloads. Those are split by
//! [`Message`] after framing, on the first [`FIELD_SEPARATOR`]. The fields
//! keep the payload bytes verbatim so that re-encoding reproduces them;
//! [`Message::username`] and [`Message::text`] give the trimmed views.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SERVER_NAME;

/// Byte separating the type tag from the payload.
pub const FRAME_DELIMITER: u8 = b'/';

/// Number of decimal digits in a type tag.
pub const TYPE_TAG_WIDTH: usize = 2;

/// Fixed header length: tag plus delimiter.
pub const FRAME_HEADER_SIZE: usize = TYPE_TAG_WIDTH + 1;

/// Separator between `username` and `text` inside a payload.
pub const FIELD_SEPARATOR: char = '/';

/// Message types with their stable wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Encrypted chat payload (ciphertext).
    Chat = 10,
    /// Cipher parameters for the preceding chat payload.
    Params = 11,
    /// Plain `username/text` command or notice.
    ChatCommand = 12,
    /// Liveness probe (relay -> peer) and its echo (peer -> relay).
    KeepAlive = 13,
    /// Login request, echoed back with the assigned username.
    Login = 20,
    /// Logout request.
    Logout = 21,
    /// Join accepted; sent to the requester.
    PeerAvailable = 22,
    /// Join target is already paired.
    PeerBusy = 23,
    /// Leave request (peer -> relay) or conversation-ended notice.
    PeerLeft = 24,
    /// A new partner joined; sent to the join target.
    NewPeer = 25,
    /// Initiator's public key-exchange value.
    KeyExchangeRequest = 30,
    /// Responder's public key-exchange value.
    KeyExchangeResponse = 31,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Self::Chat),
            11 => Ok(Self::Params),
            12 => Ok(Self::ChatCommand),
            13 => Ok(Self::KeepAlive),
            20 => Ok(Self::Login),
            21 => Ok(Self::Logout),
            22 => Ok(Self::PeerAvailable),
            23 => Ok(Self::PeerBusy),
            24 => Ok(Self::PeerLeft),
            25 => Ok(Self::NewPeer),
            30 => Ok(Self::KeyExchangeRequest),
            31 => Ok(Self::KeyExchangeResponse),
            _ => Err(WireError::UnknownType(value)),
        }
    }
}

impl MessageType {
    /// ASCII rendering of the type tag.
    pub fn tag(self) -> [u8; TYPE_TAG_WIDTH] {
        let value = self as u8;
        [b'0' + value / 10, b'0' + value % 10]
    }

    /// Types the relay forwards blindly between paired peers.
    pub fn is_relayed(self) -> bool {
        matches!(
            self,
            Self::Chat | Self::Params | Self::KeyExchangeRequest | Self::KeyExchangeResponse
        )
    }
}

/// Framing and field errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("frame too short: {0} bytes, minimum {1}")]
    TooShort(usize, usize),

    #[error("type tag is not numeric: {0:?}")]
    InvalidTag([u8; TYPE_TAG_WIDTH]),

    #[error("expected delimiter '/', found 0x{0:02x}")]
    MissingDelimiter(u8),

    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("{0:?} payload has no username separator")]
    MissingSeparator(MessageType),

    #[error("{0:?} payload is not valid UTF-8")]
    InvalidUtf8(MessageType),
}

/// A framed datagram: type tag plus verbatim payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.message_type.tag());
        buf.put_u8(FRAME_DELIMITER);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(WireError::TooShort(buf.len(), FRAME_HEADER_SIZE));
        }

        let tag = [buf[0], buf[1]];
        if !tag.iter().all(u8::is_ascii_digit) {
            return Err(WireError::InvalidTag(tag));
        }

        if buf[TYPE_TAG_WIDTH] != FRAME_DELIMITER {
            return Err(WireError::MissingDelimiter(buf[TYPE_TAG_WIDTH]));
        }

        let value = (tag[0] - b'0') * 10 + (tag[1] - b'0');
        let message_type = MessageType::try_from(value)?;

        Ok(Self {
            message_type,
            payload: Bytes::copy_from_slice(&buf[FRAME_HEADER_SIZE..]),
        })
    }
}

/// Typed message with derived fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Chat { ciphertext: Bytes },
    Params { params: Bytes },
    ChatCommand { username: String, text: String },
    KeepAlive,
    Login { username: String },
    Logout { username: String },
    PeerAvailable,
    PeerBusy,
    PeerLeft { text: String },
    NewPeer { username: String, text: String },
    KeyExchangeRequest { public_key: Bytes },
    KeyExchangeResponse { public_key: Bytes },
}

impl Message {
    /// Chat command sent by the relay on its own behalf.
    pub fn server_notice(text: impl Into<String>) -> Self {
        Self::ChatCommand {
            username: SERVER_NAME.to_string(),
            text: text.into(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Chat { .. } => MessageType::Chat,
            Self::Params { .. } => MessageType::Params,
            Self::ChatCommand { .. } => MessageType::ChatCommand,
            Self::KeepAlive => MessageType::KeepAlive,
            Self::Login { .. } => MessageType::Login,
            Self::Logout { .. } => MessageType::Logout,
            Self::PeerAvailable => MessageType::PeerAvailable,
            Self::PeerBusy => MessageType::PeerBusy,
            Self::PeerLeft { .. } => MessageType::PeerLeft,
            Self::NewPeer { .. } => MessageType::NewPeer,
            Self::KeyExchangeRequest { .. } => MessageType::KeyExchangeRequest,
            Self::KeyExchangeResponse { .. } => MessageType::KeyExchangeResponse,
        }
    }

    /// The username field without surrounding whitespace.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::ChatCommand { username, .. }
            | Self::Login { username }
            | Self::Logout { username }
            | Self::NewPeer { username, .. } => Some(username.trim()),
            _ => None,
        }
    }

    /// The text field without surrounding whitespace.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::ChatCommand { text, .. } | Self::NewPeer { text, .. } | Self::PeerLeft { text } => {
                Some(text.trim())
            }
            _ => None,
        }
    }

    pub fn payload(&self) -> Bytes {
        match self {
            Self::Chat { ciphertext } => ciphertext.clone(),
            Self::Params { params } => params.clone(),
            Self::KeyExchangeRequest { public_key } | Self::KeyExchangeResponse { public_key } => {
                public_key.clone()
            }
            Self::ChatCommand { username, text } | Self::NewPeer { username, text } => {
                Bytes::from(format!("{username}{FIELD_SEPARATOR}{text}"))
            }
            Self::Login { username } | Self::Logout { username } => {
                Bytes::from(username.clone())
            }
            Self::PeerLeft { text } => Bytes::from(text.clone()),
            Self::KeepAlive | Self::PeerAvailable | Self::PeerBusy => Bytes::new(),
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(self.message_type(), self.payload())
    }

    pub fn encode(&self) -> Bytes {
        self.to_frame().encode()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        Self::try_from(Frame::decode(buf)?)
    }
}

fn text_payload(frame: &Frame) -> Result<&str, WireError> {
    std::str::from_utf8(&frame.payload)
        .map_err(|_| WireError::InvalidUtf8(frame.message_type))
}

fn split_fields(frame: &Frame) -> Result<(String, String), WireError> {
    let payload = text_payload(frame)?;
    let (username, text) = payload
        .split_once(FIELD_SEPARATOR)
        .ok_or(WireError::MissingSeparator(frame.message_type))?;
    Ok((username.to_string(), text.to_string()))
}

impl TryFrom<Frame> for Message {
    type Error = WireError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let message = match frame.message_type {
            MessageType::Chat => Self::Chat {
                ciphertext: frame.payload,
            },
            MessageType::Params => Self::Params {
                params: frame.payload,
            },
            MessageType::KeyExchangeRequest => Self::KeyExchangeRequest {
                public_key: frame.payload,
            },
            MessageType::KeyExchangeResponse => Self::KeyExchangeResponse {
                public_key: frame.payload,
            },
            MessageType::ChatCommand => {
                let (username, text) = split_fields(&frame)?;
                Self::ChatCommand { username, text }
            }
            MessageType::NewPeer => {
                let (username, text) = split_fields(&frame)?;
                Self::NewPeer { username, text }
            }
            MessageType::Login => Self::Login {
                username: text_payload(&frame)?.to_string(),
            },
            MessageType::Logout => Self::Logout {
                username: text_payload(&frame)?.to_string(),
            },
            MessageType::PeerLeft => Self::PeerLeft {
                text: text_payload(&frame)?.to_string(),
            },
            MessageType::KeepAlive => Self::KeepAlive,
            MessageType::PeerAvailable => Self::PeerAvailable,
            MessageType::PeerBusy => Self::PeerBusy,
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let encoded = Message::Login {
            username: "alice".into(),
        }
        .encode();
        assert_eq!(&encoded[..], b"20/alice");

        assert_eq!(&Message::KeepAlive.encode()[..], b"13/");
        assert_eq!(&Message::server_notice("User not found.").encode()[..], b"12/server/User not found.");
    }

    #[test]
    fn test_message_roundtrip() {
        let messages = vec![
            Message::Chat {
                ciphertext: Bytes::from_static(&[0x2f, 0x00, 0xff, 0x2f]),
            },
            Message::Params {
                params: Bytes::from_static(&[7u8; 12]),
            },
            Message::ChatCommand {
                username: "alice".into(),
                text: "join bob".into(),
            },
            Message::KeepAlive,
            Message::Login {
                username: "dana".into(),
            },
            Message::Logout {
                username: "dana0".into(),
            },
            Message::PeerAvailable,
            Message::PeerBusy,
            Message::PeerLeft {
                text: "bob has left. You have been returned to the lobby.".into(),
            },
            Message::NewPeer {
                username: "alice".into(),
                text: "Entering a conversation with alice.".into(),
            },
            Message::KeyExchangeRequest {
                public_key: Bytes::from(vec![9u8; 32]),
            },
            Message::KeyExchangeResponse {
                public_key: Bytes::from(vec![b'/'; 32]),
            },
        ];

        for message in messages {
            let decoded = Message::decode(&message.encode()).unwrap();
            assert_eq!(decoded.message_type(), message.message_type());
            assert_eq!(decoded.payload(), message.payload());
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_text_payload_roundtrip_is_exact() {
        let messages = vec![
            Message::server_notice("Available users:\n - alice (you)\n"),
            Message::Login {
                username: " bob".into(),
            },
            Message::Logout {
                username: "bob\n".into(),
            },
            Message::PeerLeft { text: "  \n".into() },
            Message::NewPeer {
                username: "alice".into(),
                text: " spaced out ".into(),
            },
            // Splits differently after decoding, but the bytes survive.
            Message::ChatCommand {
                username: "a/b".into(),
                text: "join c".into(),
            },
        ];

        for message in messages {
            let decoded = Message::decode(&message.encode()).unwrap();
            assert_eq!(decoded.message_type(), message.message_type());
            assert_eq!(decoded.payload(), message.payload());
            assert_eq!(decoded.encode(), message.encode());
        }
    }

    #[test]
    fn test_opaque_payload_not_rescanned() {
        // A delimiter inside the payload must not shift the header.
        let frame = Frame::decode(b"10/11/abc").unwrap();
        assert_eq!(frame.message_type, MessageType::Chat);
        assert_eq!(&frame.payload[..], b"11/abc");
    }

    #[test]
    fn test_text_keeps_later_separators() {
        let message = Message::decode(b"12/server/a/b/c").unwrap();
        assert_eq!(message.username(), Some("server"));
        assert_eq!(message.text(), Some("a/b/c"));
    }

    #[test]
    fn test_decode_rejects_short_frames() {
        assert_eq!(Frame::decode(b""), Err(WireError::TooShort(0, 3)));
        assert_eq!(Frame::decode(b"12"), Err(WireError::TooShort(2, 3)));
    }

    #[test]
    fn test_decode_rejects_bad_tags() {
        assert_eq!(Frame::decode(b"x1/abc"), Err(WireError::InvalidTag([b'x', b'1'])));
        assert_eq!(Frame::decode(b"12-abc"), Err(WireError::MissingDelimiter(b'-')));
        assert_eq!(Frame::decode(b"99/"), Err(WireError::UnknownType(99)));
    }

    #[test]
    fn test_missing_separator_is_an_error() {
        assert_eq!(
            Message::decode(b"12/no separator"),
            Err(WireError::MissingSeparator(MessageType::ChatCommand))
        );
        assert_eq!(
            Message::decode(b"25/alice"),
            Err(WireError::MissingSeparator(MessageType::NewPeer))
        );
    }

    #[test]
    fn test_accessors_are_trimmed() {
        let message = Message::decode(b"20/  carol \n").unwrap();
        assert_eq!(message.username(), Some("carol"));
        assert_eq!(&message.payload()[..], b"  carol \n");

        let message = Message::decode(b"12/ alice / join bob\n").unwrap();
        assert_eq!(message.username(), Some("alice"));
        assert_eq!(message.text(), Some("join bob"));

        let message = Message::decode(&[b'2', b'4', b'/', 0xff]);
        assert_eq!(message, Err(WireError::InvalidUtf8(MessageType::PeerLeft)));
    }

    #[test]
    fn test_relayed_types() {
        assert!(MessageType::Chat.is_relayed());
        assert!(MessageType::Params.is_relayed());
        assert!(MessageType::KeyExchangeRequest.is_relayed());
        assert!(MessageType::KeyExchangeResponse.is_relayed());
        assert!(!MessageType::ChatCommand.is_relayed());
        assert!(!MessageType::KeepAlive.is_relayed());
    }
}
