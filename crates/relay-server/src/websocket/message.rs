//! Application-level messages carried by both endpoints.

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;

/// One complete message, relayed verbatim.
///
/// WebSocket framing delivers whole messages, so a message is never split
/// across relays regardless of how the transport chunks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayMessage {
    /// UTF-8 text frame.
    Text(Utf8Bytes),
    /// Binary frame.
    Binary(Bytes),
}

impl RelayMessage {
    /// Build a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(Utf8Bytes::from(text.into()))
    }

    /// Build a binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Convert an inbound frame. Control frames yield `None`.
    pub fn from_frame(frame: Message) -> Option<Self> {
        match frame {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(data) => Some(Self::Binary(data)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    /// The text payload, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.as_str().len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<RelayMessage> for Message {
    fn from(message: RelayMessage) -> Self {
        match message {
            RelayMessage::Text(text) => Message::Text(text),
            RelayMessage::Binary(data) => Message::Binary(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_accessors() {
        let msg = RelayMessage::text("hello");
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.len(), 5);
        assert!(!msg.is_empty());
    }

    #[test]
    fn binary_has_no_text() {
        let msg = RelayMessage::binary(vec![0u8, 1, 2]);
        assert_eq!(msg.as_text(), None);
        assert_eq!(msg.len(), 3);
    }

    #[test]
    fn control_frames_are_not_messages() {
        assert!(RelayMessage::from_frame(Message::Ping(Bytes::new())).is_none());
        assert!(RelayMessage::from_frame(Message::Pong(Bytes::new())).is_none());
        assert!(RelayMessage::from_frame(Message::Close(None)).is_none());
    }

    #[test]
    fn data_frames_convert_both_ways() {
        let msg = RelayMessage::from_frame(Message::Text("hi".into())).unwrap();
        assert_eq!(msg, RelayMessage::text("hi"));
        let frame: Message = RelayMessage::binary(vec![7u8]).into();
        assert_eq!(frame, Message::Binary(Bytes::from_static(&[7])));
    }

    #[test]
    fn empty_text() {
        assert!(RelayMessage::text(String::new()).is_empty());
    }
}
