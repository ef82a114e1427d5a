//! Inbound message envelopes.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{GatewayError, GatewayResult};
use crate::xml::parse_flat;

/// `MsgType` of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MsgType {
    Text,
    Image,
    Voice,
    Video,
    ShortVideo,
    Location,
    Link,
    Event,
    Other(String),
}

impl MsgType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "text" => Self::Text,
            "image" => Self::Image,
            "voice" => Self::Voice,
            "video" => Self::Video,
            "shortvideo" => Self::ShortVideo,
            "location" => Self::Location,
            "link" => Self::Link,
            "event" => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::ShortVideo => "shortvideo",
            Self::Location => "location",
            Self::Link => "link",
            Self::Event => "event",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Event` of an event push.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Subscribe,
    Unsubscribe,
    /// Scan of a parametric QR code by an existing follower.
    Scan,
    Location,
    Click,
    View,
    Other(String),
}

impl EventType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "SCAN" => Self::Scan,
            "LOCATION" => Self::Location,
            "CLICK" => Self::Click,
            "VIEW" => Self::View,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Scan => "SCAN",
            Self::Location => "LOCATION",
            Self::Click => "CLICK",
            Self::View => "VIEW",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decrypted inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Tenant account (original id) the message was sent to.
    pub to_user: String,
    /// Sender (user open id).
    pub from_user: String,
    pub create_time: i64,
    pub msg_type: MsgType,
    fields: BTreeMap<String, String>,
}

/// Content of a text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub content: String,
    pub msg_id: Option<i64>,
}

/// Content of an event push.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub event: EventType,
    /// `EventKey`: QR scene for subscribe/SCAN, menu key for CLICK, URL for VIEW.
    pub event_key: String,
    /// QR code ticket for subscribe/SCAN.
    pub ticket: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub precision: Option<f64>,
}

impl Envelope {
    pub fn parse(xml: &str) -> GatewayResult<Self> {
        let fields = parse_flat(xml)?;
        let required = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| GatewayError::protocol(format!("message has no {name}")))
        };

        let to_user = required("ToUserName")?;
        let from_user = required("FromUserName")?;
        let msg_type = MsgType::parse(&required("MsgType")?);
        let create_time = fields
            .get("CreateTime")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_default();

        Ok(Self {
            to_user,
            from_user,
            create_time,
            msg_type,
            fields,
        })
    }

    /// Raw value of any element of the message.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn msg_id(&self) -> Option<i64> {
        self.field("MsgId").and_then(|v| v.trim().parse().ok())
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<TextMessage> {
        if self.msg_type != MsgType::Text {
            return None;
        }
        Some(TextMessage {
            content: self.field("Content").unwrap_or_default().to_string(),
            msg_id: self.msg_id(),
        })
    }

    /// Event content, if this is an event push.
    pub fn event(&self) -> Option<EventMessage> {
        if self.msg_type != MsgType::Event {
            return None;
        }
        let number = |name: &str| self.field(name).and_then(|v| v.trim().parse().ok());
        Some(EventMessage {
            event: EventType::parse(self.field("Event").unwrap_or_default()),
            event_key: self.field("EventKey").unwrap_or_default().to_string(),
            ticket: self.field("Ticket").map(str::to_string),
            latitude: number("Latitude"),
            longitude: number("Longitude"),
            precision: number("Precision"),
        })
    }
}

/// `Encrypt` payload of an encrypted push body.
pub(crate) fn encrypted_payload(body: &str) -> GatewayResult<String> {
    parse_flat(body)?
        .remove("Encrypt")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::protocol("encrypted body has no Encrypt element"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "<xml><ToUserName><![CDATA[gh_abc]]></ToUserName><FromUserName><![CDATA[openid-1]]></FromUserName><CreateTime>1348831860</CreateTime><MsgType><![CDATA[text]]></MsgType><Content><![CDATA[hello]]></Content><MsgId>1234567890123456</MsgId></xml>";

    #[test]
    fn test_parse_text_message() {
        let envelope = Envelope::parse(TEXT).unwrap();
        assert_eq!(envelope.to_user, "gh_abc");
        assert_eq!(envelope.from_user, "openid-1");
        assert_eq!(envelope.create_time, 1348831860);
        assert_eq!(envelope.msg_type, MsgType::Text);

        let text = envelope.text().unwrap();
        assert_eq!(text.content, "hello");
        assert_eq!(text.msg_id, Some(1234567890123456));
        assert!(envelope.event().is_none());
    }

    #[test]
    fn test_parse_location_event() {
        let envelope = Envelope::parse(
            "<xml><ToUserName><![CDATA[gh_abc]]></ToUserName><FromUserName><![CDATA[openid-1]]></FromUserName><CreateTime>123456789</CreateTime><MsgType><![CDATA[event]]></MsgType><Event><![CDATA[LOCATION]]></Event><Latitude>23.137466</Latitude><Longitude>113.352425</Longitude><Precision>119.385040</Precision></xml>",
        )
        .unwrap();

        let event = envelope.event().unwrap();
        assert_eq!(event.event, EventType::Location);
        assert_eq!(event.latitude, Some(23.137466));
        assert_eq!(event.ticket, None);
        assert!(envelope.text().is_none());
    }

    #[test]
    fn test_unknown_types_are_kept() {
        assert_eq!(
            MsgType::parse("miniprogrampage"),
            MsgType::Other("miniprogrampage".into())
        );
        let event = EventType::parse("TEMPLATESENDJOBFINISH");
        assert_eq!(event.as_str(), "TEMPLATESENDJOBFINISH");
    }

    #[test]
    fn test_missing_sender_is_protocol_error() {
        let result = Envelope::parse("<xml><ToUserName>gh</ToUserName><MsgType>text</MsgType></xml>");
        assert!(matches!(result, Err(GatewayError::Protocol { .. })));
    }

    #[test]
    fn test_encrypted_payload() {
        let body = "<xml><ToUserName><![CDATA[gh_abc]]></ToUserName><Encrypt><![CDATA[c2VjcmV0]]></Encrypt></xml>";
        assert_eq!(encrypted_payload(body).unwrap(), "c2VjcmV0");
        assert!(encrypted_payload("<xml></xml>").is_err());
    }
}
