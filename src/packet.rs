use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;

use crate::property::Properties;
use crate::types::{FixedHeader, PacketType, ProtocolVersion, QoS};

/// A fully decoded MQTT control packet: fixed header, the variable header
/// shape belonging to the packet type, and the payload.
///
/// Instances are plain immutable data; the only mutable state in the crate
/// lives inside the decoder itself.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet {
    pub fixed: FixedHeader,
    pub variable: VariableHeader,
    pub payload: Payload,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        self.fixed.packet_type
    }

    /// Packet identifier, for the packet types that carry one.
    pub fn packet_id(&self) -> Option<NonZeroU16> {
        match self.variable {
            VariableHeader::Publish(ref header) => header.packet_id,
            VariableHeader::PacketId { packet_id } => Some(packet_id),
            VariableHeader::PacketIdProperties { packet_id, .. } => Some(packet_id),
            VariableHeader::PubReply { packet_id, .. } => Some(packet_id),
            _ => None,
        }
    }

    pub fn ping_request() -> Packet {
        Packet {
            fixed: FixedHeader::new(PacketType::PingReq, 0),
            variable: VariableHeader::Empty,
            payload: Payload::Empty,
        }
    }

    pub fn ping_response() -> Packet {
        Packet {
            fixed: FixedHeader::new(PacketType::PingResp, 0),
            variable: VariableHeader::Empty,
            payload: Payload::Empty,
        }
    }
}

/// Variable header of every packet type, as a tagged variant.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum VariableHeader {
    Connect(ConnectHeader),
    ConnAck(ConnAckHeader),
    Publish(PublishHeader),
    /// v3 acknowledgements and v5 UNSUBSCRIBE
    PacketId { packet_id: NonZeroU16 },
    /// v5 SUBSCRIBE/SUBACK/UNSUBACK
    PacketIdProperties { packet_id: NonZeroU16, properties: Properties },
    /// v5 PUBACK/PUBREC/PUBREL/PUBCOMP
    PubReply { packet_id: NonZeroU16, reason_code: u8, properties: Properties },
    /// v5 DISCONNECT/AUTH
    ReasonProperties { reason_code: u8, properties: Properties },
    Empty,
}

/// CONNECT variable header content
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ConnectHeader {
    /// resolved from the wire (protocol name, protocol level) pair.
    pub version: ProtocolVersion,
    pub has_username: bool,
    pub has_password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will: bool,
    /// the handling of the Session state.
    pub clean_session: bool,
    /// a time interval measured in seconds.
    pub keep_alive: u16,
    /// empty on the v3 dialect.
    pub properties: Properties,
}

/// CONNACK variable header content
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ConnAckHeader {
    /// enables a Client to establish whether the Client and Server have a
    /// consistent view about whether there is already stored Session state.
    pub session_present: bool,
    /// CONNECT return code on v3, reason code on v5.
    pub return_code: u8,
    pub properties: Properties,
}

/// PUBLISH variable header content
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishHeader {
    /// the information channel to which payload data is published.
    pub topic: ByteString,
    /// only present in PUBLISH Packets where the QoS level is 1 or 2.
    pub packet_id: Option<NonZeroU16>,
    pub properties: Properties,
}

/// Payload of every packet type.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Payload {
    Connect(ConnectPayload),
    /// the list of Topic Filters and options to which the Client wants to subscribe.
    Subscribe(Vec<(ByteString, SubscriptionOptions)>),
    /// granted QoS values or reason codes, one per requested filter.
    SubscribeAck(Vec<u8>),
    /// the list of Topic Filters that the Client wishes to unsubscribe from.
    Unsubscribe(Vec<ByteString>),
    /// v5 reason codes, one per requested filter.
    UnsubscribeAck(Vec<u8>),
    /// Application message bytes, sized by the fixed header's remaining
    /// length minus the variable header. The `Bytes` shares storage with
    /// the inbound buffer; no copy is made on decode.
    Publish(Bytes),
    Empty,
}

/// CONNECT payload content
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ConnectPayload {
    /// identifies the Client to the Server.
    pub client_id: ByteString,
    pub will_topic: Option<ByteString>,
    pub will_message: Option<Bytes>,
    /// username can be used by the Server for authentication and authorization.
    pub username: Option<ByteString>,
    /// password can be used by the Server for authentication and authorization.
    pub password: Option<Bytes>,
}

prim_enum! {
    /// Retained message handling policy of a v5 subscription
    pub enum RetainHandling : MalformedPacket {
        SendAtSubscribe = 0,
        SendAtSubscribeIfNotYetExists = 1,
        DontSendAtSubscribe = 2
    }
}

/// Per-filter subscription options. The v3 dialect carries only the QoS
/// field; the remaining fields stay at their defaults.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl SubscriptionOptions {
    pub fn from_qos(qos: QoS) -> SubscriptionOptions {
        SubscriptionOptions {
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::SendAtSubscribe,
        }
    }

    pub(crate) fn is_qos_only(&self) -> bool {
        !self.no_local
            && !self.retain_as_published
            && self.retain_handling == RetainHandling::SendAtSubscribe
    }
}

/// A PUBLISH topic names a single channel: it must be non-empty and free
/// of the wildcard characters and U+0000.
pub(crate) fn valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#', '\0'])
}

/// Topic filters may carry wildcards but not U+0000, and must be non-empty.
pub(crate) fn valid_topic_filter(filter: &str) -> bool {
    !filter.is_empty() && !filter.contains('\0')
}

pub(crate) fn valid_client_id(version: ProtocolVersion, client_id: &str) -> bool {
    match version {
        ProtocolVersion::V3_1 => {
            (1..=23).contains(&client_id.len())
                && client_id.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        // v3.1.1 and v5 allow any UTF-8 client id, zero length included
        ProtocolVersion::V3_1_1 | ProtocolVersion::V5 => !client_id.contains('\0'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name_validation() {
        assert!(valid_topic_name("a/b"));
        assert!(valid_topic_name("t"));
        assert!(!valid_topic_name(""));
        assert!(!valid_topic_name("a/+/b"));
        assert!(!valid_topic_name("a/#"));
        assert!(!valid_topic_name("a\0b"));
    }

    #[test]
    fn test_topic_filter_validation() {
        assert!(valid_topic_filter("a/+/b"));
        assert!(valid_topic_filter("#"));
        assert!(!valid_topic_filter(""));
        assert!(!valid_topic_filter("a\0b"));
    }

    #[test]
    fn test_client_id_rules() {
        assert!(valid_client_id(ProtocolVersion::V3_1, "abc123"));
        assert!(!valid_client_id(ProtocolVersion::V3_1, ""));
        assert!(!valid_client_id(ProtocolVersion::V3_1, "has-dash"));
        assert!(!valid_client_id(ProtocolVersion::V3_1, &"x".repeat(24)));

        assert!(valid_client_id(ProtocolVersion::V3_1_1, ""));
        assert!(valid_client_id(ProtocolVersion::V3_1_1, "any топик 漢字"));
        assert!(valid_client_id(ProtocolVersion::V5, &"x".repeat(100)));
        assert!(!valid_client_id(ProtocolVersion::V5, "nul\0byte"));
    }
}
