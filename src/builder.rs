//! Fluent packet constructors.
//!
//! Every builder targets one protocol version, validates the collected
//! fields on `build()` and returns an immutable [`Packet`] whose fixed
//! header already carries the remaining length it will encode to at that
//! version.

use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;

use crate::codec::dialect;
use crate::error::EncodeError;
use crate::packet::{
    valid_client_id, valid_topic_filter, valid_topic_name, ConnAckHeader, ConnectHeader,
    ConnectPayload, Packet, Payload, PublishHeader, SubscriptionOptions, VariableHeader,
};
use crate::property::{Properties, Property};
use crate::types::{FixedHeader, PacketType, ProtocolVersion, QoS};

impl Packet {
    pub fn connect(version: ProtocolVersion) -> ConnectBuilder {
        ConnectBuilder::new(version)
    }

    pub fn connack(version: ProtocolVersion) -> ConnAckBuilder {
        ConnAckBuilder::new(version)
    }

    pub fn publish(version: ProtocolVersion) -> PublishBuilder {
        PublishBuilder::new(version)
    }

    pub fn subscribe(version: ProtocolVersion) -> SubscribeBuilder {
        SubscribeBuilder::new(version)
    }

    pub fn suback(version: ProtocolVersion) -> SubAckBuilder {
        SubAckBuilder::new(version)
    }

    pub fn unsubscribe(version: ProtocolVersion) -> UnsubscribeBuilder {
        UnsubscribeBuilder::new(version)
    }

    pub fn unsuback(version: ProtocolVersion) -> UnsubAckBuilder {
        UnsubAckBuilder::new(version)
    }

    pub fn puback(version: ProtocolVersion) -> PubReplyBuilder {
        PubReplyBuilder::new(version, PacketType::PubAck)
    }

    pub fn pubrec(version: ProtocolVersion) -> PubReplyBuilder {
        PubReplyBuilder::new(version, PacketType::PubRec)
    }

    pub fn pubrel(version: ProtocolVersion) -> PubReplyBuilder {
        PubReplyBuilder::new(version, PacketType::PubRel)
    }

    pub fn pubcomp(version: ProtocolVersion) -> PubReplyBuilder {
        PubReplyBuilder::new(version, PacketType::PubComp)
    }

    pub fn disconnect(version: ProtocolVersion) -> DisconnectBuilder {
        DisconnectBuilder::new(version)
    }

    pub fn auth(version: ProtocolVersion) -> AuthBuilder {
        AuthBuilder::new(version)
    }
}

/// Stamps the remaining length the packet will encode to at `version`.
fn seal(version: ProtocolVersion, mut packet: Packet) -> Result<Packet, EncodeError> {
    let size = dialect(version).encoded_size(&packet);
    let size = u32::try_from(size).map_err(|_| EncodeError::InvalidLength)?;
    if size > crate::types::MAX_PACKET_SIZE {
        return Err(EncodeError::InvalidLength);
    }
    packet.fixed.remaining_length = size;
    Ok(packet)
}

fn check_v3_properties(
    version: ProtocolVersion,
    properties: &Properties,
) -> Result<(), EncodeError> {
    if !version.is_v5() && !properties.is_empty() {
        return Err(EncodeError::MalformedPacket);
    }
    Ok(())
}

pub struct ConnectBuilder {
    version: ProtocolVersion,
    client_id: ByteString,
    clean_session: bool,
    keep_alive: u16,
    will_topic: Option<ByteString>,
    will_message: Option<Bytes>,
    will_qos: QoS,
    will_retain: bool,
    username: Option<ByteString>,
    password: Option<Bytes>,
    has_username: Option<bool>,
    has_password: Option<bool>,
    properties: Properties,
}

impl ConnectBuilder {
    fn new(version: ProtocolVersion) -> ConnectBuilder {
        ConnectBuilder {
            version,
            client_id: ByteString::new(),
            clean_session: false,
            keep_alive: 0,
            will_topic: None,
            will_message: None,
            will_qos: QoS::AtMostOnce,
            will_retain: false,
            username: None,
            password: None,
            has_username: None,
            has_password: None,
            properties: Properties::new(),
        }
    }

    pub fn client_id<T>(mut self, client_id: T) -> Self
    where
        ByteString: From<T>,
    {
        self.client_id = client_id.into();
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive = secs;
        self
    }

    pub fn will<T>(mut self, topic: T, message: Bytes) -> Self
    where
        ByteString: From<T>,
    {
        self.will_topic = Some(topic.into());
        self.will_message = Some(message);
        self
    }

    pub fn will_qos(mut self, qos: QoS) -> Self {
        self.will_qos = qos;
        self
    }

    pub fn will_retain(mut self, retain: bool) -> Self {
        self.will_retain = retain;
        self
    }

    pub fn username<T>(mut self, username: T) -> Self
    where
        ByteString: From<T>,
    {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: Bytes) -> Self {
        self.password = Some(password);
        self
    }

    /// Overrides the wire flag derived from the presence of a username.
    pub fn has_username(mut self, value: bool) -> Self {
        self.has_username = Some(value);
        self
    }

    /// Overrides the wire flag derived from the presence of a password.
    pub fn has_password(mut self, value: bool) -> Self {
        self.has_password = Some(value);
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        if !valid_client_id(self.version, &self.client_id) {
            return Err(EncodeError::InvalidClientId);
        }

        let will = match (&self.will_topic, &self.will_message) {
            (Some(topic), Some(_)) => {
                if !valid_topic_name(topic) || topic.len() > 32767 {
                    return Err(EncodeError::InvalidTopic);
                }
                true
            }
            (None, None) => false,
            _ => return Err(EncodeError::MalformedPacket),
        };

        let has_username = self.has_username.unwrap_or(self.username.is_some());
        let has_password = self.has_password.unwrap_or(self.password.is_some());
        if has_username && self.username.is_none() {
            return Err(EncodeError::MalformedPacket);
        }
        if has_password && self.password.is_none() {
            return Err(EncodeError::MalformedPacket);
        }

        let header = ConnectHeader {
            version: self.version,
            has_username,
            has_password,
            will_retain: will && self.will_retain,
            will_qos: if will { self.will_qos } else { QoS::AtMostOnce },
            will,
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            properties: self.properties,
        };
        let payload = ConnectPayload {
            client_id: self.client_id,
            will_topic: self.will_topic,
            will_message: self.will_message,
            username: if has_username { self.username } else { None },
            password: if has_password { self.password } else { None },
        };

        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(PacketType::Connect, 0),
                variable: VariableHeader::Connect(header),
                payload: Payload::Connect(payload),
            },
        )
    }
}

pub struct ConnAckBuilder {
    version: ProtocolVersion,
    session_present: bool,
    return_code: u8,
    properties: Properties,
}

impl ConnAckBuilder {
    fn new(version: ProtocolVersion) -> ConnAckBuilder {
        ConnAckBuilder {
            version,
            session_present: false,
            return_code: 0,
            properties: Properties::new(),
        }
    }

    pub fn session_present(mut self, value: bool) -> Self {
        self.session_present = value;
        self
    }

    pub fn return_code(mut self, code: u8) -> Self {
        self.return_code = code;
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(PacketType::ConnAck, 0),
                variable: VariableHeader::ConnAck(ConnAckHeader {
                    session_present: self.session_present,
                    return_code: self.return_code,
                    properties: self.properties,
                }),
                payload: Payload::Empty,
            },
        )
    }
}

pub struct PublishBuilder {
    version: ProtocolVersion,
    topic: ByteString,
    qos: QoS,
    packet_id: Option<NonZeroU16>,
    retain: bool,
    dup: bool,
    payload: Bytes,
    properties: Properties,
}

impl PublishBuilder {
    fn new(version: ProtocolVersion) -> PublishBuilder {
        PublishBuilder {
            version,
            topic: ByteString::new(),
            qos: QoS::AtMostOnce,
            packet_id: None,
            retain: false,
            dup: false,
            payload: Bytes::new(),
            properties: Properties::new(),
        }
    }

    pub fn topic<T>(mut self, topic: T) -> Self
    where
        ByteString: From<T>,
    {
        self.topic = topic.into();
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn packet_id(mut self, packet_id: NonZeroU16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }

    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        if !valid_topic_name(&self.topic) {
            return Err(EncodeError::InvalidTopic);
        }
        if self.qos == QoS::AtMostOnce {
            if self.packet_id.is_some() {
                return Err(EncodeError::MalformedPacket);
            }
        } else if self.packet_id.is_none() {
            return Err(EncodeError::PacketIdRequired);
        }

        let mut fixed = FixedHeader::new(PacketType::Publish, 0);
        fixed.qos = self.qos;
        fixed.retain = self.retain;
        fixed.dup = self.dup;

        seal(
            self.version,
            Packet {
                fixed,
                variable: VariableHeader::Publish(PublishHeader {
                    topic: self.topic,
                    packet_id: self.packet_id,
                    properties: self.properties,
                }),
                payload: Payload::Publish(self.payload),
            },
        )
    }
}

pub struct SubscribeBuilder {
    version: ProtocolVersion,
    packet_id: Option<NonZeroU16>,
    filters: Vec<(ByteString, SubscriptionOptions)>,
    properties: Properties,
}

impl SubscribeBuilder {
    fn new(version: ProtocolVersion) -> SubscribeBuilder {
        SubscribeBuilder {
            version,
            packet_id: None,
            filters: Vec::new(),
            properties: Properties::new(),
        }
    }

    pub fn packet_id(mut self, packet_id: NonZeroU16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    /// Adds a subscription at the given QoS with default options.
    pub fn topic<T>(self, filter: T, qos: QoS) -> Self
    where
        ByteString: From<T>,
    {
        self.subscription(filter, SubscriptionOptions::from_qos(qos))
    }

    pub fn subscription<T>(mut self, filter: T, options: SubscriptionOptions) -> Self
    where
        ByteString: From<T>,
    {
        self.filters.push((filter.into(), options));
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        let packet_id = self.packet_id.ok_or(EncodeError::PacketIdRequired)?;
        if self.filters.is_empty() {
            return Err(EncodeError::MalformedPacket);
        }
        for (filter, options) in self.filters.iter() {
            if !valid_topic_filter(filter) {
                return Err(EncodeError::InvalidTopic);
            }
            if !self.version.is_v5() && !options.is_qos_only() {
                return Err(EncodeError::MalformedPacket);
            }
        }

        let variable = if self.version.is_v5() {
            VariableHeader::PacketIdProperties { packet_id, properties: self.properties }
        } else {
            VariableHeader::PacketId { packet_id }
        };
        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(PacketType::Subscribe, 0),
                variable,
                payload: Payload::Subscribe(self.filters),
            },
        )
    }
}

pub struct SubAckBuilder {
    version: ProtocolVersion,
    packet_id: Option<NonZeroU16>,
    codes: Vec<u8>,
    properties: Properties,
}

impl SubAckBuilder {
    fn new(version: ProtocolVersion) -> SubAckBuilder {
        SubAckBuilder {
            version,
            packet_id: None,
            codes: Vec::new(),
            properties: Properties::new(),
        }
    }

    pub fn packet_id(mut self, packet_id: NonZeroU16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    /// Appends a granted QoS entry.
    pub fn granted_qos(mut self, qos: QoS) -> Self {
        self.codes.push(u8::from(qos));
        self
    }

    /// Appends a raw reason code (e.g. 0x80, unspecified failure).
    pub fn reason_code(mut self, code: u8) -> Self {
        self.codes.push(code);
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        let packet_id = self.packet_id.ok_or(EncodeError::PacketIdRequired)?;
        let variable = if self.version.is_v5() {
            VariableHeader::PacketIdProperties { packet_id, properties: self.properties }
        } else {
            VariableHeader::PacketId { packet_id }
        };
        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(PacketType::SubAck, 0),
                variable,
                payload: Payload::SubscribeAck(self.codes),
            },
        )
    }
}

pub struct UnsubscribeBuilder {
    version: ProtocolVersion,
    packet_id: Option<NonZeroU16>,
    filters: Vec<ByteString>,
}

impl UnsubscribeBuilder {
    fn new(version: ProtocolVersion) -> UnsubscribeBuilder {
        UnsubscribeBuilder { version, packet_id: None, filters: Vec::new() }
    }

    pub fn packet_id(mut self, packet_id: NonZeroU16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    pub fn topic<T>(mut self, filter: T) -> Self
    where
        ByteString: From<T>,
    {
        self.filters.push(filter.into());
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        let packet_id = self.packet_id.ok_or(EncodeError::PacketIdRequired)?;
        if self.filters.is_empty() {
            return Err(EncodeError::MalformedPacket);
        }
        for filter in self.filters.iter() {
            if !valid_topic_filter(filter) {
                return Err(EncodeError::InvalidTopic);
            }
        }
        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(PacketType::Unsubscribe, 0),
                variable: VariableHeader::PacketId { packet_id },
                payload: Payload::Unsubscribe(self.filters),
            },
        )
    }
}

pub struct UnsubAckBuilder {
    version: ProtocolVersion,
    packet_id: Option<NonZeroU16>,
    codes: Vec<u8>,
    properties: Properties,
}

impl UnsubAckBuilder {
    fn new(version: ProtocolVersion) -> UnsubAckBuilder {
        UnsubAckBuilder {
            version,
            packet_id: None,
            codes: Vec::new(),
            properties: Properties::new(),
        }
    }

    pub fn packet_id(mut self, packet_id: NonZeroU16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    /// Appends a per-filter reason code (v5 only).
    pub fn reason_code(mut self, code: u8) -> Self {
        self.codes.push(code);
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        let packet_id = self.packet_id.ok_or(EncodeError::PacketIdRequired)?;
        let (variable, payload) = if self.version.is_v5() {
            (
                VariableHeader::PacketIdProperties { packet_id, properties: self.properties },
                Payload::UnsubscribeAck(self.codes),
            )
        } else {
            if !self.codes.is_empty() {
                return Err(EncodeError::UnsupportedVersion);
            }
            (VariableHeader::PacketId { packet_id }, Payload::Empty)
        };
        seal(
            self.version,
            Packet { fixed: FixedHeader::new(PacketType::UnsubAck, 0), variable, payload },
        )
    }
}

/// Builder shared by the four publish acknowledgement types.
pub struct PubReplyBuilder {
    version: ProtocolVersion,
    packet_type: PacketType,
    packet_id: Option<NonZeroU16>,
    reason_code: u8,
    properties: Properties,
}

impl PubReplyBuilder {
    fn new(version: ProtocolVersion, packet_type: PacketType) -> PubReplyBuilder {
        PubReplyBuilder {
            version,
            packet_type,
            packet_id: None,
            reason_code: 0,
            properties: Properties::new(),
        }
    }

    pub fn packet_id(mut self, packet_id: NonZeroU16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    /// Reason code (v5 only; v3 acknowledgements carry none).
    pub fn reason_code(mut self, code: u8) -> Self {
        self.reason_code = code;
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        let packet_id = self.packet_id.ok_or(EncodeError::PacketIdRequired)?;
        let variable = if self.version.is_v5() {
            VariableHeader::PubReply {
                packet_id,
                reason_code: self.reason_code,
                properties: self.properties,
            }
        } else {
            if self.reason_code != 0 {
                return Err(EncodeError::UnsupportedVersion);
            }
            VariableHeader::PacketId { packet_id }
        };
        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(self.packet_type, 0),
                variable,
                payload: Payload::Empty,
            },
        )
    }
}

pub struct DisconnectBuilder {
    version: ProtocolVersion,
    reason_code: u8,
    properties: Properties,
}

impl DisconnectBuilder {
    fn new(version: ProtocolVersion) -> DisconnectBuilder {
        DisconnectBuilder { version, reason_code: 0, properties: Properties::new() }
    }

    pub fn reason_code(mut self, code: u8) -> Self {
        self.reason_code = code;
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        check_v3_properties(self.version, &self.properties)?;
        let variable = if self.version.is_v5() {
            VariableHeader::ReasonProperties {
                reason_code: self.reason_code,
                properties: self.properties,
            }
        } else {
            if self.reason_code != 0 {
                return Err(EncodeError::UnsupportedVersion);
            }
            VariableHeader::Empty
        };
        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(PacketType::Disconnect, 0),
                variable,
                payload: Payload::Empty,
            },
        )
    }
}

pub struct AuthBuilder {
    version: ProtocolVersion,
    reason_code: u8,
    properties: Properties,
}

impl AuthBuilder {
    fn new(version: ProtocolVersion) -> AuthBuilder {
        AuthBuilder { version, reason_code: 0, properties: Properties::new() }
    }

    pub fn reason_code(mut self, code: u8) -> Self {
        self.reason_code = code;
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    pub fn build(self) -> Result<Packet, EncodeError> {
        if !self.version.is_v5() {
            return Err(EncodeError::UnsupportedVersion);
        }
        seal(
            self.version,
            Packet {
                fixed: FixedHeader::new(PacketType::Auth, 0),
                variable: VariableHeader::ReasonProperties {
                    reason_code: self.reason_code,
                    properties: self.properties,
                },
                payload: Payload::Empty,
            },
        )
    }
}
