use crate::error::DecodeError;

/// Max possible packet size
pub const MAX_PACKET_SIZE: u32 = 0xF_FF_FF_FF;

prim_enum! {
    /// Quality of Service
    pub enum QoS : InvalidQoS {
        /// At most once delivery
        ///
        /// The message is delivered according to the capabilities of the underlying network.
        /// No response is sent by the receiver and no retry is performed by the sender.
        /// The message arrives at the receiver either once or not at all.
        AtMostOnce = 0,
        /// At least once delivery
        ///
        /// This quality of service ensures that the message arrives at the receiver at least once.
        /// A QoS 1 PUBLISH Packet has a Packet Identifier in its variable header
        /// and is acknowledged by a PUBACK Packet.
        AtLeastOnce = 1,
        /// Exactly once delivery
        ///
        /// This is the highest quality of service,
        /// for use when neither loss nor duplication of messages are acceptable.
        /// There is an increased overhead associated with this quality of service.
        ExactlyOnce = 2
    }
}

prim_enum! {
    /// MQTT Control Packet type, the upper nibble of the fixed header's
    /// first byte.
    pub enum PacketType : UnsupportedPacketType {
        Connect = 1,
        ConnAck = 2,
        Publish = 3,
        PubAck = 4,
        PubRec = 5,
        PubRel = 6,
        PubComp = 7,
        Subscribe = 8,
        SubAck = 9,
        Unsubscribe = 10,
        UnsubAck = 11,
        PingReq = 12,
        PingResp = 13,
        Disconnect = 14,
        /// v5 only
        Auth = 15
    }
}

/// Protocol version, resolved from the (protocol name, protocol level)
/// pair carried by the CONNECT variable header.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ProtocolVersion {
    /// "MQIsdp", level 3
    V3_1,
    /// "MQTT", level 4
    V3_1_1,
    /// "MQTT", level 5
    V5,
}

impl ProtocolVersion {
    pub fn name(self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "MQIsdp",
            ProtocolVersion::V3_1_1 | ProtocolVersion::V5 => "MQTT",
        }
    }

    pub fn level(self) -> u8 {
        match self {
            ProtocolVersion::V3_1 => 3,
            ProtocolVersion::V3_1_1 => 4,
            ProtocolVersion::V5 => 5,
        }
    }

    pub fn is_v5(self) -> bool {
        self == ProtocolVersion::V5
    }

    pub(crate) fn from_name_and_level(name: &str, level: u8) -> Result<Self, DecodeError> {
        match (name, level) {
            ("MQIsdp", 3) => Ok(ProtocolVersion::V3_1),
            ("MQTT", 4) => Ok(ProtocolVersion::V3_1_1),
            ("MQTT", 5) => Ok(ProtocolVersion::V5),
            _ => Err(DecodeError::MalformedPacket),
        }
    }
}

pub(crate) const WILL_QOS_SHIFT: u8 = 3;

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub(crate) struct ConnectFlags: u8 {
        const USERNAME      = 0b1000_0000;
        const PASSWORD      = 0b0100_0000;
        const WILL_RETAIN   = 0b0010_0000;
        const WILL_QOS      = 0b0001_1000;
        const WILL          = 0b0000_0100;
        const CLEAN_SESSION = 0b0000_0010;
    }
}

/// Parsed fixed header: packet type, the type-dependent flag fields and
/// the remaining length covering variable header plus payload.
///
/// Flag fields that the packet type defines as reserved are normalized to
/// their defaults on decode; encoding regenerates the required wire
/// pattern from the type alone.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// this might be re-delivery of an earlier attempt to send the Packet (PUBLISH only).
    pub dup: bool,
    /// the level of assurance for delivery (PUBLISH only).
    pub qos: QoS,
    pub retain: bool,
    /// byte count of variable header plus payload.
    pub remaining_length: u32,
}

impl FixedHeader {
    pub(crate) fn new(packet_type: PacketType, remaining_length: u32) -> FixedHeader {
        FixedHeader {
            packet_type,
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            remaining_length,
        }
    }

    pub(crate) fn decode(first_byte: u8, remaining_length: u32) -> Result<FixedHeader, DecodeError> {
        let packet_type = PacketType::try_from(first_byte >> 4)?;
        let flags = first_byte & 0b0000_1111;
        match packet_type {
            PacketType::Publish => {
                let qos = QoS::try_from((flags & 0b0110) >> 1)?;
                Ok(FixedHeader {
                    packet_type,
                    dup: flags & 0b1000 == 0b1000,
                    qos,
                    retain: flags & 0b0001 == 0b0001,
                    remaining_length,
                })
            }
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => {
                ensure!(flags == 0b0010, DecodeError::ReservedFlagSet);
                Ok(FixedHeader::new(packet_type, remaining_length))
            }
            _ => {
                ensure!(flags == 0, DecodeError::ReservedFlagSet);
                Ok(FixedHeader::new(packet_type, remaining_length))
            }
        }
    }

    pub(crate) fn first_byte(&self) -> u8 {
        let flags = match self.packet_type {
            PacketType::Publish => {
                ((self.dup as u8) << 3) | (u8::from(self.qos) << 1) | (self.retain as u8)
            }
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => 0b0010,
            _ => 0,
        };
        (u8::from(self.packet_type) << 4) | flags
    }
}
