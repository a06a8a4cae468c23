//! V5 dialect: MQTT 5 variable header and payload encodings.
//!
//! The v5 wire format shares the v3 skeleton and appends a property block
//! to most variable headers, a reason code to the acknowledgements, and a
//! full option byte to subscription entries.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::codec::Dialect;
use crate::error::{DecodeError, EncodeError};
use crate::packet::{
    Packet, Payload, RetainHandling, SubscriptionOptions, VariableHeader,
};
use crate::property::read_properties;
use crate::types::{FixedHeader, PacketType, QoS};
use crate::utils::{Decode, Encode, Reader};
use crate::v3;

pub(crate) struct V5Dialect;

impl Dialect for V5Dialect {
    fn decode_variable_header(
        &self,
        fixed: &FixedHeader,
        rdr: &mut Reader<'_>,
    ) -> Result<VariableHeader, DecodeError> {
        decode_variable_header(fixed, rdr)
    }

    fn decode_payload(
        &self,
        fixed: &FixedHeader,
        variable: &VariableHeader,
        src: &mut Bytes,
    ) -> Result<Payload, DecodeError> {
        decode_payload(fixed, variable, src)
    }

    fn encoded_size(&self, packet: &Packet) -> usize {
        encoded_size(packet)
    }

    fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        encode(packet, buf)
    }
}

fn decode_variable_header(
    fixed: &FixedHeader,
    rdr: &mut Reader<'_>,
) -> Result<VariableHeader, DecodeError> {
    match fixed.packet_type {
        PacketType::Connect => {
            let mut header = v3::decode_connect_header(rdr)?;
            header.properties = read_properties(rdr)?;
            Ok(VariableHeader::Connect(header))
        }
        PacketType::ConnAck => {
            let mut header = v3::decode_connack_header(rdr)?;
            header.properties = read_properties(rdr)?;
            Ok(VariableHeader::ConnAck(header))
        }
        PacketType::Publish => {
            let mut header = v3::decode_publish_header(fixed, rdr)?;
            header.properties = read_properties(rdr)?;
            Ok(VariableHeader::Publish(header))
        }
        PacketType::PubAck | PacketType::PubRec | PacketType::PubRel | PacketType::PubComp => {
            Ok(VariableHeader::PubReply {
                packet_id: rdr.read_packet_id()?,
                reason_code: rdr.read_u8()?,
                properties: read_properties(rdr)?,
            })
        }
        PacketType::Subscribe | PacketType::SubAck | PacketType::UnsubAck => {
            Ok(VariableHeader::PacketIdProperties {
                packet_id: rdr.read_packet_id()?,
                properties: read_properties(rdr)?,
            })
        }
        // UNSUBSCRIBE kept the bare v3 shape
        PacketType::Unsubscribe => {
            Ok(VariableHeader::PacketId { packet_id: rdr.read_packet_id()? })
        }
        PacketType::Disconnect | PacketType::Auth => Ok(VariableHeader::ReasonProperties {
            reason_code: rdr.read_u8()?,
            properties: read_properties(rdr)?,
        }),
        PacketType::PingReq | PacketType::PingResp => Ok(VariableHeader::Empty),
    }
}

fn decode_payload(
    fixed: &FixedHeader,
    variable: &VariableHeader,
    src: &mut Bytes,
) -> Result<Payload, DecodeError> {
    match fixed.packet_type {
        PacketType::Connect => match variable {
            VariableHeader::Connect(header) => v3::decode_connect_payload(header, src),
            _ => Err(DecodeError::MalformedPacket),
        },
        PacketType::Subscribe => decode_subscribe_payload(src),
        PacketType::SubAck => Ok(Payload::SubscribeAck(v3::drain_codes(src))),
        PacketType::Unsubscribe => Ok(Payload::Unsubscribe(v3::decode_topic_filters(src)?)),
        PacketType::UnsubAck => Ok(Payload::UnsubscribeAck(v3::drain_codes(src))),
        PacketType::Publish => Ok(Payload::Publish(src.split_off(0))),
        _ => Ok(Payload::Empty),
    }
}

fn decode_subscribe_payload(src: &mut Bytes) -> Result<Payload, DecodeError> {
    let mut filters = Vec::new();
    while src.has_remaining() {
        let filter = ByteString::decode(src)?;
        filters.push((filter, SubscriptionOptions::decode(src)?));
    }
    Ok(Payload::Subscribe(filters))
}

impl Decode for SubscriptionOptions {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ensure!(src.has_remaining(), DecodeError::MalformedPacket);
        let val = src.get_u8();
        // bits 6..7 are reserved
        ensure!(val & 0b1100_0000 == 0, DecodeError::MalformedPacket);
        let qos = QoS::try_from(val & 0b0000_0011)?;
        let retain_handling = RetainHandling::try_from((val & 0b0011_0000) >> 4)?;
        Ok(SubscriptionOptions {
            qos,
            no_local: val & 0b0000_0100 != 0,
            retain_as_published: val & 0b0000_1000 != 0,
            retain_handling,
        })
    }
}

impl Encode for SubscriptionOptions {
    fn encoded_size(&self) -> usize {
        1
    }
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(
            u8::from(self.qos)
                | (self.no_local as u8) << 2
                | (self.retain_as_published as u8) << 3
                | u8::from(self.retain_handling) << 4,
        );
        Ok(())
    }
}

fn encoded_size(packet: &Packet) -> usize {
    match (packet.fixed.packet_type, &packet.variable, &packet.payload) {
        (PacketType::Connect, VariableHeader::Connect(h), Payload::Connect(p)) => {
            v3::connect_header_size(h) + h.properties.block_size() + v3::connect_payload_size(h, p)
        }
        (PacketType::ConnAck, VariableHeader::ConnAck(h), Payload::Empty) => {
            2 + h.properties.block_size()
        }
        (PacketType::Publish, VariableHeader::Publish(h), Payload::Publish(data)) => {
            let packet_id_size = if packet.fixed.qos == QoS::AtMostOnce { 0 } else { 2 };
            h.topic.encoded_size() + packet_id_size + h.properties.block_size() + data.len()
        }
        (
            PacketType::PubAck | PacketType::PubRec | PacketType::PubRel | PacketType::PubComp,
            VariableHeader::PubReply { properties, .. },
            Payload::Empty,
        ) => 2 + 1 + properties.block_size(),
        (
            PacketType::Subscribe,
            VariableHeader::PacketIdProperties { properties, .. },
            Payload::Subscribe(filters),
        ) => {
            2 + properties.block_size()
                + filters.iter().fold(0, |acc, (filter, _)| acc + filter.encoded_size() + 1)
        }
        (
            PacketType::SubAck,
            VariableHeader::PacketIdProperties { properties, .. },
            Payload::SubscribeAck(codes),
        ) => 2 + properties.block_size() + codes.len(),
        (
            PacketType::Unsubscribe,
            VariableHeader::PacketId { .. },
            Payload::Unsubscribe(filters),
        ) => 2 + filters.iter().fold(0, |acc, filter| acc + filter.encoded_size()),
        (
            PacketType::UnsubAck,
            VariableHeader::PacketIdProperties { properties, .. },
            Payload::UnsubscribeAck(codes),
        ) => 2 + properties.block_size() + codes.len(),
        (
            PacketType::Disconnect | PacketType::Auth,
            VariableHeader::ReasonProperties { properties, .. },
            Payload::Empty,
        ) => 1 + properties.block_size(),
        (
            PacketType::PingReq | PacketType::PingResp,
            VariableHeader::Empty,
            Payload::Empty,
        ) => 0,
        _ => 0,
    }
}

fn encode(packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match (packet.fixed.packet_type, &packet.variable, &packet.payload) {
        (PacketType::Connect, VariableHeader::Connect(h), Payload::Connect(p)) => {
            v3::encode_connect_header(h, buf)?;
            h.properties.encode(buf)?;
            v3::encode_connect_payload(h, p, buf)
        }
        (PacketType::ConnAck, VariableHeader::ConnAck(h), Payload::Empty) => {
            buf.put_slice(&[h.session_present as u8, h.return_code]);
            h.properties.encode(buf)
        }
        (PacketType::Publish, VariableHeader::Publish(h), Payload::Publish(data)) => {
            v3::encode_publish_header(packet.fixed.qos, h, buf)?;
            h.properties.encode(buf)?;
            buf.extend_from_slice(data);
            Ok(())
        }
        (
            PacketType::PubAck | PacketType::PubRec | PacketType::PubRel | PacketType::PubComp,
            VariableHeader::PubReply { packet_id, reason_code, properties },
            Payload::Empty,
        ) => {
            packet_id.encode(buf)?;
            buf.put_u8(*reason_code);
            properties.encode(buf)
        }
        (
            PacketType::Subscribe,
            VariableHeader::PacketIdProperties { packet_id, properties },
            Payload::Subscribe(filters),
        ) => {
            packet_id.encode(buf)?;
            properties.encode(buf)?;
            for (filter, opts) in filters.iter() {
                filter.encode(buf)?;
                opts.encode(buf)?;
            }
            Ok(())
        }
        (
            PacketType::SubAck,
            VariableHeader::PacketIdProperties { packet_id, properties },
            Payload::SubscribeAck(codes),
        ) => {
            packet_id.encode(buf)?;
            properties.encode(buf)?;
            buf.extend_from_slice(codes);
            Ok(())
        }
        (
            PacketType::Unsubscribe,
            VariableHeader::PacketId { packet_id },
            Payload::Unsubscribe(filters),
        ) => {
            packet_id.encode(buf)?;
            for filter in filters.iter() {
                filter.encode(buf)?;
            }
            Ok(())
        }
        (
            PacketType::UnsubAck,
            VariableHeader::PacketIdProperties { packet_id, properties },
            Payload::UnsubscribeAck(codes),
        ) => {
            packet_id.encode(buf)?;
            properties.encode(buf)?;
            buf.extend_from_slice(codes);
            Ok(())
        }
        (
            PacketType::Disconnect | PacketType::Auth,
            VariableHeader::ReasonProperties { reason_code, properties },
            Payload::Empty,
        ) => {
            buf.put_u8(*reason_code);
            properties.encode(buf)
        }
        (
            PacketType::PingReq | PacketType::PingResp,
            VariableHeader::Empty,
            Payload::Empty,
        ) => Ok(()),
        _ => Err(EncodeError::MalformedPacket),
    }
}
