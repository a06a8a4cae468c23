//! V3 dialect: MQTT 3.1 / 3.1.1 variable header and payload encodings.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::codec::Dialect;
use crate::error::{DecodeError, EncodeError};
use crate::packet::{
    valid_client_id, valid_topic_name, ConnAckHeader, ConnectHeader, ConnectPayload, Packet,
    Payload, PublishHeader, SubscriptionOptions, VariableHeader,
};
use crate::types::{ConnectFlags, FixedHeader, PacketType, ProtocolVersion, QoS, WILL_QOS_SHIFT};
use crate::utils::{self, Decode, Encode, Reader};

pub(crate) struct V3Dialect;

impl Dialect for V3Dialect {
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
        PacketType::Connect => Ok(VariableHeader::Connect(decode_connect_header(rdr)?)),
        PacketType::ConnAck => Ok(VariableHeader::ConnAck(decode_connack_header(rdr)?)),
        PacketType::Publish => Ok(VariableHeader::Publish(decode_publish_header(fixed, rdr)?)),
        PacketType::PubAck
        | PacketType::PubRec
        | PacketType::PubRel
        | PacketType::PubComp
        | PacketType::Subscribe
        | PacketType::SubAck
        | PacketType::Unsubscribe
        | PacketType::UnsubAck => {
            Ok(VariableHeader::PacketId { packet_id: rdr.read_packet_id()? })
        }
        PacketType::PingReq | PacketType::PingResp | PacketType::Disconnect => {
            Ok(VariableHeader::Empty)
        }
        // AUTH does not exist before v5
        PacketType::Auth => Err(DecodeError::MalformedPacket),
    }
}

pub(crate) fn decode_connect_header(rdr: &mut Reader<'_>) -> Result<ConnectHeader, DecodeError> {
    let name = rdr.read_string()?;
    let level = rdr.read_u8()?;
    let version = ProtocolVersion::from_name_and_level(&name, level)?;

    let flags = rdr.read_u8()?;
    let keep_alive = rdr.read_u16()?;

    // [MQTT-3.1.2-3]: only v3.1.1 pins the reserved connect flag to zero
    if version == ProtocolVersion::V3_1_1 {
        ensure!(flags & 0b0000_0001 == 0, DecodeError::ReservedFlagSet);
    }

    let will_qos = QoS::try_from((flags & ConnectFlags::WILL_QOS.bits()) >> WILL_QOS_SHIFT)?;
    let flags = ConnectFlags::from_bits_truncate(flags);

    Ok(ConnectHeader {
        version,
        has_username: flags.contains(ConnectFlags::USERNAME),
        has_password: flags.contains(ConnectFlags::PASSWORD),
        will_retain: flags.contains(ConnectFlags::WILL_RETAIN),
        will_qos,
        will: flags.contains(ConnectFlags::WILL),
        clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
        keep_alive,
        properties: Default::default(),
    })
}

pub(crate) fn decode_connack_header(rdr: &mut Reader<'_>) -> Result<ConnAckHeader, DecodeError> {
    let flags = rdr.read_u8()?;
    let return_code = rdr.read_u8()?;
    Ok(ConnAckHeader {
        session_present: flags & 0x01 == 0x01,
        return_code,
        properties: Default::default(),
    })
}

pub(crate) fn decode_publish_header(
    fixed: &FixedHeader,
    rdr: &mut Reader<'_>,
) -> Result<PublishHeader, DecodeError> {
    let topic = rdr.read_string()?;
    ensure!(valid_topic_name(&topic), DecodeError::InvalidTopic);
    let packet_id = if fixed.qos == QoS::AtMostOnce {
        None
    } else {
        Some(rdr.read_packet_id()?)
    };
    Ok(PublishHeader { topic, packet_id, properties: Default::default() })
}

fn decode_payload(
    fixed: &FixedHeader,
    variable: &VariableHeader,
    src: &mut Bytes,
) -> Result<Payload, DecodeError> {
    match fixed.packet_type {
        PacketType::Connect => match variable {
            VariableHeader::Connect(header) => decode_connect_payload(header, src),
            _ => Err(DecodeError::MalformedPacket),
        },
        PacketType::Subscribe => decode_subscribe_payload(src),
        PacketType::SubAck => Ok(Payload::SubscribeAck(drain_codes(src))),
        PacketType::Unsubscribe => Ok(Payload::Unsubscribe(decode_topic_filters(src)?)),
        PacketType::Publish => Ok(Payload::Publish(src.split_off(0))),
        _ => Ok(Payload::Empty),
    }
}

pub(crate) fn decode_connect_payload(
    header: &ConnectHeader,
    src: &mut Bytes,
) -> Result<Payload, DecodeError> {
    let client_id = ByteString::decode(src)?;
    ensure!(valid_client_id(header.version, &client_id), DecodeError::InvalidClientId);

    let (will_topic, will_message) = if header.will {
        let topic = utils::decode_bounded_string(src, 0, 32767)?
            .ok_or(DecodeError::MalformedPacket)?;
        let message = Bytes::decode(src)?;
        (Some(topic), Some(message))
    } else {
        (None, None)
    };

    let username = if header.has_username {
        Some(ByteString::decode(src)?)
    } else {
        None
    };
    let password = if header.has_password {
        Some(Bytes::decode(src)?)
    } else {
        None
    };

    Ok(Payload::Connect(ConnectPayload {
        client_id,
        will_topic,
        will_message,
        username,
        password,
    }))
}

fn decode_subscribe_payload(src: &mut Bytes) -> Result<Payload, DecodeError> {
    let mut filters = Vec::new();
    while src.has_remaining() {
        let filter = ByteString::decode(src)?;
        ensure!(src.has_remaining(), DecodeError::MalformedPacket);
        let opts = src.get_u8();
        // bits 2..7 are reserved before v5
        ensure!(opts & 0b1111_1100 == 0, DecodeError::MalformedPacket);
        let qos = QoS::try_from(opts & 0b0000_0011)?;
        filters.push((filter, SubscriptionOptions::from_qos(qos)));
    }
    Ok(Payload::Subscribe(filters))
}

pub(crate) fn decode_topic_filters(src: &mut Bytes) -> Result<Vec<ByteString>, DecodeError> {
    let mut filters = Vec::new();
    while src.has_remaining() {
        filters.push(ByteString::decode(src)?);
    }
    Ok(filters)
}

pub(crate) fn drain_codes(src: &mut Bytes) -> Vec<u8> {
    src.split_to(src.len()).to_vec()
}

fn encoded_size(packet: &Packet) -> usize {
    match (packet.fixed.packet_type, &packet.variable, &packet.payload) {
        (PacketType::Connect, VariableHeader::Connect(h), Payload::Connect(p)) => {
            connect_header_size(h) + connect_payload_size(h, p)
        }
        (PacketType::ConnAck, VariableHeader::ConnAck(_), Payload::Empty) => 2,
        (PacketType::Publish, VariableHeader::Publish(h), Payload::Publish(data)) => {
            let packet_id_size = if packet.fixed.qos == QoS::AtMostOnce { 0 } else { 2 };
            h.topic.encoded_size() + packet_id_size + data.len()
        }
        (
            PacketType::PubAck
            | PacketType::PubRec
            | PacketType::PubRel
            | PacketType::PubComp
            | PacketType::UnsubAck,
            VariableHeader::PacketId { .. },
            Payload::Empty,
        ) => 2,
        (
            PacketType::Subscribe,
            VariableHeader::PacketId { .. },
            Payload::Subscribe(filters),
        ) => 2 + filters.iter().fold(0, |acc, (filter, _)| acc + filter.encoded_size() + 1),
        (
            PacketType::SubAck,
            VariableHeader::PacketId { .. },
            Payload::SubscribeAck(codes),
        ) => 2 + codes.len(),
        (
            PacketType::Unsubscribe,
            VariableHeader::PacketId { .. },
            Payload::Unsubscribe(filters),
        ) => 2 + filters.iter().fold(0, |acc, filter| acc + filter.encoded_size()),
        (
            PacketType::PingReq | PacketType::PingResp | PacketType::Disconnect,
            VariableHeader::Empty,
            Payload::Empty,
        ) => 0,
        _ => 0,
    }
}

fn encode(packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match (packet.fixed.packet_type, &packet.variable, &packet.payload) {
        (PacketType::Connect, VariableHeader::Connect(h), Payload::Connect(p)) => {
            encode_connect_header(h, buf)?;
            encode_connect_payload(h, p, buf)
        }
        (PacketType::ConnAck, VariableHeader::ConnAck(h), Payload::Empty) => {
            buf.put_slice(&[h.session_present as u8, h.return_code]);
            Ok(())
        }
        (PacketType::Publish, VariableHeader::Publish(h), Payload::Publish(data)) => {
            encode_publish_header(packet.fixed.qos, h, buf)?;
            buf.extend_from_slice(data);
            Ok(())
        }
        (
            PacketType::PubAck
            | PacketType::PubRec
            | PacketType::PubRel
            | PacketType::PubComp
            | PacketType::UnsubAck,
            VariableHeader::PacketId { packet_id },
            Payload::Empty,
        ) => packet_id.encode(buf),
        (
            PacketType::Subscribe,
            VariableHeader::PacketId { packet_id },
            Payload::Subscribe(filters),
        ) => {
            packet_id.encode(buf)?;
            for (filter, opts) in filters.iter() {
                filter.encode(buf)?;
                buf.put_u8(u8::from(opts.qos));
            }
            Ok(())
        }
        (
            PacketType::SubAck,
            VariableHeader::PacketId { packet_id },
            Payload::SubscribeAck(codes),
        ) => {
            packet_id.encode(buf)?;
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
            PacketType::PingReq | PacketType::PingResp | PacketType::Disconnect,
            VariableHeader::Empty,
            Payload::Empty,
        ) => Ok(()),
        _ => Err(EncodeError::MalformedPacket),
    }
}

pub(crate) fn connect_header_size(h: &ConnectHeader) -> usize {
    2 + h.version.name().len() // protocol name
        + 1 // protocol level
        + 1 // connect flags
        + 2 // keep alive
}

pub(crate) fn connect_payload_size(h: &ConnectHeader, p: &ConnectPayload) -> usize {
    let mut size = p.client_id.encoded_size();
    if h.will {
        size += p.will_topic.as_ref().map_or(0, |t| t.encoded_size());
        size += p.will_message.as_ref().map_or(0, |m| m.encoded_size());
    }
    if h.has_username {
        size += p.username.as_ref().map_or(0, |u| u.encoded_size());
    }
    if h.has_password {
        size += p.password.as_ref().map_or(0, |pw| pw.encoded_size());
    }
    size
}

pub(crate) fn encode_connect_header(
    h: &ConnectHeader,
    buf: &mut BytesMut,
) -> Result<(), EncodeError> {
    let name = h.version.name();
    buf.put_u16(name.len() as u16);
    buf.put_slice(name.as_bytes());
    buf.put_u8(h.version.level());

    let mut flags = ConnectFlags::from_bits_truncate(u8::from(h.will_qos) << WILL_QOS_SHIFT);
    if h.has_username {
        flags |= ConnectFlags::USERNAME;
    }
    if h.has_password {
        flags |= ConnectFlags::PASSWORD;
    }
    if h.will_retain {
        flags |= ConnectFlags::WILL_RETAIN;
    }
    if h.will {
        flags |= ConnectFlags::WILL;
    }
    if h.clean_session {
        flags |= ConnectFlags::CLEAN_SESSION;
    }
    buf.put_u8(flags.bits());

    h.keep_alive.encode(buf)
}

pub(crate) fn encode_connect_payload(
    h: &ConnectHeader,
    p: &ConnectPayload,
    buf: &mut BytesMut,
) -> Result<(), EncodeError> {
    p.client_id.encode(buf)?;
    if h.will {
        p.will_topic.as_ref().ok_or(EncodeError::MalformedPacket)?.encode(buf)?;
        p.will_message.as_ref().ok_or(EncodeError::MalformedPacket)?.encode(buf)?;
    }
    if h.has_username {
        p.username.as_ref().ok_or(EncodeError::MalformedPacket)?.encode(buf)?;
    }
    if h.has_password {
        p.password.as_ref().ok_or(EncodeError::MalformedPacket)?.encode(buf)?;
    }
    Ok(())
}

pub(crate) fn encode_publish_header(
    qos: QoS,
    h: &PublishHeader,
    buf: &mut BytesMut,
) -> Result<(), EncodeError> {
    h.topic.encode(buf)?;
    if qos == QoS::AtMostOnce {
        if h.packet_id.is_some() {
            return Err(EncodeError::MalformedPacket); // packet id must not be set
        }
    } else {
        h.packet_id.ok_or(EncodeError::PacketIdRequired)?.encode(buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use super::*;

    fn variable_header(bytes: &'static [u8], first_byte: u8) -> Result<VariableHeader, DecodeError> {
        let fixed = FixedHeader::decode(first_byte, bytes.len() as u32).unwrap();
        let mut rdr = Reader::new(bytes);
        decode_variable_header(&fixed, &mut rdr)
    }

    #[test]
    fn test_decode_connect_header() {
        let header = variable_header(b"\x00\x04MQTT\x04\xC2\x00\x3C", 0x10).unwrap();
        assert_eq!(
            header,
            VariableHeader::Connect(ConnectHeader {
                version: ProtocolVersion::V3_1_1,
                has_username: true,
                has_password: true,
                will_retain: false,
                will_qos: QoS::AtMostOnce,
                will: false,
                clean_session: true,
                keep_alive: 60,
                properties: Default::default(),
            })
        );
    }

    #[test]
    fn test_decode_connect_header_errors() {
        assert_eq!(
            variable_header(b"\x00\x02MQ\x04\x02\x00\x3C", 0x10),
            Err(DecodeError::MalformedPacket)
        );
        assert_eq!(
            variable_header(b"\x00\x04MQAA\x04\x02\x00\x3C", 0x10),
            Err(DecodeError::MalformedPacket)
        );
        // reserved connect flag, v3.1.1
        assert_eq!(
            variable_header(b"\x00\x04MQTT\x04\x03\x00\x3C", 0x10),
            Err(DecodeError::ReservedFlagSet)
        );
        // same flag byte passes at protocol level 3
        assert!(variable_header(b"\x00\x06MQIsdp\x03\x03\x00\x3C", 0x10).is_ok());
    }

    #[test]
    fn test_decode_publish_header() {
        let header = variable_header(b"\x00\x05topic\x43\x21", 0x3d).unwrap();
        assert_eq!(
            header,
            VariableHeader::Publish(PublishHeader {
                topic: ByteString::from_static("topic"),
                packet_id: Some(NonZeroU16::new(0x4321).unwrap()),
                properties: Default::default(),
            })
        );

        // qos 0 carries no packet id
        let header = variable_header(b"\x00\x05topic", 0x30).unwrap();
        assert_eq!(
            header,
            VariableHeader::Publish(PublishHeader {
                topic: ByteString::from_static("topic"),
                packet_id: None,
                properties: Default::default(),
            })
        );
    }

    #[test]
    fn test_decode_publish_topic_errors() {
        assert_eq!(
            variable_header(b"\x00\x03a/+\x43\x21", 0x32),
            Err(DecodeError::InvalidTopic)
        );
        assert_eq!(
            variable_header(b"\x00\x03a/#\x43\x21", 0x32),
            Err(DecodeError::InvalidTopic)
        );
        assert_eq!(variable_header(b"\x00\x00\x43\x21", 0x32), Err(DecodeError::InvalidTopic));
    }

    #[test]
    fn test_decode_packet_id_header() {
        let header = variable_header(b"\x43\x21", 0x40).unwrap();
        assert_eq!(
            header,
            VariableHeader::PacketId { packet_id: NonZeroU16::new(0x4321).unwrap() }
        );
        assert_eq!(variable_header(b"\x00\x00", 0x40), Err(DecodeError::InvalidPacketId));
    }

    #[test]
    fn test_auth_rejected() {
        assert_eq!(variable_header(b"", 0xF0), Err(DecodeError::MalformedPacket));
    }

    #[test]
    fn test_decode_subscribe_payload() {
        let fixed = FixedHeader::decode(0x82, 14).unwrap();
        let variable = VariableHeader::PacketId { packet_id: NonZeroU16::new(10).unwrap() };
        let mut src = Bytes::from_static(b"\x00\x04test\x01\x00\x03y/#\x02");
        let payload = decode_payload(&fixed, &variable, &mut src).unwrap();
        assert_eq!(
            payload,
            Payload::Subscribe(vec![
                (ByteString::from_static("test"), SubscriptionOptions::from_qos(QoS::AtLeastOnce)),
                (ByteString::from_static("y/#"), SubscriptionOptions::from_qos(QoS::ExactlyOnce)),
            ])
        );
        assert!(!src.has_remaining());
    }

    #[test]
    fn test_subscribe_payload_reserved_bits() {
        let fixed = FixedHeader::decode(0x82, 8).unwrap();
        let variable = VariableHeader::PacketId { packet_id: NonZeroU16::new(10).unwrap() };
        let mut src = Bytes::from_static(b"\x00\x04test\x05");
        assert_eq!(
            decode_payload(&fixed, &variable, &mut src),
            Err(DecodeError::MalformedPacket)
        );
    }

    #[test]
    fn test_decode_connect_payload_with_will() {
        let header = ConnectHeader {
            version: ProtocolVersion::V3_1_1,
            has_username: false,
            has_password: false,
            will_retain: false,
            will_qos: QoS::ExactlyOnce,
            will: true,
            clean_session: false,
            keep_alive: 60,
            properties: Default::default(),
        };
        let mut src = Bytes::from_static(b"\x00\x0512345\x00\x05topic\x00\x07message");
        let payload = decode_connect_payload(&header, &mut src).unwrap();
        assert_eq!(
            payload,
            Payload::Connect(ConnectPayload {
                client_id: ByteString::from_static("12345"),
                will_topic: Some(ByteString::from_static("topic")),
                will_message: Some(Bytes::from_static(b"message")),
                username: None,
                password: None,
            })
        );
    }

    #[test]
    fn test_client_id_rejected_for_v3_1() {
        let header = ConnectHeader {
            version: ProtocolVersion::V3_1,
            has_username: false,
            has_password: false,
            will_retain: false,
            will_qos: QoS::AtMostOnce,
            will: false,
            clean_session: true,
            keep_alive: 0,
            properties: Default::default(),
        };
        // 24 characters is one over the v3.1 limit
        let mut body = vec![0u8, 24];
        body.extend_from_slice(&[b'a'; 24]);
        let mut src = Bytes::from(body);
        assert_eq!(
            decode_connect_payload(&header, &mut src),
            Err(DecodeError::InvalidClientId)
        );
    }

    #[test]
    fn test_suback_payload_keeps_failure_codes() {
        let fixed = FixedHeader::decode(0x90, 5).unwrap();
        let variable = VariableHeader::PacketId { packet_id: NonZeroU16::new(1).unwrap() };
        let mut src = Bytes::from_static(b"\x00\x80\x02");
        assert_eq!(
            decode_payload(&fixed, &variable, &mut src).unwrap(),
            Payload::SubscribeAck(vec![0x00, 0x80, 0x02])
        );
    }
}
