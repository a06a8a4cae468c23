use std::{cmp::min, fmt, mem};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, EncodeError};
use crate::packet::{Packet, Payload, VariableHeader};
use crate::types::{FixedHeader, ProtocolVersion, QoS, MAX_PACKET_SIZE};
use crate::utils::{self, Reader};
use crate::v3::V3Dialect;
use crate::v5::V5Dialect;

/// Default upper bound on a packet's remaining length.
pub const DEFAULT_MAX_SIZE: u32 = 8092;

/// Protocol-version-dependent half of the codec: the variable header and
/// payload encodings that differ between v3.1/3.1.1 and v5. One
/// implementation is picked at codec construction and invoked through the
/// trait for every packet.
pub(crate) trait Dialect: Sync {
    fn decode_variable_header(
        &self,
        fixed: &FixedHeader,
        rdr: &mut Reader<'_>,
    ) -> Result<VariableHeader, DecodeError>;

    fn decode_payload(
        &self,
        fixed: &FixedHeader,
        variable: &VariableHeader,
        src: &mut Bytes,
    ) -> Result<Payload, DecodeError>;

    fn encoded_size(&self, packet: &Packet) -> usize;

    fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError>;
}

pub(crate) fn dialect(version: ProtocolVersion) -> &'static dyn Dialect {
    if version.is_v5() {
        &V5Dialect
    } else {
        &V3Dialect
    }
}

/// Decoder output.
///
/// A fatal decode error is reported as an `Invalid` item rather than an
/// `Err`: the connection owner receives exactly one such item, after which
/// the codec discards all further input, and decides whether to close.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Packet(Packet),
    Invalid(DecodeError),
}

enum DecodeState {
    FixedHeader,
    VariableHeader(FixedHeader),
    Payload { fixed: FixedHeader, variable: VariableHeader, remaining: u32 },
    /// Framing is lost; drain everything until the transport owner closes
    /// the connection.
    Discard,
}

/// MQTT protocol codec.
///
/// One instance owns the decode state of one connection and must not be
/// shared between tasks; independent connections run independent codecs.
/// Decoding progresses through fixed header, variable header and payload
/// phases, suspending with `Ok(None)` whenever the buffered input is too
/// short to finish the current phase. Bytes are only consumed once a phase
/// parses completely, so a resumed call re-reads the phase from its
/// checkpoint and yields identical packets no matter how the inbound
/// stream was fragmented.
pub struct Codec {
    dialect: &'static dyn Dialect,
    version: ProtocolVersion,
    max_size: u32,
    state: DecodeState,
}

impl Codec {
    /// Create `Codec` instance for a protocol version with the default
    /// inbound size bound.
    pub fn new(version: ProtocolVersion) -> Codec {
        Codec::with_max_size(version, DEFAULT_MAX_SIZE)
    }

    /// Create `Codec` instance with a custom bound on the remaining length
    /// of inbound packets. The bound is fixed for the codec's lifetime.
    pub fn with_max_size(version: ProtocolVersion, max_size: u32) -> Codec {
        Codec {
            dialect: dialect(version),
            version,
            max_size,
            state: DecodeState::FixedHeader,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    fn invalid(&mut self, src: &mut BytesMut, cause: DecodeError) -> Decoded {
        log::debug!("dropping the stream after decode failure: {:?}", cause);
        self.state = DecodeState::Discard;
        src.clear();
        Decoded::Invalid(cause)
    }
}

impl Decoder for Codec {
    type Item = Decoded;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>, DecodeError> {
        loop {
            match mem::replace(&mut self.state, DecodeState::FixedHeader) {
                DecodeState::FixedHeader => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let first_byte = src[0];
                    match utils::decode_variable_length(&src[1..]) {
                        Ok(Some((remaining_length, consumed))) => {
                            let fixed = match FixedHeader::decode(first_byte, remaining_length) {
                                Ok(fixed) => fixed,
                                Err(e) => return Ok(Some(self.invalid(src, e))),
                            };
                            if remaining_length > self.max_size {
                                log::debug!(
                                    "MaxSizeExceeded max-size: {}, remaining: {}",
                                    self.max_size,
                                    remaining_length
                                );
                                return Ok(Some(
                                    self.invalid(src, DecodeError::MaxSizeExceeded),
                                ));
                            }
                            src.advance(consumed + 1);
                            self.state = DecodeState::VariableHeader(fixed);
                        }
                        Ok(None) => return Ok(None),
                        Err(e) => return Ok(Some(self.invalid(src, e))),
                    }
                }
                DecodeState::VariableHeader(fixed) => {
                    // the variable header must stay inside the frame
                    let limit = min(src.len(), fixed.remaining_length as usize);
                    let mut rdr = Reader::new(&src[..limit]);
                    match self.dialect.decode_variable_header(&fixed, &mut rdr) {
                        Ok(variable) => {
                            let consumed = rdr.position() as u32;
                            src.advance(consumed as usize);
                            self.state = DecodeState::Payload {
                                fixed,
                                variable,
                                remaining: fixed.remaining_length - consumed,
                            };
                        }
                        Err(DecodeError::Truncated) => {
                            if src.len() >= fixed.remaining_length as usize {
                                // the whole frame is here, yet the header
                                // wants more: it overran the frame
                                return Ok(Some(
                                    self.invalid(src, DecodeError::MalformedPacket),
                                ));
                            }
                            self.state = DecodeState::VariableHeader(fixed);
                            src.reserve(fixed.remaining_length as usize - src.len());
                            return Ok(None);
                        }
                        Err(e) => return Ok(Some(self.invalid(src, e))),
                    }
                }
                DecodeState::Payload { fixed, variable, remaining } => {
                    if src.len() < remaining as usize {
                        src.reserve(remaining as usize - src.len());
                        self.state = DecodeState::Payload { fixed, variable, remaining };
                        return Ok(None);
                    }
                    let mut buf = src.split_to(remaining as usize).freeze();
                    match self.dialect.decode_payload(&fixed, &variable, &mut buf) {
                        Ok(payload) => {
                            if buf.has_remaining() {
                                log::trace!(
                                    "{} leftover payload bytes ({:?})",
                                    buf.remaining(),
                                    fixed.packet_type
                                );
                                return Ok(Some(
                                    self.invalid(src, DecodeError::MalformedPacket),
                                ));
                            }
                            src.reserve(2);
                            return Ok(Some(Decoded::Packet(Packet {
                                fixed,
                                variable,
                                payload,
                            })));
                        }
                        Err(e) => return Ok(Some(self.invalid(src, e))),
                    }
                }
                DecodeState::Discard => {
                    self.state = DecodeState::Discard;
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<Packet> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if let VariableHeader::Publish(ref header) = item.variable {
            if item.fixed.qos != QoS::AtMostOnce && header.packet_id.is_none() {
                return Err(EncodeError::PacketIdRequired);
            }
        }

        let content_size = self.dialect.encoded_size(&item);
        if content_size > MAX_PACKET_SIZE as usize {
            return Err(EncodeError::InvalidLength);
        }
        dst.reserve(content_size + 5);
        dst.put_u8(item.fixed.first_byte());
        utils::write_variable_length(content_size as u32, dst);
        self.dialect.encode(&item, dst)
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("version", &self.version)
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use bytestring::ByteString;

    use super::*;
    use crate::packet::{ConnectHeader, ConnectPayload, PublishHeader, SubscriptionOptions};
    use crate::property::{property_type as pt, Properties, Property};
    use crate::types::PacketType;

    fn packet_id(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    fn decode_all(codec: &mut Codec, bytes: &[u8]) -> Vec<Decoded> {
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(decoded) = codec.decode(&mut buf).unwrap() {
            out.push(decoded);
        }
        out
    }

    fn assert_decode(version: ProtocolVersion, bytes: &[u8], expected: Decoded) {
        let mut codec = Codec::new(version);
        let decoded = decode_all(&mut codec, bytes);
        assert_eq!(decoded, vec![expected]);
    }

    #[test]
    fn test_connect_v3() {
        // CONNECT, clean session, keep alive 60s, client id "test"
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x10\x10\x00\x04MQTT\x04\x02\x00\x3C\x00\x04test",
            Decoded::Packet(Packet {
                fixed: FixedHeader::new(PacketType::Connect, 16),
                variable: VariableHeader::Connect(ConnectHeader {
                    version: ProtocolVersion::V3_1_1,
                    has_username: false,
                    has_password: false,
                    will_retain: false,
                    will_qos: QoS::AtMostOnce,
                    will: false,
                    clean_session: true,
                    keep_alive: 60,
                    properties: Properties::new(),
                }),
                payload: Payload::Connect(ConnectPayload {
                    client_id: ByteString::from_static("test"),
                    will_topic: None,
                    will_message: None,
                    username: None,
                    password: None,
                }),
            }),
        );
    }

    #[test]
    fn test_publish_qos0_v3() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x30\x06\x00\x03a/b\xFF",
            Decoded::Packet(Packet {
                fixed: FixedHeader::new(PacketType::Publish, 6),
                variable: VariableHeader::Publish(PublishHeader {
                    topic: ByteString::from_static("a/b"),
                    packet_id: None,
                    properties: Properties::new(),
                }),
                payload: Payload::Publish(Bytes::from_static(b"\xFF")),
            }),
        );
    }

    #[test]
    fn test_subscribe_v3() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x82\x0C\x00\x0A\x00\x01x\x01\x00\x03y/#\x02",
            Decoded::Packet(Packet {
                fixed: FixedHeader::new(PacketType::Subscribe, 12),
                variable: VariableHeader::PacketId { packet_id: packet_id(10) },
                payload: Payload::Subscribe(vec![
                    (
                        ByteString::from_static("x"),
                        SubscriptionOptions::from_qos(QoS::AtLeastOnce),
                    ),
                    (
                        ByteString::from_static("y/#"),
                        SubscriptionOptions::from_qos(QoS::ExactlyOnce),
                    ),
                ]),
            }),
        );
    }

    #[test]
    fn test_disconnect_v5() {
        assert_decode(
            ProtocolVersion::V5,
            b"\xE0\x02\x00\x00",
            Decoded::Packet(Packet {
                fixed: FixedHeader::new(PacketType::Disconnect, 2),
                variable: VariableHeader::ReasonProperties {
                    reason_code: 0,
                    properties: Properties::new(),
                },
                payload: Payload::Empty,
            }),
        );
    }

    #[test]
    fn test_publish_qos1_v5_with_topic_alias() {
        let mut properties = Properties::new();
        properties.add(Property::Integer(pt::TOPIC_ALIAS, 5));
        let mut fixed = FixedHeader::new(PacketType::Publish, 10);
        fixed.qos = QoS::AtLeastOnce;
        assert_decode(
            ProtocolVersion::V5,
            b"\x32\x0A\x00\x01t\x00\x01\x03\x23\x00\x05\xAA",
            Decoded::Packet(Packet {
                fixed,
                variable: VariableHeader::Publish(PublishHeader {
                    topic: ByteString::from_static("t"),
                    packet_id: Some(packet_id(1)),
                    properties,
                }),
                payload: Payload::Publish(Bytes::from_static(b"\xAA")),
            }),
        );
    }

    #[test]
    fn test_connect_reserved_flag_v3() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x10\x0E\x00\x04MQTT\x04\x03\x00\x3C\x00\x02id",
            Decoded::Invalid(DecodeError::ReservedFlagSet),
        );
    }

    #[test]
    fn test_ping_packets() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\xC0\x00",
            Decoded::Packet(Packet::ping_request()),
        );
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\xD0\x00",
            Decoded::Packet(Packet::ping_response()),
        );
    }

    #[test]
    fn test_unknown_packet_type() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x00\x00",
            Decoded::Invalid(DecodeError::UnsupportedPacketType),
        );
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x30\x06\x00\x03a/+\xFF",
            Decoded::Invalid(DecodeError::InvalidTopic),
        );
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x30\x06\x00\x03a/#\xFF",
            Decoded::Invalid(DecodeError::InvalidTopic),
        );
    }

    #[test]
    fn test_zero_packet_id_rejected() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x40\x02\x00\x00",
            Decoded::Invalid(DecodeError::InvalidPacketId),
        );
    }

    #[test]
    fn test_qos3_publish_rejected() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x36\x06\x00\x03a/b\xFF",
            Decoded::Invalid(DecodeError::InvalidQoS),
        );
    }

    #[test]
    fn test_max_size() {
        let mut codec = Codec::with_max_size(ProtocolVersion::V3_1_1, 5);
        let mut buf = BytesMut::from(&b"\x10\x09"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Decoded::Invalid(DecodeError::MaxSizeExceeded))
        );
    }

    #[test]
    fn test_leftover_payload_bytes() {
        // PINGREQ with a one byte body
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\xC0\x01\x00",
            Decoded::Invalid(DecodeError::MalformedPacket),
        );
    }

    #[test]
    fn test_header_overruns_frame() {
        // PUBLISH remaining length 3 but the topic alone needs 5 bytes
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x30\x03\x00\x03a/b",
            Decoded::Invalid(DecodeError::MalformedPacket),
        );
    }

    #[test]
    fn test_malformed_variable_length() {
        assert_decode(
            ProtocolVersion::V3_1_1,
            b"\x30\xFF\xFF\xFF\xFF\xFF",
            Decoded::Invalid(DecodeError::InvalidLength),
        );
    }

    #[test]
    fn test_discard_after_error() {
        let mut codec = Codec::new(ProtocolVersion::V3_1_1);
        let mut buf = BytesMut::from(&b"\x00\x00\xC0\x00"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Decoded::Invalid(DecodeError::UnsupportedPacketType))
        );
        // everything after the failure is dropped, including future bytes
        assert!(buf.is_empty());
        buf.extend_from_slice(b"\xC0\x00");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fragmented_input() {
        let bytes: &[u8] = b"\x32\x0A\x00\x01t\x00\x01\x03\x23\x00\x05\xAA\xC0\x00";
        let whole = {
            let mut codec = Codec::new(ProtocolVersion::V5);
            decode_all(&mut codec, bytes)
        };
        assert_eq!(whole.len(), 2);

        // splitting the stream at any byte yields the identical sequence
        for split in 0..bytes.len() {
            let mut codec = Codec::new(ProtocolVersion::V5);
            let mut buf = BytesMut::from(&bytes[..split]);
            let mut out = Vec::new();
            while let Some(decoded) = codec.decode(&mut buf).unwrap() {
                out.push(decoded);
            }
            buf.extend_from_slice(&bytes[split..]);
            while let Some(decoded) = codec.decode(&mut buf).unwrap() {
                out.push(decoded);
            }
            assert_eq!(out, whole, "split at {}", split);
        }
    }

    #[test]
    fn test_publish_payload_shares_buffer() {
        let mut codec = Codec::new(ProtocolVersion::V3_1_1);
        let mut buf = BytesMut::from(&b"\x30\x06\x00\x03a/b\xFF"[..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            Decoded::Packet(Packet { payload: Payload::Publish(data), .. }) => {
                assert_eq!(data.as_ref(), b"\xFF");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_encode_decode_publish() {
        let mut codec = Codec::new(ProtocolVersion::V3_1_1);
        let mut fixed = FixedHeader::new(PacketType::Publish, 0);
        fixed.qos = QoS::AtLeastOnce;
        let pkt = Packet {
            fixed,
            variable: VariableHeader::Publish(PublishHeader {
                topic: ByteString::from_static("/test"),
                packet_id: Some(packet_id(7)),
                properties: Properties::new(),
            }),
            payload: Payload::Publish(Bytes::from(vec![0xAB; 1024])),
        };

        let mut buf = BytesMut::new();
        codec.encode(pkt.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            Decoded::Packet(decoded) => {
                assert_eq!(decoded.variable, pkt.variable);
                assert_eq!(decoded.payload, pkt.payload);
                assert_eq!(decoded.fixed.remaining_length, 1033);
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_encode_publish_requires_packet_id() {
        let mut codec = Codec::new(ProtocolVersion::V3_1_1);
        let mut fixed = FixedHeader::new(PacketType::Publish, 0);
        fixed.qos = QoS::AtLeastOnce;
        let pkt = Packet {
            fixed,
            variable: VariableHeader::Publish(PublishHeader {
                topic: ByteString::from_static("t"),
                packet_id: None,
                properties: Properties::new(),
            }),
            payload: Payload::Publish(Bytes::new()),
        };
        let mut buf = BytesMut::new();
        assert_eq!(codec.encode(pkt, &mut buf), Err(EncodeError::PacketIdRequired));
    }
}
