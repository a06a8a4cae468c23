//! MQTT 5 property block codec.
//!
//! A property block is a variable-byte-integer length followed by
//! tag-dispatched (id, value) pairs. The wire shape of every value is
//! keyed by the property id; unknown ids are a protocol violation since
//! their length cannot be known.

use bytes::{BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::error::{DecodeError, EncodeError};
use crate::utils::{self, Reader};

pub mod property_type {
    pub const UTF8_PAYLOAD: u8 = 0x01;
    pub const MSG_EXPIRY_INT: u8 = 0x02;
    pub const CONTENT_TYPE: u8 = 0x03;
    pub const RESP_TOPIC: u8 = 0x08;
    pub const CORR_DATA: u8 = 0x09;
    pub const SUB_ID: u8 = 0x0B;
    pub const SESS_EXPIRY_INT: u8 = 0x11;
    pub const ASSND_CLIENT_ID: u8 = 0x12;
    pub const SERVER_KA: u8 = 0x13;
    pub const AUTH_METHOD: u8 = 0x15;
    pub const AUTH_DATA: u8 = 0x16;
    pub const REQ_PROB_INFO: u8 = 0x17;
    pub const WILL_DELAY_INT: u8 = 0x18;
    pub const REQ_RESP_INFO: u8 = 0x19;
    pub const RESP_INFO: u8 = 0x1A;
    pub const SERVER_REF: u8 = 0x1C;
    pub const REASON_STRING: u8 = 0x1F;
    pub const RECEIVE_MAX: u8 = 0x21;
    pub const TOPIC_ALIAS_MAX: u8 = 0x22;
    pub const TOPIC_ALIAS: u8 = 0x23;
    pub const MAX_QOS: u8 = 0x24;
    pub const RETAIN_AVAIL: u8 = 0x25;
    pub const USER: u8 = 0x26;
    pub const MAX_PACKET_SIZE: u8 = 0x27;
    pub const WILDCARD_SUB_AVAIL: u8 = 0x28;
    pub const SUB_IDS_AVAIL: u8 = 0x29;
    pub const SHARED_SUB_AVAIL: u8 = 0x2A;
}

use self::property_type as pt;

/// A single property, tagged with its wire id.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Property {
    Integer(u8, u32),
    String(u8, ByteString),
    Binary(u8, Bytes),
}

impl Property {
    pub fn id(&self) -> u8 {
        match *self {
            Property::Integer(id, _) => id,
            Property::String(id, _) => id,
            Property::Binary(id, _) => id,
        }
    }
}

/// Ordered multi-bag of properties.
///
/// `add` is the producer entry point and keeps at most one entry per id
/// (User Property excepted, which is repeatable). The decoder appends with
/// `push` instead and surfaces whatever the peer sent, duplicates
/// included, in wire order.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Properties {
        Properties(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Append, keeping duplicates.
    pub fn push(&mut self, prop: Property) {
        self.0.push(prop);
    }

    /// Insert, replacing any previous entry with the same id unless the id
    /// is User Property (0x26).
    pub fn add(&mut self, prop: Property) {
        if prop.id() != pt::USER {
            if let Some(slot) = self.0.iter_mut().find(|p| p.id() == prop.id()) {
                *slot = prop;
                return;
            }
        }
        self.0.push(prop);
    }

    /// First entry with the given id.
    pub fn get(&self, id: u8) -> Option<&Property> {
        self.0.iter().find(|p| p.id() == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub(crate) fn read_properties(rdr: &mut Reader<'_>) -> Result<Properties, DecodeError> {
    let block_len = rdr.read_variable_length()? as usize;
    let block_end = rdr.position() + block_len;

    let mut props = Properties::new();
    while rdr.position() < block_end {
        let id = rdr.read_variable_length()?;
        let id = u8::try_from(id).map_err(|_| DecodeError::MalformedPacket)?;
        props.push(read_value(rdr, id)?);
    }
    ensure!(rdr.position() == block_end, DecodeError::MalformedPacket);

    Ok(props)
}

fn read_value(rdr: &mut Reader<'_>, id: u8) -> Result<Property, DecodeError> {
    match id {
        pt::UTF8_PAYLOAD
        | pt::REQ_PROB_INFO
        | pt::REQ_RESP_INFO
        | pt::MAX_QOS
        | pt::RETAIN_AVAIL
        | pt::WILDCARD_SUB_AVAIL
        | pt::SUB_IDS_AVAIL
        | pt::SHARED_SUB_AVAIL => Ok(Property::Integer(id, rdr.read_u8()? as u32)),
        pt::SERVER_KA | pt::RECEIVE_MAX | pt::TOPIC_ALIAS_MAX | pt::TOPIC_ALIAS => {
            Ok(Property::Integer(id, rdr.read_u16()? as u32))
        }
        pt::MSG_EXPIRY_INT | pt::SESS_EXPIRY_INT | pt::WILL_DELAY_INT | pt::MAX_PACKET_SIZE => {
            Ok(Property::Integer(id, rdr.read_u32()?))
        }
        pt::SUB_ID => Ok(Property::Integer(id, rdr.read_variable_length()?)),
        pt::CONTENT_TYPE
        | pt::RESP_TOPIC
        | pt::ASSND_CLIENT_ID
        | pt::AUTH_METHOD
        | pt::RESP_INFO
        | pt::SERVER_REF
        | pt::REASON_STRING
        | pt::USER => Ok(Property::String(id, rdr.read_string()?)),
        pt::CORR_DATA | pt::AUTH_DATA => Ok(Property::Binary(id, rdr.read_bytes()?)),
        _ => Err(DecodeError::MalformedPacket),
    }
}

impl Properties {
    /// Serialized size of the entries, excluding the block length prefix.
    pub(crate) fn encoded_size(&self) -> usize {
        self.0.iter().map(|p| 1 + value_size(p)).sum()
    }

    /// Size of the whole block: length prefix plus entries.
    pub(crate) fn block_size(&self) -> usize {
        let len = self.encoded_size();
        utils::var_int_len(len as u32) as usize + len
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        utils::write_variable_length(self.encoded_size() as u32, buf);
        for prop in self.0.iter() {
            buf.put_u8(prop.id());
            encode_value(prop, buf)?;
        }
        Ok(())
    }
}

fn value_size(prop: &Property) -> usize {
    match *prop {
        Property::Integer(id, value) => match id {
            pt::UTF8_PAYLOAD
            | pt::REQ_PROB_INFO
            | pt::REQ_RESP_INFO
            | pt::MAX_QOS
            | pt::RETAIN_AVAIL
            | pt::WILDCARD_SUB_AVAIL
            | pt::SUB_IDS_AVAIL
            | pt::SHARED_SUB_AVAIL => 1,
            pt::SERVER_KA | pt::RECEIVE_MAX | pt::TOPIC_ALIAS_MAX | pt::TOPIC_ALIAS => 2,
            pt::MSG_EXPIRY_INT | pt::SESS_EXPIRY_INT | pt::WILL_DELAY_INT
            | pt::MAX_PACKET_SIZE => 4,
            pt::SUB_ID => utils::var_int_len(value) as usize,
            _ => 0,
        },
        Property::String(_, ref s) => 2 + s.len(),
        Property::Binary(_, ref b) => 2 + b.len(),
    }
}

fn encode_value(prop: &Property, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match *prop {
        Property::Integer(id, value) => match id {
            pt::UTF8_PAYLOAD
            | pt::REQ_PROB_INFO
            | pt::REQ_RESP_INFO
            | pt::MAX_QOS
            | pt::RETAIN_AVAIL
            | pt::WILDCARD_SUB_AVAIL
            | pt::SUB_IDS_AVAIL
            | pt::SHARED_SUB_AVAIL => {
                let value = u8::try_from(value).map_err(|_| EncodeError::InvalidLength)?;
                buf.put_u8(value);
                Ok(())
            }
            pt::SERVER_KA | pt::RECEIVE_MAX | pt::TOPIC_ALIAS_MAX | pt::TOPIC_ALIAS => {
                let value = u16::try_from(value).map_err(|_| EncodeError::InvalidLength)?;
                buf.put_u16(value);
                Ok(())
            }
            pt::MSG_EXPIRY_INT | pt::SESS_EXPIRY_INT | pt::WILL_DELAY_INT
            | pt::MAX_PACKET_SIZE => {
                buf.put_u32(value);
                Ok(())
            }
            pt::SUB_ID => {
                utils::write_variable_length(value, buf);
                Ok(())
            }
            _ => Err(EncodeError::MalformedPacket),
        },
        Property::String(id, ref s) => match id {
            pt::CONTENT_TYPE
            | pt::RESP_TOPIC
            | pt::ASSND_CLIENT_ID
            | pt::AUTH_METHOD
            | pt::RESP_INFO
            | pt::SERVER_REF
            | pt::REASON_STRING
            | pt::USER => {
                let len = u16::try_from(s.len()).map_err(|_| EncodeError::InvalidLength)?;
                buf.put_u16(len);
                buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(EncodeError::MalformedPacket),
        },
        Property::Binary(id, ref b) => match id {
            pt::CORR_DATA | pt::AUTH_DATA => {
                let len = u16::try_from(b.len()).map_err(|_| EncodeError::InvalidLength)?;
                buf.put_u16(len);
                buf.extend_from_slice(b.as_ref());
                Ok(())
            }
            _ => Err(EncodeError::MalformedPacket),
        },
    }
}
