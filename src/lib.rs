//! MQTT v3.1.1 and v5 protocol codec.
//!
//! The crate turns a byte stream on a reliable, ordered transport into
//! typed MQTT control packets and encodes packets back into bytes. Both
//! protocol generations run on the same decoder pipeline; the
//! version-dependent variable header and payload encodings are selected
//! once per connection when the [`Codec`] is created.
//!
//! ```rust
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use mqtt_codec::{Codec, Decoded, Packet, ProtocolVersion};
//!
//! let mut codec = Codec::new(ProtocolVersion::V3_1_1);
//! let packet = Packet::connect(ProtocolVersion::V3_1_1)
//!     .client_id("device-1")
//!     .clean_session(true)
//!     .keep_alive(30)
//!     .build()
//!     .unwrap();
//!
//! let mut buf = BytesMut::new();
//! codec.encode(packet.clone(), &mut buf).unwrap();
//! assert_eq!(codec.decode(&mut buf).unwrap(), Some(Decoded::Packet(packet)));
//! ```
//!
//! Transport I/O, session state, subscription matching and keep-alive
//! timing are left to the connection owner.

#[macro_use]
mod utils;

mod builder;
mod codec;
mod error;
mod packet;
mod property;
mod types;
mod v3;
mod v5;

pub use self::builder::{
    AuthBuilder, ConnAckBuilder, ConnectBuilder, DisconnectBuilder, PubReplyBuilder,
    PublishBuilder, SubAckBuilder, SubscribeBuilder, UnsubAckBuilder, UnsubscribeBuilder,
};
pub use self::codec::{Codec, Decoded, DEFAULT_MAX_SIZE};
pub use self::error::{DecodeError, EncodeError};
pub use self::packet::{
    ConnAckHeader, ConnectHeader, ConnectPayload, Packet, Payload, PublishHeader,
    RetainHandling, SubscriptionOptions, VariableHeader,
};
pub use self::property::{property_type, Properties, Property};
pub use self::types::{FixedHeader, PacketType, ProtocolVersion, QoS, MAX_PACKET_SIZE};
