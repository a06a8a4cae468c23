use std::{io, str};

#[derive(Debug)]
pub enum DecodeError {
    /// Not enough bytes are buffered to finish the current decode phase.
    ///
    /// This is a suspension signal, not a failure: the decoder rewinds to
    /// the checkpoint of the phase it was in and retries once more bytes
    /// arrive. It is never surfaced through `Decoded::Invalid`.
    Truncated,
    /// Variable byte integer carries a continuation bit in its 4th byte.
    InvalidLength,
    /// Fixed header type code is 0 or unknown.
    UnsupportedPacketType,
    /// Reserved fixed header flag bits are set, or the CONNECT reserved
    /// flag is non-zero on v3.1.1.
    ReservedFlagSet,
    /// Wire QoS value 3.
    InvalidQoS,
    /// Packet identifier is zero.
    InvalidPacketId,
    /// PUBLISH topic name is empty or contains wildcard characters.
    InvalidTopic,
    /// Client identifier violates the connecting protocol version's rules.
    InvalidClientId,
    /// Remaining length exceeds the configured per-packet maximum.
    MaxSizeExceeded,
    /// Catch-all protocol violation: leftover payload bytes, unknown
    /// property identifier, property block overrun, packet type not
    /// supported by the negotiated dialect.
    MalformedPacket,
    Utf8Error(str::Utf8Error),
    IoError(io::Error),
}

#[derive(Debug)]
pub enum EncodeError {
    /// A length-prefixed field exceeds its width, or the packet exceeds the
    /// 268,435,455 byte remaining length ceiling.
    InvalidLength,
    /// Packet parts are inconsistent with each other or with the target
    /// protocol version.
    MalformedPacket,
    /// QoS 1/2 PUBLISH without a packet identifier.
    PacketIdRequired,
    /// Topic name is empty or contains wildcard characters.
    InvalidTopic,
    /// Client identifier violates the configured protocol version's rules.
    InvalidClientId,
    /// Packet type does not exist at the configured protocol version.
    UnsupportedVersion,
    IoError(io::Error),
}

impl PartialEq for DecodeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DecodeError::Truncated, DecodeError::Truncated) => true,
            (DecodeError::InvalidLength, DecodeError::InvalidLength) => true,
            (DecodeError::UnsupportedPacketType, DecodeError::UnsupportedPacketType) => true,
            (DecodeError::ReservedFlagSet, DecodeError::ReservedFlagSet) => true,
            (DecodeError::InvalidQoS, DecodeError::InvalidQoS) => true,
            (DecodeError::InvalidPacketId, DecodeError::InvalidPacketId) => true,
            (DecodeError::InvalidTopic, DecodeError::InvalidTopic) => true,
            (DecodeError::InvalidClientId, DecodeError::InvalidClientId) => true,
            (DecodeError::MaxSizeExceeded, DecodeError::MaxSizeExceeded) => true,
            (DecodeError::MalformedPacket, DecodeError::MalformedPacket) => true,
            (DecodeError::Utf8Error(a), DecodeError::Utf8Error(b)) => a == b,
            (DecodeError::IoError(_), _) => false,
            _ => false,
        }
    }
}

impl PartialEq for EncodeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EncodeError::InvalidLength, EncodeError::InvalidLength) => true,
            (EncodeError::MalformedPacket, EncodeError::MalformedPacket) => true,
            (EncodeError::PacketIdRequired, EncodeError::PacketIdRequired) => true,
            (EncodeError::InvalidTopic, EncodeError::InvalidTopic) => true,
            (EncodeError::InvalidClientId, EncodeError::InvalidClientId) => true,
            (EncodeError::UnsupportedVersion, EncodeError::UnsupportedVersion) => true,
            (EncodeError::IoError(_), _) => false,
            _ => false,
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        DecodeError::IoError(err)
    }
}

impl From<str::Utf8Error> for DecodeError {
    fn from(err: str::Utf8Error) -> Self {
        DecodeError::Utf8Error(err)
    }
}

impl From<io::Error> for EncodeError {
    fn from(err: io::Error) -> Self {
        EncodeError::IoError(err)
    }
}
