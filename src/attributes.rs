//! Additions to the `stun-codec` crate for connectivity checks.
//!
//! `stun_codec` ships the RFC 5389 core but knows nothing about the ICE
//! attributes from RFC 5245 nor about Google's extensions to them. Both are
//! defined here, together with the crate-wide [`Attribute`] enum that our
//! messages are decoded into.

use bytecodec::bytes::{BytesEncoder, CopyableBytesDecoder, RemainingBytesDecoder};
use bytecodec::fixnum::{U32beDecoder, U32beEncoder, U64beDecoder, U64beEncoder};
use bytecodec::null::{NullDecoder, NullEncoder};
use bytecodec::{
    ByteCount, Decode, DecodeExt, Encode, EncodeExt, Eos, Result, SizedEncode, TryTaggedDecode,
};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use stun_codec::rfc5389::attributes::{
    ErrorCode, Fingerprint, MessageIntegrity, Software, Username, XorMappedAddress,
};
use stun_codec::{
    define_attribute_enums, AttributeType, DecodedMessage, Message, MessageDecoder,
    MessageEncoder, Method, TransactionId,
};

/// STUN method of the compact connectivity check sent in place of a full
/// Binding Request once the peer has advertised support for it.
pub fn goog_ping() -> Method {
    Method::new(0x080).expect("0x080 is a valid method codepoint")
}

/// Version of the compact-ping protocol we speak.
pub const GOOG_PING_VERSION: u16 = 1;

pub fn decode(packet: &[u8]) -> bytecodec::Result<DecodedMessage<Attribute>> {
    MessageDecoder::<Attribute>::default().decode_from_bytes(packet)
}

pub fn encode(message: Message<Attribute>) -> Vec<u8> {
    MessageEncoder::default()
        .encode_into_bytes(message)
        .expect("encoding always works")
}

/// `ROLE-CONFLICT` error from RFC 5245.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleConflict;

impl RoleConflict {
    /// The codepoint of the error.
    pub const CODEPOINT: u16 = 487;
}

impl From<RoleConflict> for ErrorCode {
    fn from(_: RoleConflict) -> Self {
        ErrorCode::new(RoleConflict::CODEPOINT, "Role Conflict".to_owned()).expect("never fails")
    }
}

/// `PRIORITY` attribute (RFC 5245): the peer-reflexive priority the sender
/// would assign to a candidate learned from this check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Priority(u32);

impl Priority {
    pub const CODEPOINT: u16 = 0x0024;

    pub fn new(priority: u32) -> Self {
        Priority(priority)
    }

    pub fn priority(self) -> u32 {
        self.0
    }
}

impl stun_codec::Attribute for Priority {
    type Decoder = PriorityDecoder;
    type Encoder = PriorityEncoder;

    fn get_type(&self) -> AttributeType {
        AttributeType::new(Self::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct PriorityDecoder(U32beDecoder);

impl Decode for PriorityDecoder {
    type Item = Priority;

    fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
        self.0.decode(buf, eos)
    }

    fn finish_decoding(&mut self) -> Result<Self::Item> {
        Ok(Priority(self.0.finish_decoding()?))
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl TryTaggedDecode for PriorityDecoder {
    type Tag = AttributeType;

    fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
        Ok(attr_type.as_u16() == Priority::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct PriorityEncoder(U32beEncoder);

impl Encode for PriorityEncoder {
    type Item = Priority;

    fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
        self.0.encode(buf, eos)
    }

    fn start_encoding(&mut self, item: Self::Item) -> Result<()> {
        self.0.start_encoding(item.0)
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl SizedEncode for PriorityEncoder {
    fn exact_requiring_bytes(&self) -> u64 {
        self.0.exact_requiring_bytes()
    }
}

/// `USE-CANDIDATE` attribute (RFC 5245): flag carried by the controlling
/// agent to nominate this pair. Zero-length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseCandidate;

impl UseCandidate {
    pub const CODEPOINT: u16 = 0x0025;

    pub fn new() -> Self {
        UseCandidate
    }
}

impl Default for UseCandidate {
    fn default() -> Self {
        Self::new()
    }
}

impl stun_codec::Attribute for UseCandidate {
    type Decoder = UseCandidateDecoder;
    type Encoder = UseCandidateEncoder;

    fn get_type(&self) -> AttributeType {
        AttributeType::new(Self::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct UseCandidateDecoder(NullDecoder);

impl Decode for UseCandidateDecoder {
    type Item = UseCandidate;

    fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
        self.0.decode(buf, eos)
    }

    fn finish_decoding(&mut self) -> Result<Self::Item> {
        self.0.finish_decoding()?;
        Ok(UseCandidate)
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl TryTaggedDecode for UseCandidateDecoder {
    type Tag = AttributeType;

    fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
        Ok(attr_type.as_u16() == UseCandidate::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct UseCandidateEncoder(NullEncoder);

impl Encode for UseCandidateEncoder {
    type Item = UseCandidate;

    fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
        self.0.encode(buf, eos)
    }

    fn start_encoding(&mut self, _item: Self::Item) -> Result<()> {
        self.0.start_encoding(())
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl SizedEncode for UseCandidateEncoder {
    fn exact_requiring_bytes(&self) -> u64 {
        self.0.exact_requiring_bytes()
    }
}

macro_rules! u64_attribute {
    ($(#[$doc:meta])* $name:ident, $decoder:ident, $encoder:ident, $codepoint:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub const CODEPOINT: u16 = $codepoint;

            pub fn new(value: u64) -> Self {
                $name(value)
            }

            pub fn value(self) -> u64 {
                self.0
            }
        }

        impl stun_codec::Attribute for $name {
            type Decoder = $decoder;
            type Encoder = $encoder;

            fn get_type(&self) -> AttributeType {
                AttributeType::new(Self::CODEPOINT)
            }
        }

        #[derive(Debug, Default)]
        pub struct $decoder(U64beDecoder);

        impl Decode for $decoder {
            type Item = $name;

            fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
                self.0.decode(buf, eos)
            }

            fn finish_decoding(&mut self) -> Result<Self::Item> {
                Ok($name(self.0.finish_decoding()?))
            }

            fn requiring_bytes(&self) -> ByteCount {
                self.0.requiring_bytes()
            }

            fn is_idle(&self) -> bool {
                self.0.is_idle()
            }
        }

        impl TryTaggedDecode for $decoder {
            type Tag = AttributeType;

            fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
                Ok(attr_type.as_u16() == $name::CODEPOINT)
            }
        }

        #[derive(Debug, Default)]
        pub struct $encoder(U64beEncoder);

        impl Encode for $encoder {
            type Item = $name;

            fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
                self.0.encode(buf, eos)
            }

            fn start_encoding(&mut self, item: Self::Item) -> Result<()> {
                self.0.start_encoding(item.0)
            }

            fn requiring_bytes(&self) -> ByteCount {
                self.0.requiring_bytes()
            }

            fn is_idle(&self) -> bool {
                self.0.is_idle()
            }
        }

        impl SizedEncode for $encoder {
            fn exact_requiring_bytes(&self) -> u64 {
                self.0.exact_requiring_bytes()
            }
        }
    };
}

u64_attribute!(
    /// `ICE-CONTROLLED` attribute (RFC 5245): the controlled agent's
    /// tie-breaker.
    IceControlled,
    IceControlledDecoder,
    IceControlledEncoder,
    0x8029
);

u64_attribute!(
    /// `ICE-CONTROLLING` attribute (RFC 5245): the controlling agent's
    /// tie-breaker.
    IceControlling,
    IceControllingDecoder,
    IceControllingEncoder,
    0x802A
);

u64_attribute!(
    /// `GOOG-DELTA-ACK` attribute: acknowledges a previously received
    /// `GOOG-DELTA` dictionary update.
    GoogDeltaAck,
    GoogDeltaAckDecoder,
    GoogDeltaAckEncoder,
    0xC05D
);

/// `NOMINATION` attribute from the ICE re-nomination draft: a monotonically
/// increasing nomination value, replacing the boolean `USE-CANDIDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nomination(u32);

impl Nomination {
    pub const CODEPOINT: u16 = 0xC001;

    pub fn new(value: u32) -> Self {
        Nomination(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl stun_codec::Attribute for Nomination {
    type Decoder = NominationDecoder;
    type Encoder = NominationEncoder;

    fn get_type(&self) -> AttributeType {
        AttributeType::new(Self::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct NominationDecoder(U32beDecoder);

impl Decode for NominationDecoder {
    type Item = Nomination;

    fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
        self.0.decode(buf, eos)
    }

    fn finish_decoding(&mut self) -> Result<Self::Item> {
        Ok(Nomination(self.0.finish_decoding()?))
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl TryTaggedDecode for NominationDecoder {
    type Tag = AttributeType;

    fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
        Ok(attr_type.as_u16() == Nomination::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct NominationEncoder(U32beEncoder);

impl Encode for NominationEncoder {
    type Item = Nomination;

    fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
        self.0.encode(buf, eos)
    }

    fn start_encoding(&mut self, item: Self::Item) -> Result<()> {
        self.0.start_encoding(item.0)
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl SizedEncode for NominationEncoder {
    fn exact_requiring_bytes(&self) -> u64 {
        self.0.exact_requiring_bytes()
    }
}

/// `GOOG-NETWORK-INFO` attribute: the sender's network id and cost, packed
/// into a 32-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GoogNetworkInfo {
    network_id: u16,
    network_cost: u16,
}

impl GoogNetworkInfo {
    pub const CODEPOINT: u16 = 0xC057;

    pub fn new(network_id: u16, network_cost: u16) -> Self {
        Self {
            network_id,
            network_cost,
        }
    }

    pub fn network_id(self) -> u16 {
        self.network_id
    }

    pub fn network_cost(self) -> u16 {
        self.network_cost
    }
}

impl stun_codec::Attribute for GoogNetworkInfo {
    type Decoder = GoogNetworkInfoDecoder;
    type Encoder = GoogNetworkInfoEncoder;

    fn get_type(&self) -> AttributeType {
        AttributeType::new(Self::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct GoogNetworkInfoDecoder(U32beDecoder);

impl Decode for GoogNetworkInfoDecoder {
    type Item = GoogNetworkInfo;

    fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
        self.0.decode(buf, eos)
    }

    fn finish_decoding(&mut self) -> Result<Self::Item> {
        let packed = self.0.finish_decoding()?;
        Ok(GoogNetworkInfo {
            network_id: (packed >> 16) as u16,
            network_cost: packed as u16,
        })
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl TryTaggedDecode for GoogNetworkInfoDecoder {
    type Tag = AttributeType;

    fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
        Ok(attr_type.as_u16() == GoogNetworkInfo::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct GoogNetworkInfoEncoder(U32beEncoder);

impl Encode for GoogNetworkInfoEncoder {
    type Item = GoogNetworkInfo;

    fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
        self.0.encode(buf, eos)
    }

    fn start_encoding(&mut self, item: Self::Item) -> Result<()> {
        self.0
            .start_encoding((item.network_id as u32) << 16 | item.network_cost as u32)
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl SizedEncode for GoogNetworkInfoEncoder {
    fn exact_requiring_bytes(&self) -> u64 {
        self.0.exact_requiring_bytes()
    }
}

/// `GOOG-MISC-INFO` attribute: a list of 16-bit values whose meaning depends
/// on their index. Index 0 in a Binding Request or Response carries the
/// supported compact-ping version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GoogMiscInfo(Vec<u16>);

impl GoogMiscInfo {
    pub const CODEPOINT: u16 = 0xC059;

    /// Index of the supported compact-ping version.
    pub const SUPPORT_GOOG_PING_VERSION: usize = 0;

    pub fn new(values: Vec<u16>) -> Self {
        GoogMiscInfo(values)
    }

    pub fn values(&self) -> &[u16] {
        &self.0
    }
}

impl stun_codec::Attribute for GoogMiscInfo {
    type Decoder = GoogMiscInfoDecoder;
    type Encoder = GoogMiscInfoEncoder;

    fn get_type(&self) -> AttributeType {
        AttributeType::new(Self::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct GoogMiscInfoDecoder(RemainingBytesDecoder);

impl Decode for GoogMiscInfoDecoder {
    type Item = GoogMiscInfo;

    fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
        self.0.decode(buf, eos)
    }

    fn finish_decoding(&mut self) -> Result<Self::Item> {
        let bytes = self.0.finish_decoding()?;
        let values = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(GoogMiscInfo(values))
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl TryTaggedDecode for GoogMiscInfoDecoder {
    type Tag = AttributeType;

    fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
        Ok(attr_type.as_u16() == GoogMiscInfo::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct GoogMiscInfoEncoder(BytesEncoder<Vec<u8>>);

impl Encode for GoogMiscInfoEncoder {
    type Item = GoogMiscInfo;

    fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
        self.0.encode(buf, eos)
    }

    fn start_encoding(&mut self, item: Self::Item) -> Result<()> {
        let bytes = item
            .0
            .iter()
            .flat_map(|value| value.to_be_bytes())
            .collect();
        self.0.start_encoding(bytes)
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl SizedEncode for GoogMiscInfoEncoder {
    fn exact_requiring_bytes(&self) -> u64 {
        self.0.exact_requiring_bytes()
    }
}

macro_rules! bytes_attribute {
    ($(#[$doc:meta])* $name:ident, $decoder:ident, $encoder:ident, $codepoint:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub const CODEPOINT: u16 = $codepoint;

            pub fn new(bytes: Vec<u8>) -> Self {
                $name(bytes)
            }

            pub fn bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl stun_codec::Attribute for $name {
            type Decoder = $decoder;
            type Encoder = $encoder;

            fn get_type(&self) -> AttributeType {
                AttributeType::new(Self::CODEPOINT)
            }
        }

        #[derive(Debug, Default)]
        pub struct $decoder(RemainingBytesDecoder);

        impl Decode for $decoder {
            type Item = $name;

            fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
                self.0.decode(buf, eos)
            }

            fn finish_decoding(&mut self) -> Result<Self::Item> {
                Ok($name(self.0.finish_decoding()?))
            }

            fn requiring_bytes(&self) -> ByteCount {
                self.0.requiring_bytes()
            }

            fn is_idle(&self) -> bool {
                self.0.is_idle()
            }
        }

        impl TryTaggedDecode for $decoder {
            type Tag = AttributeType;

            fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
                Ok(attr_type.as_u16() == $name::CODEPOINT)
            }
        }

        #[derive(Debug, Default)]
        pub struct $encoder(BytesEncoder<Vec<u8>>);

        impl Encode for $encoder {
            type Item = $name;

            fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
                self.0.encode(buf, eos)
            }

            fn start_encoding(&mut self, item: Self::Item) -> Result<()> {
                self.0.start_encoding(item.0)
            }

            fn requiring_bytes(&self) -> ByteCount {
                self.0.requiring_bytes()
            }

            fn is_idle(&self) -> bool {
                self.0.is_idle()
            }
        }

        impl SizedEncode for $encoder {
            fn exact_requiring_bytes(&self) -> u64 {
                self.0.exact_requiring_bytes()
            }
        }
    };
}

bytes_attribute!(
    /// `GOOG-DELTA` attribute: an opaque dictionary update piggybacked on a
    /// connectivity check.
    GoogDelta,
    GoogDeltaDecoder,
    GoogDeltaEncoder,
    0xC05C
);

bytes_attribute!(
    /// Opaque DTLS handshake payload piggybacked on a connectivity check.
    DtlsInStun,
    DtlsInStunDecoder,
    DtlsInStunEncoder,
    0xC070
);

bytes_attribute!(
    /// Acknowledgement for previously received [`DtlsInStun`] payload.
    DtlsInStunAck,
    DtlsInStunAckDecoder,
    DtlsInStunAckEncoder,
    0xC071
);

/// `GOOG-MESSAGE-INTEGRITY-32` attribute: HMAC-SHA1 over the message,
/// truncated to 32 bits. Used by compact pings where the full 20-byte
/// trailer would defeat their purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageIntegrity32 {
    hmac: [u8; 4],
}

impl MessageIntegrity32 {
    pub const CODEPOINT: u16 = 0xC060;

    /// Attribute header plus the truncated HMAC value.
    const TRAILER_LEN: usize = 4 + 4;

    /// Computes the truncated HMAC over `message` using a short-term
    /// credential. `message` must not yet contain an integrity attribute.
    pub fn new_short_term_credential<A>(message: &Message<A>, password: &str) -> Self
    where
        A: stun_codec::Attribute,
    {
        Self {
            hmac: Self::digest(message, password),
        }
    }

    /// Checks the truncated HMAC against `message`, which must be the
    /// received message with every attribute from this one onwards removed.
    pub fn check_short_term_credential<A>(&self, message: &Message<A>, password: &str) -> bool
    where
        A: stun_codec::Attribute,
    {
        self.hmac == Self::digest(message, password)
    }

    fn digest<A>(message: &Message<A>, password: &str) -> [u8; 4]
    where
        A: stun_codec::Attribute,
    {
        let mut bytes = MessageEncoder::default()
            .encode_into_bytes(message.clone())
            .expect("encoding always works");

        // The message length must cover up to and including this attribute.
        let adjusted_len = (bytes.len() - 20 + Self::TRAILER_LEN) as u16;
        bytes[2..4].copy_from_slice(&adjusted_len.to_be_bytes());

        let mut mac =
            Hmac::<Sha1>::new_from_slice(password.as_bytes()).expect("any key length is valid");
        mac.update(&bytes);
        let digest = mac.finalize().into_bytes();

        [digest[0], digest[1], digest[2], digest[3]]
    }
}

impl stun_codec::Attribute for MessageIntegrity32 {
    type Decoder = MessageIntegrity32Decoder;
    type Encoder = MessageIntegrity32Encoder;

    fn get_type(&self) -> AttributeType {
        AttributeType::new(Self::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct MessageIntegrity32Decoder(CopyableBytesDecoder<[u8; 4]>);

impl Decode for MessageIntegrity32Decoder {
    type Item = MessageIntegrity32;

    fn decode(&mut self, buf: &[u8], eos: Eos) -> Result<usize> {
        self.0.decode(buf, eos)
    }

    fn finish_decoding(&mut self) -> Result<Self::Item> {
        Ok(MessageIntegrity32 {
            hmac: self.0.finish_decoding()?,
        })
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl TryTaggedDecode for MessageIntegrity32Decoder {
    type Tag = AttributeType;

    fn try_start_decoding(&mut self, attr_type: Self::Tag) -> Result<bool> {
        Ok(attr_type.as_u16() == MessageIntegrity32::CODEPOINT)
    }
}

#[derive(Debug, Default)]
pub struct MessageIntegrity32Encoder(BytesEncoder<[u8; 4]>);

impl Encode for MessageIntegrity32Encoder {
    type Item = MessageIntegrity32;

    fn encode(&mut self, buf: &mut [u8], eos: Eos) -> Result<usize> {
        self.0.encode(buf, eos)
    }

    fn start_encoding(&mut self, item: Self::Item) -> Result<()> {
        self.0.start_encoding(item.hmac)
    }

    fn requiring_bytes(&self) -> ByteCount {
        self.0.requiring_bytes()
    }

    fn is_idle(&self) -> bool {
        self.0.is_idle()
    }
}

impl SizedEncode for MessageIntegrity32Encoder {
    fn exact_requiring_bytes(&self) -> u64 {
        self.0.exact_requiring_bytes()
    }
}

define_attribute_enums!(
    Attribute,
    AttributeDecoder,
    AttributeEncoder,
    [
        Username,
        MessageIntegrity,
        ErrorCode,
        XorMappedAddress,
        Fingerprint,
        Software,
        Priority,
        UseCandidate,
        IceControlled,
        IceControlling,
        Nomination,
        GoogNetworkInfo,
        GoogMiscInfo,
        GoogDelta,
        GoogDeltaAck,
        MessageIntegrity32,
        DtlsInStun,
        DtlsInStunAck
    ]
);

/// Creates a fresh [`TransactionId`].
pub fn transaction_id() -> TransactionId {
    TransactionId::new(rand::random())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stun_codec::rfc5389::methods::BINDING;
    use stun_codec::MessageClass;

    fn roundtrip(message: Message<Attribute>) -> Message<Attribute> {
        decode(&encode(message)).unwrap().unwrap()
    }

    #[test]
    fn ice_attributes_survive_a_roundtrip() {
        let mut message = Message::new(MessageClass::Request, BINDING, transaction_id());
        message.add_attribute(Priority::new(0x6e7f00ff));
        message.add_attribute(UseCandidate::new());
        message.add_attribute(IceControlling::new(0xDEAD_BEEF_CAFE_F00D));
        message.add_attribute(Nomination::new(7));
        message.add_attribute(GoogNetworkInfo::new(3, 50));

        let decoded = roundtrip(message);

        assert_eq!(
            decoded.get_attribute::<Priority>().unwrap().priority(),
            0x6e7f00ff
        );
        assert!(decoded.get_attribute::<UseCandidate>().is_some());
        assert_eq!(
            decoded.get_attribute::<IceControlling>().unwrap().value(),
            0xDEAD_BEEF_CAFE_F00D
        );
        assert_eq!(decoded.get_attribute::<Nomination>().unwrap().value(), 7);

        let network_info = decoded.get_attribute::<GoogNetworkInfo>().unwrap();
        assert_eq!(network_info.network_id(), 3);
        assert_eq!(network_info.network_cost(), 50);
    }

    #[test]
    fn misc_info_carries_the_ping_version() {
        let mut message = Message::new(MessageClass::SuccessResponse, BINDING, transaction_id());
        message.add_attribute(GoogMiscInfo::new(vec![GOOG_PING_VERSION]));

        let decoded = roundtrip(message);
        let misc = decoded.get_attribute::<GoogMiscInfo>().unwrap();

        assert_eq!(
            misc.values()[GoogMiscInfo::SUPPORT_GOOG_PING_VERSION],
            GOOG_PING_VERSION
        );
    }

    #[test]
    fn message_integrity_32_verifies_with_the_right_password() {
        let message =
            Message::<Attribute>::new(MessageClass::Request, goog_ping(), transaction_id());

        let integrity = MessageIntegrity32::new_short_term_credential(&message, "hunter2");

        assert!(integrity.check_short_term_credential(&message, "hunter2"));
        assert!(!integrity.check_short_term_credential(&message, "hunter3"));
    }

    #[test]
    fn message_integrity_32_survives_a_roundtrip() {
        let mut message =
            Message::<Attribute>::new(MessageClass::Request, goog_ping(), transaction_id());
        let integrity = MessageIntegrity32::new_short_term_credential(&message, "hunter2");
        message.add_attribute(integrity);

        let decoded = roundtrip(message);
        let received = decoded.get_attribute::<MessageIntegrity32>().unwrap();

        let rebuilt = Message::<Attribute>::new(
            decoded.class(),
            decoded.method(),
            decoded.transaction_id(),
        );
        assert!(received.check_short_term_credential(&rebuilt, "hunter2"));
    }

    #[test]
    fn role_conflict_maps_to_487() {
        let error = ErrorCode::from(RoleConflict);
        assert_eq!(error.code(), 487);
    }
}
