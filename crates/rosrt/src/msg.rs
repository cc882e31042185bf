// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message trait and built-in message types.
//!
//! Every payload exchanged over the graph implements [`Message`]: a type
//! name, an MD5 digest of the type definition, and a little-endian byte
//! codec. The digest travels in connection handshakes and recorded logs so
//! peers can detect definition drift without sharing code.
//!
//! [`AnyMessage`] is the dynamically-typed form used by tools that forward
//! payloads without compile-time type knowledge (the bag player, topic
//! echo): raw bytes plus a [`TypeDescriptor`].

use md5::{Digest, Md5};

use crate::error::{Error, Result};

/// Encode/decode contract for typed payloads.
pub trait Message: Sized + Send + Sync + 'static {
    /// Fully qualified type name, e.g. `rosrt_msgs/Text`.
    fn type_name() -> &'static str;

    /// MD5 digest (hex) of the type definition.
    fn md5sum() -> &'static str;

    /// Append the little-endian encoding of `self` to `buf`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a field cannot be represented on the wire.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Decode from a little-endian buffer. The buffer must contain exactly
    /// one message.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the buffer is truncated or contains invalid data.
    fn decode(buf: &[u8]) -> Result<Self>;
}

/// Runtime type identity: name plus definition digest.
///
/// `*` acts as a wildcard on either side, used by dynamically-typed
/// subscribers that accept any payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub name: String,
    pub md5sum: String,
}

impl TypeDescriptor {
    /// Descriptor of a statically-known message type.
    pub fn of<M: Message>() -> Self {
        Self {
            name: M::type_name().to_string(),
            md5sum: M::md5sum().to_string(),
        }
    }

    /// Descriptor from dynamic components (bag records, handshakes).
    pub fn new(name: impl Into<String>, md5sum: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            md5sum: md5sum.into(),
        }
    }

    /// Wildcard descriptor matching any concrete type.
    pub fn any() -> Self {
        Self::new("*", "*")
    }

    /// Whether two descriptors denote compatible types. `*` matches
    /// anything on either side.
    pub fn matches(&self, other: &TypeDescriptor) -> bool {
        let name_ok = self.name == "*" || other.name == "*" || self.name == other.name;
        let sum_ok = self.md5sum == "*" || other.md5sum == "*" || self.md5sum == other.md5sum;
        name_ok && sum_ok
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.md5sum)
    }
}

/// A payload carried without compile-time type knowledge.
#[derive(Debug, Clone)]
pub struct AnyMessage {
    pub descriptor: TypeDescriptor,
    pub bytes: Vec<u8>,
}

impl AnyMessage {
    pub fn new(descriptor: TypeDescriptor, bytes: Vec<u8>) -> Self {
        Self { descriptor, bytes }
    }

    /// Decode into a statically-known type, verifying identity first.
    pub fn to_typed<M: Message>(&self) -> Result<M> {
        let expected = TypeDescriptor::of::<M>();
        if !expected.matches(&self.descriptor) {
            return Err(Error::TypeConflict {
                name: self.descriptor.name.clone(),
                existing: self.descriptor.name.clone(),
                requested: expected.name,
            });
        }
        M::decode(&self.bytes)
    }
}

/// Hex MD5 of a type definition string.
pub fn md5_hex(definition: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(definition.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

// ============================================================================
// Wire helpers (little-endian, length-prefixed strings)
// ============================================================================

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn get_u32(buf: &[u8], offset: &mut usize) -> Result<u32> {
    let end = *offset + 4;
    if buf.len() < end {
        return Err(Error::DeserializationError("truncated u32".to_string()));
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[*offset..end]);
    *offset = end;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn put_string(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

pub(crate) fn get_string(buf: &[u8], offset: &mut usize) -> Result<String> {
    let len = get_u32(buf, offset)? as usize;
    let end = *offset + len;
    if buf.len() < end {
        return Err(Error::DeserializationError("truncated string".to_string()));
    }
    let s = std::str::from_utf8(&buf[*offset..end])
        .map_err(|e| Error::DeserializationError(format!("invalid utf-8: {}", e)))?
        .to_string();
    *offset = end;
    Ok(s)
}

// ============================================================================
// Built-in message types
// ============================================================================

/// A zero-byte message, useful for event-style topics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

impl Message for Empty {
    fn type_name() -> &'static str {
        "rosrt_msgs/Empty"
    }

    fn md5sum() -> &'static str {
        static SUM: std::sync::OnceLock<String> = std::sync::OnceLock::new();
        SUM.get_or_init(|| md5_hex("rosrt_msgs/Empty\n"))
    }

    fn encode(&self, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn decode(_buf: &[u8]) -> Result<Self> {
        Ok(Empty)
    }
}

/// A single UTF-8 string payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text {
    pub data: String,
}

impl Text {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

impl Message for Text {
    fn type_name() -> &'static str {
        "rosrt_msgs/Text"
    }

    fn md5sum() -> &'static str {
        static SUM: std::sync::OnceLock<String> = std::sync::OnceLock::new();
        SUM.get_or_init(|| md5_hex("rosrt_msgs/Text\nstring data\n"))
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_string(buf, &self.data);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let data = get_string(buf, &mut offset)?;
        Ok(Self { data })
    }
}

/// A point in time as seconds + nanoseconds, the field type of [`Clock`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp {
    pub secs: u32,
    pub nsecs: u32,
}

impl Stamp {
    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            secs: (nanos / 1_000_000_000) as u32,
            nsecs: (nanos % 1_000_000_000) as u32,
        }
    }

    pub fn as_nanos(&self) -> u64 {
        u64::from(self.secs) * 1_000_000_000 + u64::from(self.nsecs)
    }
}

/// Synthetic clock sample, published by the bag player under `-b HZ`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clock {
    pub clock: Stamp,
}

impl Message for Clock {
    fn type_name() -> &'static str {
        "rosrt_msgs/Clock"
    }

    fn md5sum() -> &'static str {
        static SUM: std::sync::OnceLock<String> = std::sync::OnceLock::new();
        SUM.get_or_init(|| md5_hex("rosrt_msgs/Clock\ntime clock\n"))
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_u32(buf, self.clock.secs);
        put_u32(buf, self.clock.nsecs);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let secs = get_u32(buf, &mut offset)?;
        let nsecs = get_u32(buf, &mut offset)?;
        Ok(Self {
            clock: Stamp { secs, nsecs },
        })
    }
}

/// Encode a message into a fresh buffer.
pub fn encode_to_vec<M: Message>(msg: &M) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    msg.encode(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_roundtrip() {
        let msg = Text::new("hello graph");
        let bytes = encode_to_vec(&msg).unwrap();
        let back = Text::decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn clock_roundtrip_and_stamp_math() {
        let stamp = Stamp::from_nanos(1_500_000_042);
        assert_eq!(stamp.secs, 1);
        assert_eq!(stamp.nsecs, 500_000_042);
        assert_eq!(stamp.as_nanos(), 1_500_000_042);

        let msg = Clock { clock: stamp };
        let bytes = encode_to_vec(&msg).unwrap();
        assert_eq!(Clock::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn truncated_decode_is_an_error() {
        let msg = Text::new("truncate me");
        let bytes = encode_to_vec(&msg).unwrap();
        assert!(Text::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(Text::decode(&bytes[..2]).is_err());
    }

    #[test]
    fn descriptor_wildcards_match() {
        let concrete = TypeDescriptor::of::<Text>();
        assert!(TypeDescriptor::any().matches(&concrete));
        assert!(concrete.matches(&TypeDescriptor::any()));
        assert!(!concrete.matches(&TypeDescriptor::of::<Clock>()));
        // Same name, unknown digest.
        let wild_sum = TypeDescriptor::new(Text::type_name(), "*");
        assert!(wild_sum.matches(&concrete));
    }

    #[test]
    fn any_message_typed_view_checks_identity() {
        let bytes = encode_to_vec(&Text::new("x")).unwrap();
        let good = AnyMessage::new(TypeDescriptor::of::<Text>(), bytes.clone());
        assert_eq!(good.to_typed::<Text>().unwrap().data, "x");

        let bad = AnyMessage::new(TypeDescriptor::of::<Clock>(), bytes);
        assert!(bad.to_typed::<Text>().is_err());
    }

    #[test]
    fn md5_is_stable_and_distinct() {
        assert_eq!(Text::md5sum(), Text::md5sum());
        assert_ne!(Text::md5sum(), Empty::md5sum());
        assert_eq!(Text::md5sum().len(), 32);
    }
}
