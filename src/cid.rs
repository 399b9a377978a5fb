//! Content identifiers for exchanged blocks.
//!
//! A [ContentId] addresses a block by the blake3 hash of its payload, tagged
//! with the [Codec] the payload is encoded with. Two payload encodings of the
//! same data hash to two distinct identifiers.

use std::convert::TryInto;
use std::fmt;
use std::str::FromStr;

use base58check::{FromBase58Check, ToBase58Check};

/// Payload encoding tag carried inside a [ContentId].
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Serialize, Deserialize)]
pub enum Codec {
    /// Opaque bytes.
    Raw,
    /// Linked node encoding.
    Dag,
}

impl Codec {
    pub(crate) fn to_version(self) -> u8 {
        match self {
            Codec::Raw => 0x0,
            Codec::Dag => 0x1,
        }
    }

    pub(crate) fn from_version(vsn: u8) -> Option<Codec> {
        match vsn {
            0x0 => Some(Codec::Raw),
            0x1 => Some(Codec::Dag),
            _ => None,
        }
    }
}

/// Identifies the content of a block independently of who holds it.
///
/// Displayed using the Base58check format with the codec as the version byte.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Serialize, Deserialize)]
pub struct ContentId {
    codec: Codec,
    digest: [u8; 32],
}

impl std::fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.digest.to_base58check(self.codec.to_version()))
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.digest.to_base58check(self.codec.to_version()))
    }
}

impl FromStr for ContentId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, crate::Error> {
        let (vsn, bytes) = s.from_base58check().map_err(|_| crate::Error::TryFromStringError)?;
        let codec = Codec::from_version(vsn).ok_or(crate::Error::TryFromStringError)?;
        let digest: [u8; 32] =
            bytes.as_slice().try_into().map_err(|_| crate::Error::TryFromStringError)?;
        Ok(ContentId { codec, digest })
    }
}

impl ContentId {
    /// Derives the identifier of a raw payload.
    pub fn from_data(data: &[u8]) -> ContentId {
        ContentId::from_encoded(Codec::Raw, data)
    }

    /// Derives the identifier of a payload under a specific codec.
    pub fn from_encoded(codec: Codec, data: &[u8]) -> ContentId {
        ContentId { codec, digest: blake3::hash(data).as_bytes().clone() }
    }

    /// Checks that `data` hashes to this identifier's digest.
    pub fn verifies(&self, data: &[u8]) -> bool {
        blake3::hash(data).as_bytes() == &self.digest
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Returns the wrapped digest bytes.
    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }

    /// Fixed identifier for tests.
    pub fn zero() -> ContentId {
        ContentId { codec: Codec::Raw, digest: [0u8; 32] }
    }

    /// Fixed identifier for tests.
    pub fn one() -> ContentId {
        ContentId { codec: Codec::Raw, digest: [1u8; 32] }
    }

    /// Fixed identifier for tests.
    pub fn two() -> ContentId {
        ContentId { codec: Codec::Raw, digest: [2u8; 32] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_digest_matches_payload() {
        let cid = ContentId::from_data(b"foo");
        assert!(cid.verifies(b"foo"));
        assert!(!cid.verifies(b"bar"));
    }

    #[actix_rt::test]
    async fn test_codec_distinguishes() {
        let raw = ContentId::from_encoded(Codec::Raw, b"foo");
        let dag = ContentId::from_encoded(Codec::Dag, b"foo");
        assert!(raw != dag);
        assert_eq!(raw.digest(), dag.digest());
    }

    #[actix_rt::test]
    async fn test_roundtrip_base58check() {
        let cid = ContentId::from_encoded(Codec::Dag, b"roundtrip");
        let parsed: ContentId = format!("{}", cid).parse().unwrap();
        assert_eq!(cid, parsed);
        assert_eq!(parsed.codec(), Codec::Dag);
    }
}
