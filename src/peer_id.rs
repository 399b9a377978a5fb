//! Hash-based peer identities.
//!
//! See the documentation of [PeerId] for details.

use std::convert::TryInto;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use base58check::{FromBase58Check, ToBase58Check};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use rand::{self, Rng};

/// Identity of a network peer.
///
/// A `PeerId` wraps a 32-byte blake2b hash. Peers on a real transport derive it
/// from their endpoint; test peers use the numbered constructors.
///
/// Displayed using the Base58check format.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Serialize, Deserialize, Default)]
pub struct PeerId([u8; 32]);

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_base58check(0))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_base58check(0))
    }
}

impl FromStr for PeerId {
    type Err = crate::Error;

    /// Converts a base58check encoded string to the bytes of a `PeerId`
    fn from_str(id_str: &str) -> Result<Self, crate::Error> {
        let (vsn, bytes) =
            id_str.from_base58check().map_err(|_| crate::Error::TryFromStringError)?;
        if vsn != 0 {
            return Err(crate::Error::TryFromStringError);
        }
        let bytes: [u8; 32] =
            bytes.as_slice().try_into().map_err(|_| crate::Error::TryFromStringError)?;
        Ok(PeerId(bytes))
    }
}

impl PeerId {
    /// By default a new id is created by hashing an input byte slice
    pub fn new(bytes: &[u8]) -> PeerId {
        PeerId(hash(bytes))
    }

    /// Converts a `SocketAddr` into an *untrusted* identity.
    pub fn from_ip(ip: &SocketAddr) -> PeerId {
        PeerId::new(format!("{:?}", ip.clone()).as_bytes())
    }

    /// Generate a random `PeerId`
    pub fn generate() -> PeerId {
        let mut rng = rand::thread_rng();
        let v: [u8; 32] = rng.gen();
        PeerId(v)
    }

    /// All-zeroes `PeerId` (for testing)
    pub fn zero() -> PeerId {
        PeerId([0u8; 32])
    }

    /// All-ones `PeerId` (for testing)
    pub fn one() -> PeerId {
        PeerId([1u8; 32])
    }

    /// All-twos `PeerId` (for testing)
    pub fn two() -> PeerId {
        PeerId([2u8; 32])
    }

    /// Returns the wrapped byte array containing the hash
    pub fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Returns a slice to the contained byte array
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn hash(input: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2bVar::new(32).unwrap();
    hasher.update(input);
    let mut buf = [0u8; 32];
    hasher.finalize_variable(&mut buf).unwrap();
    buf
}

/// A peer identity together with the endpoint it is reachable at.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PeerMetadata {
    /// The identity of the peer.
    pub id: PeerId,
    /// The peers ip address.
    pub ip: SocketAddr,
}

impl PeerMetadata {
    pub fn new(id: PeerId, ip: SocketAddr) -> Self {
        PeerMetadata { id, ip }
    }

    /// Parse a peer description from the format `IP` or `ID@IP` to its id and address
    pub fn from_id_and_ip(s: &str) -> crate::Result<PeerMetadata> {
        let parts: Vec<&str> = s.split('@').collect();
        if parts.len() == 1 {
            let ip: SocketAddr = parts[0].parse().map_err(|_| crate::Error::PeerParseError)?;
            let id = PeerId::from_ip(&ip);
            Ok(PeerMetadata { id, ip })
        } else if parts.len() == 2 {
            let id: PeerId = parts[0].parse().map_err(|_| crate::Error::PeerParseError)?;
            let ip: SocketAddr = parts[1].parse().map_err(|_| crate::Error::PeerParseError)?;
            Ok(PeerMetadata { id, ip })
        } else {
            Err(crate::Error::PeerParseError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_roundtrip_base58check() {
        let id = PeerId::generate();
        let s = format!("{}", id);
        let parsed: PeerId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[actix_rt::test]
    async fn test_from_ip_is_stable() {
        let ip: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        assert_eq!(PeerId::from_ip(&ip), PeerId::from_ip(&ip));
        let other: SocketAddr = "127.0.0.1:9091".parse().unwrap();
        assert!(PeerId::from_ip(&ip) != PeerId::from_ip(&other));
    }

    #[actix_rt::test]
    async fn test_parse_peer_description() {
        let meta = PeerMetadata::from_id_and_ip("127.0.0.1:9090").unwrap();
        assert_eq!(meta.ip, "127.0.0.1:9090".parse::<SocketAddr>().unwrap());
        assert_eq!(meta.id, PeerId::from_ip(&meta.ip));

        let described = format!("{}@10.0.0.1:1234", PeerId::one());
        let meta = PeerMetadata::from_id_and_ip(&described).unwrap();
        assert_eq!(meta.id, PeerId::one());

        assert!(PeerMetadata::from_id_and_ip("nonsense@x@y").is_err());
    }
}
