//! Blocks of content-addressed data.

use crate::cid::{Codec, ContentId};

/// A unit of exchanged data together with the identifier it answers to.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub cid: ContentId,
    pub data: Vec<u8>,
}

impl Block {
    /// Wraps a raw payload, deriving its identifier.
    pub fn new(data: Vec<u8>) -> Block {
        let cid = ContentId::from_data(&data);
        Block { cid, data }
    }

    /// Wraps a payload under a specific codec.
    pub fn with_codec(codec: Codec, data: Vec<u8>) -> Block {
        let cid = ContentId::from_encoded(codec, &data);
        Block { cid, data }
    }

    /// Reconstructs a block received from the network. The caller is expected
    /// to check [Block::verifies] before trusting it.
    pub fn from_parts(cid: ContentId, data: Vec<u8>) -> Block {
        Block { cid, data }
    }

    /// Checks that the payload hashes to the claimed identifier.
    pub fn verifies(&self) -> bool {
        self.cid.verifies(&self.data)
    }

    /// The payload length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_block_verifies() {
        let block = Block::new(b"some data".to_vec());
        assert!(block.verifies());
        assert_eq!(block.size(), 9);

        let forged = Block::from_parts(block.cid.clone(), b"other data".to_vec());
        assert!(!forged.verifies());
    }
}
