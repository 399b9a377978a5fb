use std::collections::HashMap;
use std::sync::RwLock;

use zerocopy::{AsBytes, FromBytes, Unaligned};

use super::{BlockStore, Error, Result};
use crate::block::Block;
use crate::cid::ContentId;

#[derive(Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct Key {
    codec: u8,
    digest: [u8; 32],
}

impl Key {
    fn new(cid: &ContentId) -> Key {
        Key { codec: cid.codec().to_version(), digest: cid.digest() }
    }
}

/// Durable block storage. Payloads are stored raw under their identifier.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn new(db: sled::Db) -> SledStore {
        SledStore { db }
    }

    pub fn open(path: &str) -> Result<SledStore> {
        Ok(SledStore { db: sled::open(path)? })
    }

    /// An ephemeral store backed by a temporary database, for tests.
    pub fn temporary() -> Result<SledStore> {
        Ok(SledStore { db: sled::Config::new().temporary(true).open()? })
    }
}

impl BlockStore for SledStore {
    fn has(&self, cid: &ContentId) -> Result<bool> {
        let key = Key::new(cid);
        Ok(self.db.contains_key(key.as_bytes())?)
    }

    fn get_size(&self, cid: &ContentId) -> Result<Option<usize>> {
        let key = Key::new(cid);
        Ok(self.db.get(key.as_bytes())?.map(|value| value.len()))
    }

    fn get(&self, cid: &ContentId) -> Result<Block> {
        let key = Key::new(cid);
        match self.db.get(key.as_bytes())? {
            Some(value) => Ok(Block::from_parts(cid.clone(), value.as_bytes().to_vec())),
            None => Err(Error::NotFound(cid.clone())),
        }
    }

    fn put(&self, block: &Block) -> Result<()> {
        let key = Key::new(&block.cid);
        let _ = self.db.insert(key.as_bytes(), block.data.clone())?;
        Ok(())
    }
}

/// In-memory block storage for tests and the virtual network.
pub struct MemStore {
    blocks: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore { blocks: RwLock::new(HashMap::new()) }
    }
}

impl BlockStore for MemStore {
    fn has(&self, cid: &ContentId) -> Result<bool> {
        match self.blocks.read() {
            Ok(blocks) => Ok(blocks.contains_key(cid)),
            Err(_) => Ok(false),
        }
    }

    fn get_size(&self, cid: &ContentId) -> Result<Option<usize>> {
        match self.blocks.read() {
            Ok(blocks) => Ok(blocks.get(cid).map(|data| data.len())),
            Err(_) => Ok(None),
        }
    }

    fn get(&self, cid: &ContentId) -> Result<Block> {
        match self.blocks.read() {
            Ok(blocks) => match blocks.get(cid) {
                Some(data) => Ok(Block::from_parts(cid.clone(), data.clone())),
                None => Err(Error::NotFound(cid.clone())),
            },
            Err(_) => Err(Error::NotFound(cid.clone())),
        }
    }

    fn put(&self, block: &Block) -> Result<()> {
        if let Ok(mut blocks) = self.blocks.write() {
            let _ = blocks.insert(block.cid.clone(), block.data.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlockStore;

    #[actix_rt::test]
    async fn test_sled_roundtrip() {
        let store = SledStore::temporary().unwrap();
        let block = Block::new(b"hello".to_vec());
        assert!(!store.has(&block.cid).unwrap());
        assert_eq!(store.get_size(&block.cid).unwrap(), None);

        store.put(&block).unwrap();
        assert!(store.has(&block.cid).unwrap());
        assert_eq!(store.get_size(&block.cid).unwrap(), Some(5));
        assert_eq!(store.get(&block.cid).unwrap(), block);
    }

    #[actix_rt::test]
    async fn test_sled_get_missing_is_not_found() {
        let store = SledStore::temporary().unwrap();
        match store.get(&ContentId::zero()) {
            Err(Error::NotFound(cid)) => assert_eq!(cid, ContentId::zero()),
            other => panic!("unexpected result: {:?}", other.map(|b| b.cid)),
        }
    }

    #[actix_rt::test]
    async fn test_mem_roundtrip() {
        let store = MemStore::new();
        let block = Block::new(b"in memory".to_vec());
        store.put(&block).unwrap();
        assert!(store.has(&block.cid).unwrap());
        assert_eq!(store.get(&block.cid).unwrap().data, b"in memory".to_vec());
    }
}
