//! Content-addressed block storage using [`sled`](http://docs.rs/sled/) as backend.
//!
//! The engine only ever asks three questions of storage: do we hold a piece of
//! content, how big is it, and give me the bytes. [BlockStore] captures that
//! contract; [SledStore] is the durable answer and [MemStore] the in-memory
//! one used by tests and the virtual network.

mod block_store;

pub use block_store::{MemStore, SledStore};

use crate::block::Block;
use crate::cid::ContentId;

#[derive(Debug)]
pub enum Error {
    Sled(sled::Error),
    NotFound(ContentId),
}

impl std::error::Error for Error {}

impl std::convert::From<sled::Error> for Error {
    fn from(error: sled::Error) -> Self {
        Error::Sled(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the engine requires of local block storage. Calls are synchronous from
/// the caller's point of view.
pub trait BlockStore: Send + Sync {
    /// Whether the store holds the content.
    fn has(&self, cid: &ContentId) -> Result<bool>;

    /// The stored payload size, or `None` when absent.
    fn get_size(&self, cid: &ContentId) -> Result<Option<usize>>;

    /// Fetches a block, failing with [Error::NotFound] when absent.
    fn get(&self, cid: &ContentId) -> Result<Block>;

    /// Inserts a block, overwriting any previous payload for the same
    /// identifier.
    fn put(&self, block: &Block) -> Result<()>;
}
