//! Chain state: the in-memory header index and its manager.
//!
//! [`ChainManager`] owns the [`index::ChainIndex`] exclusively and is the
//! only writer; reads go through a shared lock. See the module docs on
//! [`manager`] for the insertion and reorganization algorithm.

pub(crate) mod index;
pub mod manager;

pub use manager::{ChainManager, PRUNE_HORIZON};
