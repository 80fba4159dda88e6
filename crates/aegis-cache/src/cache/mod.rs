//! Cache facade.
//!
//! [`DistributedCache`] is the public get/set/refresh/remove surface. It
//! partitions keys by instance name, decides per key whether an operation may
//! be retried, and re-arms sliding windows on reads.

mod cache_interface;
pub mod cache_keys;
mod distributed_cache;

pub use cache_interface::{CacheExt, DistributedCacheInterface};
pub use cache_keys::{AttemptMode, KeyPolicy};
pub use distributed_cache::DistributedCache;
