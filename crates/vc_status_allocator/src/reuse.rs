//! Process-wide, per-`indexAllocator` reuse queue of held shards. Lets the
//! hot issuance path skip re-running `ListManager::get_shard` on every call.
//! `spec.md` §4.5, §9 ("LRU shard-reuse cache").
//!
//! Modeled after the `async_lru` crate's shape: an explicit, constructed
//! resource passed through constructors rather than a module-level
//! singleton, with eviction purely for memory control. The shard's truth
//! always lives in the DocStore, so dropping one from the queue is never
//! incorrect, only a missed fast path.

use std::{
    collections::VecDeque,
    num::NonZeroUsize,
};

use lru::LruCache;
use parking_lot::Mutex;
use vc_status_model::{
    MAX_SHARD_QUEUES,
    MAX_SHARD_QUEUE_SIZE,
};

use crate::cache::Shard;

pub struct ShardReuseCache {
    queues: Mutex<LruCache<String, VecDeque<Shard>>>,
}

impl Default for ShardReuseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardReuseCache {
    pub fn new() -> Self {
        let cap = NonZeroUsize::new(*MAX_SHARD_QUEUES).unwrap_or(NonZeroUsize::MIN);
        Self {
            queues: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn pop(&self, index_allocator: &str) -> Option<Shard> {
        let mut queues = self.queues.lock();
        queues.get_mut(index_allocator).and_then(VecDeque::pop_front)
    }

    pub fn push(&self, index_allocator: &str, shard: Shard) {
        let mut queues = self.queues.lock();
        let queue = queues.get_or_insert_mut(index_allocator.to_string(), VecDeque::new);
        if queue.len() >= *MAX_SHARD_QUEUE_SIZE {
            queue.pop_back();
        }
        queue.push_front(shard);
    }
}
