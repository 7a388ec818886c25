//! Bounded decryption memo keyed by the exact ciphertext string.
//!
//! Plaintexts are zeroized when evicted or cleared.

use std::num::NonZeroUsize;

use lru::LruCache;
use zeroize::Zeroizing;

pub struct DecryptionMemo {
    entries: LruCache<String, Zeroizing<String>>,
}

impl DecryptionMemo {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, ciphertext: &str) -> Option<String> {
        self.entries.get(ciphertext).map(|p| p.as_str().to_owned())
    }

    pub fn insert(&mut self, ciphertext: &str, plaintext: Zeroizing<String>) {
        self.entries.put(ciphertext.to_owned(), plaintext);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
