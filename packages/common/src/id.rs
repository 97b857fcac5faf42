//! Node id allocation.
//!
//! Generated ids look like `<prefix>-<n>`, where the prefix is the CRC32 of
//! the document key. Ids stay unique across documents that share a store and
//! are stable for a given key and allocation order.

use crc32fast::Hasher;

/// Stable id prefix for a document key
pub fn key_prefix(key: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(b"trellis:");
    hasher.update(key.as_bytes());
    format!("{:08x}", hasher.finalize())
}

/// Sequential id allocator for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdGenerator {
    prefix: String,
    issued: u64,
}

impl IdGenerator {
    pub fn for_key(key: &str) -> Self {
        Self {
            prefix: key_prefix(key),
            issued: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        self.issued += 1;
        format!("{}-{}", self.prefix, self.issued)
    }

    /// Account for an id that already exists (e.g. after loading), so the
    /// allocator never hands it out again
    pub fn observe(&mut self, id: &str) {
        let counter = id
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(n) = counter {
            self.issued = self.issued.max(n);
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}
