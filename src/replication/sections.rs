//! Section deduplication index
//!
//! Maps fingerprint bytes to the id of the one section created for them.

use std::collections::HashMap;

use crate::replication::entity::NetworkId;

/// Fingerprint to section id lookup
#[derive(Debug, Default)]
pub struct SectionIndex {
    sections: HashMap<Vec<u8>, NetworkId>,
}

impl SectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Section registered for a fingerprint
    pub fn find(&self, fingerprint: &[u8]) -> Option<NetworkId> {
        self.sections.get(fingerprint).copied()
    }

    /// Register `id` for `fingerprint` unless the fingerprint is already taken.
    ///
    /// On conflict the existing id is returned and nothing changes.
    pub fn claim(&mut self, fingerprint: &[u8], id: NetworkId) -> Result<(), NetworkId> {
        if let Some(&existing) = self.sections.get(fingerprint) {
            return Err(existing);
        }
        self.sections.insert(fingerprint.to_vec(), id);
        Ok(())
    }

    /// Number of registered sections
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_first_writer_wins() {
        let mut index = SectionIndex::new();
        assert_eq!(index.claim(b"0,0", NetworkId(1)), Ok(()));
        assert_eq!(index.claim(b"0,0", NetworkId(7)), Err(NetworkId(1)));
        assert_eq!(index.find(b"0,0"), Some(NetworkId(1)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_fingerprints_compare_by_bytes() {
        let mut index = SectionIndex::new();
        index.claim(&[1, 2], NetworkId(1)).unwrap();
        assert_eq!(index.find(&[1, 2, 0]), None);
        assert_eq!(index.find(&[]), None);
        index.claim(&[], NetworkId(2)).unwrap();
        assert_eq!(index.find(&[]), Some(NetworkId(2)));
    }
}
