//! Hash-chain integrity for the audit trail

use crate::entry::{compute_hash, AuditEntry};

/// Running head of an audit hash chain
#[derive(Debug, Default)]
pub struct IntegrityChain {
    last_hash: Option<String>,
    entry_count: u64,
}

impl IntegrityChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a chain read back from storage
    pub fn from_state(last_hash: Option<String>, entry_count: u64) -> Self {
        Self {
            last_hash,
            entry_count,
        }
    }

    /// Hash the next entry must link to
    pub fn previous_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn update(&mut self, entry: &AuditEntry) {
        self.last_hash = Some(entry.entry_hash.clone());
        self.entry_count += 1;
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn head_hash(&self) -> Option<&String> {
        self.last_hash.as_ref()
    }
}

/// Outcome of verifying a sequence of entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    pub verified_entries: usize,
    pub first_invalid_index: Option<usize>,
    pub error_message: Option<String>,
}

/// Checks entry hashes and chain links
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn verify_entry(entry: &AuditEntry) -> bool {
        compute_hash(
            &entry.id,
            &entry.timestamp,
            &entry.actor,
            &entry.record,
            &entry.context,
            entry.previous_hash.as_deref(),
        ) == entry.entry_hash
    }

    /// Verify every entry hash and every link after the first.
    ///
    /// The first entry may carry a previous hash when the slice is a
    /// window into a longer log.
    pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
        let mut result = ChainVerification {
            valid: true,
            total_entries: entries.len(),
            verified_entries: 0,
            first_invalid_index: None,
            error_message: None,
        };

        for (i, entry) in entries.iter().enumerate() {
            if !Self::verify_entry(entry) {
                result.valid = false;
                result.first_invalid_index = Some(i);
                result.error_message = Some(format!("entry {} has invalid hash", entry.id));
                return result;
            }

            if i > 0 {
                let expected = &entries[i - 1].entry_hash;
                if entry.previous_hash.as_ref() != Some(expected) {
                    result.valid = false;
                    result.first_invalid_index = Some(i);
                    result.error_message = Some(format!(
                        "entry {} has broken chain link (expected prev: {}, got: {:?})",
                        entry.id, expected, entry.previous_hash
                    ));
                    return result;
                }
            }

            result.verified_entries = i + 1;
        }

        result
    }
}
