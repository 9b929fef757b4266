pub mod error;
pub mod extract;
pub mod indexer;
pub mod worker;

pub use error::{ConsolidateError, Result};
pub use extract::{Extraction, Extractor};
pub use indexer::Indexer;
pub use worker::ConsolidationWorker;

/// Hex-encoded SHA-256 of a byte slice — the content hash used by both the
/// indexer and the consolidation bookkeeping.
pub fn content_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}
