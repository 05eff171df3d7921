//! README-emitter collaborator hook (§1 "Out of scope", §9).
//!
//! Generating a human-readable per-item README is an external
//! collaborator's job. The scanner calls it once per item, with the
//! parsed metadata document, immediately after a successful fetch. The
//! call must be idempotent and must never block or fail the scan.

use serde_json::Value;

/// Implemented by the external collaborator that writes a README file
/// alongside each item's downloads.
pub trait ReadmeEmitter: Send + Sync {
    /// Emit (or skip, if already present) a README for `item_id` given its
    /// parsed metadata document. Errors are logged by the caller and never
    /// interrupt the scan (§9 "must not block the scan on failure").
    fn emit(&self, item_id: &str, metadata: &Value) -> Result<(), String>;
}

/// Default no-op emitter used when no collaborator is wired in.
pub struct NoOpReadmeEmitter;

impl ReadmeEmitter for NoOpReadmeEmitter {
    fn emit(&self, _item_id: &str, _metadata: &Value) -> Result<(), String> {
        Ok(())
    }
}
