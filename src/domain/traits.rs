// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Programming against these traits lets the application layer
// swap implementations without changing its workflow code:
//   - DatasetLoader implements SampleSource
//   - CompressionManifest implements ModelDirectory (compression.json)
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use std::path::Path;

use crate::domain::sample::TextSample;

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// Any component that can produce labelled text samples.
pub trait SampleSource {
    /// Load every sample available from this source.
    fn load_all(&self) -> Result<Vec<TextSample>>;
}

// ─── ModelDirectory ───────────────────────────────────────────────────────────
/// Anything that is persisted as a directory of files and can be
/// restored from one.
pub trait ModelDirectory: Sized {
    /// Write this component into `dir`, creating it if needed.
    fn save_to(&self, dir: &Path) -> Result<()>;

    /// Restore a component previously written with `save_to`.
    fn load_from(dir: &Path) -> Result<Self>;
}
