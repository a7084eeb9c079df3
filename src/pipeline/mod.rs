//! Pipeline stages for ordered document printing.
//!
//! Each submodule implements one stage and is tested on its own. The
//! controller wires them together per job.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ workers ──▶ reorder ──▶ consumer ──▶ device
//! (URL/path) (queue)   (W tasks)   (bounded)   (serial)
//! ```
//!
//! 1. [`input`]    — canonicalise the submitted path or URL to a local PDF
//! 2. [`source`]   — count pages and feed page tasks into a bounded queue
//! 3. [`workers`]  — rasterise pages concurrently, with retry and backoff
//! 4. [`reorder`]  — hold early pages and release them in ascending order;
//!    the only shared mutable state in a job
//! 5. [`consumer`] — submit pages one at a time, apply the failure policy

pub mod consumer;
pub mod input;
pub mod reorder;
pub mod source;
pub mod workers;
