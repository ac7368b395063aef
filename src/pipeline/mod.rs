//! Generation pipeline.
//!
//! - `diff`: which versions of a package need a build
//! - `enqueue`: resolve origins and publish build messages
//! - `generate`: run every active source through scrape, diff, enqueue and upsert
//! - `prune`: deactivate packages upstream stopped reporting

pub mod diff;
pub mod enqueue;
pub mod generate;
pub mod prune;

pub use diff::{ChangeDetector, detect_changes};
pub use enqueue::{BuildEnqueuer, EnqueueOutcome, build_message, dedup_id};
pub use generate::{Generator, RunReport};
pub use prune::prune;
