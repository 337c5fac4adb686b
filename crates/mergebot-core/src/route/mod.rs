//! Addressee resolution for inbound messages.
//!
//! - `classifier` -- contract for the external intent-classification
//!   collaborator (the only non-deterministic seam; everything behind it
//!   stays deterministic and testable)
//! - `recency` -- last-successful-bot tracking for deterministic tie-breaks
//! - `addressing` -- the pure resolution logic combining explicit identity,
//!   declared payload schemas, and classified intent

pub mod addressing;
pub mod classifier;
pub mod recency;

pub use addressing::{InputMode, Resolution};
pub use classifier::{BoxIntentClassifier, ClassifierError, IntentClassifier, RankedIntent};
pub use recency::RecencyTracker;
