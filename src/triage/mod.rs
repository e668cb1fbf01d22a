//! Triage pipeline — classification, session running, shared types.

pub mod classifier;
pub mod session;
pub mod types;

pub use classifier::{Classifier, ClassifierConfig};
pub use session::TriageEngine;
pub use types::{
    Category, Citation, Classification, Email, EvidenceSet, ExtractedEntities, TriageResult,
    Urgency,
};
