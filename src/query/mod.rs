pub mod crossref;

pub use crossref::{CrossReference, CrossReferenceEngine, CrossReferenceRequest, SkipReason};
