//! Engine services
//!
//! Leaf-first: catalog and filing access at the bottom, the pipeline and
//! selection engines above them, the supervisor on top.

pub mod catalog;
pub mod filing_source;
pub mod pipeline;
pub mod selection;
pub mod steps;
pub mod supervisor;
pub mod vector_store;

pub use catalog::Catalog;
pub use filing_source::{
    CandidateFeed, EdgarClient, Filing, FilingCache, FilingSource, StaticCandidateFeed,
};
pub use pipeline::PipelineEngine;
pub use selection::SelectionEngine;
pub use supervisor::{StatusReport, Supervisor};
pub use vector_store::VectorStore;
