pub mod cache;
pub mod candidates;
pub mod coherence;
pub mod features;
pub mod logging;
pub mod normalizer;
pub mod scoring;
pub mod service;
pub mod store;
pub mod types;


pub use service::{ArticleResolution, DisambiguationService, ResolveError};
pub use types::{
    AbstainReason, ArticleContext, ArticleSummary, DisambiguationResult, Mention, Place,
    PlaceKind, PlaceSummary, PublisherProfile,
};

// Tracing targets per subsystem.
pub const TARGET_RESOLVER: &str = "resolver";
pub const TARGET_CANDIDATES: &str = "candidates";
pub const TARGET_COHERENCE: &str = "coherence";
pub const TARGET_STORE: &str = "gazetteer";
