pub mod adapter;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod events;
pub mod gateway;
pub mod rewrite;
pub mod state;
pub mod status;

pub use adapter::{AdapterRegistry, DraftEvent, PageSnapshot, Platform, PlatformAdapter};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorHandle, TabId};
pub use detection::{Category, ClassificationResult, DetectionEngine, Finding, RiskTier};
pub use events::{CommitRecord, EventsClient};
pub use gateway::Gateway;
pub use rewrite::{RewriteClient, Variant, VariantSource};
pub use state::{Settings, StateStore, UsageCounters};
