//! Demand-driven loading of a remote music catalog.
//!
//! Everything here runs on one thread. Providers answer asynchronously by
//! handing [`ProviderEvent`]s back to whoever owns the [`LoadOrchestrator`]
//! (or a bare [`Catalog`]), which feeds them in and drains the resulting
//! repository signals before returning.

pub mod cache;
pub mod catalog;
pub mod collection;
pub mod entity;
pub mod error;
pub mod filter;
pub mod index;
pub mod orchestrator;
pub mod provider;
pub mod repository;
pub mod scheduler;
pub mod signal;
pub mod window;

#[cfg(test)]
mod testing;

pub use cache::{CacheError, CacheSummary, RedbCache};
pub use catalog::{Catalog, CatalogConfig};
pub use collection::LazyCollection;
pub use entity::{
    AlbumRecord, ArtistRecord, CatalogEntity, EnrichmentPolicy, EntityBatch, EntityLookup,
    Siblings, TrackRecord,
};
pub use error::{CatalogError, ProviderError};
pub use filter::{Filter, FilterView};
pub use index::{IndexChange, IndexStore, Relation};
pub use orchestrator::{LoadOrchestrator, LoadResult, LoadState};
pub use provider::{
    ArtMap, ArtRequest, CacheMeta, CacheProvider, ProviderEvent, ProviderKind, Providers,
    RangeRequest, RemoteProvider,
};
pub use repository::{RepositoryEvent, WindowedRepository};
pub use scheduler::RequestScheduler;
pub use signal::{Signal, Subscription};
pub use window::RequestWindow;
