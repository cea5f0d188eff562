//! Contracts for the two data sources a repository can be switched between.
//!
//! Requests return immediately; completions come back as [`ProviderEvent`]s
//! which the owner of the catalog feeds in on the catalog's thread.

use std::collections::HashMap;
use std::rc::Rc;

use common::{CoverArt, EntityKind};
use serde::{Deserialize, Serialize};

use crate::entity::EntityBatch;
use crate::error::ProviderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    None,
    Remote,
    Cache,
}

/// One range request. `epoch` is echoed back so responses issued before a
/// provider switch can be recognised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeRequest {
    pub kind: EntityKind,
    pub offset: usize,
    pub limit: usize,
    pub epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtRequest {
    pub kind: EntityKind,
    pub ids: Vec<String>,
    pub epoch: u64,
}

pub type ArtMap = HashMap<String, CoverArt>;

#[derive(Clone, Debug)]
pub enum ProviderEvent {
    Initialized(Result<(), ProviderError>),
    Ready {
        request: RangeRequest,
        result: Result<EntityBatch, ProviderError>,
    },
    ArtsReady {
        source: ProviderKind,
        request: ArtRequest,
        result: Result<ArtMap, ProviderError>,
    },
}

pub trait RemoteProvider {
    /// Connects and fetches the catalog summary; answers with
    /// [`ProviderEvent::Initialized`].
    fn initialize(&self);
    fn request_range(&self, request: RangeRequest);
    fn request_arts(&self, request: ArtRequest);
    /// Total reported by the last successful initialize, 0 before that.
    fn number_of(&self, kind: EntityKind) -> usize;
    /// Unix seconds of the last catalog change on the server.
    fn last_update(&self) -> Option<u64>;
    fn server_url(&self) -> &str;
    fn user(&self) -> &str;
}

/// Identity and freshness of a cache snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub server_url: String,
    pub user: String,
    pub last_update: u64,
}

pub trait CacheProvider {
    fn load_all(&self, kind: EntityKind) -> Result<EntityBatch, ProviderError>;
    fn save_all(&self, batch: &EntityBatch) -> Result<(), ProviderError>;
    /// Answers with [`ProviderEvent::ArtsReady`] on a later turn.
    fn request_arts(&self, request: ArtRequest);
    fn save_arts(&self, arts: &ArtMap) -> Result<(), ProviderError>;
    /// `None` when the snapshot was never committed or was invalidated.
    fn meta(&self) -> Option<CacheMeta>;
    fn commit(&self, meta: &CacheMeta) -> Result<(), ProviderError>;
    fn invalidate(&self) -> Result<(), ProviderError>;

    fn last_update(&self) -> Option<u64> {
        self.meta().map(|meta| meta.last_update)
    }

    fn server_url(&self) -> Option<String> {
        self.meta().map(|meta| meta.server_url)
    }

    fn user(&self) -> Option<String> {
        self.meta().map(|meta| meta.user)
    }
}

/// Both providers, shared by the three repositories.
#[derive(Clone)]
pub struct Providers {
    pub remote: Rc<dyn RemoteProvider>,
    pub cache: Rc<dyn CacheProvider>,
}

impl Providers {
    pub fn new(remote: Rc<dyn RemoteProvider>, cache: Rc<dyn CacheProvider>) -> Self {
        Self { remote, cache }
    }

    /// True when the cache holds a committed snapshot taken from the same
    /// server account the remote is configured for.
    pub fn cache_is_usable(&self) -> bool {
        match self.cache.meta() {
            Some(meta) => {
                meta.last_update > 0
                    && same_server(&meta.server_url, self.remote.server_url())
                    && meta.user == self.remote.user()
            }
            None => false,
        }
    }
}

fn same_server(left: &str, right: &str) -> bool {
    left.trim().trim_end_matches('/').eq_ignore_ascii_case(right.trim().trim_end_matches('/'))
}
