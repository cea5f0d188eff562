//! HTTP implementation of the remote provider.
//!
//! Requests are spawned on a tokio runtime; completions are sent back over a
//! std channel and fed to the catalog by the thread that owns it.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use catalog::{
    AlbumRecord, ArtMap, ArtRequest, ArtistRecord, EntityBatch, ProviderError, ProviderEvent,
    ProviderKind, RangeRequest, RemoteProvider, TrackRecord,
};
use common::{Album, Artist, CoverArt, EntityKind, Track};
use futures_util::{stream, StreamExt};
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;

/// Catalog totals and freshness reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub last_update: u64,
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
}

impl CatalogSummary {
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Artist => self.artists,
            EntityKind::Album => self.albums,
            EntityKind::Track => self.tracks,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug)]
pub enum RemoteError {
    Http(reqwest::Error),
    Status(u16),
    Decode(serde_json::Error),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Http(err) => write!(f, "http error: {}", err),
            RemoteError::Status(code) => write!(f, "http {}", code),
            RemoteError::Decode(err) => write!(f, "decode error: {}", err),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Http(err)
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err)
    }
}

impl From<RemoteError> for ProviderError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Status(code) => ProviderError::Status(code),
            RemoteError::Decode(err) => ProviderError::Malformed(err.to_string()),
            RemoteError::Http(err) if err.is_decode() => ProviderError::Malformed(err.to_string()),
            RemoteError::Http(err) => ProviderError::Unreachable(err.to_string()),
        }
    }
}

/// Shared request context, cheap to clone into spawned tasks.
#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    token: String,
}

impl Endpoint {
    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        if self.token.is_empty() {
            request
        } else {
            request.header(AUTHORIZATION, format!("Bearer {}", self.token))
        }
    }
}

pub struct HttpRemote {
    endpoint: Endpoint,
    user: String,
    art_concurrency: usize,
    runtime: Handle,
    events: Sender<ProviderEvent>,
    summary: Arc<RwLock<Option<CatalogSummary>>>,
}

impl HttpRemote {
    pub fn new(
        config: &ClientConfig,
        runtime: Handle,
        events: Sender<ProviderEvent>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent("catalog-client/0.1")
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            endpoint: Endpoint {
                client,
                base_url: config.server_url.trim_end_matches('/').to_string(),
                token: config.token.trim().to_string(),
            },
            user: config.user.clone(),
            art_concurrency: config.art_concurrency.max(1),
            runtime,
            events,
            summary: Arc::new(RwLock::new(None)),
        })
    }

    pub fn summary(&self) -> Option<CatalogSummary> {
        self.summary.read().clone()
    }
}

impl RemoteProvider for HttpRemote {
    fn initialize(&self) {
        let endpoint = self.endpoint.clone();
        let summary = Arc::clone(&self.summary);
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = match fetch_summary(&endpoint).await {
                Ok(fetched) => {
                    info!(
                        artists = fetched.artists,
                        albums = fetched.albums,
                        tracks = fetched.tracks,
                        last_update = fetched.last_update,
                        "connected to {}",
                        endpoint.base_url
                    );
                    *summary.write() = Some(fetched);
                    Ok(())
                }
                Err(err) => {
                    warn!("failed to reach {}: {}", endpoint.base_url, err);
                    *summary.write() = None;
                    Err(ProviderError::from(err))
                }
            };
            send(&events, ProviderEvent::Initialized(result));
        });
    }

    fn request_range(&self, request: RangeRequest) {
        let endpoint = self.endpoint.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = fetch_range(&endpoint, request)
                .await
                .map_err(ProviderError::from);
            if let Err(err) = &result {
                warn!(kind = %request.kind, offset = request.offset, "range request failed: {}", err);
            }
            send(&events, ProviderEvent::Ready { request, result });
        });
    }

    fn request_arts(&self, request: ArtRequest) {
        let endpoint = self.endpoint.clone();
        let events = self.events.clone();
        let concurrency = self.art_concurrency;
        self.runtime.spawn(async move {
            let result = fetch_arts(&endpoint, request.kind, &request.ids, concurrency)
                .await
                .map_err(ProviderError::from);
            send(
                &events,
                ProviderEvent::ArtsReady {
                    source: ProviderKind::Remote,
                    request,
                    result,
                },
            );
        });
    }

    fn number_of(&self, kind: EntityKind) -> usize {
        self.summary
            .read()
            .as_ref()
            .map(|summary| summary.count(kind))
            .unwrap_or(0)
    }

    fn last_update(&self) -> Option<u64> {
        self.summary.read().as_ref().map(|summary| summary.last_update)
    }

    fn server_url(&self) -> &str {
        &self.endpoint.base_url
    }

    fn user(&self) -> &str {
        &self.user
    }
}

fn send(events: &Sender<ProviderEvent>, event: ProviderEvent) {
    if events.send(event).is_err() {
        debug!("provider event dropped, receiver is gone");
    }
}

async fn fetch_summary(endpoint: &Endpoint) -> Result<CatalogSummary, RemoteError> {
    let response = endpoint.get("/api/v1/catalog").send().await?;
    if !response.status().is_success() {
        return Err(RemoteError::Status(response.status().as_u16()));
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn fetch_range(endpoint: &Endpoint, request: RangeRequest) -> Result<EntityBatch, RemoteError> {
    let path = format!("/api/v1/catalog/{}", request.kind.collection());
    let response = endpoint
        .get(&path)
        .query(&[("offset", request.offset), ("limit", request.limit)])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(RemoteError::Status(response.status().as_u16()));
    }
    let body = response.bytes().await?;
    let batch = match request.kind {
        EntityKind::Artist => {
            let list: ListResponse<Artist> = serde_json::from_slice(&body)?;
            EntityBatch::Artists(list.items.into_iter().map(ArtistRecord::new).collect())
        }
        EntityKind::Album => {
            let list: ListResponse<Album> = serde_json::from_slice(&body)?;
            EntityBatch::Albums(list.items.into_iter().map(AlbumRecord::new).collect())
        }
        EntityKind::Track => {
            let list: ListResponse<Track> = serde_json::from_slice(&body)?;
            EntityBatch::Tracks(list.items.into_iter().map(TrackRecord::new).collect())
        }
    };
    debug!(kind = %request.kind, offset = request.offset, rows = batch.len(), "range received");
    Ok(batch)
}

async fn fetch_arts(
    endpoint: &Endpoint,
    kind: EntityKind,
    ids: &[String],
    concurrency: usize,
) -> Result<ArtMap, RemoteError> {
    let fetched: Vec<Result<Option<(String, CoverArt)>, RemoteError>> = stream::iter(ids.to_vec())
        .map(|id| {
            let endpoint = endpoint.clone();
            async move { fetch_art(&endpoint, kind, &id).await }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    let mut arts = ArtMap::new();
    for entry in fetched {
        if let Some((id, art)) = entry? {
            arts.insert(id, art);
        }
    }
    debug!(%kind, requested = ids.len(), found = arts.len(), "art received");
    Ok(arts)
}

/// `None` when the server has no art for the id.
async fn fetch_art(
    endpoint: &Endpoint,
    kind: EntityKind,
    id: &str,
) -> Result<Option<(String, CoverArt)>, RemoteError> {
    let path = format!("/api/v1/library/{}/{}/cover", kind.collection(), id);
    let response = endpoint.get(&path).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(RemoteError::Status(response.status().as_u16()));
    }
    let mime = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = response.bytes().await?.to_vec();
    Ok(Some((id.to_string(), CoverArt { mime, data })))
}
