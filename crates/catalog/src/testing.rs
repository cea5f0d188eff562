//! In-memory providers and record builders for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use common::{Album, Artist, CoverArt, EntityKind, Track};

use crate::entity::{AlbumRecord, ArtistRecord, EntityBatch, TrackRecord};
use crate::error::ProviderError;
use crate::provider::{
    ArtMap, ArtRequest, CacheMeta, CacheProvider, ProviderEvent, ProviderKind, RangeRequest,
    RemoteProvider,
};

pub fn artist(id: &str, name: &str) -> Artist {
    Artist {
        id: id.to_string(),
        name: name.to_string(),
        genres: Vec::new(),
        summary: None,
    }
}

pub fn album(id: &str, artist_id: &str, title: &str) -> Album {
    Album {
        id: id.to_string(),
        artist_id: artist_id.to_string(),
        title: title.to_string(),
        year: None,
        genres: Vec::new(),
        summary: None,
        artist: None,
        art: None,
    }
}

pub fn track(id: &str, album_id: &str, artist_id: &str, title: &str) -> Track {
    Track {
        id: id.to_string(),
        album_id: album_id.to_string(),
        artist_id: artist_id.to_string(),
        title: title.to_string(),
        track_no: None,
        disc_no: None,
        duration_ms: 180_000,
        codec: None,
        genres: Vec::new(),
        artist: None,
        album: None,
    }
}

pub fn art(tag: &str) -> CoverArt {
    CoverArt {
        mime: "image/jpeg".to_string(),
        data: tag.as_bytes().to_vec(),
    }
}

/// A small catalog: `artists` artists with two albums each and two tracks
/// per album.
pub fn sample_catalog(artists: usize) -> (Vec<Artist>, Vec<Album>, Vec<Track>) {
    let mut all_artists = Vec::new();
    let mut all_albums = Vec::new();
    let mut all_tracks = Vec::new();
    for a in 0..artists {
        let artist_id = format!("ar{}", a);
        all_artists.push(artist(&artist_id, &format!("Artist {}", a)));
        for b in 0..2 {
            let album_id = format!("al{}-{}", a, b);
            all_albums.push(album(&album_id, &artist_id, &format!("Album {} {}", a, b)));
            for t in 0..2 {
                all_tracks.push(track(
                    &format!("tr{}-{}-{}", a, b, t),
                    &album_id,
                    &artist_id,
                    &format!("Track {} {} {}", a, b, t),
                ));
            }
        }
    }
    (all_artists, all_albums, all_tracks)
}

pub fn batch_of(
    kind: EntityKind,
    artists: &[Artist],
    albums: &[Album],
    tracks: &[Track],
) -> EntityBatch {
    match kind {
        EntityKind::Artist => {
            EntityBatch::Artists(artists.iter().cloned().map(ArtistRecord::new).collect())
        }
        EntityKind::Album => {
            EntityBatch::Albums(albums.iter().cloned().map(AlbumRecord::new).collect())
        }
        EntityKind::Track => {
            EntityBatch::Tracks(tracks.iter().cloned().map(TrackRecord::new).collect())
        }
    }
}

fn slice(batch: &EntityBatch, offset: usize, limit: usize) -> EntityBatch {
    fn window<T: Clone>(items: &[T], offset: usize, limit: usize) -> Vec<T> {
        items.iter().skip(offset).take(limit).cloned().collect()
    }
    match batch {
        EntityBatch::Artists(items) => EntityBatch::Artists(window(items, offset, limit)),
        EntityBatch::Albums(items) => EntityBatch::Albums(window(items, offset, limit)),
        EntityBatch::Tracks(items) => EntityBatch::Tracks(window(items, offset, limit)),
    }
}

/// Remote that answers every request into an outbox the test drains.
pub struct FakeRemote {
    server_url: String,
    user: String,
    data: RefCell<HashMap<EntityKind, EntityBatch>>,
    reachable: Cell<bool>,
    initialized: Cell<bool>,
    last_update: Cell<Option<u64>>,
    fail_kind: Cell<Option<EntityKind>>,
    hold_ranges: Cell<bool>,
    requests: RefCell<Vec<RangeRequest>>,
    held: RefCell<VecDeque<ProviderEvent>>,
    outbox: RefCell<VecDeque<ProviderEvent>>,
}

impl FakeRemote {
    pub fn new(server_url: &str, user: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
            user: user.to_string(),
            data: RefCell::new(HashMap::new()),
            reachable: Cell::new(true),
            initialized: Cell::new(false),
            last_update: Cell::new(Some(100)),
            fail_kind: Cell::new(None),
            hold_ranges: Cell::new(false),
            requests: RefCell::new(Vec::new()),
            held: RefCell::new(VecDeque::new()),
            outbox: RefCell::new(VecDeque::new()),
        }
    }

    pub fn with_catalog(self, artists: &[Artist], albums: &[Album], tracks: &[Track]) -> Self {
        {
            let mut data = self.data.borrow_mut();
            for kind in EntityKind::ALL {
                data.insert(kind, batch_of(kind, artists, albums, tracks));
            }
        }
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.set(reachable);
    }

    pub fn set_last_update(&self, last_update: Option<u64>) {
        self.last_update.set(last_update);
    }

    pub fn fail_on(&self, kind: EntityKind) {
        self.fail_kind.set(Some(kind));
    }

    /// Keeps range responses back until [`FakeRemote::release`].
    pub fn hold_ranges(&self, hold: bool) {
        self.hold_ranges.set(hold);
    }

    pub fn release(&self) {
        let mut held = self.held.borrow_mut();
        self.outbox.borrow_mut().extend(held.drain(..));
    }

    pub fn requests(&self) -> Vec<RangeRequest> {
        self.requests.borrow().clone()
    }

    pub fn next_event(&self) -> Option<ProviderEvent> {
        self.outbox.borrow_mut().pop_front()
    }

    fn answer(&self, event: ProviderEvent) {
        self.outbox.borrow_mut().push_back(event);
    }
}

impl RemoteProvider for FakeRemote {
    fn initialize(&self) {
        if self.reachable.get() {
            self.initialized.set(true);
            self.answer(ProviderEvent::Initialized(Ok(())));
        } else {
            self.initialized.set(false);
            self.answer(ProviderEvent::Initialized(Err(ProviderError::Unreachable(
                "connection refused".to_string(),
            ))));
        }
    }

    fn request_range(&self, request: RangeRequest) {
        self.requests.borrow_mut().push(request);
        let result = if self.fail_kind.get() == Some(request.kind) {
            Err(ProviderError::Status(500))
        } else {
            let data = self.data.borrow();
            Ok(data
                .get(&request.kind)
                .map(|batch| slice(batch, request.offset, request.limit))
                .unwrap_or_else(|| EntityBatch::empty(request.kind)))
        };
        let event = ProviderEvent::Ready { request, result };
        if self.hold_ranges.get() {
            self.held.borrow_mut().push_back(event);
        } else {
            self.answer(event);
        }
    }

    fn request_arts(&self, request: ArtRequest) {
        let arts: ArtMap = request.ids.iter().map(|id| (id.clone(), art(id))).collect();
        self.answer(ProviderEvent::ArtsReady {
            source: ProviderKind::Remote,
            request,
            result: Ok(arts),
        });
    }

    fn number_of(&self, kind: EntityKind) -> usize {
        if !self.initialized.get() {
            return 0;
        }
        self.data.borrow().get(&kind).map(EntityBatch::len).unwrap_or(0)
    }

    fn last_update(&self) -> Option<u64> {
        if self.initialized.get() {
            self.last_update.get()
        } else {
            None
        }
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }

    fn user(&self) -> &str {
        &self.user
    }
}

#[derive(Default)]
pub struct MemoryCache {
    meta: RefCell<Option<CacheMeta>>,
    rows: RefCell<HashMap<EntityKind, EntityBatch>>,
    arts: RefCell<ArtMap>,
    outbox: RefCell<VecDeque<ProviderEvent>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(
        meta: CacheMeta,
        artists: &[Artist],
        albums: &[Album],
        tracks: &[Track],
    ) -> Self {
        let cache = Self::new();
        for kind in EntityKind::ALL {
            cache
                .rows
                .borrow_mut()
                .insert(kind, batch_of(kind, artists, albums, tracks));
        }
        *cache.meta.borrow_mut() = Some(meta);
        cache
    }

    pub fn stored_len(&self, kind: EntityKind) -> usize {
        self.rows.borrow().get(&kind).map(EntityBatch::len).unwrap_or(0)
    }

    pub fn stored_arts(&self) -> usize {
        self.arts.borrow().len()
    }

    pub fn next_event(&self) -> Option<ProviderEvent> {
        self.outbox.borrow_mut().pop_front()
    }
}

impl CacheProvider for MemoryCache {
    fn load_all(&self, kind: EntityKind) -> Result<EntityBatch, ProviderError> {
        Ok(self
            .rows
            .borrow()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| EntityBatch::empty(kind)))
    }

    fn save_all(&self, batch: &EntityBatch) -> Result<(), ProviderError> {
        self.rows.borrow_mut().insert(batch.kind(), batch.clone());
        Ok(())
    }

    fn request_arts(&self, request: ArtRequest) {
        let stored = self.arts.borrow();
        let arts: ArtMap = request
            .ids
            .iter()
            .filter_map(|id| stored.get(id).map(|art| (id.clone(), art.clone())))
            .collect();
        self.outbox.borrow_mut().push_back(ProviderEvent::ArtsReady {
            source: ProviderKind::Cache,
            request,
            result: Ok(arts),
        });
    }

    fn save_arts(&self, arts: &ArtMap) -> Result<(), ProviderError> {
        self.arts
            .borrow_mut()
            .extend(arts.iter().map(|(id, art)| (id.clone(), art.clone())));
        Ok(())
    }

    fn meta(&self) -> Option<CacheMeta> {
        self.meta.borrow().clone()
    }

    fn commit(&self, meta: &CacheMeta) -> Result<(), ProviderError> {
        *self.meta.borrow_mut() = Some(meta.clone());
        Ok(())
    }

    fn invalidate(&self) -> Result<(), ProviderError> {
        *self.meta.borrow_mut() = None;
        self.rows.borrow_mut().clear();
        self.arts.borrow_mut().clear();
        Ok(())
    }
}
