//! Secondary indices over loaded entities.
//!
//! Keys are stable entity ids; members are slot offsets in the dependent
//! repository's backing store. Buckets only grow until their map is cleared.

use std::collections::{BTreeSet, HashMap, HashSet};

use common::EntityKind;
use tracing::debug;

use crate::signal::{Signal, Subscription};

pub type Bucket = BTreeSet<usize>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    ArtistAlbums,
    ArtistTracks,
    AlbumTracks,
}

impl Relation {
    pub fn key_kind(self) -> EntityKind {
        match self {
            Relation::ArtistAlbums | Relation::ArtistTracks => EntityKind::Artist,
            Relation::AlbumTracks => EntityKind::Album,
        }
    }

    pub fn member_kind(self) -> EntityKind {
        match self {
            Relation::ArtistAlbums => EntityKind::Album,
            Relation::ArtistTracks | Relation::AlbumTracks => EntityKind::Track,
        }
    }
}

/// Keys whose buckets changed in one update. An empty key set means the
/// whole map changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexChange {
    pub relation: Relation,
    pub keys: HashSet<String>,
}

impl IndexChange {
    pub fn touches(&self, relation: Relation, keys: &HashSet<String>) -> bool {
        self.relation == relation && (self.keys.is_empty() || !self.keys.is_disjoint(keys))
    }
}

pub struct IndexStore {
    artist_albums: HashMap<String, Bucket>,
    artist_tracks: HashMap<String, Bucket>,
    album_tracks: HashMap<String, Bucket>,
    changed: Signal<IndexChange>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self {
            artist_albums: HashMap::new(),
            artist_tracks: HashMap::new(),
            album_tracks: HashMap::new(),
            changed: Signal::new(),
        }
    }

    pub fn subscribe(&self) -> Subscription<IndexChange> {
        self.changed.subscribe()
    }

    /// Seeds empty artist buckets in both artist maps.
    pub fn add_artists<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.artist_albums.entry(id.to_string()).or_default();
            self.artist_tracks.entry(id.to_string()).or_default();
        }
    }

    pub fn add_albums<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.album_tracks.entry(id.to_string()).or_default();
        }
    }

    pub fn update_artist_albums(&mut self, batch: HashMap<String, Vec<usize>>) {
        self.update(Relation::ArtistAlbums, batch);
    }

    pub fn update_artist_tracks(&mut self, batch: HashMap<String, Vec<usize>>) {
        self.update(Relation::ArtistTracks, batch);
    }

    pub fn update_album_tracks(&mut self, batch: HashMap<String, Vec<usize>>) {
        self.update(Relation::AlbumTracks, batch);
    }

    pub fn clear_artist_albums(&mut self) {
        self.clear(Relation::ArtistAlbums);
    }

    pub fn clear_artist_tracks(&mut self) {
        self.clear(Relation::ArtistTracks);
    }

    pub fn clear_album_tracks(&mut self) {
        self.clear(Relation::AlbumTracks);
    }

    pub fn bucket(&self, relation: Relation, key: &str) -> Option<&Bucket> {
        self.map(relation).get(key)
    }

    pub fn contains_key(&self, relation: Relation, key: &str) -> bool {
        self.map(relation).contains_key(key)
    }

    /// Union of the buckets for `keys`, ascending and without duplicates.
    pub fn members<'a>(
        &self,
        relation: Relation,
        keys: impl IntoIterator<Item = &'a String>,
    ) -> Vec<usize> {
        let map = self.map(relation);
        let mut union = Bucket::new();
        for key in keys {
            if let Some(bucket) = map.get(key) {
                union.extend(bucket.iter().copied());
            }
        }
        union.into_iter().collect()
    }

    pub fn key_count(&self, relation: Relation) -> usize {
        self.map(relation).len()
    }

    /// Merges one response worth of memberships and notifies at most once.
    ///
    /// A call that grows no bucket sends nothing rather than a notification
    /// with an empty key set, since an empty set already means the whole map
    /// was cleared. The notification carries only the keys that grew.
    fn update(&mut self, relation: Relation, batch: HashMap<String, Vec<usize>>) {
        let map = self.map_mut(relation);
        let mut keys = HashSet::new();
        for (key, members) in batch {
            let bucket = map.entry(key.clone()).or_default();
            let mut grew = false;
            for member in members {
                grew |= bucket.insert(member);
            }
            if grew {
                keys.insert(key);
            }
        }
        if !keys.is_empty() {
            debug!(?relation, keys = keys.len(), "index buckets updated");
            self.changed.emit(IndexChange { relation, keys });
        }
    }

    fn clear(&mut self, relation: Relation) {
        self.map_mut(relation).clear();
        self.changed.emit(IndexChange {
            relation,
            keys: HashSet::new(),
        });
    }

    fn map(&self, relation: Relation) -> &HashMap<String, Bucket> {
        match relation {
            Relation::ArtistAlbums => &self.artist_albums,
            Relation::ArtistTracks => &self.artist_tracks,
            Relation::AlbumTracks => &self.album_tracks,
        }
    }

    fn map_mut(&mut self, relation: Relation) -> &mut HashMap<String, Bucket> {
        match relation {
            Relation::ArtistAlbums => &mut self.artist_albums,
            Relation::ArtistTracks => &mut self.artist_tracks,
            Relation::AlbumTracks => &mut self.album_tracks,
        }
    }
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}
