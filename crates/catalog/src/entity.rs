//! Provider records and the per-kind policies applied when they load.

use std::collections::HashMap;

use common::{Album, AlbumRef, Artist, ArtistRef, CoverArt, EntityKind, Track};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::index::IndexStore;

/// Read access to already loaded objects of another repository.
pub trait EntityLookup<T> {
    fn lookup(&self, id: &str) -> Option<&T>;
}

pub struct NoLookup;

impl<T> EntityLookup<T> for NoLookup {
    fn lookup(&self, _id: &str) -> Option<&T> {
        None
    }
}

/// Sibling repositories available to enrichment.
pub struct Siblings<'a> {
    pub artists: &'a dyn EntityLookup<Artist>,
    pub albums: &'a dyn EntityLookup<Album>,
}

impl Siblings<'static> {
    pub fn none() -> Self {
        Self {
            artists: &NoLookup,
            albums: &NoLookup,
        }
    }
}

/// Per-kind behaviour the generic repository delegates to.
pub trait EnrichmentPolicy: Sized {
    /// Fills back-references from sibling repositories. Called once per
    /// record, before it is stored.
    fn enrich(&mut self, siblings: &Siblings<'_>);

    /// Records one response worth of memberships. `loaded` pairs each record
    /// with its slot offset.
    fn update_index(loaded: &[(usize, &Self)], index: &mut IndexStore);

    /// Wipes the index maps this kind owns.
    fn clear_index(index: &mut IndexStore);
}

pub trait CatalogEntity: EnrichmentPolicy + Clone {
    type Object;
    const KIND: EntityKind;
    const HAS_ART: bool = false;

    fn id(&self) -> &str;
    /// Text matched by name filters.
    fn name(&self) -> &str;
    fn object(&self) -> &Self::Object;
    fn set_art(&mut self, _art: CoverArt) {}
    fn validate(&self) -> Result<(), ProviderError>;
    fn from_batch(batch: EntityBatch) -> Result<Vec<Self>, ProviderError>;
    fn into_batch(records: Vec<Self>) -> EntityBatch;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntityBatch {
    Artists(Vec<ArtistRecord>),
    Albums(Vec<AlbumRecord>),
    Tracks(Vec<TrackRecord>),
}

impl EntityBatch {
    pub fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Artist => EntityBatch::Artists(Vec::new()),
            EntityKind::Album => EntityBatch::Albums(Vec::new()),
            EntityKind::Track => EntityBatch::Tracks(Vec::new()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityBatch::Artists(_) => EntityKind::Artist,
            EntityBatch::Albums(_) => EntityKind::Album,
            EntityBatch::Tracks(_) => EntityKind::Track,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntityBatch::Artists(items) => items.len(),
            EntityBatch::Albums(items) => items.len(),
            EntityBatch::Tracks(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn kind_mismatch(expected: EntityKind, batch: &EntityBatch) -> ProviderError {
    ProviderError::Malformed(format!(
        "expected {} but provider sent {}",
        expected,
        batch.kind()
    ))
}

fn require(value: &str, field: &str, kind: EntityKind) -> Result<(), ProviderError> {
    if value.trim().is_empty() {
        Err(ProviderError::Malformed(format!("{} record without {}", kind, field)))
    } else {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtistRecord {
    artist: Artist,
}

impl ArtistRecord {
    pub fn new(artist: Artist) -> Self {
        Self { artist }
    }
}

impl From<Artist> for ArtistRecord {
    fn from(artist: Artist) -> Self {
        Self::new(artist)
    }
}

impl EnrichmentPolicy for ArtistRecord {
    fn enrich(&mut self, _siblings: &Siblings<'_>) {}

    fn update_index(loaded: &[(usize, &Self)], index: &mut IndexStore) {
        index.add_artists(loaded.iter().map(|(_, record)| record.artist.id.as_str()));
    }

    fn clear_index(_index: &mut IndexStore) {}
}

impl CatalogEntity for ArtistRecord {
    type Object = Artist;
    const KIND: EntityKind = EntityKind::Artist;

    fn id(&self) -> &str {
        &self.artist.id
    }

    fn name(&self) -> &str {
        &self.artist.name
    }

    fn object(&self) -> &Artist {
        &self.artist
    }

    fn validate(&self) -> Result<(), ProviderError> {
        require(&self.artist.id, "id", Self::KIND)
    }

    fn from_batch(batch: EntityBatch) -> Result<Vec<Self>, ProviderError> {
        match batch {
            EntityBatch::Artists(items) => Ok(items),
            other => Err(kind_mismatch(Self::KIND, &other)),
        }
    }

    fn into_batch(records: Vec<Self>) -> EntityBatch {
        EntityBatch::Artists(records)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecord {
    artist_id: String,
    album: Album,
}

impl AlbumRecord {
    pub fn new(album: Album) -> Self {
        Self {
            artist_id: album.artist_id.clone(),
            album,
        }
    }

    pub fn artist_id(&self) -> &str {
        &self.artist_id
    }
}

impl From<Album> for AlbumRecord {
    fn from(album: Album) -> Self {
        Self::new(album)
    }
}

impl EnrichmentPolicy for AlbumRecord {
    fn enrich(&mut self, siblings: &Siblings<'_>) {
        if let Some(artist) = siblings.artists.lookup(&self.artist_id) {
            self.album.artist = Some(ArtistRef {
                id: artist.id.clone(),
                name: artist.name.clone(),
            });
        }
    }

    fn update_index(loaded: &[(usize, &Self)], index: &mut IndexStore) {
        index.add_albums(loaded.iter().map(|(_, record)| record.album.id.as_str()));
        let mut by_artist: HashMap<String, Vec<usize>> = HashMap::new();
        for (offset, record) in loaded {
            by_artist
                .entry(record.artist_id.clone())
                .or_default()
                .push(*offset);
        }
        index.update_artist_albums(by_artist);
    }

    fn clear_index(index: &mut IndexStore) {
        index.clear_artist_albums();
    }
}

impl CatalogEntity for AlbumRecord {
    type Object = Album;
    const KIND: EntityKind = EntityKind::Album;
    const HAS_ART: bool = true;

    fn id(&self) -> &str {
        &self.album.id
    }

    fn name(&self) -> &str {
        &self.album.title
    }

    fn object(&self) -> &Album {
        &self.album
    }

    fn set_art(&mut self, art: CoverArt) {
        self.album.art = Some(art);
    }

    fn validate(&self) -> Result<(), ProviderError> {
        require(&self.album.id, "id", Self::KIND)?;
        require(&self.artist_id, "artist id", Self::KIND)
    }

    fn from_batch(batch: EntityBatch) -> Result<Vec<Self>, ProviderError> {
        match batch {
            EntityBatch::Albums(items) => Ok(items),
            other => Err(kind_mismatch(Self::KIND, &other)),
        }
    }

    fn into_batch(records: Vec<Self>) -> EntityBatch {
        EntityBatch::Albums(records)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    artist_id: String,
    album_id: String,
    track: Track,
}

impl TrackRecord {
    pub fn new(track: Track) -> Self {
        Self {
            artist_id: track.artist_id.clone(),
            album_id: track.album_id.clone(),
            track,
        }
    }

    pub fn artist_id(&self) -> &str {
        &self.artist_id
    }

    pub fn album_id(&self) -> &str {
        &self.album_id
    }
}

impl From<Track> for TrackRecord {
    fn from(track: Track) -> Self {
        Self::new(track)
    }
}

impl EnrichmentPolicy for TrackRecord {
    fn enrich(&mut self, siblings: &Siblings<'_>) {
        if let Some(artist) = siblings.artists.lookup(&self.artist_id) {
            self.track.artist = Some(ArtistRef {
                id: artist.id.clone(),
                name: artist.name.clone(),
            });
        }
        if let Some(album) = siblings.albums.lookup(&self.album_id) {
            self.track.album = Some(AlbumRef {
                id: album.id.clone(),
                title: album.title.clone(),
            });
        }
    }

    fn update_index(loaded: &[(usize, &Self)], index: &mut IndexStore) {
        let mut by_artist: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_album: HashMap<String, Vec<usize>> = HashMap::new();
        for (offset, record) in loaded {
            by_artist
                .entry(record.artist_id.clone())
                .or_default()
                .push(*offset);
            by_album
                .entry(record.album_id.clone())
                .or_default()
                .push(*offset);
        }
        index.update_artist_tracks(by_artist);
        index.update_album_tracks(by_album);
    }

    fn clear_index(index: &mut IndexStore) {
        index.clear_artist_tracks();
        index.clear_album_tracks();
    }
}

impl CatalogEntity for TrackRecord {
    type Object = Track;
    const KIND: EntityKind = EntityKind::Track;

    fn id(&self) -> &str {
        &self.track.id
    }

    fn name(&self) -> &str {
        &self.track.title
    }

    fn object(&self) -> &Track {
        &self.track
    }

    fn validate(&self) -> Result<(), ProviderError> {
        require(&self.track.id, "id", Self::KIND)?;
        require(&self.artist_id, "artist id", Self::KIND)?;
        require(&self.album_id, "album id", Self::KIND)
    }

    fn from_batch(batch: EntityBatch) -> Result<Vec<Self>, ProviderError> {
        match batch {
            EntityBatch::Tracks(items) => Ok(items),
            other => Err(kind_mismatch(Self::KIND, &other)),
        }
    }

    fn into_batch(records: Vec<Self>) -> EntityBatch {
        EntityBatch::Tracks(records)
    }
}
