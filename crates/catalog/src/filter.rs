//! Ordered projections over a repository's backing store.
//!
//! Views hold slot offsets, never records, so they stay valid for as long as
//! the store is not cleared, and the repository re-applies them when it is.

use std::collections::HashSet;

use common::EntityKind;

use crate::entity::CatalogEntity;
use crate::index::{IndexStore, Relation};
use crate::signal::Subscription;
use crate::index::IndexChange;

/// What a consumer asks to filter by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Case-insensitive substring of the record name.
    Name(String),
    /// Members of the index buckets of `keys`.
    Related {
        relation: Relation,
        keys: HashSet<String>,
    },
}

impl Filter {
    pub fn name(needle: impl Into<String>) -> Self {
        Filter::Name(needle.into())
    }

    pub fn albums_of_artists<I, S>(artist_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::related(Relation::ArtistAlbums, artist_ids)
    }

    pub fn tracks_of_artists<I, S>(artist_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::related(Relation::ArtistTracks, artist_ids)
    }

    pub fn tracks_of_albums<I, S>(album_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::related(Relation::AlbumTracks, album_ids)
    }

    fn related<I, S>(relation: Relation, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Related {
            relation,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Entity kind the filter can be applied to; `None` for any kind.
    pub fn target_kind(&self) -> Option<EntityKind> {
        match self {
            Filter::Name(_) => None,
            Filter::Related { relation, .. } => Some(relation.member_kind()),
        }
    }

    pub(crate) fn into_view<E: CatalogEntity + 'static>(
        self,
        index: &IndexStore,
    ) -> Box<dyn FilterView<E>> {
        match self {
            Filter::Name(needle) => Box::new(NameFilter::new(&needle)),
            Filter::Related { relation, keys } => {
                Box::new(RelationFilter::new(relation, keys, index))
            }
        }
    }
}

pub trait FilterView<E: CatalogEntity> {
    /// Recomputes the whole sequence from the store.
    fn apply(&mut self, store: &[Option<E>], index: &IndexStore);

    /// Slots `[offset, offset + len)` were just filled. Returns true when the
    /// sequence changed as a result.
    fn process_updated_source_data(
        &mut self,
        store: &[Option<E>],
        index: &IndexStore,
        offset: usize,
        len: usize,
    ) -> bool;

    /// Consumes pending index notifications. Returns true when the sequence
    /// was rebuilt because of them.
    fn sync(&mut self, _store: &[Option<E>], _index: &IndexStore) -> bool {
        false
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot offset behind a filtered position.
    fn source_offset(&self, filtered: usize) -> Option<usize>;
}

/// Identity projection over every slot, loaded or not.
#[derive(Debug, Default)]
pub struct UnfilteredView {
    len: usize,
}

impl<E: CatalogEntity> FilterView<E> for UnfilteredView {
    fn apply(&mut self, store: &[Option<E>], _index: &IndexStore) {
        self.len = store.len();
    }

    fn process_updated_source_data(
        &mut self,
        store: &[Option<E>],
        _index: &IndexStore,
        offset: usize,
        len: usize,
    ) -> bool {
        self.len = self.len.max(offset + len).min(store.len());
        false
    }

    fn len(&self) -> usize {
        self.len
    }

    fn source_offset(&self, filtered: usize) -> Option<usize> {
        (filtered < self.len).then_some(filtered)
    }
}

#[derive(Debug)]
pub struct NameFilter {
    needle: String,
    entries: Vec<usize>,
}

impl NameFilter {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.trim().to_lowercase(),
            entries: Vec::new(),
        }
    }

    fn scan<E: CatalogEntity>(&self, store: &[Option<E>]) -> Vec<usize> {
        store
            .iter()
            .enumerate()
            .filter_map(|(offset, slot)| {
                let record = slot.as_ref()?;
                record
                    .name()
                    .to_lowercase()
                    .contains(&self.needle)
                    .then_some(offset)
            })
            .collect()
    }
}

impl<E: CatalogEntity> FilterView<E> for NameFilter {
    fn apply(&mut self, store: &[Option<E>], _index: &IndexStore) {
        self.entries = self.scan(store);
    }

    fn process_updated_source_data(
        &mut self,
        store: &[Option<E>],
        _index: &IndexStore,
        _offset: usize,
        _len: usize,
    ) -> bool {
        let entries = self.scan(store);
        let changed = entries != self.entries;
        self.entries = entries;
        changed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn source_offset(&self, filtered: usize) -> Option<usize> {
        self.entries.get(filtered).copied()
    }
}

/// Members of one relation for a fixed key set, kept current by index
/// notifications.
pub struct RelationFilter {
    relation: Relation,
    keys: HashSet<String>,
    entries: Vec<usize>,
    changes: Subscription<IndexChange>,
}

impl RelationFilter {
    pub fn new(relation: Relation, keys: HashSet<String>, index: &IndexStore) -> Self {
        Self {
            relation,
            keys,
            entries: Vec::new(),
            changes: index.subscribe(),
        }
    }

    fn rebuild<E: CatalogEntity>(&mut self, store: &[Option<E>], index: &IndexStore) {
        self.entries = index
            .members(self.relation, &self.keys)
            .into_iter()
            .filter(|offset| matches!(store.get(*offset), Some(Some(_))))
            .collect();
    }
}

impl<E: CatalogEntity> FilterView<E> for RelationFilter {
    fn apply(&mut self, store: &[Option<E>], index: &IndexStore) {
        // Anything queued so far is already reflected by a full rebuild.
        self.changes.drain();
        self.rebuild(store, index);
    }

    fn process_updated_source_data(
        &mut self,
        _store: &[Option<E>],
        _index: &IndexStore,
        _offset: usize,
        _len: usize,
    ) -> bool {
        false
    }

    fn sync(&mut self, store: &[Option<E>], index: &IndexStore) -> bool {
        let touched = self
            .changes
            .drain()
            .iter()
            .any(|change| change.touches(self.relation, &self.keys));
        if touched {
            self.rebuild(store, index);
        }
        touched
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn source_offset(&self, filtered: usize) -> Option<usize> {
        self.entries.get(filtered).copied()
    }
}
