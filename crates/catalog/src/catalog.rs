use common::EntityKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::LazyCollection;
use crate::entity::{AlbumRecord, ArtistRecord, NoLookup, Siblings, TrackRecord};
use crate::error::CatalogError;
use crate::filter::Filter;
use crate::index::IndexStore;
use crate::provider::{ProviderEvent, ProviderKind, Providers};
use crate::repository::{RepositoryEvent, WindowedRepository};
use crate::signal::Subscription;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Largest range a single load may request.
    pub granularity: usize,
    /// Load missing ranges without waiting for consumers to touch them.
    pub background_fill: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            granularity: 50,
            background_fill: true,
        }
    }
}

/// The three collections, the index they share and the plumbing that feeds
/// provider completions into them.
pub struct Catalog {
    providers: Providers,
    config: CatalogConfig,
    index: IndexStore,
    artists: LazyCollection<ArtistRecord>,
    albums: LazyCollection<AlbumRecord>,
    tracks: LazyCollection<TrackRecord>,
}

impl Catalog {
    pub fn new(providers: Providers, config: CatalogConfig) -> Self {
        Self {
            artists: LazyCollection::new(providers.clone(), &config),
            albums: LazyCollection::new(providers.clone(), &config),
            tracks: LazyCollection::new(providers.clone(), &config),
            index: IndexStore::new(),
            providers,
            config,
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn artists(&self) -> &WindowedRepository<ArtistRecord> {
        self.artists.repository()
    }

    pub fn albums(&self) -> &WindowedRepository<AlbumRecord> {
        self.albums.repository()
    }

    pub fn tracks(&self) -> &WindowedRepository<TrackRecord> {
        self.tracks.repository()
    }

    pub fn subscribe(&self, kind: EntityKind) -> Subscription<RepositoryEvent> {
        match kind {
            EntityKind::Artist => self.artists.repository().subscribe(),
            EntityKind::Album => self.albums.repository().subscribe(),
            EntityKind::Track => self.tracks.repository().subscribe(),
        }
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Artist => self.artists().count(),
            EntityKind::Album => self.albums().count(),
            EntityKind::Track => self.tracks().count(),
        }
    }

    pub fn touch(&mut self, kind: EntityKind, position: usize) {
        match kind {
            EntityKind::Artist => self.artists.touch(position),
            EntityKind::Album => self.albums.touch(position),
            EntityKind::Track => self.tracks.touch(position),
        }
        self.pump();
    }

    pub fn set_provider_type(&mut self, kind: EntityKind, provider: ProviderKind) {
        let index = &mut self.index;
        match kind {
            EntityKind::Artist => self.artists.repository_mut().set_provider_type(provider, index),
            EntityKind::Album => self.albums.repository_mut().set_provider_type(provider, index),
            EntityKind::Track => self.tracks.repository_mut().set_provider_type(provider, index),
        }
        self.pump();
    }

    pub fn set_filter(&mut self, kind: EntityKind, filter: Filter) -> Result<(), CatalogError> {
        let index = &self.index;
        match kind {
            EntityKind::Artist => self.artists.repository_mut().set_filter(filter, index),
            EntityKind::Album => self.albums.repository_mut().set_filter(filter, index),
            EntityKind::Track => self.tracks.repository_mut().set_filter(filter, index),
        }
    }

    pub fn unset_filter(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Artist => self.artists.repository_mut().unset_filter(),
            EntityKind::Album => self.albums.repository_mut().unset_filter(),
            EntityKind::Track => self.tracks.repository_mut().unset_filter(),
        }
    }

    pub fn disable_loading(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Artist => self.artists.repository_mut().disable_loading(),
            EntityKind::Album => self.albums.repository_mut().disable_loading(),
            EntityKind::Track => self.tracks.repository_mut().disable_loading(),
        }
        self.pump();
    }

    pub fn load_arts(&mut self, kind: EntityKind) -> bool {
        let started = match kind {
            EntityKind::Artist => self.artists.repository_mut().load_arts(),
            EntityKind::Album => self.albums.repository_mut().load_arts(),
            EntityKind::Track => self.tracks.repository_mut().load_arts(),
        };
        self.pump();
        started
    }

    /// Routes a range or art completion to the repository it belongs to.
    pub fn handle_provider_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::Ready { request, result } => {
                let index = &mut self.index;
                match request.kind {
                    EntityKind::Artist => self.artists.repository_mut().handle_ready(
                        request,
                        result,
                        index,
                        &Siblings::none(),
                    ),
                    EntityKind::Album => {
                        let siblings = Siblings {
                            artists: self.artists.repository(),
                            albums: &NoLookup,
                        };
                        self.albums
                            .repository_mut()
                            .handle_ready(request, result, index, &siblings)
                    }
                    EntityKind::Track => {
                        let siblings = Siblings {
                            artists: self.artists.repository(),
                            albums: self.albums.repository(),
                        };
                        self.tracks
                            .repository_mut()
                            .handle_ready(request, result, index, &siblings)
                    }
                }
            }
            ProviderEvent::ArtsReady {
                source,
                request,
                result,
            } => match request.kind {
                EntityKind::Artist => self.artists.repository_mut().handle_arts(source, request, result),
                EntityKind::Album => self.albums.repository_mut().handle_arts(source, request, result),
                EntityKind::Track => self.tracks.repository_mut().handle_arts(source, request, result),
            },
            ProviderEvent::Initialized(_) => {
                debug!("initialize completion ignored by catalog");
            }
        }
        self.pump();
    }

    /// Delivers staged cache loads and lets every collection react, until
    /// nothing new was staged.
    pub fn pump(&mut self) {
        loop {
            let index = &mut self.index;
            self.artists
                .repository_mut()
                .deliver_staged(index, &Siblings::none());
            let siblings = Siblings {
                artists: self.artists.repository(),
                albums: &NoLookup,
            };
            self.albums.repository_mut().deliver_staged(index, &siblings);
            let siblings = Siblings {
                artists: self.artists.repository(),
                albums: self.albums.repository(),
            };
            self.tracks.repository_mut().deliver_staged(index, &siblings);

            self.artists.process();
            self.albums.process();
            self.tracks.process();

            if !self.has_staged() {
                break;
            }
        }
    }

    fn has_staged(&self) -> bool {
        self.artists().has_staged() || self.albums().has_staged() || self.tracks().has_staged()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use common::EntityKind;

    use super::{Catalog, CatalogConfig};
    use crate::filter::Filter;
    use crate::provider::{CacheMeta, ProviderKind, Providers, RemoteProvider};
    use crate::repository::RepositoryEvent;
    use crate::testing::{sample_catalog, FakeRemote, MemoryCache};

    fn drain(catalog: &mut Catalog, remote: &FakeRemote) {
        while let Some(event) = remote.next_event() {
            catalog.handle_provider_event(event);
        }
    }

    #[test]
    fn tracks_loaded_after_their_parents_carry_back_references() {
        let (a, b, t) = sample_catalog(2);
        let remote = Rc::new(FakeRemote::new("http://music.local", "alice").with_catalog(&a, &b, &t));
        remote.initialize();
        remote.next_event();
        let mut catalog = Catalog::new(
            Providers::new(remote.clone(), Rc::new(MemoryCache::new())),
            CatalogConfig::default(),
        );
        for kind in EntityKind::ALL {
            catalog.set_provider_type(kind, ProviderKind::Remote);
            drain(&mut catalog, &remote);
        }

        assert_eq!(catalog.count(EntityKind::Track), 8);
        let track = catalog.tracks().get_by_id("tr1-1-0").unwrap();
        assert_eq!(track.artist.as_ref().unwrap().name, "Artist 1");
        assert_eq!(track.album.as_ref().unwrap().title, "Album 1 1");
    }

    #[test]
    fn cache_provider_populates_without_any_remote_traffic() {
        let (a, b, t) = sample_catalog(5);
        let meta = CacheMeta {
            server_url: "http://music.local".to_string(),
            user: "alice".to_string(),
            last_update: 9,
        };
        let remote = Rc::new(FakeRemote::new("http://music.local", "alice"));
        let cache = Rc::new(MemoryCache::with_snapshot(meta, &a, &b, &t));
        let config = CatalogConfig {
            granularity: 3,
            background_fill: true,
        };
        let mut catalog = Catalog::new(Providers::new(remote.clone(), cache), config);
        let events = catalog.subscribe(EntityKind::Album);
        catalog.set_provider_type(EntityKind::Album, ProviderKind::Cache);

        assert!(catalog.albums().is_fully_loaded());
        assert_eq!(catalog.albums().loaded_count(), 10);
        assert!(remote.requests().is_empty());
        assert_eq!(remote.number_of(EntityKind::Album), 0);
        assert!(events
            .drain()
            .contains(&RepositoryEvent::FullyLoaded { error: false }));
    }

    #[test]
    fn relation_filter_through_catalog_follows_the_index() {
        let (a, b, t) = sample_catalog(3);
        let remote = Rc::new(FakeRemote::new("http://music.local", "alice").with_catalog(&a, &b, &t));
        remote.initialize();
        remote.next_event();
        let mut catalog = Catalog::new(
            Providers::new(remote.clone(), Rc::new(MemoryCache::new())),
            CatalogConfig::default(),
        );
        catalog
            .set_filter(EntityKind::Album, Filter::albums_of_artists(["ar2"]))
            .unwrap();
        catalog.set_provider_type(EntityKind::Album, ProviderKind::Remote);
        assert_eq!(catalog.count(EntityKind::Album), 0);
        drain(&mut catalog, &remote);
        assert_eq!(catalog.count(EntityKind::Album), 2);
        assert_eq!(catalog.albums().get(1).unwrap().id, "al2-1");

        catalog.unset_filter(EntityKind::Album);
        assert_eq!(catalog.count(EntityKind::Album), 6);
        assert!(catalog
            .set_filter(EntityKind::Artist, Filter::tracks_of_albums(["al0-0"]))
            .is_err());
    }

    #[test]
    fn touch_without_background_fill_loads_only_what_was_asked() {
        let (a, b, t) = sample_catalog(10);
        let remote = Rc::new(FakeRemote::new("http://music.local", "alice").with_catalog(&a, &b, &t));
        remote.initialize();
        remote.next_event();
        let config = CatalogConfig {
            granularity: 4,
            background_fill: false,
        };
        let mut catalog = Catalog::new(
            Providers::new(remote.clone(), Rc::new(MemoryCache::new())),
            config,
        );
        catalog.set_provider_type(EntityKind::Track, ProviderKind::Remote);
        for position in 7..10 {
            catalog.touch(EntityKind::Track, position);
        }
        drain(&mut catalog, &remote);
        assert_eq!(catalog.tracks().loaded_count(), 3);
        assert!(catalog.tracks().is_loaded(7, 3));
        assert!(!catalog.tracks().is_loaded(6, 1));
    }
}
