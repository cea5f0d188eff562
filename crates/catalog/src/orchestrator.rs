//! Full population of the catalog, artists first, then albums and their art,
//! then tracks, against whichever provider is fresher.

use std::time::{SystemTime, UNIX_EPOCH};

use common::EntityKind;
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogConfig};
use crate::error::ProviderError;
use crate::provider::{CacheMeta, ProviderEvent, ProviderKind, Providers};
use crate::repository::RepositoryEvent;
use crate::signal::{Signal, Subscription};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Aborting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadResult {
    Success,
    /// The cache was used because the server could not be reached.
    SuccessNoConnection,
    NoConnectionNoCache,
    Error,
    Aborted,
}

impl LoadResult {
    /// Notification text for the shell.
    pub fn message(self) -> &'static str {
        match self {
            LoadResult::Success => "Catalog loaded.",
            LoadResult::SuccessNoConnection => {
                "Server unreachable, showing the catalog from the local cache."
            }
            LoadResult::NoConnectionNoCache => {
                "Server unreachable and no usable local cache is available."
            }
            LoadResult::Error => "The server sent data that could not be loaded.",
            LoadResult::Aborted => "Catalog loading was cancelled.",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, LoadResult::Success | LoadResult::SuccessNoConnection)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Completion {
    init: bool,
    artists: bool,
    albums: bool,
    arts: bool,
    tracks: bool,
}

impl Completion {
    fn all(&self) -> bool {
        self.init && self.artists && self.albums && self.arts && self.tracks
    }
}

pub struct LoadOrchestrator {
    catalog: Catalog,
    state: LoadState,
    done: Completion,
    source: ProviderKind,
    connection_failed: bool,
    /// Set once `Aborted` was reported from `Idle`, cleared by `load()`.
    abort_reported: bool,
    artist_events: Subscription<RepositoryEvent>,
    album_events: Subscription<RepositoryEvent>,
    track_events: Subscription<RepositoryEvent>,
    finished: Signal<LoadResult>,
}

impl LoadOrchestrator {
    pub fn new(providers: Providers, config: CatalogConfig) -> Self {
        let catalog = Catalog::new(providers, config);
        Self {
            artist_events: catalog.subscribe(EntityKind::Artist),
            album_events: catalog.subscribe(EntityKind::Album),
            track_events: catalog.subscribe(EntityKind::Track),
            catalog,
            state: LoadState::Idle,
            done: Completion::default(),
            source: ProviderKind::None,
            connection_failed: false,
            abort_reported: false,
            finished: Signal::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Receives the terminal result of every load.
    pub fn subscribe(&self) -> Subscription<LoadResult> {
        self.finished.subscribe()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Provider chosen by the current or last load.
    pub fn source(&self) -> ProviderKind {
        self.source
    }

    pub fn is_loading_in_progress(&self) -> bool {
        self.state != LoadState::Idle
    }

    /// Starts a full load. Returns false when one is already running.
    pub fn load(&mut self) -> bool {
        if self.state != LoadState::Idle {
            return false;
        }
        info!("catalog load started");
        self.state = LoadState::Loading;
        self.done = Completion::default();
        self.source = ProviderKind::None;
        self.connection_failed = false;
        self.abort_reported = false;
        for kind in EntityKind::ALL {
            self.catalog.set_provider_type(kind, ProviderKind::None);
        }
        self.artist_events.drain();
        self.album_events.drain();
        self.track_events.drain();
        self.catalog.providers().remote.initialize();
        true
    }

    pub fn abort(&mut self) {
        match self.state {
            LoadState::Idle => {
                if !self.abort_reported {
                    self.abort_reported = true;
                    self.finished.emit(LoadResult::Aborted);
                }
            }
            LoadState::Loading => {
                info!("catalog load aborting");
                self.state = LoadState::Aborting;
                for kind in EntityKind::ALL {
                    self.catalog.disable_loading(kind);
                }
                self.settle();
            }
            LoadState::Aborting => {}
        }
    }

    /// Feeds one provider completion through the catalog and advances the
    /// load accordingly.
    pub fn handle_provider_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::Initialized(result) => self.on_initialized(result),
            other => self.catalog.handle_provider_event(other),
        }
        self.settle();
    }

    fn on_initialized(&mut self, result: Result<(), ProviderError>) {
        match self.state {
            LoadState::Idle => return,
            LoadState::Aborting => {
                self.done.init = true;
                return;
            }
            LoadState::Loading => self.done.init = true,
        }

        let providers = self.catalog.providers().clone();
        let cache_usable = providers.cache_is_usable();
        let source = match result {
            Err(err) => {
                warn!("remote initialization failed: {}", err);
                if !cache_usable {
                    self.finish(LoadResult::NoConnectionNoCache);
                    return;
                }
                self.connection_failed = true;
                ProviderKind::Cache
            }
            Ok(()) => {
                let remote_update = providers.remote.last_update();
                let cache_update = providers.cache.last_update().unwrap_or(0);
                match remote_update {
                    Some(remote_update) if cache_usable && cache_update >= remote_update => {
                        ProviderKind::Cache
                    }
                    _ => ProviderKind::Remote,
                }
            }
        };

        if source == ProviderKind::Remote {
            if let Err(err) = providers.cache.invalidate() {
                warn!("failed to invalidate cache: {}", err);
            }
        }
        info!(provider = ?source, "catalog source selected");
        self.source = source;
        self.catalog.set_provider_type(EntityKind::Artist, source);
    }

    /// Drains repository events until the catalog is quiet.
    fn settle(&mut self) {
        loop {
            let mut events: Vec<(EntityKind, RepositoryEvent)> = Vec::new();
            events.extend(self.artist_events.drain().into_iter().map(|e| (EntityKind::Artist, e)));
            events.extend(self.album_events.drain().into_iter().map(|e| (EntityKind::Album, e)));
            events.extend(self.track_events.drain().into_iter().map(|e| (EntityKind::Track, e)));
            if events.is_empty() {
                break;
            }
            for (kind, event) in events {
                self.on_repository_event(kind, event);
            }
        }
        self.possibly_finish();
    }

    fn on_repository_event(&mut self, kind: EntityKind, event: RepositoryEvent) {
        match self.state {
            LoadState::Idle => {}
            LoadState::Aborting => {
                if event == RepositoryEvent::LoadingDisabled {
                    match kind {
                        EntityKind::Artist => self.done.artists = true,
                        EntityKind::Album => {
                            self.done.albums = true;
                            self.done.arts = true;
                        }
                        EntityKind::Track => self.done.tracks = true,
                    }
                }
            }
            LoadState::Loading => match (kind, event) {
                (_, RepositoryEvent::FullyLoaded { error: true })
                | (_, RepositoryEvent::ArtsLoaded { error: true }) => {
                    warn!(%kind, "load failed");
                    self.finish(LoadResult::Error);
                }
                (EntityKind::Artist, RepositoryEvent::FullyLoaded { error: false }) => {
                    self.done.artists = true;
                    self.catalog.set_provider_type(EntityKind::Album, self.source);
                }
                (EntityKind::Album, RepositoryEvent::FullyLoaded { error: false }) => {
                    self.done.albums = true;
                    self.catalog.load_arts(EntityKind::Album);
                    self.catalog.set_provider_type(EntityKind::Track, self.source);
                }
                (EntityKind::Album, RepositoryEvent::ArtsLoaded { error: false }) => {
                    self.done.arts = true;
                }
                (EntityKind::Track, RepositoryEvent::FullyLoaded { error: false }) => {
                    self.done.tracks = true;
                }
                _ => {}
            },
        }
    }

    fn possibly_finish(&mut self) {
        if self.state == LoadState::Idle || !self.done.all() {
            return;
        }
        let result = match self.state {
            LoadState::Aborting => LoadResult::Aborted,
            _ if self.connection_failed => LoadResult::SuccessNoConnection,
            _ => LoadResult::Success,
        };
        if result == LoadResult::Success && self.source == ProviderKind::Remote {
            self.commit_cache();
        }
        self.finish(result);
    }

    fn commit_cache(&self) {
        let providers = self.catalog.providers();
        let last_update = providers.remote.last_update().unwrap_or_else(unix_now);
        let meta = CacheMeta {
            server_url: providers.remote.server_url().to_string(),
            user: providers.remote.user().to_string(),
            last_update,
        };
        if let Err(err) = providers.cache.commit(&meta) {
            warn!("failed to commit cache snapshot: {}", err);
        }
    }

    fn finish(&mut self, result: LoadResult) {
        if result == LoadResult::Error {
            // Stop the remaining repositories; their reports arrive in Idle.
            for kind in EntityKind::ALL {
                self.catalog.disable_loading(kind);
            }
        }
        self.state = LoadState::Idle;
        self.abort_reported = result == LoadResult::Aborted;
        info!(?result, "catalog load finished");
        self.finished.emit(result);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use common::EntityKind;

    use super::{LoadOrchestrator, LoadResult, LoadState};
    use crate::catalog::CatalogConfig;
    use crate::provider::{CacheMeta, CacheProvider, ProviderKind, Providers};
    use crate::testing::{sample_catalog, FakeRemote, MemoryCache};

    struct Fixture {
        remote: Rc<FakeRemote>,
        cache: Rc<MemoryCache>,
        orchestrator: LoadOrchestrator,
    }

    impl Fixture {
        fn new(remote: FakeRemote, cache: MemoryCache) -> Self {
            let remote = Rc::new(remote);
            let cache = Rc::new(cache);
            let config = CatalogConfig {
                granularity: 4,
                background_fill: true,
            };
            let orchestrator =
                LoadOrchestrator::new(Providers::new(remote.clone(), cache.clone()), config);
            Self {
                remote,
                cache,
                orchestrator,
            }
        }

        fn run(&mut self) {
            loop {
                let event = self
                    .remote
                    .next_event()
                    .or_else(|| self.cache.next_event());
                match event {
                    Some(event) => self.orchestrator.handle_provider_event(event),
                    None => break,
                }
            }
        }
    }

    fn remote_with(artists: usize) -> FakeRemote {
        let (a, b, t) = sample_catalog(artists);
        FakeRemote::new("http://music.local", "alice").with_catalog(&a, &b, &t)
    }

    fn account_meta(last_update: u64) -> CacheMeta {
        CacheMeta {
            server_url: "http://music.local".to_string(),
            user: "alice".to_string(),
            last_update,
        }
    }

    #[test]
    fn empty_remote_catalog_succeeds_with_zero_counts() {
        let mut fx = Fixture::new(remote_with(0), MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        assert!(fx.orchestrator.load());
        assert!(fx.orchestrator.is_loading_in_progress());
        fx.run();

        assert_eq!(results.drain(), vec![LoadResult::Success]);
        let catalog = fx.orchestrator.catalog();
        for kind in EntityKind::ALL {
            assert_eq!(catalog.count(kind), 0);
        }
        assert!(!fx.orchestrator.is_loading_in_progress());
    }

    #[test]
    fn full_remote_load_populates_everything_and_commits_the_cache() {
        let mut fx = Fixture::new(remote_with(6), MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        assert!(!fx.orchestrator.load());
        fx.run();

        assert_eq!(results.drain(), vec![LoadResult::Success]);
        assert_eq!(fx.orchestrator.source(), ProviderKind::Remote);
        let catalog = fx.orchestrator.catalog();
        assert_eq!(catalog.count(EntityKind::Artist), 6);
        assert_eq!(catalog.count(EntityKind::Album), 12);
        assert_eq!(catalog.count(EntityKind::Track), 24);
        assert!(catalog.albums().get(0).unwrap().art.is_some());
        assert_eq!(fx.cache.stored_len(EntityKind::Track), 24);
        assert_eq!(fx.cache.stored_arts(), 12);
        assert_eq!(fx.cache.meta(), Some(account_meta(100)));
    }

    #[test]
    fn unreachable_remote_falls_back_to_a_valid_cache() {
        let (a, b, t) = sample_catalog(7);
        let cache = MemoryCache::with_snapshot(account_meta(42), &a, &b, &t);
        let remote = FakeRemote::new("http://music.local", "alice");
        remote.set_reachable(false);
        let mut fx = Fixture::new(remote, cache);
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.run();

        assert_eq!(results.drain(), vec![LoadResult::SuccessNoConnection]);
        assert_eq!(fx.orchestrator.source(), ProviderKind::Cache);
        assert_eq!(fx.orchestrator.catalog().count(EntityKind::Artist), 7);
        assert_eq!(
            fx.orchestrator.catalog().count(EntityKind::Artist),
            fx.cache.stored_len(EntityKind::Artist)
        );
        assert!(fx.remote.requests().is_empty());
    }

    #[test]
    fn unreachable_remote_without_cache_is_terminal() {
        let remote = remote_with(2);
        remote.set_reachable(false);
        let mut fx = Fixture::new(remote, MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.run();
        assert_eq!(results.drain(), vec![LoadResult::NoConnectionNoCache]);
        assert_eq!(fx.orchestrator.state(), LoadState::Idle);
    }

    #[test]
    fn cache_for_another_account_is_not_used() {
        let (a, b, t) = sample_catalog(3);
        let mut meta = account_meta(42);
        meta.user = "bob".to_string();
        let remote = FakeRemote::new("http://music.local", "alice");
        remote.set_reachable(false);
        let mut fx = Fixture::new(remote, MemoryCache::with_snapshot(meta, &a, &b, &t));
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.run();
        assert_eq!(results.drain(), vec![LoadResult::NoConnectionNoCache]);
    }

    #[test]
    fn fresher_cache_is_preferred_over_a_reachable_remote() {
        let (a, b, t) = sample_catalog(3);
        let remote = remote_with(3);
        remote.set_last_update(Some(40));
        let mut fx = Fixture::new(remote, MemoryCache::with_snapshot(account_meta(50), &a, &b, &t));
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.run();
        assert_eq!(results.drain(), vec![LoadResult::Success]);
        assert_eq!(fx.orchestrator.source(), ProviderKind::Cache);
        assert!(fx.remote.requests().is_empty());
        assert_eq!(fx.orchestrator.catalog().count(EntityKind::Track), 12);
    }

    #[test]
    fn stale_cache_is_invalidated_before_a_remote_reload() {
        let (a, b, t) = sample_catalog(1);
        let mut fx = Fixture::new(
            remote_with(2),
            MemoryCache::with_snapshot(account_meta(10), &a, &b, &t),
        );
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        assert_eq!(fx.cache.stored_len(EntityKind::Artist), 1);
        fx.run();
        assert_eq!(results.drain(), vec![LoadResult::Success]);
        assert_eq!(fx.orchestrator.source(), ProviderKind::Remote);
        assert_eq!(fx.cache.stored_len(EntityKind::Artist), 2);
        assert_eq!(fx.cache.meta(), Some(account_meta(100)));
    }

    #[test]
    fn provider_error_short_circuits_to_error() {
        let remote = remote_with(3);
        remote.fail_on(EntityKind::Album);
        let mut fx = Fixture::new(remote, MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.run();
        assert_eq!(results.drain(), vec![LoadResult::Error]);
        assert!(!fx.orchestrator.is_loading_in_progress());
        assert_eq!(fx.cache.meta(), None);
        assert_eq!(
            fx.orchestrator.catalog().tracks().provider_type(),
            ProviderKind::None
        );
    }

    #[test]
    fn abort_while_initializing_reports_once() {
        let mut fx = Fixture::new(remote_with(3), MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.orchestrator.abort();
        fx.orchestrator.abort();
        assert_eq!(fx.orchestrator.state(), LoadState::Aborting);
        assert!(results.drain().is_empty());

        fx.run();
        assert_eq!(results.drain(), vec![LoadResult::Aborted]);
        assert_eq!(fx.orchestrator.state(), LoadState::Idle);
        fx.orchestrator.abort();
        assert!(results.drain().is_empty());
    }

    #[test]
    fn abort_mid_load_waits_for_the_outstanding_range() {
        let mut fx = Fixture::new(remote_with(3), MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.remote.hold_ranges(true);
        let initialized = fx.remote.next_event().unwrap();
        fx.orchestrator.handle_provider_event(initialized);
        assert!(fx.orchestrator.catalog().artists().is_loading());

        fx.orchestrator.abort();
        assert!(results.drain().is_empty());
        fx.remote.hold_ranges(false);
        fx.remote.release();
        fx.run();
        assert_eq!(results.drain(), vec![LoadResult::Aborted]);
        assert_eq!(fx.orchestrator.catalog().artists().loaded_count(), 0);
    }

    #[test]
    fn abort_when_idle_reports_immediately() {
        let mut fx = Fixture::new(remote_with(1), MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.abort();
        fx.orchestrator.abort();
        assert_eq!(results.drain(), vec![LoadResult::Aborted]);
    }

    #[test]
    fn reload_after_abort_starts_clean() {
        let mut fx = Fixture::new(remote_with(2), MemoryCache::new());
        let results = fx.orchestrator.subscribe();
        fx.orchestrator.load();
        fx.orchestrator.abort();
        fx.run();
        assert!(fx.orchestrator.load());
        fx.run();
        assert_eq!(
            results.drain(),
            vec![LoadResult::Aborted, LoadResult::Success]
        );
        assert_eq!(fx.orchestrator.catalog().count(EntityKind::Track), 8);
    }

    #[test]
    fn messages_are_distinct() {
        let all = [
            LoadResult::Success,
            LoadResult::SuccessNoConnection,
            LoadResult::NoConnectionNoCache,
            LoadResult::Error,
            LoadResult::Aborted,
        ];
        for (i, left) in all.iter().enumerate() {
            for right in &all[i + 1..] {
                assert_ne!(left.message(), right.message());
            }
        }
        assert!(LoadResult::SuccessNoConnection.is_success());
        assert!(!LoadResult::Aborted.is_success());
    }
}
