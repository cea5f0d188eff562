//! On-demand driver pairing one repository with its request scheduler.
//!
//! Consumers touch filtered positions as they render them; the collection
//! turns those touches into scheduled range loads and retires each window
//! when the repository reports it loaded. With background fill enabled it
//! also walks the missing slots on its own whenever nothing was asked for.

use tracing::trace;

use crate::catalog::CatalogConfig;
use crate::entity::CatalogEntity;
use crate::provider::{ProviderKind, Providers};
use crate::repository::{RepositoryEvent, WindowedRepository};
use crate::scheduler::RequestScheduler;
use crate::signal::Subscription;
use crate::window::RequestWindow;

pub struct LazyCollection<E: CatalogEntity> {
    repository: WindowedRepository<E>,
    scheduler: RequestScheduler,
    ready: Subscription<RequestWindow>,
    events: Subscription<RepositoryEvent>,
    /// Window handed to the repository on behalf of consumers, with the
    /// repository epoch it was issued in.
    outstanding: Option<(RequestWindow, u64)>,
    /// Offset and epoch of a background fill load in flight.
    background: Option<(usize, u64)>,
    /// Consumer window that became ready while a fill was in flight.
    deferred: Option<RequestWindow>,
    background_fill: bool,
    fill_cursor: usize,
}

impl<E: CatalogEntity + 'static> LazyCollection<E> {
    pub fn new(providers: Providers, config: &CatalogConfig) -> Self {
        let repository = WindowedRepository::new(providers);
        let scheduler = RequestScheduler::new(config.granularity);
        let ready = scheduler.subscribe();
        let events = repository.subscribe();
        Self {
            repository,
            scheduler,
            ready,
            events,
            outstanding: None,
            background: None,
            deferred: None,
            background_fill: config.background_fill,
            fill_cursor: 0,
        }
    }

    pub fn repository(&self) -> &WindowedRepository<E> {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut WindowedRepository<E> {
        &mut self.repository
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    /// Asks for the record at a filtered position. No-op when it is loaded,
    /// out of range, or a filter is active (filters only see loaded data).
    pub fn touch(&mut self, position: usize) {
        if self.repository.is_filtered()
            || position >= self.repository.count()
            || self.repository.is_loaded(position, 1)
        {
            return;
        }
        self.scheduler.add(position);
        self.dispatch_ready();
    }

    /// Reacts to repository events queued since the last call and starts
    /// whatever load comes next.
    pub fn process(&mut self) {
        for event in self.events.drain() {
            match event {
                RepositoryEvent::Loaded { offset, epoch, .. } => {
                    let issued = self
                        .outstanding
                        .and_then(|(window, issued)| window.lower().map(|lower| (lower, issued)));
                    if issued == Some((offset, epoch)) {
                        self.outstanding = None;
                        let finished = self.scheduler.set_finished();
                        trace!(kind = %E::KIND, window = %finished, "window retired");
                    } else if self.background == Some((offset, epoch)) {
                        self.background = None;
                    } else {
                        trace!(kind = %E::KIND, offset, epoch, "load from another request ignored");
                    }
                }
                RepositoryEvent::ProviderChanged | RepositoryEvent::LoadingDisabled => {
                    self.reset();
                }
                _ => {}
            }
        }
        if self.outstanding.is_none() && self.background.is_none() {
            if let Some(window) = self.deferred.take() {
                self.issue(window);
            }
        }
        self.dispatch_ready();
        self.fill();
    }

    fn dispatch_ready(&mut self) {
        while let Some(window) = self.ready.try_next() {
            if window.is_empty() {
                continue;
            }
            if self.background.is_some() || self.repository.is_loading() {
                self.deferred = Some(window);
                continue;
            }
            self.issue(window);
        }
    }

    fn issue(&mut self, window: RequestWindow) {
        let Some(lower) = window.lower() else {
            return;
        };
        if self.repository.load(lower, window.len()) {
            self.outstanding = Some((window, self.repository.epoch()));
        } else {
            // Nothing to fetch for it; move on to the next pending window.
            self.scheduler.set_finished();
        }
    }

    fn fill(&mut self) {
        if !self.background_fill
            || self.background.is_some()
            || self.outstanding.is_some()
            || self.deferred.is_some()
            || !self.scheduler.is_idle()
        {
            return;
        }
        let repository = &self.repository;
        if repository.provider_type() == ProviderKind::None
            || repository.is_loading()
            || repository.is_fully_loaded()
            || repository.has_failed()
            || !repository.is_loading_enabled()
        {
            return;
        }
        let Some(offset) = repository.first_missing(self.fill_cursor) else {
            return;
        };
        if self.repository.load(offset, self.scheduler.granularity()) {
            trace!(kind = %E::KIND, offset, "background fill");
            self.fill_cursor = offset;
            self.background = Some((offset, self.repository.epoch()));
        }
    }

    fn reset(&mut self) {
        self.scheduler.clear();
        self.ready.drain();
        self.outstanding = None;
        self.background = None;
        self.deferred = None;
        self.fill_cursor = 0;
    }
}
