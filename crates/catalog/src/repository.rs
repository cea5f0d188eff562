//! Lazily populated, filterable store of one entity kind.
//!
//! The repository owns an arena of optional slots sized to the provider's
//! reported total. Slots are filled by range loads, one in flight at a time,
//! and every fill goes through the kind's enrichment policy and into the
//! shared [`IndexStore`] before consumers hear about it.

use std::cell::Cell;
use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::entity::{CatalogEntity, EntityBatch, EntityLookup, Siblings};
use crate::error::{CatalogError, ProviderError};
use crate::filter::{Filter, FilterView, UnfilteredView};
use crate::index::IndexStore;
use crate::provider::{ArtMap, ArtRequest, ProviderKind, Providers, RangeRequest};
use crate::signal::{Signal, Subscription};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepositoryEvent {
    /// A range request resolved. `count` is 0 for discarded or failed
    /// responses; `epoch` is the one the request was issued in.
    Loaded {
        offset: usize,
        count: usize,
        epoch: u64,
    },
    FullyLoaded { error: bool },
    FilterChanged,
    ProviderChanged,
    LoadingDisabled,
    ArtsLoaded { error: bool },
}

pub struct WindowedRepository<E: CatalogEntity> {
    providers: Providers,
    provider: ProviderKind,
    slots: Vec<Option<E>>,
    ids: HashMap<String, usize>,
    loaded: usize,
    max_data_size: usize,
    /// Bumped on every clear; responses carry the epoch they were issued in.
    epoch: u64,
    in_flight: Option<RangeRequest>,
    invalidated: bool,
    /// Rows read from the cache at provider switch, served by staged loads.
    cache_rows: Vec<E>,
    staged: Option<RangeRequest>,
    loading_enabled: bool,
    disable_pending: bool,
    failed: bool,
    fully_loaded: bool,
    arts_in_flight: Option<ArtRequest>,
    unfiltered: UnfilteredView,
    filter: Option<Box<dyn FilterView<E>>>,
    count_cache: Cell<Option<usize>>,
    events: Signal<RepositoryEvent>,
}

impl<E: CatalogEntity + 'static> WindowedRepository<E> {
    pub fn new(providers: Providers) -> Self {
        Self {
            providers,
            provider: ProviderKind::None,
            slots: Vec::new(),
            ids: HashMap::new(),
            loaded: 0,
            max_data_size: 0,
            epoch: 0,
            in_flight: None,
            invalidated: false,
            cache_rows: Vec::new(),
            staged: None,
            loading_enabled: true,
            disable_pending: false,
            failed: false,
            fully_loaded: false,
            arts_in_flight: None,
            unfiltered: UnfilteredView::default(),
            filter: None,
            count_cache: Cell::new(None),
            events: Signal::new(),
        }
    }

    pub fn subscribe(&self) -> Subscription<RepositoryEvent> {
        self.events.subscribe()
    }

    pub fn provider_type(&self) -> ProviderKind {
        self.provider
    }

    pub fn max_data_size(&self) -> usize {
        self.max_data_size
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_loading_enabled(&self) -> bool {
        self.loading_enabled
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Starts loading raw slots `[offset, offset + limit)`. Returns false,
    /// without side effects, when a load is in flight, loading is disabled
    /// or nothing is left to load.
    pub fn load(&mut self, offset: usize, limit: usize) -> bool {
        if !self.loading_enabled
            || self.failed
            || self.fully_loaded
            || self.in_flight.is_some()
            || self.provider == ProviderKind::None
            || limit == 0
            || offset >= self.max_data_size
        {
            return false;
        }
        let request = RangeRequest {
            kind: E::KIND,
            offset,
            limit: limit.min(self.max_data_size - offset),
            epoch: self.epoch,
        };
        self.in_flight = Some(request);
        self.invalidated = false;
        debug!(kind = %E::KIND, offset, limit = request.limit, provider = ?self.provider, "range requested");
        match self.provider {
            ProviderKind::Remote => self.providers.remote.request_range(request),
            ProviderKind::Cache => self.staged = Some(request),
            ProviderKind::None => {}
        }
        true
    }

    pub fn has_staged(&self) -> bool {
        self.staged.is_some()
    }

    /// Answers a staged cache load. Returns true when one was delivered.
    pub fn deliver_staged(&mut self, index: &mut IndexStore, siblings: &Siblings<'_>) -> bool {
        let Some(request) = self.staged.take() else {
            return false;
        };
        let end = (request.offset + request.limit).min(self.cache_rows.len());
        let rows = self
            .cache_rows
            .get(request.offset..end)
            .map(<[E]>::to_vec)
            .unwrap_or_default();
        self.handle_ready(request, Ok(E::into_batch(rows)), index, siblings);
        true
    }

    pub fn handle_ready(
        &mut self,
        request: RangeRequest,
        result: Result<EntityBatch, ProviderError>,
        index: &mut IndexStore,
        siblings: &Siblings<'_>,
    ) {
        if self.in_flight != Some(request) {
            debug!(kind = %E::KIND, offset = request.offset, "stale response discarded");
            self.emit(RepositoryEvent::Loaded {
                offset: request.offset,
                count: 0,
                epoch: request.epoch,
            });
            return;
        }
        self.in_flight = None;

        if self.invalidated || !self.loading_enabled {
            debug!(kind = %E::KIND, offset = request.offset, "invalidated response discarded");
            self.invalidated = false;
            self.emit(RepositoryEvent::Loaded {
                offset: request.offset,
                count: 0,
                epoch: request.epoch,
            });
            self.resolve_disable();
            return;
        }

        match result.and_then(|batch| self.accept(request, batch)) {
            Ok(records) => self.store(request.offset, records, index, siblings),
            Err(err) => {
                warn!(kind = %E::KIND, offset = request.offset, "range load failed: {}", err);
                self.failed = true;
                self.emit(RepositoryEvent::Loaded {
                    offset: request.offset,
                    count: 0,
                    epoch: request.epoch,
                });
                self.emit(RepositoryEvent::FullyLoaded { error: true });
            }
        }
        self.resolve_disable();
    }

    fn accept(&self, request: RangeRequest, batch: EntityBatch) -> Result<Vec<E>, ProviderError> {
        let mut records = E::from_batch(batch)?;
        if records.is_empty() {
            return Err(ProviderError::Malformed(format!(
                "no {} returned at offset {} of {}",
                E::KIND,
                request.offset,
                self.max_data_size
            )));
        }
        records.truncate(request.limit);
        for record in &records {
            record.validate()?;
        }
        Ok(records)
    }

    fn store(
        &mut self,
        offset: usize,
        records: Vec<E>,
        index: &mut IndexStore,
        siblings: &Siblings<'_>,
    ) {
        let count = records.len();
        for (i, mut record) in records.into_iter().enumerate() {
            record.enrich(siblings);
            let slot = offset + i;
            if self.slots[slot].is_none() {
                self.loaded += 1;
            }
            self.ids.insert(record.id().to_string(), slot);
            self.slots[slot] = Some(record);
        }

        let filled: Vec<(usize, &E)> = (offset..offset + count)
            .filter_map(|slot| self.slots[slot].as_ref().map(|record| (slot, record)))
            .collect();
        E::update_index(&filled, index);

        FilterView::<E>::process_updated_source_data(
            &mut self.unfiltered,
            &self.slots,
            index,
            offset,
            count,
        );
        let mut view_changed = false;
        if let Some(filter) = self.filter.as_mut() {
            view_changed |= filter.process_updated_source_data(&self.slots, index, offset, count);
            view_changed |= filter.sync(&self.slots, index);
        }
        self.count_cache.set(None);

        if view_changed {
            self.emit(RepositoryEvent::FilterChanged);
        }
        self.emit(RepositoryEvent::Loaded {
            offset,
            count,
            epoch: self.epoch,
        });

        if self.loaded >= self.max_data_size && !self.fully_loaded {
            self.fully_loaded = true;
            if self.provider == ProviderKind::Remote {
                self.persist();
            }
            info!(kind = %E::KIND, count = self.loaded, "fully loaded");
            self.emit(RepositoryEvent::FullyLoaded { error: false });
        }
    }

    fn persist(&self) {
        let records: Vec<E> = self.slots.iter().flatten().cloned().collect();
        if let Err(err) = self.providers.cache.save_all(&E::into_batch(records)) {
            warn!(kind = %E::KIND, "failed to save to cache: {}", err);
        }
    }

    /// Whether every slot behind filtered positions `[offset, offset + count)`
    /// is present.
    pub fn is_loaded(&self, offset: usize, count: usize) -> bool {
        let Some(end) = offset.checked_add(count) else {
            return false;
        };
        if end > self.count() {
            return false;
        }
        (offset..end).all(|position| self.record(position).is_some())
    }

    fn source_offset(&self, position: usize) -> Option<usize> {
        match &self.filter {
            Some(filter) => filter.source_offset(position),
            None => FilterView::<E>::source_offset(&self.unfiltered, position),
        }
    }

    /// Record at a filtered position.
    pub fn record(&self, position: usize) -> Option<&E> {
        let slot = self.source_offset(position)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn get(&self, position: usize) -> Option<&E::Object> {
        self.record(position).map(CatalogEntity::object)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&E::Object> {
        let slot = *self.ids.get(id)?;
        self.slots.get(slot)?.as_ref().map(CatalogEntity::object)
    }

    /// Provider size when unfiltered, filtered size otherwise.
    pub fn count(&self) -> usize {
        if let Some(count) = self.count_cache.get() {
            return count;
        }
        let count = match &self.filter {
            Some(filter) => filter.len(),
            None => self.max_data_size,
        };
        self.count_cache.set(Some(count));
        count
    }

    /// First raw offset at or after `from` that is not loaded yet.
    pub fn first_missing(&self, from: usize) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, slot)| slot.is_none())
            .map(|(offset, _)| offset)
    }

    pub fn set_filter(&mut self, filter: Filter, index: &IndexStore) -> Result<(), CatalogError> {
        if let Some(kind) = filter.target_kind() {
            if kind != E::KIND {
                return Err(CatalogError::FilterKindMismatch {
                    filter: kind,
                    repository: E::KIND,
                });
            }
        }
        let mut view = filter.into_view::<E>(index);
        view.apply(&self.slots, index);
        // Replacing the view drops the previous index subscription.
        self.filter = Some(view);
        self.invalidate_in_flight();
        self.count_cache.set(None);
        self.emit(RepositoryEvent::FilterChanged);
        Ok(())
    }

    pub fn unset_filter(&mut self) {
        if self.filter.take().is_none() {
            return;
        }
        self.invalidate_in_flight();
        self.count_cache.set(None);
        self.emit(RepositoryEvent::FilterChanged);
    }

    fn invalidate_in_flight(&mut self) {
        if self.in_flight.is_some() {
            self.invalidated = true;
        }
    }

    /// Clears everything and switches data source. Loading is re-enabled.
    pub fn set_provider_type(&mut self, provider: ProviderKind, index: &mut IndexStore) {
        self.clear(index);
        self.provider = provider;
        self.loading_enabled = true;

        let mut load_error = None;
        self.max_data_size = match provider {
            ProviderKind::None => 0,
            ProviderKind::Remote => self.providers.remote.number_of(E::KIND),
            ProviderKind::Cache => match self.read_cache() {
                Ok(rows) => {
                    self.cache_rows = rows;
                    self.cache_rows.len()
                }
                Err(err) => {
                    warn!(kind = %E::KIND, "cache unreadable: {}", err);
                    load_error = Some(err);
                    0
                }
            },
        };
        self.slots = vec![None; self.max_data_size];
        self.reapply_views(index);
        info!(
            kind = %E::KIND,
            provider = ?provider,
            size = self.max_data_size,
            "provider changed"
        );
        self.emit(RepositoryEvent::ProviderChanged);

        if provider == ProviderKind::None {
            return;
        }
        if load_error.is_some() {
            self.failed = true;
            self.emit(RepositoryEvent::FullyLoaded { error: true });
        } else if self.max_data_size == 0 {
            self.fully_loaded = true;
            self.emit(RepositoryEvent::FullyLoaded { error: false });
        }
    }

    fn read_cache(&self) -> Result<Vec<E>, ProviderError> {
        let rows = E::from_batch(self.providers.cache.load_all(E::KIND)?)?;
        for row in &rows {
            row.validate()?;
        }
        Ok(rows)
    }

    /// Marks the repository inert. `LoadingDisabled` is reported now when
    /// idle, otherwise once the outstanding load resolves.
    pub fn disable_loading(&mut self) {
        self.loading_enabled = false;
        if self.in_flight.is_some() {
            self.disable_pending = true;
        } else {
            self.emit(RepositoryEvent::LoadingDisabled);
        }
    }

    fn resolve_disable(&mut self) {
        if self.disable_pending && self.in_flight.is_none() {
            self.disable_pending = false;
            self.emit(RepositoryEvent::LoadingDisabled);
        }
    }

    /// Requests cover art for every loaded record. Returns false for kinds
    /// without art or while a request is outstanding.
    pub fn load_arts(&mut self) -> bool {
        if !E::HAS_ART || self.provider == ProviderKind::None || self.arts_in_flight.is_some() {
            return false;
        }
        let ids: Vec<String> = self
            .slots
            .iter()
            .flatten()
            .map(|record| record.id().to_string())
            .collect();
        if ids.is_empty() {
            self.emit(RepositoryEvent::ArtsLoaded { error: false });
            return true;
        }
        let request = ArtRequest {
            kind: E::KIND,
            ids,
            epoch: self.epoch,
        };
        self.arts_in_flight = Some(request.clone());
        match self.provider {
            ProviderKind::Remote => self.providers.remote.request_arts(request),
            ProviderKind::Cache => self.providers.cache.request_arts(request),
            ProviderKind::None => {}
        }
        true
    }

    pub fn handle_arts(
        &mut self,
        source: ProviderKind,
        request: ArtRequest,
        result: Result<ArtMap, ProviderError>,
    ) {
        if source != self.provider || self.arts_in_flight.as_ref() != Some(&request) {
            debug!(kind = %E::KIND, "stale art response discarded");
            return;
        }
        self.arts_in_flight = None;
        if !self.loading_enabled {
            debug!(kind = %E::KIND, "art response after disable discarded");
            return;
        }
        match result {
            Ok(arts) => {
                for (id, art) in &arts {
                    if let Some(Some(record)) =
                        self.ids.get(id).and_then(|slot| self.slots.get_mut(*slot))
                    {
                        record.set_art(art.clone());
                    }
                }
                if source == ProviderKind::Remote && !arts.is_empty() {
                    if let Err(err) = self.providers.cache.save_arts(&arts) {
                        warn!(kind = %E::KIND, "failed to save art to cache: {}", err);
                    }
                }
                debug!(kind = %E::KIND, count = arts.len(), "art loaded");
                self.emit(RepositoryEvent::ArtsLoaded { error: false });
            }
            Err(err) => {
                warn!(kind = %E::KIND, "art request failed: {}", err);
                self.emit(RepositoryEvent::ArtsLoaded { error: true });
            }
        }
    }

    /// Drops every slot, this kind's index maps and any in-flight request.
    /// The provider type and the active filter are kept.
    pub fn clear(&mut self, index: &mut IndexStore) {
        self.epoch += 1;
        self.slots.clear();
        self.ids.clear();
        self.loaded = 0;
        self.max_data_size = 0;
        self.in_flight = None;
        self.invalidated = false;
        self.cache_rows.clear();
        self.staged = None;
        self.failed = false;
        self.fully_loaded = false;
        self.arts_in_flight = None;
        E::clear_index(index);
        self.reapply_views(index);
        if self.disable_pending {
            self.disable_pending = false;
            self.emit(RepositoryEvent::LoadingDisabled);
        }
    }

    fn reapply_views(&mut self, index: &IndexStore) {
        FilterView::<E>::apply(&mut self.unfiltered, &self.slots, index);
        if let Some(filter) = self.filter.as_mut() {
            filter.apply(&self.slots, index);
        }
        self.count_cache.set(None);
    }

    fn emit(&self, event: RepositoryEvent) {
        self.events.emit(event);
    }
}

impl<E: CatalogEntity + 'static> EntityLookup<E::Object> for WindowedRepository<E> {
    fn lookup(&self, id: &str) -> Option<&E::Object> {
        self.get_by_id(id)
    }
}
