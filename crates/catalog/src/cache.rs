//! Disk snapshot of a fully loaded catalog, stored in redb.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use common::EntityKind;
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entity::EntityBatch;
use crate::error::ProviderError;
use crate::provider::{ArtMap, ArtRequest, CacheMeta, CacheProvider, ProviderEvent, ProviderKind};

const CACHE_VERSION: u32 = 1;
const META_VERSION_KEY: &str = "version";
const META_SNAPSHOT_KEY: &str = "snapshot";

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const ARTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("arts");

fn rows_table(kind: EntityKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        EntityKind::Artist => ARTISTS_TABLE,
        EntityKind::Album => ALBUMS_TABLE,
        EntityKind::Track => TRACKS_TABLE,
    }
}

/// Rows are keyed by position so iteration returns provider order.
fn row_key(position: usize) -> String {
    format!("{:010}", position)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub meta: Option<CacheMeta>,
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub arts: usize,
}

pub struct RedbCache {
    path: PathBuf,
    db: Arc<Database>,
    events: Sender<ProviderEvent>,
}

impl RedbCache {
    /// Opens or creates the cache file. A file written by an incompatible
    /// version is wiped.
    pub fn open(path: &Path, events: Sender<ProviderEvent>) -> Result<Self, CacheError> {
        let db = open_or_create_db(path)?;
        let cache = Self {
            path: path.to_path_buf(),
            db: Arc::new(db),
            events,
        };
        match cache.read_version()? {
            Some(CACHE_VERSION) => {}
            Some(version) => {
                warn!(version, path = %path.display(), "cache version mismatch, wiping");
                cache.wipe()?;
            }
            None => cache.wipe()?,
        }
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary(&self) -> Result<CacheSummary, CacheError> {
        Ok(CacheSummary {
            meta: self.read_meta()?,
            artists: self.table_len(ARTISTS_TABLE)?,
            albums: self.table_len(ALBUMS_TABLE)?,
            tracks: self.table_len(TRACKS_TABLE)?,
            arts: self.table_len(ARTS_TABLE)?,
        })
    }

    fn read_version(&self) -> Result<Option<u32>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let version = match table.get(META_VERSION_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(version)
    }

    fn read_meta(&self) -> Result<Option<CacheMeta>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let meta = match table.get(META_SNAPSHOT_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(meta)
    }

    fn table_len(&self, definition: TableDefinition<&str, &[u8]>) -> Result<usize, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(definition) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        Ok(table.len()? as usize)
    }

    fn read_rows<T: for<'de> Deserialize<'de>>(
        &self,
        definition: TableDefinition<&str, &[u8]>,
    ) -> Result<Vec<T>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(definition) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            rows.push(decode_value(entry.1.value())?);
        }
        Ok(rows)
    }

    fn write_rows<T: Serialize>(
        &self,
        definition: TableDefinition<&str, &[u8]>,
        rows: &[T],
    ) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, definition)?;
        {
            let mut table = write_txn.open_table(definition)?;
            for (position, row) in rows.iter().enumerate() {
                let bytes = encode_value(row)?;
                table.insert(row_key(position).as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_batch(&self, kind: EntityKind) -> Result<EntityBatch, CacheError> {
        let table = rows_table(kind);
        Ok(match kind {
            EntityKind::Artist => EntityBatch::Artists(self.read_rows(table)?),
            EntityKind::Album => EntityBatch::Albums(self.read_rows(table)?),
            EntityKind::Track => EntityBatch::Tracks(self.read_rows(table)?),
        })
    }

    fn save_batch(&self, batch: &EntityBatch) -> Result<(), CacheError> {
        let table = rows_table(batch.kind());
        match batch {
            EntityBatch::Artists(rows) => self.write_rows(table, rows),
            EntityBatch::Albums(rows) => self.write_rows(table, rows),
            EntityBatch::Tracks(rows) => self.write_rows(table, rows),
        }
    }

    fn read_arts(&self, ids: &[String]) -> Result<ArtMap, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(ARTS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(ArtMap::new()),
            Err(err) => return Err(err.into()),
        };
        let mut arts = ArtMap::new();
        for id in ids {
            if let Some(value) = table.get(id.as_str())? {
                arts.insert(id.clone(), decode_value(value.value())?);
            }
        }
        Ok(arts)
    }

    fn write_arts(&self, arts: &ArtMap) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ARTS_TABLE)?;
            for (id, art) in arts {
                let bytes = encode_value(art)?;
                table.insert(id.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn write_meta(&self, meta: &CacheMeta) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_TABLE)?;
            let bytes = encode_value(meta)?;
            table.insert(META_SNAPSHOT_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drops every table and stamps the current version.
    fn wipe(&self) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        for table in [META_TABLE, ARTISTS_TABLE, ALBUMS_TABLE, TRACKS_TABLE, ARTS_TABLE] {
            clear_table(&write_txn, table)?;
        }
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let bytes = encode_value(&CACHE_VERSION)?;
            meta.insert(META_VERSION_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl CacheProvider for RedbCache {
    fn load_all(&self, kind: EntityKind) -> Result<EntityBatch, ProviderError> {
        Ok(self.load_batch(kind)?)
    }

    fn save_all(&self, batch: &EntityBatch) -> Result<(), ProviderError> {
        self.save_batch(batch)?;
        info!(kind = %batch.kind(), rows = batch.len(), "cache rows saved");
        Ok(())
    }

    fn request_arts(&self, request: ArtRequest) {
        let result = self.read_arts(&request.ids).map_err(ProviderError::from);
        let event = ProviderEvent::ArtsReady {
            source: ProviderKind::Cache,
            request,
            result,
        };
        if self.events.send(event).is_err() {
            warn!("art response dropped, event loop is gone");
        }
    }

    fn save_arts(&self, arts: &ArtMap) -> Result<(), ProviderError> {
        Ok(self.write_arts(arts)?)
    }

    fn meta(&self) -> Option<CacheMeta> {
        match self.read_meta() {
            Ok(meta) => meta,
            Err(err) => {
                warn!("failed to read cache meta: {}", err);
                None
            }
        }
    }

    fn commit(&self, meta: &CacheMeta) -> Result<(), ProviderError> {
        self.write_meta(meta)?;
        info!(server = %meta.server_url, last_update = meta.last_update, "cache committed");
        Ok(())
    }

    fn invalidate(&self) -> Result<(), ProviderError> {
        self.wipe()?;
        info!(path = %self.path.display(), "cache invalidated");
        Ok(())
    }
}

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "io error: {}", err),
            CacheError::Redb(err) => write!(f, "db error: {}", err),
            CacheError::Bincode(err) => write!(f, "bincode error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<redb::Error> for CacheError {
    fn from(err: redb::Error) -> Self {
        CacheError::Redb(err)
    }
}

impl From<DatabaseError> for CacheError {
    fn from(err: DatabaseError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TableError> for CacheError {
    fn from(err: TableError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TransactionError> for CacheError {
    fn from(err: TransactionError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<CommitError> for CacheError {
    fn from(err: CommitError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for CacheError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CacheError::Bincode(err)
    }
}

impl From<CacheError> for ProviderError {
    fn from(err: CacheError) -> Self {
        ProviderError::Storage(err.to_string())
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn clear_table(txn: &WriteTransaction, table: TableDefinition<&str, &[u8]>) -> Result<(), CacheError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(bincode::deserialize(bytes)?)
}
