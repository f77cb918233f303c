//! RedbStatusStore - pin status records persisted in a local redb file.

use anyhow::anyhow;
use chrono::Utc;
use pickup_core::{NewPin, Pin, PinError, PinQuery, PinResults, PinStatus, Status, StatusStore};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::{path::Path, sync::Arc};

/// request_id -> JSON encoded `PinStatus`
const PINS: TableDefinition<&str, &[u8]> = TableDefinition::new("pins");

/// `StatusStore` backed by a single redb database.
///
/// Every mutation runs inside one write transaction, so the
/// read-check-write of `transition` and `replace` is atomic.
#[derive(Clone)]
pub struct RedbStatusStore {
    db: Arc<Database>,
}

impl RedbStatusStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = Database::create(path.join("pins.redb"))?;

        // First access may be a read (GET before any POST).
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(PINS)?;
            }
            write_txn.commit()?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    /// Read-modify-write of one record in a single transaction.
    ///
    /// `apply` returns `Ok(false)` to leave the record untouched and report
    /// it as absent; an `Err` aborts the transaction.
    async fn update<F>(&self, request_id: &str, apply: F) -> Result<Option<PinStatus>, PinError>
    where
        F: FnOnce(&mut PinStatus) -> Result<bool, PinError> + Send + 'static,
    {
        let db = self.db.clone();
        let request_id = request_id.to_owned();

        tokio::task::spawn_blocking(
            move || -> anyhow::Result<Result<Option<PinStatus>, PinError>> {
                let write_txn = db.begin_write()?;
                let updated = {
                    let mut table = write_txn.open_table(PINS)?;
                    let Some(mut record) = table
                        .get(request_id.as_str())?
                        .map(|guard| decode(guard.value()))
                        .transpose()?
                    else {
                        return Ok(Ok(None));
                    };
                    match apply(&mut record) {
                        Ok(true) => {}
                        Ok(false) => return Ok(Ok(None)),
                        Err(e) => return Ok(Err(e)),
                    }
                    table.insert(request_id.as_str(), serde_json::to_vec(&record)?.as_slice())?;
                    record
                };
                write_txn.commit()?;
                Ok(Ok(Some(updated)))
            },
        )
        .await
        .map_err(|e| anyhow!("redb write task failed: {}", e))??
    }
}

fn decode(bytes: &[u8]) -> anyhow::Result<PinStatus> {
    Ok(serde_json::from_slice(bytes)?)
}

impl std::fmt::Debug for RedbStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStatusStore").finish()
    }
}

#[async_trait::async_trait]
impl StatusStore for RedbStatusStore {
    async fn create(&self, new: NewPin) -> Result<PinStatus, PinError> {
        let status = PinStatus::new(
            new.request_id,
            new.user_id,
            new.pin,
            &new.bucket,
            new.delegates,
            Utc::now(),
        )?;
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<PinStatus> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(PINS)?;
                if table.get(status.request_id.as_str())?.is_some() {
                    return Err(anyhow!("request id {} already exists", status.request_id));
                }
                table.insert(
                    status.request_id.as_str(),
                    serde_json::to_vec(&status)?.as_slice(),
                )?;
            }
            write_txn.commit()?;
            Ok(status)
        })
        .await
        .map_err(|e| anyhow!("redb write task failed: {}", e))?
        .map_err(PinError::from)
    }

    async fn get(&self, user_id: &str, request_id: &str) -> anyhow::Result<Option<PinStatus>> {
        let record = self.lookup(request_id).await?;
        Ok(record.filter(|r| r.user_id == user_id))
    }

    async fn lookup(&self, request_id: &str) -> anyhow::Result<Option<PinStatus>> {
        let db = self.db.clone();
        let request_id = request_id.to_owned();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<PinStatus>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(PINS)?;
            let record = table
                .get(request_id.as_str())?
                .map(|guard| decode(guard.value()))
                .transpose()?;
            Ok(record)
        })
        .await
        .map_err(|e| anyhow!("redb read task failed: {}", e))?
    }

    async fn list(&self, user_id: &str, query: &PinQuery) -> anyhow::Result<PinResults> {
        let db = self.db.clone();
        let user_id = user_id.to_owned();

        let candidates = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PinStatus>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(PINS)?;
            let mut owned = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let record = decode(value.value())?;
                if record.user_id == user_id {
                    owned.push(record);
                }
            }
            Ok(owned)
        })
        .await
        .map_err(|e| anyhow!("redb read task failed: {}", e))??;

        Ok(query.apply(candidates))
    }

    async fn replace(
        &self,
        user_id: &str,
        request_id: &str,
        pin: Pin,
    ) -> Result<Option<PinStatus>, PinError> {
        // Validate before opening a write transaction.
        pin.validate()?;
        let user_id = user_id.to_owned();
        self.update(request_id, move |record| {
            if record.user_id != user_id {
                return Ok(false);
            }
            record.replace(pin, Utc::now())?;
            Ok(true)
        })
        .await
    }

    async fn transition(
        &self,
        request_id: &str,
        generation: u64,
        next: Status,
        failure: Option<&str>,
    ) -> Result<PinStatus, PinError> {
        let failure = failure.map(str::to_owned);
        self.update(request_id, move |record| {
            record.transition_to(next, generation, failure.as_deref(), Utc::now())?;
            Ok(true)
        })
        .await?
        .ok_or(PinError::NotFound)
    }
}
