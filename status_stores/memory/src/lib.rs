//! MemoryStatusStore - pin status records held in process memory.

use anyhow::anyhow;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pickup_core::{NewPin, Pin, PinError, PinQuery, PinResults, PinStatus, StatusStore, Status};

/// Status store for tests and single-process deployments.
///
/// Records are keyed by `request_id`; the per-key shard lock held by
/// `get_mut` makes `transition` and `replace` compare-and-swap operations.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: DashMap<String, PinStatus>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl StatusStore for MemoryStatusStore {
    async fn create(&self, new: NewPin) -> Result<PinStatus, PinError> {
        let status = PinStatus::new(
            new.request_id,
            new.user_id,
            new.pin,
            &new.bucket,
            new.delegates,
            Utc::now(),
        )?;
        match self.records.entry(status.request_id.clone()) {
            Entry::Occupied(_) => Err(PinError::Internal(anyhow!(
                "request id {} already exists",
                status.request_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(status.clone());
                Ok(status)
            }
        }
    }

    async fn get(&self, user_id: &str, request_id: &str) -> anyhow::Result<Option<PinStatus>> {
        Ok(self
            .records
            .get(request_id)
            .filter(|rec| rec.user_id == user_id)
            .map(|rec| rec.clone()))
    }

    async fn list(&self, user_id: &str, query: &PinQuery) -> anyhow::Result<PinResults> {
        let candidates: Vec<PinStatus> = self
            .records
            .iter()
            .filter(|rec| rec.user_id == user_id)
            .map(|rec| rec.clone())
            .collect();
        Ok(query.apply(candidates))
    }

    async fn lookup(&self, request_id: &str) -> anyhow::Result<Option<PinStatus>> {
        Ok(self.records.get(request_id).map(|rec| rec.clone()))
    }

    async fn replace(
        &self,
        user_id: &str,
        request_id: &str,
        pin: Pin,
    ) -> Result<Option<PinStatus>, PinError> {
        let Some(mut rec) = self.records.get_mut(request_id) else {
            return Ok(None);
        };
        if rec.user_id != user_id {
            return Ok(None);
        }
        rec.replace(pin, Utc::now())?;
        Ok(Some(rec.clone()))
    }

    async fn transition(
        &self,
        request_id: &str,
        generation: u64,
        next: Status,
        failure: Option<&str>,
    ) -> Result<PinStatus, PinError> {
        let mut rec = self.records.get_mut(request_id).ok_or(PinError::NotFound)?;
        rec.transition_to(next, generation, failure, Utc::now())?;
        Ok(rec.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickup_core::testutil::{CID_HELLO, StatusStoreTests, new_pin};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_status_store() {
        let store = MemoryStatusStore::new();
        StatusStoreTests::new(&store).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStatusStore::new());
        let rec = store.create(new_pin("u", CID_HELLO)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = rec.request_id.clone();
            handles.push(tokio::spawn(async move {
                store.transition(&id, 1, Status::Pinning, None).await.is_ok()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn invalid_cid_is_not_stored() {
        let store = MemoryStatusStore::new();
        let err = store.create(new_pin("u", "nope")).await.unwrap_err();
        assert!(matches!(err, PinError::Validation { .. }));
        assert!(store.is_empty());
    }
}
