use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use harvestry_core::{AggregateRoot, ExpectedVersion, LicenseNumber, QueueItemId, SyncJobId};
use harvestry_sync::{QueueItem, QueueItemStatus, SyncJob};

use super::r#trait::{JobProgress, QueueStore, QueueStoreError, SyncJobStore};

/// In-memory queue and job store.
///
/// Intended for tests/dev. Not optimized for performance: ready-batch
/// selection scans every item.
#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    items: RwLock<HashMap<QueueItemId, QueueItem>>,
    jobs: RwLock<HashMap<SyncJobId, SyncJob>>,
}

fn poisoned() -> QueueStoreError {
    QueueStoreError::Storage("lock poisoned".to_string())
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of every stored item (test inspection).
    pub fn items(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(items.values().cloned().collect())
    }

    fn ready_batch(
        items: &HashMap<QueueItemId, QueueItem>,
        license: &LicenseNumber,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Vec<QueueItem> {
        let mut ready: Vec<&QueueItem> = items
            .values()
            .filter(|item| item.license_number() == license)
            .filter(|item| {
                item.is_ready_for_processing(now, |dep| items.get(&dep).map(QueueItem::status))
            })
            .collect();

        ready.sort_by_key(|item| (item.scheduled_at(), item.created_at(), item.id_typed()));
        ready.into_iter().take(batch_size).cloned().collect()
    }
}

#[async_trait]
impl QueueStore for InMemorySyncStore {
    async fn enqueue(&self, item: QueueItem) -> Result<QueueItemId, QueueStoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;

        if let Some(existing) = items
            .values()
            .find(|i| !i.is_terminal() && i.idempotency_key() == item.idempotency_key())
        {
            return Ok(existing.id_typed());
        }

        let id = item.id_typed();
        if items.contains_key(&id) {
            return Err(QueueStoreError::AlreadyExists(format!("queue item {id}")));
        }
        items.insert(id, item);
        Ok(id)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(items.get(&id).cloned())
    }

    async fn update(
        &self,
        item: &QueueItem,
        expected_version: ExpectedVersion,
    ) -> Result<(), QueueStoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        let id = item.id_typed();
        let stored = items
            .get_mut(&id)
            .ok_or_else(|| QueueStoreError::NotFound(format!("queue item {id}")))?;

        expected_version
            .check(stored.version())
            .map_err(|e| QueueStoreError::Conflict(format!("queue item {id}: {e}")))?;
        *stored = item.clone();
        Ok(())
    }

    async fn claim(
        &self,
        item: &QueueItem,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        let id = item.id_typed();
        let stored = items
            .get_mut(&id)
            .ok_or_else(|| QueueStoreError::NotFound(format!("queue item {id}")))?;

        if stored.version() != item.version() || !stored.status().is_claimable() {
            return Ok(None);
        }

        let mut claimed = stored.clone();
        if claimed.mark_processing(now).is_err() {
            return Ok(None);
        }
        *stored = claimed.clone();
        Ok(Some(claimed))
    }

    async fn next_ready_batch(
        &self,
        license: &LicenseNumber,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(Self::ready_batch(&items, license, batch_size, now))
    }

    async fn job_progress(&self, job_id: SyncJobId) -> Result<JobProgress, QueueStoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(JobProgress::from_statuses(
            items
                .values()
                .filter(|item| item.sync_job_id() == job_id)
                .map(|item| (item.id_typed(), item.status())),
        ))
    }

    async fn release_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItemId>, QueueStoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        let mut released = Vec::new();

        for item in items.values_mut() {
            let stale = item.status() == QueueItemStatus::Processing
                && item.processed_at().is_some_and(|at| at < cutoff);
            if stale && item.release_claim(now).is_ok() {
                released.push(item.id_typed());
            }
        }

        released.sort();
        Ok(released)
    }
}

#[async_trait]
impl SyncJobStore for InMemorySyncStore {
    async fn insert(&self, job: &SyncJob) -> Result<(), QueueStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let id = job.id_typed();
        if jobs.contains_key(&id) {
            return Err(QueueStoreError::AlreadyExists(format!("sync job {id}")));
        }
        jobs.insert(id, job.clone());
        Ok(())
    }

    async fn get(&self, id: SyncJobId) -> Result<Option<SyncJob>, QueueStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    async fn update(
        &self,
        job: &SyncJob,
        expected_version: ExpectedVersion,
    ) -> Result<(), QueueStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let id = job.id_typed();
        let stored = jobs
            .get_mut(&id)
            .ok_or_else(|| QueueStoreError::NotFound(format!("sync job {id}")))?;

        expected_version
            .check(stored.version())
            .map_err(|e| QueueStoreError::Conflict(format!("sync job {id}: {e}")))?;
        *stored = job.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvestry_core::{HarvestryEntityId, SiteId};
    use harvestry_sync::{EntityType, NewQueueItem, OperationType};

    fn license() -> LicenseNumber {
        LicenseNumber::parse("LIC-1").unwrap()
    }

    fn new_item(job: SyncJobId, entity: HarvestryEntityId) -> NewQueueItem {
        NewQueueItem::new(
            job,
            SiteId::new(),
            license(),
            EntityType::Package,
            OperationType::Create,
            entity,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn enqueue_dedupes_live_items_by_idempotency_key() {
        let store = InMemorySyncStore::new();
        let now = Utc::now();
        let entity = HarvestryEntityId::new();

        let first = QueueItem::create(new_item(SyncJobId::new(), entity), now).unwrap();
        let first_id = store.enqueue(first).await.unwrap();

        let again = QueueItem::create(new_item(SyncJobId::new(), entity), now).unwrap();
        assert_eq!(store.enqueue(again).await.unwrap(), first_id);

        // Once the original is terminal a new submission is accepted.
        let mut stored = QueueStore::get(&store, first_id).await.unwrap().unwrap();
        let v = stored.version();
        stored.cancel("superseded", now).unwrap();
        QueueStore::update(&store, &stored, ExpectedVersion::Exact(v)).await.unwrap();

        let third = QueueItem::create(new_item(SyncJobId::new(), entity), now).unwrap();
        assert_ne!(store.enqueue(third).await.unwrap(), first_id);
    }

    #[tokio::test]
    async fn only_one_claim_wins() {
        let store = InMemorySyncStore::new();
        let now = Utc::now();
        let item = QueueItem::create(new_item(SyncJobId::new(), HarvestryEntityId::new()), now).unwrap();
        store.enqueue(item.clone()).await.unwrap();

        let winner = store.claim(&item, now).await.unwrap();
        assert_eq!(winner.map(|i| i.status()), Some(QueueItemStatus::Processing));
        assert!(store.claim(&item, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = InMemorySyncStore::new();
        let now = Utc::now();
        let item = QueueItem::create(new_item(SyncJobId::new(), HarvestryEntityId::new()), now).unwrap();
        store.enqueue(item.clone()).await.unwrap();

        let mut claimed = store.claim(&item, now).await.unwrap().unwrap();
        claimed.complete(None, None, now).unwrap();
        let err = QueueStore::update(&store, &claimed, ExpectedVersion::Exact(item.version()))
            .await
            .unwrap_err();
        match err {
            QueueStoreError::Conflict(msg) => assert!(msg.contains("actual: 2")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ready_batch_respects_dependencies_and_order() {
        let store = InMemorySyncStore::new();
        let now = Utc::now();
        let job = SyncJobId::new();

        let parent = QueueItem::create(new_item(job, HarvestryEntityId::new()), now).unwrap();
        let child = QueueItem::create(
            new_item(job, HarvestryEntityId::new()).depends_on(parent.id_typed()),
            now,
        )
        .unwrap();
        let later = QueueItem::create(
            new_item(job, HarvestryEntityId::new()),
            now + chrono::Duration::seconds(1),
        )
        .unwrap();

        store.enqueue(later.clone()).await.unwrap();
        store.enqueue(child.clone()).await.unwrap();
        store.enqueue(parent.clone()).await.unwrap();

        let at = now + chrono::Duration::seconds(2);
        let batch = store.next_ready_batch(&license(), 10, at).await.unwrap();
        let ids: Vec<_> = batch.iter().map(QueueItem::id_typed).collect();
        assert_eq!(ids, vec![parent.id_typed(), later.id_typed()]);

        let mut claimed = store.claim(&parent, at).await.unwrap().unwrap();
        let v = claimed.version();
        claimed.complete(Some(1), None, at).unwrap();
        QueueStore::update(&store, &claimed, ExpectedVersion::Exact(v)).await.unwrap();

        let batch = store.next_ready_batch(&license(), 10, at).await.unwrap();
        let ids: Vec<_> = batch.iter().map(QueueItem::id_typed).collect();
        assert_eq!(ids, vec![child.id_typed(), later.id_typed()]);

        let other = LicenseNumber::parse("LIC-2").unwrap();
        assert!(store.next_ready_batch(&other, 10, at).await.unwrap().is_empty());
        assert_eq!(store.next_ready_batch(&license(), 1, at).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_claims_are_released() {
        let store = InMemorySyncStore::new();
        let claimed_at = Utc::now() - chrono::Duration::minutes(30);
        let item = QueueItem::create(new_item(SyncJobId::new(), HarvestryEntityId::new()), claimed_at).unwrap();
        store.enqueue(item.clone()).await.unwrap();
        store.claim(&item, claimed_at).await.unwrap().unwrap();

        let now = Utc::now();
        let cutoff = now - chrono::Duration::minutes(10);
        assert_eq!(
            store.release_stale_claims(cutoff, now).await.unwrap(),
            vec![item.id_typed()]
        );
        let released = QueueStore::get(&store, item.id_typed()).await.unwrap().unwrap();
        assert_eq!(released.status(), QueueItemStatus::Pending);
        assert!(store.release_stale_claims(cutoff, now).await.unwrap().is_empty());
    }
}
