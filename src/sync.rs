//! Debounced background sync of entity embeddings.
//!
//! Editors call `sync_*` on every save. Each call (re)arms a per-entity
//! timer; when the timer fires without another call for the same entity,
//! the latest version is extracted, compared with the stored row, and
//! re-embedded only if its content changed.
//!
//! # States (per `"{entity_type}:{entity_id}"` key)
//!
//! ```text
//!            sync_*()                     timer fires
//!   Idle ─────────────▶ Armed ──────────────────────────▶ Processing ──▶ Idle
//!                        │  ▲                               (not cancellable)
//!                        └──┘ sync_*(): abort timer, re-arm
//! ```
//!
//! Processing holds a per-key async mutex, so two passes for one entity
//! never write concurrently. Errors during processing are logged and
//! swallowed; callers never see them.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use narrative_search_core::cache::QueryCache;
use narrative_search_core::content::ContentProcessor;
use narrative_search_core::models::{
    Chapter, Character, Culture, Entity, EntityType, Location, Project,
};
use narrative_search_core::store::VectorStore;

use crate::batch::BatchProcessor;

/// Quiet period before a changed entity is processed.
pub const DEBOUNCE_MS: u64 = 2000;

/// Result of one processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing embeddable was extracted.
    Skipped,
    /// Stored row already matches; no write.
    Unchanged,
    /// Content was re-embedded and written.
    Updated,
}

pub fn sync_key(entity_type: EntityType, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}

struct PendingSync {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SyncInner {
    processor: ContentProcessor,
    batch: Arc<BatchProcessor>,
    store: Arc<dyn VectorStore>,
    cache: Arc<QueryCache>,
    debounce: Duration,
    next_generation: AtomicU64,
    pending: Mutex<HashMap<String, PendingSync>>,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Debounced entity sync. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<SyncInner>,
}

impl SyncService {
    pub fn new(
        processor: ContentProcessor,
        batch: Arc<BatchProcessor>,
        store: Arc<dyn VectorStore>,
        cache: Arc<QueryCache>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                processor,
                batch,
                store,
                cache,
                debounce,
                next_generation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                writers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    pub fn sync_chapter(&self, chapter: &Chapter) {
        self.schedule(Entity::Chapter(chapter.clone()));
    }

    pub fn sync_character(&self, character: &Character) {
        self.schedule(Entity::Character(character.clone()));
    }

    pub fn sync_location(&self, location: &Location) {
        self.schedule(Entity::Location(location.clone()));
    }

    pub fn sync_culture(&self, culture: &Culture) {
        self.schedule(Entity::Culture(culture.clone()));
    }

    pub fn sync_project(&self, project: &Project) {
        self.schedule(Entity::Project(project.clone()));
    }

    /// Process `entity` immediately, replacing any armed timer for it.
    pub async fn sync_now(&self, entity: &Entity) -> Result<SyncOutcome> {
        self.cancel(&sync_key(entity.entity_type(), entity.id()));
        self.inner.process(entity).await
    }

    /// Drop an entity from the index: cancels any armed timer, deletes its
    /// row, and flushes cached queries for its project.
    pub async fn remove_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        project_id: &str,
    ) -> Result<bool> {
        let key = sync_key(entity_type, entity_id);
        self.cancel(&key);

        let writer = self.inner.writer(&key);
        let removed = {
            let _guard = writer.lock().await;
            self.inner.store.delete_vector(entity_type, entity_id).await
        };
        self.inner.release_writer(&key, writer);
        let removed = removed?;

        self.inner.cache.invalidate_entity(entity_id, project_id);
        tracing::info!(key = key.as_str(), removed, "removed entity from index");
        Ok(removed)
    }

    /// Number of armed timers.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Abort every armed timer. Passes already processing run to completion.
    pub fn cancel_all(&self) -> usize {
        let mut pending = lock(&self.inner.pending);
        let count = pending.len();
        for (_, entry) in pending.drain() {
            entry.handle.abort();
        }
        if count > 0 {
            tracing::debug!(count, "cancelled pending syncs");
        }
        count
    }

    fn cancel(&self, key: &str) {
        if let Some(entry) = lock(&self.inner.pending).remove(key) {
            entry.handle.abort();
        }
    }

    fn schedule(&self, entity: Entity) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::error!(
                    entity_type = %entity.entity_type(),
                    entity_id = entity.id(),
                    "sync requested outside a tokio runtime; ignoring"
                );
                return;
            }
        };

        let key = sync_key(entity.entity_type(), entity.id());
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();

        // Held across spawn so the task cannot claim its slot before it exists.
        let mut pending = lock(&self.inner.pending);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if !inner.claim(&task_key, generation) {
                return;
            }
            if let Err(e) = inner.process(&entity).await {
                tracing::error!(
                    key = task_key.as_str(),
                    project_id = entity.project_id(),
                    error = %e,
                    "background sync failed"
                );
            }
        });

        if let Some(previous) = pending.insert(key.clone(), PendingSync { generation, handle }) {
            previous.handle.abort();
            tracing::debug!(key = key.as_str(), "re-armed sync timer");
        } else {
            tracing::debug!(key = key.as_str(), "armed sync timer");
        }
    }
}

impl SyncInner {
    /// Remove our own pending entry. After this the pass can no longer be
    /// cancelled by a re-arm.
    fn claim(&self, key: &str, generation: u64) -> bool {
        let mut pending = lock(&self.pending);
        match pending.get(key) {
            Some(entry) if entry.generation == generation => {
                pending.remove(key);
                true
            }
            _ => false,
        }
    }

    fn writer(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut writers = lock(&self.writers);
        Arc::clone(writers.entry(key.to_string()).or_default())
    }

    fn release_writer(&self, key: &str, writer: Arc<tokio::sync::Mutex<()>>) {
        let mut writers = lock(&self.writers);
        // Only the map and `writer` hold it: nobody else is waiting.
        if Arc::strong_count(&writer) == 2 {
            writers.remove(key);
        }
    }

    async fn process(&self, entity: &Entity) -> Result<SyncOutcome> {
        let key = sync_key(entity.entity_type(), entity.id());
        let writer = self.writer(&key);
        let outcome = {
            let _guard = writer.lock().await;
            self.process_locked(entity, &key).await
        };
        self.release_writer(&key, writer);
        outcome
    }

    async fn process_locked(&self, entity: &Entity, key: &str) -> Result<SyncOutcome> {
        let content = match self.processor.extract(entity).into_iter().next() {
            Some(content) => content,
            None => {
                tracing::debug!(key, "nothing to embed");
                return Ok(SyncOutcome::Skipped);
            }
        };

        if let Some(existing) = self
            .store
            .get_vector(content.entity_type, &content.entity_id)
            .await?
        {
            if existing.content == content.content && existing.model == self.batch.model_name() {
                tracing::debug!(key, "content unchanged; skipping embed");
                return Ok(SyncOutcome::Unchanged);
            }
        }

        self.batch.process_batch(std::slice::from_ref(&content)).await?;
        self.cache
            .invalidate_entity(&content.entity_id, &content.project_id);
        tracing::info!(
            key,
            project_id = content.project_id.as_str(),
            "synced entity embedding"
        );
        Ok(SyncOutcome::Updated)
    }
}
