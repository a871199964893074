//! Composition root.
//!
//! [`SemanticRuntime`] builds every service from a [`Config`] and owns their
//! lifecycle: [`init`](SemanticRuntime::init) starts the cache prune ticker,
//! [`dispose`](SemanticRuntime::dispose) cancels armed syncs, stops the
//! ticker and closes the database.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use narrative_search_core::cache::QueryCache;
use narrative_search_core::content::ContentProcessor;
use narrative_search_core::embedding::EmbeddingProvider;
use narrative_search_core::store::memory::InMemoryVectorStore;
use narrative_search_core::store::VectorStore;

use crate::batch::BatchProcessor;
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::hydrate::EntityServices;
use crate::migrate;
use crate::search::SearchService;
use crate::sqlite_store::SqliteVectorStore;
use crate::sync::SyncService;

pub struct SemanticRuntime {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    cache: Arc<QueryCache>,
    processor: ContentProcessor,
    batch: Arc<BatchProcessor>,
    sync: SyncService,
    search: SearchService,
    pool: Option<SqlitePool>,
    pruner: Mutex<Option<JoinHandle<()>>>,
}

impl SemanticRuntime {
    /// Build from configuration: the embedding provider named by
    /// `[embedding]`, and the SQLite store when `[db] path` is set
    /// (in-memory otherwise).
    pub async fn from_config(config: Config, services: EntityServices) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;

        let (store, pool) = match &config.db.path {
            Some(path) => {
                let pool = db::connect(path).await?;
                migrate::run_migrations(&pool).await?;
                let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));
                (store, Some(pool))
            }
            None => {
                let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
                (store, None)
            }
        };

        tracing::info!(
            provider = config.embedding.provider.as_str(),
            model = provider.model_name(),
            persistent = pool.is_some(),
            "semantic runtime configured"
        );

        let mut runtime = Self::with_components(config, provider, store, services);
        runtime.pool = pool;
        Ok(runtime)
    }

    /// Build from explicit components.
    pub fn with_components(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        services: EntityServices,
    ) -> Self {
        let processor = ContentProcessor::new(
            config.content.min_content_length,
            config.content.max_content_length,
            config.content.chunk_overlap,
        );
        let cache = Arc::new(QueryCache::new(config.cache.ttl(), config.cache.max_entries));
        let batch = Arc::new(
            BatchProcessor::new(provider.clone(), store.clone(), processor.clone())
                .with_batch_size(config.embedding.batch_size),
        );
        let sync = SyncService::new(
            processor.clone(),
            batch.clone(),
            store.clone(),
            cache.clone(),
            config.sync.debounce(),
        );
        let search = SearchService::new(
            provider.clone(),
            store.clone(),
            services,
            cache.clone(),
            config.search.clone(),
        );

        Self {
            config,
            provider,
            store,
            cache,
            processor,
            batch,
            sync,
            search,
            pool: None,
            pruner: Mutex::new(None),
        }
    }

    /// Start background maintenance. Calling again is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(&self) {
        let mut pruner = self.pruner.lock().unwrap_or_else(PoisonError::into_inner);
        if pruner.is_some() || self.config.cache.prune_interval_secs == 0 {
            return;
        }

        let cache = Arc::clone(&self.cache);
        let period = Duration::from_secs(self.config.cache.prune_interval_secs);
        *pruner = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.prune();
                if removed > 0 {
                    tracing::debug!(removed, "pruned expired query cache entries");
                }
            }
        }));
        tracing::info!(?period, "semantic runtime started");
    }

    /// Cancel armed syncs, stop the prune ticker, clear the cache and close
    /// the database pool. In-flight processing passes are not interrupted.
    pub async fn dispose(&self) {
        let cancelled = self.sync.cancel_all();
        let pruner = self
            .pruner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pruner {
            handle.abort();
        }
        self.cache.clear();
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        tracing::info!(cancelled, "semantic runtime disposed");
    }

    pub fn is_running(&self) -> bool {
        self.pruner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn processor(&self) -> &ContentProcessor {
        &self.processor
    }

    pub fn batch(&self) -> &Arc<BatchProcessor> {
        &self.batch
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }
}
