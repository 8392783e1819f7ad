use crate::backend::{Backend, BackendLoader, OpenAiLoader};
use crate::cache::{JsonFileCache, MemoryCache, ResponseCache};
use crate::config::Config;
use crate::error::GatewayError;
use crate::models::SamplingParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, warn};

/// Tunables for the gateway
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Per backend call; expiry is reported as an inference failure
    pub timeout: Duration,
    /// Backend calls allowed in flight at once
    pub max_concurrent_requests: usize,
}

/// Counters describing what the gateway did during its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub backend_calls: u64,
    pub persist_failures: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    backend_calls: AtomicU64,
    persist_failures: AtomicU64,
}

/// Single owner of the backend, with a response cache in front of it
pub struct Gateway {
    loader: Arc<dyn BackendLoader>,
    backend: OnceCell<Arc<dyn Backend>>,
    cache: Arc<dyn ResponseCache>,
    /// Generations in progress, keyed like the cache; later callers await the first
    in_flight: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    permits: Semaphore,
    timeout: Duration,
    counters: Counters,
}

impl Gateway {
    pub fn new(
        loader: Arc<dyn BackendLoader>,
        cache: Arc<dyn ResponseCache>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            loader,
            backend: OnceCell::new(),
            cache,
            in_flight: Mutex::new(HashMap::new()),
            permits: Semaphore::new(options.max_concurrent_requests.max(1)),
            timeout: options.timeout,
            counters: Counters::default(),
        }
    }

    /// Load the backend if nobody has yet. Concurrent callers wait for the one
    /// load in progress instead of starting their own.
    pub async fn ensure_ready(&self) -> Result<&Arc<dyn Backend>, GatewayError> {
        self.backend
            .get_or_try_init(|| async {
                info!("Initializing inference backend");
                let backend = self.loader.load().await?;
                info!("Inference backend ready: {}", backend.model_id());
                Ok(backend)
            })
            .await
    }

    /// Gateway over the configured completion server and cache file
    pub fn from_config(config: &Config) -> Self {
        let cache: Arc<dyn ResponseCache> = match &config.cache.path {
            Some(path) => {
                let cache = JsonFileCache::open(path);
                debug!("Response cache file: {}", cache.path().display());
                Arc::new(cache)
            }
            None => Arc::new(MemoryCache::new()),
        };
        Self::new(
            Arc::new(OpenAiLoader::new(config.backend.clone())),
            cache,
            GatewayOptions {
                timeout: Duration::from_secs(config.backend.timeout_secs),
                max_concurrent_requests: config.backend.max_concurrent_requests,
            },
        )
    }

    pub async fn model_id(&self) -> Result<String, GatewayError> {
        Ok(self.ensure_ready().await?.model_id().to_string())
    }

    /// Query keyed by the prompt itself
    pub async fn query(&self, prompt: &str, params: &SamplingParams) -> Result<String, GatewayError> {
        self.query_keyed(prompt, prompt, params).await
    }

    /// Query with an explicit cache key. A hit never reaches the backend; a
    /// miss generates, stores and persists before returning the stored text.
    /// Concurrent misses on one key share a single backend call.
    pub async fn query_keyed(
        &self,
        key: &str,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, GatewayError> {
        if let Some(text) = self.cache.get(key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit ({} chars)", text.len());
            return Ok(text);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = cell
            .get_or_try_init(|| self.generate_and_store(key, prompt, params))
            .await
            .cloned();

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.get(key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
                in_flight.remove(key);
            }
        }
        outcome
    }

    async fn generate_and_store(
        &self,
        key: &str,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, GatewayError> {
        // Stored while this caller waited for the in-flight slot
        if let Some(text) = self.cache.get(key) {
            return Ok(text);
        }

        let backend = self.ensure_ready().await?;
        let generated = self.generate(backend.as_ref(), prompt, params).await?;

        let stored = self.cache.put(key.to_string(), generated);
        self.persist().await;
        Ok(stored)
    }

    async fn generate(
        &self,
        backend: &dyn Backend,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, GatewayError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| GatewayError::inference(prompt, e))?;

        self.counters.backend_calls.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(self.timeout, backend.generate(prompt, params)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(GatewayError::inference(prompt, format!("{:#}", e))),
            Err(_) => Err(GatewayError::inference(
                prompt,
                format!("timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    async fn persist(&self) {
        let cache = self.cache.clone();
        let outcome = tokio::task::spawn_blocking(move || cache.flush()).await;
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("flush task failed: {}", e),
        };
        self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Failed to persist response cache: {}", failure);
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            backend_calls: self.counters.backend_calls.load(Ordering::Relaxed),
            persist_failures: self.counters.persist_failures.load(Ordering::Relaxed),
        }
    }

    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }
}
