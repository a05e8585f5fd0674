use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shared_config::AppConfig;
use shared_database::{AtomicOutcome, DocumentStore, InMemoryStore, StoreError, Transaction};

/// Installs a fmt subscriber once per test binary. Honours `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub struct TestConfig {
    pub firebase_database_url: String,
    pub utc_offset_minutes: i32,
    pub currency: String,
    pub create_missing_slots: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            firebase_database_url: "http://localhost:9000".to_string(),
            utc_offset_minutes: 0,
            currency: "EUR".to_string(),
            create_missing_slots: false,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            firebase_database_url: self.firebase_database_url.clone(),
            firebase_auth_token: None,
            store_max_transaction_retries: 5,
            scheduling_utc_offset_minutes: self.utc_offset_minutes,
            default_currency: self.currency.clone(),
            default_slot_duration_minutes: 30,
            create_missing_slots: self.create_missing_slots,
            reservation_grace_seconds: 120,
        }
    }
}

/// Store wrapper that fails writes (or reads) touching configured path prefixes.
///
/// Multi-path `update` calls fail if any of their target paths match.
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    failing_writes: Mutex<Vec<String>>,
    failing_reads: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failing_writes: Mutex::new(Vec::new()),
            failing_reads: Mutex::new(Vec::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn fail_writes_under(&self, prefix: &str) {
        if let Ok(mut prefixes) = self.failing_writes.lock() {
            prefixes.push(prefix.to_string());
        }
    }

    pub fn fail_reads_under(&self, prefix: &str) {
        if let Ok(mut prefixes) = self.failing_reads.lock() {
            prefixes.push(prefix.to_string());
        }
    }

    pub fn heal(&self) {
        if let Ok(mut prefixes) = self.failing_writes.lock() {
            prefixes.clear();
        }
        if let Ok(mut prefixes) = self.failing_reads.lock() {
            prefixes.clear();
        }
    }

    fn check(list: &Mutex<Vec<String>>, path: &str) -> Result<(), StoreError> {
        let path = path.trim_matches('/');
        let blocked = list
            .lock()
            .map(|prefixes| prefixes.iter().any(|p| path.starts_with(p.as_str())))
            .unwrap_or(false);
        if blocked {
            Err(StoreError::Unavailable(format!("injected failure on {}", path)))
        } else {
            Ok(())
        }
    }

    fn check_write(&self, path: &str) -> Result<(), StoreError> {
        Self::check(&self.failing_writes, path)
    }

    fn check_read(&self, path: &str) -> Result<(), StoreError> {
        Self::check(&self.failing_reads, path)
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.check_read(path)?;
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check_write(path)?;
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        for key in fields.keys() {
            self.check_write(&format!("{}/{}", path.trim_matches('/'), key))?;
        }
        self.inner.update(path, fields).await
    }

    async fn atomic_update(
        &self,
        path: &str,
        apply: Transaction<'_>,
    ) -> Result<AtomicOutcome, StoreError> {
        self.check_write(path)?;
        self.inner.atomic_update(path, apply).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.check_write(path)?;
        self.inner.delete(path).await
    }

    async fn find_by_child(
        &self,
        path: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.check_read(path)?;
        self.inner.find_by_child(path, key, value).await
    }
}
