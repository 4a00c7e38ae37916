use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::limits::*;
use crate::reaper;

/// Manages per-tenant engines. Each tenant gets its own engine + journal +
/// reaper; a slot id from another tenant simply does not resolve, so there
/// is no cross-tenant path to any capacity counter.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    dispatch: Arc<Dispatcher>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, dispatch: Arc<Dispatcher>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            dispatch,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let journal_path = self.data_dir.join(format!("{safe_name}.journal"));
        let engine = Arc::new(Engine::new(journal_path, self.dispatch.clone())?);

        // Spawn reaper + compactor for this tenant
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, Arc::new(Dispatcher::disabled()))
    }

    const H: Ms = 3_600_000;

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = manager(dir);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let service = Ulid::new();
        let slot = Ulid::new();

        // Same slot id exists in both tenants with different capacity
        eng_a
            .create_slot(slot, service, Span::new(100 * H, 101 * H), 5)
            .await
            .unwrap();
        eng_b
            .create_slot(slot, service, Span::new(100 * H, 101 * H), 2)
            .await
            .unwrap();

        // Booking in tenant A must not touch tenant B's counters
        let req = BookingRequest {
            id: Ulid::new(),
            service_id: service,
            slot_id: slot,
            lock_id: None,
            session_id: None,
            customer_name: "Amina".into(),
            customer_phone: "+960 555 0100".into(),
            customer_email: None,
            adult_count: 2,
            child_count: 0,
            visitor_count: 2,
            price_cents: 1000,
            notes: None,
            created_by: None,
        };
        eng_a.create_booking(req).await.unwrap();

        let a = eng_a.get_slot(&slot).unwrap();
        let b = eng_b.get_slot(&slot).unwrap();
        assert_eq!(a.read().await.booked_count, 2);
        assert_eq!(b.read().await.booked_count, 0);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        // No journal files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();

        assert!(dir.join("my_db.journal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = manager(dir);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();

        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        // Path traversal attempt
        let _eng = tm.get_or_create("../evil").unwrap();
        // Should create "evil.journal", not "../evil.journal"
        assert!(dir.join("evil.journal").exists());

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let result = tm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
