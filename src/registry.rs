use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::directory::{SectionCatalog, UserDirectory};
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::sweeper;

/// Per-center engines. Each center gets its own Engine + WAL + background
/// sweeps; state never crosses center boundaries.
pub struct CenterRegistry {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    catalog: Arc<dyn SectionCatalog>,
    directory: Arc<dyn UserDirectory>,
}

impl CenterRegistry {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        catalog: Arc<dyn SectionCatalog>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            catalog,
            directory,
        }
    }

    /// Get or lazily create the engine for a center.
    pub fn get_or_create(&self, center: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(center) {
            return Ok(engine.value().clone());
        }
        if center.len() > MAX_CENTER_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "center name too long",
            ));
        }
        if self.engines.len() >= MAX_CENTERS {
            return Err(std::io::Error::other("too many centers"));
        }

        // Sanitize center name to prevent path traversal.
        let safe_name: String = center
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty center name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, self.catalog.clone())?);

        // Each center runs its own sweeps and compactor.
        let expiry_engine = engine.clone();
        tokio::spawn(async move {
            sweeper::run_expiry_sweep(expiry_engine).await;
        });
        let reminder_engine = engine.clone();
        let directory = self.directory.clone();
        tokio::spawn(async move {
            sweeper::run_reminder_sweep(reminder_engine, directory).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            sweeper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(center.to_string(), engine.clone());
        metrics::gauge!(observability::CENTERS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryCatalog, InMemoryDirectory, SectionInfo};
    use crate::model::*;
    use chrono::{Datelike, NaiveDate};
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("classbook_test_registry").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn registry(dir: PathBuf) -> (CenterRegistry, Arc<InMemoryCatalog>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let directory = Arc::new(InMemoryDirectory::new());
        (
            CenterRegistry::new(dir, 1000, catalog.clone(), directory),
            catalog,
        )
    }

    fn pattern() -> WeeklyPattern {
        WeeklyPattern {
            days: vec![PatternDay {
                weekday: chrono::Weekday::Mon,
                intervals: vec![PatternInterval {
                    start_time: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    end_time: chrono::NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    capacity: Some(10),
                }],
            }],
        }
    }

    /// A Monday far enough out that materialized slots are always future.
    fn future_monday() -> NaiveDate {
        let mut date = crate::engine::now_local().date() + chrono::Duration::days(7);
        while date.weekday() != chrono::Weekday::Mon {
            date = date.succ_opt().unwrap();
        }
        date
    }

    #[tokio::test]
    async fn center_isolation() {
        let dir = test_data_dir("isolation");
        let (registry, catalog) = registry(dir);

        let eng_a = registry.get_or_create("center_a").unwrap();
        let eng_b = registry.get_or_create("center_b").unwrap();

        let section = Ulid::new();
        catalog.insert(SectionInfo {
            id: section,
            name: "Yoga".into(),
        });

        let monday = future_monday();
        eng_a
            .materialize_slots(section, &pattern(), monday, monday)
            .await
            .unwrap();

        assert_eq!(eng_a.list_section_slots(section).await.len(), 1);
        assert!(eng_b.list_section_slots(section).await.is_empty());
    }

    #[tokio::test]
    async fn center_lazy_creation() {
        let dir = test_data_dir("lazy");
        let (registry, _) = registry(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _engine = registry.get_or_create("downtown").unwrap();
        assert!(dir.join("downtown.wal").exists());
    }

    #[tokio::test]
    async fn center_same_engine_returned() {
        let dir = test_data_dir("same_engine");
        let (registry, _) = registry(dir);

        let eng1 = registry.get_or_create("foo").unwrap();
        let eng2 = registry.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn center_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let (registry, _) = registry(dir.clone());

        let _engine = registry.get_or_create("../evil").unwrap();
        // "evil.wal" in the data dir, not "../evil.wal" outside it.
        assert!(dir.join("evil.wal").exists());

        let result = registry.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn center_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let (registry, _) = registry(dir);

        let long_name = "x".repeat(MAX_CENTER_NAME_LEN + 1);
        let err = registry.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("center name too long"));
    }

    #[tokio::test]
    async fn center_count_limit() {
        let dir = test_data_dir("count_limit");
        let (registry, _) = registry(dir);

        for i in 0..MAX_CENTERS {
            registry.get_or_create(&format!("c{i}")).unwrap();
        }
        let err = registry.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many centers"));
    }
}
