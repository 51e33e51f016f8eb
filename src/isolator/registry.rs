use std::sync::Arc;

use super::{is_configuration_supported, mysql::MySqlIsolator, postgres::PostgresIsolator, DatabaseIsolator, IsolationError};
use crate::config::{Binaries, DatabaseConfig};
use crate::executor::Executor;
use crate::platform::{self, OsFamily};

/// Isolator variants in registration order. Selection returns the first one
/// whose capability declaration accepts the configuration.
#[derive(Default, Clone)]
pub struct IsolatorRegistry {
    isolators: Vec<Arc<dyn DatabaseIsolator>>,
}

impl IsolatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the MySQL and Postgres isolators.
    pub fn with_defaults(executor: Arc<dyn Executor>, binaries: &Binaries) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MySqlIsolator::with_binaries(executor.clone(), binaries)));
        registry.register(Arc::new(PostgresIsolator::with_binaries(executor, binaries)));
        registry
    }

    pub fn register(&mut self, isolator: Arc<dyn DatabaseIsolator>) {
        self.isolators.push(isolator);
    }

    pub fn isolators(&self) -> &[Arc<dyn DatabaseIsolator>] {
        &self.isolators
    }

    pub fn select_for(&self, config: &DatabaseConfig, os: OsFamily) -> Option<Arc<dyn DatabaseIsolator>> {
        self.isolators
            .iter()
            .find(|iso| is_configuration_supported(iso.as_ref(), config, os))
            .cloned()
    }

    /// Pick the isolator for `config` on the running host.
    pub fn select(&self, config: &DatabaseConfig) -> Result<Arc<dyn DatabaseIsolator>, IsolationError> {
        if !config.is_valid() {
            return Err(IsolationError::InvalidConfiguration(config.db_name.clone()));
        }
        let os = platform::current_os();
        self.select_for(config, os).ok_or_else(|| IsolationError::Unsupported {
            driver: config.driver.clone(),
            os,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Driver;
    use crate::isolator::testing::RecordingExecutor;

    fn registry() -> IsolatorRegistry {
        IsolatorRegistry::with_defaults(Arc::new(RecordingExecutor::default()), &Binaries::default())
    }

    #[test]
    fn selects_by_driver() {
        let reg = registry();
        let mysql = DatabaseConfig::new(Driver::PdoMysql, "shop");
        let pgsql = DatabaseConfig::new(Driver::PdoPgsql, "shop");
        assert_eq!(reg.select_for(&mysql, OsFamily::Linux).unwrap().name(), "mysql");
        assert_eq!(reg.select_for(&pgsql, OsFamily::Windows).unwrap().name(), "postgres");
    }

    #[test]
    fn rejects_mac_and_unknown_hosts() {
        let reg = registry();
        for driver in Driver::ALL {
            let cfg = DatabaseConfig::new(driver, "shop");
            assert!(reg.select_for(&cfg, OsFamily::Mac).is_none());
            assert!(reg.select_for(&cfg, OsFamily::Unknown).is_none());
        }
    }

    #[test]
    fn sqlite_has_no_isolator() {
        let cfg = DatabaseConfig::new(Driver::PdoSqlite, "shop");
        assert!(registry().select_for(&cfg, OsFamily::Linux).is_none());
        assert!(matches!(registry().select(&cfg), Err(IsolationError::Unsupported { .. })));
    }

    #[test]
    fn invalid_configuration_is_reported_before_matching() {
        let cfg = DatabaseConfig::new(Driver::PdoMysql, "");
        assert!(matches!(registry().select(&cfg), Err(IsolationError::InvalidConfiguration(_))));
    }

    #[test]
    fn empty_registry_supports_nothing() {
        let cfg = DatabaseConfig::new(Driver::PdoMysql, "shop");
        assert!(IsolatorRegistry::new().select_for(&cfg, OsFamily::Linux).is_none());
    }
}
