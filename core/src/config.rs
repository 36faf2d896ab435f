//! Layered configuration (`§9` ADDED): environment, dotfile, and CLI flags
//! merged via `ortho_config`, in the style of the teacher's `er_snapshots`
//! binary configuration.

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

fn default_max_ordinal_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    50
}

fn default_backoff_factor() -> u32 {
    2
}

/// Top-level configuration for the ledger core and the `import-package`
/// binary.
///
/// Values are resolved in the order `ortho_config` always applies: defaults,
/// then discovered config files, then the `LEDGER_` environment prefix, then
/// CLI flags (highest precedence).
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "LEDGER")]
pub struct LedgerSettings {
    /// PostgreSQL connection string.
    pub database_url: String,

    /// Maximum number of ordinal-conflict retries the append coordinator
    /// performs before giving up (`§4.3`).
    #[ortho_config(default = default_max_ordinal_retries())]
    pub max_ordinal_retries: u32,

    /// Base delay, in milliseconds, for the append coordinator's
    /// exponential backoff.
    #[ortho_config(default = default_backoff_base_ms())]
    pub backoff_base_ms: u64,

    /// Multiplicative factor applied to the backoff delay after each
    /// retry.
    #[ortho_config(default = default_backoff_factor())]
    pub backoff_factor: u32,

    /// Enable the Prometheus metrics adapter (requires the `metrics`
    /// feature).
    #[ortho_config(cli_long = "enable-metrics")]
    pub metrics_enabled: bool,

    /// Include `embedding_hint` in lore chunk `content_hash` computation
    /// (`features.embeddings`, `§4.6`).
    #[ortho_config(cli_long = "enable-embeddings")]
    pub embeddings_enabled: bool,
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use env_lock::lock_env;

    use super::*;

    #[test]
    fn defaults_apply_when_only_the_required_field_is_set() {
        let _guard = lock_env([
            ("LEDGER_DATABASE_URL", Some("postgres://localhost/ledger".to_owned())),
            ("LEDGER_MAX_ORDINAL_RETRIES", None::<String>),
            ("LEDGER_BACKOFF_BASE_MS", None::<String>),
            ("LEDGER_BACKOFF_FACTOR", None::<String>),
            ("LEDGER_METRICS_ENABLED", None::<String>),
            ("LEDGER_EMBEDDINGS_ENABLED", None::<String>),
        ]);

        let settings =
            LedgerSettings::load_from_iter([OsString::from("import-package")]).expect("loads");
        assert_eq!(settings.max_ordinal_retries, 5);
        assert_eq!(settings.backoff_base_ms, 50);
        assert_eq!(settings.backoff_factor, 2);
        assert!(!settings.metrics_enabled);
        assert!(!settings.embeddings_enabled);
    }

    #[test]
    fn environment_overrides_defaults() {
        let _guard = lock_env([
            ("LEDGER_DATABASE_URL", Some("postgres://localhost/ledger".to_owned())),
            ("LEDGER_MAX_ORDINAL_RETRIES", Some("8".to_owned())),
            ("LEDGER_BACKOFF_BASE_MS", None::<String>),
            ("LEDGER_BACKOFF_FACTOR", None::<String>),
            ("LEDGER_METRICS_ENABLED", Some("true".to_owned())),
            ("LEDGER_EMBEDDINGS_ENABLED", None::<String>),
        ]);

        let settings =
            LedgerSettings::load_from_iter([OsString::from("import-package")]).expect("loads");
        assert_eq!(settings.max_ordinal_retries, 8);
        assert!(settings.metrics_enabled);
    }
}
