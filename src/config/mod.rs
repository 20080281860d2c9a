mod basic;
mod database;

pub use basic::BasicConfig;
pub use database::DatabaseConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AgentDbError, Result};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core settings (see `basic` table in agentdb.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Connection and migration settings (see `database` table in agentdb.toml).
    #[serde(default)]
    pub database: DatabaseConfig,
}

const DEFAULT_CONFIG_FILE: &str = "agentdb.toml";
const ENV_PREFIX: &str = "AGENTDB_";

impl Config {
    /// Builds a Figment that merges defaults, a config TOML file and `AGENTDB_*` variables.
    ///
    /// Without an explicit path, `agentdb.toml` is read when present. Nested keys use `__`
    /// in variable names, e.g. `AGENTDB_DATABASE__DIALECT=postgres`.
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = match path {
            Some(path) => figment.merge(Toml::file_exact(path)),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
            }
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg: Self = Self::figment(path)
            .extract()
            .map_err(|err| AgentDbError::Config(err.to_string()))?;
        cfg.database.dialect()?;
        if cfg.database.max_connections == 0 {
            return Err(AgentDbError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "agentdb.toml",
                r#"
                [basic]
                loglevel = "debug"

                [database]
                dialect = "postgres"
                name = "orchestrator"
                query_timeout_secs = 30
                "#,
            )?;
            jail.set_env("AGENTDB_DATABASE__NAME", "override");

            let cfg = Config::load(None).expect("config loads");
            assert_eq!(cfg.basic.loglevel, "debug");
            assert_eq!(cfg.database.dialect, "postgres");
            assert_eq!(cfg.database.name, "override");
            assert_eq!(cfg.database.max_connections, 15);
            assert_eq!(
                cfg.database.query_timeout(),
                Some(std::time::Duration::from_secs(30))
            );
            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_dialect() {
        Jail::expect_with(|jail| {
            jail.set_env("AGENTDB_DATABASE__DIALECT", "oracle");
            assert!(matches!(
                Config::load(None),
                Err(AgentDbError::UnsupportedDialect(_))
            ));
            Ok(())
        });
    }
}
