//! Deployment environment and the table it selects.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AGORA_ENVIRONMENT` | `dev`, `staging` or `production` | `dev` |
//! | `DYNAMO_TABLE_NAME` | Overrides the table selected by the environment | (none) |

use crate::error::{ErrorKind, ResultExt};
use crate::forum_bail;
use anyhow::Context;
use std::env;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Name of the production table. Also used by the backfill tool.
pub const PRODUCTION_TABLE: &str = "reddit-data";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Dev,
    Staging,
    Production,
}

impl Environment {
    /// Reads `AGORA_ENVIRONMENT`, falling back to [`Environment::Dev`] if it is unset.
    pub fn from_env() -> anyhow::Result<Environment> {
        match env::var("AGORA_ENVIRONMENT") {
            Ok(value) => value
                .parse()
                .context("Invalid AGORA_ENVIRONMENT provided in environment"),
            Err(_) => Ok(Environment::default()),
        }
    }

    pub fn table_name(self) -> String {
        match self {
            Environment::Dev => format!("{}-dev", PRODUCTION_TABLE),
            Environment::Staging => format!("{}-staging", PRODUCTION_TABLE),
            Environment::Production => PRODUCTION_TABLE.to_string(),
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => forum_bail!(ErrorKind::Validation, "Unknown environment: '{}'", value),
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };

        write!(f, "{}", name)
    }
}

/// Determines the table to operate on.
///
/// `DYNAMO_TABLE_NAME` wins if present, otherwise the table follows the environment.
pub fn table_name() -> anyhow::Result<String> {
    match env::var("DYNAMO_TABLE_NAME") {
        Ok(name) if !name.trim().is_empty() => Ok(name),
        _ => Environment::from_env()
            .map(Environment::table_name)
            .mark_invalid(),
    }
}
