//! Configuration resolution from `spec.resourceConfig` with documented defaults.

use serde::Serialize;
use serde_json::{Map, Value as Json};
use xflink_core::Paved;

use crate::manifest::DeletionPolicy;
use crate::{RenderError, RenderResult};

pub const RESOURCE_CONFIG_PATH: &str = "spec.resourceConfig";

pub mod defaults {
    pub const REGION: &str = "us-east-2";
    pub const RUNTIME: &str = "FLINK-1_18";
    pub const SNAPSHOTS_ENABLED: bool = true;
    pub const CHECKPOINTING_ENABLED: bool = true;
    pub const CHECKPOINT_INTERVAL_MILLIS: i64 = 300_000;
    pub const LOG_LEVEL: &str = "INFO";
    pub const METRICS_LEVEL: &str = "TASK";
    pub const AUTO_SCALING_ENABLED: bool = false;
    pub const PARALLELISM: i64 = 1;
    pub const PARALLELISM_PER_KPU: i64 = 1;
    pub const APPLICATION_RESTORE_TYPE: &str = "RESTORE_FROM_LATEST_SNAPSHOT";
    pub const ALLOW_NON_RESTORED_STATE: bool = false;
    pub const DELAYED_START: bool = false;
    pub const START_APPLICATION: bool = false;
    pub const DELAY_START_BY_SECONDS: i64 = 120;
    pub const LOG_RETENTION_IN_DAYS: i64 = 7;
    pub const PROVIDER_CONFIG_NAME: &str = "provider-aws";
}

/// Typed reads relative to `spec.resourceConfig`. Errors carry the full composite path.
#[derive(Debug, Clone, Copy)]
pub struct ConfigReader<'a> {
    paved: Paved<'a>,
}

impl<'a> ConfigReader<'a> {
    pub fn new(composite: &'a Json) -> Self {
        Self { paved: Paved::new(composite) }
    }

    pub fn composite(&self) -> Paved<'a> {
        self.paved
    }

    pub fn path(field: &str) -> String {
        format!("{}.{}", RESOURCE_CONFIG_PATH, field)
    }

    pub fn string_or(&self, field: &str, default: &str) -> RenderResult<String> {
        Ok(self.paved.string_or(&Self::path(field), default)?)
    }

    pub fn opt_string(&self, field: &str) -> RenderResult<Option<String>> {
        Ok(self.paved.opt_string(&Self::path(field))?.map(str::to_string))
    }

    pub fn bool_or(&self, field: &str, default: bool) -> RenderResult<bool> {
        Ok(self.paved.bool_or(&Self::path(field), default)?)
    }

    pub fn integer_or(&self, field: &str, default: i64) -> RenderResult<i64> {
        Ok(self.paved.integer_or(&Self::path(field), default)?)
    }

    /// Integer that must not be negative (counts, durations, intervals).
    pub fn non_negative_or(&self, field: &str, default: i64) -> RenderResult<i64> {
        let v = self.integer_or(field, default)?;
        if v < 0 {
            return Err(RenderError::malformed(Self::path(field), format!("must not be negative, got {}", v)));
        }
        Ok(v)
    }

    pub fn array_or_empty(&self, field: &str) -> RenderResult<&'a [Json]> {
        Ok(self.paved.array_or_empty(&Self::path(field))?)
    }

    /// Required field of any shape; absence (or null) is fatal.
    pub fn required(&self, field: &str) -> RenderResult<&'a Json> {
        let path = Self::path(field);
        match self.paved.get(&path) {
            Ok(Json::Null) => Err(RenderError::MissingField { path }),
            Ok(v) => Ok(v),
            Err(e) if e.is_not_found() => Err(RenderError::MissingField { path }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn required_string(&self, field: &str) -> RenderResult<String> {
        let path = Self::path(field);
        match self.paved.opt_string(&path)? {
            Some(s) => Ok(s.to_string()),
            None => Err(RenderError::MissingField { path }),
        }
    }
}

/// Settings shared by every generated manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfig {
    pub claim_name: String,
    pub region: String,
    pub deletion_policy: DeletionPolicy,
    pub provider_config_name: String,
}

impl CommonConfig {
    pub fn resolve(config: &ConfigReader<'_>) -> RenderResult<Self> {
        let deletion_policy = match config.opt_string("deletionPolicy")? {
            None => DeletionPolicy::default(),
            Some(raw) => raw.parse().map_err(|reason: String| RenderError::malformed(ConfigReader::path("deletionPolicy"), reason))?,
        };
        Ok(Self {
            claim_name: claim_name(config.composite())?,
            region: config.string_or("region", defaults::REGION)?,
            deletion_policy,
            provider_config_name: config.string_or("providerConfigName", defaults::PROVIDER_CONFIG_NAME)?,
        })
    }
}

/// Claim the composite is bound to; a composite created directly falls back to its own name.
pub fn claim_name(composite: Paved<'_>) -> RenderResult<String> {
    if let Some(name) = composite.opt_string("spec.claimRef.name")? {
        return Ok(name.to_string());
    }
    match composite.opt_string("metadata.name")? {
        Some(name) => Ok(name.to_string()),
        None => Err(RenderError::MissingField { path: "spec.claimRef.name".into() }),
    }
}

/// Everything a generator may read: the composite's config, shared settings and the environment.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub config: ConfigReader<'a>,
    pub common: CommonConfig,
    pub environment: &'a Map<String, Json>,
}

impl<'a> RenderContext<'a> {
    pub fn new(composite: &'a Json, environment: &'a Map<String, Json>) -> RenderResult<Self> {
        let config = ConfigReader::new(composite);
        let common = CommonConfig::resolve(&config)?;
        Ok(Self { config, common, environment })
    }

    /// Environment value that must be present as a string.
    pub fn environment_string(&self, key: &str) -> RenderResult<String> {
        match self.environment.get(key) {
            None | Some(Json::Null) => Err(RenderError::MissingReference { key: key.to_string() }),
            Some(Json::String(s)) => Ok(s.clone()),
            Some(other) => Err(RenderError::malformed(
                format!("environment.{}", key),
                format!("expected string, found {}", xflink_core::fieldpath::shape_of(other)),
            )),
        }
    }
}
