//! Managed Flink application (`kinesisanalyticsv2.aws.upbound.io/v1beta1`, `Application`).

use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::debug;
use xflink_core::fieldpath::shape_of;

use crate::config::{defaults, ConfigReader, RenderContext};
use crate::manifest::{block, Manifest, Selector};
use crate::{RenderError, RenderResult};

pub const API_VERSION: &str = "kinesisanalyticsv2.aws.upbound.io/v1beta1";
pub const KIND: &str = "Application";

/// Property injected into every property map so jobs see the active region.
pub const REGION_PROPERTY_KEY: &str = "AWS_REGION";
pub const CLAIM_NAME_LABEL: &str = "crossplane.io/claim-name";

const APPLICATION_MODE: &str = "STREAMING";
const CODE_CONTENT_TYPE: &str = "ZIPFILE";
const CONFIGURATION_TYPE: &str = "CUSTOM";

/// How the `startApplication` flag is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationMode {
    /// Set the flag whenever it is requested.
    Immediate { requested: bool },
    /// Set the flag only once the application has been ready for `delay_secs`.
    Delayed {
        #[serde(rename = "delaySecs")]
        delay_secs: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    pub code_bucket: String,
    pub code_file: String,
    /// Copy of `environmentProperties` with the region key injected.
    pub environment_properties: Json,
    pub runtime: String,
    pub snapshots_enabled: bool,
    pub checkpointing_enabled: bool,
    pub checkpoint_interval_millis: i64,
    pub log_level: String,
    pub metrics_level: String,
    pub auto_scaling_enabled: bool,
    pub parallelism: i64,
    pub parallelism_per_kpu: i64,
    pub application_restore_type: String,
    pub snapshot_name: Option<String>,
    pub allow_non_restored_state: bool,
    pub activation: ActivationMode,
}

impl ApplicationConfig {
    pub fn resolve(config: &ConfigReader<'_>, region: &str) -> RenderResult<Self> {
        let code_bucket = config.required_string("codeBucket")?;
        let code_file = config.required_string("codeFile")?;
        let mut environment_properties = config.required("environmentProperties")?.clone();
        inject_region(&mut environment_properties, region)?;

        let activation = if config.bool_or("delayedStart", defaults::DELAYED_START)? {
            ActivationMode::Delayed { delay_secs: config.non_negative_or("delayStartBySeconds", defaults::DELAY_START_BY_SECONDS)? }
        } else {
            ActivationMode::Immediate { requested: config.bool_or("startApplication", defaults::START_APPLICATION)? }
        };

        Ok(Self {
            code_bucket,
            code_file,
            environment_properties,
            runtime: config.string_or("runtime", defaults::RUNTIME)?,
            snapshots_enabled: config.bool_or("snapshotsEnabled", defaults::SNAPSHOTS_ENABLED)?,
            checkpointing_enabled: config.bool_or("checkpointingEnabled", defaults::CHECKPOINTING_ENABLED)?,
            checkpoint_interval_millis: config.non_negative_or("checkpointIntervalMillis", defaults::CHECKPOINT_INTERVAL_MILLIS)?,
            log_level: config.string_or("logLevel", defaults::LOG_LEVEL)?,
            metrics_level: config.string_or("metricsLevel", defaults::METRICS_LEVEL)?,
            auto_scaling_enabled: config.bool_or("autoScalingEnabled", defaults::AUTO_SCALING_ENABLED)?,
            parallelism: config.non_negative_or("parallelism", defaults::PARALLELISM)?,
            parallelism_per_kpu: config.non_negative_or("parallelismPerKpu", defaults::PARALLELISM_PER_KPU)?,
            application_restore_type: config.string_or("applicationRestoreType", defaults::APPLICATION_RESTORE_TYPE)?,
            snapshot_name: config.opt_string("snapshotName")?,
            allow_non_restored_state: config.bool_or("allowNonRestoredState", defaults::ALLOW_NON_RESTORED_STATE)?,
            activation,
        })
    }
}

/// Write `AWS_REGION` into every `propertyGroup[].propertyMap` of every entry.
fn inject_region(environment_properties: &mut Json, region: &str) -> RenderResult<()> {
    let base = ConfigReader::path("environmentProperties");
    let found = shape_of(environment_properties);
    let entries = environment_properties
        .as_array_mut()
        .ok_or_else(|| RenderError::malformed(&base, format!("expected array, found {}", found)))?;
    for (i, entry) in entries.iter_mut().enumerate() {
        let entry_path = format!("{}[{}]", base, i);
        let found = shape_of(entry);
        let entry = entry
            .as_object_mut()
            .ok_or_else(|| RenderError::malformed(&entry_path, format!("expected object, found {}", found)))?;
        let groups = match entry.get_mut("propertyGroup") {
            None | Some(Json::Null) => continue,
            Some(Json::Array(groups)) => groups,
            Some(other) => {
                return Err(RenderError::malformed(
                    format!("{}.propertyGroup", entry_path),
                    format!("expected array, found {}", shape_of(other)),
                ))
            }
        };
        for (j, group) in groups.iter_mut().enumerate() {
            let group_path = format!("{}.propertyGroup[{}]", entry_path, j);
            let found = shape_of(group);
            let group = group
                .as_object_mut()
                .ok_or_else(|| RenderError::malformed(&group_path, format!("expected object, found {}", found)))?;
            let map = group.entry("propertyMap").or_insert(Json::Null);
            if map.is_null() {
                *map = Json::Object(Map::new());
            }
            match map {
                Json::Object(props) => {
                    props.insert(REGION_PROPERTY_KEY.to_string(), Json::String(region.to_string()));
                }
                other => {
                    return Err(RenderError::malformed(
                        format!("{}.propertyMap", group_path),
                        format!("expected object, found {}", shape_of(other)),
                    ))
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationParameters {
    pub region: String,
    pub runtime_environment: String,
    pub application_mode: &'static str,
    pub service_execution_role_selector: Selector,
    pub application_configuration: Vec<ApplicationConfiguration>,
    pub cloudwatch_logging_options: Vec<CloudwatchLoggingOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_application: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfiguration {
    pub application_code_configuration: Vec<ApplicationCodeConfiguration>,
    pub application_snapshot_configuration: Vec<ApplicationSnapshotConfiguration>,
    pub environment_properties: Json,
    pub flink_application_configuration: Vec<FlinkApplicationConfiguration>,
    pub run_configuration: Vec<RunConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCodeConfiguration {
    pub code_content_type: &'static str,
    pub code_content: Vec<CodeContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeContent {
    pub s3_content_location: Vec<S3ContentLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3ContentLocation {
    pub file_key: String,
    pub bucket_arn_selector: Selector,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSnapshotConfiguration {
    pub snapshots_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlinkApplicationConfiguration {
    pub checkpoint_configuration: Vec<CheckpointConfiguration>,
    pub monitoring_configuration: Vec<MonitoringConfiguration>,
    pub parallelism_configuration: Vec<ParallelismConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointConfiguration {
    pub checkpoint_interval: i64,
    pub checkpointing_enabled: bool,
    pub configuration_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfiguration {
    pub log_level: String,
    pub metrics_level: String,
    pub configuration_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelismConfiguration {
    pub auto_scaling_enabled: bool,
    pub parallelism: i64,
    pub parallelism_per_kpu: i64,
    pub configuration_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfiguration {
    pub application_restore_configuration: Vec<ApplicationRestoreConfiguration>,
    pub flink_run_configuration: Vec<FlinkRunConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRestoreConfiguration {
    pub application_restore_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlinkRunConfiguration {
    pub allow_non_restored_state: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudwatchLoggingOptions {
    pub log_stream_arn_selector: Selector,
}

pub type ApplicationManifest = Manifest<ApplicationParameters>;

/// Build the application manifest. `startApplication` is left unset; the activation
/// watchdog decides it afterwards.
pub fn generate(ctx: &RenderContext<'_>) -> RenderResult<(ApplicationManifest, ApplicationConfig)> {
    let cfg = ApplicationConfig::resolve(&ctx.config, &ctx.common.region)?;
    debug!(claim = %ctx.common.claim_name, runtime = %cfg.runtime, "rendering application");

    let params = ApplicationParameters {
        region: ctx.common.region.clone(),
        runtime_environment: cfg.runtime.clone(),
        application_mode: APPLICATION_MODE,
        service_execution_role_selector: Selector::controller_ref(),
        application_configuration: block(ApplicationConfiguration {
            application_code_configuration: block(ApplicationCodeConfiguration {
                code_content_type: CODE_CONTENT_TYPE,
                code_content: block(CodeContent {
                    s3_content_location: block(S3ContentLocation {
                        file_key: cfg.code_file.clone(),
                        bucket_arn_selector: Selector::label(CLAIM_NAME_LABEL, &cfg.code_bucket),
                    }),
                }),
            }),
            application_snapshot_configuration: block(ApplicationSnapshotConfiguration { snapshots_enabled: cfg.snapshots_enabled }),
            environment_properties: cfg.environment_properties.clone(),
            flink_application_configuration: block(FlinkApplicationConfiguration {
                checkpoint_configuration: block(CheckpointConfiguration {
                    checkpoint_interval: cfg.checkpoint_interval_millis,
                    checkpointing_enabled: cfg.checkpointing_enabled,
                    configuration_type: CONFIGURATION_TYPE,
                }),
                monitoring_configuration: block(MonitoringConfiguration {
                    log_level: cfg.log_level.clone(),
                    metrics_level: cfg.metrics_level.clone(),
                    configuration_type: CONFIGURATION_TYPE,
                }),
                parallelism_configuration: block(ParallelismConfiguration {
                    auto_scaling_enabled: cfg.auto_scaling_enabled,
                    parallelism: cfg.parallelism,
                    parallelism_per_kpu: cfg.parallelism_per_kpu,
                    configuration_type: CONFIGURATION_TYPE,
                }),
            }),
            run_configuration: block(RunConfiguration {
                application_restore_configuration: block(ApplicationRestoreConfiguration {
                    application_restore_type: cfg.application_restore_type.clone(),
                    snapshot_name: cfg.snapshot_name.clone(),
                }),
                flink_run_configuration: block(FlinkRunConfiguration { allow_non_restored_state: cfg.allow_non_restored_state }),
            }),
        }),
        cloudwatch_logging_options: block(CloudwatchLoggingOptions { log_stream_arn_selector: Selector::controller_ref() }),
        start_application: None,
    };

    let manifest = Manifest::new(API_VERSION, KIND, &ctx.common.claim_name, &ctx.common, params);
    Ok((manifest, cfg))
}
