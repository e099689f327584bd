//! CloudWatch log group and log stream (`cloudwatchlogs.aws.upbound.io/v1beta1`).

use serde::Serialize;

use crate::config::{defaults, ConfigReader, RenderContext};
use crate::manifest::{Manifest, Selector};
use crate::RenderResult;

pub const API_VERSION: &str = "cloudwatchlogs.aws.upbound.io/v1beta1";
pub const GROUP_KIND: &str = "Group";
pub const STREAM_KIND: &str = "Stream";

/// Log group name: `spec.resourceConfig.logGroupName`, else `<claim>-log-group`.
pub fn log_group_name(config: &ConfigReader<'_>, claim_name: &str) -> RenderResult<String> {
    config.string_or("logGroupName", &format!("{}-log-group", claim_name))
}

pub fn log_stream_name(config: &ConfigReader<'_>, claim_name: &str) -> RenderResult<String> {
    config.string_or("logStreamName", &format!("{}-log-stream", claim_name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogGroupParameters {
    pub region: String,
    pub retention_in_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStreamParameters {
    pub region: String,
    pub name: String,
    pub log_group_name_selector: Selector,
}

pub fn generate_group(ctx: &RenderContext<'_>) -> RenderResult<Manifest<LogGroupParameters>> {
    let name = log_group_name(&ctx.config, &ctx.common.claim_name)?;
    let params = LogGroupParameters {
        region: ctx.common.region.clone(),
        retention_in_days: ctx.config.non_negative_or("logRetentionInDays", defaults::LOG_RETENTION_IN_DAYS)?,
    };
    Ok(Manifest::new(API_VERSION, GROUP_KIND, &name, &ctx.common, params))
}

/// The stream finds its group through the shared controller rather than by name,
/// so it can be rendered before the group exists.
pub fn generate_stream(ctx: &RenderContext<'_>) -> RenderResult<Manifest<LogStreamParameters>> {
    let name = log_stream_name(&ctx.config, &ctx.common.claim_name)?;
    let params = LogStreamParameters {
        region: ctx.common.region.clone(),
        name: name.clone(),
        log_group_name_selector: Selector::controller_ref(),
    };
    Ok(Manifest::new(API_VERSION, STREAM_KIND, &name, &ctx.common, params))
}
