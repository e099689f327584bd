//! Execution role (`iam.aws.upbound.io/v1beta1`, `Role`) with its trust and permission policies.

use serde::Serialize;
use serde_json::{Map, Value as Json};
use xflink_core::fieldpath::shape_of;

use crate::config::{ConfigReader, RenderContext};
use crate::logs::log_group_name;
use crate::manifest::Manifest;
use crate::{RenderError, RenderResult};

pub const API_VERSION: &str = "iam.aws.upbound.io/v1beta1";
pub const KIND: &str = "Role";

/// Environment key carrying the AWS account the role lives in.
pub const ACCOUNT_ID_KEY: &str = "awsAccountID";

pub const BUILTIN_MANAGED_POLICIES: [&str; 2] =
    ["arn:aws:iam::aws:policy/AmazonS3FullAccess", "arn:aws:iam::aws:policy/CloudWatchFullAccess"];

const POLICY_VERSION: &str = "2012-10-17";
const SERVICE_PRINCIPAL: &str = "kinesisanalytics.amazonaws.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: &'static str,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    pub action: OneOrMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl PolicyDocument {
    fn single(statement: Statement) -> Self {
        Self { version: POLICY_VERSION, statement: vec![statement] }
    }

    pub fn to_json_string(&self) -> RenderResult<String> {
        serde_json::to_string(self).map_err(|source| RenderError::Encode { kind: "PolicyDocument", source })
    }
}

pub fn trust_policy() -> PolicyDocument {
    PolicyDocument::single(Statement {
        effect: "Allow",
        principal: Some(Principal { service: SERVICE_PRINCIPAL }),
        resource: None,
        action: OneOrMany::One("sts:AssumeRole".into()),
    })
}

fn logs_policy(log_group_arn: &str) -> PolicyDocument {
    PolicyDocument::single(Statement {
        effect: "Allow",
        principal: None,
        resource: Some(OneOrMany::Many(vec![log_group_arn.to_string()])),
        action: OneOrMany::Many(vec![
            "logs:DescribeLogGroups".into(),
            "logs:DescribeLogStreams".into(),
            "logs:PutLogEvents".into(),
        ]),
    })
}

fn metrics_policy() -> PolicyDocument {
    PolicyDocument::single(Statement {
        effect: "Allow",
        principal: None,
        resource: Some(OneOrMany::One("*".into())),
        action: OneOrMany::Many(vec!["cloudwatch:PutMetricData".into()]),
    })
}

pub fn log_group_arn(region: &str, account_id: &str, log_group_name: &str) -> String {
    format!("arn:aws:logs:{}:{}:log-group:{}", region, account_id, log_group_name)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InlinePolicy {
    Named { name: String, policy: String },
    /// Caller supplied entry, passed through as given.
    Raw(Map<String, Json>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    pub role_name: String,
    pub account_id: String,
    pub log_group_arn: String,
    pub additional_managed_policy_arns: Vec<String>,
    pub additional_inline_policies: Vec<Map<String, Json>>,
}

impl RoleConfig {
    pub fn resolve(ctx: &RenderContext<'_>) -> RenderResult<Self> {
        let config = &ctx.config;
        let managed_path = ConfigReader::path("additionalPermissions.managedPolicyArns");
        let additional_managed_policy_arns = config
            .array_or_empty("additionalPermissions.managedPolicyArns")?
            .iter()
            .enumerate()
            .map(|(i, v)| match v {
                Json::String(s) => Ok(s.clone()),
                other => Err(RenderError::malformed(
                    format!("{}[{}]", managed_path, i),
                    format!("entry is not a string (found {})", shape_of(other)),
                )),
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let inline_path = ConfigReader::path("additionalPermissions.inlinePolicies");
        let additional_inline_policies = config
            .array_or_empty("additionalPermissions.inlinePolicies")?
            .iter()
            .enumerate()
            .map(|(i, v)| match v {
                Json::Object(m) => Ok(m.clone()),
                other => Err(RenderError::malformed(
                    format!("{}[{}]", inline_path, i),
                    format!("entry is not a map (found {})", shape_of(other)),
                )),
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let account_id = ctx.environment_string(ACCOUNT_ID_KEY)?;
        let group = log_group_name(config, &ctx.common.claim_name)?;
        Ok(Self {
            role_name: format!("{}-role", ctx.common.claim_name),
            log_group_arn: log_group_arn(&ctx.common.region, &account_id, &group),
            account_id,
            additional_managed_policy_arns,
            additional_inline_policies,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleParameters {
    /// JSON policy document, as a string.
    pub assume_role_policy: String,
    pub managed_policy_arns: Vec<String>,
    pub inline_policy: Vec<InlinePolicy>,
}

pub fn generate(ctx: &RenderContext<'_>) -> RenderResult<Manifest<RoleParameters>> {
    let cfg = RoleConfig::resolve(ctx)?;

    let managed_policy_arns = BUILTIN_MANAGED_POLICIES
        .iter()
        .map(|s| s.to_string())
        .chain(cfg.additional_managed_policy_arns.iter().cloned())
        .collect();

    let mut inline_policy = vec![
        InlinePolicy::Named { name: "logs_policy".into(), policy: logs_policy(&cfg.log_group_arn).to_json_string()? },
        InlinePolicy::Named { name: "metrics_policy".into(), policy: metrics_policy().to_json_string()? },
    ];
    inline_policy.extend(cfg.additional_inline_policies.iter().cloned().map(InlinePolicy::Raw));

    let params = RoleParameters { assume_role_policy: trust_policy().to_json_string()?, managed_policy_arns, inline_policy };
    Ok(Manifest::new(API_VERSION, KIND, &cfg.role_name, &ctx.common, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn xr(config: Json) -> Json {
        json!({ "metadata": { "name": "x" }, "spec": { "claimRef": { "name": "flink-test" }, "resourceConfig": config } })
    }

    fn env() -> Map<String, Json> {
        let mut env = Map::new();
        env.insert(ACCOUNT_ID_KEY.into(), json!("000000000000"));
        env
    }

    #[test]
    fn builtins_come_first_even_without_additions() {
        let doc = xr(json!({}));
        let env = env();
        let ctx = RenderContext::new(&doc, &env).unwrap();
        let m = generate(&ctx).unwrap();
        assert_eq!(m.name(), "flink-test-role");
        assert_eq!(m.spec.for_provider.managed_policy_arns, BUILTIN_MANAGED_POLICIES.map(String::from).to_vec());
        assert_eq!(m.spec.for_provider.inline_policy.len(), 2);
    }

    #[test]
    fn additions_follow_builtins_in_order() {
        let doc = xr(json!({
            "region": "us-west-2",
            "additionalPermissions": {
                "managedPolicyArns": ["arn:aws:iam::aws:policy/AmazonKinesisFullAccess", "arn:aws:iam::aws:policy/AmazonMSKReadOnlyAccess"],
                "inlinePolicies": [{ "name": "kinesis_policy", "policy": "{}" }]
            }
        }));
        let env = env();
        let ctx = RenderContext::new(&doc, &env).unwrap();
        let v = generate(&ctx).unwrap().to_json().unwrap();
        let fp = &v["spec"]["forProvider"];
        assert_eq!(
            fp["managedPolicyArns"],
            json!([
                "arn:aws:iam::aws:policy/AmazonS3FullAccess",
                "arn:aws:iam::aws:policy/CloudWatchFullAccess",
                "arn:aws:iam::aws:policy/AmazonKinesisFullAccess",
                "arn:aws:iam::aws:policy/AmazonMSKReadOnlyAccess"
            ])
        );
        assert_eq!(fp["inlinePolicy"][0]["name"], "logs_policy");
        assert_eq!(fp["inlinePolicy"][1]["name"], "metrics_policy");
        assert_eq!(fp["inlinePolicy"][2], json!({ "name": "kinesis_policy", "policy": "{}" }));
    }

    #[test]
    fn logs_policy_is_scoped_to_the_log_group_arn() {
        let doc = xr(json!({ "region": "us-west-2" }));
        let env = env();
        let ctx = RenderContext::new(&doc, &env).unwrap();
        let m = generate(&ctx).unwrap();
        let InlinePolicy::Named { policy, .. } = &m.spec.for_provider.inline_policy[0] else { panic!("expected builtin policy") };
        let doc: Json = serde_json::from_str(policy).unwrap();
        assert_eq!(doc["Statement"][0]["Resource"], json!(["arn:aws:logs:us-west-2:000000000000:log-group:flink-test-log-group"]));
        assert_eq!(doc["Version"], "2012-10-17");

        let InlinePolicy::Named { policy, .. } = &m.spec.for_provider.inline_policy[1] else { panic!("expected builtin policy") };
        let doc: Json = serde_json::from_str(policy).unwrap();
        assert_eq!(doc["Statement"][0]["Resource"], "*");
        assert_eq!(doc["Statement"][0]["Action"], json!(["cloudwatch:PutMetricData"]));
    }

    #[test]
    fn trust_policy_allows_the_flink_service() {
        let v: Json = serde_json::from_str(&trust_policy().to_json_string().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({
                "Version": "2012-10-17",
                "Statement": [{ "Effect": "Allow", "Principal": { "Service": "kinesisanalytics.amazonaws.com" }, "Action": "sts:AssumeRole" }]
            })
        );
    }

    #[test]
    fn missing_account_id_is_fatal() {
        let doc = xr(json!({}));
        let env = Map::new();
        let ctx = RenderContext::new(&doc, &env).unwrap();
        let e = generate(&ctx).unwrap_err();
        assert!(matches!(e, RenderError::MissingReference { ref key } if key == ACCOUNT_ID_KEY), "{}", e);
    }

    #[test]
    fn non_map_inline_policy_names_its_index() {
        let doc = xr(json!({ "additionalPermissions": { "inlinePolicies": [{ "name": "ok", "policy": "{}" }, "oops"] } }));
        let env = env();
        let ctx = RenderContext::new(&doc, &env).unwrap();
        let e = generate(&ctx).unwrap_err().to_string();
        assert_eq!(e, "spec.resourceConfig.additionalPermissions.inlinePolicies[1]: entry is not a map (found string)");
    }

    #[test]
    fn managed_policy_list_must_be_an_array() {
        let doc = xr(json!({ "additionalPermissions": { "managedPolicyArns": "arn:aws:iam::aws:policy/X" } }));
        let env = env();
        let ctx = RenderContext::new(&doc, &env).unwrap();
        let e = generate(&ctx).unwrap_err().to_string();
        assert!(e.contains("expected array, found string"), "{}", e);
    }
}
