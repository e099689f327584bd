//! Composition function wire types (proto3 JSON mapping) and response helpers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Context key under which the pipeline passes the environment document.
pub const ENVIRONMENT_CONTEXT_KEY: &str = "apiextensions.crossplane.io/environment";

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(default)]
    pub tag: String,
    #[serde(default, with = "ttl_secs", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Ready {
    #[default]
    #[serde(rename = "READY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "READY_TRUE")]
    True,
    #[serde(rename = "READY_FALSE")]
    False,
}

/// A composite or composed resource as carried on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub resource: Json,
    /// Values are base64 encoded bytes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection_details: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<Ready>,
}

impl Resource {
    pub fn new(resource: Json) -> Self {
        Self { resource, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunFunctionRequest {
    #[serde(default)]
    pub meta: RequestMeta,
    #[serde(default)]
    pub observed: State,
    #[serde(default)]
    pub desired: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_resources: Option<Json>,
}

impl RunFunctionRequest {
    pub fn context_value(&self, key: &str) -> Option<&Json> {
        self.context.as_ref().and_then(|c| c.get(key))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    #[serde(rename = "SEVERITY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "SEVERITY_FATAL")]
    Fatal,
    #[serde(rename = "SEVERITY_WARNING")]
    Warning,
    #[serde(rename = "SEVERITY_NORMAL")]
    Normal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Target {
    #[serde(rename = "TARGET_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "TARGET_COMPOSITE")]
    Composite,
    #[serde(rename = "TARGET_COMPOSITE_AND_CLAIM")]
    CompositeAndClaim,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FnResult {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    #[serde(rename = "STATUS_CONDITION_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "STATUS_CONDITION_UNKNOWN")]
    Unknown,
    #[serde(rename = "STATUS_CONDITION_TRUE")]
    True,
    #[serde(rename = "STATUS_CONDITION_FALSE")]
    False,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

impl Condition {
    pub fn target_composite_and_claim(&mut self) -> &mut Self {
        self.target = Some(Target::CompositeAndClaim);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunFunctionResponse {
    #[serde(default)]
    pub meta: ResponseMeta,
    #[serde(default)]
    pub desired: State,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<FnResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Json>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl RunFunctionResponse {
    /// Start a response for `req`: echo the tag, set the TTL, carry desired state and context forward.
    pub fn to(req: &RunFunctionRequest, ttl: Duration) -> Self {
        Self {
            meta: ResponseMeta { tag: req.meta.tag.clone(), ttl: Some(ttl) },
            desired: req.desired.clone(),
            results: Vec::new(),
            context: req.context.clone(),
            conditions: Vec::new(),
        }
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        self.push_result(Severity::Fatal, message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push_result(Severity::Warning, message.into());
    }

    pub fn normal(&mut self, message: impl Into<String>) {
        self.push_result(Severity::Normal, message.into());
    }

    fn push_result(&mut self, severity: Severity, message: String) {
        self.results.push(FnResult { severity, message, target: Some(Target::Composite) });
    }

    /// Conditions target the composite unless retargeted.
    pub fn condition_true(&mut self, type_: &str, reason: &str) -> &mut Condition {
        self.conditions.push(Condition {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            reason: reason.to_string(),
            message: None,
            target: Some(Target::Composite),
        });
        let last = self.conditions.len() - 1;
        &mut self.conditions[last]
    }

    pub fn is_fatal(&self) -> bool {
        self.results.iter().any(|r| r.severity == Severity::Fatal)
    }
}

/// Durations travel as `"<seconds>s"` strings in proto3 JSON.
mod ttl_secs {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) if d.subsec_nanos() == 0 => s.serialize_str(&format!("{}s", d.as_secs())),
            Some(d) => s.serialize_str(&format!("{}s", d.as_secs_f64())),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(s) => {
                let secs = s
                    .strip_suffix('s')
                    .and_then(|n| n.parse::<f64>().ok())
                    .filter(|n| n.is_finite() && *n >= 0.0)
                    .ok_or_else(|| D::Error::custom(format!("invalid duration {:?}", s)))?;
                Ok(Some(Duration::from_secs_f64(secs)))
            }
        }
    }
}
