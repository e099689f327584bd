//! Typed shapes of the managed resource manifests.
//!
//! Every manifest is `{apiVersion, kind, metadata, spec: {deletionPolicy, forProvider, providerConfigRef}}`.
//! Downstream reconciliation matches on these exact field names.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value as Json;

use crate::config::CommonConfig;
use crate::RenderError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Orphan,
}

impl FromStr for DeletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Delete" => Ok(Self::Delete),
            "Orphan" => Ok(Self::Orphan),
            other => Err(format!("expected Delete or Orphan, got {:?}", other)),
        }
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => f.write_str("Delete"),
            Self::Orphan => f.write_str("Orphan"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderConfigRef {
    pub name: String,
}

/// Cross-resource reference resolved by the provider at apply time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_controller_ref: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn controller_ref() -> Self {
        Self { match_controller_ref: Some(true), ..Default::default() }
    }

    pub fn label(key: &str, value: &str) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.to_string(), value.to_string());
        Self { match_controller_ref: None, match_labels }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSpec<P> {
    pub deletion_policy: DeletionPolicy,
    pub for_provider: P,
    pub provider_config_ref: ProviderConfigRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest<P> {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: ObjectMeta,
    pub spec: ManagedSpec<P>,
}

impl<P: Serialize> Manifest<P> {
    pub fn new(api_version: &'static str, kind: &'static str, name: &str, common: &CommonConfig, for_provider: P) -> Self {
        Self {
            api_version,
            kind,
            metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            spec: ManagedSpec {
                deletion_policy: common.deletion_policy,
                for_provider,
                provider_config_ref: ProviderConfigRef { name: common.provider_config_name.clone() },
            },
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<Json, RenderError> {
        serde_json::to_value(self).map_err(|source| RenderError::Encode { kind: self.kind, source })
    }
}

/// Single-element list; the provider schemas model nested blocks as arrays.
pub fn block<T>(value: T) -> Vec<T> {
    vec![value]
}
