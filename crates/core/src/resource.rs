use std::fmt;
use std::str::FromStr;

use kube::{core::GroupVersionKind, CustomResource, ResourceExt};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{EchoError, EchoResult};

/// Desired state: which object to read and which field to republish.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[kube(
    group = "testapp.my.domain",
    version = "v1",
    kind = "Echo",
    plural = "echoes",
    namespaced,
    status = "EchoStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct EchoSpec {
    /// apiVersion of the target, e.g. `v1` or `apps/v1`.
    pub api_version: String,
    pub kind: String,
    pub name: String,
    /// Empty or absent for cluster-scoped targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Dot-delimited path into the target, e.g. `spec.replicas`.
    pub ref_path: String,
}

/// Observed state. Only the reconciler writes here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoStatus {
    /// Last successfully extracted value, stored verbatim. A present `null`
    /// stays `Some(Value::Null)`; only an absent field is `None`.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present_value")]
    pub data: Option<Value>,
}

fn present_value<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

impl Echo {
    pub fn key(&self) -> ObjectKey {
        ObjectKey { namespace: self.namespace(), name: self.name_any() }
    }

    pub fn target(&self) -> TargetRef {
        TargetRef::from(&self.spec)
    }

    pub fn observed(&self) -> Option<&Value> {
        self.status.as_ref().and_then(|s| s.data.as_ref())
    }
}

/// Namespaced identity of an `Echo` object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string()), name: name.to_string() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = EchoError;

    /// Accepts `ns/name` or a bare `name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(ObjectKey::new(None, name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(ObjectKey::new(Some(ns), name)),
            _ => Err(EchoError::Schema(format!("invalid object key: {} (expect ns/name or name)", s))),
        }
    }
}

/// Reference to the object an `Echo` reads from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl TargetRef {
    /// Split `apiVersion` into `(group, version)`; the core group is empty.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = self.group_version();
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    /// `v1/Kind` or `group/v1/Kind`.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version, self.kind)
    }

    pub fn validate(&self) -> EchoResult<()> {
        let (_, version) = self.group_version();
        if self.kind.is_empty() || version.is_empty() {
            return Err(EchoError::Schema(format!(
                "target kind/apiVersion must be set (got {:?}/{:?})",
                self.api_version, self.kind
            )));
        }
        if self.name.is_empty() {
            return Err(EchoError::Schema(format!("target name must be set for {}", self.gvk_key())));
        }
        Ok(())
    }
}

impl From<&EchoSpec> for TargetRef {
    fn from(spec: &EchoSpec) -> Self {
        Self {
            api_version: spec.api_version.clone(),
            kind: spec.kind.clone(),
            name: spec.name.clone(),
            namespace: spec.namespace.clone().filter(|ns| !ns.is_empty()),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvk_key(), ns, self.name),
            None => write!(f, "{} {}", self.gvk_key(), self.name),
        }
    }
}
