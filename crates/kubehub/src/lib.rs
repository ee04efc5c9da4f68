//! Echo kubehub: `Echo` storage and dynamic target resolution on top of kube-rs.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use echo_core::{Echo, EchoError, EchoResult, EchoStore, ObjectKey, Resolver, TargetRef};
use kube::{
    api::{Api, DynamicObject, PostParams},
    discovery::{self, Scope},
    Client,
};
use metrics::counter;
use serde_json::Value;
use tracing::debug;

/// Build a client from the local kubeconfig or the in-cluster environment.
pub async fn connect() -> Result<Client> {
    Client::try_default().await.context("building kube client (kubeconfig or in-cluster env)")
}

/// Map a kube error onto the reconciler's taxonomy. `what` names the call.
pub fn classify(err: kube::Error, what: &str) -> EchoError {
    match err {
        kube::Error::Api(ae) => {
            let msg = format!("{}: {} ({})", what, ae.message, ae.reason);
            match ae.code {
                404 => EchoError::NotFound(msg),
                409 => EchoError::Conflict(msg),
                401 | 403 => EchoError::PermissionDenied(msg),
                429 | 500..=599 => EchoError::Transient(msg),
                400 | 422 => EchoError::Schema(msg),
                code => EchoError::Internal(format!("{} [http {}]", msg, code)),
            }
        }
        kube::Error::HyperError(e) => EchoError::Transient(format!("{}: {}", what, e)),
        kube::Error::Service(e) => EchoError::Transient(format!("{}: {}", what, e)),
        kube::Error::Discovery(e) => EchoError::Schema(format!("{}: {}", what, e)),
        other => EchoError::Internal(format!("{}: {}", what, other)),
    }
}

/// Discovery failures for the target's group/version. An unserved
/// group/version is a schema problem, not a missing target.
fn discovery_error(err: kube::Error, target: &TargetRef) -> EchoError {
    match classify(err, &format!("discover {}", target.gvk_key())) {
        EchoError::NotFound(msg) => EchoError::Schema(msg),
        other => other,
    }
}

/// Namespace to address `target` in, given the scope discovery reported.
fn scope_namespace<'a>(scope: &Scope, target: &'a TargetRef) -> EchoResult<Option<&'a str>> {
    match (scope, target.namespace.as_deref()) {
        (Scope::Namespaced, Some(ns)) => Ok(Some(ns)),
        (Scope::Namespaced, None) => {
            Err(EchoError::Schema(format!("namespace required for namespaced kind {}", target.gvk_key())))
        }
        (Scope::Cluster, ns) => {
            if ns.is_some() {
                debug!(tgt = %target, "ignoring namespace for cluster-scoped kind");
            }
            Ok(None)
        }
    }
}

/// The fetched object as the reconciler sees it: the whole object, metadata included.
fn target_value(obj: &DynamicObject) -> EchoResult<Value> {
    Ok(serde_json::to_value(obj)?)
}

fn result_label(res: &EchoResult<Value>) -> &'static str {
    match res {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

/// `EchoStore` backed by the API server. Status writes go through the
/// `status` subresource with the object's resourceVersion as precondition.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &ObjectKey) -> Api<Echo> {
        match key.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl EchoStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> EchoResult<Option<Echo>> {
        self.api(key).get_opt(&key.name).await.map_err(|e| classify(e, &format!("get echo {}", key)))
    }

    async fn update_status(&self, echo: &Echo) -> EchoResult<Echo> {
        let key = echo.key();
        let body = serde_json::to_vec(echo)?;
        self.api(&key)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| classify(e, &format!("update status of echo {}", key)))
    }
}

/// Resolves arbitrary kinds through discovery of the target's group/version.
#[derive(Clone)]
pub struct KubeResolver {
    client: Client,
}

impl KubeResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn api_for(&self, target: &TargetRef) -> EchoResult<Api<DynamicObject>> {
        let (ar, caps) = discovery::pinned_kind(&self.client, &target.gvk())
            .await
            .map_err(|e| discovery_error(e, target))?;
        Ok(match scope_namespace(&caps.scope, target)? {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn fetch(&self, target: &TargetRef) -> EchoResult<Value> {
        target.validate()?;
        let api = self.api_for(target).await?;
        let obj = api.get(&target.name).await.map_err(|e| classify(e, &format!("get {}", target)))?;
        target_value(&obj)
    }
}

#[async_trait]
impl Resolver for KubeResolver {
    async fn resolve(&self, target: &TargetRef) -> EchoResult<Value> {
        let res = self.fetch(target).await;
        counter!("echo_resolve_total", 1u64, "result" => result_label(&res));
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_core::{extract, FieldPath};

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: format!("{} happened", reason),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn classify_maps_status_codes() {
        assert!(matches!(classify(api_err(404, "NotFound"), "get"), EchoError::NotFound(_)));
        assert!(matches!(classify(api_err(409, "Conflict"), "put"), EchoError::Conflict(_)));
        assert!(matches!(classify(api_err(403, "Forbidden"), "get"), EchoError::PermissionDenied(_)));
        assert!(matches!(classify(api_err(401, "Unauthorized"), "get"), EchoError::PermissionDenied(_)));
        assert!(matches!(classify(api_err(429, "TooManyRequests"), "get"), EchoError::Transient(_)));
        assert!(matches!(classify(api_err(503, "ServiceUnavailable"), "get"), EchoError::Transient(_)));
        assert!(matches!(classify(api_err(422, "Invalid"), "put"), EchoError::Schema(_)));
        assert!(matches!(classify(api_err(418, "Teapot"), "get"), EchoError::Internal(_)));
    }

    #[test]
    fn classify_keeps_call_context() {
        let e = classify(api_err(404, "NotFound"), "get echo default/e1");
        assert_eq!(e.to_string(), "not_found: get echo default/e1: NotFound happened (NotFound)");
    }

    fn target(ns: Option<&str>) -> TargetRef {
        TargetRef {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            name: "web".into(),
            namespace: ns.map(|s| s.to_string()),
        }
    }

    #[test]
    fn scope_decides_the_namespace() {
        let t = target(Some("prod"));
        assert_eq!(scope_namespace(&Scope::Namespaced, &t).unwrap(), Some("prod"));
        assert_eq!(scope_namespace(&Scope::Cluster, &t).unwrap(), None);
        assert_eq!(scope_namespace(&Scope::Cluster, &target(None)).unwrap(), None);
        let err = scope_namespace(&Scope::Namespaced, &target(None)).unwrap_err();
        assert!(matches!(err, EchoError::Schema(_)), "err={:?}", err);
        assert!(err.to_string().contains("apps/v1/Deployment"), "err={}", err);
    }

    #[test]
    fn unserved_group_version_is_a_schema_error() {
        let t = target(Some("prod"));
        let err = discovery_error(api_err(404, "NotFound"), &t);
        assert!(matches!(err, EchoError::Schema(_)), "err={:?}", err);
        assert!(err.to_string().contains("discover apps/v1/Deployment"), "err={}", err);
        assert!(matches!(discovery_error(api_err(403, "Forbidden"), &t), EchoError::PermissionDenied(_)));
        assert!(matches!(discovery_error(api_err(503, "ServiceUnavailable"), &t), EchoError::Transient(_)));
    }

    #[test]
    fn managed_fields_stay_addressable() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "apps",
                "managedFields": [{"manager": "kubectl", "operation": "Update", "apiVersion": "v1"}]
            },
            "data": {"mode": "fast"}
        }))
        .unwrap();
        let v = target_value(&obj).unwrap();
        let path = FieldPath::parse("metadata.managedFields").unwrap();
        let fields = extract(&v, &path).unwrap().unwrap();
        assert_eq!(fields[0]["manager"], "kubectl");
        assert_eq!(extract(&v, &FieldPath::parse("data.mode").unwrap()).unwrap(), Some(&serde_json::json!("fast")));
    }

    #[test]
    fn result_labels_follow_error_kind() {
        assert_eq!(result_label(&Ok(Value::Null)), "ok");
        assert_eq!(result_label(&Err(EchoError::Schema("x".into()))), EchoError::Schema("x".into()).kind());
    }

    #[tokio::test]
    async fn invalid_target_fails_before_any_request() {
        // nothing listens on the discard port; a request would not come back as Schema
        let cfg = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
        let resolver = KubeResolver::new(Client::try_from(cfg).unwrap());
        let mut t = target(Some("prod"));
        t.name.clear();
        let err = resolver.resolve(&t).await.unwrap_err();
        assert!(matches!(err, EchoError::Schema(_)), "err={:?}", err);
        assert!(err.to_string().contains("target name must be set"), "err={}", err);
    }
}
