// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: an in-memory API server speaking enough of the Kubernetes REST
//! protocol for the controller's reads and writes.

use crate::error::BindingUsageError;
use crate::supervisor::KubernetesResourceSupervisor;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// Objects are stored by their item URL path, e.g.
/// `/apis/apps/v1/namespaces/prod/deployments/app`.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    objects: Arc<Mutex<BTreeMap<String, Value>>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
    failures: Arc<Mutex<BTreeMap<(String, String), u16>>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object at an item path
    pub fn with_object(self, path: &str, object: Value) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), object);
        self
    }

    /// Make every request with this method and path fail with `status`
    pub fn fail(&self, method: &str, path: &str, status: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), status);
    }

    /// Undo an earlier `fail`
    pub fn recover(&self, method: &str, path: &str) {
        self.failures
            .lock()
            .unwrap()
            .remove(&(method.to_string(), path.to_string()));
    }

    /// Serve discovery for `group_version` with the given API resources
    pub fn with_api_resources(self, group_version: &str, resources: Value) -> Self {
        self.with_object(
            &format!("/apis/{}", group_version),
            json!({
                "kind": "APIResourceList",
                "apiVersion": "v1",
                "groupVersion": group_version,
                "resources": resources
            }),
        )
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn put_object(&self, path: &str, object: Value) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), object);
    }

    pub fn remove_object(&self, path: &str) {
        self.objects.lock().unwrap().remove(path);
    }

    /// `(method, path)` of every request received so far
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|(m, p)| m == method && p == path)
            .count()
    }

    /// Build a kube Client backed by this server; clones share state
    pub fn client(&self) -> Client {
        Client::new(self.clone(), "default")
    }

    fn handle(&self, method: &Method, path: &str, body: &[u8]) -> (u16, Value) {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string()));

        if let Some(status) = self
            .failures
            .lock()
            .unwrap()
            .get(&(method.to_string(), path.to_string()))
        {
            return (*status, status_json(*status, "Injected", "injected failure"));
        }

        let mut objects = self.objects.lock().unwrap();
        let item_path = path.strip_suffix("/status").unwrap_or(path);

        match *method {
            Method::GET => match objects.get(path) {
                Some(obj) => (200, obj.clone()),
                None => not_found(path),
            },
            Method::POST => {
                let mut obj: Value = match serde_json::from_slice(body) {
                    Ok(v) => v,
                    Err(e) => return (400, status_json(400, "BadRequest", &e.to_string())),
                };
                let name = obj["metadata"]["name"].as_str().unwrap_or_default().to_string();
                let key = format!("{}/{}", path, name);
                if objects.contains_key(&key) {
                    return (409, status_json(409, "AlreadyExists", &format!("{} already exists", name)));
                }
                obj["metadata"]["resourceVersion"] = json!("1");
                if obj["metadata"]["uid"].is_null() {
                    obj["metadata"]["uid"] = json!(format!("uid-{}", name));
                }
                objects.insert(key, obj.clone());
                (201, obj)
            }
            Method::PUT => {
                if !objects.contains_key(item_path) {
                    return not_found(path);
                }
                let mut obj: Value = match serde_json::from_slice(body) {
                    Ok(v) => v,
                    Err(e) => return (400, status_json(400, "BadRequest", &e.to_string())),
                };
                if is_stale(&objects[item_path], &obj) {
                    return conflict(path);
                }
                bump_resource_version(&mut obj);
                objects.insert(item_path.to_string(), obj.clone());
                (200, obj)
            }
            Method::PATCH => {
                let Some(current) = objects.get_mut(item_path) else {
                    return not_found(path);
                };
                let patch: Value = match serde_json::from_slice(body) {
                    Ok(v) => v,
                    Err(e) => return (400, status_json(400, "BadRequest", &e.to_string())),
                };
                if is_stale(current, &patch) {
                    return conflict(path);
                }
                apply_merge_patch(current, &patch);
                bump_resource_version(current);
                (200, current.clone())
            }
            Method::DELETE => match objects.remove(path) {
                Some(obj) => (200, obj),
                None => not_found(path),
            },
            _ => (405, status_json(405, "MethodNotAllowed", "method not allowed")),
        }
    }
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let body: Bytes = req.into_body().collect().await?.to_bytes();

            let (status, payload) = server.handle(&method, &path, &body);

            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string().into_bytes()))?)
        })
    }
}

/// RFC 7386 merge patch
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn bump_resource_version(obj: &mut Value) {
    let next = obj["metadata"]["resourceVersion"]
        .as_str()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    obj["metadata"]["resourceVersion"] = json!(next.to_string());
}

/// A write naming a resourceVersion must name the current one
fn is_stale(current: &Value, write: &Value) -> bool {
    match write["metadata"]["resourceVersion"].as_str() {
        Some(rv) if !rv.is_empty() => current["metadata"]["resourceVersion"].as_str() != Some(rv),
        _ => false,
    }
}

fn conflict(path: &str) -> (u16, Value) {
    (
        409,
        status_json(409, "Conflict", &format!("{} has been modified, please retry", path)),
    )
}

fn not_found(path: &str) -> (u16, Value) {
    (404, status_json(404, "NotFound", &format!("{} not found", path)))
}

fn status_json(code: u16, reason: &str, message: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
}

pub fn deployment_path(namespace: &str, name: &str) -> String {
    format!("/apis/apps/v1/namespaces/{}/deployments/{}", namespace, name)
}

/// A Deployment with the given pod template labels
pub fn deployment_json(namespace: &str, name: &str, template_labels: Value) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": format!("uid-{}", name),
            "resourceVersion": "1"
        },
        "spec": {
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": template_labels},
                "spec": {"containers": [{"name": "main", "image": "busybox"}]}
            }
        }
    })
}

pub fn template_labels(object: &Value) -> Value {
    object["spec"]["template"]["metadata"]["labels"].clone()
}

pub fn usage_path(namespace: &str, name: &str) -> String {
    format!(
        "/apis/servicecatalog.kyma-project.io/v1alpha1/namespaces/{}/servicebindingusages/{}",
        namespace, name
    )
}

/// A usage of binding `binding` by deployment `deployment`
pub fn usage_json(namespace: &str, name: &str, binding: &str, deployment: &str) -> Value {
    json!({
        "apiVersion": "servicecatalog.kyma-project.io/v1alpha1",
        "kind": "ServiceBindingUsage",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": format!("uid-{}", name),
            "generation": 1,
            "resourceVersion": "1"
        },
        "spec": {
            "serviceBindingRef": {"name": binding},
            "usedBy": {"kind": "deployment", "name": deployment},
            "reprocessRequest": 0
        }
    })
}

pub const FUNCTION_GROUP_VERSION: &str = "serverless.kyma-project.io/v1alpha1";

pub fn function_path(namespace: &str, name: &str) -> String {
    format!(
        "/apis/{}/namespaces/{}/functions/{}",
        FUNCTION_GROUP_VERSION, namespace, name
    )
}

/// A Function keeping its pod labels at `spec.deployment.labels`
pub fn function_json(namespace: &str, name: &str, labels: Value) -> Value {
    json!({
        "apiVersion": FUNCTION_GROUP_VERSION,
        "kind": "Function",
        "metadata": {"name": name, "namespace": namespace, "resourceVersion": "1"},
        "spec": {"deployment": {"labels": labels}, "runtime": "nodejs"}
    })
}

/// Discovery entry for the Function kind
pub fn function_api_resources() -> Value {
    json!([
        {
            "name": "functions",
            "singularName": "function",
            "namespaced": true,
            "kind": "Function",
            "verbs": ["get", "list", "watch", "create", "update", "patch", "delete"]
        },
        {
            "name": "functions/status",
            "singularName": "",
            "namespaced": true,
            "kind": "Function",
            "verbs": ["get", "update", "patch"]
        }
    ])
}

/// Supervisor whose cache never syncs; every operation fails if reached.
pub struct UnsyncedSupervisor;

#[async_trait]
impl KubernetesResourceSupervisor for UnsyncedSupervisor {
    async fn ensure_labels_created(
        &self,
        _namespace: &str,
        _name: &str,
        _usage_name: &str,
        _labels: &BTreeMap<String, String>,
    ) -> crate::error::Result<()> {
        Err(BindingUsageError::InvalidResource("used before sync".to_string()))
    }

    async fn ensure_labels_deleted(&self, _namespace: &str, _name: &str, _usage_name: &str) -> crate::error::Result<()> {
        Err(BindingUsageError::InvalidResource("used before sync".to_string()))
    }

    async fn get_injected_labels(
        &self,
        _namespace: &str,
        _name: &str,
        _usage_name: &str,
    ) -> crate::error::Result<BTreeMap<String, String>> {
        Err(BindingUsageError::InvalidResource("used before sync".to_string()))
    }

    fn has_synced(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_resource_version_is_a_conflict() {
        let path = deployment_path("prod", "app");
        let server = FakeApiServer::new().with_object(&path, deployment_json("prod", "app", json!({})));

        let stale = json!({"metadata": {"resourceVersion": "0"}, "spec": {"replicas": 2}});
        let (status, _) = server.handle(&Method::PATCH, &path, stale.to_string().as_bytes());
        assert_eq!(status, 409);

        let current = json!({"metadata": {"resourceVersion": "1"}, "spec": {"replicas": 2}});
        let (status, updated) = server.handle(&Method::PATCH, &path, current.to_string().as_bytes());
        assert_eq!(status, 200);
        assert_eq!(updated["metadata"]["resourceVersion"], json!("2"));

        let mut replaced = server.object(&path).unwrap();
        replaced["metadata"]["resourceVersion"] = json!("1");
        let (status, _) = server.handle(&Method::PUT, &path, replaced.to_string().as_bytes());
        assert_eq!(status, 409);
    }

    #[test]
    fn test_apply_merge_patch() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": [1]});
        apply_merge_patch(&mut target, &json!({"a": {"b": null, "e": 3}, "d": [2]}));
        assert_eq!(target, json!({"a": {"c": 2, "e": 3}, "d": [2]}));
    }
}
