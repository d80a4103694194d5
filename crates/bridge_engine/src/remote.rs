//! Proxies for objects living in the host's scripting runtime.
//!
//! The host answers with plain JSON, except for objects it cannot serialise,
//! which come back as a tagged reference:
//!
//! ```json
//! {"__remote__": {"id": 12, "class": "CompItem"}}
//! ```
//!
//! [`RemoteValue::from_json`] lifts such references into [`RemoteObject`]s
//! whose `get`/`set`/`invoke` turn into further bridge calls. `null` is kept
//! as an explicit [`RemoteValue::Null`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bridge::RpcCall;
use crate::error::BridgeError;

/// Key marking a remote object reference.
pub const REMOTE_TAG: &str = "__remote__";

/// Remote-object method names.
pub mod methods {
    pub const GET: &str = "get";
    pub const SET: &str = "set";
    pub const INVOKE: &str = "invoke";
    pub const CONSTRUCT: &str = "construct";
    pub const GLOBAL: &str = "global";
    pub const EVAL: &str = "eval";
}

/// Identity of a host-side object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: u64,
    #[serde(rename = "class")]
    pub class_name: String,
}

/// A handle on a host-side object.
#[derive(Clone)]
pub struct RemoteObject {
    reference: ObjectRef,
    rpc: Arc<dyn RpcCall>,
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("id", &self.reference.id)
            .field("class", &self.reference.class_name)
            .finish()
    }
}

impl PartialEq for RemoteObject {
    fn eq(&self, other: &Self) -> bool {
        self.reference.id == other.reference.id
    }
}

/// A value returned by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    Null,
    Value(Value),
    Object(RemoteObject),
}

impl RemoteValue {
    /// Interpret a raw call result, attaching object references to `rpc`.
    #[must_use]
    pub fn from_json(value: Value, rpc: &Arc<dyn RpcCall>) -> Self {
        if value.is_null() {
            return Self::Null;
        }
        if let Some(reference) = parse_reference(&value) {
            return Self::Object(RemoteObject {
                reference,
                rpc: Arc::clone(rpc),
            });
        }
        Self::Value(value)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(v) => v.as_str(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Value(v) => v.as_u64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(v) => v.as_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Value(v) => v.as_bool(),
            _ => None,
        }
    }

    /// The object handle, if this is one.
    #[must_use]
    pub fn into_object(self) -> Option<RemoteObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Encode as a call parameter.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Value(v) => v.clone(),
            Self::Object(o) => o.to_json(),
        }
    }
}

fn parse_reference(value: &Value) -> Option<ObjectRef> {
    let tagged = value.as_object()?;
    if tagged.len() != 1 {
        return None;
    }
    serde_json::from_value(tagged.get(REMOTE_TAG)?.clone()).ok()
}

impl RemoteObject {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.reference.id
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.reference.class_name
    }

    #[must_use]
    pub fn reference(&self) -> &ObjectRef {
        &self.reference
    }

    /// Encode this handle as a call parameter.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ REMOTE_TAG: self.reference })
    }

    #[must_use]
    pub fn is_instance_of(&self, class_name: &str) -> bool {
        self.reference.class_name == class_name
    }

    /// Read a property.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn get(&self, name: &str) -> Result<RemoteValue, BridgeError> {
        let raw = self
            .rpc
            .call(methods::GET, vec![self.to_json(), json!(name)])
            .await?;
        Ok(RemoteValue::from_json(raw, &self.rpc))
    }

    /// Follow a dotted property path, e.g. `"project.file.fsName"`.
    ///
    /// Stops with [`RemoteValue::Null`] as soon as a link is null.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnexpectedResult`] if an intermediate link is
    /// a plain value rather than an object.
    pub async fn get_path(&self, path: &str) -> Result<RemoteValue, BridgeError> {
        let mut current = RemoteValue::Object(self.clone());
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                RemoteValue::Null => return Ok(RemoteValue::Null),
                RemoteValue::Object(object) => object.get(segment).await?,
                RemoteValue::Value(_) => {
                    return Err(BridgeError::UnexpectedResult {
                        method: methods::GET.to_string(),
                        detail: format!("cannot read {segment:?} of a plain value in {path:?}"),
                    });
                }
            };
        }
        Ok(current)
    }

    /// Write a property.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn set(&self, name: &str, value: Value) -> Result<(), BridgeError> {
        self.rpc
            .call(methods::SET, vec![self.to_json(), json!(name), value])
            .await?;
        Ok(())
    }

    /// Call a method.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<RemoteValue, BridgeError> {
        let raw = self
            .rpc
            .call(
                methods::INVOKE,
                vec![self.to_json(), json!(method), Value::Array(args)],
            )
            .await?;
        Ok(RemoteValue::from_json(raw, &self.rpc))
    }

    /// Read every item of a host collection (`length` + 1-based `[i]`).
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if a call fails or `length` is not a number.
    pub async fn collection(&self) -> Result<Vec<RemoteValue>, BridgeError> {
        let length = self
            .get("length")
            .await?
            .as_u64()
            .ok_or_else(|| BridgeError::UnexpectedResult {
                method: methods::GET.to_string(),
                detail: format!("{} has no numeric length", self.class_name()),
            })?;
        let mut items = Vec::new();
        for index in 1..=length {
            items.push(self.get(&index.to_string()).await?);
        }
        Ok(items)
    }
}

/// Entry points into the host runtime that are not tied to an object.
#[derive(Clone)]
pub struct HostRuntime {
    rpc: Arc<dyn RpcCall>,
}

impl std::fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRuntime").finish_non_exhaustive()
    }
}

impl HostRuntime {
    #[must_use]
    pub fn new(rpc: Arc<dyn RpcCall>) -> Self {
        Self { rpc }
    }

    /// Look up a global such as `app`.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn global(&self, name: &str) -> Result<RemoteValue, BridgeError> {
        let raw = self.rpc.call(methods::GLOBAL, vec![json!(name)]).await?;
        Ok(RemoteValue::from_json(raw, &self.rpc))
    }

    /// Look up a global that must be an object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnexpectedResult`] if the global is not an
    /// object.
    pub async fn global_object(&self, name: &str) -> Result<RemoteObject, BridgeError> {
        self.global(name)
            .await?
            .into_object()
            .ok_or_else(|| BridgeError::UnexpectedResult {
                method: methods::GLOBAL.to_string(),
                detail: format!("global {name:?} is not an object"),
            })
    }

    /// Instantiate a host class.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn construct(
        &self,
        class_name: &str,
        args: Vec<Value>,
    ) -> Result<RemoteValue, BridgeError> {
        let raw = self
            .rpc
            .call(methods::CONSTRUCT, vec![json!(class_name), Value::Array(args)])
            .await?;
        Ok(RemoteValue::from_json(raw, &self.rpc))
    }

    /// Evaluate source code in the host.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn eval(&self, source: &str) -> Result<RemoteValue, BridgeError> {
        let raw = self.rpc.call(methods::EVAL, vec![json!(source)]).await?;
        Ok(RemoteValue::from_json(raw, &self.rpc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRpc;

    fn object_json(id: u64, class: &str) -> Value {
        json!({ REMOTE_TAG: { "id": id, "class": class } })
    }

    #[test]
    fn test_from_json_classifies_values() {
        let rpc: Arc<dyn RpcCall> = Arc::new(ScriptedRpc::default());
        assert!(RemoteValue::from_json(Value::Null, &rpc).is_null());
        assert_eq!(
            RemoteValue::from_json(json!("x"), &rpc).as_str(),
            Some("x")
        );

        let object = RemoteValue::from_json(object_json(4, "Project"), &rpc)
            .into_object()
            .unwrap();
        assert_eq!(object.id(), 4);
        assert!(object.is_instance_of("Project"));

        // Extra keys make it a plain value.
        let plain = json!({ REMOTE_TAG: { "id": 1, "class": "X" }, "other": 1 });
        assert!(matches!(
            RemoteValue::from_json(plain, &rpc),
            RemoteValue::Value(_)
        ));
    }

    #[tokio::test]
    async fn test_get_path_walks_objects() {
        let rpc = Arc::new(ScriptedRpc::default());
        rpc.push_ok(object_json(2, "Project"));
        rpc.push_ok(object_json(3, "File"));
        rpc.push_ok(json!("/shows/a.aep"));
        let dyn_rpc: Arc<dyn RpcCall> = rpc.clone();

        let app = RemoteValue::from_json(object_json(1, "Application"), &dyn_rpc)
            .into_object()
            .unwrap();
        let path = app.get_path("project.file.fsName").await.unwrap();
        assert_eq!(path.as_str(), Some("/shows/a.aep"));

        let calls = rpc.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, methods::GET);
        assert_eq!(calls[0].1, vec![object_json(1, "Application"), json!("project")]);
        assert_eq!(calls[2].1[1], json!("fsName"));
    }

    #[tokio::test]
    async fn test_get_path_stops_at_null() {
        let rpc = Arc::new(ScriptedRpc::default());
        rpc.push_ok(Value::Null);
        let dyn_rpc: Arc<dyn RpcCall> = rpc.clone();

        let app = RemoteValue::from_json(object_json(1, "Application"), &dyn_rpc)
            .into_object()
            .unwrap();
        assert!(app.get_path("project.file").await.unwrap().is_null());
        assert_eq!(rpc.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_and_collection() {
        let rpc = Arc::new(ScriptedRpc::default());
        rpc.push_ok(json!(2));
        rpc.push_ok(object_json(10, "CompItem"));
        rpc.push_ok(object_json(11, "FootageItem"));
        rpc.push_ok(json!(true));
        let dyn_rpc: Arc<dyn RpcCall> = rpc.clone();

        let items = RemoteValue::from_json(object_json(5, "ItemCollection"), &dyn_rpc)
            .into_object()
            .unwrap();
        let all = items.collection().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(rpc.calls()[1].1[1], json!("1"));

        let comp = all[0].clone().into_object().unwrap();
        let result = comp.invoke("openInViewer", vec![]).await.unwrap();
        assert_eq!(result.as_bool(), Some(true));
        let (method, params) = rpc.calls()[3].clone();
        assert_eq!(method, methods::INVOKE);
        assert_eq!(params[1], json!("openInViewer"));
        assert_eq!(params[2], json!([]));
    }

    #[tokio::test]
    async fn test_runtime_entry_points() {
        let rpc = Arc::new(ScriptedRpc::default());
        rpc.push_ok(object_json(1, "Application"));
        rpc.push_ok(object_json(2, "File"));
        rpc.push_ok(json!(42));
        rpc.push_ok(json!(3));
        let runtime = HostRuntime::new(rpc.clone());

        let app = runtime.global_object("app").await.unwrap();
        assert_eq!(app.class_name(), "Application");
        let file = runtime
            .construct("File", vec![json!("/tmp/x.png")])
            .await
            .unwrap();
        assert!(file.into_object().is_some());
        assert_eq!(runtime.eval("6 * 7").await.unwrap().as_u64(), Some(42));

        // A plain global is not an object.
        assert!(matches!(
            runtime.global_object("version").await,
            Err(BridgeError::UnexpectedResult { .. })
        ));
    }
}
