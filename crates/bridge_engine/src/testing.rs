//! In-process stand-ins for the host and the tracking service.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use crate::bridge::{Probe, RpcCall};
use crate::error::BridgeError;
use crate::remote::{REMOTE_TAG, methods};
use crate::worker::DataService;

/// Answers calls from a queue, or from fixed per-method answers.
///
/// Fixed answers win over the queue. An empty queue answers `null`.
#[derive(Debug, Default)]
pub struct ScriptedRpc {
    queue: Mutex<VecDeque<Result<Value, BridgeError>>>,
    answers: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedRpc {
    pub fn push_ok(&self, value: Value) {
        self.queue.lock().push_back(Ok(value));
    }

    pub fn push_err(&self, error: BridgeError) {
        self.queue.lock().push_back(Err(error));
    }

    /// Always answer `method` with `value`.
    pub fn answer(&self, method: &str, value: Value) {
        self.answers.lock().insert(method.to_string(), value);
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn forget_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl RpcCall for ScriptedRpc {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError> {
        self.calls.lock().push((method.to_string(), params));
        if let Some(value) = self.answers.lock().get(method) {
            return Ok(value.clone());
        }
        self.queue.lock().pop_front().unwrap_or(Ok(Value::Null))
    }
}

type Behaviour =
    Arc<dyn Fn(&FakeHost, &Value, &[Value]) -> Result<Value, BridgeError> + Send + Sync>;

/// A host runtime holding a small object graph.
///
/// Objects are property bags. Collections are objects with a `length` and
/// 1-based numeric keys. Methods invoked on objects are looked up by name in
/// the behaviours registered with [`FakeHost::on`]. Calls that are not
/// object operations answer `null`.
#[derive(Default)]
pub struct FakeHost {
    objects: Mutex<HashMap<u64, Map<String, Value>>>,
    globals: Mutex<HashMap<String, Value>>,
    behaviours: Mutex<HashMap<String, Behaviour>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    last_id: AtomicU64,
}

fn object_id(reference: &Value) -> Option<u64> {
    reference[REMOTE_TAG]["id"].as_u64()
}

fn unknown(method: &str, detail: String) -> BridgeError {
    BridgeError::UnexpectedResult {
        method: method.to_string(),
        detail,
    }
}

impl FakeHost {
    /// Create an object and return its reference.
    pub fn object(&self, class: &str, props: Value) -> Value {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let props = match props {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.objects.lock().insert(id, props);
        json!({ REMOTE_TAG: { "id": id, "class": class } })
    }

    /// Create a collection holding `items`.
    pub fn collection(&self, items: &[Value]) -> Value {
        let collection = self.object("Collection", json!({ "length": 0 }));
        for item in items {
            self.push_item(&collection, item.clone());
        }
        collection
    }

    /// Append `item` to `collection`.
    pub fn push_item(&self, collection: &Value, item: Value) {
        let length = self.prop(collection, "length").as_u64().unwrap_or(0) + 1;
        self.set_prop(collection, &length.to_string(), item);
        self.set_prop(collection, "length", json!(length));
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals.lock().insert(name.to_string(), value);
    }

    pub fn prop(&self, object: &Value, name: &str) -> Value {
        object_id(object)
            .and_then(|id| self.objects.lock().get(&id)?.get(name).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn set_prop(&self, object: &Value, name: &str, value: Value) {
        let Some(id) = object_id(object) else {
            return;
        };
        if let Some(target) = self.objects.lock().get_mut(&id) {
            target.insert(name.to_string(), value);
        }
    }

    /// Handle `method` when it is invoked on any object.
    pub fn on(
        &self,
        method: &str,
        behaviour: impl Fn(&FakeHost, &Value, &[Value]) -> Result<Value, BridgeError>
        + Send
        + Sync
        + 'static,
    ) {
        self.behaviours
            .lock()
            .insert(method.to_string(), Arc::new(behaviour));
    }

    /// Arguments of every invocation of `method`, receiver first.
    pub fn invocations(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, p)| m == methods::INVOKE && p.get(1) == Some(&json!(method)))
            .map(|(_, p)| {
                let mut args = vec![p[0].clone()];
                args.extend(p[2].as_array().cloned().unwrap_or_default());
                args
            })
            .collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn existing(&self, method: &str, reference: &Value) -> Result<u64, BridgeError> {
        object_id(reference)
            .filter(|id| self.objects.lock().contains_key(id))
            .ok_or_else(|| unknown(method, format!("no object {reference}")))
    }
}

#[async_trait]
impl RpcCall for FakeHost {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError> {
        self.calls.lock().push((method.to_string(), params.clone()));
        let arg = |i: usize| params.get(i).cloned().unwrap_or(Value::Null);
        match method {
            methods::GET => {
                self.existing(method, &arg(0))?;
                Ok(self.prop(&arg(0), arg(1).as_str().unwrap_or_default()))
            }
            methods::SET => {
                self.existing(method, &arg(0))?;
                self.set_prop(&arg(0), arg(1).as_str().unwrap_or_default(), arg(2));
                Ok(Value::Null)
            }
            methods::INVOKE => {
                self.existing(method, &arg(0))?;
                let name = arg(1).as_str().unwrap_or_default().to_string();
                let behaviour = self
                    .behaviours
                    .lock()
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| unknown(method, format!("no method {name}")))?;
                let args = arg(2).as_array().cloned().unwrap_or_default();
                behaviour(self, &arg(0), &args)
            }
            methods::GLOBAL => Ok(self
                .globals
                .lock()
                .get(arg(0).as_str().unwrap_or_default())
                .cloned()
                .unwrap_or(Value::Null)),
            methods::CONSTRUCT => {
                let class = arg(0).as_str().unwrap_or_default().to_string();
                let args = arg(1);
                let props = match class.as_str() {
                    "File" => json!({ "fsName": args[0].clone() }),
                    _ => json!({}),
                };
                Ok(self.object(&class, props))
            }
            _ => Ok(Value::Null),
        }
    }
}

/// A probe whose health is switched by the test.
#[derive(Debug, Default)]
pub struct SwitchableProbe {
    failing: AtomicBool,
    pings: AtomicUsize,
}

impl SwitchableProbe {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for SwitchableProbe {
    async fn ping(&self) -> Result<(), BridgeError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(BridgeError::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// A tracking service backed by in-memory tables.
#[derive(Debug, Default)]
pub struct FakeDataService {
    entities: Mutex<HashMap<(String, u64), Value>>,
    thumbnails: Mutex<HashMap<String, PathBuf>>,
    delay: Option<Duration>,
}

impl FakeDataService {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn add_entity(&self, entity_type: &str, id: u64, value: Value) {
        self.entities
            .lock()
            .insert((entity_type.to_string(), id), value);
    }

    pub fn add_thumbnail(&self, url: &str, path: impl Into<PathBuf>) {
        self.thumbnails.lock().insert(url.to_string(), path.into());
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DataService for FakeDataService {
    async fn find_one(
        &self,
        entity_type: &str,
        id: u64,
        _fields: &[String],
    ) -> anyhow::Result<Value> {
        self.pause().await;
        self.entities
            .lock()
            .get(&(entity_type.to_string(), id))
            .cloned()
            .ok_or_else(|| anyhow!("no {entity_type} with id {id}"))
    }

    async fn download_thumbnail(
        &self,
        url: &str,
        _entity_type: &str,
        _id: u64,
    ) -> anyhow::Result<PathBuf> {
        self.pause().await;
        self.thumbnails
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("cannot download {url}"))
    }
}
