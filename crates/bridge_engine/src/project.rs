//! Operations on the host's open project.
//!
//! Everything here works on [`RemoteObject`] handles: items, folders, comps
//! and render queue entries all live in the host. Host collections are read
//! with [`RemoteObject::collection`].

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::error::BridgeError;
use crate::hooks::{ImportDecision, ImportFootage, path_arg};
use crate::remote::{HostRuntime, RemoteObject, RemoteValue};
use crate::sequence::{self, RenderSpan};

/// Version reported when the host cannot be asked.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Host major versions and the release names users see.
const RELEASES: &[(u64, &str)] = &[
    (12, "2015"),
    (13, "2016"),
    (14, "2017"),
    (15, "2018"),
    (16, "2019"),
];

static LEADING_NUMBER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"([0-9]+\.?[0-9]*)"));

/// Name and version of the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub name: String,
    pub version: String,
}

/// The release name for a raw host version such as `"14.2.1x9"`. Versions
/// without a known release are returned unchanged.
#[must_use]
pub fn release_name(raw: &str) -> String {
    let major = LEADING_NUMBER
        .as_ref()
        .ok()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .map(|v| v.floor() as u64);
    major
        .and_then(|major| RELEASES.iter().find(|(m, _)| *m == major))
        .map_or_else(|| raw.to_string(), |(_, name)| (*name).to_string())
}

/// Ask the host for its version.
///
/// # Errors
///
/// Returns a [`BridgeError`] if a host call fails.
pub async fn host_info(runtime: &HostRuntime, name: &str) -> Result<HostInfo, BridgeError> {
    let app = runtime.global_object("app").await?;
    let version = match app.get("version").await? {
        RemoteValue::Value(Value::String(raw)) => release_name(&raw),
        RemoteValue::Value(other) => release_name(&other.to_string()),
        _ => UNKNOWN_VERSION.to_string(),
    };
    Ok(HostInfo {
        name: name.to_string(),
        version,
    })
}

// ── Items ───────────────────────────────────────────────────────────────────

/// Project item classes the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Comp,
    Folder,
    Footage,
}

impl ItemType {
    #[must_use]
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Comp => "CompItem",
            Self::Folder => "FolderItem",
            Self::Footage => "FootageItem",
        }
    }
}

#[must_use]
pub fn is_item_of_type(item: &RemoteObject, item_type: ItemType) -> bool {
    item.is_instance_of(item_type.class_name())
}

fn unexpected(method: &str, detail: &str) -> BridgeError {
    BridgeError::UnexpectedResult {
        method: method.to_string(),
        detail: detail.to_string(),
    }
}

/// The open project.
///
/// # Errors
///
/// Returns [`BridgeError::UnexpectedResult`] if no project is open.
pub async fn current_project(runtime: &HostRuntime) -> Result<RemoteObject, BridgeError> {
    runtime
        .global_object("app")
        .await?
        .get("project")
        .await?
        .into_object()
        .ok_or_else(|| unexpected("get", "no project is open"))
}

/// The item selected in the project panel, if any.
///
/// # Errors
///
/// Returns a [`BridgeError`] if a host call fails.
pub async fn selected_item(runtime: &HostRuntime) -> Result<Option<RemoteObject>, BridgeError> {
    let app = runtime.global_object("app").await?;
    Ok(app.get_path("project.activeItem").await?.into_object())
}

async fn objects_in(collection: &RemoteObject) -> Result<Vec<RemoteObject>, BridgeError> {
    Ok(collection
        .collection()
        .await?
        .into_iter()
        .filter_map(RemoteValue::into_object)
        .collect())
}

async fn root_items(project: &RemoteObject) -> Result<Vec<RemoteObject>, BridgeError> {
    let items = project
        .get_path("rootFolder.items")
        .await?
        .into_object()
        .ok_or_else(|| unexpected("get", "project has no root folder"))?;
    objects_in(&items).await
}

/// Import `path`, letting `hook` choose the options first. Returns the items
/// the import added to the project's root folder; a refused import adds
/// nothing.
///
/// `importFile`'s own result does not reliably name everything an import
/// creates, so the root folder is compared before and after.
///
/// # Errors
///
/// Returns a [`BridgeError`] if a host call fails.
pub async fn import_file(
    runtime: &HostRuntime,
    hook: &dyn ImportFootage,
    path: &Path,
) -> Result<Vec<RemoteObject>, BridgeError> {
    let file = runtime.construct("File", vec![path_arg(path)]).await?;
    let options = runtime
        .construct("ImportOptions", Vec::new())
        .await?
        .into_object()
        .ok_or_else(|| unexpected("construct", "ImportOptions is not an object"))?;
    options.set("file", file.to_json()).await?;
    options.set("sequence", json!(false)).await?;

    if hook.set_import_options(runtime, &options).await? == ImportDecision::Refuse {
        return Ok(Vec::new());
    }

    let project = current_project(runtime).await?;
    let before = root_items(&project).await?;
    project.invoke("importFile", vec![options.to_json()]).await?;
    let after = root_items(&project).await?;
    Ok(after.into_iter().filter(|item| !before.contains(item)).collect())
}

/// Add the best match from `collection` to `comp`'s layers: the first comp,
/// otherwise the first footage item. Folders are searched depth first when
/// the collection holds neither. Returns whether a layer was added.
///
/// # Errors
///
/// Returns a [`BridgeError`] if a host call fails.
pub async fn add_items_to_comp(
    collection: &RemoteObject,
    comp: &RemoteObject,
) -> Result<bool, BridgeError> {
    let mut pending = vec![collection.clone()];
    while let Some(collection) = pending.pop() {
        let mut folders = Vec::new();
        let mut comps = Vec::new();
        let mut footage = Vec::new();
        for item in objects_in(&collection).await? {
            if is_item_of_type(&item, ItemType::Folder) {
                folders.push(item);
            } else if is_item_of_type(&item, ItemType::Comp) {
                comps.push(item);
            } else if is_item_of_type(&item, ItemType::Footage) {
                footage.push(item);
            }
        }

        if let Some(item) = comps.into_iter().chain(footage).next() {
            let layers = comp
                .get("layers")
                .await?
                .into_object()
                .ok_or_else(|| unexpected("get", "comp has no layers"))?;
            debug!(item = item.id(), comp = comp.id(), "adding item to comp");
            layers.invoke("add", vec![item.to_json()]).await?;
            return Ok(true);
        }

        for folder in folders.into_iter().rev() {
            if let Some(items) = folder.get("items").await?.into_object() {
                pending.push(items);
            }
        }
    }
    Ok(false)
}

// ── Rendering ───────────────────────────────────────────────────────────────

/// Render only `queue_item`. Every other queued item is disabled for the
/// duration and re-enabled afterwards unless the render changed its state.
/// Returns whether `queue_item` finished.
///
/// A failing render is logged, not returned: the queue is restored either
/// way.
///
/// # Errors
///
/// Returns a [`BridgeError`] if a host call other than the render fails.
pub async fn render_queue_item(
    runtime: &HostRuntime,
    queue_item: &RemoteObject,
) -> Result<bool, BridgeError> {
    let statuses = runtime.global_object("RQItemStatus").await?;
    let queued = statuses.get("QUEUED").await?;
    let done = statuses.get("DONE").await?;
    let settled = [
        done.clone(),
        statuses.get("ERR_STOPPED").await?,
        statuses.get("RENDERING").await?,
    ];

    let render_queue = current_project(runtime)
        .await?
        .get("renderQueue")
        .await?
        .into_object()
        .ok_or_else(|| unexpected("get", "project has no render queue"))?;
    let queue_items = render_queue
        .get("items")
        .await?
        .into_object()
        .ok_or_else(|| unexpected("get", "render queue has no items"))?;

    let mut saved = vec![(queue_item.clone(), queue_item.get("render").await?)];
    for item in objects_in(&queue_items).await? {
        if item.get("status").await? != queued {
            continue;
        }
        let render = item.get("render").await?;
        item.set("render", json!(false)).await?;
        saved.push((item, render));
    }

    queue_item.set("render", json!(true)).await?;
    debug!(item = queue_item.id(), "rendering");
    if let Err(e) = render_queue.invoke("render", Vec::new()).await {
        error!(error = %e, "render failed");
    }

    for (item, render) in saved {
        if !settled.contains(&item.get("status").await?) {
            item.set("render", render.to_json()).await?;
        }
    }

    let finished = queue_item.get("status").await? == done;
    info!(item = queue_item.id(), finished, "render finished");
    Ok(finished)
}

/// One file a render writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFile {
    pub path: String,
    /// `None` for single-file outputs.
    pub frame: Option<u64>,
}

/// Every file `queue_item` writes to the output `path`. Sequence paths
/// (`###`, `@@@`, `%04d`) expand to one file per rendered frame.
///
/// # Errors
///
/// Returns a [`BridgeError`] if a host call fails or the item has no comp.
pub async fn render_files(
    path: &str,
    queue_item: &RemoteObject,
) -> Result<Vec<RenderFile>, BridgeError> {
    if !sequence::is_sequence_pattern(path) {
        return Ok(vec![RenderFile {
            path: path.to_string(),
            frame: None,
        }]);
    }

    let comp = queue_item
        .get("comp")
        .await?
        .into_object()
        .ok_or_else(|| unexpected("get", "render queue item has no comp"))?;
    let seconds = |value: RemoteValue, name: &str| {
        value
            .as_f64()
            .ok_or_else(|| unexpected("get", &format!("{name} is not a number")))
    };
    let span = RenderSpan {
        start: seconds(queue_item.get("timeSpanStart").await?, "timeSpanStart")?,
        duration: seconds(queue_item.get("timeSpanDuration").await?, "timeSpanDuration")?,
        frame_duration: seconds(comp.get("frameDuration").await?, "frameDuration")?,
        skip_frames: queue_item.get("skipFrames").await?.as_u64().unwrap_or(0),
    };

    Ok(span
        .frames()
        .filter_map(|frame| {
            sequence::frame_path(path, frame).map(|path| RenderFile {
                path,
                frame: Some(frame),
            })
        })
        .collect())
}

/// Returns `true` if every file `queue_item` renders to `path` exists.
///
/// # Errors
///
/// Returns a [`BridgeError`] if a host call fails.
pub async fn check_sequence(path: &str, queue_item: &RemoteObject) -> Result<bool, BridgeError> {
    Ok(render_files(path, queue_item)
        .await?
        .iter()
        .all(|file| Path::new(&file.path).exists()))
}
