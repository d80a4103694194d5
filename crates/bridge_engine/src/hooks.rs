//! User-overridable hooks.
//!
//! The engine consumes each hook through a narrow trait. Defaults are
//! provided for all of them; studios swap in their own implementations when
//! building the engine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::remote::{HostRuntime, RemoteObject};
use crate::sequence;

// ── Context fields display ──────────────────────────────────────────────────

/// Decides which entity fields the panel shows and renders them.
pub trait ContextFieldsDisplay: Send + Sync {
    /// Fields to query for an entity of `entity_type`. The thumbnail field
    /// is added by the engine.
    fn get_entity_fields(&self, entity_type: &str) -> Vec<String>;

    /// Render the panel HTML. `None` renders the site itself.
    fn get_context_html(&self, entity: Option<&Value>, site_url: &str) -> String;
}

/// A link the panel opens in the system browser.
#[must_use]
pub fn panel_link(url: &str, text: &str) -> String {
    format!(
        "<a href='#' class='sg_value_link' onclick='sg_panel.Panel.open_external_url(\"{}\")'>{}</a>",
        escape_html(url),
        escape_html(text)
    )
}

/// Minimal HTML escaping for text placed in the panel.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// The stock field selection and table layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContextFieldsDisplay;

const BASE_FIELDS: &[&str] = &["id", "type", "tag_list"];
const STD_FIELDS: &[&str] = &["code", "project", "sg_status_list", "description"];

impl DefaultContextFieldsDisplay {
    fn row(label: &str, value_html: &str) -> String {
        format!(
            "<tr><td class='sg_label_td'>{}:</td><td class='sg_value_td'>{value_html}</td></tr>",
            escape_html(label)
        )
    }

    fn entity_link(site_url: &str, text: &str, entity: &Value) -> String {
        match (entity["type"].as_str(), entity["id"].as_u64()) {
            (Some(entity_type), Some(id)) => panel_link(
                &format!("{}/detail/{entity_type}/{id}", site_url.trim_end_matches('/')),
                text,
            ),
            _ => escape_html(text),
        }
    }

    fn display_name(entity: &Value) -> String {
        ["name", "code", "content"]
            .iter()
            .find_map(|field| entity[*field].as_str())
            .map_or_else(
                || format!("#{}", entity["id"].as_u64().unwrap_or_default()),
                str::to_string,
            )
    }

    fn site_html(site_url: &str) -> String {
        let display = site_url.rsplit("//").next().unwrap_or(site_url);
        format!(
            "<table>{}</table>",
            Self::row("Site", &panel_link(site_url, display))
        )
    }
}

impl ContextFieldsDisplay for DefaultContextFieldsDisplay {
    fn get_entity_fields(&self, entity_type: &str) -> Vec<String> {
        let extra: &[&str] = match entity_type {
            "Project" => &["name", "sg_status", "sg_description"],
            "Asset" => &["sg_asset_type"],
            "Shot" => &[
                "sg_cut_in",
                "sg_cut_out",
                "sg_head_in",
                "sg_tail_out",
                "sg_sequence",
            ],
            "Task" => &[
                "task_assignees",
                "due_date",
                "entity",
                "step",
                "sg_status_list",
                "project",
                "content",
            ],
            _ => &[],
        };
        let standard: &[&str] = match entity_type {
            "Project" | "Task" => &[],
            _ => STD_FIELDS,
        };
        BASE_FIELDS
            .iter()
            .chain(standard)
            .chain(extra)
            .map(|f| (*f).to_string())
            .collect()
    }

    fn get_context_html(&self, entity: Option<&Value>, site_url: &str) -> String {
        let Some(entity) = entity else {
            return Self::site_html(site_url);
        };
        let entity_type = entity["type"].as_str().unwrap_or("Entity");
        let mut rows = vec![Self::row(
            entity_type,
            &Self::entity_link(site_url, &Self::display_name(entity), entity),
        )];

        if let Some(asset_type) = entity["sg_asset_type"].as_str() {
            rows.push(Self::row("Type", &escape_html(asset_type)));
        }
        if let Some(sequence) = entity.get("sg_sequence").filter(|s| s.is_object()) {
            rows.push(Self::row(
                "Sequence",
                &Self::entity_link(site_url, &Self::display_name(sequence), sequence),
            ));
        }
        if let Some(linked) = entity.get("entity").filter(|e| e.is_object()) {
            let label = linked["type"].as_str().unwrap_or("Entity");
            rows.push(Self::row(
                label,
                &Self::entity_link(site_url, &Self::display_name(linked), linked),
            ));
        }
        if let Some(step) = entity["step"]["name"].as_str() {
            rows.push(Self::row("Step", &escape_html(step)));
        }
        if let Some(status) = entity["sg_status_list"]
            .as_str()
            .or_else(|| entity["sg_status"].as_str())
        {
            rows.push(Self::row("Status", &escape_html(status)));
        }
        if let Some(assignees) = entity["task_assignees"].as_array().filter(|a| !a.is_empty()) {
            let links: Vec<String> = assignees
                .iter()
                .map(|a| Self::entity_link(site_url, &Self::display_name(a), a))
                .collect();
            let label = if assignees.len() > 1 { "Artists" } else { "Artist" };
            rows.push(Self::row(label, &links.join(", ")));
        }
        if let Some(due) = entity["due_date"].as_str() {
            rows.push(Self::row("Due", &escape_html(due)));
        }
        if let Some(tags) = entity["tag_list"].as_array().filter(|t| !t.is_empty()) {
            let tags: Vec<&str> = tags.iter().filter_map(Value::as_str).collect();
            rows.push(Self::row("Tags", &escape_html(&tags.join(", "))));
        }
        if let Some(description) = entity["description"]
            .as_str()
            .or_else(|| entity["sg_description"].as_str())
            .filter(|d| !d.is_empty())
        {
            rows.push(Self::row("Description", &escape_html(description)));
        }

        format!("<table>{}</table>", rows.concat())
    }
}

/// Panel HTML for a failed context query.
#[must_use]
pub fn error_html(message: &str) -> String {
    format!(
        "<table><tr><td class='sg_label_td'>Error:</td><td class='sg_value_td'>{}</td></tr></table>",
        escape_html(message)
    )
}

// ── Scene operations ────────────────────────────────────────────────────────

/// File operations on the host's current document.
#[async_trait]
pub trait SceneOperation: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the host call fails.
    async fn current_path(&self) -> Result<Option<PathBuf>, BridgeError>;

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the host call fails.
    async fn open(&self, path: &Path) -> Result<(), BridgeError>;

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the host call fails.
    async fn save(&self) -> Result<(), BridgeError>;

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the host call fails.
    async fn save_as(&self, path: &Path) -> Result<(), BridgeError>;

    /// Close the current document. Returns whether the host is now empty.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the host call fails.
    async fn reset(&self) -> Result<bool, BridgeError>;

    /// Get the host ready for a brand new document.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the host call fails.
    async fn prepare_new(&self) -> Result<(), BridgeError>;
}

/// Name of the empty template opened by [`SceneOperation::prepare_new`].
pub const NEW_DOCUMENT_TEMPLATE: &str = "Untitled.prproj";

/// Scene operations driven through the host's `app` object.
#[derive(Debug, Clone)]
pub struct HostSceneOperation {
    runtime: HostRuntime,
    template: Option<PathBuf>,
}

impl HostSceneOperation {
    #[must_use]
    pub fn new(runtime: HostRuntime) -> Self {
        Self {
            runtime,
            template: None,
        }
    }

    /// Use `<resources_dir>/Untitled.prproj` for new documents.
    #[must_use]
    pub fn with_resources_dir(mut self, dir: &Path) -> Self {
        self.template = Some(dir.join(NEW_DOCUMENT_TEMPLATE));
        self
    }

    async fn app(&self) -> Result<RemoteObject, BridgeError> {
        self.runtime.global_object("app").await
    }

    async fn project(&self) -> Result<Option<RemoteObject>, BridgeError> {
        Ok(self.app().await?.get("project").await?.into_object())
    }
}

pub(crate) fn path_arg(path: &Path) -> Value {
    json!(path.display().to_string())
}

#[async_trait]
impl SceneOperation for HostSceneOperation {
    async fn current_path(&self) -> Result<Option<PathBuf>, BridgeError> {
        let Some(project) = self.project().await? else {
            return Ok(None);
        };
        Ok(project
            .get("path")
            .await?
            .as_str()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from))
    }

    async fn open(&self, path: &Path) -> Result<(), BridgeError> {
        debug!(path = %path.display(), "opening document");
        self.app()
            .await?
            .invoke("openDocument", vec![path_arg(path)])
            .await?;
        Ok(())
    }

    async fn save(&self) -> Result<(), BridgeError> {
        if let Some(project) = self.project().await? {
            project.invoke("save", Vec::new()).await?;
        }
        Ok(())
    }

    async fn save_as(&self, path: &Path) -> Result<(), BridgeError> {
        let project = self
            .project()
            .await?
            .ok_or_else(|| BridgeError::UnexpectedResult {
                method: "saveAs".to_string(),
                detail: "no document is open".to_string(),
            })?;
        project.invoke("saveAs", vec![path_arg(path)]).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<bool, BridgeError> {
        if let Some(project) = self.project().await? {
            project
                .invoke("closeDocument", vec![json!(0), json!(0)])
                .await?;
        }
        Ok(true)
    }

    async fn prepare_new(&self) -> Result<(), BridgeError> {
        match &self.template {
            Some(template) => self.open(template).await,
            None => {
                warn!("no new-document template configured");
                Ok(())
            }
        }
    }
}

// ── Import footage ──────────────────────────────────────────────────────────

/// How the host should import a file. Values name the host's
/// `ImportAsType` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAs {
    Project,
    Comp,
    CompCroppedLayers,
    Footage,
}

impl ImportAs {
    /// Candidates tried in order when no extension rule applies.
    pub const PREFERENCE: [Self; 4] = [
        Self::Project,
        Self::Comp,
        Self::CompCroppedLayers,
        Self::Footage,
    ];

    #[must_use]
    pub fn constant(self) -> &'static str {
        match self {
            Self::Project => "PROJECT",
            Self::Comp => "COMP",
            Self::CompCroppedLayers => "COMP_CROPPED_LAYERS",
            Self::Footage => "FOOTAGE",
        }
    }

    /// The host's value for this import type.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if a host call fails.
    pub async fn host_value(self, runtime: &HostRuntime) -> Result<Value, BridgeError> {
        let types = runtime.global_object("ImportAsType").await?;
        Ok(types.get(self.constant()).await?.to_json())
    }
}

/// Whether an import should go ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDecision {
    Import,
    Refuse,
}

/// Adjusts the host's import options before a file is imported.
#[async_trait]
pub trait ImportFootage: Send + Sync {
    /// `options.file.fsName` holds the path being imported.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if a host call fails.
    async fn set_import_options(
        &self,
        runtime: &HostRuntime,
        options: &RemoteObject,
    ) -> Result<ImportDecision, BridgeError>;
}

/// Picks the import type and marks frame sequences.
///
/// Files whose extension has a fixed rule use it. Everything else gets the
/// first of [`ImportAs::PREFERENCE`] the host accepts (`canImportAs`). Files
/// the host cannot import in any way are refused.
#[derive(Debug, Clone)]
pub struct DefaultImportFootage {
    by_extension: Vec<(String, ImportAs)>,
}

impl Default for DefaultImportFootage {
    fn default() -> Self {
        Self {
            by_extension: vec![
                ("mov".to_string(), ImportAs::Footage),
                ("avi".to_string(), ImportAs::Footage),
            ],
        }
    }
}

impl DefaultImportFootage {
    /// Always import files with `extension` (no dot) as `import_as`.
    #[must_use]
    pub fn with_extension(mut self, extension: &str, import_as: ImportAs) -> Self {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        self.by_extension.retain(|(ext, _)| *ext != extension);
        self.by_extension.push((extension, import_as));
        self
    }

    fn extension_rule(&self, path: &Path) -> Option<ImportAs> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension
            .iter()
            .find(|(rule, _)| *rule == ext)
            .map(|(_, import_as)| *import_as)
    }

    async fn import_type(
        &self,
        runtime: &HostRuntime,
        options: &RemoteObject,
        path: &Path,
    ) -> Result<Option<Value>, BridgeError> {
        if let Some(import_as) = self.extension_rule(path) {
            return Ok(Some(import_as.host_value(runtime).await?));
        }
        for import_as in ImportAs::PREFERENCE {
            let value = import_as.host_value(runtime).await?;
            let accepted = options
                .invoke("canImportAs", vec![value.clone()])
                .await?
                .as_bool()
                .unwrap_or(false);
            if accepted {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ImportFootage for DefaultImportFootage {
    async fn set_import_options(
        &self,
        runtime: &HostRuntime,
        options: &RemoteObject,
    ) -> Result<ImportDecision, BridgeError> {
        let path = options.get_path("file.fsName").await?;
        let Some(path) = path.as_str() else {
            warn!("import options carry no file path");
            return Ok(ImportDecision::Refuse);
        };
        let Some(import_type) = self.import_type(runtime, options, Path::new(path)).await? else {
            warn!(path, "file cannot be imported");
            return Ok(ImportDecision::Refuse);
        };
        options.set("importAs", import_type).await?;

        if let Some((first, last)) = sequence::find_sequence_range(Path::new(path)) {
            if first != last {
                debug!(path, first, last, "importing as image sequence");
                options.set("sequence", json!(true)).await?;
                options.set("forceAlphabetical", json!(true)).await?;
            }
        }
        Ok(ImportDecision::Import)
    }
}
