//! Pipeline contexts and how documents map onto them.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// A reference to a tracked entity (project, shot, asset, task...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityRef {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, id: u64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            name: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {}", self.entity_type, name),
            None => write!(f, "{} #{}", self.entity_type, self.id),
        }
    }
}

/// The scope the user is working in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<EntityRef>,
    #[serde(default)]
    pub filesystem_locations: Vec<PathBuf>,
}

impl Context {
    /// A context scoped to a project only.
    #[must_use]
    pub fn for_project(project: EntityRef) -> Self {
        Self {
            project: Some(project),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: EntityRef) -> Self {
        self.task = Some(task);
        self
    }

    #[must_use]
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.filesystem_locations.push(path.into());
        self
    }

    /// The most specific entity: task, then entity, then project.
    #[must_use]
    pub fn display_entity(&self) -> Option<&EntityRef> {
        self.task
            .as_ref()
            .or(self.entity.as_ref())
            .or(self.project.as_ref())
    }

    /// This context reduced to its project.
    #[must_use]
    pub fn project_only(&self) -> Self {
        Self {
            project: self.project.clone(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn project_id(&self) -> Option<u64> {
        self.project.as_ref().map(|p| p.id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.project.is_none() && self.entity.is_none() && self.task.is_none()
    }

    /// Serialise for the host environment.
    ///
    /// # Errors
    ///
    /// Returns the serialisation error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a context exported by [`Context::to_json`].
    ///
    /// # Errors
    ///
    /// Returns the parse error.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [&self.project, &self.entity, &self.task]
            .into_iter()
            .flatten()
            .map(ToString::to_string)
            .collect();
        if parts.is_empty() {
            f.write_str("Site")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Maps documents and entities onto contexts.
pub trait ContextResolver: Send + Sync {
    /// Work out the context a document belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if `path` is outside every known location.
    fn context_from_path(&self, path: &Path, previous: &Context) -> Result<Context, ResolveError>;

    /// Build the context of a single entity.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if the entity is unknown.
    fn context_from_entity(&self, entity_type: &str, id: u64) -> Result<Context, ResolveError>;
}

/// Resolves paths by their longest matching root directory.
#[derive(Debug, Clone, Default)]
pub struct PrefixResolver {
    roots: Vec<(PathBuf, Context)>,
}

impl PrefixResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents under `root` belong to `context`. The root is added to the
    /// context's filesystem locations.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>, context: Context) -> Self {
        let root = root.into();
        let mut context = context;
        if !context.filesystem_locations.contains(&root) {
            context.filesystem_locations.push(root.clone());
        }
        self.roots.push((root, context));
        self
    }
}

impl ContextResolver for PrefixResolver {
    fn context_from_path(&self, path: &Path, _previous: &Context) -> Result<Context, ResolveError> {
        self.roots
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(_, context)| context.clone())
            .ok_or_else(|| ResolveError(format!("{} is not under any known root", path.display())))
    }

    fn context_from_entity(&self, entity_type: &str, id: u64) -> Result<Context, ResolveError> {
        let matches = |e: &Option<EntityRef>| {
            e.as_ref()
                .is_some_and(|e| e.entity_type == entity_type && e.id == id)
        };
        for (_, context) in &self.roots {
            if matches(&context.project) {
                return Ok(context.project_only());
            }
            if matches(&context.entity) {
                let mut found = context.clone();
                found.task = None;
                return Ok(found);
            }
            if matches(&context.task) {
                return Ok(context.clone());
            }
        }
        Err(ResolveError(format!("unknown entity {entity_type} {id}")))
    }
}

/// Tracking-site page for an entity.
#[must_use]
pub fn entity_url(site_url: &str, entity: &EntityRef) -> String {
    format!(
        "{}/detail/{}/{}",
        site_url.trim_end_matches('/'),
        entity.entity_type,
        entity.id
    )
}
