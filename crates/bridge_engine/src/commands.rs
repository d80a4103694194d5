//! Engine commands and the panel's command state.
//!
//! Every registered command gets a process-unique integer uid. The host
//! panel only ever sees uids; when the user clicks a command the host sends
//! a `command` event with that uid back.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ShelfFavorite;

/// What a command does when run.
pub type CommandCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Where the panel shows a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    #[default]
    Default,
    ContextMenu,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconSet {
    #[serde(default)]
    pub png: Option<PathBuf>,
    #[serde(default)]
    pub svg: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icons {
    #[serde(default)]
    pub dark: Option<IconSet>,
    #[serde(default)]
    pub light: Option<IconSet>,
}

/// Optional metadata supplied when registering a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProperties {
    /// Instance name of the app that registered the command.
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default, rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<PathBuf>,
    #[serde(default)]
    pub icons: Option<Icons>,
}

impl CommandProperties {
    #[must_use]
    pub fn for_app(app: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, command_type: CommandType) -> Self {
        self.command_type = command_type;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<PathBuf>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    #[must_use]
    pub fn with_icons(mut self, icons: Icons) -> Self {
        self.icons = Some(icons);
        self
    }

    /// The icon the panel should show: dark png, then light png, then the
    /// plain icon.
    #[must_use]
    pub fn icon_path(&self) -> Option<&Path> {
        fn png(set: &Option<IconSet>) -> Option<&Path> {
            set.as_ref().and_then(|s| s.png.as_deref())
        }
        self.icons
            .as_ref()
            .and_then(|icons| png(&icons.dark).or_else(|| png(&icons.light)))
            .or(self.icon.as_deref())
    }
}

/// A registered command.
#[derive(Clone)]
pub struct Command {
    pub uid: u64,
    pub name: String,
    pub properties: CommandProperties,
    callback: CommandCallback,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Run the callback.
    ///
    /// # Errors
    ///
    /// Returns whatever the callback returns.
    pub fn run(&self) -> anyhow::Result<()> {
        (self.callback)()
    }

    /// The panel-facing description of this command.
    #[must_use]
    pub fn to_panel(&self) -> PanelCommand {
        PanelCommand {
            uid: self.uid,
            display_name: self.name.clone(),
            icon_path: self.properties.icon_path().map(Path::to_path_buf),
            description: self.properties.description.clone(),
            command_type: self.properties.command_type,
            fav_index: None,
        }
    }
}

/// Hands out command uids.
#[derive(Debug, Default)]
pub struct UidAllocator {
    last: Mutex<u64>,
}

impl UidAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let mut last = self.last.lock();
        *last += 1;
        *last
    }
}

// ── Panel state ─────────────────────────────────────────────────────────────

/// A command as the panel displays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelCommand {
    pub uid: u64,
    pub display_name: String,
    pub icon_path: Option<PathBuf>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_index: Option<usize>,
}

/// The payload of `send_commands`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandState {
    pub favorites: Vec<PanelCommand>,
    pub commands: Vec<PanelCommand>,
    pub context_menu_cmds: Vec<PanelCommand>,
}

// ── Registry ────────────────────────────────────────────────────────────────

/// All registered commands, keyed by display name.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    uids: Arc<UidAllocator>,
    commands: BTreeMap<String, Command>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a uid without registering a command, for engine built-ins.
    pub fn reserve_uid(&self) -> u64 {
        self.uids.next()
    }

    /// Register (or replace) a command and return its uid.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        callback: CommandCallback,
        properties: CommandProperties,
    ) -> u64 {
        let name = name.into();
        let uid = self.uids.next();
        self.commands.insert(
            name.clone(),
            Command {
                uid,
                name,
                properties,
                callback,
            },
        );
        uid
    }

    #[must_use]
    pub fn find_by_uid(&self, uid: u64) -> Option<&Command> {
        self.commands.values().find(|c| c.uid == uid)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sort commands into the panel's three lists.
    ///
    /// Context-menu commands always go to the context menu. Commands matching
    /// a favourite (app instance + name) go to favourites in setting order.
    /// Everything else is sorted by name. `jump_commands` lead the context
    /// menu.
    #[must_use]
    pub fn build_state(
        &self,
        favorites: &[ShelfFavorite],
        jump_commands: Vec<PanelCommand>,
    ) -> CommandState {
        let fav_lookup: HashMap<(&str, &str), usize> = favorites
            .iter()
            .enumerate()
            .map(|(i, f)| ((f.app_instance.as_str(), f.name.as_str()), i))
            .collect();

        let mut state = CommandState::default();
        let mut context_menu = Vec::new();

        for command in self.commands.values() {
            let mut panel = command.to_panel();
            let fav_index = command
                .properties
                .app
                .as_deref()
                .and_then(|app| fav_lookup.get(&(app, command.name.as_str())).copied());

            if command.properties.command_type == CommandType::ContextMenu {
                context_menu.push(panel);
            } else if let Some(index) = fav_index {
                panel.fav_index = Some(index);
                state.favorites.push(panel);
            } else {
                state.commands.push(panel);
            }
        }

        state.favorites.sort_by_key(|c| c.fav_index);
        state.commands.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        context_menu.sort_by(|a, b| a.display_name.cmp(&b.display_name));

        state.context_menu_cmds = jump_commands;
        state.context_menu_cmds.extend(context_menu);
        state
    }
}
