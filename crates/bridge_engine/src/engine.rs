//! The engine orchestrator.
//!
//! [`Engine`] owns the heartbeat, the event queue and every piece of
//! per-session state. Its run loop is the single logical main thread:
//!
//! 1. Sleep for the heartbeat interval.
//! 2. Probe the host. Paused ticks stop here.
//! 3. On success, dispatch queued host events and worker results in arrival
//!    order. The first healthy tick also syncs with the host's active
//!    document.
//! 4. Once the failure tolerance is reached, return
//!    [`EngineExit::ConnectionLost`].

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, Probe, RpcCall};
use crate::cache::ContextCache;
use crate::commands::{
    CommandCallback, CommandProperties, CommandRegistry, CommandType, PanelCommand,
};
use crate::config::{APP_ID_ENV, CONTEXT_ENV, EngineConfig, PORT_ENV, TESTS_ROOT_ENV};
use crate::context::{Context, ContextResolver, entity_url};
use crate::display::ContextDisplay;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventQueue, EventSender};
use crate::heartbeat::{Heartbeat, TickOutcome};
use crate::hooks::{
    ContextFieldsDisplay, DefaultContextFieldsDisplay, DefaultImportFootage, HostSceneOperation,
    ImportFootage, SceneOperation,
};
use crate::logging;
use crate::panel::HostPanel;
use crate::project::{self, HostInfo, RenderFile, UNKNOWN_VERSION};
use crate::remote::{HostRuntime, RemoteObject};
use crate::settings::{SettingsScope, SettingsStore};
use crate::switch::{ScopedSwitch, SwitchGuard};
use crate::worker::{DataRetriever, DataService};
use bridge_net::HostEvent;

/// Display name of the built-in "open in tracking site" command.
pub const JUMP_TO_SITE: &str = "Jump to Tracking Site";

/// Display name of the built-in "open folders" command.
pub const JUMP_TO_FILESYSTEM: &str = "Jump to File System";

/// Script looked up under the tests root.
pub const TEST_SCRIPT: &str = "run_tests";

/// Opens a URL or folder outside the host.
pub type Opener = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Open `target` with the platform's default handler.
///
/// # Errors
///
/// Returns an error if the handler cannot be spawned.
pub fn open_with_platform(target: &str) -> anyhow::Result<()> {
    let mut command = if cfg!(target_os = "windows") {
        let mut command = tokio::process::Command::new("cmd");
        command.args(["/C", "start", "", target]);
        command
    } else if cfg!(target_os = "macos") {
        let mut command = tokio::process::Command::new("open");
        command.arg(target);
        command
    } else {
        let mut command = tokio::process::Command::new("xdg-open");
        command.arg(target);
        command
    };
    command
        .spawn()
        .with_context(|| format!("cannot open {target}"))?;
    Ok(())
}

/// Why [`Engine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    /// Shutdown was requested.
    Shutdown,
    /// The heartbeat tolerance was reached.
    ConnectionLost,
}

/// The engine's view of a host connection.
pub struct HostConnection {
    pub rpc: Arc<dyn RpcCall>,
    pub probe: Arc<dyn Probe>,
    /// Producer side of `events`, handed to background workers.
    pub events_tx: EventSender,
    pub events: EventQueue,
}

impl HostConnection {
    #[must_use]
    pub fn new(
        rpc: Arc<dyn RpcCall>,
        probe: Arc<dyn Probe>,
        events_tx: EventSender,
        events: EventQueue,
    ) -> Self {
        Self {
            rpc,
            probe,
            events_tx,
            events,
        }
    }

    /// Calls and probes go through `bridge`.
    #[must_use]
    pub fn from_bridge(bridge: &Arc<Bridge>, events_tx: EventSender, events: EventQueue) -> Self {
        Self::new(bridge.clone(), bridge.clone(), events_tx, events)
    }
}

/// The pipeline engine for one host application.
pub struct Engine {
    config: EngineConfig,
    context: Context,
    heartbeat: Heartbeat,
    events: EventQueue,
    events_tx: EventSender,
    probe: Arc<dyn Probe>,
    panel: HostPanel,
    runtime: HostRuntime,
    resolver: Arc<dyn ContextResolver>,
    cache: ContextCache,
    commands: CommandRegistry,
    display: ContextDisplay,
    scene: Arc<dyn SceneOperation>,
    import_footage: Arc<dyn ImportFootage>,
    opener: Opener,
    context_switch: ScopedSwitch,
    project_context: Option<Context>,
    jump_site_uid: u64,
    jump_fs_uid: u64,
    launch_checked: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("app_id", &self.config.app_id)
            .field("context", &self.context)
            .field("heartbeat", &self.heartbeat)
            .field("commands", &self.commands.len())
            .field("cached_contexts", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine talking to the host over `connection`.
    ///
    /// The engine starts in an empty context; see [`Engine::with_context`].
    #[must_use]
    pub fn new(
        config: EngineConfig,
        connection: HostConnection,
        resolver: Arc<dyn ContextResolver>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let HostConnection {
            rpc,
            probe,
            events_tx,
            events,
        } = connection;

        let commands = CommandRegistry::new();
        let jump_site_uid = commands.reserve_uid();
        let jump_fs_uid = commands.reserve_uid();

        let runtime = HostRuntime::new(rpc.clone());
        let mut scene = HostSceneOperation::new(runtime.clone());
        if let Some(dir) = &config.resources_dir {
            scene = scene.with_resources_dir(dir);
        }

        Self {
            heartbeat: Heartbeat::new(config.heartbeat),
            cache: ContextCache::new(config.cache_key(), settings),
            display: ContextDisplay::new(
                Arc::new(DefaultContextFieldsDisplay),
                None,
                config.site_url.clone(),
            ),
            panel: HostPanel::new(rpc),
            context: Context::default(),
            events,
            events_tx,
            probe,
            runtime,
            resolver,
            commands,
            scene: Arc::new(scene),
            import_footage: Arc::new(DefaultImportFootage::default()),
            opener: Arc::new(open_with_platform),
            context_switch: ScopedSwitch::new(),
            project_context: None,
            jump_site_uid,
            jump_fs_uid,
            launch_checked: false,
            config,
        }
    }

    /// Start in `context`.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Fetch display fields and thumbnails from `service` in the background.
    #[must_use]
    pub fn with_data_service(mut self, service: Arc<dyn DataService>) -> Self {
        let retriever = DataRetriever::start(service, self.events_tx.clone());
        // A replaced retriever winds down once its queue handle is gone.
        drop(self.display.set_retriever(retriever));
        self
    }

    #[must_use]
    pub fn with_fields_display(mut self, hook: Arc<dyn ContextFieldsDisplay>) -> Self {
        self.display.set_hook(hook);
        self
    }

    #[must_use]
    pub fn with_import_footage(mut self, hook: Arc<dyn ImportFootage>) -> Self {
        self.import_footage = hook;
        self
    }

    #[must_use]
    pub fn with_scene_operation(mut self, hook: Arc<dyn SceneOperation>) -> Self {
        self.scene = hook;
        self
    }

    /// Replace the handler used by the jump commands.
    #[must_use]
    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = opener;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────────

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    #[must_use]
    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }

    #[must_use]
    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    #[must_use]
    pub fn panel(&self) -> &HostPanel {
        &self.panel
    }

    #[must_use]
    pub fn runtime(&self) -> &HostRuntime {
        &self.runtime
    }

    #[must_use]
    pub fn scene(&self) -> &Arc<dyn SceneOperation> {
        &self.scene
    }

    /// Register a command shown in the panel and return its uid.
    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        callback: CommandCallback,
        properties: CommandProperties,
    ) -> u64 {
        let name = name.into();
        let uid = self.commands.register(name.clone(), callback, properties);
        debug!(uid, name = %name, "registered command");
        uid
    }

    /// Suspend automatic context changes until the guard is dropped.
    pub fn context_changes_disabled(&self) -> SwitchGuard {
        self.context_switch.engage()
    }

    /// A handle onto the switch behind [`Self::context_changes_disabled`].
    #[must_use]
    pub fn context_change_switch(&self) -> ScopedSwitch {
        self.context_switch.clone()
    }

    fn cache_scope(&self) -> SettingsScope {
        self.context
            .project_id()
            .map_or(SettingsScope::Global, SettingsScope::Project)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Push the initial state once the host is up, then prime the context
    /// cache. With fewer than two documents open nothing cached earlier can
    /// still be relevant, so the cache starts empty.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call or the settings store fails.
    pub async fn post_app_init(&mut self) -> Result<(), EngineError> {
        self.send_state().await?;
        if let Some(log_file) = &self.config.log_file {
            self.panel.send_log_file_path(log_file).await?;
        }

        let open = self.panel.open_document_count().await?;
        let scope = self.cache_scope();
        if open < 2 {
            debug!(open, "clearing context cache");
            self.cache.clear(scope)?;
        } else {
            let restored = self.cache.restore(scope)?;
            info!(open, restored, "restored context cache");
        }
        Ok(())
    }

    /// Run until shutdown is requested or the host stops answering.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> EngineExit {
        info!(
            interval = ?self.heartbeat.interval(),
            tolerance = self.heartbeat.config().tolerance,
            "engine loop started"
        );
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.heartbeat.interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        return EngineExit::Shutdown;
                    }
                    continue;
                }
            }
            if matches!(
                self.tick().await,
                TickOutcome::Terminate | TickOutcome::Terminated
            ) {
                return EngineExit::ConnectionLost;
            }
        }
    }

    /// One heartbeat tick: probe, then dispatch queued events if healthy.
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.heartbeat.tick(self.probe.as_ref()).await;
        if outcome == TickOutcome::Healthy {
            self.process_events().await;
            if !self.launch_checked {
                self.launch_checked = true;
                if let Err(e) = self.sync_active_document().await {
                    warn!(error = %e, "could not sync with the active document");
                }
            }
        }
        outcome
    }

    /// Dispatch everything queued so far. Returns the number of events.
    pub async fn process_events(&mut self) -> usize {
        let events = self.events.drain();
        let count = events.len();
        for event in events {
            if let Err(e) = self.dispatch(event).await {
                error!(error = %e, "event handling failed");
            }
        }
        count
    }

    async fn dispatch(&mut self, event: EngineEvent) -> Result<(), EngineError> {
        match event {
            EngineEvent::Host(HostEvent::ActiveDocumentChanged { path }) => {
                self.handle_active_document_change(&path).await?;
            }
            EngineEvent::Host(HostEvent::Logging { level, message }) => {
                logging::emit_host_log(&level, &message);
            }
            EngineEvent::Host(HostEvent::Command { uid }) => self.handle_command(uid)?,
            EngineEvent::Host(HostEvent::StateRequested) => self.send_state().await?,
            EngineEvent::Host(HostEvent::RunTests) => self.run_tests().await,
            EngineEvent::Worker(result) => {
                self.display.on_worker_event(&self.panel, result).await?;
            }
        }
        Ok(())
    }

    async fn sync_active_document(&mut self) -> Result<(), EngineError> {
        if let Some(path) = self.panel.active_document_path().await? {
            debug!(path = %path.display(), "host launched with a document open");
            self.handle_active_document_change(&path.to_string_lossy())
                .await?;
        }
        Ok(())
    }

    /// Stop background work.
    pub async fn shutdown(&mut self) {
        self.display.stop().await;
        info!("engine shut down");
    }

    // ── Context ─────────────────────────────────────────────────────────

    /// Follow the host to the document at `path`. Returns whether the
    /// context changed.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails while switching.
    pub async fn handle_active_document_change(&mut self, path: &str) -> Result<bool, EngineError> {
        if !self.config.automatic_context_switch {
            debug!(path = %path, "automatic context switch is off");
            return Ok(false);
        }
        let _pause = self.heartbeat.disable();

        if self.context_switch.is_engaged() {
            debug!(path = %path, "context changes are disabled");
            return Ok(false);
        }

        let cached = self.cache.get(path).cloned();
        let mut context = match cached {
            Some(cached) => {
                debug!(path = %path, "context cache hit");
                cached
            }
            None => match self.resolver.context_from_path(Path::new(path), &self.context) {
                Ok(resolved) => {
                    let scope = self.cache_scope();
                    if let Err(e) = self.cache.insert(path, resolved.clone(), scope) {
                        warn!(error = %e, "could not persist the context cache");
                    }
                    resolved
                }
                Err(e) => {
                    debug!(path = %path, error = %e, "falling back to the project context");
                    self.display.clear();
                    self.project_fallback()
                }
            },
        };

        if context.project.is_none() {
            if self.context.project.is_none() {
                debug!(path = %path, "no project in either context");
                return Ok(false);
            }
            context = self.project_fallback();
        }

        if context == self.context {
            return Ok(false);
        }
        self.change_context(context).await?;
        Ok(true)
    }

    /// The current project as a context of its own, memoised per project.
    fn project_fallback(&mut self) -> Context {
        let Some(project) = self.context.project.clone() else {
            return Context::default();
        };
        if let Some(memo) = &self.project_context {
            if memo.project.as_ref() == Some(&project) {
                return memo.clone();
            }
        }
        let context = self
            .resolver
            .context_from_entity(&project.entity_type, project.id)
            .unwrap_or_else(|e| {
                debug!(error = %e, "using the bare project");
                self.context.project_only()
            });
        self.project_context = Some(context.clone());
        context
    }

    /// Switch to `context` and tell the host.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails. The switch itself
    /// has happened by then.
    pub async fn change_context(&mut self, context: Context) -> Result<(), EngineError> {
        self.panel.context_about_to_change().await?;
        let previous = std::mem::replace(&mut self.context, context);
        info!(from = %previous, to = %self.context, "context changed");

        self.send_state().await?;
        if self.config.export_context {
            let serialized = self.context.to_json()?;
            self.panel.setenv(CONTEXT_ENV, &serialized).await?;
        }
        Ok(())
    }

    // ── Panel state ─────────────────────────────────────────────────────

    /// Push the context display and the command lists to the panel.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails.
    pub async fn send_state(&mut self) -> Result<(), EngineError> {
        self.panel.context_about_to_change().await?;
        self.display.clear();
        let entity = self.context.display_entity().cloned();
        self.display.request(&self.panel, entity.as_ref()).await?;

        let state = self
            .commands
            .build_state(&self.config.shelf_favorites, self.jump_commands());
        self.panel.send_commands(&state).await?;
        Ok(())
    }

    fn jump_commands(&self) -> Vec<PanelCommand> {
        let icon = |name: &str| self.config.resources_dir.as_ref().map(|dir| dir.join(name));
        let mut jumps = vec![PanelCommand {
            uid: self.jump_site_uid,
            display_name: JUMP_TO_SITE.to_string(),
            icon_path: icon("site_logo.png"),
            description: Some("Open the current context in the tracking site.".to_string()),
            command_type: CommandType::ContextMenu,
            fav_index: None,
        }];
        if !self.context.filesystem_locations.is_empty() {
            jumps.push(PanelCommand {
                uid: self.jump_fs_uid,
                display_name: JUMP_TO_FILESYSTEM.to_string(),
                icon_path: icon("folder.png"),
                description: Some("Open the current context's folders.".to_string()),
                command_type: CommandType::ContextMenu,
                fav_index: None,
            });
        }
        jumps
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Run the command the user clicked.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Command`] if the command fails.
    pub fn handle_command(&self, uid: u64) -> Result<(), EngineError> {
        let _pause = self.heartbeat.disable();
        if uid == self.jump_site_uid {
            return self.jump_to_site();
        }
        if uid == self.jump_fs_uid {
            return self.jump_to_filesystem();
        }

        let Some(command) = self.commands.find_by_uid(uid) else {
            warn!(uid, "no command registered for uid");
            return Ok(());
        };
        info!(uid, name = %command.name, "running command");
        command.run().map_err(|source| EngineError::Command {
            name: command.name.clone(),
            source,
        })
    }

    fn jump_to_site(&self) -> Result<(), EngineError> {
        let url = match self.context.display_entity() {
            Some(entity) => entity_url(&self.config.site_url, entity),
            None => self.config.site_url.clone(),
        };
        debug!(url = %url, "jumping to the tracking site");
        (self.opener)(&url).map_err(|source| EngineError::Command {
            name: JUMP_TO_SITE.to_string(),
            source,
        })
    }

    fn jump_to_filesystem(&self) -> Result<(), EngineError> {
        let mut failure = None;
        for location in &self.context.filesystem_locations {
            let target = location.to_string_lossy();
            debug!(path = %target, "opening folder");
            if let Err(e) = (self.opener)(&target) {
                warn!(path = %target, error = %e, "could not open folder");
                failure = Some(e);
            }
        }
        match failure {
            Some(source) => Err(EngineError::Command {
                name: JUMP_TO_FILESYSTEM.to_string(),
                source,
            }),
            None => Ok(()),
        }
    }

    // ── Host operations ─────────────────────────────────────────────────

    /// Name and version of the host. The version is
    /// [`UNKNOWN_VERSION`] while the host cannot be asked.
    pub async fn host_info(&self) -> HostInfo {
        match project::host_info(&self.runtime, &self.config.app_id).await {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, "cannot query the host version");
                HostInfo {
                    name: self.config.app_id.clone(),
                    version: UNKNOWN_VERSION.to_string(),
                }
            }
        }
    }

    /// The item selected in the host's project panel.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails.
    pub async fn selected_item(&self) -> Result<Option<RemoteObject>, EngineError> {
        Ok(project::selected_item(&self.runtime).await?)
    }

    /// Import `path` into the host's current project, returning the items
    /// the import created. Empty if the import hook refused the file.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails.
    pub async fn import_filepath(&self, path: &Path) -> Result<Vec<RemoteObject>, EngineError> {
        info!(path = %path.display(), "importing file");
        Ok(project::import_file(&self.runtime, self.import_footage.as_ref(), path).await?)
    }

    /// Add the best match from `collection` to `comp`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails.
    pub async fn add_items_to_comp(
        &self,
        collection: &RemoteObject,
        comp: &RemoteObject,
    ) -> Result<bool, EngineError> {
        Ok(project::add_items_to_comp(collection, comp).await?)
    }

    /// Render `queue_item` on its own. The heartbeat is paused while the
    /// host renders.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails.
    pub async fn render_queue_item(&self, queue_item: &RemoteObject) -> Result<bool, EngineError> {
        let _pause = self.heartbeat.disable();
        Ok(project::render_queue_item(&self.runtime, queue_item).await?)
    }

    /// Files `queue_item` writes to the output `path`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails.
    pub async fn render_files(
        &self,
        path: &str,
        queue_item: &RemoteObject,
    ) -> Result<Vec<RenderFile>, EngineError> {
        Ok(project::render_files(path, queue_item).await?)
    }

    /// Whether every file `queue_item` renders to `path` exists.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a host call fails.
    pub async fn check_sequence(
        &self,
        path: &str,
        queue_item: &RemoteObject,
    ) -> Result<bool, EngineError> {
        Ok(project::check_sequence(path, queue_item).await?)
    }

    /// Save the current document, under `path` if given. The host reports
    /// a document change when saving under a new name; that change is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if the folder cannot be created or a host
    /// call fails.
    pub async fn save_document(&self, path: Option<&Path>) -> Result<(), EngineError> {
        let _no_switch = self.context_changes_disabled();
        match path {
            None => self.scene.save().await?,
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                self.scene.save_as(path).await?;
            }
        }
        Ok(())
    }

    /// Run the embedded test suite, if one is configured.
    pub async fn run_tests(&mut self) {
        let Some(root) = self.config.tests_root.clone() else {
            error!("{TESTS_ROOT_ENV} must be set to run tests");
            return;
        };
        let script = root.join(TEST_SCRIPT);
        if !script.is_file() {
            error!(script = %script.display(), "test script not found");
            return;
        }

        let _pause = self.heartbeat.disable();
        let mut command = tokio::process::Command::new(&script);
        command.current_dir(&root).env(APP_ID_ENV, &self.config.app_id);
        if let Some(port) = self.config.port {
            command.env(PORT_ENV, port.to_string());
        }

        info!(script = %script.display(), "running tests");
        match command.status().await {
            Ok(status) if status.success() => info!("tests passed"),
            Ok(status) => error!(code = ?status.code(), "tests failed"),
            Err(e) => error!(script = %script.display(), error = %e, "cannot run tests"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use super::*;
    use crate::context::{EntityRef, PrefixResolver};
    use crate::error::{BridgeError, ResolveError};
    use crate::events;
    use crate::heartbeat::{HeartbeatConfig, HeartbeatState};
    use crate::panel::methods;
    use crate::settings::MemorySettingsStore;
    use crate::remote::RemoteValue;
    use crate::testing::{FakeDataService, FakeHost, ScriptedRpc, SwitchableProbe};

    const SITE: &str = "https://studio.example";
    const SH010_DOC: &str = "/shows/bbb/sh010/comp_v001.aep";
    const SH020_DOC: &str = "/shows/bbb/sh020/comp_v003.aep";

    fn project() -> EntityRef {
        EntityRef::new("Project", 70).with_name("Big Buck")
    }

    fn shot_context(id: u64) -> Context {
        Context::for_project(project()).with_entity(EntityRef::new("Shot", id))
    }

    fn resolver() -> PrefixResolver {
        PrefixResolver::new()
            .with_root("/shows/bbb/sh010", shot_context(10))
            .with_root("/shows/bbb/sh020", shot_context(20))
    }

    /// Counts lookups and records whether the heartbeat was paused.
    #[derive(Default)]
    struct RecordingResolver {
        inner: PrefixResolver,
        lookups: AtomicUsize,
        pause: Mutex<Option<ScopedSwitch>>,
        paused_during_lookup: AtomicBool,
    }

    impl ContextResolver for RecordingResolver {
        fn context_from_path(
            &self,
            path: &Path,
            previous: &Context,
        ) -> Result<Context, ResolveError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if let Some(pause) = self.pause.lock().as_ref() {
                self.paused_during_lookup
                    .store(pause.is_engaged(), Ordering::SeqCst);
            }
            self.inner.context_from_path(path, previous)
        }

        fn context_from_entity(&self, entity_type: &str, id: u64) -> Result<Context, ResolveError> {
            self.inner.context_from_entity(entity_type, id)
        }
    }

    struct Harness {
        engine: Engine,
        rpc: Arc<ScriptedRpc>,
        probe: Arc<SwitchableProbe>,
        events: EventSender,
        opened: Arc<Mutex<Vec<String>>>,
    }

    fn config() -> EngineConfig {
        EngineConfig::new("aftereffects").with_site_url(SITE)
    }

    fn harness_with(
        config: EngineConfig,
        resolver: Arc<dyn ContextResolver>,
        store: Arc<dyn SettingsStore>,
    ) -> Harness {
        let rpc = Arc::new(ScriptedRpc::default());
        let probe = Arc::new(SwitchableProbe::default());
        let (tx, queue) = events::channel();
        let opened = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&opened);
        let connection = HostConnection::new(rpc.clone(), probe.clone(), tx.clone(), queue);
        let engine = Engine::new(config, connection, resolver, store).with_opener(Arc::new(
            move |target: &str| {
                sink.lock().push(target.to_string());
                Ok(())
            },
        ));
        Harness {
            engine,
            rpc,
            probe,
            events: tx,
            opened,
        }
    }

    fn harness() -> Harness {
        harness_with(
            config(),
            Arc::new(resolver()),
            Arc::new(MemorySettingsStore::new()),
        )
    }

    #[tokio::test]
    async fn test_document_change_switches_context() {
        let mut h = harness();
        assert!(h.engine.handle_active_document_change(SH010_DOC).await.unwrap());

        let context = h.engine.context();
        assert_eq!(context.entity, Some(EntityRef::new("Shot", 10)));
        assert!(h.engine.cache().get(SH010_DOC).is_some());
        assert_eq!(h.rpc.methods()[0], methods::CONTEXT_ABOUT_TO_CHANGE);
        assert_eq!(h.rpc.calls_to(methods::SEND_COMMANDS).len(), 1);

        let setenv = h.rpc.calls_to(methods::SETENV);
        assert_eq!(setenv[0][0], CONTEXT_ENV);
        let exported = Context::from_json(setenv[0][1].as_str().unwrap()).unwrap();
        assert_eq!(&exported, h.engine.context());

        h.rpc.forget_calls();
        assert!(!h.engine.handle_active_document_change(SH010_DOC).await.unwrap());
        assert!(h.rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cached_documents_skip_the_resolver() {
        let recording = Arc::new(RecordingResolver {
            inner: resolver(),
            ..RecordingResolver::default()
        });
        let mut h = harness_with(config(), recording.clone(), Arc::new(MemorySettingsStore::new()));

        assert!(h.engine.handle_active_document_change(SH010_DOC).await.unwrap());
        assert!(h.engine.handle_active_document_change(SH020_DOC).await.unwrap());
        assert!(h.engine.handle_active_document_change(SH010_DOC).await.unwrap());
        assert_eq!(recording.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(h.engine.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_paused_during_document_change() {
        let recording = Arc::new(RecordingResolver {
            inner: resolver(),
            ..RecordingResolver::default()
        });
        let mut h = harness_with(config(), recording.clone(), Arc::new(MemorySettingsStore::new()));
        *recording.pause.lock() = Some(h.engine.heartbeat().pause_switch());

        h.engine.handle_active_document_change(SH010_DOC).await.unwrap();
        assert!(recording.paused_during_lookup.load(Ordering::SeqCst));
        assert_eq!(h.engine.heartbeat().state(), HeartbeatState::Armed);
    }

    #[tokio::test]
    async fn test_unresolved_document_falls_back_to_project() {
        let mut h = harness();
        h.engine = h.engine.with_context(shot_context(10));

        assert!(h.engine.handle_active_document_change("/tmp/scratch.aep").await.unwrap());
        let context = h.engine.context();
        assert_eq!(context.project, Some(project()));
        assert_eq!(context.entity, None);
        assert!(h.engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_no_project_anywhere_keeps_context() {
        let mut h = harness();
        assert!(!h.engine.handle_active_document_change("/tmp/scratch.aep").await.unwrap());
        assert!(h.engine.context().is_empty());
        assert!(h.rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn test_automatic_switch_off() {
        let mut h = harness_with(
            config().with_automatic_context_switch(false),
            Arc::new(resolver()),
            Arc::new(MemorySettingsStore::new()),
        );
        assert!(!h.engine.handle_active_document_change(SH010_DOC).await.unwrap());
        assert!(h.engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_context_changes_disabled_scope() {
        let mut h = harness();
        let guard = h.engine.context_changes_disabled();
        assert!(!h.engine.handle_active_document_change(SH010_DOC).await.unwrap());
        drop(guard);
        assert!(h.engine.handle_active_document_change(SH010_DOC).await.unwrap());
    }

    #[tokio::test]
    async fn test_context_export_can_be_turned_off() {
        let mut h = harness_with(
            config().with_export_context(false),
            Arc::new(resolver()),
            Arc::new(MemorySettingsStore::new()),
        );
        h.engine.handle_active_document_change(SH010_DOC).await.unwrap();
        assert!(h.rpc.calls_to(methods::SETENV).is_empty());
    }

    #[tokio::test]
    async fn test_send_state_lists_commands() {
        let mut h = harness();
        h.engine.register_command(
            "Publish...",
            Arc::new(|| Ok(())),
            CommandProperties::for_app("tk-aftereffects"),
        );

        h.engine.send_state().await.unwrap();
        let state = &h.rpc.calls_to(methods::SEND_COMMANDS)[0][0];
        assert_eq!(state["commands"][0]["display_name"], "Publish...");
        assert_eq!(state["context_menu_cmds"].as_array().unwrap().len(), 1);
        assert_eq!(state["context_menu_cmds"][0]["display_name"], JUMP_TO_SITE);
        assert_eq!(h.rpc.calls_to(methods::SEND_CONTEXT_DISPLAY).len(), 1);

        h.engine = h
            .engine
            .with_context(shot_context(10).with_location("/shows/bbb/sh010"));
        h.rpc.forget_calls();
        h.engine.send_state().await.unwrap();
        let state = &h.rpc.calls_to(methods::SEND_COMMANDS)[0][0];
        assert_eq!(state["context_menu_cmds"][1]["display_name"], JUMP_TO_FILESYSTEM);
    }

    #[tokio::test]
    async fn test_command_dispatch() {
        let mut h = harness();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let uid = h.engine.register_command(
            "Reload",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            CommandProperties::default(),
        );
        let broken = h.engine.register_command(
            "Broken",
            Arc::new(|| anyhow::bail!("no write access")),
            CommandProperties::default(),
        );

        h.engine.handle_command(uid).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(h.engine.handle_command(999).is_ok());
        assert!(matches!(
            h.engine.handle_command(broken),
            Err(EngineError::Command { name, .. }) if name == "Broken"
        ));
        assert_eq!(h.engine.heartbeat().state(), HeartbeatState::Armed);
    }

    #[tokio::test]
    async fn test_jump_commands_open_targets() {
        let mut h = harness();
        let site_uid = h.engine.jump_site_uid;
        let fs_uid = h.engine.jump_fs_uid;

        h.engine.handle_command(site_uid).unwrap();
        h.engine = h
            .engine
            .with_context(shot_context(10).with_location("/shows/bbb/sh010"));
        h.engine.handle_command(site_uid).unwrap();
        h.engine.handle_command(fs_uid).unwrap();

        assert_eq!(
            *h.opened.lock(),
            [
                SITE.to_string(),
                format!("{SITE}/detail/Shot/10"),
                "/shows/bbb/sh010".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_tick_dispatches_queued_events() {
        let mut h = harness();
        h.events
            .send(EngineEvent::Host(HostEvent::StateRequested))
            .unwrap();
        h.events
            .send(EngineEvent::Host(HostEvent::Logging {
                level: "info".to_string(),
                message: "panel ready".to_string(),
            }))
            .unwrap();

        assert_eq!(h.engine.tick().await, TickOutcome::Healthy);
        assert_eq!(h.probe.pings(), 1);
        assert_eq!(h.rpc.calls_to(methods::SEND_COMMANDS).len(), 1);
    }

    #[tokio::test]
    async fn test_first_healthy_tick_syncs_active_document() {
        let mut h = harness();
        h.rpc
            .answer(methods::ACTIVE_DOCUMENT_PATH, json!(SH020_DOC));

        h.engine.tick().await;
        assert_eq!(h.engine.context().entity, Some(EntityRef::new("Shot", 20)));
        h.engine.tick().await;
        assert_eq!(h.rpc.calls_to(methods::ACTIVE_DOCUMENT_PATH).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_ticks_terminate_once() {
        let mut h = harness();
        h.probe.set_failing(true);
        h.events
            .send(EngineEvent::Host(HostEvent::StateRequested))
            .unwrap();

        assert_eq!(h.engine.tick().await, TickOutcome::Failed { failures: 1 });
        assert_eq!(h.engine.tick().await, TickOutcome::Terminate);
        assert_eq!(h.engine.tick().await, TickOutcome::Terminated);
        assert_eq!(h.probe.pings(), 2);
        assert!(h.rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn test_paused_tick_skips_probe() {
        let mut h = harness();
        let pause = h.engine.heartbeat().disable();
        assert_eq!(h.engine.tick().await, TickOutcome::Paused);
        drop(pause);
        assert_eq!(h.probe.pings(), 0);
    }

    #[tokio::test]
    async fn test_run_ends_on_connection_loss() {
        let mut h = harness_with(
            config().with_heartbeat(
                HeartbeatConfig::default().with_interval(Duration::from_millis(5)),
            ),
            Arc::new(resolver()),
            Arc::new(MemorySettingsStore::new()),
        );
        h.probe.set_failing(true);
        let (_shutdown, rx) = watch::channel(false);

        let exit = tokio::time::timeout(Duration::from_secs(5), h.engine.run(rx))
            .await
            .unwrap();
        assert_eq!(exit, EngineExit::ConnectionLost);
    }

    #[tokio::test]
    async fn test_run_honours_shutdown() {
        let mut h = harness();
        let (shutdown, rx) = watch::channel(false);
        shutdown.send(true).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), h.engine.run(rx))
            .await
            .unwrap();
        assert_eq!(exit, EngineExit::Shutdown);
        assert_eq!(h.probe.pings(), 0);
    }

    #[tokio::test]
    async fn test_post_app_init_restores_cache_with_open_documents() {
        let store = Arc::new(MemorySettingsStore::new());
        let scope = SettingsScope::Project(70);
        let mut seeded = ContextCache::new(config().cache_key(), store.clone());
        seeded.insert(SH010_DOC, shot_context(10), scope).unwrap();

        let mut h = harness_with(
            config().with_log_file("/var/log/bridge.log"),
            Arc::new(resolver()),
            store,
        );
        h.engine = h.engine.with_context(Context::for_project(project()));
        h.rpc.answer(methods::OPEN_DOCUMENT_COUNT, json!(3));

        h.engine.post_app_init().await.unwrap();
        assert_eq!(h.engine.cache().len(), 1);
        assert_eq!(
            h.rpc.calls_to(methods::SEND_LOG_FILE_PATH)[0][0],
            "/var/log/bridge.log"
        );
        assert_eq!(h.rpc.calls_to(methods::SEND_COMMANDS).len(), 1);
    }

    #[tokio::test]
    async fn test_post_app_init_clears_cache_with_one_document() {
        let store = Arc::new(MemorySettingsStore::new());
        let scope = SettingsScope::Project(70);
        let mut seeded = ContextCache::new(config().cache_key(), store.clone());
        seeded.insert(SH010_DOC, shot_context(10), scope).unwrap();

        let mut h = harness_with(config(), Arc::new(resolver()), store.clone());
        h.engine = h.engine.with_context(Context::for_project(project()));
        h.rpc.answer(methods::OPEN_DOCUMENT_COUNT, json!(1));

        h.engine.post_app_init().await.unwrap();
        assert!(h.engine.cache().is_empty());
        let mut reloaded = ContextCache::new(config().cache_key(), store);
        assert_eq!(reloaded.restore(scope).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_tests_needs_a_script() {
        let mut h = harness();
        h.engine.run_tests().await;

        let root = tempfile::tempdir().unwrap();
        let mut h = harness_with(
            config().with_tests_root(root.path()),
            Arc::new(resolver()),
            Arc::new(MemorySettingsStore::new()),
        );
        h.engine.run_tests().await;
        assert!(h.rpc.calls().is_empty());
        assert_eq!(h.engine.heartbeat().state(), HeartbeatState::Armed);
    }

    #[tokio::test]
    async fn test_worker_results_update_the_display() {
        let service = Arc::new(FakeDataService::default());
        service.add_entity(
            "Shot",
            10,
            json!({"type": "Shot", "id": 10, "code": "sh010", "image": null}),
        );
        let mut h = harness();
        h.engine = h
            .engine
            .with_data_service(service)
            .with_context(shot_context(10));

        h.engine.send_state().await.unwrap();
        assert!(h.rpc.calls_to(methods::SEND_CONTEXT_DISPLAY).is_empty());

        for _ in 0..100 {
            h.engine.tick().await;
            if !h.rpc.calls_to(methods::SEND_CONTEXT_DISPLAY).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let html = &h.rpc.calls_to(methods::SEND_CONTEXT_DISPLAY)[0][0];
        assert!(html.as_str().unwrap().contains("sh010"));
        let thumb = &h.rpc.calls_to(methods::SEND_CONTEXT_THUMBNAIL)[0][0];
        assert_eq!(thumb["thumb_path"], "../images/default_Shot_thumb_dark.png");
        h.engine.shutdown().await;
    }

    /// Records saves and whether context changes were suspended meanwhile.
    struct RecordingScene {
        saved: Mutex<Vec<Option<PathBuf>>>,
        switch: Mutex<Option<ScopedSwitch>>,
        suspended: AtomicBool,
    }

    impl RecordingScene {
        fn new() -> Self {
            Self {
                saved: Mutex::new(Vec::new()),
                switch: Mutex::new(None),
                suspended: AtomicBool::new(false),
            }
        }

        fn record(&self, path: Option<&Path>) {
            if let Some(switch) = self.switch.lock().as_ref() {
                self.suspended.store(switch.is_engaged(), Ordering::SeqCst);
            }
            self.saved.lock().push(path.map(Path::to_path_buf));
        }
    }

    #[async_trait]
    impl SceneOperation for RecordingScene {
        async fn current_path(&self) -> Result<Option<PathBuf>, BridgeError> {
            Ok(None)
        }

        async fn open(&self, _path: &Path) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn save(&self) -> Result<(), BridgeError> {
            self.record(None);
            Ok(())
        }

        async fn save_as(&self, path: &Path) -> Result<(), BridgeError> {
            self.record(Some(path));
            Ok(())
        }

        async fn reset(&self) -> Result<bool, BridgeError> {
            Ok(true)
        }

        async fn prepare_new(&self) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_save_document_creates_folder_and_suspends_switching() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sh010").join("work").join("comp_v002.aep");
        let scene = Arc::new(RecordingScene::new());
        let mut h = harness();
        h.engine = h.engine.with_scene_operation(scene.clone());
        *scene.switch.lock() = Some(h.engine.context_change_switch());

        h.engine.save_document(Some(target.as_path())).await.unwrap();
        assert!(target.parent().unwrap().is_dir());
        assert!(scene.suspended.load(Ordering::SeqCst));
        assert!(!h.engine.context_change_switch().is_engaged());

        h.engine.save_document(None).await.unwrap();
        assert_eq!(*scene.saved.lock(), vec![Some(target), None]);
    }

    #[tokio::test]
    async fn test_host_info_without_host() {
        let h = harness();
        let info = h.engine.host_info().await;
        assert_eq!(info.name, "aftereffects");
        assert_eq!(info.version, UNKNOWN_VERSION);
    }

    fn host_harness(host: Arc<FakeHost>) -> Harness {
        let probe = Arc::new(SwitchableProbe::default());
        let (tx, queue) = events::channel();
        let connection = HostConnection::new(host, probe.clone(), tx.clone(), queue);
        let engine = Engine::new(
            config(),
            connection,
            Arc::new(resolver()),
            Arc::new(MemorySettingsStore::new()),
        );
        Harness {
            engine,
            rpc: Arc::new(ScriptedRpc::default()),
            probe,
            events: tx,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[tokio::test]
    async fn test_import_returns_new_items() {
        let host = Arc::new(FakeHost::default());
        let items = host.collection(&[]);
        let root = host.object("FolderItem", json!({"items": items}));
        let project = host.object("Project", json!({"rootFolder": root}));
        host.set_global("app", host.object("Application", json!({"project": project})));
        host.set_global("ImportAsType", host.object("ImportAsType", json!({"FOOTAGE": 4})));
        host.on("importFile", move |host, _, _| {
            host.push_item(&items, host.object("FootageItem", json!({})));
            Ok(Value::Null)
        });
        let h = host_harness(host.clone());

        let imported = h
            .engine
            .import_filepath(Path::new("/plates/clip.mov"))
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].class_name(), "FootageItem");
        assert_eq!(host.invocations("importFile").len(), 1);
    }

    #[tokio::test]
    async fn test_render_pauses_heartbeat() {
        let host = Arc::new(FakeHost::default());
        let h = host_harness(host.clone());
        let pause = h.engine.heartbeat().pause_switch();
        let paused = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&paused);

        let statuses = host.object("RQItemStatus", json!({"QUEUED": 1, "DONE": 2}));
        host.set_global("RQItemStatus", statuses);
        let item = host.object("RenderQueueItem", json!({"status": 1, "render": false}));
        let queue = host.object("RenderQueue", json!({"items": host.collection(&[])}));
        let project = host.object("Project", json!({"renderQueue": queue}));
        host.set_global("app", host.object("Application", json!({"project": project})));
        let rendered = item.clone();
        host.on("render", move |host, _, _| {
            seen.store(pause.is_engaged(), Ordering::SeqCst);
            host.set_prop(&rendered, "status", json!(2));
            Ok(Value::Null)
        });

        let rpc: Arc<dyn RpcCall> = host.clone();
        let item = RemoteValue::from_json(item, &rpc).into_object().unwrap();
        assert!(h.engine.render_queue_item(&item).await.unwrap());
        assert!(paused.load(Ordering::SeqCst));
        assert_eq!(h.engine.heartbeat().state(), HeartbeatState::Armed);
    }
}
