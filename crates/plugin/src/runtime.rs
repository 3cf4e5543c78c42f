//! Process-wide plugin state
//!
//! Everything the exports and detours need lives in one [`Runtime`], created
//! once by `rust_plugin_load`.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use scripthook_core::config::{gamedata_path, prefs_path};
use scripthook_core::hooks::OriginalSlot;
use scripthook_core::{
    CallbackRenderer, CoreConfig, Gamedata, HookManager, OverlayGate, Preferences, RenderHost,
    ScriptHost, ScriptSettings,
};
use scripthook_engine::FfiScriptEngine;
use scripthook_sdk::HostScriptApi;

/// Priority of the script tick on the render loop
const SCRIPT_TICK_PRIORITY: i32 = -5;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

pub(crate) struct Runtime {
    pub config: CoreConfig,
    pub gamedata: Gamedata,
    pub api: HostScriptApi,
    pub hooks: HookManager,
    pub scripts: Arc<ScriptHost<FfiScriptEngine>>,
    pub renderer: CallbackRenderer,
    pub overlay: Arc<OverlayGate>,
    pub prefs: Mutex<Preferences>,
    /// Pre-patch code of the script loader, readable without the hook registry
    pub script_manager_load: OnceLock<OriginalSlot>,
}

impl Runtime {
    fn new(config: CoreConfig, api: HostScriptApi) -> Result<Self, String> {
        let gamedata = gamedata_path()
            .map_err(|e| e.to_string())
            .and_then(|path| Gamedata::load_or_builtin(path).map_err(|e| e.to_string()))?;

        let prefs = prefs_path()
            .map_err(|e| e.to_string())
            .and_then(|path| Preferences::load(path).map_err(|e| e.to_string()))?;

        let settings = ScriptSettings::from_config(&config.scripts).map_err(|e| e.to_string())?;
        tracing::info!("Script directory: {}", settings.root.display());

        let overlay = Arc::new(OverlayGate::new(
            config.overlay.toggle_key,
            prefs.is_open_at_startup() || !prefs.onboarded(),
        ));

        Ok(Self {
            config,
            gamedata,
            api,
            hooks: HookManager::with_inline_detours(),
            scripts: ScriptHost::new(settings),
            renderer: CallbackRenderer::new(),
            overlay,
            prefs: Mutex::new(prefs),
            script_manager_load: OnceLock::new(),
        })
    }

    /// Hook the script host and the overlay into the render loop
    fn wire_render_callbacks(&self) {
        let scripts = Arc::clone(&self.scripts);
        let overlay = Arc::clone(&self.overlay);
        self.renderer.register_per_tick_callback(
            SCRIPT_TICK_PRIORITY,
            Arc::new(move || scripts.on_tick(overlay.is_open(), Instant::now())),
        );

        self.overlay.attach(&self.renderer);
    }

    /// The overlay opens on first start until the welcome popup is dismissed
    pub fn dismiss_welcome(&self) {
        match self.prefs.lock().mark_onboarded() {
            Ok(true) => tracing::info!("Welcome popup dismissed"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to save preferences: {}", e),
        }
    }
}

/// The runtime, once the plugin is loaded
pub(crate) fn get() -> Option<&'static Runtime> {
    RUNTIME.get()
}

/// Create the runtime cell
///
/// Fails if the plugin was already loaded into this process.
pub(crate) fn init(config: CoreConfig, api: HostScriptApi) -> Result<&'static Runtime, String> {
    if RUNTIME.get().is_some() {
        return Err("Plugin is already loaded".to_string());
    }

    let runtime = Runtime::new(config, api)?;
    if RUNTIME.set(runtime).is_err() {
        return Err("Plugin is already loaded".to_string());
    }

    let runtime = get().ok_or_else(|| "Runtime unavailable".to_string())?;
    runtime.wire_render_callbacks();
    Ok(runtime)
}
