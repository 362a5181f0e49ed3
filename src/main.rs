//! AI Menubar - Main Entry Point
//!
//! Flags:
//! - `--verbose` / `-v`: debug logging
//! - `--hotkey <shortcut>`: set and save the global hotkey, e.g. `cmd+shift+space`
//! - `--import-usage <file>`: merge a usage export into the local records
//! - `--export-usage <file>`: write the usage records to `file` and exit

use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use std::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_menubar::business::{NetworkMonitor, ProbeConfig, AUTOSAVE_INTERVAL};
use ai_menubar::data::keys;
use ai_menubar::ui::{self, ShellContext};
use ai_menubar::{AppConfig, BridgeGenerator, PreferenceStore, ServiceRegistry, UsageTracker};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    info!("Starting AI Menubar v{}", env!("CARGO_PKG_VERSION"));

    let bridge = BridgeGenerator::new(AppConfig::bridge_dir());
    let registry = ServiceRegistry::builtin(bridge.index_url()?);
    let mut prefs = PreferenceStore::open(AppConfig::config_path(), &registry)?;
    info!("Configuration loaded from {}", prefs.path().display());

    if let Some(shortcut) = flag_value(&args, "--hotkey") {
        let (key_code, modifiers) = keys::parse_shortcut(shortcut)
            .with_context(|| format!("invalid --hotkey `{}`", shortcut))?;
        prefs.set_hotkey(key_code, modifiers)?;
        info!("Hotkey set to {}", prefs.hotkey_display());
    }

    match bridge.generate(prefs.api_keys()) {
        Ok(Some(provider)) => info!("askAppleAI bridge uses {:?}", provider),
        Ok(None) => info!("askAppleAI bridge has no API key"),
        Err(e) => warn!("Failed to write askAppleAI page: {}", e),
    }

    // Background runtime for the reachability probe; the UI owns the main thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("ai-menubar-net")
        .enable_all()
        .build()?;
    let (reachability_tx, reachability) = mpsc::channel();
    let _network = NetworkMonitor::spawn(runtime.handle(), ProbeConfig::default(), reachability_tx);

    let tracker = UsageTracker::open(AppConfig::sessions_dir(), AUTOSAVE_INTERVAL)?;
    info!("Usage tracker ready");

    if let Some(path) = flag_value(&args, "--import-usage") {
        tracker.import_file(Path::new(path))?;
        info!("Imported usage from {}", path);
    }
    if let Some(path) = flag_value(&args, "--export-usage") {
        tracker.export_to_file(Path::new(path))?;
        info!("Exported usage to {}", path);
        tracker.shutdown();
        return Ok(());
    }

    ui::run(ShellContext {
        registry,
        prefs,
        bridge,
        tracker,
        reachability,
    })
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn init_logging(debug: bool) {
    let level = if debug {
        "ai_menubar=debug"
    } else {
        "ai_menubar=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
