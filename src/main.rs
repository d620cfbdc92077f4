//! modswitch - WebAssembly module switcher
//!
//! Lists extension modules, toggles them on or off, and serves a JSON command
//! loop for hosts that keep modules loaded.

use modswitch::core::config::{CliArgs, CliCommand};
use modswitch::core::{Config, Logger, NotificationBus, Notifier};
use modswitch::plugin::{ModuleManager, NoHost, ToggleOutcome, WasmHost};
use modswitch::{ControlServer, VERSION};

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration (CLI args, env vars, and config file)
    let config = match Config::load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting modswitch v{}", VERSION);
    info!(
        root = ?config.modules.root_dir,
        extension = %config.modules.extension,
        disabled_suffix = %config.modules.disabled_suffix,
        "Module configuration"
    );

    match args.command {
        CliCommand::List { json } => {
            let manager = ModuleManager::from_config(&config, Arc::new(NoHost), Notifier::disabled());
            let result = list(&manager, json);
            finish(&manager).await;
            result
        }
        CliCommand::Toggle { module } => {
            let manager = ModuleManager::from_config(&config, Arc::new(NoHost), Notifier::disabled());
            let result = manager.toggle(&module);
            finish(&manager).await;

            match result? {
                ToggleOutcome::Enabled => println!("{} enabled", module),
                ToggleOutcome::Disabled => println!("{} disabled", module),
                ToggleOutcome::Scheduled(state) => {
                    println!("{} is in use; it will be {} once released", module, state)
                }
            }
            Ok(())
        }
        CliCommand::Pending => {
            let manager = ModuleManager::from_config(&config, Arc::new(NoHost), Notifier::disabled());
            let pending = manager.pending();
            if pending.is_empty() {
                println!("No pending toggles");
            }
            for entry in pending {
                println!("{}\t{}", entry.module_key, entry.desired_state);
            }
            finish(&manager).await;
            Ok(())
        }
        CliCommand::Serve => serve(config).await,
    }
}

fn list(manager: &ModuleManager, json: bool) -> Result<()> {
    for record in manager.discover_all() {
        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            println!(
                "{}\t{}\t{}\t{}{}",
                record.internal_name(),
                record.name(),
                record.version(),
                if record.active() { "enabled" } else { "disabled" },
                if record.loaded() { "\tloaded" } else { "" }
            );
        }
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let bus = Arc::new(NotificationBus::new());
    let host = Arc::new(WasmHost::new()?);
    let manager = Arc::new(ModuleManager::from_config(
        &config,
        host.clone(),
        Notifier::new(bus.clone()),
    ));

    if config.host.preload {
        let records = manager.discover_all();
        let layout = manager.layout();
        let loaded = host.load_all(layout.modules_dir(), &records, layout.extension());
        info!(loaded, discovered = records.len(), "Active modules preloaded");
    }

    ControlServer::new(manager, bus).serve().await?;
    Ok(())
}

async fn finish(manager: &ModuleManager) {
    if let Some(report) = manager.shutdown().await {
        if !report.is_clean() {
            warn!(modules = ?report.unresolved, "Pending toggles could not be applied");
        }
    }
}
