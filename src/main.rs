//! Switchyard - network appliance control plane
//!
//! Reconciles bridge VLAN tagging and the WAN uplink against live
//! kernel state, with a module dependency hierarchy and
//! state machine-controlled WAN lifecycle.

mod cli;
mod error;
mod exec;
mod gate;
mod host;
mod manifest;
mod network;
mod output;
mod peers;
mod store;
mod tagging;
mod wan;

#[cfg(test)]
mod testing;

use cli::{Cli, Commands, TaggingAction, TaggingConfigAction, WanAction};
use error::Result;
use exec::{CommandRunner, SystemRunner};
use gate::DependencyGate;
use host::Host;
use manifest::SwitchyardConfig;
use output::OutputFormat;
use std::path::Path;
use std::sync::Arc;
use store::ConfigStore;
use tagging::TaggingReconciler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wan::WanManager;

fn main() {
    if let Err(e) = run() {
        tracing::debug!(kind = ?e.kind(), "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        // Commands that don't require config
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }
        command => {
            init_logging(cli.verbose);
            execute(command, &cli.config)
        }
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn execute(command: Commands, config_path: &Path) -> Result<()> {
    let config = manifest::load(config_path)?;
    if config.config.privilege_wrapper.is_none() && !is_root() {
        tracing::warn!("not running as root and no privilege_wrapper configured; privileged commands will fail");
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let host = Host::from_config(runner, &config);
    let store = ConfigStore::new(&config.config.state_dir);
    let gate = Arc::new(DependencyGate::new()?);

    match command {
        Commands::Wan { action } => run_wan(action, host, store, gate, &config),
        Commands::Tagging { action } => {
            let tagging = TaggingReconciler::new(host, store, gate, &config.config.bridge);
            run_tagging(action, &tagging)
        }
        Commands::Deps { module } => {
            gate.check(module, &store)?;
            let required = gate.requirements(module);
            if required.is_empty() {
                println!("{} has no prerequisites", module);
            } else {
                let names: Vec<&str> = required.iter().map(|m| m.as_str()).collect();
                println!("{}: prerequisites active ({})", module, names.join(", "));
            }
            Ok(())
        }
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }
    }
}

fn run_wan(
    action: WanAction,
    host: Host,
    store: ConfigStore,
    gate: Arc<DependencyGate>,
    config: &SwitchyardConfig,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let mut wan = WanManager::new(host, store, gate, rt.handle().clone(), config.dhcp.clone());

    match action {
        WanAction::Start => {
            println!("{}", wan.start()?);
            wait_for_verification(&rt, &mut wan);
        }
        WanAction::Stop => println!("{}", wan.stop()?),
        WanAction::Restart => {
            println!("{}", wan.restart()?);
            wait_for_verification(&rt, &mut wan);
        }
        WanAction::Status { json } => {
            emit(&OutputFormat::from_json_flag(json).render(&wan.status()?)?);
        }
        WanAction::Show { json } => {
            emit(&OutputFormat::from_json_flag(json).render(&wan.show()?)?);
        }
        action @ WanAction::Config { .. } => {
            if let Some(request) = action.into_request() {
                println!("{}", wan.config(request)?);
            }
        }
    }
    Ok(())
}

/// Keep the runtime alive until a DHCP verification reports back
fn wait_for_verification(rt: &tokio::runtime::Runtime, wan: &mut WanManager) {
    if let Some(task) = wan.take_verification() {
        println!("Waiting for DHCP lease...");
        println!("{}", rt.block_on(task.outcome()));
    }
}

fn run_tagging(action: TaggingAction, tagging: &TaggingReconciler) -> Result<()> {
    match action {
        TaggingAction::Start => println!("{}", tagging.start()?),
        TaggingAction::Stop => println!("{}", tagging.stop()?),
        TaggingAction::Restart => println!("{}", tagging.restart()?),
        TaggingAction::Status { json } => {
            emit(&OutputFormat::from_json_flag(json).render(&tagging.status()?)?);
        }
        TaggingAction::Config { action } => match action {
            TaggingConfigAction::Add { name, untag, tag } => {
                println!("{}", tagging.add(&name, untag.as_deref(), tag.as_deref())?);
            }
            TaggingConfigAction::Remove { name } => println!("{}", tagging.remove(&name)?),
            TaggingConfigAction::Show { json } => {
                emit(&OutputFormat::from_json_flag(json).render(&tagging.show()?)?);
            }
        },
    }
    Ok(())
}

fn emit(text: &str) {
    if text.ends_with('\n') {
        print!("{}", text);
    } else {
        println!("{}", text);
    }
}
