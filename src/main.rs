use strata::cli::Args;
use strata::config::{self, Settings};
use strata::entities::{AutoPrompter, Project};

use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};
use std::time::Duration;

/// Upper bound on waiting for background reloads before rendering.
const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn init_logging(args: &Args, path_config: &config::PathConfig) -> anyhow::Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| config::data_file("strata.log", path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let path_config = config::PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &path_config)?;

    info!("strata {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);
    info!("Config path: {}", config::config_file(config::SETTINGS_FILE, &path_config).display());

    let settings = Settings::load(&path_config);
    let auto_reload = settings.auto_reload;
    let mut project = Project::with_settings(settings);

    let comp = project.open_document(&args.doc)?;

    if !project.missing_links().is_empty() {
        // No interactive prompt here: missing files stay transparent.
        project.resolve_missing_links(&mut AutoPrompter::no());
    }

    if args.check_reload {
        let mut prompter = if auto_reload { AutoPrompter::yes() } else { AutoPrompter::no() };
        let tickets = project.check_for_auto_reload(comp, &mut prompter);
        if !tickets.is_empty() {
            info!("Waiting for {} reloads", tickets.len());
            let applied = project.wait_for_reloads(RELOAD_TIMEOUT);
            if applied < tickets.len() {
                warn!("Only {} of {} reloads were applied", applied, tickets.len());
            }
        }
    }

    if args.tree {
        println!("{}", project.describe_tree(comp));
    }

    if let Some(out) = &args.output {
        project.composite_image(comp).save_png(out)?;
        info!("Wrote {}", out.display());
    }

    // No views are attached in the CLI.
    let events = project.events().poll();
    debug!("Discarded {} queued events", events.len());

    if let Some(flat_path) = &args.flatten {
        let desc = project.flattened_desc(comp);
        let json = serde_json::to_string_pretty(&desc).context("Failed to serialize flattened document")?;
        std::fs::write(flat_path, json).with_context(|| format!("Failed to write {}", flat_path.display()))?;
        info!("Wrote flattened document {}", flat_path.display());
    }

    Ok(())
}
