//! `picapture` - CLI for the capture daemon
//!
//! With no subcommand the binary runs the capture loop until it receives
//! ctrl-c or SIGTERM.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use picapture::cli::{Cli, Command, ConfigCommand};
use picapture::{
    init_logging, CommandCapture, Config, CycleOutcome, Daemon, RedisPublisher, SleepPacer,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    match cli.subcommand() {
        Command::Run => handle_run(&load_config(&cli)?).await,
        Command::Once(once_cmd) => handle_once(&load_config(&cli)?, once_cmd.json).await,
        Command::Status(status_cmd) => {
            handle_status(&load_config(&cli)?, status_cmd.json).await
        }
        Command::Config(config_cmd) => handle_config(&cli, config_cmd),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    Config::load_from(Some(cli.config_file())).context("loading configuration")
}

fn build_daemon(config: &Config) -> anyhow::Result<Daemon<CommandCapture, RedisPublisher>> {
    let provider = CommandCapture::new(config.capture.command.clone());
    let publisher = RedisPublisher::new(&config.store)?;
    let daemon = Daemon::new(config, provider, publisher)?;
    daemon.prepare_output_dir()?;
    Ok(daemon)
}

async fn handle_run(config: &Config) -> anyhow::Result<()> {
    let mut daemon = build_daemon(config)?;
    info!(
        "Publishing to {} key {} channel {}",
        config.store.url(),
        config.store.key,
        config.store.channel
    );
    daemon.run(&mut SleepPacer, shutdown_signal()).await;
    Ok(())
}

async fn handle_once(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut daemon = build_daemon(config)?;
    let outcome = daemon.run_cycle().await;

    let CycleOutcome::Captured {
        record,
        published,
        removed,
    } = outcome
    else {
        bail!("capture failed; see log for details");
    };

    if json {
        let report = serde_json::json!({
            "timestamp": record.timestamp_string(),
            "path": record.path,
            "published": published,
            "removed": removed,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Captured:   {}", record.path.display());
        println!("Timestamp:  {}", record.timestamp_string());
        println!("Published:  {}", if published { "yes" } else { "no" });
        println!("Removed:    {}", removed.len());
    }
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut publisher = RedisPublisher::new(&config.store)?;
    let latest = publisher
        .latest()
        .await
        .with_context(|| format!("reading {} from {}", config.store.key, config.store.url()))?;

    if json {
        let status = serde_json::json!({
            "store": config.store.url(),
            "key": config.store.key,
            "latest": latest.as_ref().map(|r| serde_json::json!({
                "timestamp": r.timestamp_string(),
                "path": r.path,
            })),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("picapture status");
        println!("----------------");
        println!("Store:      {}", config.store.url());
        println!("Key:        {}", config.store.key);
        match latest {
            Some(record) => {
                println!("Latest:     {}", record.path.display());
                println!("Taken at:   {}", record.timestamp_string());
            }
            None => println!("Latest:     (no captures recorded)"),
        }
    }
    Ok(())
}

fn handle_config(cli: &Cli, cmd: &ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = &load_config(cli)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Capture]");
                println!(
                    "  Output dir:         {}",
                    config.capture.output_dir.display()
                );
                println!(
                    "  Host output path:   {}",
                    config
                        .capture
                        .host_output_path
                        .as_ref()
                        .map_or_else(|| "(unset)".to_string(), |p| p.display().to_string())
                );
                println!(
                    "  Command:            {}",
                    config.capture.command.args().join(" ")
                );
                println!("  Interval (secs):    {}", config.capture.interval_secs);
                println!();
                println!("[Retention]");
                println!("  Max saved:          {}", config.retention.max_saved);
                println!("  Pattern:            {}", config.retention.pattern);
                println!();
                println!("[Store]");
                println!("  URL:                {}", config.store.url());
                println!("  Key:                {}", config.store.key);
                println!("  Channel:            {}", config.store.channel);
            }
        }
        ConfigCommand::Path => {
            println!("{}", cli.config_file().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.clone().unwrap_or_else(|| cli.config_file());
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

/// Resolves on ctrl-c, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received ctrl-c, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received ctrl-c, shutting down");
    }
}
