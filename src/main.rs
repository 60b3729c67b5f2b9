// bannerrun - per-host connection driver for banner grabs and TLS probes
// Copyright (C) 2025 bannerrun contributors
// Licensed under GPL-3.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

use anyhow::Result;
use bannerrun::output::{generate_json, write_json_file};
use bannerrun::scanner::{Grabber, Target};
use bannerrun::{Args, GrabConfig};
use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize logging - respect RUST_LOG environment variable
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    // Handle --config-example (generate example config and exit)
    if let Some(config_path) = &args.config_example {
        GrabConfig::create_example(
            config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid file path"))?,
        )?;
        println!("✓ Example configuration saved to: {}", config_path.display());
        return Ok(());
    }

    args.validate()?;
    let config = GrabConfig::from_args(&args)?;

    let target_str = args
        .target
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("No target specified"))?;
    let target = Target::parse(target_str, config.port)?;

    info!("Grabbing {}", target);
    let grab = Grabber::new(config).grab_target(&target).await;

    match &args.output.output {
        Some(path) => {
            write_json_file(
                &grab,
                path.to_str()
                    .ok_or_else(|| anyhow::anyhow!("Invalid output path"))?,
                args.output.pretty,
            )?;
            info!("Results written to {}", path.display());
        }
        None => println!("{}", generate_json(&grab, args.output.pretty)?),
    }

    Ok(())
}
