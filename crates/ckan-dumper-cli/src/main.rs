use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ckan_dumper_cli::{Command, Config, PublishArgs, package_paths};
use ckan_dumper_client::CkanClient;
use ckan_dumper_core::progress::TracingReporter;
use ckan_dumper_core::{ApiKey, CkanDumper, DataPackage, DumpSummary, PublishAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::parse();

    let client = CkanClient::with_config(
        &config.host,
        config.api_key.as_deref().map(ApiKey::parse),
        &config.http_config(),
    )
    .context("Invalid CKAN host")?;

    match &config.command {
        Command::Publish(args) => {
            publish(client, &config.host, args).await?;
        }
        Command::Show { name } => {
            show(&client, name).await?;
        }
    }

    Ok(())
}

async fn publish(client: CkanClient, host: &str, args: &PublishArgs) -> anyhow::Result<()> {
    let (base_dir, descriptor) = package_paths(&args.path);
    let package = DataPackage::from_path(&descriptor)
        .with_context(|| format!("Failed to read {}", descriptor.display()))?;

    let mut dumper = CkanDumper::new(client, args.dumper_config());
    let summary = dumper
        .dump_with_progress(&package, &base_dir, host, &TracingReporter)
        .await
        .with_context(|| format!("Failed to publish {} to {}", package.name, host))?;

    print_summary(host, &summary);
    Ok(())
}

fn action_label(action: PublishAction) -> &'static str {
    match action {
        PublishAction::Created => "+ Created",
        PublishAction::Updated => "↑ Updated",
    }
}

fn print_summary(host: &str, summary: &DumpSummary) {
    info!("═══════════════════════════════════════════════════════");
    info!("Publish complete: {} -> {}", summary.package_name, host);
    info!("═══════════════════════════════════════════════════════");
    info!(
        "  Package:             {} ({})",
        action_label(summary.package_action),
        summary.package_id
    );
    info!("───────────────────────────────────────────────────────");
    for resource in &summary.resources {
        match resource.datastore_rows {
            Some(rows) => info!(
                "  {} {} ({}, {} rows in DataStore)",
                action_label(resource.action),
                resource.name,
                resource.id,
                rows
            ),
            None => info!(
                "  {} {} ({})",
                action_label(resource.action),
                resource.name,
                resource.id
            ),
        }
    }
    info!("───────────────────────────────────────────────────────");
    info!("  + Created:           {}", summary.created());
    info!("  ↑ Updated:           {}", summary.updated());
    info!("  DataStore rows:      {}", summary.datastore_rows());
    info!("═══════════════════════════════════════════════════════");
}

async fn show(client: &CkanClient, name: &str) -> anyhow::Result<()> {
    info!("Fetching package: {}", name);
    let package = client
        .show_package(name)
        .await
        .with_context(|| format!("Failed to fetch package {}", name))?;

    println!("{}", serde_json::to_string_pretty(&package)?);
    Ok(())
}
