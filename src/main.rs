use std::process::ExitCode;

use anyhow::{Context as _, Result};
use catalog_harvest::cli::{Cli, Command};
use catalog_harvest::config::{Settings, check_tolerance};
use catalog_harvest::pipeline::CatalogPipeline;
use catalog_harvest::price;
use clap::Parser as _;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> Result<()> {
    dotenvy::dotenv().ok();
    catalog_harvest::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let mut settings = Settings::from_env().context("read settings")?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    if let Some(path) = cli.sources {
        settings.sources_path = path;
    }
    if !cli.only_files.is_empty() {
        settings.only_files = Some(cli.only_files);
    }

    match cli.command {
        Command::Crawl => {
            let summary = CatalogPipeline::new(settings).crawl().await.context("crawl")?;
            summary.ensure_ok()?;
        }
        Command::Refresh(args) => {
            let summary = CatalogPipeline::new(settings)
                .refresh(args.force)
                .await
                .context("refresh")?;
            summary.ensure_ok()?;
        }
        Command::Enrich(args) => {
            let summary = CatalogPipeline::new(settings)
                .enrich(args.force)
                .await
                .context("enrich")?;
            summary.ensure_ok()?;
        }
        Command::Verify(args) => {
            if let Some(limit) = args.limit {
                settings.verify_limit = Some(limit);
            }
            if let Some(tolerance) = args.tolerance {
                settings.verify_tolerance = check_tolerance("--tolerance", tolerance)?;
            }
            let (report, path) = CatalogPipeline::new(settings)
                .verify(args.out)
                .await
                .context("verify")?;
            println!(
                "checked {} items, {} within tolerance, {} flagged: {}",
                report.checked,
                report.within_tolerance,
                report.mismatches.len(),
                path.display()
            );
        }
        Command::Price(args) => {
            let found = CatalogPipeline::new(settings)
                .lookup_price(&args.url, args.stored)
                .await
                .context("price lookup")?;
            match found {
                Some(cents) => println!("{}", price::display(cents)),
                None => println!("contact for price"),
            }
        }
        Command::Watch(args) => watch(CatalogPipeline::new(settings), &args.schedule, args.force).await?,
    }

    Ok(())
}

async fn watch(pipeline: CatalogPipeline, schedule: &str, force: bool) -> Result<()> {
    info!(schedule, "starting price watch");

    // Run once immediately
    if let Err(e) = pipeline.refresh(force).await {
        error!("Error during initial refresh: {e:#}");
    }

    let sched = JobScheduler::new().await?;

    let job_pipeline = pipeline.clone();
    sched
        .add(Job::new_async(schedule, move |_uuid, _l| {
            let pipeline = job_pipeline.clone();
            Box::pin(async move {
                if let Err(e) = pipeline.refresh(force).await {
                    error!("Error during scheduled refresh: {e:#}");
                }
            })
        })
        .with_context(|| format!("invalid schedule {schedule:?}"))?)
        .await?;

    sched.start().await?;
    info!("Scheduler started");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutting down");
    let mut sched = sched;
    sched.shutdown().await?;
    Ok(())
}
