use std::{future::Future, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    deeplink::{self, InitialView},
    load_settings,
    settings::DEFAULT_SETTINGS_FILE,
    ControllerEvent, JobController, JobOutcome,
};
use serde_json::{json, Value};
use shared::domain::{BoundingBox, JobId, LatLng, Timestamp, Viewport};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "modeller", about = "Run environmental models through the modeller API")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,
    /// Configuration key; defaults to `default_config_key` from the settings.
    #[arg(long, global = true)]
    config_key: Option<String>,
    /// Map extent as `west,south,east,north`.
    #[arg(long, global = true)]
    bbox: Option<String>,
    /// Model parameter override, `name=value`. Repeatable.
    #[arg(long = "param", global = true, value_parser = parse_param)]
    params: Vec<(String, String)>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the API is reachable and the credentials are accepted.
    Status,
    /// Show the parameters and known results of a configuration.
    Config,
    /// Ask whether the model can be run for the extent.
    Prognosis,
    /// Submit a model run and follow it until it ends.
    Run,
    /// Print the log of a job.
    Log { job: String },
    /// Search the geocoder.
    Places { query: String },
    /// Time series of the selected attribute at a location.
    Point {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lng: f64,
        #[arg(long)]
        attribute: Option<String>,
        /// Timestep as `YYYY-MM-DDTHH:MM:SS`; defaults to the selected one.
        #[arg(long)]
        time: Option<String>,
    },
    /// Decode a shareable link fragment.
    Link { fragment: String },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name missing in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let settings = load_settings(&cli.settings);
    info!(api = %settings.api_url, model = %settings.model_name, "settings loaded");
    let controller =
        JobController::from_settings(settings).context("failed to build the API client")?;

    match &cli.command {
        Command::Status => {
            let status = controller.check_api().await.map_err(|err| anyhow!(err.alert_text()))?;
            print_json(&json!({
                "authenticated": status.authenticated,
                "status": status.status,
                "message": status.message,
            }))?;
        }
        Command::Config => {
            prepare(&controller, &cli).await?;
            print_json(&json!({
                "state": controller.snapshot().await,
                "timesteps": controller.timestep_options().await,
                "attributes": controller.attribute_options().await,
            }))?;
        }
        Command::Prognosis => {
            prepare(&controller, &cli).await?;
            let snapshot = controller.snapshot().await;
            print_json(&json!({
                "permitted": snapshot.prognosis.permitted,
                "message": snapshot.prognosis.message,
                "config_key": snapshot.prognosis.config_key,
                "run_enabled": snapshot.run_enabled,
            }))?;
        }
        Command::Run => {
            prepare(&controller, &cli).await?;
            let mut events = controller.subscribe_events();
            let handle = controller
                .run_model()
                .await
                .map_err(|err| anyhow!(err.alert_text()))?;
            let outcome = follow(handle.outcome(), &mut events, print_event).await;
            report_outcome(&controller, outcome).await?;
        }
        Command::Log { job } => {
            let content = controller
                .fetch_job_log(&JobId::from(job.as_str()))
                .await
                .with_context(|| format!("no log available for job {job}"))?;
            println!("{content}");
        }
        Command::Places { query } => {
            let places = controller
                .search_places(query)
                .await
                .map_err(|err| anyhow!(err.alert_text()))?;
            for place in places {
                println!(
                    "{} ({}) {:.4},{:.4}",
                    place.name,
                    place.country_name.as_deref().unwrap_or("-"),
                    place.lat,
                    place.lng
                );
            }
        }
        Command::Point {
            lat,
            lng,
            attribute,
            time,
        } => {
            prepare(&controller, &cli).await?;
            if let Some(raw) = time {
                let timestamp = Timestamp::parse(raw)
                    .with_context(|| format!("invalid --time '{raw}'"))?;
                controller
                    .set_time(timestamp)
                    .await
                    .map_err(|err| anyhow!(err.alert_text()))?;
            }
            if let Some(attribute) = attribute {
                controller
                    .set_attribute(attribute)
                    .await
                    .map_err(|err| anyhow!(err.alert_text()))?;
            }
            let series = controller
                .query_point(LatLng {
                    lat: *lat,
                    lng: *lng,
                })
                .await
                .with_context(|| format!("no point data available at {lat},{lng}"))?;
            print_json(&json!({
                "plottable": series.is_plottable(),
                "series": series,
            }))?;
        }
        Command::Link { fragment } => {
            let link = deeplink::decode(fragment, &controller.settings().link_defaults());
            let view = match link.view {
                InitialView::CenterZoom { center, zoom } => {
                    json!({"center": center, "zoom": zoom})
                }
                InitialView::Bounds(bounds) => json!({"bounds": bounds}),
            };
            print_json(&json!({
                "config_key": link.config_key,
                "view": view,
                "attribute": link.hints.attribute,
                "timestamp": link.hints.timestamp,
            }))?;
        }
    }

    Ok(())
}

/// Load the configuration, then apply parameter overrides and the extent.
/// Waits for the resulting prognosis.
async fn prepare(controller: &Arc<JobController>, cli: &Cli) -> Result<()> {
    controller
        .check_api()
        .await
        .map_err(|err| anyhow!(err.alert_text()))?;

    let fragment = cli.config_key.clone().unwrap_or_default();
    let mut prognosis = controller
        .initialize(&fragment)
        .await
        .map_err(|err| anyhow!(err.alert_text()))?;

    for (name, value) in &cli.params {
        prognosis.await?;
        prognosis = controller
            .set_parameter(name, Value::String(value.clone()))
            .await;
    }

    if let Some(raw) = &cli.bbox {
        let bounds = BoundingBox::parse(raw)
            .with_context(|| format!("invalid --bbox '{raw}', expected west,south,east,north"))?;
        prognosis.await?;
        prognosis = controller
            .set_viewport(Viewport::from_bounds(
                bounds,
                controller.settings().default_zoom,
            ))
            .await;
    }

    prognosis.await?;
    Ok(())
}

/// Print events until the run ends, then whatever the poll task sent on its
/// way out.
async fn follow(
    outcome: impl Future<Output = JobOutcome>,
    events: &mut broadcast::Receiver<ControllerEvent>,
    mut on_event: impl FnMut(&ControllerEvent),
) -> JobOutcome {
    tokio::pin!(outcome);

    loop {
        tokio::select! {
            outcome = &mut outcome => {
                loop {
                    match events.try_recv() {
                        Ok(event) => on_event(&event),
                        Err(TryRecvError::Lagged(skipped)) => {
                            warn!(skipped, "event printer fell behind");
                        }
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
                return outcome;
            }
            received = events.recv() => match received {
                Ok(event) => on_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer fell behind");
                }
                Err(RecvError::Closed) => return (&mut outcome).await,
            }
        }
    }
}

fn print_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::Notification(notification) => eprintln!("{}", notification.text),
        other => match serde_json::to_string(other) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!("unprintable event: {err}"),
        },
    }
}

async fn report_outcome(controller: &JobController, outcome: JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Completed { job, results } => {
            info!(job = %job, timesteps = results.timesteps.len(), "model run complete");
            if let Some(link) = controller.deep_link().await {
                println!("link: #{link}");
            }
            Ok(())
        }
        JobOutcome::Failed { job, percent } => {
            bail!("model run {job} failed at {percent}%; see `modeller log {job}`")
        }
        JobOutcome::TimedOut { job, percent, stalled } => {
            let cause = if stalled { "stalled" } else { "ended ambiguously" };
            bail!("model run {job} {cause} at {percent}%; see `modeller log {job}`")
        }
        JobOutcome::PollError { job, message } => {
            bail!("lost track of model run {job}: {message}")
        }
        JobOutcome::Abandoned { job } => bail!("model run {job} was abandoned"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
