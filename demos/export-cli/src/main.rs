//! Command-line export driver.
//!
//! Run with:
//! `cargo run -p export-cli -- poses.json --fps 25 --host 192.168.1.10`
//!
//! `poses.json` is a JSON array of six-angle rig rows, one per frame.
//! Ctrl-C stops the export gracefully.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use binder_core::{BinderConfig, ExportEvent, ExportParams, TimeRange};
use binder_motion::{RecordedPoses, build_trajectory, validate};
use binder_robot::{TcpConnector, urscript};
use binder_session::{ExportController, ExportError};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: binder-export <poses.json> --fps <N> [--rate <N>] [--loop] [--ack] \
[--host <HOST>] [--config <PATH>] [--script <OUT>] [--dry-run]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    poses: PathBuf,
    fps: f64,
    sample_rate: Option<f64>,
    looped: bool,
    acknowledge: bool,
    host: Option<String>,
    config: Option<PathBuf>,
    script: Option<PathBuf>,
    dry_run: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut poses = None;
    let mut fps = None;

    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().with_context(|| format!("{name} needs a value"));
        match arg.as_str() {
            "--fps" => fps = Some(value("--fps")?.parse().context("--fps")?),
            "--rate" => parsed.sample_rate = Some(value("--rate")?.parse().context("--rate")?),
            "--loop" => parsed.looped = true,
            "--ack" => parsed.acknowledge = true,
            "--host" => parsed.host = Some(value("--host")?),
            "--config" => parsed.config = Some(value("--config")?.into()),
            "--script" => parsed.script = Some(value("--script")?.into()),
            "--dry-run" => parsed.dry_run = true,
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with("--") => bail!("unknown option {other}\n{USAGE}"),
            other => {
                if poses.replace(PathBuf::from(other)).is_some() {
                    bail!("more than one pose file\n{USAGE}");
                }
            }
        }
    }

    parsed.poses = poses.with_context(|| format!("missing pose file\n{USAGE}"))?;
    parsed.fps = fps.with_context(|| format!("missing --fps\n{USAGE}"))?;
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let mut config = match &args.config {
        Some(path) => BinderConfig::load_from(path)?,
        None => BinderConfig::load()?,
    };
    if let Some(host) = &args.host {
        config.robot.host = Some(host.clone());
    }

    let recording = RecordedPoses::load(&args.poses, args.fps)
        .with_context(|| format!("reading {}", args.poses.display()))?;
    let mut params = ExportParams::new(
        TimeRange::new(0.0, recording.duration()),
        args.sample_rate.unwrap_or(args.fps),
    )
    .with_robot(config.robot)
    .with_loop(args.looped);
    params.acknowledge_loop_warning = args.acknowledge;

    if args.dry_run || args.script.is_some() {
        let robot = &params.robot;
        let trajectory = build_trajectory(
            &recording,
            params.range,
            params.sample_rate,
            robot.controller_rate,
            robot.corrections,
        )?;
        let report = validate(&trajectory, &robot.limits, params.looped);
        println!("{} frames at {} Hz: {report}", trajectory.len(), trajectory.sample_rate());

        if let Some(path) = &args.script {
            let program = urscript::render_program(&trajectory, params.looped, &robot.stream);
            std::fs::write(path, urscript::clean_script(&program))
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        if args.dry_run {
            return Ok(());
        }
    }

    let connector = TcpConnector::new(params.robot.stream.connect_timeout());
    let controller = Arc::new(ExportController::new(connector));

    let mut progress = controller.events().until_finished();
    let printer = tokio::spawn(async move {
        while let Some(event) = progress.next().await {
            match event {
                ExportEvent::FrameSent { .. } => {}
                ExportEvent::FramesSkipped { from_frame, to_frame } => {
                    println!("behind schedule: skipped frames {from_frame}..{to_frame}");
                }
                other => tracing::info!(?other, "Export event"),
            }
        }
    });

    {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping robot");
                controller.stop();
            }
        });
    }

    let result = controller.run_export(&params, &recording).await;
    printer.abort();

    match result {
        Ok(outcome) => {
            let summary = outcome.summary;
            println!(
                "Export {} {:?}: {} frames sent, {} skipped, {} cycles",
                outcome.export_id,
                summary.termination,
                summary.frames_sent,
                summary.frames_skipped,
                summary.cycles_completed
            );
            Ok(())
        }
        Err(ExportError::ValidationWarning(report)) => {
            bail!("{report}\nloop seam exceeds limits; rerun with --ack to stream anyway")
        }
        Err(e) => Err(e.into()),
    }
}
