// Command-line runner for the `chroma_lock` library.
//
// Usage: chroma_lock <config.yaml> <frames.yuv> [output_dir]
//
// Reads a file of raw frames laid out back to back, starts locking right away and
// feeds every frame through the pipeline. State changes are logged and every
// before/after composite is written to the output directory as a PNG.

use anyhow::{Context, Result, bail};
use chroma_lock::config::PipelineConfig;
use chroma_lock::core_modules::pixel::FrameLayout;
use chroma_lock::core_modules::utils::image_helper;
use chroma_lock::messenger::{ChannelMessenger, Notification};
use chroma_lock::pipeline::VisionPipeline;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chroma_lock=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(frames_path)) = (args.next(), args.next()) else {
        bail!("usage: chroma_lock <config.yaml> <frames.yuv> [output_dir]");
    };

    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;
    let output_dir = args
        .next()
        .map(PathBuf::from)
        .or_else(|| config.diagnostics_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let frames = std::fs::read(&frames_path).with_context(|| format!("reading {frames_path}"))?;

    let (messenger, receiver) = ChannelMessenger::new();
    let pipeline = VisionPipeline::new(config, messenger).context("building the pipeline")?;
    let layout = pipeline.layout();
    info!(
        "✓ Pipeline ready: {}x{} {}, {} bytes per frame",
        layout.width,
        layout.height,
        layout.format.as_str(),
        layout.frame_size()
    );

    let consumer = tokio::spawn(consume_notifications(receiver, layout, output_dir));

    let processed = tokio::task::spawn_blocking(move || -> Result<usize> {
        let frame_size = layout.frame_size();
        if frames.len() % frame_size != 0 {
            warn!(
                trailing = frames.len() % frame_size,
                "input ends with a partial frame, ignoring it"
            );
        }

        pipeline.settings_handle().start_locking();
        let mut processed = 0;
        for (index, frame) in frames.chunks_exact(frame_size).enumerate() {
            let output = pipeline
                .process_frame(frame)
                .with_context(|| format!("processing frame {index}"))?;
            debug!(index, state = output.state.as_str(), detection = ?output.detection, "frame done");
            processed += 1;
        }
        Ok(processed)
    })
    .await??;

    let composites = consumer.await?;
    info!(processed, composites, "✓ Finished");
    Ok(())
}

/// Logs notifications and writes composites. Returns how many composites were saved.
async fn consume_notifications(
    mut receiver: UnboundedReceiver<Notification>,
    layout: FrameLayout,
    output_dir: PathBuf,
) -> usize {
    let mut composites = 0;
    while let Some(notification) = receiver.recv().await {
        match notification {
            Notification::State(state) => info!("state -> {}", state.as_str()),
            Notification::LockedRect {
                center_x,
                center_y,
                width,
                height,
            } => info!(center_x, center_y, width, height, "target locked"),
            Notification::OperationDuration(milliseconds) => {
                debug!(milliseconds, "average operation time")
            }
            Notification::FrameCaptured {
                frame, request_id, ..
            } => {
                let path = output_dir.join(format!("capture_{request_id}.png"));
                save(&path, &frame, &layout);
            }
            Notification::PostProcessComplete {
                merged, from, to, ..
            } => {
                info!(
                    from_x = from.center_x,
                    from_y = from.center_y,
                    to_x = to.center_x,
                    to_y = to.center_y,
                    "event composite ready"
                );
                let path = output_dir.join(format!("event_{composites:03}.png"));
                if save(&path, &merged, &layout) {
                    composites += 1;
                }
            }
            Notification::SavedFrame {
                frame,
                sequence,
                series_id,
                ..
            } => {
                let path = output_dir.join(format!("series_{series_id:08x}_{sequence:03}.png"));
                save(&path, &frame, &layout);
            }
        }
    }
    composites
}

fn save(path: &Path, frame: &[u8], layout: &FrameLayout) -> bool {
    match image_helper::save_png(path, frame, layout) {
        Ok(()) => {
            info!("✓ Saved {}", path.display());
            true
        }
        Err(err) => {
            warn!("could not save {}: {err}", path.display());
            false
        }
    }
}
