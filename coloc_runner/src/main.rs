use anyhow::{Context, bail};
use coloc_vision::batch_pipeline::{BatchJob, BatchPipeline};
use coloc_vision::pipeline::{ChannelInput, ColocConfig, FrameReport};
use coloc_vision::{FloatImage, open_intensity_image, open_label_image, regions_from_labels};
use futures::StreamExt;
use log::{error, info};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Batch description read from the manifest file.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    config: ColocConfig,
    images: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    source: String,
    #[serde(default)]
    frame: usize,
    channels: Vec<ChannelEntry>,
}

/// A raw intensity image and the label image segmented from it.
#[derive(Debug, Deserialize)]
struct ChannelEntry {
    intensity: PathBuf,
    labels: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: coloc_runner <manifest.json> [output.json]");
        return Ok(());
    }
    let manifest_path = Path::new(&args[1]);
    let output_path = args.get(2).map(PathBuf::from);

    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    // --- 2. Manifest & Image Loading ---
    let manifest_text = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("reading manifest {}", manifest_path.display()))?;
    let manifest: Manifest = serde_json::from_str(&manifest_text)
        .with_context(|| format!("parsing manifest {}", manifest_path.display()))?;
    let base_dir = manifest_path.parent().unwrap_or(Path::new("."));

    let jobs = manifest
        .images
        .iter()
        .map(|entry| load_job(base_dir, entry))
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!("loaded {} images from {}", jobs.len(), manifest_path.display());

    // --- 3. Batch Processing ---
    let batch: BatchPipeline<FloatImage> = BatchPipeline::spawn(manifest.config)?;
    let cancel = batch.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing the current image");
            cancel.cancel();
        }
    });

    let mut reports: Vec<FrameReport> = Vec::with_capacity(jobs.len());
    let mut failures = 0usize;
    let mut results = batch.run_all(jobs);
    while let Some(result) = results.next().await {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!("{}", e);
                failures += 1;
            }
        }
    }
    batch.shutdown().await;

    // --- 4. Report Output ---
    let json = serde_json::to_string_pretty(&reports)?;
    match output_path {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {} reports to {}", reports.len(), path.display());
        }
        None => println!("{}", json),
    }

    if failures > 0 {
        bail!("{} of {} images failed", failures, failures + reports.len());
    }
    Ok(())
}

fn load_job(base_dir: &Path, entry: &ImageEntry) -> anyhow::Result<BatchJob<FloatImage>> {
    let channels = entry
        .channels
        .iter()
        .map(|channel| {
            let intensity_path = base_dir.join(&channel.intensity);
            let labels_path = base_dir.join(&channel.labels);
            let intensity = open_intensity_image(&intensity_path)
                .with_context(|| format!("opening {}", intensity_path.display()))?;
            let labels = open_label_image(&labels_path)
                .with_context(|| format!("opening {}", labels_path.display()))?;
            Ok(ChannelInput::new(regions_from_labels(&labels), intensity))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(BatchJob {
        source: entry.source.clone(),
        frame: entry.frame,
        channels,
    })
}
