use clap::Parser;
use env_logger::Env;
use log::info;

use s2_cloud_composite::cli::Args;
use s2_cloud_composite::pipeline::{self, RunOutputs};
use s2_cloud_composite::Result;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Sentinel-2 Cloud-Masked Composite ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    let config = args.run_config()?;
    info!(
        "Collection {}: {} to {} (exclusive), cloud < {}%",
        config.dataset, config.start_date, config.end_date, config.max_cloudy_pixel_percentage
    );

    let outputs = RunOutputs {
        composite: args.output.clone(),
        quicklook: args.quicklook.clone(),
        indices: args.indices.clone(),
        classes: args.classes.clone(),
        map_json: args.map_json.clone(),
    };

    let summary = pipeline::run(&config, &args.scenes, &outputs)?;

    info!(
        "Composited {} of {} scene(s) into {}x{} pixels ({:.1}% of ROI valid)",
        summary.scenes_used.len(),
        summary.scenes_found,
        summary.width,
        summary.height,
        summary.valid_fraction * 100.0
    );
    info!("Wrote output: {}", outputs.composite.display());

    info!("=== Done! ===");
    Ok(())
}
