use findfoci::{find_foci, FindFociConfig, ImageStack, StackDims};
use image::ImageReader;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <image.png> [out.json]", args[0]);
        std::process::exit(2);
    }

    let image = ImageReader::open(&args[1])?.decode()?.to_luma8();
    let (width, height) = image.dimensions();
    let stack = ImageStack::new(
        StackDims::single(width as usize, height as usize),
        image.into_raw(),
    )?;

    let config = FindFociConfig {
        blur_sigma: 2.0,
        min_size: 4,
        ..FindFociConfig::default()
    };
    let output = find_foci(&stack, None, &config)?;

    println!(
        "Found {} peaks (background {:.2}).",
        output.len(),
        output.stats.background
    );
    for peak in output.results.iter().take(5) {
        println!(
            "  #{} at ({}, {}): max {:.1} over {} voxels, total {:.1}",
            peak.id, peak.x, peak.y, peak.max_value, peak.count, peak.total_intensity
        );
    }

    if let Some(out_path) = args.get(2) {
        let json = serde_json::to_string_pretty(&output)?;
        std::fs::write(out_path, json)?;
        println!("Wrote {out_path}");
    }
    Ok(())
}
