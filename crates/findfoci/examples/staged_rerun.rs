use findfoci::{CancelToken, FindFociConfig, FociFinder, ImageStack, SortKey, Stage, StackDims};
use image::ImageReader;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <image.png>", args[0]);
        std::process::exit(2);
    }

    let image = ImageReader::open(&args[1])?.decode()?.to_luma8();
    let (width, height) = image.dimensions();
    let stack = ImageStack::new(
        StackDims::single(width as usize, height as usize),
        image.into_raw(),
    )?;

    let mut finder = FociFinder::new(stack, None)?;
    let cancel = CancelToken::new();

    let mut config = FindFociConfig {
        blur_sigma: 2.0,
        min_size: 4,
        save_results: true,
        ..FindFociConfig::default()
    };

    // Prime the expensive stages once, then finish the run.
    let reached = finder.run_until(Stage::MergeHeight, &config, &cancel)?;
    println!("Primed through {reached:?}.");
    let first = finder.run(&config, &cancel)?;
    println!("First run: {} peaks.", first.len());

    // A sort change only re-runs the result stages.
    config.sort = SortKey::MaxValue;
    config.max_peaks = 10;
    let trimmed = finder.run(&config, &cancel)?;
    println!("Re-sorted by max value, top {} kept.", trimmed.len());

    // A size-filter change rewinds to the merge stages.
    config.min_size = 10;
    let strict = finder.run(&config, &cancel)?;
    println!("min_size 10: {} peaks.", strict.len());

    if let Some(saved) = finder.saved_results() {
        println!("Snapshot holds {} peaks.", saved.len());
    }
    Ok(())
}
