//! DealScope: investor segmentation CLI
//!
//! Loads the deal book, categorizes deals, builds investor features and runs
//! the elbow pass plus the final K-Means, then exports the assignments.

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use dealscope::{logging, report, Args, DealBookCache, Session};
use tracing::info;

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose);

    run(&args)
}

fn run(args: &Args) -> Result<()> {
    let start_time = Instant::now();

    let cache = DealBookCache::new();
    let mut session = Session::new(cache.get_or_load(&args.deals, &args.lenders)?);
    let book = session.book();
    if !book.diagnostics.unmatched_lenders.is_empty() {
        info!(
            lenders = book.diagnostics.unmatched_lenders.len(),
            "Some lenders are missing from the reference table; run with --verbose to list them"
        );
    }

    for (category, count) in session.categorized().deal_counts() {
        info!(category = %category, deals = count, "Deal category");
    }

    let params = args.segmentation_params(session.book().insto_categories())?;
    let cluster_params = args.cluster_params();
    info!(
        categories = params.categories.len(),
        dimensions = ?params.dimensions,
        min_deals = params.min_deals,
        k = cluster_params.k,
        "Running segmentation"
    );

    let segmentation = session.segment(&params, &cluster_params)?;
    println!(
        "✓ {} investors, {} features",
        segmentation.features.len(),
        segmentation.features.n_features()
    );

    report::print_cluster_statistics(&segmentation);
    report::export_assignments_csv(&segmentation, &args.output)?;

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("Cluster assignments saved to: {}", args.output.display());

    Ok(())
}
