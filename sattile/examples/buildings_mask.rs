use anyhow::Result;
use sattile::geometric::groundtruth::{rasterize_groundtruth, FeatureClass, GroundTruthOptions};
use std::path::Path;

/// Example: building masks for tiles acquired with `sentinel2_tile`
///
/// Expects `./output/sr_seg/{geojson,input}` and a building footprint file.
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let root = Path::new("./output/sr_seg");
    let buildings = Path::new("./data/buildings.geojson");

    println!("=== Example: rasterizing buildings at 2.5 m ===\n");
    let options = GroundTruthOptions::default();
    println!("Supersampling: x{}", options.supersampling);
    println!("Feature buffer: {} m\n", options.buffer_m);

    let report = rasterize_groundtruth(
        &root.join("geojson"),
        FeatureClass::Buildings,
        buildings,
        root,
        options,
    )?;

    println!("{}", report.summary());
    report.write_json(&root.join("buildings_report.json"))?;

    Ok(())
}
