use anyhow::Result;
use sattile::collect::stac::StacCollect;
use sattile::geometric::acquisition::{Acquisition, AcquisitionRequest};
use sattile::geometric::cube::GdalWarpCubeBuilder;
use sattile::LatLon;

/// Example: one Sentinel-2 L2A tile from the Planetary Computer
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Example: Sentinel-2 tile around San Francisco Bay ===\n");

    let request = AcquisitionRequest {
        out_dir: "./output/sr_seg".into(),
        write_all_timesteps: true,
        ..Default::default()
    };
    println!("Collection: {}", request.collection);
    println!("Bands: {:?}", request.bands);
    println!("Dates: {}", request.datetime());
    println!(
        "Tile: {} px at {} m\n",
        request.edge_size_px, request.resolution_m
    );

    let stac = StacCollect::new(None)?;
    let mut acquisition = Acquisition::new(stac, GdalWarpCubeBuilder::default(), request);

    let outputs = acquisition.acquire(0, LatLon::new(40.78, -122.38))?;
    println!("Files written:");
    for path in outputs {
        println!("  - {:?}", path);
    }

    Ok(())
}
