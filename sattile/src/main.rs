use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use sattile::collect::planet::{
    create_filters, create_order_request, LogicalFilter, PlanetCollect,
};
use sattile::collect::stac::StacCollect;
use sattile::commons::batch::BatchReport;
use sattile::config::BatchConfig;
use sattile::geometric::acquisition::Acquisition;
use sattile::geometric::cube::GdalWarpCubeBuilder;
use sattile::geometric::groundtruth::{rasterize_groundtruth, FeatureClass};
use sattile::geometric::vector_store::load_points;
use sattile::{compute_tile, LatLon, Projector};

#[derive(Parser, Debug)]
#[command(name = "sattile", version, about = "Satellite tiles and ground-truth masks around sample points")]
struct Cli {
    /// JSON batch configuration; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tile footprint around a point
    Tile {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        edge_size: Option<u32>,
        #[arg(long)]
        resolution: Option<f64>,
    },

    /// Download one image cube per sample point
    Acquire {
        /// Centroid dataset (GeoJSON or any OGR vector file)
        #[arg(long, conflicts_with_all = ["lat", "lon"])]
        points: Option<PathBuf>,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        stac_url: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        /// Also write one GeoTIFF per acquisition date
        #[arg(long)]
        all_timesteps: bool,
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Rasterize buildings or roads against acquired tiles
    Rasterize {
        /// Directory holding bbox_NNNNN.geojson files
        #[arg(long)]
        bbox_dir: PathBuf,
        #[arg(long, value_enum)]
        class: FeatureClass,
        /// Vector dataset of the class
        #[arg(long)]
        vector: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        supersampling: Option<u32>,
        #[arg(long)]
        buffer: Option<f64>,
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Search the Planet Data API
    PlanetSearch {
        /// Coordinate array as JSON, or a file containing it
        #[arg(long)]
        geometry: String,
        #[arg(long, default_value = "PSScene")]
        item_type: String,
        #[arg(long)]
        start_date: String,
        #[arg(long)]
        end_date: String,
        /// Maximum cloud cover fraction
        #[arg(long, default_value = "0.1")]
        cloud_cover: f64,
        #[arg(long, default_value = "ortho_analytic_4b_sr")]
        asset: String,
        /// Falls back to PL_API_KEY
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Build (and optionally submit) a Planet order request
    PlanetOrderRequest {
        /// JSON file with the items returned by planet-search
        #[arg(long)]
        items: PathBuf,
        #[arg(long)]
        geometry: String,
        #[arg(long, default_value = "PSScene")]
        item_type: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "analytic_sr_udm2")]
        bundle: String,
        #[arg(long)]
        submit: bool,
        #[arg(long)]
        api_key: Option<String>,
    },
}

fn read_geometry_arg(geometry: &str) -> Result<String> {
    let path = Path::new(geometry);
    if path.is_file() {
        std::fs::read_to_string(path).context(format!("Failed to read geometry file: {:?}", path))
    } else {
        Ok(geometry.to_string())
    }
}

fn api_key(flag: Option<String>) -> Result<String> {
    flag.or_else(|| std::env::var("PL_API_KEY").ok())
        .context("Planet API key missing: pass --api-key or set PL_API_KEY")
}

fn finish_report(report: &BatchReport, path: Option<&Path>) -> Result<()> {
    log::info!("{}", report.summary());
    if let Some(path) = path {
        report.write_json(path)?;
        log::info!("Report written to {:?}", path);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => BatchConfig::from_file(path)?,
        None => BatchConfig::default(),
    };

    match cli.command {
        Command::Tile {
            lat,
            lon,
            edge_size,
            resolution,
        } => {
            let mut projector = Projector::new();
            let tile = compute_tile(
                &mut projector,
                LatLon::new(lat, lon),
                edge_size.unwrap_or(config.edge_size_px),
                resolution.unwrap_or(config.resolution_m),
            )?;
            let output = json!({
                "epsg": tile.epsg,
                "center_utm": [tile.center_utm.0, tile.center_utm.1],
                "center_rounded": [tile.center_rounded.0, tile.center_rounded.1],
                "bbox_utm": tile.bbox_utm.to_array(),
                "bbox_latlon": tile.latlon_geometry(),
                "size_px": [tile.size_px().0, tile.size_px().1],
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Acquire {
            points,
            lat,
            lon,
            out_dir,
            stac_url,
            start_date,
            end_date,
            all_timesteps,
            report,
        } => {
            if let Some(dir) = out_dir {
                config.out_dir = dir;
            }
            if let Some(url) = stac_url {
                config.stac_url = url;
            }
            if let Some(date) = start_date {
                config.start_date = date;
            }
            if let Some(date) = end_date {
                config.end_date = date;
            }
            config.write_all_timesteps |= all_timesteps;
            config.report = report.or(config.report);
            config.validate()?;

            let points = match (points, lat, lon) {
                (Some(path), _, _) => load_points(&path)?,
                (None, Some(lat), Some(lon)) => vec![Some(LatLon::new(lat, lon))],
                _ => anyhow::bail!("Pass --points or both --lat and --lon"),
            };
            log::info!("Acquiring {} tiles into {:?}", points.len(), config.out_dir);

            let mut stac = StacCollect::new(Some(config.stac_url.clone()))?;
            stac.max_items = config.max_items;

            let mut acquisition = Acquisition::new(
                stac,
                GdalWarpCubeBuilder::default(),
                config.acquisition_request(),
            );
            let report = acquisition.run_batch(&points);
            finish_report(&report, config.report.as_deref())?;
        }

        Command::Rasterize {
            bbox_dir,
            class,
            vector,
            out_dir,
            supersampling,
            buffer,
            report,
        } => {
            if let Some(dir) = out_dir {
                config.out_dir = dir;
            }
            if let Some(ratio) = supersampling {
                config.supersampling = ratio;
            }
            if let Some(distance) = buffer {
                config.buffer_m = distance;
            }
            config.report = report.or(config.report);
            config.validate()?;

            let report = rasterize_groundtruth(
                &bbox_dir,
                class,
                &vector,
                &config.out_dir,
                config.groundtruth_options(),
            )?;
            finish_report(&report, config.report.as_deref())?;
        }

        Command::PlanetSearch {
            geometry,
            item_type,
            start_date,
            end_date,
            cloud_cover,
            asset,
            api_key: key,
        } => {
            let geometry = read_geometry_arg(&geometry)?;
            let filter = create_filters(
                &geometry,
                &start_date,
                &end_date,
                cloud_cover,
                LogicalFilter::And,
            )?;
            let planet = PlanetCollect::new(api_key(key)?)?;
            let items = planet.quick_search(&item_type, &filter, &asset)?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }

        Command::PlanetOrderRequest {
            items,
            geometry,
            item_type,
            name,
            bundle,
            submit,
            api_key: key,
        } => {
            let text = std::fs::read_to_string(&items)
                .context(format!("Failed to read items file: {:?}", items))?;
            let parsed: Value = serde_json::from_str(&text).context("Failed to parse items file")?;
            let items: Vec<Value> = match parsed {
                Value::Array(list) => list,
                Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
                _ => anyhow::bail!("Items file must hold a JSON array or object"),
            };

            let geometry = read_geometry_arg(&geometry)?;
            let request = create_order_request(&item_type, &items, &geometry, &name, &bundle)?;

            if submit {
                let planet = PlanetCollect::new(api_key(key)?)?;
                let order_id = planet.create_order(&request)?;
                println!("{}", order_id);
            } else {
                println!("{}", serde_json::to_string_pretty(&request)?);
            }
        }
    }

    Ok(())
}
