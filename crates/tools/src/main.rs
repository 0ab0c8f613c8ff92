use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use foundation::{BBox, Position};
use serde::Serialize;
use streaming::{ChunkCacheConfig, RegionCache, RegionCacheRegistry, ViewportLoad};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect ZCTA boundary chunk manifests")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the owner-region neighbor graph derived from chunk bboxes
    Neighbors {
        /// Manifest JSON file
        manifest: PathBuf,
    },

    /// Load the chunks a viewport needs and list them
    Viewport {
        /// Manifest JSON file
        manifest: PathBuf,

        /// Bounding box: minLng,minLat,maxLng,maxLat
        #[arg(long)]
        bbox: String,

        /// Padding in degrees (default: ZCTA_VIEWPORT_PADDING_DEG or 0.25)
        #[arg(long)]
        padding: Option<f64>,
    },

    /// Load chunks and print bounds and centroid per sub-area
    Centroids {
        /// Manifest JSON file
        manifest: PathBuf,

        /// Chunk ids to load
        #[arg(required = true)]
        chunk_ids: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AreaReport {
    owner_region_id: Option<String>,
    owner_region_name: Option<String>,
    bounds: Option<BBox>,
    centroid: Option<Position>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = real_main(Args::parse()).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn real_main(args: Args) -> Result<(), String> {
    let registry = RegionCacheRegistry::new(ChunkCacheConfig::from_env());

    match args.command {
        Command::Neighbors { manifest } => {
            let cache = open_region(&registry, &manifest).await?;
            print_json(cache.neighbors_by_owner_region())
        }
        Command::Viewport {
            manifest,
            bbox,
            padding,
        } => {
            let bounds = parse_bbox(&bbox)?;
            let cache = open_region(&registry, &manifest).await?;
            let padding = padding.unwrap_or(registry.config().viewport_padding_deg);
            match cache
                .ensure_chunks_for_viewport(bounds, padding)
                .await
                .map_err(|e| e.to_string())?
            {
                ViewportLoad::Current { chunks, .. } => {
                    info!("{} chunks resident: {:?}", chunks.len(), cache.stats());
                    print_json(&chunks)
                }
                ViewportLoad::Superseded { generation } => {
                    Err(format!("viewport request {generation} was superseded"))
                }
            }
        }
        Command::Centroids {
            manifest,
            chunk_ids,
        } => {
            let cache = open_region(&registry, &manifest).await?;
            cache
                .ensure_chunks_loaded(&chunk_ids[..])
                .await
                .map_err(|e| e.to_string())?;
            print_json(&area_reports(&cache, &chunk_ids))
        }
    }
}

async fn open_region(
    registry: &RegionCacheRegistry,
    manifest: &Path,
) -> Result<RegionCache, String> {
    let code = registry
        .register_file(manifest)
        .await
        .map_err(|e| e.to_string())?;
    registry
        .region(&code)
        .ok_or_else(|| format!("region {code} was not registered"))
}

fn area_reports(
    cache: &RegionCache,
    chunk_ids: &[String],
) -> BTreeMap<String, BTreeMap<String, AreaReport>> {
    chunk_ids
        .iter()
        .map(|chunk_id| {
            let areas = cache
                .area_keys_for_chunk(chunk_id)
                .into_iter()
                .map(|key| {
                    let report = AreaReport {
                        owner_region_id: cache.owner_region_id(&key),
                        owner_region_name: cache.owner_region_name(&key),
                        bounds: cache.bounds(&key),
                        centroid: cache.centroid(&key),
                    };
                    (key, report)
                })
                .collect();
            (chunk_id.clone(), areas)
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{out}");
    Ok(())
}

fn parse_bbox(bbox: &str) -> Result<BBox, String> {
    let parts: Vec<_> = bbox.split(',').collect();
    if parts.len() != 4 {
        return Err("bbox must be minLng,minLat,maxLng,maxLat".to_string());
    }
    let mut vals = [0.0f64; 4];
    for (slot, part) in vals.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|e| format!("bad bbox value {part:?}: {e}"))?;
    }
    let [min_lng, min_lat, max_lng, max_lat] = vals;
    if min_lng > max_lng || min_lat > max_lat {
        return Err("bbox min must not exceed max".to_string());
    }
    Ok(BBox::new([min_lng, min_lat], [max_lng, max_lat]))
}

#[cfg(test)]
mod tests {
    use super::{Args, parse_bbox};
    use clap::Parser;
    use foundation::BBox;

    #[test]
    fn parses_bbox_argument() {
        assert_eq!(
            parse_bbox("-88.5, 41.5,-87.5,42.5").unwrap(),
            BBox::new([-88.5, 41.5], [-87.5, 42.5])
        );
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("1,2,x,4").is_err());
        assert!(parse_bbox("3,0,1,1").is_err());
    }

    #[test]
    fn centroids_requires_chunk_ids() {
        assert!(Args::try_parse_from(["zcta", "centroids", "m.json"]).is_err());
        assert!(Args::try_parse_from(["zcta", "centroids", "m.json", "a", "b"]).is_ok());
        assert!(
            Args::try_parse_from([
                "zcta", "viewport", "m.json", "--bbox", "0,0,1,1", "--padding", "0.5",
            ])
            .is_ok()
        );
    }
}
