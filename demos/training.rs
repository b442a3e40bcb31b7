use anyhow::{Context, Result};
use picterra::{AnnotationType, Client, DetectorConfig, RasterUpload};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

fn read_geojson(path: &str) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("invalid GeoJSON in {}", path))
}

fn main() -> Result<()> {
    env_logger::init();

    // Training can take a while; give up after two hours.
    let client = Client::from_env()?.with_operation_timeout(Duration::from_secs(2 * 3600));

    let detector_id = client.create_detector(Some("My first detector"), &DetectorConfig::default())?;

    let raster_id = client.upload_raster(
        Path::new("data/raster1.tif"),
        &RasterUpload::new("a nice raster"),
    )?;
    client.add_raster_to_detector(&raster_id, &detector_id)?;

    for (kind, file) in [
        (AnnotationType::Outline, "data/outline.geojson"),
        (AnnotationType::TrainingArea, "data/training_area.geojson"),
        (AnnotationType::ValidationArea, "data/validation_area.geojson"),
    ] {
        client.set_annotations(&detector_id, &raster_id, kind, &read_geojson(file)?, None)?;
    }

    let status = client.train_detector(&detector_id)?;
    println!("Training finished ({}), detector {} is ready", status.status, detector_id);
    Ok(())
}
