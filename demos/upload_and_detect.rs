use anyhow::Result;
use picterra::{Client, RasterUpload};
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    // Set PICTERRA_API_KEY (or write a `.picterrarc`) to authenticate.
    let client = Client::from_env()?;

    // Replace this with the id of one of your detectors.
    let detector_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "d552605b-6972-4a68-8d51-91e6cb531c24".to_string());

    println!("Uploading raster...");
    let raster_id = client.upload_raster(
        Path::new("data/raster1.tif"),
        &RasterUpload::new("a nice raster"),
    )?;
    println!("Upload finished, starting detector...");
    let operation_id = client.run_detector(&detector_id, &raster_id, None)?;
    client.download_result_to_feature_collection(&operation_id, Path::new("result.geojson"))?;
    println!("Detection finished, results are in result.geojson");
    Ok(())
}
