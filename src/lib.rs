//! A small Rust client for the Picterra detector platform API.
//!
//! The platform runs detection models, trainings and geospatial processing
//! server-side; this crate wraps the HTTP calls around them:
//! upload a raster, trigger an operation, poll until it completes, then
//! download the results. Listings come back one [`ResultsPage`] at a time.
//!
//! ## Quick start
//! - Configure authentication via environment variables (`PICTERRA_API_KEY`,
//!   optionally `PICTERRA_BASE_URL`) or a `.picterrarc` file (in the current
//!   directory or in your home directory).
//! - Upload a raster, run a detector on it and save the detections.
//!
//! ```no_run
//! use picterra::{Client, RasterUpload};
//! use std::path::Path;
//!
//! fn main() -> picterra::Result<()> {
//!     let client = Client::from_env()?;
//!     let raster_id =
//!         client.upload_raster(Path::new("data/raster1.tif"), &RasterUpload::new("a nice raster"))?;
//!     let operation_id = client.run_detector("<detector id>", &raster_id, None)?;
//!     client.download_result_to_feature_collection(&operation_id, Path::new("result.geojson"))?;
//!     Ok(())
//! }
//! ```
//!
//! Operations are polled at the interval suggested by the server unless
//! [`Client::with_poll_interval`] says otherwise; [`Client::with_operation_timeout`]
//! bounds the wait and turns an endless operation into [`Error::Timeout`].

#![forbid(unsafe_code)]

mod client;
mod config;
mod detectors;
mod download;
mod error;
mod models;
mod operation;
mod pagination;
mod rasters;
pub mod transport;
mod util;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{
    AnnotationType, Backbone, DetectionType, DetectorConfig, DetectorEdit, DetectorFilter, Feature,
    FeatureCollection, OutputType, PixelPolygon, RasterEdit, RasterFilter, RasterUpload,
    RemoteFile, multipolygon_to_feature_collection, nongeo_result_to_pixel,
};
pub use operation::{Operation, OperationStatus, OperationStatusResponse, PollPolicy};
pub use pagination::{Pages, ResultsPage};
pub use transport::{HttpTransport, Transport};
