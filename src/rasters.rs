//! Rasters and the things attached to them: detection areas, markers and
//! vector layers.

use log::debug;
use reqwest::Method;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

use crate::client::{Client, ensure_file, required_str};
use crate::download::write_json_file;
use crate::error::{Error, Result};
use crate::models::{RasterEdit, RasterFilter, RasterUpload, UploadSlot, multipolygon_to_feature_collection, page_query};
use crate::pagination::ResultsPage;

impl Client {
    /// Uploads a raster and waits until the platform has processed it.
    ///
    /// Returns the id of the new raster. Nothing is committed if the file
    /// transfer fails.
    pub fn upload_raster(&self, path: &Path, meta: &RasterUpload) -> Result<String> {
        ensure_file(path)?;
        let body = serde_json::to_value(meta).map_err(|e| Error::Validation {
            message: e.to_string(),
            fields: None,
        })?;
        let slot: UploadSlot = self.post_json("rasters/upload/file/", Some(body))?;
        let raster_id = slot.raster_id.clone().ok_or_else(|| {
            Error::unexpected(&self.endpoint("rasters/upload/file/"), "missing raster_id")
        })?;
        self.upload_file(&slot, path)?;
        self.run_operation(&format!("rasters/{}/commit/", raster_id), None)?;
        Ok(raster_id)
    }

    /// Lists rasters, see [`ResultsPage`] for the pagination access pattern.
    pub fn list_rasters(&self, filter: &RasterFilter) -> Result<ResultsPage> {
        self.list("rasters/", &filter.query())
    }

    pub fn get_raster(&self, raster_id: &str) -> Result<Value> {
        self.get_json(&format!("rasters/{}/", raster_id))
    }

    pub fn edit_raster(&self, raster_id: &str, edit: &RasterEdit) -> Result<()> {
        let body = serde_json::to_value(edit).map_err(|e| Error::Validation {
            message: e.to_string(),
            fields: None,
        })?;
        self.put(&format!("rasters/{}/", raster_id), body)?;
        Ok(())
    }

    pub fn delete_raster(&self, raster_id: &str) -> Result<()> {
        self.delete(&format!("rasters/{}/", raster_id))
    }

    pub fn download_raster_to_file(&self, raster_id: &str, target: &Path) -> Result<PathBuf> {
        let path = format!("rasters/{}/download/", raster_id);
        let resp: Value = self.get_json(&path)?;
        let url = required_str(Some(&resp), "/download_url", &self.endpoint(&path))?;
        debug!("Trying to download raster {} from {}..", raster_id, url);
        self.download_url(&url, target)
    }

    /// Replaces the detection areas of a raster with the polygons of a GeoJSON
    /// FeatureCollection file.
    pub fn set_raster_detection_areas_from_file(&self, raster_id: &str, path: &Path) -> Result<()> {
        ensure_file(path)?;
        let slot: UploadSlot =
            self.post_json(&format!("rasters/{}/detection_areas/upload/file/", raster_id), None)?;
        let upload_id = upload_id(&slot, &self.endpoint("rasters/"))?;
        self.upload_file(&slot, path)?;
        self.run_operation(
            &format!("rasters/{}/detection_areas/upload/{}/commit/", raster_id, upload_id),
            None,
        )?;
        Ok(())
    }

    pub fn remove_raster_detection_areas(&self, raster_id: &str) -> Result<()> {
        self.delete(&format!("rasters/{}/detection_areas/", raster_id))
    }

    /// Imports a raster from a remote imagery source over the area of interest
    /// described by a GeoJSON file. Returns the new raster id.
    pub fn import_raster_from_remote_source(
        &self,
        raster_name: &str,
        folder_id: &str,
        source_id: &str,
        aoi_path: &Path,
    ) -> Result<String> {
        ensure_file(aoi_path)?;
        let slot: UploadSlot = self.post_json("rasters/import/", None)?;
        let upload_id = upload_id(&slot, &self.endpoint("rasters/import/"))?;
        self.upload_file(&slot, aoi_path)?;
        let commit = format!("rasters/import/{}/commit/", upload_id);
        let (_, status) = self.run_operation(
            &commit,
            Some(json!({
                "method": "streaming",
                "source_id": source_id,
                "folder_id": folder_id,
                "name": raster_name,
            })),
        )?;
        required_str(status.metadata.as_ref(), "/raster_id", &self.endpoint(&commit))
    }

    pub fn list_raster_markers(&self, raster_id: &str, page_number: Option<u32>) -> Result<ResultsPage> {
        self.list(&format!("rasters/{}/markers/", raster_id), &page_query(page_number))
    }

    /// Creates a point marker on a raster, or on a detector's training raster
    /// when `detector_id` is given.
    pub fn create_marker(
        &self,
        raster_id: &str,
        detector_id: Option<&str>,
        lng: f64,
        lat: f64,
        text: &str,
    ) -> Result<Value> {
        let path = match detector_id {
            None => format!("rasters/{}/markers/", raster_id),
            Some(d) => format!("detectors/{}/training_rasters/{}/markers/", d, raster_id),
        };
        self.post_json(
            &path,
            Some(json!({
                "marker": {"type": "Point", "coordinates": [lng, lat]},
                "text": text,
            })),
        )
    }

    pub fn list_raster_vector_layers(
        &self,
        raster_id: &str,
        search: Option<&str>,
        detector_id: Option<&str>,
        page_number: Option<u32>,
    ) -> Result<ResultsPage> {
        let mut query = Vec::new();
        if let Some(s) = search {
            query.push(("search", s.to_string()));
        }
        if let Some(d) = detector_id {
            query.push(("detector", d.to_string()));
        }
        query.extend(page_query(page_number));
        self.list(&format!("rasters/{}/vector_layers/", raster_id), &query)
    }

    /// Uploads a GeoJSON file as a vector layer of a raster and returns its id.
    pub fn upload_vector_layer(
        &self,
        raster_id: &str,
        path: &Path,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<String> {
        ensure_file(path)?;
        let slot: UploadSlot = self.post_json(&format!("vector_layers/{}/upload/", raster_id), None)?;
        let upload_id = upload_id(&slot, &self.endpoint("vector_layers/"))?;
        self.upload_file(&slot, path)?;

        let mut body = Map::new();
        if let Some(name) = name {
            body.insert("name".into(), name.into());
        }
        if let Some(color) = color {
            body.insert("color".into(), color.into());
        }
        let commit = format!("vector_layers/{}/upload/{}/commit/", raster_id, upload_id);
        let (_, status) = self.run_operation(&commit, Some(Value::Object(body)))?;
        required_str(status.results.as_ref(), "/vector_layer_id", &self.endpoint(&commit))
    }

    pub fn edit_vector_layer(
        &self,
        vector_layer_id: &str,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<()> {
        let mut body = Map::new();
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            body.insert("name".into(), name.into());
        }
        if let Some(color) = color {
            body.insert("color".into(), color.into());
        }
        self.put(&format!("vector_layers/{}/", vector_layer_id), Value::Object(body))?;
        Ok(())
    }

    pub fn delete_vector_layer(&self, vector_layer_id: &str) -> Result<()> {
        self.delete(&format!("vector_layers/{}/", vector_layer_id))
    }

    /// Exports a vector layer and saves it as a FeatureCollection of polygons.
    pub fn download_vector_layer_to_file(&self, vector_layer_id: &str, target: &Path) -> Result<PathBuf> {
        let path = format!("vector_layers/{}/download/", vector_layer_id);
        let (_, status) = self.run_operation(&path, None)?;
        let url = required_str(status.results.as_ref(), "/download_url", &self.endpoint(&path))?;
        let multipolygon = self.fetch_json(&url)?;
        write_json_file(&multipolygon_to_feature_collection(&multipolygon)?, target)
    }

    /// Associates a raster with a detector as training data.
    pub fn add_raster_to_detector(&self, raster_id: &str, detector_id: &str) -> Result<()> {
        self.call_expecting(
            Method::POST,
            &format!("detectors/{}/training_rasters/", detector_id),
            Some(json!({ "raster_id": raster_id })),
            201,
        )?;
        Ok(())
    }
}

fn upload_id(slot: &UploadSlot, url: &str) -> Result<String> {
    slot.upload_id
        .clone()
        .ok_or_else(|| Error::unexpected(url, "missing upload_id"))
}
