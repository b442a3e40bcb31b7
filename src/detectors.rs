use log::debug;
use reqwest::Method;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

use crate::client::{Client, required_str};
use crate::download::write_json_file;
use crate::error::{Error, Result};
use crate::models::{
    AnnotationType, Created, DetectorBody, DetectorConfig, DetectorEdit, DetectorFilter, Feature,
    FeatureCollection, UploadSlot, page_query,
};
use crate::operation::OperationStatusResponse;
use crate::pagination::ResultsPage;

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Validation {
        message: e.to_string(),
        fields: None,
    })
}

impl Client {
    /// Creates a detector and returns its id.
    pub fn create_detector(&self, name: Option<&str>, config: &DetectorConfig) -> Result<String> {
        let body = to_body(&DetectorBody {
            name: name.filter(|n| !n.is_empty()),
            configuration: config,
        })?;
        let resp = self.call_expecting(Method::POST, "detectors/", Some(body), 201)?;
        let created: Created = serde_json::from_str(&resp.body).map_err(|e| {
            Error::unexpected(&self.endpoint("detectors/"), format!("invalid body: {}", e))
        })?;
        Ok(created.id)
    }

    pub fn get_detector(&self, detector_id: &str) -> Result<Value> {
        self.get_json(&format!("detectors/{}/", detector_id))
    }

    /// Lists the detectors the key can access, see [`ResultsPage`].
    pub fn list_detectors(&self, filter: &DetectorFilter) -> Result<ResultsPage> {
        self.list("detectors/", &filter.query())
    }

    pub fn list_folder_detectors(&self, folder_id: &str, page_number: Option<u32>) -> Result<ResultsPage> {
        self.list(&format!("folders/{}/detectors/", folder_id), &page_query(page_number))
    }

    /// Lists the training rasters of a detector.
    pub fn list_detector_rasters(&self, detector_id: &str, page_number: Option<u32>) -> Result<ResultsPage> {
        self.list(
            &format!("detectors/{}/training_rasters/", detector_id),
            &page_query(page_number),
        )
    }

    pub fn edit_detector(&self, detector_id: &str, name: Option<&str>, edit: &DetectorEdit) -> Result<()> {
        let body = to_body(&DetectorBody {
            name: name.filter(|n| !n.is_empty()),
            configuration: edit,
        })?;
        self.call_expecting(Method::PUT, &format!("detectors/{}/", detector_id), Some(body), 204)?;
        Ok(())
    }

    pub fn delete_detector(&self, detector_id: &str) -> Result<()> {
        self.delete(&format!("detectors/{}/", detector_id))
    }

    /// Replaces the annotations of one type for a raster/detector pair.
    ///
    /// `class_id` is only meaningful for [`AnnotationType::Outline`].
    pub fn set_annotations(
        &self,
        detector_id: &str,
        raster_id: &str,
        annotation_type: AnnotationType,
        annotations: &Value,
        class_id: Option<&str>,
    ) -> Result<()> {
        let base = format!(
            "detectors/{}/training_rasters/{}/{}/upload/bulk/",
            detector_id,
            raster_id,
            annotation_type.as_str()
        );
        let slot: UploadSlot = self.post_json(&base, None)?;
        let upload_id = slot
            .upload_id
            .clone()
            .ok_or_else(|| Error::unexpected(&self.endpoint(&base), "missing upload_id"))?;
        self.upload_json(&slot, annotations)?;

        let mut body = Map::new();
        if let Some(class_id) = class_id {
            body.insert("class_id".into(), class_id.into());
        }
        self.run_operation(
            &format!("{}{}/commit/", base, upload_id),
            Some(Value::Object(body)),
        )?;
        Ok(())
    }

    /// Trains a detector, blocking until training completes.
    pub fn train_detector(&self, detector_id: &str) -> Result<OperationStatusResponse> {
        self.run_operation(&format!("detectors/{}/train/", detector_id), None)
            .map(|(_, status)| status)
    }

    pub fn run_dataset_recommendation(&self, detector_id: &str) -> Result<OperationStatusResponse> {
        self.run_operation(&format!("detectors/{}/dataset_recommendation/", detector_id), None)
            .map(|(_, status)| status)
    }

    pub fn run_advanced_tool(&self, tool_id: &str, inputs: Value, outputs: Value) -> Result<OperationStatusResponse> {
        self.run_operation(
            &format!("advanced_tools/{}/run/", tool_id),
            Some(json!({ "inputs": inputs, "outputs": outputs })),
        )
        .map(|(_, status)| status)
    }

    /// Runs a detector on a raster and waits for the detection to finish.
    ///
    /// Returns the operation id to pass to
    /// [`download_result_to_feature_collection`](Self::download_result_to_feature_collection).
    /// A change detector also needs `secondary_raster_id`.
    pub fn run_detector(
        &self,
        detector_id: &str,
        raster_id: &str,
        secondary_raster_id: Option<&str>,
    ) -> Result<String> {
        let mut body = json!({ "raster_id": raster_id });
        if let Some(secondary) = secondary_raster_id {
            body["secondary_raster_id"] = secondary.into();
        }
        let (operation, _) =
            self.run_operation(&format!("detectors/{}/run/", detector_id), Some(body))?;
        Ok(operation.operation_id)
    }

    /// Saves the results of a detection as one FeatureCollection, one
    /// MultiPolygon feature per class tagged with its `class_name`.
    pub fn download_result_to_feature_collection(
        &self,
        operation_id: &str,
        target: &Path,
    ) -> Result<PathBuf> {
        let results = self.get_operation_results(operation_id)?;
        let context = self.endpoint(&format!("operations/{}/", operation_id));
        let by_class = results
            .get("by_class")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::unexpected(&context, "missing by_class in results"))?;

        let mut fc = FeatureCollection::default();
        for class_result in by_class {
            let url = required_str(Some(class_result), "/result/url", &context)?;
            let class_name = required_str(Some(class_result), "/class/name", &context)?;
            let multipolygon = self.fetch_json(&url)?;
            let mut properties = Map::new();
            properties.insert("class_name".into(), class_name.into());
            fc.features.push(Feature::new(multipolygon, properties));
        }
        write_json_file(&fc, target)
    }

    /// Downloads the single result file of an operation as is.
    pub fn download_result_to_file(&self, operation_id: &str, target: &Path) -> Result<PathBuf> {
        let results = self.get_operation_results(operation_id)?;
        let url = required_str(
            Some(&results),
            "/url",
            &self.endpoint(&format!("operations/{}/", operation_id)),
        )?;
        debug!("Trying to download result {}..", url);
        self.download_url(&url, target)
    }
}
