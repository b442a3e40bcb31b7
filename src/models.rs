//! Request bodies, filters and GeoJSON containers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Metadata sent along with a raster upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RasterUpload {
    pub name: String,
    /// Defaults server-side to the "Picterra API Project" folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// ISO-8601 capture time, e.g. `2020-01-01T12:34:56.789Z`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<String>,
    pub multispectral: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_coverage: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_tag: Option<String>,
}

impl RasterUpload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RasterEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Moves the raster to another folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multispectral_band_specification: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_coverage: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_tag: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RasterFilter {
    pub folder_id: Option<String>,
    /// Matches raster names.
    pub search: Option<String>,
    pub user_tag: Option<String>,
    pub max_cloud_coverage: Option<u8>,
    pub captured_before: Option<String>,
    pub captured_after: Option<String>,
    pub has_vector_layers: Option<bool>,
    pub page_number: Option<u32>,
}

impl RasterFilter {
    pub(crate) fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(v) = self.folder_id.as_deref().filter(|v| !v.is_empty()) {
            q.push(("folder", v.to_string()));
        }
        if let Some(v) = self.search.as_deref().filter(|v| !v.is_empty()) {
            q.push(("search", v.to_string()));
        }
        if let Some(v) = &self.user_tag {
            q.push(("user_tag", v.trim().to_string()));
        }
        if let Some(v) = self.max_cloud_coverage {
            q.push(("max_cloud_coverage", v.to_string()));
        }
        if let Some(v) = &self.captured_before {
            q.push(("captured_before", v.clone()));
        }
        if let Some(v) = &self.captured_after {
            q.push(("captured_after", v.clone()));
        }
        if let Some(v) = self.has_vector_layers {
            q.push(("has_vector_layers", v.to_string()));
        }
        q.push(("page_number", self.page_number.unwrap_or(1).to_string()));
        q
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectorFilter {
    pub search: Option<String>,
    pub user_tag: Option<String>,
    pub is_shared: Option<bool>,
    pub page_number: Option<u32>,
}

impl DetectorFilter {
    pub(crate) fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(v) = &self.search {
            q.push(("search", v.trim().to_string()));
        }
        if let Some(v) = &self.user_tag {
            q.push(("user_tag", v.trim().to_string()));
        }
        if let Some(v) = self.is_shared {
            q.push(("is_shared", v.to_string()));
        }
        q.push(("page_number", self.page_number.unwrap_or(1).to_string()));
        q
    }
}

pub(crate) fn page_query(page_number: Option<u32>) -> Vec<(&'static str, String)> {
    vec![("page_number", page_number.unwrap_or(1).to_string())]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    Count,
    Segmentation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Polygon,
    Bbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backbone {
    Resnet18,
    Resnet34,
    Resnet50,
}

/// Settings of a new detector. Depending on the plan some of them cannot
/// differ from the defaults.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorConfig {
    pub detection_type: DetectionType,
    pub output_type: OutputType,
    /// Between 500 and 40000.
    pub training_steps: u32,
    pub backbone: Backbone,
    pub tile_size: u32,
    /// Between 0 and 1.
    pub background_sample_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detection_type: DetectionType::Count,
            output_type: OutputType::Polygon,
            training_steps: 500,
            backbone: Backbone::Resnet34,
            tile_size: 256,
            background_sample_ratio: 0.25,
        }
    }
}

/// Partial detector settings; unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectorEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_type: Option<DetectionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_type: Option<OutputType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backbone: Option<Backbone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_sample_ratio: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DetectorBody<'a, C: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<&'a str>,
    pub(crate) configuration: &'a C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationType {
    Outline,
    TrainingArea,
    TestingArea,
    ValidationArea,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationType::Outline => "outline",
            AnnotationType::TrainingArea => "training_area",
            AnnotationType::TestingArea => "testing_area",
            AnnotationType::ValidationArea => "validation_area",
        }
    }
}

/// Answer of the endpoints handing out a pre-signed upload URL.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UploadSlot {
    pub(crate) upload_url: String,
    #[serde(default)]
    pub(crate) upload_id: Option<String>,
    #[serde(default)]
    pub(crate) raster_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Created {
    pub(crate) id: String,
}

/// A downloadable artifact.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Download URL.
    pub location: String,
    /// Expected content length (bytes), when known up front.
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: Map<String, Value>,
    pub geometry: Value,
}

impl Feature {
    pub fn new(geometry: Value, properties: Map<String, Value>) -> Self {
        Self {
            kind: "Feature".to_string(),
            properties,
            geometry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }
}

/// Splits a GeoJSON MultiPolygon into a FeatureCollection of Polygons.
pub fn multipolygon_to_feature_collection(multipolygon: &Value) -> Result<FeatureCollection> {
    let polygons = multipolygon_coordinates(multipolygon)?;

    Ok(FeatureCollection {
        features: polygons
            .iter()
            .map(|coords| {
                Feature::new(
                    json!({"type": "Polygon", "coordinates": coords}),
                    Map::new(),
                )
            })
            .collect(),
        ..Default::default()
    })
}

fn multipolygon_coordinates(multipolygon: &Value) -> Result<&Vec<Value>> {
    multipolygon
        .get("coordinates")
        .and_then(Value::as_array)
        .filter(|_| multipolygon.get("type").and_then(Value::as_str) == Some("MultiPolygon"))
        .ok_or_else(|| invalid_geometry("expected a GeoJSON MultiPolygon"))
}

fn invalid_geometry(message: &str) -> Error {
    Error::Validation {
        message: message.to_string(),
        fields: None,
    }
}

/// Radius of the EPSG:3857 spheroid, in meters.
const EARTH_RADIUS: f64 = 6_378_137.0;
/// Pixel size of the geotransform `[0, 0.1, 0, 0, 0, -0.1]` set on
/// non-georeferenced rasters.
const NONGEO_PIXEL_SIZE: f64 = 0.1;

/// A polygon in pixel space: its outer ring first, then its holes.
pub type PixelPolygon = Vec<Vec<(f64, f64)>>;

/// Converts a detection result on a non-georeferenced raster (PNG, JPEG, ...)
/// to pixel coordinates.
///
/// The platform places such rasters in EPSG:3857 with a fixed geotransform, so
/// the result's lng/lat points are projected back through it. The output is
/// meaningless for georeferenced rasters.
pub fn nongeo_result_to_pixel(multipolygon: &Value) -> Result<Vec<PixelPolygon>> {
    multipolygon_coordinates(multipolygon)?
        .iter()
        .map(nongeo_polygon_to_pixel)
        .collect()
}

fn nongeo_polygon_to_pixel(polygon: &Value) -> Result<PixelPolygon> {
    as_array(polygon)?.iter().map(nongeo_ring_to_pixel).collect()
}

fn nongeo_ring_to_pixel(ring: &Value) -> Result<Vec<(f64, f64)>> {
    as_array(ring)?.iter().map(nongeo_point_to_pixel).collect()
}

fn as_array(value: &Value) -> Result<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| invalid_geometry("malformed MultiPolygon coordinates"))
}

fn nongeo_point_to_pixel(point: &Value) -> Result<(f64, f64)> {
    let (lng, lat) = match point.as_array().map(Vec::as_slice) {
        Some([lng, lat, ..]) => (lng.as_f64(), lat.as_f64()),
        _ => (None, None),
    };
    let (Some(lng), Some(lat)) = (lng, lat) else {
        return Err(invalid_geometry("expected [lng, lat] positions"));
    };

    let x = EARTH_RADIUS * lng.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    Ok((x / NONGEO_PIXEL_SIZE, y / -NONGEO_PIXEL_SIZE))
}
