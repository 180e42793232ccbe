use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::geometry::{LabeledPolygon, Point, Polygon};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShapeLabel {
    Number(i64),
    Text(String),
}

impl ShapeLabel {
    /// Segment id carried by a shape label.
    ///
    /// Integers are taken as-is. Text has its non-digit characters stripped;
    /// the digits left must have formed one contiguous run ("plant_12" is 12,
    /// "cam3_seg12" is rejected). Zero is reserved for background.
    pub fn segment_id(&self) -> FieldmapResult<u32> {
        let reject = || FieldmapError::LabelFormat {
            label: self.to_string(),
        };
        let value = match self {
            ShapeLabel::Number(n) => u32::try_from(*n).map_err(|_| reject())?,
            ShapeLabel::Text(text) => {
                let first = text.find(|c: char| c.is_ascii_digit()).ok_or_else(reject)?;
                let last = text.rfind(|c: char| c.is_ascii_digit()).ok_or_else(reject)?;
                let digits = &text[first..=last];
                if !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(reject());
                }
                digits.parse::<u32>().map_err(|_| reject())?
            }
        };
        if value == 0 {
            return Err(reject());
        }
        Ok(value)
    }
}

impl std::fmt::Display for ShapeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeLabel::Number(n) => write!(f, "{n}"),
            ShapeLabel::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    #[serde(default)]
    pub label: Option<ShapeLabel>,
    pub points: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(default = "default_shape_type")]
    pub shape_type: String,
    #[serde(default)]
    pub flags: Option<BTreeMap<String, serde_json::Value>>,
}

fn default_shape_type() -> String {
    "polygon".to_string()
}

/// On-disk polygon exchange document (labelme layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelmeDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub flags: Option<BTreeMap<String, serde_json::Value>>,
    pub shapes: Vec<Shape>,
    #[serde(rename = "imagePath", default)]
    pub image_path: Option<String>,
    #[serde(rename = "imageData", default)]
    pub image_data: Option<String>,
    #[serde(rename = "imageHeight", default)]
    pub image_height: Option<u32>,
    #[serde(rename = "imageWidth", default)]
    pub image_width: Option<u32>,
}

/// Labeled polygons of one raster, with the raster they were drawn on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonSet {
    pub polygons: Vec<LabeledPolygon>,
    pub image_path: Option<String>,
    /// `(width, height)` of the raster, when recorded.
    pub image_size: Option<(u32, u32)>,
}

impl PolygonSet {
    pub fn new(polygons: Vec<LabeledPolygon>) -> Self {
        Self {
            polygons,
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image_path: Option<String>, image_size: Option<(u32, u32)>) -> Self {
        self.image_path = image_path;
        self.image_size = image_size;
        self
    }
}

impl TryFrom<LabelmeDocument> for PolygonSet {
    type Error = FieldmapError;

    fn try_from(document: LabelmeDocument) -> FieldmapResult<Self> {
        let polygons = document
            .shapes
            .iter()
            .enumerate()
            .map(|(idx, shape)| {
                let label = match &shape.label {
                    Some(label) => label.segment_id()?,
                    None => idx as u32 + 1,
                };
                let points = shape.points.iter().copied().map(Point::from).collect();
                Ok(LabeledPolygon::new(label, Polygon::new(points)))
            })
            .collect::<FieldmapResult<Vec<_>>>()?;
        let image_size = document.image_width.zip(document.image_height);
        Ok(PolygonSet::new(polygons).with_image(document.image_path, image_size))
    }
}

impl From<&PolygonSet> for LabelmeDocument {
    fn from(set: &PolygonSet) -> Self {
        let shapes = set
            .polygons
            .iter()
            .map(|labeled| Shape {
                label: Some(ShapeLabel::Text(labeled.label.to_string())),
                points: labeled.polygon.points.iter().copied().map(Into::into).collect(),
                group_id: None,
                shape_type: default_shape_type(),
                flags: Some(BTreeMap::new()),
            })
            .collect();
        LabelmeDocument {
            version: None,
            flags: Some(BTreeMap::new()),
            shapes,
            image_path: set.image_path.clone(),
            image_data: None,
            image_height: set.image_size.map(|(_, h)| h),
            image_width: set.image_size.map(|(w, _)| w),
        }
    }
}

pub fn read_polygon_set(path: &Path) -> FieldmapResult<PolygonSet> {
    let data = fs::read_to_string(path).map_err(|e| FieldmapError::io(path, e))?;
    let document: LabelmeDocument =
        serde_json::from_str(&data).map_err(|e| FieldmapError::input_format(path, e.to_string()))?;
    PolygonSet::try_from(document)
}

pub fn write_polygon_set(path: &Path, set: &PolygonSet) -> FieldmapResult<()> {
    let document = LabelmeDocument::from(set);
    let data = serde_json::to_string_pretty(&document)
        .map_err(|e| FieldmapError::input_format(path, e.to_string()))?;
    fs::write(path, data).map_err(|e| FieldmapError::io(path, e))
}
