use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine: String,
    pub available_workers: usize,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

// ---------- /predictions ----------

#[derive(Debug, Clone, Serialize)]
pub struct ProjectListing {
    pub project_id: String,
    pub detection: Detections,
}

/// One artifact group, keyed by the base name of its `.json` file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionGroup {
    pub geojson_files: Vec<String>,
    pub id: String,
    pub bbox: Value,
    pub zoom: Value,
    pub image_url: Value,
    pub tif_url: Value,
}

impl DetectionGroup {
    pub fn new(id: &str) -> Self {
        Self {
            geojson_files: Vec::new(),
            id: id.to_string(),
            bbox: Value::Null,
            zoom: Value::Null,
            image_url: Value::Null,
            tif_url: Value::Null,
        }
    }

    /// Copies the known fields out of a parsed artifact, replacing whatever was there.
    pub fn apply_artifact(&mut self, artifact: &serde_json::Map<String, Value>) {
        self.bbox = artifact
            .get("bbox")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        self.zoom = artifact.get("zoom").cloned().unwrap_or(Value::Null);
        self.image_url = artifact.get("image_url").cloned().unwrap_or(Value::Null);
        self.tif_url = artifact.get("tif_url").cloned().unwrap_or(Value::Null);
    }
}

/// Base name -> group, iterated and serialized in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Detections {
    groups: Vec<DetectionGroup>,
    index: HashMap<String, usize>,
}

impl Detections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the group for `base_name`, creating it with defaults on first sight.
    pub fn entry(&mut self, base_name: &str) -> &mut DetectionGroup {
        let idx = match self.index.get(base_name) {
            Some(&idx) => idx,
            None => {
                self.groups.push(DetectionGroup::new(base_name));
                let idx = self.groups.len() - 1;
                self.index.insert(base_name.to_string(), idx);
                idx
            }
        };
        &mut self.groups[idx]
    }

    pub fn get(&self, base_name: &str) -> Option<&DetectionGroup> {
        self.index.get(base_name).map(|&idx| &self.groups[idx])
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.id.as_str())
    }
}

impl Serialize for Detections {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len()))?;
        for group in &self.groups {
            map.serialize_entry(&group.id, group)?;
        }
        map.end()
    }
}

// ---------- /segment_* ----------

/// Zoom as clients send it: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Zoom {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Zoom {
    pub fn coerce(&self) -> Result<i64, String> {
        match self {
            Zoom::Int(z) => Ok(*z),
            Zoom::Float(f) => {
                let truncated = f.trunc();
                if f.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                    Ok(truncated as i64)
                } else {
                    Err(format!("zoom must be an integer, got {}", f))
                }
            }
            Zoom::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("zoom must be an integer, got {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentRequest {
    pub bbox: Vec<f64>,
    pub zoom: Zoom,
    pub id: String,
    pub project: String,
    #[serde(default)]
    pub point_coords: Vec<Vec<f64>>,
    #[serde(default)]
    pub point_labels: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zoom_accepts_numbers_and_numeric_strings() {
        assert_eq!(Zoom::Int(15).coerce(), Ok(15));
        assert_eq!(Zoom::Text("7".into()).coerce(), Ok(7));
        assert_eq!(Zoom::Text(" 18 ".into()).coerce(), Ok(18));
        assert_eq!(Zoom::Text("-2".into()).coerce(), Ok(-2));
        assert_eq!(Zoom::Float(12.9).coerce(), Ok(12));
        assert_eq!(Zoom::Float(-3.5).coerce(), Ok(-3));
    }

    #[test]
    fn zoom_rejects_garbage() {
        assert!(Zoom::Text("abc".into()).coerce().is_err());
        assert!(Zoom::Text("7.5".into()).coerce().is_err());
        assert!(Zoom::Text("".into()).coerce().is_err());
        assert!(Zoom::Float(f64::NAN).coerce().is_err());
        assert!(Zoom::Float(f64::INFINITY).coerce().is_err());
    }

    #[test]
    fn zoom_deserializes_from_either_shape() {
        let req: SegmentRequest = serde_json::from_value(json!({
            "bbox": [1.0, 2.0, 3.0, 4.0],
            "zoom": "17",
            "id": "a",
            "project": "p"
        }))
        .unwrap();
        assert_eq!(req.zoom, Zoom::Text("17".into()));
        assert!(req.point_coords.is_empty());
        assert!(req.point_labels.is_empty());

        let req: SegmentRequest = serde_json::from_value(json!({
            "bbox": [1, 2, 3, 4],
            "zoom": 17,
            "id": "a",
            "project": "p",
            "point_coords": [[10.5, 20.25]],
            "point_labels": [1]
        }))
        .unwrap();
        assert_eq!(req.zoom, Zoom::Int(17));
        assert_eq!(req.point_coords, vec![vec![10.5, 20.25]]);
    }

    #[test]
    fn detections_keep_first_seen_order() {
        let mut detections = Detections::new();
        detections.entry("zeta");
        detections.entry("alpha");
        detections.entry("zeta").zoom = json!(3);

        assert_eq!(detections.len(), 2);
        assert_eq!(detections.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);

        let text = serde_json::to_string(&detections).unwrap();
        assert!(text.find("\"zeta\"").unwrap() < text.find("\"alpha\"").unwrap());
        assert_eq!(detections.get("zeta").unwrap().zoom, json!(3));
    }

    #[test]
    fn group_fields_serialize_in_listing_order() {
        let group = DetectionGroup::new("a");
        let text = serde_json::to_string(&group).unwrap();
        assert_eq!(
            text,
            r#"{"geojson_files":[],"id":"a","bbox":null,"zoom":null,"image_url":null,"tif_url":null}"#
        );
    }

    #[test]
    fn apply_artifact_fills_defaults() {
        let mut group = DetectionGroup::new("a");
        let artifact = json!({"zoom": 5, "tif_url": "http://x/a.tif", "extra": true});
        group.apply_artifact(artifact.as_object().unwrap());

        assert_eq!(group.bbox, json!([]));
        assert_eq!(group.zoom, json!(5));
        assert_eq!(group.image_url, Value::Null);
        assert_eq!(group.tif_url, json!("http://x/a.tif"));
    }
}
