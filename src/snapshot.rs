use crate::track::{AttributeObservation, PlateEvidence, Timestamp, VehicleEvidence};
use crate::utils::bbox::{BoundingBox, FrameDimensions};
use crate::Errors;
use anyhow::Result;
use itertools::Itertools;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Meta class name of plate detections
pub const PLATES_META_CLASS: &str = "licensePlates";
/// Meta class name of vehicle detections
pub const VEHICLES_META_CLASS: &str = "vehicles";

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString<T> {
    Number(T),
    Text(String),
}

/// Accepts a number given either as a JSON number or as a numeric string.
///
pub(crate) fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    match NumberOrString::<T>::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn unknown_source() -> String {
    "unknown".to_string()
}

/// One frame worth of pipeline output.
///
/// The envelope is strictly typed; detections are kept as raw JSON and decoded one by one, so a
/// single malformed detection does not invalidate the rest of the frame.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "unknown_source")]
    pub source_id: String,
    #[serde(deserialize_with = "number_or_string")]
    pub frame_timestamp: Timestamp,
    #[serde(default)]
    pub frame_source: String,
    #[serde(default)]
    pub frame_dimensions: FrameDimensions,
    #[serde(default)]
    pub media_events: Vec<MediaEvent>,
    #[serde(default)]
    pub meta_classes: MetaClasses,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaClasses {
    #[serde(default)]
    pub license_plates: Map<String, Value>,
    #[serde(default)]
    pub vehicles: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttribute {
    value: Value,
    #[serde(default)]
    attribute_score: f32,
    #[serde(default)]
    detection_score: f32,
    total_score: f32,
}

impl From<RawAttribute> for AttributeObservation {
    fn from(raw: RawAttribute) -> Self {
        AttributeObservation::new(
            value_text(&raw.value),
            raw.attribute_score,
            raw.detection_score,
            raw.total_score,
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlateAttributes {
    #[serde(default)]
    lp_string: Option<RawAttribute>,
    #[serde(default)]
    lp_region: Option<RawAttribute>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVehicleAttributes {
    #[serde(default)]
    vehicle_type: Option<RawAttribute>,
    #[serde(default)]
    color: Option<RawAttribute>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLink {
    #[serde(default)]
    meta_class: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct RawDetection<A> {
    attributes: A,
    #[serde(rename = "box", default)]
    bbox: Option<BoundingBox>,
    #[serde(default)]
    links: Vec<RawLink>,
}

impl<A> RawDetection<A> {
    fn linked_id(&self, meta_class: &str) -> Option<String> {
        self.links
            .iter()
            .find(|link| link.meta_class.as_deref() == Some(meta_class) && link.id.is_some())
            .and_then(|link| link.id.clone())
    }
}

/// Renders an attribute value. A structured vehicle type is flattened to `make model generation`.
///
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            let text = ["make", "model", "generation"]
                .iter()
                .filter_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|part| !part.is_empty())
                .join(" ");
            if text.is_empty() {
                Some(value.to_string())
            } else {
                Some(text)
            }
        }
        other => Some(other.to_string()),
    }
}

/// Plate detection with its optional link to a vehicle detection.
///
#[derive(Debug, Clone, PartialEq)]
pub struct PlateDetection {
    pub plate: PlateEvidence,
    pub bbox: Option<BoundingBox>,
    pub linked_vehicle_id: Option<String>,
}

/// Vehicle detection with its optional link to a plate detection.
///
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleDetection {
    pub vehicle: VehicleEvidence,
    pub bbox: Option<BoundingBox>,
    pub linked_plate_id: Option<String>,
}

fn malformed(kind: &'static str, id: &str, e: impl fmt::Display) -> anyhow::Error {
    Errors::MalformedDetection {
        kind,
        id: id.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn parse_plate(id: &str, value: &Value) -> Result<PlateDetection> {
    let raw = RawDetection::<RawPlateAttributes>::deserialize(value)
        .map_err(|e| malformed("plate", id, e))?;
    let linked_vehicle_id = raw.linked_id(VEHICLES_META_CLASS);
    let RawDetection {
        attributes, bbox, ..
    } = raw;
    Ok(PlateDetection {
        plate: PlateEvidence {
            lp_id: id.to_string(),
            lp_string: attributes.lp_string.map(AttributeObservation::from),
            lp_region: attributes.lp_region.map(AttributeObservation::from),
        },
        bbox,
        linked_vehicle_id,
    })
}

fn parse_vehicle(id: &str, value: &Value) -> Result<VehicleDetection> {
    let raw = RawDetection::<RawVehicleAttributes>::deserialize(value)
        .map_err(|e| malformed("vehicle", id, e))?;
    let linked_plate_id = raw.linked_id(PLATES_META_CLASS);
    let RawDetection {
        attributes, bbox, ..
    } = raw;
    Ok(VehicleDetection {
        vehicle: VehicleEvidence {
            vehicle_id: id.to_string(),
            make_model: attributes.vehicle_type.map(AttributeObservation::from),
            color: attributes.color.map(AttributeObservation::from),
        },
        bbox,
        linked_plate_id,
    })
}

impl Snapshot {
    /// Decodes the snapshot envelope.
    ///
    /// A missing or non-numeric `frameTimestamp` rejects the whole snapshot with
    /// [`Errors::MalformedSnapshot`]. Detections are not decoded here.
    ///
    pub fn from_json(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| Errors::MalformedSnapshot(e.to_string()).into())
    }

    /// Id of the frame image announced by the first `image` media event
    ///
    pub fn image_id(&self) -> Option<&str> {
        self.media_events
            .iter()
            .find(|event| event.kind == "image")
            .and_then(|event| event.msg.as_deref())
    }

    /// Base name of the frame source path
    ///
    pub fn frame_source_name(&self) -> &str {
        Path::new(&self.frame_source)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
    }

    /// Decodes all plate detections, in id order.
    ///
    pub fn plates(&self) -> Vec<Result<PlateDetection>> {
        self.meta_classes
            .license_plates
            .iter()
            .map(|(id, value)| parse_plate(id, value))
            .collect()
    }

    /// Decodes the vehicle detection with the given id, if the snapshot has one.
    ///
    pub fn vehicle(&self, id: &str) -> Option<Result<VehicleDetection>> {
        self.meta_classes
            .vehicles
            .get(id)
            .map(|value| parse_vehicle(id, value))
    }

    /// Decodes all vehicle detections, in id order.
    ///
    pub fn vehicles(&self) -> Vec<Result<VehicleDetection>> {
        self.meta_classes
            .vehicles
            .iter()
            .map(|(id, value)| parse_vehicle(id, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::snapshot::Snapshot;
    use crate::utils::bbox::{BoundingBox, FrameDimensions};
    use crate::Errors;
    use anyhow::Result;

    const FRAME: &str = r#"{
        "sourceId": "gate-1",
        "frameTimestamp": "1700000000123",
        "frameSource": "/media/recordings/gate-1.mp4",
        "frameDimensions": {"w": 1920, "h": 1080},
        "mediaEvents": [{"type": "video", "msg": "v1"}, {"type": "image", "msg": "img-42"}],
        "metaClasses": {
            "licensePlates": {
                "L1": {
                    "attributes": {
                        "lpString": {"value": "ABC123", "attributeScore": 0.95, "detectionScore": 0.9, "totalScore": 0.855},
                        "lpRegion": {"value": "California", "attributeScore": 0.8, "detectionScore": 0.9, "totalScore": 0.72}
                    },
                    "box": {"x": 100, "y": 200, "width": 80, "height": 30},
                    "links": [{"metaClass": "vehicles", "id": "V1"}]
                },
                "L2": {
                    "box": {"x": 1, "y": 2, "width": 3, "height": 4}
                }
            },
            "vehicles": {
                "V1": {
                    "attributes": {
                        "vehicleType": {"value": {"make": "Toyota", "model": "Camry", "generation": "2018-2022"}, "attributeScore": 0.7, "detectionScore": 0.9, "totalScore": 0.63},
                        "color": {"value": "white", "attributeScore": 0.9, "detectionScore": 0.9, "totalScore": 0.81}
                    },
                    "links": [{"metaClass": "licensePlates", "id": "L1"}]
                },
                "V2": {
                    "attributes": {"color": {"value": "black", "totalScore": 0.5}}
                }
            }
        }
    }"#;

    #[test]
    fn envelope() -> Result<()> {
        let s = Snapshot::from_json(FRAME)?;
        assert_eq!(s.source_id, "gate-1");
        assert_eq!(s.frame_timestamp, 1_700_000_000_123);
        assert_eq!(s.frame_source_name(), "gate-1.mp4");
        assert_eq!(s.frame_dimensions, FrameDimensions::new(1920, 1080));
        assert_eq!(s.image_id(), Some("img-42"));
        Ok(())
    }

    #[test]
    fn plates_and_links() -> Result<()> {
        let s = Snapshot::from_json(FRAME)?;
        let plates = s.plates();
        assert_eq!(plates.len(), 2);

        let l1 = plates[0].as_ref().unwrap();
        assert_eq!(l1.plate.lp_id, "L1");
        assert_eq!(l1.linked_vehicle_id.as_deref(), Some("V1"));
        assert_eq!(l1.bbox, Some(BoundingBox::new(100.0, 200.0, 80.0, 30.0)));
        let lp_string = l1.plate.lp_string.as_ref().unwrap();
        assert_eq!(lp_string.value.as_deref(), Some("ABC123"));
        assert_eq!(lp_string.total_score, 0.855);
        assert_eq!(
            l1.plate.lp_region.as_ref().unwrap().value.as_deref(),
            Some("California")
        );

        let err = plates[1].as_ref().unwrap_err();
        match err.downcast_ref::<Errors>() {
            Some(Errors::MalformedDetection { kind, id, .. }) => {
                assert_eq!(*kind, "plate");
                assert_eq!(id, "L2");
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    #[test]
    fn vehicles() -> Result<()> {
        let s = Snapshot::from_json(FRAME)?;
        let v1 = s.vehicle("V1").unwrap()?;
        assert_eq!(v1.linked_plate_id.as_deref(), Some("L1"));
        assert_eq!(
            v1.vehicle.make_model.as_ref().unwrap().value.as_deref(),
            Some("Toyota Camry 2018-2022")
        );

        let v2 = s.vehicle("V2").unwrap()?;
        assert!(v2.vehicle.make_model.is_none());
        assert!(v2.linked_plate_id.is_none());
        let color = v2.vehicle.color.unwrap();
        assert_eq!(color.value.as_deref(), Some("black"));
        assert_eq!(color.attribute_score, 0.0);

        assert!(s.vehicle("V3").is_none());
        assert_eq!(s.vehicles().len(), 2);
        Ok(())
    }

    #[test]
    fn attribute_without_total_score_is_malformed() -> Result<()> {
        let s = Snapshot::from_json(
            r#"{"frameTimestamp": 5, "metaClasses": {"vehicles": {"V1": {"attributes": {"color": {"value": "red"}}}}}}"#,
        )?;
        assert!(s.vehicle("V1").unwrap().is_err());
        assert_eq!(s.source_id, "unknown");
        Ok(())
    }

    #[test]
    fn missing_timestamp_rejects_snapshot() {
        let err = Snapshot::from_json(r#"{"sourceId": "gate-1"}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::MalformedSnapshot(_))
        ));
        assert!(Snapshot::from_json(r#"{"frameTimestamp": "soon"}"#).is_err());
    }
}
