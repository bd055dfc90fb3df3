use geo_types::Point;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::alias::NameAliases;
use crate::error::DecodeError;

pub mod datetime;

/// Attribute holding the name of the track a point belongs to.
pub const NAME_ATTRIBUTE: &str = "Name";

#[derive(Deserialize)]
struct RawFeature {
    #[serde(rename = "type")]
    kind: String,
    geometry: Option<geojson::Geometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// A decoded point feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub point: Point<f64>,
    pub properties: Map<String, Value>,
}

impl Record {
    /// Decodes one input line. Lines that are not valid UTF-8 fail like any
    /// other malformed JSON.
    pub fn decode(line: impl AsRef<[u8]>) -> Result<Self, DecodeError> {
        let raw: RawFeature = serde_json::from_slice(line.as_ref())?;
        if raw.kind != "Feature" {
            return Err(DecodeError::NotAFeature(raw.kind));
        }
        let geometry = raw.geometry.ok_or(DecodeError::MissingGeometry)?;
        let point = match geometry.value {
            geojson::Value::Point(position) if position.len() >= 2 => {
                Point::new(position[0], position[1])
            }
            geojson::Value::Point(_) => return Err(DecodeError::NotAPoint("an empty point")),
            geojson::Value::MultiPoint(_) => return Err(DecodeError::NotAPoint("MultiPoint")),
            geojson::Value::LineString(_) => return Err(DecodeError::NotAPoint("LineString")),
            geojson::Value::MultiLineString(_) => {
                return Err(DecodeError::NotAPoint("MultiLineString"))
            }
            geojson::Value::Polygon(_) => return Err(DecodeError::NotAPoint("Polygon")),
            geojson::Value::MultiPolygon(_) => return Err(DecodeError::NotAPoint("MultiPolygon")),
            geojson::Value::GeometryCollection(_) => {
                return Err(DecodeError::NotAPoint("GeometryCollection"))
            }
        };
        Ok(Self {
            point,
            properties: raw.properties.unwrap_or_default(),
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Replaces the track name by its alias, if one matches.
    pub fn apply_aliases(&mut self, aliases: &NameAliases) {
        if let Some(Value::String(name)) = self.properties.get_mut(NAME_ATTRIBUTE) {
            if let Some(alias) = aliases.resolve(name) {
                *name = alias.to_string();
            }
        }
    }
}

/// Renders an attribute value the way it appears in a count table.
///
/// Missing and null values become the empty string.
pub fn attribute_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}
