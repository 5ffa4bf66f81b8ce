//! Store-safe encoding of nested structures.
//!
//! Document stores commonly reject arrays that directly contain arrays and
//! cap nesting depth. Offending fields are replaced by their JSON text and a
//! sibling `<field>__shape` tag records what was there, so [`StructureEncoder::decode`]
//! can restore them. Maps are walked in place, so only the offending leaf
//! field is rewritten (a GeoJSON `coordinates` array, say, not the whole
//! geometry object).

use crate::{error::RecordError, record::Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix of the sibling field that tags an encoded value.
pub const SHAPE_SUFFIX: &str = "__shape";

/// Nesting depth most document stores accept.
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Original shape of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    /// Array of positions
    LineString,
    /// Array of rings
    Polygon,
    /// Array of polygons
    MultiPolygon,
    /// Any other array
    #[serde(rename = "list")]
    List,
    /// Object nested past the depth limit
    #[serde(rename = "map")]
    Map,
}

impl Shape {
    pub fn as_str(self) -> &'static str {
        match self {
            Shape::LineString => "LineString",
            Shape::Polygon => "Polygon",
            Shape::MultiPolygon => "MultiPolygon",
            Shape::List => "list",
            Shape::Map => "map",
        }
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => Shape::Map,
            _ => match numeric_depth(value) {
                Some(2) => Shape::LineString,
                Some(3) => Shape::Polygon,
                Some(4) => Shape::MultiPolygon,
                _ => Shape::List,
            },
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Depth of a uniformly nested array of numbers, e.g. `[[1,2],[3,4]]` is 2.
fn numeric_depth(value: &Value) -> Option<usize> {
    let items = value.as_array()?;
    let first = items.first()?;
    if items.iter().all(Value::is_number) {
        return Some(1);
    }
    let depth = numeric_depth(first)?;
    items
        .iter()
        .skip(1)
        .all(|item| numeric_depth(item) == Some(depth))
        .then_some(depth + 1)
}

/// Rewrites fields the target store cannot hold natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureEncoder {
    max_depth: usize,
}

impl Default for StructureEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl StructureEncoder {
    /// Create an encoder for a store accepting `max_depth` levels of maps.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Encode every store-unsafe field of a record.
    pub fn encode(&self, fields: &Fields) -> Result<Fields, RecordError> {
        self.encode_map(fields, 1)
    }

    /// Restore fields encoded by [`encode`](Self::encode).
    pub fn decode(&self, fields: &Fields) -> Result<Fields, RecordError> {
        let mut out = Fields::new();
        for (key, value) in fields {
            if key.ends_with(SHAPE_SUFFIX) && fields.contains_key(strip_suffix(key)) {
                continue;
            }
            let tagged = fields.contains_key(&shape_key(key));
            let decoded = match value {
                Value::String(text) if tagged => {
                    serde_json::from_str(text).map_err(|e| RecordError::Encoding {
                        field: key.clone(),
                        reason: format!("cannot decode: {}", e),
                    })?
                }
                Value::Object(map) => Value::Object(self.decode(map)?),
                other => other.clone(),
            };
            out.insert(key.clone(), decoded);
        }
        Ok(out)
    }

    /// Whether any field of the record would be rewritten.
    pub fn needs_encoding(&self, fields: &Fields) -> bool {
        fields.values().any(|value| !self.is_safe(value, 1))
    }

    fn encode_map(&self, fields: &Fields, level: usize) -> Result<Fields, RecordError> {
        let mut out = Fields::new();
        for (key, value) in fields {
            if key.ends_with(SHAPE_SUFFIX) {
                return Err(RecordError::Encoding {
                    field: key.clone(),
                    reason: format!("field names ending in '{}' are reserved", SHAPE_SUFFIX),
                });
            }

            match value {
                Value::Object(map) if level < self.max_depth => {
                    out.insert(key.clone(), Value::Object(self.encode_map(map, level + 1)?));
                }
                other if self.is_safe(other, level) => {
                    out.insert(key.clone(), other.clone());
                }
                other => {
                    let text = serde_json::to_string(other).map_err(|e| RecordError::Encoding {
                        field: key.clone(),
                        reason: e.to_string(),
                    })?;
                    out.insert(key.clone(), Value::String(text));
                    out.insert(
                        shape_key(key),
                        Value::String(Shape::of(other).as_str().to_string()),
                    );
                }
            }
        }
        Ok(out)
    }

    /// A value held by a map at `level` is safe when no array holds an array
    /// directly and no container sits deeper than the depth limit.
    fn is_safe(&self, value: &Value, level: usize) -> bool {
        match value {
            Value::Array(items) => {
                level < self.max_depth
                    && items
                        .iter()
                        .all(|item| !item.is_array() && self.is_safe(item, level + 1))
            }
            Value::Object(map) => {
                level < self.max_depth && map.values().all(|v| self.is_safe(v, level + 1))
            }
            _ => true,
        }
    }
}

fn shape_key(field: &str) -> String {
    format!("{}{}", field, SHAPE_SUFFIX)
}

fn strip_suffix(key: &str) -> &str {
    key.strip_suffix(SHAPE_SUFFIX).unwrap_or(key)
}
