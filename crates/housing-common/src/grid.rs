//! Housing-delivery grids: one static GeoJSON file per province.
//!
//! Source files store polygon coordinates in Web Mercator (EPSG:3857). They are reprojected
//! to WGS84 on load so every consumer works in degrees.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use geojson::feature::Id;
use geojson::{Feature, GeoJson, Geometry, PolygonType, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("invalid province name: {0:?}")]
    InvalidProvince(String),

    #[error("no grid file for province {province} at {}", .path.display())]
    NotFound { province: String, path: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(#[from] geojson::Error),

    #[error("expected a FeatureCollection")]
    NotFeatureCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridFeature {
    pub grid_id: String,
    pub population: f64,
    /// Housing units across all delivery systems.
    pub housing_total: f64,
    /// Every numeric property of the source feature, keyed by property name.
    pub attributes: BTreeMap<String, f64>,
    /// WGS84 Polygon or MultiPolygon.
    pub geometry: Geometry,
}

impl GridFeature {
    pub fn attribute(&self, name: &str) -> Option<f64> {
        match name {
            "population" => Some(self.population),
            "housing_total" => Some(self.housing_total),
            _ => self.attributes.get(name).copied(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLayer {
    pub province: String,
    pub features: Vec<GridFeature>,
}

/// Equal-width choropleth classes over one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub attribute: String,
    pub min: f64,
    pub max: f64,
    pub classes: usize,
    /// Class index per feature, in feature order. `None` when the feature lacks the attribute.
    pub indices: Vec<Option<usize>>,
}

impl GridLayer {
    /// Returns `None` when no feature carries the attribute or `classes` is 0.
    pub fn classify(&self, attribute: &str, classes: usize) -> Option<Classification> {
        if classes == 0 {
            return None;
        }
        let values: Vec<Option<f64>> = self
            .features
            .iter()
            .map(|f| f.attribute(attribute).filter(|v| v.is_finite()))
            .collect();
        let (min, max) = values.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
        })?;

        let width = (max - min) / classes as f64;
        let indices = values
            .into_iter()
            .map(|v| {
                v.map(|v| {
                    if width == 0.0 {
                        0
                    } else {
                        (((v - min) / width).floor() as usize).min(classes - 1)
                    }
                })
            })
            .collect();

        Some(Classification {
            attribute: attribute.to_string(),
            min,
            max,
            classes,
            indices,
        })
    }
}

/// Loads `<dir>/<province>.geojson`. Province names are limited to `[A-Za-z0-9_-]`.
pub async fn load_province(dir: &Path, province: &str) -> Result<GridLayer, GridError> {
    if province.is_empty()
        || !province
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(GridError::InvalidProvince(province.to_string()));
    }

    let path = dir.join(format!("{province}.geojson"));
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GridError::NotFound {
                province: province.to_string(),
                path,
            })
        }
        Err(source) => return Err(GridError::Io { path, source }),
    };

    let features = parse_feature_collection(&content)?;
    debug!(province, features = features.len(), "loaded grid layer");
    Ok(GridLayer {
        province: province.to_string(),
        features,
    })
}

/// Parses a FeatureCollection. Features without a polygonal geometry are skipped.
///
/// Coordinates are taken as Web Mercator unless the collection's legacy `crs` member names
/// EPSG:4326 or CRS84.
pub fn parse_feature_collection(content: &str) -> Result<Vec<GridFeature>, GridError> {
    let GeoJson::FeatureCollection(collection) = content.parse::<GeoJson>()? else {
        return Err(GridError::NotFeatureCollection);
    };
    let crs_name = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mercator = !(crs_name.contains("4326") || crs_name.contains("CRS84"));

    let mut out = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let grid_id = grid_id(&feature).unwrap_or_else(|| index.to_string());

        let Some(geometry) = feature.geometry.as_ref() else {
            warn!(grid_id, "grid feature has no geometry, skipping");
            continue;
        };
        let Some(geometry) = reproject(geometry, mercator) else {
            warn!(grid_id, "unsupported grid geometry type, skipping");
            continue;
        };

        let attributes: BTreeMap<String, f64> = feature
            .properties
            .iter()
            .flatten()
            .filter_map(|(k, v)| numeric(v).map(|n| (k.clone(), n)))
            .collect();
        let population = ["population", "pop", "total_pop"]
            .iter()
            .find_map(|k| attributes.get(*k).copied())
            .unwrap_or(0.0);
        let housing_total = ["housing_total", "total_housing"]
            .iter()
            .find_map(|k| attributes.get(*k).copied())
            .unwrap_or_else(|| {
                attributes
                    .iter()
                    .filter(|(k, _)| k.starts_with("housing_"))
                    .map(|(_, v)| v)
                    .sum()
            });

        out.push(GridFeature {
            grid_id,
            population,
            housing_total,
            attributes,
            geometry,
        });
    }
    Ok(out)
}

/// Inverse spherical Mercator: meters to `[lon, lat]` degrees.
pub fn mercator_to_wgs84(x: f64, y: f64) -> [f64; 2] {
    let lon = x / EARTH_RADIUS_M * 180.0 / PI;
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0) * 180.0 / PI;
    [lon, lat]
}

fn grid_id(feature: &Feature) -> Option<String> {
    feature
        .property("grid_id")
        .and_then(value_text)
        .or_else(|| feature.property("id").and_then(value_text))
        .or_else(|| match &feature.id {
            Some(Id::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Id::Number(n)) => Some(n.to_string()),
            _ => None,
        })
}

/// Polygon and MultiPolygon are kept, reprojected when `mercator` is set. Extra ordinates
/// (elevation) are dropped.
fn reproject(geometry: &Geometry, mercator: bool) -> Option<Geometry> {
    let position = |p: &Position| -> Position {
        if mercator {
            mercator_to_wgs84(p[0], p[1]).to_vec()
        } else {
            vec![p[0], p[1]]
        }
    };
    let polygon = |rings: &PolygonType| -> PolygonType {
        rings
            .iter()
            .map(|ring| ring.iter().filter(|p| p.len() >= 2).map(position).collect())
            .collect()
    };
    let value = match &geometry.value {
        geojson::Value::Polygon(rings) => geojson::Value::Polygon(polygon(rings)),
        geojson::Value::MultiPolygon(polygons) => {
            geojson::Value::MultiPolygon(polygons.iter().map(polygon).collect())
        }
        _ => return None,
    };
    Some(Geometry::new(value))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
