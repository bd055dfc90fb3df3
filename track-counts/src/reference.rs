use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use geo::prelude::{BoundingRect, Intersects};
use geo_types::{Geometry, MultiPolygon, Point};
use geojson::GeoJson;
use rstar::{RTree, RTreeObject, AABB};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{ConfigError, PipelineError};

/// Normalized coordinate reference system identifier, e.g. `EPSG:4269`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Crs(String);

impl Crs {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Crs {
    type Err = ConfigError;

    /// Accepts `AUTHORITY:CODE` and OGC URNs such as
    /// `urn:ogc:def:crs:EPSG::4269` or `urn:ogc:def:crs:OGC:1.3:CRS84`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const URN_PREFIX: &str = "urn:ogc:def:crs:";
        let invalid = || ConfigError::InvalidCrs(s.to_string());
        let trimmed = s.trim();
        let is_urn = trimmed
            .get(..URN_PREFIX.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(URN_PREFIX));
        let (authority, code) = if is_urn {
            let mut parts = trimmed[URN_PREFIX.len()..].split(':');
            let authority = parts.next().ok_or_else(invalid)?;
            let code = parts.last().ok_or_else(invalid)?;
            (authority, code)
        } else {
            trimmed.split_once(':').ok_or_else(invalid)?
        };
        if authority.is_empty() || code.is_empty() {
            return Err(invalid());
        }
        Ok(Self(format!(
            "{}:{}",
            authority.to_ascii_uppercase(),
            code.to_ascii_uppercase()
        )))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference polygon datasets available for spatial joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceLayer {
    Counties,
    Countries,
}

impl ReferenceLayer {
    /// Location of the layer relative to the data directory.
    pub fn default_path(&self, data_dir: &Path) -> PathBuf {
        match self {
            Self::Counties => data_dir.join("census").join("cb_2020_us_county_500k.geojson"),
            Self::Countries => data_dir
                .join("naturalearthdata")
                .join("ne_50m_admin_0_countries.geojson"),
        }
    }
}

impl fmt::Display for ReferenceLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counties => f.write_str("counties"),
            Self::Countries => f.write_str("countries"),
        }
    }
}

#[derive(Debug)]
pub struct ReferenceFeature {
    geometry: MultiPolygon<f64>,
    pub attributes: Map<String, Value>,
}

impl ReferenceFeature {
    pub fn new(geometry: Geometry<f64>, attributes: Map<String, Value>) -> Option<Self> {
        let geometry = match geometry {
            Geometry::Polygon(polygon) => MultiPolygon(vec![polygon]),
            Geometry::MultiPolygon(mp) => mp,
            _ => return None,
        };
        Some(Self {
            geometry,
            attributes,
        })
    }

    fn envelope(&self) -> Option<AABB<[f64; 2]>> {
        let rect = self.geometry.bounding_rect()?;
        Some(AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        ))
    }

    /// Boundary-inclusive point-in-polygon test.
    pub fn intersects(&self, point: &Point<f64>) -> bool {
        self.geometry
            .0
            .iter()
            .any(|polygon| polygon.intersects(&point.0))
    }
}

/// Bounding box of one feature, tagged with its position in the dataset.
#[derive(Debug, Clone)]
struct FeatureBox {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Polygons of one reference layer, in dataset order.
#[derive(Debug)]
pub struct ReferenceCollection {
    pub crs: Option<Crs>,
    pub features: Vec<ReferenceFeature>,
    index: RTree<FeatureBox>,
}

impl ReferenceCollection {
    /// Indexes the bounding boxes of `features`. Features without any
    /// coordinates can never match and are left out.
    pub fn new(crs: Option<Crs>, features: Vec<ReferenceFeature>) -> Self {
        let boxes = features
            .iter()
            .enumerate()
            .filter_map(|(idx, feature)| feature.envelope().map(|env| FeatureBox { idx, env }))
            .collect();
        Self {
            crs,
            features,
            index: RTree::bulk_load(boxes),
        }
    }

    /// The first feature, in dataset order, containing the point.
    pub fn locate(&self, point: &Point<f64>) -> Option<&ReferenceFeature> {
        let query = AABB::from_point([point.x(), point.y()]);
        self.index
            .locate_in_envelope_intersecting(&query)
            .map(|b| b.idx)
            .filter(|idx| self.features[*idx].intersects(point))
            .min()
            .map(|idx| &self.features[idx])
    }

    pub fn from_geojson(layer: ReferenceLayer, text: &str) -> Result<Self, PipelineError> {
        let unavailable = |reason: String| PipelineError::ReferenceUnavailable { layer, reason };
        let collection = match text.parse::<GeoJson>() {
            Ok(GeoJson::FeatureCollection(fc)) => fc,
            Ok(_) => return Err(unavailable("not a FeatureCollection".to_string())),
            Err(e) => return Err(unavailable(e.to_string())),
        };

        let crs = collection
            .foreign_members
            .as_ref()
            .and_then(|members| members.get("crs"))
            .and_then(|crs| crs.pointer("/properties/name"))
            .and_then(Value::as_str)
            .map(|name| {
                name.parse::<Crs>()
                    .map_err(|e| unavailable(format!("unreadable crs member: {}", e)))
            })
            .transpose()?;

        let mut features = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let geometry = match feature.geometry {
                Some(geometry) => geometry,
                None => continue,
            };
            let geometry: Geometry<f64> = geometry
                .value
                .try_into()
                .map_err(|e: geojson::Error| unavailable(e.to_string()))?;
            if let Some(rf) = ReferenceFeature::new(geometry, feature.properties.unwrap_or_default())
            {
                features.push(rf);
            }
        }
        Ok(Self::new(crs, features))
    }
}

/// Supplies reference polygon collections for spatial joins.
pub trait GeometryProvider: Send + Sync {
    fn collection(
        &self,
        layer: ReferenceLayer,
        crs: &Crs,
    ) -> Result<Arc<ReferenceCollection>, PipelineError>;
}

/// Reads reference layers from GeoJSON files, once per run.
pub struct GeoJsonProvider {
    paths: HashMap<ReferenceLayer, PathBuf>,
    loaded: Mutex<HashMap<ReferenceLayer, Arc<ReferenceCollection>>>,
}

impl GeoJsonProvider {
    pub fn new(paths: HashMap<ReferenceLayer, PathBuf>) -> Self {
        Self {
            paths,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, layer: ReferenceLayer) -> Option<Arc<ReferenceCollection>> {
        self.loaded
            .lock()
            .ok()
            .and_then(|loaded| loaded.get(&layer).cloned())
    }

    fn load(&self, layer: ReferenceLayer) -> Result<ReferenceCollection, PipelineError> {
        let path = self
            .paths
            .get(&layer)
            .ok_or_else(|| PipelineError::ReferenceUnavailable {
                layer,
                reason: "no dataset configured".to_string(),
            })?;
        let text = fs::read_to_string(path).map_err(|e| PipelineError::ReferenceUnavailable {
            layer,
            reason: format!("{}: {}", path.display(), e),
        })?;
        let collection = ReferenceCollection::from_geojson(layer, &text)?;
        info!(
            "loaded {} {} polygons from {}",
            collection.features.len(),
            layer,
            path.display()
        );
        Ok(collection)
    }
}

impl GeometryProvider for GeoJsonProvider {
    fn collection(
        &self,
        layer: ReferenceLayer,
        crs: &Crs,
    ) -> Result<Arc<ReferenceCollection>, PipelineError> {
        let collection = match self.cached(layer) {
            Some(collection) => collection,
            None => {
                // concurrent first loads may race, the loser's copy is dropped
                let collection = Arc::new(self.load(layer)?);
                match self.loaded.lock() {
                    Ok(mut loaded) => loaded.entry(layer).or_insert(collection).clone(),
                    Err(_) => collection,
                }
            }
        };
        match &collection.crs {
            Some(found) if found != crs => Err(PipelineError::CrsMismatch {
                layer,
                requested: crs.clone(),
                found: found.clone(),
            }),
            _ => Ok(collection),
        }
    }
}
