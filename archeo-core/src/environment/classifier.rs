//! Environment Classifier
//!
//! Pure function of coordinates plus a static reference dataset of named
//! regions. No I/O. Ambiguous or uncovered points become `unknown` with low
//! confidence; the classifier has no error path.
//!
//! # Lookup order
//! 1. Urban areas (point + radius)
//! 2. Reference regions, in table order: glacier, polar ice, wetland, coastal,
//!    desert, mountain, forest, shallow sea, deep ocean. Specific regions come
//!    before the broad ones that enclose them.
//! 3. `unknown`
//!
//! Points within `EDGE_MARGIN_DEG` of a region boundary get their confidence
//! scaled by `EDGE_PENALTY`.

use super::routing::RoutingTable;
use crate::types::{EnvironmentContext, EnvironmentType};
use archeo_common::geo::haversine_m;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Confidence reported for uncovered points
const UNKNOWN_CONFIDENCE: f64 = 0.2;

/// Confidence reported for invalid coordinates
const INVALID_CONFIDENCE: f64 = 0.05;

/// Confidence reported inside an urban radius
const URBAN_CONFIDENCE: f64 = 0.85;

const EDGE_MARGIN_DEG: f64 = 0.25;
const EDGE_PENALTY: f64 = 0.8;

/// Rectangular reference region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRegion {
    pub name: String,
    pub environment: EnvironmentType,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub confidence: f64,
}

impl ReferenceRegion {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    /// Degrees to the nearest boundary (point assumed inside)
    fn edge_distance_deg(&self, lat: f64, lon: f64) -> f64 {
        [
            lat - self.lat_min,
            self.lat_max - lat,
            lon - self.lon_min,
            self.lon_max - lon,
        ]
        .into_iter()
        .fold(f64::INFINITY, f64::min)
    }

    /// Boundaries of whole-globe bands (poles, antimeridian) are not real edges
    fn is_band(&self) -> bool {
        self.lon_min <= -180.0 && self.lon_max >= 180.0
    }
}

/// Urban area: centre point and radius
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrbanArea {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

type RegionRow = (&'static str, EnvironmentType, f64, f64, f64, f64, f64);

// (name, category, lat_min, lat_max, lon_min, lon_max, confidence)
const BUILTIN_REGIONS: &[RegionRow] = &[
    // Glaciers and ice caps
    ("Greenland Ice Sheet", EnvironmentType::Glacier, 60.0, 83.5, -73.0, -12.0, 0.85),
    ("Svalbard", EnvironmentType::Glacier, 76.5, 80.8, 10.0, 33.0, 0.8),
    ("Vatnajokull", EnvironmentType::Glacier, 64.0, 64.8, -18.5, -15.3, 0.8),
    ("Patagonian Icefields", EnvironmentType::Glacier, -51.5, -46.3, -74.5, -72.8, 0.8),
    ("Saint Elias Mountains", EnvironmentType::Glacier, 59.5, 62.0, -146.0, -136.0, 0.75),
    ("Karakoram", EnvironmentType::Glacier, 35.3, 36.5, 75.0, 77.5, 0.7),
    // Polar ice
    ("Antarctica", EnvironmentType::PolarIce, -90.0, -60.0, -180.0, 180.0, 0.9),
    ("Arctic Ocean", EnvironmentType::PolarIce, 80.0, 90.0, -180.0, 180.0, 0.8),
    // Wetlands
    ("Nile Delta", EnvironmentType::Wetland, 30.1, 31.6, 29.8, 32.3, 0.7),
    ("Mesopotamian Marshes", EnvironmentType::Wetland, 30.5, 32.0, 46.0, 48.0, 0.75),
    ("Sudd", EnvironmentType::Wetland, 6.0, 10.0, 29.5, 32.5, 0.75),
    ("Okavango Delta", EnvironmentType::Wetland, -20.5, -18.0, 22.0, 24.0, 0.75),
    ("Pantanal", EnvironmentType::Wetland, -22.0, -15.5, -59.0, -54.5, 0.8),
    ("Everglades", EnvironmentType::Wetland, 25.0, 26.8, -81.5, -80.2, 0.8),
    ("Sundarbans", EnvironmentType::Wetland, 21.5, 22.6, 88.5, 90.3, 0.75),
    // Coasts
    ("Levantine Coast", EnvironmentType::Coastal, 31.2, 35.0, 34.2, 35.9, 0.6),
    ("Peruvian Coast", EnvironmentType::Coastal, -18.0, -3.5, -81.5, -79.0, 0.6),
    ("Northern Yucatan Coast", EnvironmentType::Coastal, 21.0, 21.7, -90.5, -86.7, 0.6),
    ("Dutch Coast", EnvironmentType::Coastal, 51.5, 53.5, 3.5, 5.5, 0.6),
    ("Bay of Naples", EnvironmentType::Coastal, 40.5, 41.0, 13.8, 14.6, 0.6),
    // Deserts
    ("Sahara", EnvironmentType::Desert, 15.0, 33.0, -17.0, 33.0, 0.85),
    ("Arabian Desert", EnvironmentType::Desert, 15.0, 32.0, 36.0, 49.5, 0.85),
    ("Rub al Khali", EnvironmentType::Desert, 16.0, 23.5, 49.5, 56.0, 0.85),
    ("Thar", EnvironmentType::Desert, 24.0, 30.0, 69.0, 74.0, 0.75),
    ("Taklamakan", EnvironmentType::Desert, 36.0, 41.0, 76.0, 90.0, 0.85),
    ("Gobi", EnvironmentType::Desert, 38.0, 46.0, 90.0, 112.0, 0.8),
    ("Atacama", EnvironmentType::Desert, -27.5, -18.0, -71.0, -68.5, 0.85),
    ("Namib", EnvironmentType::Desert, -28.0, -17.0, 12.0, 15.5, 0.8),
    ("Kalahari", EnvironmentType::Desert, -27.0, -19.0, 18.0, 26.0, 0.7),
    ("Australian Interior", EnvironmentType::Desert, -32.0, -19.0, 120.0, 140.0, 0.75),
    ("Sonoran and Mojave", EnvironmentType::Desert, 31.0, 36.5, -117.5, -111.0, 0.7),
    // Mountains
    ("Himalaya and Tibet", EnvironmentType::Mountain, 27.0, 36.0, 72.0, 97.0, 0.75),
    ("Alps", EnvironmentType::Mountain, 43.5, 48.0, 5.0, 16.0, 0.7),
    ("Andes", EnvironmentType::Mountain, -35.0, 5.0, -80.0, -70.0, 0.7),
    ("Rocky Mountains", EnvironmentType::Mountain, 37.0, 50.0, -116.0, -105.0, 0.65),
    ("Caucasus", EnvironmentType::Mountain, 41.0, 44.0, 40.0, 48.0, 0.7),
    ("Ethiopian Highlands", EnvironmentType::Mountain, 7.0, 14.0, 36.0, 40.0, 0.65),
    // Forests
    ("Amazon Basin", EnvironmentType::Forest, -15.0, 5.0, -73.0, -47.0, 0.8),
    ("Congo Basin", EnvironmentType::Forest, -5.0, 5.0, 12.0, 30.0, 0.8),
    ("Maya Lowlands", EnvironmentType::Forest, 15.0, 21.0, -92.0, -87.0, 0.75),
    ("Borneo", EnvironmentType::Forest, -4.0, 7.0, 108.0, 119.0, 0.75),
    ("Mainland Southeast Asia", EnvironmentType::Forest, 10.0, 15.0, 102.0, 108.0, 0.65),
    ("Siberian Taiga", EnvironmentType::Forest, 55.0, 68.0, 60.0, 140.0, 0.6),
    ("Canadian Boreal", EnvironmentType::Forest, 50.0, 62.0, -120.0, -60.0, 0.6),
    // Shallow seas
    ("North Sea", EnvironmentType::ShallowSea, 53.0, 58.5, 0.0, 7.5, 0.65),
    ("Persian Gulf", EnvironmentType::ShallowSea, 24.0, 30.0, 49.5, 56.5, 0.6),
    ("Central Adriatic", EnvironmentType::ShallowSea, 42.0, 44.5, 14.0, 16.0, 0.6),
    ("Aegean Sea", EnvironmentType::ShallowSea, 36.5, 40.0, 23.5, 26.0, 0.55),
    ("Java Sea", EnvironmentType::ShallowSea, -6.5, -3.5, 106.0, 116.0, 0.6),
    ("Gulf of Thailand", EnvironmentType::ShallowSea, 7.0, 12.0, 100.0, 103.0, 0.6),
    // Open ocean
    ("North Atlantic", EnvironmentType::DeepOcean, 15.0, 55.0, -50.0, -20.0, 0.65),
    ("South Atlantic", EnvironmentType::DeepOcean, -50.0, 0.0, -30.0, 5.0, 0.65),
    ("Eastern Pacific", EnvironmentType::DeepOcean, -50.0, 50.0, -180.0, -125.0, 0.65),
    ("Western Pacific", EnvironmentType::DeepOcean, 0.0, 40.0, 150.0, 180.0, 0.6),
    ("Indian Ocean", EnvironmentType::DeepOcean, -45.0, 5.0, 55.0, 95.0, 0.65),
];

// (name, lat, lon, radius_km)
const BUILTIN_URBAN: &[(&str, f64, f64, f64)] = &[
    ("London", 51.507, -0.128, 25.0),
    ("Paris", 48.857, 2.352, 15.0),
    ("Rome", 41.903, 12.496, 12.0),
    ("Istanbul", 41.008, 28.978, 20.0),
    ("Cairo", 30.044, 31.236, 9.0),
    ("Mumbai", 19.076, 72.878, 20.0),
    ("Beijing", 39.904, 116.407, 25.0),
    ("Tokyo", 35.690, 139.692, 30.0),
    ("New York", 40.713, -74.006, 25.0),
    ("Los Angeles", 34.052, -118.244, 30.0),
    ("Mexico City", 19.433, -99.133, 25.0),
    ("Lima", -12.046, -77.043, 15.0),
    ("Sao Paulo", -23.551, -46.633, 25.0),
];

/// Built-in reference regions
pub fn builtin_regions() -> Vec<ReferenceRegion> {
    BUILTIN_REGIONS
        .iter()
        .map(
            |&(name, environment, lat_min, lat_max, lon_min, lon_max, confidence)| {
                ReferenceRegion {
                    name: name.to_string(),
                    environment,
                    lat_min,
                    lat_max,
                    lon_min,
                    lon_max,
                    confidence,
                }
            },
        )
        .collect()
}

/// Built-in urban areas
pub fn builtin_urban_areas() -> Vec<UrbanArea> {
    BUILTIN_URBAN
        .iter()
        .map(|&(name, lat, lon, radius_km)| UrbanArea {
            name: name.to_string(),
            lat,
            lon,
            radius_km,
        })
        .collect()
}

/// Environment classifier
///
/// Constructed once at start-up and shared by reference; holds no mutable state.
#[derive(Debug, Clone)]
pub struct EnvironmentClassifier {
    regions: Vec<ReferenceRegion>,
    urban: Vec<UrbanArea>,
    routing: RoutingTable,
}

impl Default for EnvironmentClassifier {
    fn default() -> Self {
        Self::new(RoutingTable::builtin())
    }
}

impl EnvironmentClassifier {
    /// Classifier over the built-in reference dataset
    pub fn new(routing: RoutingTable) -> Self {
        Self {
            regions: builtin_regions(),
            urban: builtin_urban_areas(),
            routing,
        }
    }

    /// Classifier over a custom reference dataset
    pub fn with_reference(
        regions: Vec<ReferenceRegion>,
        urban: Vec<UrbanArea>,
        routing: RoutingTable,
    ) -> Self {
        Self {
            regions,
            urban,
            routing,
        }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Classify a coordinate and select its instruments
    pub fn classify(&self, lat: f64, lon: f64) -> EnvironmentContext {
        let (environment, confidence, matched) = self.detect(lat, lon);

        debug!(
            lat,
            lon,
            environment = %environment,
            confidence,
            region = matched.unwrap_or("-"),
            "Environment classified"
        );

        self.context_for(environment, confidence)
    }

    /// Build the context for an already-known category
    pub fn context_for(&self, environment: EnvironmentType, confidence: f64) -> EnvironmentContext {
        let route = self.routing.route(environment);
        EnvironmentContext {
            environment,
            confidence: confidence.clamp(0.0, 1.0),
            primary_instruments: route.primary.iter().map(|s| s.to_string()).collect(),
            secondary_instruments: route.secondary.iter().map(|s| s.to_string()).collect(),
            minimum_required: route.minimum_required,
        }
    }

    fn detect(&self, lat: f64, lon: f64) -> (EnvironmentType, f64, Option<&str>) {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        if !valid {
            return (EnvironmentType::Unknown, INVALID_CONFIDENCE, None);
        }

        if let Some(city) = self
            .urban
            .iter()
            .find(|c| haversine_m(lat, lon, c.lat, c.lon) <= c.radius_km * 1000.0)
        {
            return (EnvironmentType::Urban, URBAN_CONFIDENCE, Some(city.name.as_str()));
        }

        if let Some(region) = self.regions.iter().find(|r| r.contains(lat, lon)) {
            let mut confidence = region.confidence;
            if !region.is_band() && region.edge_distance_deg(lat, lon) < EDGE_MARGIN_DEG {
                confidence *= EDGE_PENALTY;
            }
            return (region.environment, confidence, Some(region.name.as_str()));
        }

        (EnvironmentType::Unknown, UNKNOWN_CONFIDENCE, None)
    }
}
