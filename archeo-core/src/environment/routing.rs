//! Category routing table
//!
//! Single source of truth for which instruments serve which environment and how
//! many of them must agree. The classifier and the convergence engine both read
//! it; call sites never hard-code instrument lists.

use crate::connectors::names::*;
use crate::types::EnvironmentType;

/// Routing entry for one category
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub environment: EnvironmentType,
    pub primary: &'static [&'static str],
    pub secondary: &'static [&'static str],
    pub minimum_required: usize,
}

const ROUTES: &[Route] = &[
    Route {
        environment: EnvironmentType::Desert,
        primary: &[MODIS_THERMAL, SENTINEL2_NDVI, SRTM_ELEVATION],
        secondary: &[SENTINEL1_SAR, MODIS_NDVI],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::Forest,
        primary: &[SENTINEL1_SAR, MODIS_LAI, SRTM_ELEVATION],
        secondary: &[SENTINEL2_NDVI, MODIS_NDVI, MODIS_THERMAL],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::Mountain,
        primary: &[SRTM_ELEVATION, SENTINEL1_SAR, SENTINEL2_NDVI],
        secondary: &[MODIS_THERMAL, MODIS_NDVI],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::Glacier,
        primary: &[SENTINEL1_SAR, ICESAT2_ALTIMETRY, SRTM_ELEVATION],
        secondary: &[MODIS_THERMAL],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::PolarIce,
        primary: &[ICESAT2_ALTIMETRY, SENTINEL1_SAR],
        secondary: &[MODIS_THERMAL, SRTM_ELEVATION],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::ShallowSea,
        primary: &[EMODNET_BATHYMETRY, GEBCO_BATHYMETRY, SENTINEL1_SAR],
        secondary: &[MODIS_THERMAL],
        minimum_required: 3,
    },
    Route {
        environment: EnvironmentType::DeepOcean,
        primary: &[GEBCO_BATHYMETRY, EMODNET_BATHYMETRY],
        secondary: &[SENTINEL1_SAR, MODIS_THERMAL],
        minimum_required: 3,
    },
    Route {
        environment: EnvironmentType::Coastal,
        primary: &[SENTINEL2_NDVI, SENTINEL1_SAR, SRTM_ELEVATION],
        secondary: &[EMODNET_BATHYMETRY, MODIS_THERMAL, ERA5_SOIL_MOISTURE],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::Urban,
        primary: &[SENTINEL1_SAR, MODIS_THERMAL],
        secondary: &[SENTINEL2_NDVI, SRTM_ELEVATION],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::Wetland,
        primary: &[SENTINEL1_SAR, SENTINEL2_NDVI, ERA5_SOIL_MOISTURE],
        secondary: &[MODIS_NDVI, SRTM_ELEVATION],
        minimum_required: 2,
    },
    Route {
        environment: EnvironmentType::Unknown,
        primary: &[SENTINEL2_NDVI, SENTINEL1_SAR, SRTM_ELEVATION, MODIS_THERMAL],
        secondary: &[MODIS_NDVI, ERA5_SOIL_MOISTURE],
        minimum_required: 3,
    },
];

/// Read-only routing table, built once at start-up
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RoutingTable {
    /// Built-in routes for every category
    pub fn builtin() -> Self {
        Self {
            routes: ROUTES.to_vec(),
        }
    }

    /// Route for a category; `unknown` covers anything missing
    pub fn route(&self, environment: EnvironmentType) -> &Route {
        self.routes
            .iter()
            .find(|r| r.environment == environment)
            .or_else(|| {
                self.routes
                    .iter()
                    .find(|r| r.environment == EnvironmentType::Unknown)
            })
            .unwrap_or(&ROUTES[ROUTES.len() - 1])
    }

    /// Quorum for a category
    pub fn minimum_required(&self, environment: EnvironmentType) -> usize {
        self.route(environment).minimum_required
    }

    /// Every instrument any route mentions
    pub fn all_instruments(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for route in &self.routes {
            for &name in route.primary.iter().chain(route.secondary.iter()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}
