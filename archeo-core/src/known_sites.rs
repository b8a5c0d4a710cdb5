//! Known-Site Cross-Reference
//!
//! Read-only catalog of documented archaeological sites, each a centre point and
//! a radius, indexed on a 1-degree grid. Loaded once at start-up from a JSON file:
//!
//! ```json
//! [
//!   { "name": "Giza Necropolis", "lat": 29.9792, "lon": 31.1342, "radius_m": 1500 }
//! ]
//! ```
//!
//! An unavailable catalog is an empty catalog: the analysis continues, it just
//! cannot recognise rediscoveries.

use crate::types::{BoundingBox, KnownSiteRef};
use archeo_common::geo::{clamp_to_rect, haversine_m, meters_per_deg_lon, METERS_PER_DEG_LAT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Sites closer than this to the area are reported even if their radius is smaller
pub const MIN_SEARCH_RADIUS_M: f64 = 5_000.0;

/// One catalogued site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownSite {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
}

impl KnownSite {
    fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && self.radius_m.is_finite()
            && self.radius_m >= 0.0
    }
}

/// Grid-indexed site catalog
#[derive(Debug, Clone, Default)]
pub struct KnownSiteCatalog {
    sites: Vec<KnownSite>,
    cells: HashMap<(i32, i32), Vec<usize>>,
    max_radius_m: f64,
}

fn cell_of(lat: f64, lon: f64) -> (i32, i32) {
    (lat.floor() as i32, lon.floor() as i32)
}

impl KnownSiteCatalog {
    /// Build from entries; invalid entries are dropped with a warning
    pub fn from_sites(sites: Vec<KnownSite>) -> Self {
        let mut catalog = Self::default();
        for site in sites {
            if !site.is_valid() {
                warn!(site = %site.name, "Skipping known site with invalid coordinates or radius");
                continue;
            }
            let idx = catalog.sites.len();
            catalog
                .cells
                .entry(cell_of(site.lat, site.lon))
                .or_default()
                .push(idx);
            catalog.max_radius_m = catalog.max_radius_m.max(site.radius_m);
            catalog.sites.push(site);
        }
        catalog
    }

    /// Load the catalog file; any problem yields an empty catalog
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No known-site catalog configured");
            return Self::default();
        };

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Known-site catalog unavailable; continuing without it"
                );
                return Self::default();
            }
        };

        match serde_json::from_str::<Vec<KnownSite>>(&content) {
            Ok(sites) => {
                let catalog = Self::from_sites(sites);
                info!(
                    path = %path.display(),
                    sites = catalog.len(),
                    "Loaded known-site catalog"
                );
                catalog
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Known-site catalog unreadable; continuing without it"
                );
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Nearest catalogued site touching or near the area
    ///
    /// A site is a hit when the area comes within `max(site radius, 5 km)` of its
    /// centre. Containing sites rank ahead of merely nearby ones; then distance
    /// from the area centre, then name.
    pub fn find_overlap(&self, bbox: &BoundingBox) -> Option<KnownSiteRef> {
        if self.sites.is_empty() {
            return None;
        }

        let reach_m = self.max_radius_m.max(MIN_SEARCH_RADIUS_M);
        let margin_lat = reach_m / METERS_PER_DEG_LAT;
        let widest_lat = bbox.lat_min.abs().max(bbox.lat_max.abs()).min(89.0);
        let margin_lon = (reach_m / meters_per_deg_lon(widest_lat)).min(360.0);

        let (row_min, col_min) = cell_of(
            (bbox.lat_min - margin_lat).max(-90.0),
            (bbox.lon_min - margin_lon).max(-180.0),
        );
        let (row_max, col_max) = cell_of(
            (bbox.lat_max + margin_lat).min(90.0),
            (bbox.lon_max + margin_lon).min(180.0),
        );

        let (center_lat, center_lon) = bbox.center();
        let mut best: Option<KnownSiteRef> = None;

        for row in row_min..=row_max {
            for col in col_min..=col_max {
                let Some(indices) = self.cells.get(&(row, col)) else {
                    continue;
                };
                for &idx in indices {
                    let site = &self.sites[idx];
                    let (near_lat, near_lon) = clamp_to_rect(
                        site.lat,
                        site.lon,
                        bbox.lat_min,
                        bbox.lat_max,
                        bbox.lon_min,
                        bbox.lon_max,
                    );
                    let to_area_m = haversine_m(site.lat, site.lon, near_lat, near_lon);
                    if to_area_m > site.radius_m.max(MIN_SEARCH_RADIUS_M) {
                        continue;
                    }

                    let distance_m = haversine_m(center_lat, center_lon, site.lat, site.lon);
                    let hit = KnownSiteRef {
                        name: site.name.clone(),
                        lat: site.lat,
                        lon: site.lon,
                        radius_m: site.radius_m,
                        distance_m,
                        is_contained: bbox.contains(site.lat, site.lon)
                            || distance_m <= site.radius_m,
                        overlaps: to_area_m <= site.radius_m,
                    };
                    if best.as_ref().map_or(true, |b| ranks_before(&hit, b)) {
                        best = Some(hit);
                    }
                }
            }
        }

        best
    }
}

fn ranks_before(a: &KnownSiteRef, b: &KnownSiteRef) -> bool {
    (!a.is_contained, a.distance_m, &a.name) < (!b.is_contained, b.distance_m, &b.name)
}
