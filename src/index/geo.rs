/// Great-circle distance and bounding-box helpers
///
/// Proximity queries first cut a coarse lat/lon box out of the index, then
/// filter the candidates by true haversine distance.

use crate::state::data::Coordinate;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Slack on the coarse box; the haversine filter makes the final call
pub const BOX_PADDING: f64 = 1.01;

/// Haversine distance between two points in meters
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1_rad = a.latitude.to_radians();
    let lat2_rad = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// An axis-aligned box in degrees. Does not wrap the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box around `center` expanded by `radius` meters.
    ///
    /// `Δlat = r / 111320`, `Δlon = r / (111320 · cos(lat))`, with `r` padded by
    /// [`BOX_PADDING`] and `lat` taken at the poleward edge so the box never
    /// clips the true circle. Near the poles the longitude span is widened to
    /// the whole globe.
    pub fn around(center: Coordinate, radius: f64) -> Self {
        let radius = radius.max(0.0) * BOX_PADDING;
        let delta_lat = radius / METERS_PER_DEGREE;

        let edge_lat = (center.latitude.abs() + delta_lat).min(90.0);
        let cos_lat = edge_lat.to_radians().cos().abs();
        let delta_lon = if cos_lat < 1e-9 {
            360.0
        } else {
            radius / (METERS_PER_DEGREE * cos_lat)
        };

        Self {
            min_lat: (center.latitude - delta_lat).max(-90.0),
            max_lat: (center.latitude + delta_lat).min(90.0),
            min_lon: (center.longitude - delta_lon).max(-180.0),
            max_lon: (center.longitude + delta_lon).min(180.0),
        }
    }

    /// One box covering every target expanded by `radius`, `None` without targets
    pub fn covering(targets: &[Coordinate], radius: f64) -> Option<Self> {
        targets
            .iter()
            .map(|t| Self::around(*t, radius))
            .reduce(|acc, b| acc.union(&b))
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }
}
