/// Conversion factor applied to `geo::distance` results.
pub const METERS_TO_MILES: f64 = 0.000621371192;

/// A latitude/longitude pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Point from latitude and longitude in degrees.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Distance projection from a fixed point to a geometry field, bounded by a
/// maximum distance in miles.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoDistance {
    pub field: String,
    pub from: GeoPoint,
    pub max_distance: f64,
}

impl GeoDistance {
    /// Distance from `from` to the point stored in `field`.
    pub fn new(field: impl Into<String>, from: GeoPoint) -> Self {
        Self {
            field: field.into(),
            from,
            max_distance: 0.0,
        }
    }

    /// Keeps only rows within `distance` miles.
    pub fn max(mut self, distance: f64) -> Self {
        self.max_distance = distance;
        self
    }

    /// Function text used as the projected expression.
    pub fn function(&self) -> String {
        format!(
            "(geo::distance(({}, {}), {}) * {METERS_TO_MILES})",
            self.from.longitude, self.from.latitude, self.field
        )
    }
}
