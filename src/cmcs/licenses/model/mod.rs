use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable external identity of a license as assigned by the portal.
pub type LicenseId = i64;

/// Status assigned to licenses that disappeared from the portal listing.
pub const NOT_VALID_STATUS: &str = "NotValid";

/// Column layout of the licenses workbook.
pub const LICENSE_COLUMNS: [&str; 8] = [
    "OBJECTID", "ID", "Code", "Name", "Type", "Status", "Holder", "Area",
];

/// Column layout of the coordinates workbook.
pub const COORDINATE_COLUMNS: [&str; 4] = ["ID", "Point", "Longitude", "Latitude"];

/// One row of the licenses dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// Positional, 1-based row number. Recomputed on every merge and never
    /// used as identity.
    pub object_id: i64,
    pub id: LicenseId,
    pub code: String,
    pub name: String,
    pub license_type: String,
    pub status: String,
    pub holder: String,
    pub area: f64,
}

impl LicenseRecord {
    /// Returns true when the license carries the terminal status marker.
    pub fn is_not_valid(&self) -> bool {
        self.status == NOT_VALID_STATUS
    }
}

/// One vertex of a license boundary ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatePoint {
    pub license_id: LicenseId,
    /// 1-based ordinal within the ring.
    pub point: i64,
    pub longitude: f64,
    pub latitude: f64,
}

impl CoordinatePoint {
    /// Composite identity used when merging point sets.
    pub fn key(&self) -> (LicenseId, i64) {
        (self.license_id, self.point)
    }
}

/// Row of the portal listing grid: the `cell` array of one `rows` entry.
/// Cells are untyped scalars; the grid sends ids as numbers or strings and
/// empty fields as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRow {
    pub cell: Vec<Value>,
}

impl ListingRow {
    /// Text form of cell `index`: `null` and absent cells read as `""`,
    /// numbers and booleans use their JSON spelling.
    pub fn text(&self, index: usize) -> String {
        match self.cell.get(index) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Geometry recovered from a license detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryPayload {
    pub license_id: LicenseId,
    /// `(longitude, latitude)` pairs of the first ring, in ring order.
    pub ring: Vec<(f64, f64)>,
}

/// Full persisted state: every license and every coordinate point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSnapshot {
    pub licenses: Vec<LicenseRecord>,
    pub coordinates: Vec<CoordinatePoint>,
}
