//! Merge rules that turn the cached datasets plus a fresh portal listing into
//! the next canonical snapshot.
//!
//! Both merges are keyed by identity and keep the newest definition of each
//! key. Merged rows keep the position where their key first appeared (old rows
//! first, then newly seen keys in fetch order); that order is deterministic
//! but carries no meaning beyond the positional `OBJECTID`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::cmcs::licenses::error::{Result, ToolError};
use crate::cmcs::licenses::model::{
    CoordinatePoint, GeometryPayload, LicenseId, LicenseRecord, ListingRow, NOT_VALID_STATUS,
};

/// Number of `cell` entries every listing row carries.
pub const LISTING_FIELD_COUNT: usize = 8;

/// Outcome of [`merge_entities`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMerge {
    /// The new canonical licenses dataset.
    pub licenses: Vec<LicenseRecord>,
    /// Licenses whose id was not part of the old dataset, in fetch order.
    pub added: Vec<LicenseRecord>,
}

impl EntityMerge {
    pub fn has_additions(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Converts one listing row into a record. `position` is the 0-based index of
/// the row in the listing and becomes the provisional `OBJECTID`.
pub fn parse_listing_row(position: usize, row: &ListingRow) -> Result<LicenseRecord> {
    let invalid = |reason: String| ToolError::InvalidListingRow {
        row: position + 1,
        reason,
    };

    if row.cell.len() != LISTING_FIELD_COUNT {
        return Err(invalid(format!(
            "expected {LISTING_FIELD_COUNT} fields, found {}",
            row.cell.len()
        )));
    }

    let id_text = row.text(0);
    let id = id_text
        .trim()
        .parse::<LicenseId>()
        .map_err(|_| invalid(format!("id '{id_text}' is not an integer")))?;
    let area_text = row.text(6);
    let area = area_text
        .trim()
        .parse::<f64>()
        .map_err(|_| invalid(format!("area '{area_text}' is not a number")))?;

    Ok(LicenseRecord {
        object_id: position as i64 + 1,
        id,
        code: row.text(1),
        name: row.text(2),
        license_type: row.text(3),
        status: row.text(4),
        holder: row.text(5),
        area,
    })
}

/// Parses a whole listing. The first malformed row aborts the parse.
pub fn parse_listing(rows: &[ListingRow]) -> Result<Vec<LicenseRecord>> {
    rows.iter()
        .enumerate()
        .map(|(position, row)| parse_listing_row(position, row))
        .collect()
}

/// Merges the cached licenses with a freshly fetched listing.
///
/// Fresh records replace old ones with the same id. Every record whose id is
/// missing from `fresh` is marked [`NOT_VALID_STATUS`]. `OBJECTID` is
/// renumbered 1..N afterwards.
pub fn merge_entities(old: &[LicenseRecord], fresh: &[LicenseRecord]) -> EntityMerge {
    let old_ids: HashSet<LicenseId> = old.iter().map(|record| record.id).collect();
    let fresh_ids: HashSet<LicenseId> = fresh.iter().map(|record| record.id).collect();

    let mut licenses: Vec<LicenseRecord> = Vec::with_capacity(old.len() + fresh.len());
    let mut positions: HashMap<LicenseId, usize> = HashMap::new();

    for record in old.iter().chain(fresh) {
        match positions.get(&record.id) {
            Some(&position) => licenses[position] = record.clone(),
            None => {
                positions.insert(record.id, licenses.len());
                licenses.push(record.clone());
            }
        }
    }

    let mut retired = 0usize;
    for record in &mut licenses {
        if !fresh_ids.contains(&record.id) {
            record.status = NOT_VALID_STATUS.to_string();
            retired += 1;
        }
    }

    for (index, record) in licenses.iter_mut().enumerate() {
        record.object_id = index as i64 + 1;
    }

    let mut seen = HashSet::new();
    let added: Vec<LicenseRecord> = fresh
        .iter()
        .filter(|record| !old_ids.contains(&record.id) && seen.insert(record.id))
        .map(|record| licenses[positions[&record.id]].clone())
        .collect();

    debug!(
        merged = licenses.len(),
        added = added.len(),
        retired,
        "merged license sets"
    );

    EntityMerge { licenses, added }
}

/// Expands a geometry payload into coordinate rows numbered 1..N in ring order.
pub fn expand_geometry(payload: &GeometryPayload) -> Vec<CoordinatePoint> {
    payload
        .ring
        .iter()
        .enumerate()
        .map(|(index, &(longitude, latitude))| CoordinatePoint {
            license_id: payload.license_id,
            point: index as i64 + 1,
            longitude,
            latitude,
        })
        .collect()
}

/// Merges newly fetched geometries into the cached coordinate points, keyed by
/// `(license id, point)`. Newly expanded points replace old ones.
pub fn merge_coordinates(
    old: &[CoordinatePoint],
    payloads: &[GeometryPayload],
) -> Vec<CoordinatePoint> {
    let expanded: Vec<CoordinatePoint> = payloads.iter().flat_map(expand_geometry).collect();

    let mut points: Vec<CoordinatePoint> = Vec::with_capacity(old.len() + expanded.len());
    let mut positions: HashMap<(LicenseId, i64), usize> = HashMap::new();

    for point in old.iter().chain(&expanded) {
        match positions.get(&point.key()) {
            Some(&position) => points[position] = point.clone(),
            None => {
                positions.insert(point.key(), points.len());
                points.push(point.clone());
            }
        }
    }

    debug!(
        previous = old.len(),
        expanded = expanded.len(),
        merged = points.len(),
        "merged coordinate sets"
    );

    points
}

/// Licenses still listed by the portal that have no coordinate point yet.
pub fn licenses_missing_coordinates(
    licenses: &[LicenseRecord],
    coordinates: &[CoordinatePoint],
) -> Vec<LicenseRecord> {
    let covered: HashSet<LicenseId> = coordinates.iter().map(|point| point.license_id).collect();
    licenses
        .iter()
        .filter(|record| !record.is_not_valid() && !covered.contains(&record.id))
        .cloned()
        .collect()
}
