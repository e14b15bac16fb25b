use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use crate::cmcs::licenses::error::{Result, ToolError};
use crate::cmcs::licenses::io::{DatasetLayout, excel_read, excel_write};
use crate::cmcs::licenses::model::{DatasetSnapshot, GeometryPayload, LicenseId, LicenseRecord};
use crate::cmcs::licenses::progress::Progress;
use crate::cmcs::licenses::reconcile::{self, EntityMerge};
use crate::cmcs::licenses::remote::{LicensePortal, ListingPages};

/// Which licenses get their geometry downloaded during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoordinateTargets {
    /// Only licenses that are new to the licenses dataset.
    #[default]
    NewLicenses,
    /// New licenses plus every listed license that still has no coordinate
    /// point, which fills gaps left by earlier failed downloads.
    MissingCoordinates,
}

/// Knobs for [`update_datasets`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub coordinate_targets: CoordinateTargets,
    pub show_progress: bool,
}

/// A license whose geometry could not be downloaded this run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryFailure {
    pub license_id: LicenseId,
    pub reason: String,
}

/// Figures reported after a completed update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSummary {
    pub total_licenses: usize,
    pub added_licenses: usize,
    /// Licenses that switched to the terminal status during this run.
    pub retired_licenses: usize,
    /// Points expanded from this run's downloads, replaced keys included.
    pub points_added: usize,
    pub failures: Vec<GeometryFailure>,
    pub written: Vec<PathBuf>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The portal listed no new license; no file was touched.
    UpToDate { total_licenses: usize },
    Updated(UpdateSummary),
}

/// Runs one full update: load the cached workbooks, log in through `connect`,
/// reconcile the listing, download geometry and write all four workbooks.
///
/// Nothing is written unless every fatal step succeeded.
#[instrument(level = "info", skip_all, fields(data = %layout.old_licenses.display()))]
pub fn update_datasets<P, F>(
    layout: &DatasetLayout,
    options: UpdateOptions,
    connect: F,
) -> Result<UpdateOutcome>
where
    P: LicensePortal,
    F: FnOnce() -> Result<P>,
{
    let missing = layout.missing_inputs();
    if !missing.is_empty() {
        return Err(ToolError::MissingInput(missing));
    }

    let snapshot = load_snapshot(layout)?;

    info!("connecting to portal");
    let mut portal = connect()?;

    let fresh = fetch_current_listing(&mut portal, options.show_progress)?;
    let merge = reconcile::merge_entities(&snapshot.licenses, &fresh);
    let retired_licenses = count_retired(&snapshot.licenses, &merge);
    info!(
        added = merge.added.len(),
        retired = retired_licenses,
        "reconciled license listing"
    );

    let targets = coordinate_targets(&merge, &snapshot, options.coordinate_targets);
    if !merge.has_additions() && targets.is_empty() {
        info!("no new licenses; leaving workbooks untouched");
        return Ok(UpdateOutcome::UpToDate {
            total_licenses: merge.licenses.len(),
        });
    }

    let (payloads, failures) = fetch_geometries(&mut portal, &targets, options.show_progress);
    let coordinates = reconcile::merge_coordinates(&snapshot.coordinates, &payloads);
    let points_added: usize = payloads.iter().map(|payload| payload.ring.len()).sum();

    let next = DatasetSnapshot {
        licenses: merge.licenses,
        coordinates,
    };
    let written = save_snapshot(layout, &next)?;

    Ok(UpdateOutcome::Updated(UpdateSummary {
        total_licenses: next.licenses.len(),
        added_licenses: merge.added.len(),
        retired_licenses,
        points_added,
        failures,
        written,
    }))
}

/// Loads both cached workbooks.
#[instrument(level = "debug", skip_all)]
pub fn load_snapshot(layout: &DatasetLayout) -> Result<DatasetSnapshot> {
    let licenses = excel_read::read_licenses(&layout.old_licenses)?;
    let coordinates = excel_read::read_coordinates(&layout.old_coordinates)?;
    info!(
        licenses = licenses.len(),
        points = coordinates.len(),
        "loaded cached datasets"
    );
    Ok(DatasetSnapshot {
        licenses,
        coordinates,
    })
}

/// Downloads and parses the complete listing. The first failing page aborts.
pub fn fetch_current_listing<P: LicensePortal + ?Sized>(
    portal: &mut P,
    show_progress: bool,
) -> Result<Vec<LicenseRecord>> {
    let total = portal.entity_count()?;
    info!(total, "portal reports valid licenses");

    let pages = ListingPages::new(portal, total);
    let progress = Progress::bar(pages.pages(), "Fetching licences", show_progress);
    let mut rows = Vec::new();
    for page in pages {
        rows.extend(page?);
        progress.inc(1);
    }
    progress.finish();

    debug!(rows = rows.len(), "listing downloaded");
    reconcile::parse_listing(&rows)
}

/// Downloads geometry for each target one at a time. Per-license failures are
/// collected instead of aborting the run.
pub fn fetch_geometries<P: LicensePortal + ?Sized>(
    portal: &mut P,
    targets: &[LicenseRecord],
    show_progress: bool,
) -> (Vec<GeometryPayload>, Vec<GeometryFailure>) {
    let progress = Progress::bar(targets.len() as u64, "Fetching coordinates", show_progress);
    let mut payloads = Vec::with_capacity(targets.len());
    let mut failures = Vec::new();

    for license in targets {
        match portal.entity_geometry(license.id) {
            Ok(payload) => {
                if payload.license_id != license.id {
                    warn!(
                        requested = license.id,
                        received = payload.license_id,
                        "detail page reported a different license id"
                    );
                }
                payloads.push(payload);
            }
            Err(error) => {
                warn!(license = license.id, %error, "geometry download failed");
                failures.push(GeometryFailure {
                    license_id: license.id,
                    reason: error.to_string(),
                });
            }
        }
        progress.inc(1);
    }
    progress.finish();

    (payloads, failures)
}

/// Writes the snapshot to the current and the old workbook pair.
#[instrument(level = "debug", skip_all)]
pub fn save_snapshot(layout: &DatasetLayout, snapshot: &DatasetSnapshot) -> Result<Vec<PathBuf>> {
    let targets = [
        (&layout.licenses, &layout.coordinates),
        (&layout.old_licenses, &layout.old_coordinates),
    ];

    let mut written = Vec::with_capacity(4);
    for (licenses_path, coordinates_path) in targets {
        excel_write::write_licenses(licenses_path, &snapshot.licenses)?;
        written.push(licenses_path.clone());
        excel_write::write_coordinates(coordinates_path, &snapshot.coordinates)?;
        written.push(coordinates_path.clone());
    }

    info!(files = written.len(), "saved workbooks");
    Ok(written)
}

fn coordinate_targets(
    merge: &EntityMerge,
    snapshot: &DatasetSnapshot,
    policy: CoordinateTargets,
) -> Vec<LicenseRecord> {
    let mut targets = merge.added.clone();
    if policy == CoordinateTargets::MissingCoordinates {
        let mut seen: HashSet<LicenseId> = targets.iter().map(|license| license.id).collect();
        let gaps = reconcile::licenses_missing_coordinates(&merge.licenses, &snapshot.coordinates);
        targets.extend(gaps.into_iter().filter(|license| seen.insert(license.id)));
    }
    targets
}

fn count_retired(old: &[LicenseRecord], merge: &EntityMerge) -> usize {
    let previously_active: HashSet<LicenseId> = old
        .iter()
        .filter(|license| !license.is_not_valid())
        .map(|license| license.id)
        .collect();
    merge
        .licenses
        .iter()
        .filter(|license| license.is_not_valid() && previously_active.contains(&license.id))
        .count()
}
