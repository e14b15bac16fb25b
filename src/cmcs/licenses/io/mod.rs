pub mod excel_read;
pub mod excel_write;

use std::path::{Path, PathBuf};

/// Cached licenses workbook, read at start and rewritten for the next run.
pub const OLD_LICENSES_FILE: &str = "old_valid_licences.xlsx";
/// Cached coordinates workbook, read at start and rewritten for the next run.
pub const OLD_COORDINATES_FILE: &str = "old_valid_licence_coordinates.xlsx";
/// Current licenses workbook handed to downstream consumers.
pub const LICENSES_FILE: &str = "valid_licences.xlsx";
/// Current coordinates workbook handed to downstream consumers.
pub const COORDINATES_FILE: &str = "valid_licence_coordinates.xlsx";

/// Locations of the four workbooks inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub old_licenses: PathBuf,
    pub old_coordinates: PathBuf,
    pub licenses: PathBuf,
    pub coordinates: PathBuf,
}

impl DatasetLayout {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            old_licenses: dir.join(OLD_LICENSES_FILE),
            old_coordinates: dir.join(OLD_COORDINATES_FILE),
            licenses: dir.join(LICENSES_FILE),
            coordinates: dir.join(COORDINATES_FILE),
        }
    }

    /// Input workbooks that do not exist yet.
    pub fn missing_inputs(&self) -> Vec<PathBuf> {
        [&self.old_licenses, &self.old_coordinates]
            .into_iter()
            .filter(|path| !path.exists())
            .cloned()
            .collect()
    }
}
