use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Table, Workbook, Worksheet};
use tracing::debug;

use crate::cmcs::licenses::error::{Result, ToolError};
use crate::cmcs::licenses::model::{
    COORDINATE_COLUMNS, CoordinatePoint, LICENSE_COLUMNS, LicenseRecord,
};

const LICENSES_SHEET: &str = "licences";
const COORDINATES_SHEET: &str = "coordinates";

/// A record that occupies one worksheet row.
trait SheetRecord {
    fn write_row(&self, worksheet: &mut Worksheet, row: u32) -> Result<()>;
}

impl SheetRecord for LicenseRecord {
    fn write_row(&self, worksheet: &mut Worksheet, row: u32) -> Result<()> {
        worksheet.write_number(row, 0, self.object_id as f64)?;
        worksheet.write_number(row, 1, self.id as f64)?;
        worksheet.write_string(row, 2, &self.code)?;
        worksheet.write_string(row, 3, &self.name)?;
        worksheet.write_string(row, 4, &self.license_type)?;
        worksheet.write_string(row, 5, &self.status)?;
        worksheet.write_string(row, 6, &self.holder)?;
        worksheet.write_number(row, 7, self.area)?;
        Ok(())
    }
}

impl SheetRecord for CoordinatePoint {
    fn write_row(&self, worksheet: &mut Worksheet, row: u32) -> Result<()> {
        worksheet.write_number(row, 0, self.license_id as f64)?;
        worksheet.write_number(row, 1, self.point as f64)?;
        worksheet.write_number(row, 2, self.longitude)?;
        worksheet.write_number(row, 3, self.latitude)?;
        Ok(())
    }
}

/// Writes the licenses table to `path`, replacing any existing workbook.
pub fn write_licenses(path: &Path, licenses: &[LicenseRecord]) -> Result<()> {
    write_table(path, LICENSES_SHEET, &LICENSE_COLUMNS, licenses)
        .map_err(|error| ToolError::dataset(path, error))
}

/// Writes the coordinates table to `path`, replacing any existing workbook.
pub fn write_coordinates(path: &Path, points: &[CoordinatePoint]) -> Result<()> {
    write_table(path, COORDINATES_SHEET, &COORDINATE_COLUMNS, points)
        .map_err(|error| ToolError::dataset(path, error))
}

fn write_table<T: SheetRecord>(
    path: &Path,
    sheet_name: &str,
    columns: &[&str],
    records: &[T],
) -> Result<()> {
    let mut workbook_writer = Workbook::new();
    let worksheet = workbook_writer.add_worksheet();
    worksheet.set_name(sheet_name)?;

    for (col_idx, header) in columns.iter().enumerate() {
        worksheet.write_string(0, col_idx as u16, *header)?;
    }

    for (row_idx, record) in records.iter().enumerate() {
        record.write_row(worksheet, (row_idx + 1) as u32)?;
    }

    if !records.is_empty() {
        let mut excel_table = Table::new();
        excel_table.set_autofilter(true);
        let col_end = (columns.len() as u16).saturating_sub(1);
        worksheet.add_table(0, 0, records.len() as u32, col_end, &excel_table)?;
    }

    // Staged next to the target, then renamed over it.
    let staging = staging_path(path);
    if let Err(error) = workbook_writer.save(&staging) {
        let _ = fs::remove_file(&staging);
        return Err(error.into());
    }
    if let Err(error) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(error.into());
    }

    debug!(path = %path.display(), rows = records.len(), "wrote workbook table");
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".partial");
    path.with_file_name(name)
}
