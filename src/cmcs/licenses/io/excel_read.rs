use std::collections::HashMap;
use std::path::Path;

use calamine::{DataType, Reader, Xlsx, open_workbook};
use tracing::debug;

use crate::cmcs::licenses::error::{Result, ToolError};
use crate::cmcs::licenses::model::{
    COORDINATE_COLUMNS, CoordinatePoint, LICENSE_COLUMNS, LicenseRecord,
};

/// Reads the licenses table from the first sheet of the workbook at `path`.
pub fn read_licenses(path: &Path) -> Result<Vec<LicenseRecord>> {
    read_table(path, &LICENSE_COLUMNS, |row| {
        Ok(LicenseRecord {
            object_id: row.integer("OBJECTID")?,
            id: row.integer("ID")?,
            code: row.text("Code"),
            name: row.text("Name"),
            license_type: row.text("Type"),
            status: row.text("Status"),
            holder: row.text("Holder"),
            area: row.float("Area")?,
        })
    })
    .map_err(|error| ToolError::dataset(path, error))
}

/// Reads the coordinates table from the first sheet of the workbook at `path`.
pub fn read_coordinates(path: &Path) -> Result<Vec<CoordinatePoint>> {
    read_table(path, &COORDINATE_COLUMNS, |row| {
        Ok(CoordinatePoint {
            license_id: row.integer("ID")?,
            point: row.integer("Point")?,
            longitude: row.float("Longitude")?,
            latitude: row.float("Latitude")?,
        })
    })
    .map_err(|error| ToolError::dataset(path, error))
}

fn read_table<T>(
    path: &Path,
    columns: &[&str],
    mut parse: impl FnMut(&SheetRow<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ToolError::InvalidWorkbook("workbook has no sheets".into()))?;
    let range = read_required_sheet(&mut workbook, &sheet)?;

    let mut rows = range.rows();
    let header: HashMap<String, usize> = match rows.next() {
        Some(first_row) => first_row
            .iter()
            .enumerate()
            .map(|(index, cell)| (cell_to_string(Some(cell)).trim().to_string(), index))
            .collect(),
        None => HashMap::new(),
    };

    let mut positions = HashMap::new();
    for column in columns {
        let index = header.get(*column).copied().ok_or_else(|| {
            ToolError::InvalidWorkbook(format!("sheet '{sheet}' is missing column '{column}'"))
        })?;
        positions.insert(*column, index);
    }

    let mut records = Vec::new();
    for cells in rows {
        if cells.iter().all(|cell| matches!(cell, DataType::Empty)) {
            continue;
        }
        let row = SheetRow {
            cells,
            positions: &positions,
        };
        records.push(parse(&row)?);
    }

    debug!(path = %path.display(), rows = records.len(), "read workbook table");
    Ok(records)
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<calamine::Range<DataType>> {
    let range_result = workbook
        .worksheet_range(name)
        .ok_or_else(|| ToolError::InvalidWorkbook(format!("missing sheet '{name}'")))?;
    let range = range_result.map_err(ToolError::from)?;
    Ok(range)
}

/// A data row addressed by column name.
struct SheetRow<'a> {
    cells: &'a [DataType],
    positions: &'a HashMap<&'a str, usize>,
}

impl SheetRow<'_> {
    fn cell(&self, column: &str) -> Option<&DataType> {
        self.positions
            .get(column)
            .and_then(|index| self.cells.get(*index))
    }

    fn text(&self, column: &str) -> String {
        cell_to_string(self.cell(column))
    }

    fn integer(&self, column: &str) -> Result<i64> {
        let invalid = |value: String| ToolError::InvalidLiteral {
            column: column.to_string(),
            value,
        };
        match self.cell(column) {
            Some(DataType::Int(value)) => Ok(*value),
            Some(DataType::Float(value)) if value.is_finite() && value.fract() == 0.0 => {
                Ok(*value as i64)
            }
            Some(DataType::String(value)) => {
                value.trim().parse().map_err(|_| invalid(value.clone()))
            }
            other => Err(invalid(cell_to_string(other))),
        }
    }

    fn float(&self, column: &str) -> Result<f64> {
        match self.cell(column) {
            Some(DataType::Float(value)) => Ok(*value),
            Some(DataType::Int(value)) => Ok(*value as f64),
            Some(DataType::String(value)) => {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ToolError::InvalidLiteral {
                        column: column.to_string(),
                        value: value.clone(),
                    })
            }
            other => Err(ToolError::InvalidLiteral {
                column: column.to_string(),
                value: cell_to_string(other),
            }),
        }
    }
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
