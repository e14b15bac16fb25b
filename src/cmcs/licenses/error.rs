use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type covering the different failure cases that can occur while the
/// tool loads the cached datasets, talks to the portal, or writes results.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or renaming files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when a JSON response body cannot be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when a sheet does not follow the expected column layout.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when a cell cannot be converted into the column's type.
    #[error("invalid literal value '{value}' in column {column}")]
    InvalidLiteral { column: String, value: String },

    /// Wraps any failure that happened while loading or saving a workbook.
    #[error("dataset {}: {source}", .path.display())]
    Dataset {
        path: PathBuf,
        #[source]
        source: Box<ToolError>,
    },

    /// Raised when required input workbooks do not exist.
    #[error("input file not found: {}", display_paths(.0))]
    MissingInput(Vec<PathBuf>),

    /// Raised when the login handshake cannot be completed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Raised for network and HTTP failures.
    #[error("transport error: {0}")]
    Transport(String),

    /// Raised when a listing row does not carry the expected fields.
    #[error("invalid listing row {row}: {reason}")]
    InvalidListingRow { row: usize, reason: String },

    /// Raised when the coordinate literal of one license cannot be recovered.
    #[error("geometry extraction failed for license {license_id}: {reason}")]
    GeometryExtraction { license_id: i64, reason: String },

    /// Raised when no portal credentials were supplied.
    #[error("portal credentials missing: set CMCS_USERNAME and CMCS_PASSWORD or pass --username/--password")]
    MissingCredentials,

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Operator-facing category of a [`ToolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Transport,
    GeometryExtraction,
    DatasetIo,
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Authentication => write!(f, "authentication"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::GeometryExtraction => write!(f, "geometry"),
            ErrorKind::DatasetIo => write!(f, "dataset"),
            ErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

impl ToolError {
    /// Attaches the workbook path to a failure raised by the Excel layer.
    pub fn dataset(path: impl Into<PathBuf>, source: ToolError) -> Self {
        ToolError::Dataset {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::Authentication(_) => ErrorKind::Authentication,
            ToolError::Transport(_) | ToolError::Json(_) | ToolError::InvalidListingRow { .. } => {
                ErrorKind::Transport
            }
            ToolError::GeometryExtraction { .. } => ErrorKind::GeometryExtraction,
            ToolError::Io(_)
            | ToolError::ExcelWrite(_)
            | ToolError::ExcelRead(_)
            | ToolError::InvalidWorkbook(_)
            | ToolError::InvalidLiteral { .. }
            | ToolError::Dataset { .. }
            | ToolError::MissingInput(_) => ErrorKind::DatasetIo,
            ToolError::MissingCredentials | ToolError::Logging(_) => ErrorKind::Configuration,
        }
    }

    /// Short instruction printed under a fatal error.
    pub fn hint(&self) -> &'static str {
        match self {
            ToolError::MissingInput(_) => {
                "Place old_valid_licences.xlsx and old_valid_licence_coordinates.xlsx in the data directory."
            }
            ToolError::Dataset { source, .. } if source.is_write_failure() => {
                "Make sure none of the workbooks are open in Excel and try again."
            }
            ToolError::MissingCredentials => {
                "Export CMCS_USERNAME and CMCS_PASSWORD before running the updater."
            }
            ToolError::Authentication(_) => {
                "Check the portal credentials and that the CMCS login page is reachable."
            }
            _ => match self.kind() {
                ErrorKind::Transport => "Please check your internet connection and try again.",
                ErrorKind::DatasetIo => {
                    "Check that the workbooks exist, are not open in Excel, and keep their column headers."
                }
                ErrorKind::GeometryExtraction => {
                    "The license detail page changed shape; the license is retried on the next run."
                }
                _ => "Re-run with --verbose for details.",
            },
        }
    }

    fn is_write_failure(&self) -> bool {
        matches!(self, ToolError::ExcelWrite(_) | ToolError::Io(_))
    }
}
