/// Error type for the migrastep crate.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("{0}")]
    Rusqlite(rusqlite::Error),
    /// The step catalog is malformed (duplicate, out of order, below the floor...).
    #[error("{0}")]
    Registration(String),
    /// A step found the database in a state it cannot migrate from.
    #[error("{0}")]
    Precondition(String),
    #[error("Error during processing of row: {row}")]
    RowProcessing {
        row: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Column {index} ('{column}') is null but a value is required")]
    UnexpectedNull { index: usize, column: String },
    #[error("Invalid column index {0}, columns are numbered from 1")]
    InvalidColumnIndex(usize),
    #[error("Invalid parameter index {index}, statement has {count} parameter(s)")]
    InvalidParameterIndex { index: usize, count: usize },
    #[error("Parameter {0} is not bound")]
    UnboundParameter(usize),
    #[error("Unsupported update index: {0}")]
    UnsupportedTemplateIndex(usize),
    /// A DDL builder was given an invalid table, column or index definition.
    #[error("{0}")]
    InvalidDefinition(String),
    #[error("{0}")]
    IllegalState(String),
    /// The persisted version table disagrees with the registered steps.
    #[error("{0}")]
    VersionTable(String),
    #[error("Migration step {version} ('{description}') failed: {source}")]
    StepFailed {
        version: u32,
        description: String,
        #[source]
        source: Box<Error>,
    },
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Shorthand for failing a step whose expected reference data is missing.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// The error at the bottom of any row or step wrapping.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::RowProcessing { source, .. } | Self::StepFailed { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}
