pub mod error;
pub mod metadata;
pub mod table;
pub mod validation;

pub use error::{RecordingError, RecordingResult};
pub use metadata::SchemaMetadata;
pub use table::{ResultTable, TableContents};
pub use validation::{ExitCategory, RowError, ValidationOptions, ValidationReport};
