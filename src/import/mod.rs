pub mod execute;
pub mod report;
pub mod restore;
pub mod rows;
pub mod source;
pub mod validator;
pub mod whitelist;

pub use execute::{execute_import, ExecutionError, ExecutionSummary};
pub use report::{ImportJob, ImportReport, TableCounts};
pub use restore::restore_text_dump;
pub use source::{EmbeddedSource, SourceRow, SourceValue};
pub use validator::{validate_source, SchemaViolation, ValidatedSource, ValidatedTable};
pub use whitelist::{TableKind, IMPORT_ORDER};
