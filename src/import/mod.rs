//! Bulk import of legacy fleet databases.
//!
//! An uploaded SQLite file goes through the following pipeline:
//!
//! 1. **Loading** (`loader`, `schema`) - restores the file into an in-memory engine and discovers its tables
//! 2. **Mapping** (`mapping`) - declarative source → target table descriptions
//! 3. **Ordering** (`resolver`) - dependency order for the selected tables
//! 4. **Transformation** (`transform`) - per-row value rules and foreign-key resolution
//! 5. **Execution** (`executor`) - batched writes into a [`crate::store::TargetStore`]
//! 6. **Reporting** (`progress`) - live progress and the terminal result
//!
//! Foreign keys are rebuilt through a run-scoped [`IdentifierCache`] that the
//! executor threads through every table; nothing is shared between runs.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use fleet_import::import::{BulkImporter, EmbeddedDatabase, ImportJob, MappingRegistry};
//! use fleet_import::store::MemoryStore;
//! use std::sync::Arc;
//!
//! let source = Arc::new(EmbeddedDatabase::open("legacy.db".as_ref())?);
//! let importer = BulkImporter::new(Arc::new(MemoryStore::new()), Arc::new(MappingRegistry::builtin()));
//!
//! let result = importer
//!     .run(source, &["cars".into(), "rentals".into()], &ImportJob::new())
//!     .await;
//!
//! println!("{}", result.message);
//! ```

pub mod cache;
pub mod executor;
pub mod loader;
pub mod mapping;
pub mod progress;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod transform;

pub use cache::{CacheKind, IdentifierCache, NaturalKey};
pub use executor::{BulkImporter, IMPORT_BATCH_SIZE};
pub use loader::{EmbeddedDatabase, LoaderError, SourceRow};
pub use mapping::{MappingError, MappingRegistry, TableMapping};
pub use progress::{ImportJob, ImportProgress, ImportResult, TableImportDetail, TableStatus};
pub use resolver::{ImportOrder, resolve_import_order};
pub use session::{ImportStage, UploadRegistry, UploadSession};
pub use transform::{RejectReason, RowOutcome, ValueTransform, transform_row};
