//! Data ingestion, partitioning and persistence
//!
//! - [`Lakehouse`] reads and writes versioned Parquet tables under `Tables/`
//! - [`RecordTable`] is the typed feature/label view the estimators consume
//! - [`three_way_split`] produces the seeded train/validation/test partitions

mod lakehouse;
mod table;
mod split;
pub mod sample;

pub use lakehouse::{Lakehouse, TableCommit, WriteMode, load_file};
pub use table::{RecordTable, columns_to_array2};
pub use split::{DataSplit, three_way_split, train_test_split_indices};
