//! Lakehouse table storage
//!
//! Tables live under `<root>/Tables/<name>/` as Parquet part files plus a
//! `_log/` directory of JSON commit entries, one per write. Reading resolves
//! the latest commit; older versions stay readable by number.

use crate::error::{KolosalError, Result};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TABLES_DIR: &str = "Tables";
const LOG_DIR: &str = "_log";

/// How a write interacts with the existing table contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the visible contents
    Overwrite,
    /// Add rows to the visible contents
    Append,
}

/// One entry in a table's commit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCommit {
    pub version: u64,
    pub mode: WriteMode,
    /// Part files visible after this commit, relative to the table directory
    pub files: Vec<String>,
    /// Column name and dtype pairs
    pub schema: Vec<(String, String)>,
    pub num_rows: usize,
    pub committed_at: DateTime<Utc>,
}

/// Handle on a lakehouse root directory
#[derive(Debug, Clone)]
pub struct Lakehouse {
    root: PathBuf,
}

impl Lakehouse {
    /// Open a lakehouse rooted at `root`. Nothing is created until a write.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a named table (`<root>/Tables/<name>`)
    pub fn table_path(&self, name: &str) -> PathBuf {
        self.root.join(TABLES_DIR).join(name)
    }

    fn log_dir(&self, name: &str) -> PathBuf {
        self.table_path(name).join(LOG_DIR)
    }

    /// Read the current contents of a table
    pub fn read_table(&self, name: &str) -> Result<DataFrame> {
        let table_dir = self.table_path(name);

        if !table_dir.is_dir() {
            return self.read_loose_file(name);
        }

        let df = match self.history(name)?.last() {
            Some(commit) => self.read_files(&table_dir, &commit.files)?,
            None => {
                let files = list_parquet_files(&table_dir)?;
                if files.is_empty() {
                    return Err(KolosalError::DataError(format!(
                        "table '{}' has no data files",
                        name
                    )));
                }
                self.read_files(&table_dir, &files)?
            }
        };

        info!(table = name, rows = df.height(), cols = df.width(), "read table");
        Ok(df)
    }

    /// Read the contents of a table as of `version`
    pub fn read_table_version(&self, name: &str, version: u64) -> Result<DataFrame> {
        let commit = self
            .history(name)?
            .into_iter()
            .find(|c| c.version == version)
            .ok_or_else(|| {
                KolosalError::DataError(format!("table '{}' has no version {}", name, version))
            })?;
        self.read_files(&self.table_path(name), &commit.files)
    }

    /// Commit log of a table, oldest first. Empty when the table has no log.
    pub fn history(&self, name: &str) -> Result<Vec<TableCommit>> {
        let log_dir = self.log_dir(name);
        if !log_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&log_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
            .collect();
        entries.sort();

        entries
            .iter()
            .map(|path| -> Result<TableCommit> {
                let file = File::open(path)?;
                let commit: TableCommit = serde_json::from_reader(BufReader::new(file))?;
                Ok(commit)
            })
            .collect()
    }

    /// Write a DataFrame as a new table version
    pub fn write_table(&self, name: &str, df: &mut DataFrame, mode: WriteMode) -> Result<TableCommit> {
        let table_dir = self.table_path(name);
        let log_dir = self.log_dir(name);
        fs::create_dir_all(&log_dir)?;

        let history = self.history(name)?;
        let version = history.last().map_or(0, |c| c.version + 1);

        let part_name = format!("part-{:05}-{}.parquet", version, uuid::Uuid::new_v4().simple());
        let part_path = table_dir.join(&part_name);
        let file = File::create(&part_path)?;
        ParquetWriter::new(BufWriter::new(file)).finish(df)?;
        debug!(path = %part_path.display(), "wrote part file");

        let (files, num_rows) = match (mode, history.last()) {
            (WriteMode::Append, Some(prev)) => {
                let mut files = prev.files.clone();
                files.push(part_name);
                (files, prev.num_rows + df.height())
            }
            _ => (vec![part_name], df.height()),
        };

        let commit = TableCommit {
            version,
            mode,
            files,
            schema: df
                .schema()
                .iter()
                .map(|(name, dtype)| (name.to_string(), dtype.to_string()))
                .collect(),
            num_rows,
            committed_at: Utc::now(),
        };

        let log_path = log_dir.join(format!("{:020}.json", version));
        let file = File::create(&log_path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &commit)?;

        info!(table = name, version, rows = commit.num_rows, mode = ?mode, "committed table");
        Ok(commit)
    }

    fn read_files(&self, table_dir: &Path, files: &[String]) -> Result<DataFrame> {
        let mut frames = files.iter().map(|f| -> Result<DataFrame> {
            let file = File::open(table_dir.join(f))?;
            Ok(ParquetReader::new(file).finish()?)
        });

        let mut df: DataFrame = frames
            .next()
            .ok_or_else(|| KolosalError::DataError("commit lists no files".to_string()))??;
        for frame in frames {
            df.vstack_mut(&frame?)?;
        }
        Ok(df)
    }

    /// `Tables/<name>` given directly as a `.csv` or `.parquet` file
    fn read_loose_file(&self, name: &str) -> Result<DataFrame> {
        let base = self.root.join(TABLES_DIR);
        let candidates = [base.join(name), base.join(format!("{}.parquet", name)), base.join(format!("{}.csv", name))];

        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                KolosalError::DataError(format!(
                    "table '{}' not found under {}",
                    name,
                    base.display()
                ))
            })?;

        load_file(path)
    }
}

/// Load a single CSV or Parquet file by extension
pub fn load_file(path: &Path) -> Result<DataFrame> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let df = match ext.as_str() {
        "parquet" | "pq" => ParquetReader::new(File::open(path)?).finish()?,
        "csv" => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        _ => {
            return Err(KolosalError::DataError(format!(
                "unsupported file format: {}",
                path.display()
            )))
        }
    };
    Ok(df)
}

fn list_parquet_files(dir: &Path) -> Result<Vec<String>> {
    let mut files: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "parquet"))
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn frame(offset: i64) -> DataFrame {
        df!(
            "Age" => &[30i64 + offset, 40 + offset, 50 + offset],
            "Balance" => &[1.0, 2.0, 3.0]
        )
        .unwrap()
    }

    #[test]
    fn test_overwrite_then_read() {
        let dir = TempDir::new().unwrap();
        let lake = Lakehouse::open(dir.path());

        lake.write_table("df_test", &mut frame(0), WriteMode::Overwrite).unwrap();
        let commit = lake.write_table("df_test", &mut frame(100), WriteMode::Overwrite).unwrap();
        assert_eq!(commit.version, 1);

        let df = lake.read_table("df_test").unwrap();
        assert_eq!(df.height(), 3);
        let age = df.column("Age").unwrap().as_materialized_series().i64().unwrap().get(0);
        assert_eq!(age, Some(130));

        let old = lake.read_table_version("df_test", 0).unwrap();
        let age = old.column("Age").unwrap().as_materialized_series().i64().unwrap().get(0);
        assert_eq!(age, Some(30));
    }

    #[test]
    fn test_append() {
        let dir = TempDir::new().unwrap();
        let lake = Lakehouse::open(dir.path());

        lake.write_table("t", &mut frame(0), WriteMode::Overwrite).unwrap();
        let commit = lake.write_table("t", &mut frame(1), WriteMode::Append).unwrap();
        assert_eq!(commit.files.len(), 2);
        assert_eq!(lake.read_table("t").unwrap().height(), 6);
        assert_eq!(lake.history("t").unwrap().len(), 2);
    }

    #[test]
    fn test_loose_csv_file() {
        let dir = TempDir::new().unwrap();
        let tables = dir.path().join(TABLES_DIR);
        fs::create_dir_all(&tables).unwrap();
        fs::write(tables.join("df_clean.csv"), "Age,Exited\n30,0\n41,1\n").unwrap();

        let lake = Lakehouse::open(dir.path());
        let df = lake.read_table("df_clean").unwrap();
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn test_missing_table() {
        let dir = TempDir::new().unwrap();
        let lake = Lakehouse::open(dir.path());
        assert!(matches!(lake.read_table("nope"), Err(KolosalError::DataError(_))));
    }
}
