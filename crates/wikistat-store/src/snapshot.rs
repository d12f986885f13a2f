//! Parquet snapshots of a dataset, published with atomic tmp → rename
//!
//! File layout: one non-null integer column per variable holding its cells in
//! row-major order (time slowest, rank fastest). Axes, attributes and the
//! processed ledger travel as JSON in the Arrow schema metadata, so the file
//! is self-describing.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use wikistat_core::MergeError;

use crate::axis::Axis;
use crate::dataset::{Dataset, Values};
use crate::ledger::ProcessedLedger;

pub const FORMAT_VERSION: &str = "1";

const META_VERSION: &str = "wikistat.format_version";
const META_AXES: &str = "wikistat.axes";
const META_ATTRS: &str = "wikistat.attrs";
const META_PROCESSED: &str = "wikistat.processed";

/// Rows per record batch and row group.
const ROWS_PER_BATCH: usize = 1024 * 1024;

fn store_err(context: &str, e: impl std::fmt::Display) -> MergeError {
    MergeError::Store(format!("{context}: {e}"))
}

/// Sibling temporary path: `edits__en.wikipedia.parquet` → `edits__en.wikipedia.parquet.tmp`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn schema_for(ds: &Dataset) -> Result<Schema, MergeError> {
    let fields: Vec<Field> = ds
        .variables()
        .map(|(name, values)| {
            let dtype = match values {
                Values::Int64(_) => DataType::Int64,
                Values::Int32(_) => DataType::Int32,
            };
            Field::new(name, dtype, false)
        })
        .collect();

    let json = |e: serde_json::Error| store_err("metadata serialization", e);
    let metadata = HashMap::from([
        (META_VERSION.to_string(), FORMAT_VERSION.to_string()),
        (META_AXES.to_string(), serde_json::to_string(ds.axes()).map_err(json)?),
        (META_ATTRS.to_string(), serde_json::to_string(ds.attrs()).map_err(json)?),
        (
            META_PROCESSED.to_string(),
            serde_json::to_string(ds.processed()).map_err(json)?,
        ),
    ]);
    Ok(Schema::new_with_metadata(fields, metadata))
}

fn column_slice(values: &Values, start: usize, end: usize) -> ArrayRef {
    match values {
        Values::Int64(v) => Arc::new(Int64Array::from(v[start..end].to_vec())),
        Values::Int32(v) => Arc::new(Int32Array::from(v[start..end].to_vec())),
    }
}

/// A fully written snapshot waiting to be published.
///
/// Until [`StagedSnapshot::commit`] runs, the destination still holds the
/// previous snapshot (or nothing).
#[derive(Debug)]
#[must_use = "a staged snapshot is invisible until committed"]
pub struct StagedSnapshot {
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl StagedSnapshot {
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Atomically rename tmp → final.
    pub fn commit(self) -> Result<PathBuf, MergeError> {
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path)
    }
}

/// Write the whole dataset to the sibling tmp file and fsync it.
pub fn stage(ds: &Dataset, path: &Path, zstd_level: i32) -> Result<StagedSnapshot, MergeError> {
    if ds.variables().next().is_none() {
        return Err(MergeError::Store(format!(
            "refusing to write {} without variables",
            path.display()
        )));
    }
    let tmp = tmp_path(path);
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    let schema = Arc::new(schema_for(ds)?);
    let level = ZstdLevel::try_new(zstd_level).map_err(|e| store_err("zstd level", e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(level))
        .set_max_row_group_size(ROWS_PER_BATCH)
        .build();

    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
        .map_err(|e| store_err("parquet writer", e))?;

    let cells = ds.cell_count();
    let mut start = 0;
    while start < cells {
        let end = (start + ROWS_PER_BATCH).min(cells);
        let columns: Vec<ArrayRef> = ds
            .variables()
            .map(|(_, values)| column_slice(values, start, end))
            .collect();
        let batch = RecordBatch::try_new(schema.clone(), columns)
            .map_err(|e| store_err("record batch", e))?;
        writer
            .write(&batch)
            .map_err(|e| store_err("parquet write", e))?;
        start = end;
    }
    writer.close().map_err(|e| store_err("parquet close", e))?;
    File::open(&tmp)?.sync_all()?;

    Ok(StagedSnapshot {
        tmp_path: tmp,
        final_path: path.to_path_buf(),
    })
}

/// Serialize to a temporary path and atomically rename over `path`.
pub fn checkpoint(ds: &Dataset, path: &Path, zstd_level: i32) -> Result<(), MergeError> {
    let published = stage(ds, path, zstd_level)?.commit()?;
    log::debug!(
        "checkpoint {} ({} processed keys)",
        published.display(),
        ds.processed().len()
    );
    Ok(())
}

fn metadata_json<T: serde::de::DeserializeOwned>(
    meta: &HashMap<String, String>,
    key: &str,
) -> Result<T, MergeError> {
    let raw = meta
        .get(key)
        .ok_or_else(|| MergeError::Store(format!("snapshot metadata lacks {key}")))?;
    serde_json::from_str(raw).map_err(|e| store_err(key, e))
}

/// Read a snapshot back into memory.
pub fn open(path: &Path) -> Result<Dataset, MergeError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| store_err(&path.display().to_string(), e))?;
    let schema = builder.schema().clone();
    let meta = schema.metadata();

    match meta.get(META_VERSION) {
        Some(v) if v == FORMAT_VERSION => {}
        other => {
            return Err(MergeError::Store(format!(
                "{}: unsupported format version {other:?}",
                path.display()
            )));
        }
    }
    let axes: Vec<Axis> = metadata_json(meta, META_AXES)?;
    let attrs: BTreeMap<String, String> = metadata_json(meta, META_ATTRS)?;
    let processed: ProcessedLedger = metadata_json(meta, META_PROCESSED)?;

    let cells: usize = axes.iter().map(Axis::len).product();
    let mut columns: Vec<(String, Values)> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let values = match field.data_type() {
            DataType::Int64 => Values::Int64(Vec::with_capacity(cells)),
            DataType::Int32 => Values::Int32(Vec::with_capacity(cells)),
            other => {
                return Err(MergeError::Store(format!(
                    "column {} has unsupported type {other}",
                    field.name()
                )));
            }
        };
        columns.push((field.name().clone(), values));
    }

    let reader = builder
        .with_batch_size(ROWS_PER_BATCH)
        .build()
        .map_err(|e| store_err("parquet reader", e))?;
    for batch in reader {
        let batch = batch.map_err(|e| store_err("parquet read", e))?;
        for (i, (name, values)) in columns.iter_mut().enumerate() {
            let column = batch.column(i).as_any();
            let ok = match values {
                Values::Int64(v) => column
                    .downcast_ref::<Int64Array>()
                    .map(|a| v.extend_from_slice(a.values())),
                Values::Int32(v) => column
                    .downcast_ref::<Int32Array>()
                    .map(|a| v.extend_from_slice(a.values())),
            };
            if ok.is_none() {
                return Err(MergeError::Store(format!("column {name} changed type mid-file")));
            }
        }
    }

    Dataset::from_parts(axes, columns.into_iter().collect(), attrs, processed)
}

/// Remove stale `.tmp` files left by an interrupted checkpoint.
pub fn cleanup_tmp_files(output_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Published snapshots in `output_dir`, sorted by name.
pub fn list_snapshots(output_dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    let pattern = output_dir.join("*.parquet");
    let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| store_err("glob", e))?
        .filter_map(|e| e.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tmp_path_is_sibling() {
        let p = Path::new("/data/edits__en.wikipedia.parquet");
        assert_eq!(tmp_path(p), Path::new("/data/edits__en.wikipedia.parquet.tmp"));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = open(&dir.path().join("nope.parquet")).unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn open_garbage_is_store_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.parquet");
        std::fs::write(&path, b"this is not parquet").unwrap();
        assert_eq!(open(&path).unwrap_err().kind(), "store");
    }

    #[test]
    fn cleanup_tmp_files_removes_only_tmp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.parquet.tmp"), b"stale").unwrap();
        std::fs::write(dir.path().join("b.parquet"), b"keep").unwrap();

        assert_eq!(cleanup_tmp_files(dir.path()).unwrap(), 1);
        assert!(!dir.path().join("a.parquet.tmp").exists());
        assert!(dir.path().join("b.parquet").exists());
    }

    #[test]
    fn list_snapshots_skips_tmp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.parquet"), b"").unwrap();
        std::fs::write(dir.path().join("a.parquet"), b"").unwrap();
        std::fs::write(dir.path().join("c.parquet.tmp"), b"").unwrap();
        let names: Vec<_> = list_snapshots(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.parquet", "b.parquet"]);
    }
}
