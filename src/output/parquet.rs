use crate::error::{Result, TraceError};
use crate::models::{Block, LogRecord, TraceItem, TraceType, Ufs};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::{Compression, Encoding, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use rayon::prelude::*;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_PARTITION_ROWS: u64 = 1_000_000;

/// A record family that has a fixed Arrow schema.
pub trait ColumnarRecord: TraceItem + Clone + Send + Sync + Sized + 'static {
    const FAMILY: TraceType;
    /// Rough encoded size of one row, used to pick a compression level.
    const ESTIMATED_ROW_BYTES: usize;

    fn schema() -> SchemaRef;
    fn to_batch(rows: &[Self], schema: SchemaRef) -> std::result::Result<RecordBatch, ArrowError>;
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
    /// Field values in schema order, as written to CSV.
    fn csv_row(&self) -> Vec<String>;
    fn from_record(record: LogRecord) -> Option<Self>;
}

fn field(name: &str, data_type: DataType) -> Field {
    Field::new(name, data_type, false)
}

impl ColumnarRecord for Ufs {
    const FAMILY: TraceType = TraceType::Ufs;
    const ESTIMATED_ROW_BYTES: usize = 200;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            field("time", DataType::Float64),
            field("process", DataType::Utf8),
            field("cpu", DataType::UInt32),
            field("action", DataType::Utf8),
            field("tag", DataType::UInt32),
            field("opcode", DataType::Utf8),
            field("lba", DataType::UInt64),
            field("size", DataType::UInt32),
            field("groupid", DataType::UInt32),
            field("hwqid", DataType::UInt32),
            field("qd", DataType::UInt32),
            field("dtoc", DataType::Float64),
            field("ctoc", DataType::Float64),
            field("ctod", DataType::Float64),
            field("continuous", DataType::Boolean),
            field("aligned", DataType::Boolean),
        ]))
    }

    fn to_batch(rows: &[Self], schema: SchemaRef) -> std::result::Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.time))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.process.as_str()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.cpu))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.action.as_str()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.tag))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.opcode.as_str()))),
            Arc::new(UInt64Array::from_iter_values(rows.iter().map(|t| t.lba))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.size))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.groupid))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.hwqid))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.qd))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.dtoc))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.ctoc))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.ctod))),
            Arc::new(BooleanArray::from(
                rows.iter().map(|t| t.continuous).collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                rows.iter().map(|t| t.aligned).collect::<Vec<_>>(),
            )),
        ];
        RecordBatch::try_new(schema, columns)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        super::reader::ufs_from_batch(batch)
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.time.to_string(),
            self.process.clone(),
            self.cpu.to_string(),
            self.action.clone(),
            self.tag.to_string(),
            self.opcode.clone(),
            self.lba.to_string(),
            self.size.to_string(),
            self.groupid.to_string(),
            self.hwqid.to_string(),
            self.qd.to_string(),
            self.dtoc.to_string(),
            self.ctoc.to_string(),
            self.ctod.to_string(),
            self.continuous.to_string(),
            self.aligned.to_string(),
        ]
    }

    fn from_record(record: LogRecord) -> Option<Self> {
        match record {
            LogRecord::Ufs(ufs) => Some(ufs),
            LogRecord::Block(_) => None,
        }
    }
}

impl ColumnarRecord for Block {
    const FAMILY: TraceType = TraceType::Block;
    const ESTIMATED_ROW_BYTES: usize = 250;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            field("time", DataType::Float64),
            field("process", DataType::Utf8),
            field("cpu", DataType::UInt32),
            field("flags", DataType::Utf8),
            field("action", DataType::Utf8),
            field("devmajor", DataType::UInt32),
            field("devminor", DataType::UInt32),
            field("io_type", DataType::Utf8),
            field("extra", DataType::UInt32),
            field("sector", DataType::UInt64),
            field("size", DataType::UInt32),
            field("comm", DataType::Utf8),
            field("qd", DataType::UInt32),
            field("dtoc", DataType::Float64),
            field("ctoc", DataType::Float64),
            field("ctod", DataType::Float64),
            field("continuous", DataType::Boolean),
            field("aligned", DataType::Boolean),
        ]))
    }

    fn to_batch(rows: &[Self], schema: SchemaRef) -> std::result::Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.time))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.process.as_str()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.cpu))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.flags.as_str()))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.action.as_str()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.devmajor))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.devminor))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.io_type.as_str()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.extra))),
            Arc::new(UInt64Array::from_iter_values(rows.iter().map(|t| t.sector))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.size))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|t| t.comm.as_str()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|t| t.qd))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.dtoc))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.ctoc))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|t| t.ctod))),
            Arc::new(BooleanArray::from(
                rows.iter().map(|t| t.continuous).collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                rows.iter().map(|t| t.aligned).collect::<Vec<_>>(),
            )),
        ];
        RecordBatch::try_new(schema, columns)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        super::reader::block_from_batch(batch)
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.time.to_string(),
            self.process.clone(),
            self.cpu.to_string(),
            self.flags.clone(),
            self.action.clone(),
            self.devmajor.to_string(),
            self.devminor.to_string(),
            self.io_type.clone(),
            self.extra.to_string(),
            self.sector.to_string(),
            self.size.to_string(),
            self.comm.clone(),
            self.qd.to_string(),
            self.dtoc.to_string(),
            self.ctoc.to_string(),
            self.ctod.to_string(),
            self.continuous.to_string(),
            self.aligned.to_string(),
        ]
    }

    fn from_record(record: LogRecord) -> Option<Self> {
        match record {
            LogRecord::Block(block) => Some(block),
            LogRecord::Ufs(_) => None,
        }
    }
}

// 데이터 크기에 따라 압축 알고리즘 선택
pub fn select_compression(data_size: usize) -> Compression {
    let zstd = |level| ZstdLevel::try_new(level).map(Compression::ZSTD).unwrap_or(Compression::SNAPPY);
    match data_size {
        // < 1MB: SNAPPY (속도 우선)
        n if n < 1024 * 1024 => Compression::SNAPPY,
        n if n < 10 * 1024 * 1024 => zstd(3),
        n if n < 100 * 1024 * 1024 => zstd(6),
        _ => zstd(9),
    }
}

fn writer_properties(compression: Compression) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(compression)
        .set_encoding(Encoding::PLAIN)
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_max_row_group_size(1_000_000)
        .build()
}

/// One finished local partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionFile {
    pub path: PathBuf,
    pub rows: u64,
}

/// Object keys for the partitions of one job, in partition order.
///
/// A single partition is `<target>/<family>.parquet`; several are numbered
/// `<target>/<family>_part0000.parquet`, `..._part0001.parquet`, ...
pub fn remote_partition_names(target_path: &str, family: TraceType, count: usize) -> Vec<String> {
    let stem = family.file_stem();
    let names: Vec<String> = if count == 1 {
        vec![format!("{stem}.parquet")]
    } else {
        (0..count).map(|i| format!("{stem}_part{i:04}.parquet")).collect()
    };
    names
        .into_iter()
        .map(|name| join_key(target_path, &name))
        .collect()
}

/// Join an object-store prefix and a file name with exactly one `/`.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

struct OpenPartition {
    writer: ArrowWriter<File>,
    path: PathBuf,
    rows: u64,
}

/// Streams records of one family into size-bounded local Parquet files.
///
/// Rows are encoded into Arrow batches in parallel and appended in order. A
/// new file is started whenever the current one holds `partition_rows` rows.
pub struct ParquetPartitionWriter<T: ColumnarRecord> {
    dir: PathBuf,
    partition_rows: u64,
    batch_rows: usize,
    schema: SchemaRef,
    props: WriterProperties,
    current: Option<OpenPartition>,
    finished: Vec<PartitionFile>,
    total_rows: u64,
    _family: PhantomData<T>,
}

impl<T: ColumnarRecord> ParquetPartitionWriter<T> {
    /// `size_hint` is the expected input size in bytes; it only steers compression.
    pub fn new(dir: &Path, partition_rows: u64, batch_rows: usize, size_hint: usize) -> Self {
        let partition_rows = partition_rows.max(1);
        let partition_bytes = (partition_rows as usize).saturating_mul(T::ESTIMATED_ROW_BYTES);
        let compression = select_compression(size_hint.min(partition_bytes));
        debug!(
            "{} parquet writer: partition_rows={partition_rows}, compression={compression:?}",
            T::FAMILY
        );

        ParquetPartitionWriter {
            dir: dir.to_path_buf(),
            partition_rows,
            batch_rows: batch_rows.max(1),
            schema: T::schema(),
            props: writer_properties(compression),
            current: None,
            finished: Vec::new(),
            total_rows: 0,
            _family: PhantomData,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.total_rows
    }

    fn open_partition(&mut self) -> Result<OpenPartition> {
        let index = self.finished.len();
        let path = self
            .dir
            .join(format!("{}_part{index:04}.parquet", T::FAMILY.file_stem()));
        let file = File::create(&path)?;
        let writer = ArrowWriter::try_new(file, self.schema.clone(), Some(self.props.clone()))?;
        Ok(OpenPartition {
            writer,
            path,
            rows: 0,
        })
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(part) = self.current.take() {
            part.writer.close()?;
            info!("Parquet partition written: {} ({} rows)", part.path.display(), part.rows);
            self.finished.push(PartitionFile {
                path: part.path,
                rows: part.rows,
            });
        }
        Ok(())
    }

    /// Append rows in order, rolling over to a new partition as needed.
    pub fn write(&mut self, rows: &[T]) -> Result<()> {
        let mut remaining = rows;
        while !remaining.is_empty() {
            if self.current.is_none() {
                self.current = Some(self.open_partition()?);
            }
            let room = match &self.current {
                Some(part) => (self.partition_rows - part.rows) as usize,
                None => 0,
            };
            let take = room.min(remaining.len());
            let (head, tail) = remaining.split_at(take);

            // 병렬로 배치 인코딩, 파일 쓰기는 순차
            let schema = self.schema.clone();
            let batches = head
                .par_chunks(self.batch_rows)
                .map(|chunk| T::to_batch(chunk, schema.clone()))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let full = match self.current.as_mut() {
                Some(part) => {
                    for batch in &batches {
                        part.writer.write(batch)?;
                    }
                    part.rows += head.len() as u64;
                    part.rows >= self.partition_rows
                }
                None => return Err(TraceError::Internal("no open parquet partition".into())),
            };
            self.total_rows += head.len() as u64;
            if full {
                self.close_current()?;
            }
            remaining = tail;
        }
        Ok(())
    }

    /// Flush the open partition and return every partition in creation order.
    /// With no rows at all a single schema-only file is produced.
    pub fn finish(mut self) -> Result<Vec<PartitionFile>> {
        let start = Instant::now();
        if self.current.is_none() && self.finished.is_empty() {
            self.current = Some(self.open_partition()?);
        }
        self.close_current()?;
        info!(
            "{} parquet output finalized: {} partitions, {} rows in {:.2}s",
            T::FAMILY,
            self.finished.len(),
            self.total_rows,
            start.elapsed().as_secs_f64()
        );
        Ok(self.finished)
    }
}
