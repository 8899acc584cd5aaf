use crate::error::{Result, TraceError};
use crate::models::{Block, TraceType, Ufs};
use crate::output::parquet::ColumnarRecord;
use crate::output::reader::open_parquet;
use crate::utils::FilterOptions;
use csv::Writer;
use log::info;
use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
use std::fs::File;
use std::path::Path;

/// Result of converting one Parquet artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvExport {
    pub family: TraceType,
    pub rows_read: u64,
    pub rows_written: u64,
}

/// CSV file name for a source artifact: `<prefix>_<stem>.csv` or `<stem>.csv`.
pub fn csv_file_name(source_key: &str, prefix: Option<&str>) -> String {
    let file_name = source_key.rsplit('/').next().unwrap_or(source_key);
    let stem = file_name.strip_suffix(".parquet").unwrap_or(file_name);
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}_{stem}.csv"),
        None => format!("{stem}.csv"),
    }
}

/// Convert a Parquet artifact to CSV, keeping column and row order.
pub fn parquet_to_csv(parquet_path: &Path, csv_path: &Path, filter: &FilterOptions) -> Result<CsvExport> {
    let (family, reader) = open_parquet(parquet_path)?;
    let export = match family {
        TraceType::Ufs => write_rows::<Ufs>(reader, csv_path, filter)?,
        TraceType::Block => write_rows::<Block>(reader, csv_path, filter)?,
    };
    info!(
        "CSV written: {} ({} of {} {} rows)",
        csv_path.display(),
        export.rows_written,
        export.rows_read,
        family
    );
    Ok(export)
}

fn write_rows<T: ColumnarRecord>(
    reader: ParquetRecordBatchReader,
    csv_path: &Path,
    filter: &FilterOptions,
) -> Result<CsvExport> {
    let file = File::create(csv_path)?;
    let mut writer = Writer::from_writer(file);

    let schema = T::schema();
    writer.write_record(schema.fields().iter().map(|f| f.name().as_str()))?;

    let mut rows_read = 0u64;
    let mut rows_written = 0u64;
    for batch in reader {
        let rows = T::from_batch(&batch?)?;
        rows_read += rows.len() as u64;
        for row in rows.iter().filter(|r| filter.matches(*r)) {
            writer.write_record(row.csv_row())?;
            rows_written += 1;
        }
    }

    writer
        .flush()
        .map_err(|e| TraceError::ConversionFailure(format!("CSV flush failed: {e}")))?;

    Ok(CsvExport {
        family: T::FAMILY,
        rows_read,
        rows_written,
    })
}
