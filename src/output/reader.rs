use crate::error::{Result, TraceError};
use crate::models::{Block, LogRecord, TraceType, Ufs};
use crate::output::parquet::ColumnarRecord;
use arrow::array::{Array, AsArray, BooleanArray, PrimitiveArray, StringArray};
use arrow::datatypes::{ArrowPrimitiveType, Float64Type, Schema, UInt32Type, UInt64Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use std::fs::File;
use std::path::Path;

/// Family of a Parquet artifact, judged by its columns.
pub fn detect_family(schema: &Schema) -> Option<TraceType> {
    let has = |name: &str| schema.field_with_name(name).is_ok();
    if has("lba") && has("opcode") {
        Some(TraceType::Ufs)
    } else if has("sector") && has("io_type") {
        Some(TraceType::Block)
    } else {
        None
    }
}

/// Open a Parquet file for batch reading and report its family.
pub fn open_parquet(path: &Path) -> Result<(TraceType, ParquetRecordBatchReader)> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let family = detect_family(builder.schema()).ok_or_else(|| {
        TraceError::ConversionFailure(format!(
            "{} is neither a UFS nor a block trace artifact",
            path.display()
        ))
    })?;
    Ok((family, builder.build()?))
}

/// Read every row of a Parquet file of a known family.
pub fn read_records<T: ColumnarRecord>(path: &Path) -> Result<Vec<T>> {
    let (family, reader) = open_parquet(path)?;
    if family != T::FAMILY {
        return Err(TraceError::ConversionFailure(format!(
            "{} holds {family} records, expected {}",
            path.display(),
            T::FAMILY
        )));
    }

    let mut results = Vec::new();
    for batch in reader {
        results.extend(T::from_batch(&batch?)?);
    }
    Ok(results)
}

/// Convert one batch of a known family into records.
pub fn batch_to_records(family: TraceType, batch: &RecordBatch) -> Result<Vec<LogRecord>> {
    Ok(match family {
        TraceType::Ufs => ufs_from_batch(batch)?
            .into_iter()
            .map(LogRecord::Ufs)
            .collect(),
        TraceType::Block => block_from_batch(batch)?
            .into_iter()
            .map(LogRecord::Block)
            .collect(),
    })
}

fn missing(name: &str) -> TraceError {
    TraceError::ConversionFailure(format!("column '{name}' is missing or has an unexpected type"))
}

fn primitive<'a, T: ArrowPrimitiveType>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a PrimitiveArray<T>> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_primitive_opt::<T>())
        .ok_or_else(|| missing(name))
}

fn string<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_string_opt::<i32>())
        .ok_or_else(|| missing(name))
}

fn boolean<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a BooleanArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_boolean_opt())
        .ok_or_else(|| missing(name))
}

// aligned 컬럼이 없는 예전 파일은 false로 읽음
fn optional_flag(column: Option<&BooleanArray>, i: usize) -> bool {
    column.map_or(false, |c| c.is_valid(i) && c.value(i))
}

/// RecordBatch를 Ufs 벡터로 변환
pub(crate) fn ufs_from_batch(batch: &RecordBatch) -> Result<Vec<Ufs>> {
    let time = primitive::<Float64Type>(batch, "time")?;
    let process = string(batch, "process")?;
    let cpu = primitive::<UInt32Type>(batch, "cpu")?;
    let action = string(batch, "action")?;
    let tag = primitive::<UInt32Type>(batch, "tag")?;
    let opcode = string(batch, "opcode")?;
    let lba = primitive::<UInt64Type>(batch, "lba")?;
    let size = primitive::<UInt32Type>(batch, "size")?;
    let groupid = primitive::<UInt32Type>(batch, "groupid")?;
    let hwqid = primitive::<UInt32Type>(batch, "hwqid")?;
    let qd = primitive::<UInt32Type>(batch, "qd")?;
    let dtoc = primitive::<Float64Type>(batch, "dtoc")?;
    let ctoc = primitive::<Float64Type>(batch, "ctoc")?;
    let ctod = primitive::<Float64Type>(batch, "ctod")?;
    let continuous = boolean(batch, "continuous")?;
    let aligned = boolean(batch, "aligned").ok();

    Ok((0..batch.num_rows())
        .map(|i| Ufs {
            time: time.value(i),
            process: process.value(i).to_string(),
            cpu: cpu.value(i),
            action: action.value(i).to_string(),
            tag: tag.value(i),
            opcode: opcode.value(i).to_string(),
            lba: lba.value(i),
            size: size.value(i),
            groupid: groupid.value(i),
            hwqid: hwqid.value(i),
            qd: qd.value(i),
            dtoc: dtoc.value(i),
            ctoc: ctoc.value(i),
            ctod: ctod.value(i),
            continuous: continuous.value(i),
            aligned: optional_flag(aligned, i),
        })
        .collect())
}

/// RecordBatch를 Block 벡터로 변환
pub(crate) fn block_from_batch(batch: &RecordBatch) -> Result<Vec<Block>> {
    let time = primitive::<Float64Type>(batch, "time")?;
    let process = string(batch, "process")?;
    let cpu = primitive::<UInt32Type>(batch, "cpu")?;
    let flags = string(batch, "flags")?;
    let action = string(batch, "action")?;
    let devmajor = primitive::<UInt32Type>(batch, "devmajor")?;
    let devminor = primitive::<UInt32Type>(batch, "devminor")?;
    let io_type = string(batch, "io_type")?;
    let extra = primitive::<UInt32Type>(batch, "extra")?;
    let sector = primitive::<UInt64Type>(batch, "sector")?;
    let size = primitive::<UInt32Type>(batch, "size")?;
    let comm = string(batch, "comm")?;
    let qd = primitive::<UInt32Type>(batch, "qd")?;
    let dtoc = primitive::<Float64Type>(batch, "dtoc")?;
    let ctoc = primitive::<Float64Type>(batch, "ctoc")?;
    let ctod = primitive::<Float64Type>(batch, "ctod")?;
    let continuous = boolean(batch, "continuous")?;
    let aligned = boolean(batch, "aligned").ok();

    Ok((0..batch.num_rows())
        .map(|i| Block {
            time: time.value(i),
            process: process.value(i).to_string(),
            cpu: cpu.value(i),
            flags: flags.value(i).to_string(),
            action: action.value(i).to_string(),
            devmajor: devmajor.value(i),
            devminor: devminor.value(i),
            io_type: io_type.value(i).to_string(),
            extra: extra.value(i),
            sector: sector.value(i),
            size: size.value(i),
            comm: comm.value(i).to_string(),
            qd: qd.value(i),
            dtoc: dtoc.value(i),
            ctoc: ctoc.value(i),
            ctod: ctod.value(i),
            continuous: continuous.value(i),
            aligned: optional_flag(aligned, i),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::parquet::ParquetPartitionWriter;
    use arrow::array::{ArrayRef, Float64Array};
    use arrow::datatypes::{DataType, Field};
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    #[test]
    fn test_detect_family_from_schema() {
        assert_eq!(detect_family(&Ufs::schema()), Some(TraceType::Ufs));
        assert_eq!(detect_family(&Block::schema()), Some(TraceType::Block));
        let other = Schema::new(vec![Field::new("value", DataType::Float64, false)]);
        assert_eq!(detect_family(&other), None);
    }

    #[test]
    fn test_block_batch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            Block {
                time: 0.5,
                sector: 128,
                size: 8,
                io_type: "R".into(),
                comm: "fio, job 1".into(),
                dtoc: 0.3,
                aligned: true,
                ..Default::default()
            },
            Block {
                time: 0.75,
                sector: 4,
                size: 1,
                io_type: "W".into(),
                ..Default::default()
            },
        ];
        let mut writer = ParquetPartitionWriter::<Block>::new(dir.path(), 100, 100, 0);
        writer.write(&rows).unwrap();
        let parts = writer.finish().unwrap();

        let (family, reader) = open_parquet(&parts[0].path).unwrap();
        assert_eq!(family, TraceType::Block);
        let mut records = Vec::new();
        for batch in reader {
            records.extend(batch_to_records(family, &batch.unwrap()).unwrap());
        }
        assert_eq!(records, rows.into_iter().map(LogRecord::Block).collect::<Vec<_>>());

        // asking for the wrong family is a conversion failure
        let err = read_records::<Ufs>(&parts[0].path).unwrap_err();
        assert!(matches!(err, TraceError::ConversionFailure(_)));
    }

    #[test]
    fn test_foreign_parquet_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new("value", DataType::Float64, false)]));
        let column: ArrayRef = Arc::new(Float64Array::from(vec![1.0]));
        let batch = RecordBatch::try_new(schema.clone(), vec![column]).unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        assert!(matches!(
            open_parquet(&path),
            Err(TraceError::ConversionFailure(_))
        ));
    }
}
