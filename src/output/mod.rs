pub mod csv;
pub mod parquet;
pub mod reader;

pub use self::csv::{csv_file_name, parquet_to_csv, CsvExport};
pub use self::parquet::{
    remote_partition_names, ColumnarRecord, ParquetPartitionWriter, PartitionFile,
    DEFAULT_PARTITION_ROWS,
};
pub use self::reader::{detect_family, read_records};
