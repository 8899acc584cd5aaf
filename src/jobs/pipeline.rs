//! Stage pipelines run by the job manager.
//!
//! Log processing: Download -> Parse -> Convert -> Upload.
//! CSV conversion: Download -> Convert -> Upload.

use super::progress::{Counts, ProgressReporter};
use super::request::{ConvertToCsvRequest, ProcessLogsRequest};
use super::status::Stage;
use crate::config::EngineConfig;
use crate::error::{Result, TraceError};
use crate::models::{Block, LogRecord, TraceType, Ufs};
use crate::output::parquet::join_key;
use crate::output::{
    csv_file_name, parquet_to_csv, remote_partition_names, ColumnarRecord,
    ParquetPartitionWriter, PartitionFile,
};
use crate::parsers::{detect_format, DetectedFormat, LogParser, ParseStats, ParserOptions};
use crate::processors::LatencyEnricher;
use crate::storage::{ObjectStore, StorageError};
use crate::utils::compression::{extract_and_find_log, CompressionFormat};
use crate::utils::{open_encoded_reader, FilterOptions};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::task::JoinError;

const READ_BUFFER_BYTES: usize = 8 * 1024 * 1024;
/// Smallest Arrow batch handed to one encoder thread.
const MIN_BATCH_ROWS: usize = 4096;

/// Upper bound on records the parser buffers before handing a chunk over.
const MAX_CHUNK_RECORDS: usize = 1_000_000;

const PARSE_START: u32 = 30;
const PARSE_END: u32 = 60;

/// Everything a running job needs.
pub(crate) struct JobContext {
    pub job_id: String,
    pub config: Arc<EngineConfig>,
    pub store: Arc<dyn ObjectStore>,
    pub reporter: ProgressReporter,
    pub cancel: Arc<AtomicBool>,
}

impl JobContext {
    fn work_dir(&self) -> PathBuf {
        self.config.scratch_dir.join(&self.job_id)
    }

    fn check_cancelled(&self) -> Result<()> {
        check_cancel(&self.cancel, &self.job_id)
    }
}

fn check_cancel(flag: &AtomicBool, job_id: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(TraceError::Cancelled(format!("job {job_id} was cancelled")));
    }
    Ok(())
}

fn join_error(e: JoinError) -> TraceError {
    TraceError::Internal(format!("worker task failed: {e}"))
}

/// `a + span * done / total`, for spreading a stage's percent range over its items.
fn scaled(start: u32, span: u32, done: u64, total: u64) -> u32 {
    if total == 0 {
        return start + span;
    }
    start + (span as u64 * done.min(total) / total) as u32
}

fn chunk_records(chunk_size: u32) -> usize {
    (chunk_size as usize).clamp(1, MAX_CHUNK_RECORDS)
}

pub(crate) async fn run_process_logs(ctx: JobContext, request: ProcessLogsRequest) {
    let started = Instant::now();
    info!(
        "[{}] ProcessLogs {}/{} -> {}/{}",
        ctx.job_id, request.source_bucket, request.source_path, request.target_bucket, request.target_path
    );
    let result = process_logs(&ctx, &request).await;
    finish(&ctx, result, started).await;
}

pub(crate) async fn run_convert_to_csv(ctx: JobContext, request: ConvertToCsvRequest) {
    let started = Instant::now();
    info!(
        "[{}] ConvertToCsv {}/{} -> {}/{}",
        ctx.job_id,
        request.source_bucket,
        request.source_parquet_path,
        request.target_bucket,
        request.target_csv_path
    );
    let result = convert_to_csv(&ctx, &request).await;
    finish(&ctx, result, started).await;
}

// 작업 디렉토리 정리 후 종료 이벤트 전송
async fn finish(ctx: &JobContext, result: Result<Vec<String>>, started: Instant) {
    let work_dir = ctx.work_dir();
    if tokio::fs::try_exists(&work_dir).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!("[{}] failed to clean up {}: {e}", ctx.job_id, work_dir.display());
        }
    }

    match result {
        Ok(files) => {
            info!(
                "[{}] completed in {:.2}s, {} file(s) uploaded",
                ctx.job_id,
                started.elapsed().as_secs_f64(),
                files.len()
            );
            let message = format!("Processing completed successfully. Uploaded {} files", files.len());
            ctx.reporter.complete(files, message).await;
        }
        Err(e) => {
            error!("[{}] failed after {:.2}s: {e}", ctx.job_id, started.elapsed().as_secs_f64());
            ctx.reporter.fail(&e).await;
        }
    }
}

/// A source object copied into the job's scratch directory.
#[derive(Debug)]
struct LocalSource {
    key: String,
    path: PathBuf,
    size: u64,
}

fn local_name(index: usize, key: &str) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    format!("{index:04}_{name}")
}

/// Download `path`, or every object under it when it is not an object itself.
///
/// With `suffix`, only listed keys ending in it are taken.
async fn fetch_sources(
    ctx: &JobContext,
    bucket: &str,
    path: &str,
    suffix: Option<&str>,
    dir: &Path,
) -> Result<Vec<LocalSource>> {
    tokio::fs::create_dir_all(dir).await?;

    let direct = dir.join(local_name(0, path));
    match ctx.store.download(bucket, path, &direct).await {
        Ok(size) => {
            info!("[{}] downloaded {bucket}/{path} ({size} bytes)", ctx.job_id);
            return Ok(vec![LocalSource {
                key: path.to_string(),
                path: direct,
                size,
            }]);
        }
        Err(StorageError::NotFound(_)) => {
            let _ = tokio::fs::remove_file(&direct).await;
        }
        Err(e) => return Err(e.into()),
    }

    // 단일 객체가 아니면 prefix로 간주
    let prefix = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    let keys: Vec<String> = ctx
        .store
        .list(bucket, &prefix)
        .await?
        .into_iter()
        .filter(|key| !key.ends_with('/'))
        .filter(|key| suffix.map_or(true, |s| key.ends_with(s)))
        .collect();
    if keys.is_empty() {
        return Err(TraceError::SourceNotFound(format!("{bucket}/{path}")));
    }
    info!("[{}] {} object(s) under {bucket}/{prefix}", ctx.job_id, keys.len());

    let total = keys.len() as u64;
    let mut sources = Vec::with_capacity(keys.len());
    for (i, key) in keys.into_iter().enumerate() {
        ctx.check_cancelled()?;
        let dest = dir.join(local_name(i, &key));
        let size = ctx.store.download(bucket, &key, &dest).await?;
        ctx.reporter.progress(
            Stage::Downloading,
            scaled(5, 15, i as u64 + 1, total),
            format!("Downloaded {key}"),
            ctx.reporter.counts(),
        );
        sources.push(LocalSource {
            key,
            path: dest,
            size,
        });
    }
    Ok(sources)
}

async fn upload(ctx: &JobContext, bucket: &str, key: &str, path: &Path) -> Result<()> {
    ctx.store
        .upload(bucket, key, path)
        .await
        .map_err(|e| TraceError::UploadFailure(format!("{bucket}/{key}: {e}")))?;
    debug!("[{}] uploaded {} -> {bucket}/{key}", ctx.job_id, path.display());
    Ok(())
}

/// Upload files in order, spreading 75..95 over them.
async fn upload_all(ctx: &JobContext, bucket: &str, files: &[(String, PathBuf)]) -> Result<Vec<String>> {
    let total = files.len() as u64;
    let mut uploaded = Vec::with_capacity(files.len());
    for (i, (key, path)) in files.iter().enumerate() {
        ctx.check_cancelled()?;
        upload(ctx, bucket, key, path).await?;
        ctx.reporter.progress(
            Stage::Uploading,
            scaled(75, 20, i as u64 + 1, total),
            format!("Uploaded {key}"),
            ctx.reporter.counts(),
        );
        uploaded.push(key.clone());
    }
    Ok(uploaded)
}

/// Replace archives by the log file found inside them.
async fn extract_sources(ctx: &JobContext, sources: Vec<LocalSource>, dir: &Path) -> Result<Vec<LocalSource>> {
    if !sources
        .iter()
        .any(|s| CompressionFormat::from_path(&s.path).is_compressed())
    {
        return Ok(sources);
    }

    ctx.reporter
        .stage(Stage::Downloading, 25, "Extracting compressed files")
        .await;
    let mut extracted = Vec::with_capacity(sources.len());
    for (i, source) in sources.into_iter().enumerate() {
        if !CompressionFormat::from_path(&source.path).is_compressed() {
            extracted.push(source);
            continue;
        }
        ctx.check_cancelled()?;
        let archive = source.path.clone();
        let out_dir = dir.join(format!("extract_{i:04}"));
        let log_file = tokio::task::spawn_blocking(move || extract_and_find_log(&archive, &out_dir))
            .await
            .map_err(join_error)?
            .map_err(|e| TraceError::ParseFailure(format!("cannot extract {}: {e}", source.key)))?;
        let size = tokio::fs::metadata(&log_file).await?.len();
        info!("[{}] extracted {} -> {}", ctx.job_id, source.key, log_file.display());
        extracted.push(LocalSource {
            key: source.key,
            path: log_file,
            size,
        });
    }
    ctx.reporter
        .stage(Stage::Downloading, 28, "Extraction completed")
        .await;
    Ok(extracted)
}

/// Family from the request hint, or from a sample of the first source.
async fn resolve_family(ctx: &JobContext, request: &ProcessLogsRequest, first: &LocalSource) -> Result<TraceType> {
    if let Some(family) = request.log_type_hint()?.fixed() {
        return Ok(family);
    }

    let limit = ctx.config.detect_sample_bytes;
    let mut sample = Vec::with_capacity(limit);
    tokio::fs::File::open(&first.path)
        .await?
        .take(limit as u64)
        .read_to_end(&mut sample)
        .await?;

    let family = match detect_format(&sample) {
        DetectedFormat::Ufs => TraceType::Ufs,
        DetectedFormat::Block => TraceType::Block,
        DetectedFormat::Unknown => {
            return Err(TraceError::FormatDetectionFailed(format!(
                "no UFS or block trace lines in the first {} bytes of {}",
                sample.len(),
                first.key
            )))
        }
    };
    info!("[{}] detected {} trace", ctx.job_id, family.display_name());
    Ok(family)
}

async fn process_logs(ctx: &JobContext, request: &ProcessLogsRequest) -> Result<Vec<String>> {
    let reporter = &ctx.reporter;
    let work_dir = ctx.work_dir();

    // 1단계: 다운로드
    reporter
        .stage(
            Stage::Downloading,
            5,
            format!("Downloading {}/{}", request.source_bucket, request.source_path),
        )
        .await;
    let sources = fetch_sources(
        ctx,
        &request.source_bucket,
        &request.source_path,
        None,
        &work_dir.join("source"),
    )
    .await?;
    let downloaded: u64 = sources.iter().map(|s| s.size).sum();
    reporter
        .stage(
            Stage::Downloading,
            20,
            format!("Download completed: {} file(s), {downloaded} bytes", sources.len()),
        )
        .await;
    ctx.check_cancelled()?;

    let sources = extract_sources(ctx, sources, &work_dir).await?;
    let Some(first) = sources.first() else {
        return Err(TraceError::SourceNotFound(request.source_path.clone()));
    };
    let family = resolve_family(ctx, request, first).await?;
    ctx.check_cancelled()?;

    // 2단계: 파싱 (변환과 파이프라인으로 진행)
    reporter
        .stage(
            Stage::Parsing,
            PARSE_START,
            format!("Parsing {} trace", family.display_name()),
        )
        .await;

    let out_dir = work_dir.join("parquet");
    tokio::fs::create_dir_all(&out_dir).await?;
    let job = EncodeJob {
        job_id: ctx.job_id.clone(),
        total_bytes: sources.iter().map(|s| s.size).sum(),
        files: sources.into_iter().map(|s| s.path).collect(),
        family,
        filter: request.filter(),
        chunk_size: chunk_records(request.chunk_size),
        parser: ParserOptions {
            max_malformed_ratio: ctx.config.max_malformed_ratio,
            ..ParserOptions::default()
        },
        partition_rows: ctx.config.partition_rows,
        pipeline_depth: ctx.config.pipeline_depth,
        reorder_window: ctx.config.reorder_window,
        max_pending: ctx.config.max_pending_requests,
        out_dir,
        reporter: reporter.clone(),
        cancel: ctx.cancel.clone(),
    };
    if job.filter.is_active() {
        info!("[{}] filter axes: {:?}", ctx.job_id, job.filter.active_axes());
    }
    let partitions = tokio::task::spawn_blocking(move || encode_trace(job))
        .await
        .map_err(join_error)??;
    ctx.check_cancelled()?;

    // 4단계: 업로드
    reporter
        .stage(
            Stage::Uploading,
            75,
            format!("Uploading {} Parquet file(s)", partitions.len()),
        )
        .await;
    let names = remote_partition_names(&request.target_path, family, partitions.len());
    let files: Vec<(String, PathBuf)> = names
        .into_iter()
        .zip(partitions.into_iter().map(|p| p.path))
        .collect();
    upload_all(ctx, &request.target_bucket, &files).await
}

/// Inputs of the blocking parse/encode step.
struct EncodeJob {
    job_id: String,
    files: Vec<PathBuf>,
    total_bytes: u64,
    family: TraceType,
    filter: FilterOptions,
    chunk_size: usize,
    parser: ParserOptions,
    partition_rows: u64,
    pipeline_depth: usize,
    reorder_window: usize,
    max_pending: usize,
    out_dir: PathBuf,
    reporter: ProgressReporter,
    cancel: Arc<AtomicBool>,
}

/// Records parsed from the sources, in order.
struct ParsedChunk {
    records: Vec<LogRecord>,
    /// Bytes of all sources consumed once this chunk was parsed.
    bytes_done: u64,
    /// False when the source already carries latency columns.
    derive_latency: bool,
}

fn encode_trace(job: EncodeJob) -> Result<Vec<PartitionFile>> {
    match job.family {
        TraceType::Ufs => encode_family::<Ufs>(&job),
        TraceType::Block => encode_family::<Block>(&job),
    }
}

// 파서 스레드 -> bounded 채널 -> 지연시간 계산/필터 -> Parquet writer
fn encode_family<T: ColumnarRecord>(job: &EncodeJob) -> Result<Vec<PartitionFile>> {
    let started = Instant::now();
    let batch_rows = (job.chunk_size / rayon::current_num_threads().max(1)).max(MIN_BATCH_ROWS);
    let mut writer =
        ParquetPartitionWriter::<T>::new(&job.out_dir, job.partition_rows, batch_rows, job.total_bytes as usize);

    let (tx, rx) = crossbeam_channel::bounded(job.pipeline_depth.max(1));
    let (consumed, produced) = std::thread::scope(|s| {
        let producer = s.spawn(move || produce(job, tx));
        let consumed = consume(job, rx, &mut writer);
        (consumed, producer.join())
    });
    let stats = produced.map_err(|_| TraceError::Internal("parser thread panicked".into()))?;
    let counts = consumed?;

    info!(
        "[{}] parsed {} records in {:.2}s ({} malformed, {} ignored lines), {} kept after filtering",
        job.job_id,
        stats.records,
        started.elapsed().as_secs_f64(),
        stats.malformed,
        stats.ignored,
        counts.emitted
    );

    // 3단계: Parquet 파티션 마무리
    job.reporter.set_counts(counts);
    job.reporter
        .stage_blocking(Stage::Converting, PARSE_END, "Finalizing Parquet partitions");
    check_cancel(&job.cancel, &job.job_id)?;
    let partitions = writer.finish()?;
    job.reporter.stage_blocking(
        Stage::Converting,
        70,
        format!("Conversion completed: {} partition(s)", partitions.len()),
    );
    Ok(partitions)
}

fn produce(job: &EncodeJob, tx: Sender<Result<ParsedChunk>>) -> ParseStats {
    let mut stats = ParseStats::default();
    let mut consumed = 0u64;

    for path in &job.files {
        let reader = match open_encoded_reader(path, READ_BUFFER_BYTES) {
            Ok(reader) => reader,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return stats;
            }
        };
        let mut parser = LogParser::with_options(reader, job.family, job.parser);
        let mut records = Vec::new();

        loop {
            let end = match parser.next() {
                Some(Ok(record)) => {
                    records.push(record);
                    false
                }
                Some(Err(e)) => {
                    stats.merge(parser.stats());
                    let _ = tx.send(Err(e));
                    return stats;
                }
                None => true,
            };

            if records.len() >= job.chunk_size || (end && !records.is_empty()) {
                if job.cancel.load(Ordering::SeqCst) {
                    stats.merge(parser.stats());
                    return stats;
                }
                let chunk = ParsedChunk {
                    records: std::mem::take(&mut records),
                    bytes_done: consumed + parser.bytes_read(),
                    derive_latency: !parser.latency_in_source(),
                };
                // 수신 측이 실패하면 중단
                if tx.send(Ok(chunk)).is_err() {
                    stats.merge(parser.stats());
                    return stats;
                }
            }
            if end {
                break;
            }
        }

        consumed += parser.bytes_read();
        stats.merge(parser.stats());
    }
    stats
}

fn consume<T: ColumnarRecord>(
    job: &EncodeJob,
    rx: Receiver<Result<ParsedChunk>>,
    writer: &mut ParquetPartitionWriter<T>,
) -> Result<Counts> {
    let mut enricher = LatencyEnricher::with_limits(job.family, job.reorder_window, job.max_pending);
    let mut counts = Counts::default();

    for chunk in rx {
        let chunk = chunk?;
        check_cancel(&job.cancel, &job.job_id)?;

        counts.processed += chunk.records.len() as u64;
        let released: Vec<LogRecord> = if chunk.derive_latency {
            chunk
                .records
                .into_iter()
                .filter_map(|record| enricher.enrich(record))
                .collect()
        } else {
            chunk.records
        };
        counts.emitted += write_rows(job, writer, released)?;

        job.reporter.progress(
            Stage::Parsing,
            scaled(PARSE_START, PARSE_END - PARSE_START, chunk.bytes_done, job.total_bytes),
            format!("Parsed {} records", counts.processed),
            counts,
        );
    }
    check_cancel(&job.cancel, &job.job_id)?;

    // 정렬 윈도우에 남은 레코드
    counts.emitted += write_rows(job, writer, enricher.finish())?;

    if enricher.dropped() > 0 {
        info!("[{}] dropped {} duplicate events", job.job_id, enricher.dropped());
    }
    if enricher.unpaired() > 0 {
        info!("[{}] {} requests left unpaired", job.job_id, enricher.unpaired());
    }
    if enricher.late() > 0 {
        warn!(
            "[{}] {} records arrived outside the {}-record reorder window",
            job.job_id,
            enricher.late(),
            job.reorder_window
        );
    }
    Ok(counts)
}

fn write_rows<T: ColumnarRecord>(
    job: &EncodeJob,
    writer: &mut ParquetPartitionWriter<T>,
    records: Vec<LogRecord>,
) -> Result<u64> {
    let rows: Vec<T> = records
        .into_iter()
        .filter(|record| job.filter.matches(record))
        .filter_map(T::from_record)
        .collect();
    writer.write(&rows)?;
    Ok(rows.len() as u64)
}

async fn convert_to_csv(ctx: &JobContext, request: &ConvertToCsvRequest) -> Result<Vec<String>> {
    let reporter = &ctx.reporter;
    let work_dir = ctx.work_dir();

    // 1단계: 다운로드
    reporter
        .stage(
            Stage::Downloading,
            5,
            format!(
                "Downloading {}/{}",
                request.source_bucket, request.source_parquet_path
            ),
        )
        .await;
    let sources = fetch_sources(
        ctx,
        &request.source_bucket,
        &request.source_parquet_path,
        Some(".parquet"),
        &work_dir.join("source"),
    )
    .await?;
    reporter
        .stage(
            Stage::Downloading,
            20,
            format!("Download completed: {} Parquet file(s)", sources.len()),
        )
        .await;
    ctx.check_cancelled()?;

    // 2단계: CSV 변환
    reporter
        .stage(
            Stage::Converting,
            30,
            format!("Converting {} file(s) to CSV", sources.len()),
        )
        .await;
    let csv_dir = work_dir.join("csv");
    tokio::fs::create_dir_all(&csv_dir).await?;

    let filter = request.filter();
    let total = sources.len() as u64;
    let mut counts = Counts::default();
    let mut outputs = Vec::with_capacity(sources.len());
    for (i, source) in sources.iter().enumerate() {
        ctx.check_cancelled()?;
        let name = csv_file_name(&source.key, request.prefix());
        let csv_path = csv_dir.join(&name);

        let (src, dst, filter) = (source.path.clone(), csv_path.clone(), filter.clone());
        let export = tokio::task::spawn_blocking(move || parquet_to_csv(&src, &dst, &filter))
            .await
            .map_err(join_error)??;
        counts.processed += export.rows_read;
        counts.emitted += export.rows_written;

        reporter.progress(
            Stage::Converting,
            scaled(30, 40, i as u64 + 1, total),
            format!("Converted {} ({} rows)", source.key, export.rows_written),
            counts,
        );
        // 같은 이름이면 나중 파일이 덮어씀
        let key = join_key(&request.target_csv_path, &name);
        if outputs.iter().any(|(k, _)| *k == key) {
            warn!("Job {}: {} overwrites an earlier export at {key}", ctx.job_id, source.key);
            outputs.retain(|(k, _)| *k != key);
        }
        outputs.push((key, csv_path));
    }
    reporter
        .stage(Stage::Converting, 70, "Conversion completed")
        .await;

    // 3단계: 업로드
    reporter
        .stage(
            Stage::Uploading,
            75,
            format!("Uploading {} CSV file(s)", outputs.len()),
        )
        .await;
    upload_all(ctx, &request.target_bucket, &outputs).await
}
