use flate2::read::GzDecoder;
use log::info;
use sevenz_rust::SevenZReader;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use xz2::read::XzDecoder;
use zip::ZipArchive;

/// 압축 파일 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Tar,
    TarGz,
    TarXz,
    Zip,
    SevenZ,
    Gzip,
    None,
}

impl CompressionFormat {
    /// 파일 이름(또는 object key)에서 압축 형식 감지
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            CompressionFormat::TarGz
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            CompressionFormat::TarXz
        } else if name.ends_with(".tar") {
            CompressionFormat::Tar
        } else if name.ends_with(".zip") {
            CompressionFormat::Zip
        } else if name.ends_with(".7z") {
            CompressionFormat::SevenZ
        } else if name.ends_with(".gz") {
            CompressionFormat::Gzip
        } else {
            CompressionFormat::None
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_name(&path.to_string_lossy())
    }

    pub fn is_compressed(&self) -> bool {
        *self != CompressionFormat::None
    }
}

/// Unpack `compressed_file` into `output_dir` and return the log file to parse.
///
/// Archives may hold several members; the largest log-like file wins. A plain
/// gzip stream is inflated next to the other scratch files. Uncompressed input
/// is returned unchanged.
pub fn extract_and_find_log(compressed_file: &Path, output_dir: &Path) -> io::Result<PathBuf> {
    let format = CompressionFormat::from_path(compressed_file);

    info!(
        "Extracting {} ({:?}) to {}",
        compressed_file.display(),
        format,
        output_dir.display()
    );

    match format {
        CompressionFormat::None => return Ok(compressed_file.to_path_buf()),
        CompressionFormat::Gzip => {
            fs::create_dir_all(output_dir)?;
            return inflate_gzip(compressed_file, output_dir);
        }
        CompressionFormat::Tar => {
            fs::create_dir_all(output_dir)?;
            Archive::new(File::open(compressed_file)?).unpack(output_dir)?;
        }
        CompressionFormat::TarGz => {
            fs::create_dir_all(output_dir)?;
            let decoder = GzDecoder::new(File::open(compressed_file)?);
            Archive::new(decoder).unpack(output_dir)?;
        }
        CompressionFormat::TarXz => {
            fs::create_dir_all(output_dir)?;
            let decoder = XzDecoder::new(File::open(compressed_file)?);
            Archive::new(decoder).unpack(output_dir)?;
        }
        CompressionFormat::Zip => {
            fs::create_dir_all(output_dir)?;
            extract_zip(compressed_file, output_dir)?;
        }
        CompressionFormat::SevenZ => {
            fs::create_dir_all(output_dir)?;
            extract_7z(compressed_file, output_dir)?;
        }
    }

    find_log_file(output_dir)
}

fn inflate_gzip(gz_file: &Path, output_dir: &Path) -> io::Result<PathBuf> {
    let stem = gz_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("trace.log");
    let out_path = output_dir.join(stem);
    let mut decoder = GzDecoder::new(File::open(gz_file)?);
    let mut out = File::create(&out_path)?;
    io::copy(&mut decoder, &mut out)?;
    Ok(out_path)
}

/// zip 파일 압축 해제
fn extract_zip(zip_file: &Path, output_dir: &Path) -> io::Result<()> {
    let file = File::open(zip_file)?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // 경로 탈출(zip slip) 방지
        let outpath = match entry.enclosed_name() {
            Some(path) => output_dir.join(path),
            None => continue,
        };

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}

/// 7z 파일 압축 해제
fn extract_7z(sevenz_file: &Path, output_dir: &Path) -> io::Result<()> {
    let mut reader = SevenZReader::open(sevenz_file, "".into()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to open 7z file: {e:?}"),
        )
    })?;

    reader
        .for_each_entries(|entry, reader| {
            let entry_path = enclosed_member_path(output_dir, entry.name())?;
            if entry.is_directory() {
                fs::create_dir_all(&entry_path)?;
            } else {
                if let Some(parent) = entry_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut outfile = File::create(&entry_path)?;
                io::copy(reader, &mut outfile)?;
            }
            Ok(true)
        })
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to extract 7z: {e:?}"),
            )
        })
}

/// `output_dir` joined with an archive member name that must stay inside it.
///
/// Absolute names and `..` components are rejected.
fn enclosed_member_path(output_dir: &Path, name: &str) -> io::Result<PathBuf> {
    let member = Path::new(name);
    let escapes = member.components().any(|c| {
        matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
    });
    if escapes || name.starts_with('/') || name.starts_with('\\') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("archive member escapes the extraction directory: {name}"),
        ));
    }
    Ok(output_dir.join(member))
}

fn is_log_like(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    name.ends_with(".csv")
        || name.ends_with(".log")
        || name.ends_with(".txt")
        || name.contains("trace")
}

/// 디렉토리에서 가장 큰 CSV/로그 파일 찾기
fn find_log_file(dir: &Path) -> io::Result<PathBuf> {
    let mut log_files = Vec::new();
    collect_log_files(dir, &mut log_files)?;

    log_files
        .into_iter()
        .max_by_key(|path| fs::metadata(path).map(|m| m.len()).unwrap_or(0))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "No CSV or log files found in extracted directory: {}",
                    dir.display()
                ),
            )
        })
}

fn collect_log_files(dir: &Path, log_files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_log_files(&path, log_files)?;
        } else if path.is_file() && is_log_like(&path) {
            log_files.push(path);
        }
    }
    Ok(())
}
