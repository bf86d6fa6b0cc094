use crate::{error::ModError, registry::FileRecord};
use anyhow::{bail, Context, Result};
use filetime::{set_file_mtime, FileTime};
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use walkdir::WalkDir;

const USER_AGENT: &str = "ggmod";

/// A mod's container/signature pair as found in an extracted archive.
#[derive(Debug, Clone)]
pub struct ModFiles {
    pub pak_path: PathBuf,
    pub sig_path: PathBuf,
}

/// Downloads the record's archive into the download dir, reusing a cached
/// copy when one is already there, then extracts it and locates the pak/sig
/// pair. `fallback_sig` covers archives that ship a pak without a signature.
pub fn fetch_and_extract(
    record: &FileRecord,
    download_dir: &Path,
    mod_name: &str,
    fallback_sig: Option<&Path>,
) -> Result<ModFiles> {
    let archive = fetch_archive(record, download_dir)?;
    let dest = download_dir.join(mod_name);
    let extracted = extract(&archive, &dest)?;
    locate_pair(&extracted, &archive, fallback_sig)
}

pub fn fetch_archive(record: &FileRecord, download_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(download_dir).context("create download dir")?;
    let path = download_dir.join(&record.file_name);
    if path.exists() {
        println!("[*] Using cached archive {}", path.display());
        return Ok(path);
    }

    let url = normalize_tool_url(&record.download_url);
    println!("[*] Downloading {} from {url}", record.file_name);
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(120))
        .timeout_write(Duration::from_secs(120))
        .build();
    let response = agent
        .get(&url)
        .set("User-Agent", USER_AGENT)
        .call()
        .context("download archive")?;
    let mut reader = response.into_reader();
    let mut file = fs::File::create(&path).context("create archive file")?;
    io::copy(&mut reader, &mut file).context("write archive file")?;
    Ok(path)
}

/// Mod tools hand out `unverum:` deep links; the plain download URL is inside.
pub fn normalize_tool_url(url: &str) -> String {
    if let Some(stripped) = url.strip_prefix("unverum:") {
        stripped
            .replace("mmdl", "dl")
            .split(',')
            .next()
            .unwrap_or_default()
            .to_string()
    } else {
        url.to_string()
    }
}

/// Extracts an archive into `dest` and returns the extracted file paths.
pub fn extract(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest).context("create extraction dir")?;
    let extension = archive
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "zip" => extract_zip(archive, dest)?,
        "7z" | "rar" => extract_7z(archive, dest)?,
        other => bail!("unknown archive format {other:?} for {archive:?}"),
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dest).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Finds the container/signature pair among extracted files. A missing sig
/// is papered over with the configured stock sig; a missing pak is fatal.
pub fn locate_pair(
    extracted: &[PathBuf],
    archive: &Path,
    fallback_sig: Option<&Path>,
) -> Result<ModFiles> {
    let pak_path = extracted
        .iter()
        .find(|path| has_extension(path, "pak"))
        .cloned()
        .ok_or_else(|| ModError::MissingContainerFile {
            archive: archive.to_path_buf(),
            reason: "no .pak file in archive".to_string(),
        })?;

    let sig_path = match extracted.iter().find(|path| has_extension(path, "sig")) {
        Some(path) => path.clone(),
        None => {
            let Some(stock) = fallback_sig else {
                return Err(ModError::MissingContainerFile {
                    archive: archive.to_path_buf(),
                    reason: "no .sig file in archive and no fallback_sig configured"
                        .to_string(),
                }
                .into());
            };
            let sig_path = pak_path.with_extension("sig");
            fs::copy(stock, &sig_path)
                .with_context(|| format!("copy fallback sig {stock:?}"))?;
            log::info!("no sig in archive, used fallback {}", stock.display());
            sig_path
        }
    };

    Ok(ModFiles { pak_path, sig_path })
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

fn extract_zip(path: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(path).context("open zip")?;
    let mut archive = zip::ZipArchive::new(file).context("read zip")?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("zip entry")?;
        // entries whose names escape the destination are dropped
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).context("create zip dir")?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create zip dir")?;
        }
        let mut out = fs::File::create(&out_path).context("write zip entry")?;
        io::copy(&mut entry, &mut out).context("extract zip entry")?;
        if let Some(mtime) = entry.last_modified().and_then(zip_time_to_unix) {
            let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
        }
    }

    Ok(())
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    let datetime = PrimitiveDateTime::new(date, time).assume_utc();
    Some(datetime.unix_timestamp())
}

/// The system `7z` binary handles rar as well as 7z; the pure-Rust
/// decompressor only covers 7z, so it is the fallback, not the default.
fn extract_7z(path: &Path, dest: &Path) -> Result<()> {
    if extract_with_7z(path, dest)?.is_some() {
        return Ok(());
    }
    sevenz_rust::decompress_file(path, dest)
        .with_context(|| format!("extract 7z archive {path:?}"))
}

/// Runs the system `7z`; `None` when the binary is not installed.
fn extract_with_7z(path: &Path, dest: &Path) -> Result<Option<()>> {
    let status = Command::new("7z")
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", dest.display()))
        .arg(path)
        .stdout(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => Ok(Some(())),
        Ok(status) => bail!("7z exited with {status} for {path:?}"),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context("launch 7z"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn tool_urls_are_normalized() {
        assert_eq!(
            normalize_tool_url("unverum:https://gamebanana.com/mmdl/12345,Mod,409314"),
            "https://gamebanana.com/dl/12345"
        );
        assert_eq!(
            normalize_tool_url("https://gamebanana.com/dl/12345"),
            "https://gamebanana.com/dl/12345"
        );
    }

    #[test]
    fn zip_archives_extract_and_flatten_into_paths() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("mod.zip");
        let file = fs::File::create(&archive_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        writer.start_file("inner/mod.pak", options).unwrap();
        writer.write_all(b"pak bytes").unwrap();
        writer.start_file("inner/mod.sig", options).unwrap();
        writer.write_all(b"sig bytes").unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        let files = extract(&archive_path, &dest).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p.ends_with("inner/mod.pak")));

        let pair = locate_pair(&files, &archive_path, None).unwrap();
        assert!(pair.pak_path.ends_with("mod.pak"));
        assert!(pair.sig_path.ends_with("mod.sig"));
    }

    #[test]
    fn missing_pak_is_a_container_error() {
        let dir = tempdir().unwrap();
        let readme = dir.path().join("readme.txt");
        fs::write(&readme, "hi").unwrap();
        let err = locate_pair(&[readme], Path::new("mod.zip"), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModError>(),
            Some(ModError::MissingContainerFile { .. })
        ));
    }

    #[test]
    fn missing_sig_uses_the_fallback_when_configured() {
        let dir = tempdir().unwrap();
        let pak = dir.path().join("mod.pak");
        fs::write(&pak, "pak").unwrap();
        let stock = dir.path().join("stock.sig");
        fs::write(&stock, "stock sig").unwrap();

        let err = locate_pair(&[pak.clone()], Path::new("mod.zip"), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModError>(),
            Some(ModError::MissingContainerFile { .. })
        ));

        let pair = locate_pair(&[pak], Path::new("mod.zip"), Some(&stock)).unwrap();
        assert_eq!(fs::read_to_string(&pair.sig_path).unwrap(), "stock sig");
    }
}
