use crate::classify::AssetSource;
use anyhow::{bail, Context, Result};
use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

const PAK_MAGIC: u32 = 0x5A6F_12E1;
// The footer moved around across container versions; the magic is close to
// the end either way, so scan the tail for it.
const FOOTER_SCAN: u64 = 512;

/// Read-only view of an UE4 pak container: the asset listing plus byte access
/// to uncompressed, unencrypted entries. Compressed or encrypted entries are
/// dropped from the listing with a warning; the classification heuristics
/// only need the plain text-bearing assets.
pub struct PakFile {
    file: File,
    paths: Vec<String>,
    entries: HashMap<String, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    data_offset: u64,
    size: u64,
}

impl PakFile {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("open pak file {path:?}"))?;
        let (index_offset, index_size) = read_footer(&mut file)?;

        file.seek(SeekFrom::Start(index_offset)).context("seek pak index")?;
        let mut index = vec![0u8; index_size as usize];
        file.read_exact(&mut index).context("read pak index")?;

        let mut cursor = 0usize;
        let mount_point = read_string(&index, &mut cursor).context("pak mount point")?;
        let mount_point = mount_point
            .trim_start_matches("../")
            .trim_start_matches('/')
            .to_string();
        let count = read_u32(&index, &mut cursor).context("pak entry count")?;

        let mut paths = Vec::new();
        let mut entries = HashMap::new();
        for _ in 0..count {
            let name = read_string(&index, &mut cursor).context("pak entry name")?;
            let record = read_entry_record(&index, &mut cursor)
                .with_context(|| format!("pak entry record for {name}"))?;

            let full = format!("{mount_point}{name}");
            match record {
                Some(entry) => {
                    paths.push(full.clone());
                    entries.insert(full, entry);
                }
                None => log::warn!("skipping compressed/encrypted asset {full}"),
            }
        }

        Ok(Self { file, paths, entries })
    }
}

impl AssetSource for PakFile {
    fn paths(&self) -> &[String] {
        &self.paths
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .entries
            .get(path)
            .with_context(|| format!("no such asset {path}"))?
            .clone();
        self.file
            .seek(SeekFrom::Start(entry.data_offset))
            .context("seek asset data")?;
        let mut data = vec![0u8; entry.size as usize];
        self.file.read_exact(&mut data).context("read asset data")?;
        Ok(data)
    }
}

/// Locates the index by scanning the file tail for the footer magic and
/// taking the offset/size pair that follows it.
fn read_footer(file: &mut File) -> Result<(u64, u64)> {
    let len = file.metadata().context("stat pak file")?.len();
    let scan = FOOTER_SCAN.min(len);
    file.seek(SeekFrom::Start(len - scan)).context("seek pak footer")?;
    let mut tail = vec![0u8; scan as usize];
    file.read_exact(&mut tail).context("read pak footer")?;

    // magic, version, index offset, index size, index hash
    for at in (0..tail.len().saturating_sub(24)).rev() {
        let mut cursor = at;
        let Ok(magic) = read_u32(&tail, &mut cursor) else {
            continue;
        };
        if magic != PAK_MAGIC {
            continue;
        }
        let _version = read_u32(&tail, &mut cursor).context("pak version")?;
        let index_offset = read_u64(&tail, &mut cursor).context("pak index offset")?;
        let index_size = read_u64(&tail, &mut cursor).context("pak index size")?;
        if index_offset.saturating_add(index_size) <= len && index_size > 0 {
            return Ok((index_offset, index_size));
        }
    }
    bail!("no pak footer magic found; not an UE4 pak file?");
}

/// Parses one index entry record. Returns the data location for plain
/// entries and `None` for compressed or encrypted ones.
fn read_entry_record(index: &[u8], cursor: &mut usize) -> Result<Option<Entry>> {
    let record_start = *cursor;
    let offset = read_u64(index, cursor)?;
    let _compressed_size = read_u64(index, cursor)?;
    let uncompressed_size = read_u64(index, cursor)?;
    let compression = read_u32(index, cursor)?;
    *cursor += 20; // entry hash
    if *cursor > index.len() {
        bail!("truncated entry record");
    }

    if compression != 0 {
        let block_count = read_u32(index, cursor)? as usize;
        *cursor += block_count * 16;
        if *cursor > index.len() {
            bail!("truncated compression blocks");
        }
    }
    let flags = read_u8(index, cursor)?;
    let _block_size = read_u32(index, cursor)?;

    if compression != 0 || flags & 1 != 0 {
        return Ok(None);
    }

    // The record is serialized again in front of the data payload.
    let header_size = (*cursor - record_start) as u64;
    Ok(Some(Entry {
        data_offset: offset + header_size,
        size: uncompressed_size,
    }))
}

fn read_u8(data: &[u8], cursor: &mut usize) -> Result<u8> {
    let Some(byte) = data.get(*cursor) else {
        bail!("unexpected end of pak data");
    };
    *cursor += 1;
    Ok(*byte)
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32> {
    let Some(bytes) = data.get(*cursor..*cursor + 4) else {
        bail!("unexpected end of pak data");
    };
    *cursor += 4;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(data: &[u8], cursor: &mut usize) -> Result<u64> {
    let Some(bytes) = data.get(*cursor..*cursor + 8) else {
        bail!("unexpected end of pak data");
    };
    *cursor += 8;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

/// UE strings: i32 length then bytes. Positive lengths are UTF-8 with a NUL
/// terminator, negative are UTF-16.
fn read_string(data: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u32(data, cursor)? as i32;
    if len == 0 {
        return Ok(String::new());
    }
    if len < 0 {
        let chars = (-len) as usize;
        let Some(bytes) = data.get(*cursor..*cursor + chars * 2) else {
            bail!("unexpected end of pak string");
        };
        *cursor += chars * 2;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let text = String::from_utf16_lossy(&units);
        return Ok(text.trim_end_matches('\0').to_string());
    }
    let len = len as usize;
    let Some(bytes) = data.get(*cursor..*cursor + len) else {
        bail!("unexpected end of pak string");
    };
    *cursor += len;
    let text = String::from_utf8_lossy(bytes);
    Ok(text.trim_end_matches('\0').to_string())
}
