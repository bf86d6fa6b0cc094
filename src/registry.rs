use crate::{classify::Classification, error::ModError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

/// One downloadable file as listed on a mod page. Immutable once fetched;
/// consumed to construct a [`ModRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_name: String,
    pub description: String,
    pub date_added: i64,
    pub download_url: String,
}

/// A downloaded, classified mod: where its pak/sig pair lives and whether it
/// is currently staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModRecord {
    pub name: String,
    pub file: FileRecord,
    pub pak_path: PathBuf,
    pub sig_path: PathBuf,
    pub classification: Classification,
    #[serde(default)]
    pub staged: bool,
    #[serde(default)]
    pub staged_dir: Option<PathBuf>,
}

impl ModRecord {
    pub fn new(
        name: &str,
        file: FileRecord,
        pak_path: PathBuf,
        sig_path: PathBuf,
        classification: Classification,
    ) -> Self {
        Self {
            name: name.to_string(),
            file,
            pak_path,
            sig_path,
            classification,
            staged: false,
            staged_dir: None,
        }
    }

    /// Replaces the supplied classification fields after a rejected
    /// confirmation. Call this before [`ModRecord::stage`]; an already staged
    /// copy keeps its old placement.
    pub fn override_classification(
        &mut self,
        mesh: Option<bool>,
        character: Option<&str>,
        slot: Option<&str>,
    ) -> Result<(), ModError> {
        self.classification = self.classification.with_overrides(mesh, character, slot)?;
        Ok(())
    }

    /// Copies the pak/sig pair into `<staging_root>/<name>/`. Existing files
    /// of the same name are overwritten.
    pub fn stage(&mut self, staging_root: &Path) -> Result<()> {
        let dest = staging_root.join(&self.name);
        fs::create_dir_all(&dest)
            .with_context(|| format!("create staging dir {dest:?}"))?;
        copy_into(&self.pak_path, &dest)?;
        copy_into(&self.sig_path, &dest)?;
        self.staged = true;
        self.staged_dir = Some(dest);
        Ok(())
    }

    /// Removes the staged pak/sig pair from the name-keyed directory and
    /// from the per-character slot directory, then drops each directory once
    /// empty. A mod out of staging must be gone from every location a sync
    /// walks, or the next sync copies it right back into the game. Fails with
    /// [`ModError::NotStaged`] when the record is not staged, touching
    /// nothing on disk.
    pub fn unstage(&mut self) -> Result<()> {
        if !self.staged {
            return Err(ModError::NotStaged(self.name.clone()).into());
        }
        let dir = self
            .staged_dir
            .clone()
            .ok_or_else(|| ModError::NotStaged(self.name.clone()))?;
        // staged_dir is <staging_root>/<name>, so the slot dir hangs off its
        // parent
        let slot = dir.parent().map(|root| self.classification.slot_dir(root));
        let mut dirs = vec![dir];
        dirs.extend(slot);

        for dir in &dirs {
            for source in [&self.pak_path, &self.sig_path] {
                let staged = dir.join(file_name_of(source)?);
                if staged.exists() {
                    fs::remove_file(&staged)
                        .with_context(|| format!("remove staged file {staged:?}"))?;
                }
            }
            if dir.read_dir().map(|mut it| it.next().is_none()).unwrap_or(false) {
                fs::remove_dir(dir)
                    .with_context(|| format!("remove staging dir {dir:?}"))?;
            }
        }
        self.staged = false;
        self.staged_dir = None;
        Ok(())
    }
}

fn copy_into(source: &Path, dest_dir: &Path) -> Result<()> {
    let dest = dest_dir.join(file_name_of(source)?);
    fs::copy(source, &dest).with_context(|| format!("copy {source:?} to {dest:?}"))?;
    Ok(())
}

fn file_name_of(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .with_context(|| format!("path {path:?} has no file name"))
}

/// Persistent mod registry: one JSON document holding every stored record.
/// Whole-document read-modify-write on each mutation; a single running
/// process is assumed to own the document, there is no locking.
pub struct ModRegistry {
    path: PathBuf,
    entries: Vec<serde_json::Value>,
}

impl ModRegistry {
    /// Reads `registry.json` under the data dir, creating an empty document
    /// first if it does not exist yet.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("registry.json");
        if !path.exists() {
            write_atomic(&path, "[]")?;
        }
        let raw = fs::read_to_string(&path).context("read registry.json")?;
        let entries = serde_json::from_str(&raw).context("parse registry.json")?;
        Ok(Self { path, entries })
    }

    /// Appends a record and rewrites the document. Storing a record whose
    /// serialized form is already present is a silent no-op.
    pub fn store(&mut self, record: &ModRecord) -> Result<()> {
        let value = serde_json::to_value(record).context("serialize mod record")?;
        if self.entries.contains(&value) {
            log::debug!("registry already holds {}", record.name);
            return Ok(());
        }
        self.entries.push(value);
        self.persist()
    }

    /// Rewrites the stored entry of the same name in place, appending when
    /// none exists. Used after staging-state changes to a record that is
    /// already in the document.
    pub fn update(&mut self, record: &ModRecord) -> Result<()> {
        let value = serde_json::to_value(record).context("serialize mod record")?;
        let existing = self.entries.iter_mut().find(|entry| {
            entry.get("name").and_then(|v| v.as_str()) == Some(record.name.as_str())
        });
        match existing {
            Some(entry) => *entry = value,
            None => self.entries.push(value),
        }
        self.persist()
    }

    /// All stored records. Entries that no longer deserialize are skipped
    /// with a warning rather than failing the whole listing.
    pub fn list(&self) -> Vec<ModRecord> {
        let mut records = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            match serde_json::from_value(entry.clone()) {
                Ok(record) => records.push(record),
                Err(err) => {
                    let corrupt = ModError::CorruptRecord {
                        index,
                        reason: err.to_string(),
                    };
                    log::warn!("{corrupt}");
                }
            }
        }
        records
    }

    /// Drops every record named `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.get("name").and_then(|v| v.as_str()) != Some(name));
        if self.entries.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Rewrites the document as an empty collection. Staged files on disk are
    /// left alone.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.entries).context("serialize registry")?;
        write_atomic(&self.path, &raw)
    }
}

/// Write-temp-then-rename so a crash mid-write never truncates the document.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().context("registry parent dir")?;
    fs::create_dir_all(parent).context("create registry dir")?;
    let file_name = path.file_name().context("registry filename")?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);
    fs::write(&temp_path, contents).context("write registry temp")?;
    fs::rename(&temp_path, path).context("finalize registry write")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classification;
    use tempfile::tempdir;

    fn sample_record(name: &str) -> ModRecord {
        ModRecord::new(
            name,
            FileRecord {
                file_name: format!("{name}.zip"),
                description: "a recolor".to_string(),
                date_added: 1_700_000_000,
                download_url: "https://example.invalid/dl/1".to_string(),
            },
            PathBuf::from(format!("/downloads/{name}.pak")),
            PathBuf::from(format!("/downloads/{name}.sig")),
            Classification::color(Some("SOL"), "07").unwrap(),
        )
    }

    #[test]
    fn records_round_trip_losslessly() {
        let mut record = sample_record("crimson-sol");
        record.staged = true;
        record.staged_dir = Some(PathBuf::from("/staging/crimson-sol"));
        let raw = serde_json::to_string(&record).unwrap();
        let back: ModRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn storing_the_same_record_twice_keeps_one_entry() {
        let dir = tempdir().unwrap();
        let mut registry = ModRegistry::load(dir.path()).unwrap();
        let record = sample_record("crimson-sol");
        registry.store(&record).unwrap();
        registry.store(&record).unwrap();
        assert_eq!(registry.len(), 1);

        // reload sees the same single entry
        let registry = ModRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn absent_document_is_treated_as_empty_and_created() {
        let dir = tempdir().unwrap();
        let registry = ModRegistry::load(dir.path()).unwrap();
        assert!(registry.is_empty());
        assert!(dir.path().join("registry.json").exists());
    }

    #[test]
    fn corrupt_entries_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let record = sample_record("ok-mod");
        let doc = format!(
            "[{},{{\"name\":\"broken\"}}]",
            serde_json::to_string(&record).unwrap()
        );
        fs::write(dir.path().join("registry.json"), doc).unwrap();

        let registry = ModRegistry::load(dir.path()).unwrap();
        let records = registry.list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ok-mod");
    }

    #[test]
    fn clear_empties_the_document_but_not_the_disk() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join("staging").join("crimson-sol");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("crimson-sol.pak"), b"pak").unwrap();

        let mut registry = ModRegistry::load(dir.path()).unwrap();
        registry.store(&sample_record("crimson-sol")).unwrap();
        registry.clear().unwrap();
        assert!(registry.is_empty());
        assert!(staged.join("crimson-sol.pak").exists());
    }

    #[test]
    fn remove_drops_only_the_named_record() {
        let dir = tempdir().unwrap();
        let mut registry = ModRegistry::load(dir.path()).unwrap();
        registry.store(&sample_record("one")).unwrap();
        registry.store(&sample_record("two")).unwrap();
        assert!(registry.remove("one").unwrap());
        assert!(!registry.remove("one").unwrap());
        assert_eq!(registry.list()[0].name, "two");
    }

    #[test]
    fn stage_copies_the_pair_and_unstage_removes_it() {
        let dir = tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("m.pak"), b"pak bytes").unwrap();
        fs::write(downloads.join("m.sig"), b"sig bytes").unwrap();

        let mut record = sample_record("m");
        record.pak_path = downloads.join("m.pak");
        record.sig_path = downloads.join("m.sig");

        let staging = dir.path().join("staging");
        record.stage(&staging).unwrap();
        assert!(record.staged);
        assert!(staging.join("m").join("m.pak").exists());
        assert!(staging.join("m").join("m.sig").exists());

        record.unstage().unwrap();
        assert!(!record.staged);
        assert!(!staging.join("m").exists());
    }

    #[test]
    fn unstage_removes_the_slot_directory_copy_too() {
        let dir = tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("m.pak"), b"pak").unwrap();
        fs::write(downloads.join("m.sig"), b"sig").unwrap();

        let mut record = sample_record("m");
        record.pak_path = downloads.join("m.pak");
        record.sig_path = downloads.join("m.sig");

        let staging = dir.path().join("staging");
        record.stage(&staging).unwrap();
        let slot = record.classification.slot_dir(&staging);
        fs::create_dir_all(&slot).unwrap();
        fs::copy(&record.pak_path, slot.join("m.pak")).unwrap();
        fs::copy(&record.sig_path, slot.join("m.sig")).unwrap();

        record.unstage().unwrap();
        assert!(!staging.join("m").exists());
        assert!(!slot.exists());
    }

    #[test]
    fn update_rewrites_the_named_entry_in_place() {
        let dir = tempdir().unwrap();
        let mut registry = ModRegistry::load(dir.path()).unwrap();
        let mut record = sample_record("m");
        registry.store(&record).unwrap();

        record.staged = true;
        record.staged_dir = Some(PathBuf::from("/staging/m"));
        registry.update(&record).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.list()[0].staged);

        // reload sees the rewritten entry
        let registry = ModRegistry::load(dir.path()).unwrap();
        assert!(registry.list()[0].staged);
    }

    #[test]
    fn unstaging_a_non_staged_record_fails_and_touches_nothing() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging").join("m");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("m.pak"), b"pak").unwrap();

        let mut record = sample_record("m");
        let err = record.unstage().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModError>(),
            Some(ModError::NotStaged(_))
        ));
        assert!(staging.join("m.pak").exists());
    }
}
