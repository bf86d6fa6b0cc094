use crate::registry::ModRecord;
use anyhow::{Context, Result};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct SyncReport {
    pub copied: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// Makes the game's flat `~mods` directory match the union of all files under
/// the staging tree.
///
/// The staging walk is sorted lexicographically by full path, so flat-name
/// collisions across staged mods resolve deterministically: the first path
/// claims the name and later same-named files are skipped. Without `force`,
/// files already present in the active directory are never overwritten, even
/// when the staged bytes differ; callers wanting updates must force-sync.
pub fn sync(staging_root: &Path, active_dir: &Path, force: bool) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    fs::create_dir_all(active_dir).context("create active mod dir")?;

    if force {
        report.removed = wipe_active_dir(active_dir)?;
    }

    for (full_path, flat_name) in collect_staged_files(staging_root)? {
        let dest = active_dir.join(&flat_name);
        if dest.exists() {
            log::debug!("skipping {flat_name:?}, already present");
            report.skipped += 1;
            continue;
        }
        copy_then_rename(&full_path, &dest)?;
        println!("[*] Copied {} -> {}", full_path.display(), dest.display());
        report.copied += 1;
    }

    Ok(report)
}

/// `(full_path, flat_name)` for every file under the staging root, sorted by
/// full path. Subdirectories flatten into one namespace.
fn collect_staged_files(staging_root: &Path) -> Result<Vec<(PathBuf, OsString)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(staging_root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping unreadable staging entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.path().file_name() else {
            continue;
        };
        files.push((entry.path().to_path_buf(), name.to_os_string()));
    }
    files.sort();
    Ok(files)
}

/// Deletes every top-level entry of the active directory. Destructive and
/// unconditional: unrelated files go too.
fn wipe_active_dir(active_dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(active_dir).context("read active mod dir")? {
        let entry = entry.context("read active mod dir entry")?;
        let path = entry.path();
        println!("[!] Removing {}", path.display());
        if entry.file_type().context("stat active entry")?.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("remove {path:?}"))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {path:?}"))?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Copies under a temp name in the destination directory and renames into
/// place, so the active dir never holds a half-written file.
fn copy_then_rename(source: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().context("active file parent")?;
    let file_name = dest.file_name().context("active file name")?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".part");
    let temp = parent.join(temp_name);
    if let Err(err) = fs::copy(source, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(err).with_context(|| format!("copy {source:?}"));
    }
    fs::rename(&temp, dest).with_context(|| format!("finalize {dest:?}"))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallDecision {
    /// Slot directory was empty; plain install.
    Install,
    /// Evict the occupant, then install.
    Replace,
    /// Keep the occupant and install alongside it (mesh mods only).
    Add,
    Cancel,
}

/// Install-time conflict resolution for an occupied slot directory, as a pure
/// decision function so the front end only supplies the prompt answers.
/// Color-slot mods never coexist in one slot: declining the replace cancels
/// unless the incoming mod is a mesh mod and the add was accepted.
pub fn resolve_install_conflict(
    occupied: bool,
    is_mesh: bool,
    replace_ok: bool,
    add_ok: bool,
) -> InstallDecision {
    if !occupied {
        InstallDecision::Install
    } else if replace_ok {
        InstallDecision::Replace
    } else if is_mesh && add_ok {
        InstallDecision::Add
    } else {
        InstallDecision::Cancel
    }
}

pub fn slot_occupied(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Carries out an install decision for one mod's pak/sig pair. Returns false
/// when the install was cancelled.
pub fn place_into_slot(record: &ModRecord, dir: &Path, decision: InstallDecision) -> Result<bool> {
    match decision {
        InstallDecision::Cancel => return Ok(false),
        InstallDecision::Replace => {
            if dir.exists() {
                for entry in fs::read_dir(dir).context("read slot dir")? {
                    let entry = entry.context("read slot entry")?;
                    if entry.file_type().context("stat slot entry")?.is_file() {
                        println!("[!] Removing {}", entry.path().display());
                        fs::remove_file(entry.path())
                            .with_context(|| format!("remove {:?}", entry.path()))?;
                    }
                }
            }
        }
        InstallDecision::Install | InstallDecision::Add => {}
    }

    fs::create_dir_all(dir).with_context(|| format!("create slot dir {dir:?}"))?;
    for source in [&record.pak_path, &record.sig_path] {
        let name = source
            .file_name()
            .with_context(|| format!("path {source:?} has no file name"))?;
        copy_then_rename(source, &dir.join(name))?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classify::Classification,
        registry::{FileRecord, ModRecord},
    };
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn force_sync_leaves_exactly_the_flattened_staging_set() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let active = dir.path().join("active");
        write(&staging.join("mod-a/a.pak"), "a");
        write(&staging.join("mod-a/a.sig"), "sa");
        write(&staging.join("SOL/07/b.pak"), "b");
        write(&active.join("old1.pak"), "x");
        write(&active.join("old2.sig"), "x");
        write(&active.join("old3.pak"), "x");

        let report = sync(&staging, &active, true).unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(report.copied, 3);

        let mut names: Vec<String> = fs::read_dir(&active)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["a.pak", "a.sig", "b.pak"]);
    }

    #[test]
    fn non_force_sync_never_overwrites_existing_files() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let active = dir.path().join("active");
        write(&staging.join("mod-a/foo.pak"), "new bytes");
        write(&active.join("foo.pak"), "old bytes");

        let report = sync(&staging, &active, false).unwrap();
        assert_eq!(report.copied, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read_to_string(active.join("foo.pak")).unwrap(), "old bytes");
    }

    #[test]
    fn flat_name_collisions_resolve_by_path_order() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let active = dir.path().join("active");
        write(&staging.join("alpha/same.pak"), "from alpha");
        write(&staging.join("beta/same.pak"), "from beta");

        let report = sync(&staging, &active, false).unwrap();
        assert_eq!(report.copied, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            fs::read_to_string(active.join("same.pak")).unwrap(),
            "from alpha"
        );
    }

    #[test]
    fn sync_tolerates_a_missing_staging_root() {
        let dir = tempdir().unwrap();
        let report = sync(
            &dir.path().join("nope"),
            &dir.path().join("active"),
            false,
        )
        .unwrap();
        assert_eq!(report.copied, 0);
    }

    #[test]
    fn conflict_decision_table() {
        use InstallDecision::*;
        assert_eq!(resolve_install_conflict(false, false, false, false), Install);
        assert_eq!(resolve_install_conflict(true, false, true, false), Replace);
        assert_eq!(resolve_install_conflict(true, true, false, true), Add);
        // a second color mod in an occupied, non-replaced slot always cancels
        assert_eq!(resolve_install_conflict(true, false, false, true), Cancel);
        assert_eq!(resolve_install_conflict(true, true, false, false), Cancel);
    }

    #[test]
    fn replace_evicts_the_occupant_before_copying() {
        let dir = tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        write(&downloads.join("new.pak"), "new");
        write(&downloads.join("new.sig"), "new");
        let slot = dir.path().join("staging/SOL/07");
        write(&slot.join("old.pak"), "old");
        write(&slot.join("old.sig"), "old");

        let record = ModRecord::new(
            "new-mod",
            FileRecord {
                file_name: "new.zip".to_string(),
                description: String::new(),
                date_added: 0,
                download_url: String::new(),
            },
            downloads.join("new.pak"),
            downloads.join("new.sig"),
            Classification::color(Some("SOL"), "07").unwrap(),
        );

        assert!(place_into_slot(&record, &slot, InstallDecision::Replace).unwrap());
        assert!(!slot.join("old.pak").exists());
        assert!(slot.join("new.pak").exists());
        assert!(slot.join("new.sig").exists());

        assert!(!place_into_slot(&record, &slot, InstallDecision::Cancel).unwrap());
    }
}
