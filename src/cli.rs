use crate::{
    chars,
    classify::{self, Classification},
    config::Config,
    download, gamebanana,
    pak::PakFile,
    registry::{FileRecord, ModRecord, ModRegistry},
    sync,
};
use anyhow::{bail, Context, Result};
use std::{
    io::{self, BufRead, Write},
    path::Path,
};
use time::{format_description, OffsetDateTime};

enum CliCommand {
    Download(DownloadOptions),
    Sync { force: bool },
    List { character: Option<String> },
    Remove { name: String },
    Clear,
    Paths,
    Help,
    Version,
}

struct DownloadOptions {
    link: String,
    mesh: Option<bool>,
    slot: Option<String>,
    character: Option<String>,
    assume_yes: bool,
}

pub fn run() -> Result<()> {
    // --verbose is consumed by the logger setup in main
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != "--verbose" && arg != "-v")
        .collect();
    let command = parse_args(&args)?;

    match command {
        CliCommand::Help => {
            print_help();
            return Ok(());
        }
        CliCommand::Version => {
            println!("ggmod v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load_or_create()?;
    config.bootstrap_dirs()?;

    match command {
        CliCommand::Download(options) => run_download(&config, options),
        CliCommand::Sync { force } => run_sync(&config, force),
        CliCommand::List { character } => run_list(character.as_deref()),
        CliCommand::Remove { name } => run_remove(&name),
        CliCommand::Clear => run_clear(&config),
        CliCommand::Paths => run_paths(&config),
        CliCommand::Help | CliCommand::Version => unreachable!(),
    }
}

fn parse_args(args: &[String]) -> Result<CliCommand> {
    let Some(first) = args.first() else {
        return Ok(CliCommand::Help);
    };

    match first.as_str() {
        "--help" | "-h" | "help" => Ok(CliCommand::Help),
        "--version" | "-V" | "version" => Ok(CliCommand::Version),
        "download" => {
            let mut link = None;
            let mut mesh = None;
            let mut slot = None;
            let mut character = None;
            let mut assume_yes = false;
            let mut iter = args[1..].iter();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--mesh" | "-m" => mesh = Some(true),
                    "--slot" | "-s" => {
                        let value = iter.next().context("--slot requires a number")?;
                        mesh = mesh.or(Some(false));
                        slot = Some(value.clone());
                    }
                    "--char" | "-c" => {
                        let value = iter.next().context("--char requires a code")?;
                        character = Some(value.clone());
                    }
                    "--yes" | "-y" => assume_yes = true,
                    other if !other.starts_with('-') && link.is_none() => {
                        link = Some(other.to_string());
                    }
                    other => bail!("unknown download argument {other:?}"),
                }
            }
            if mesh == Some(true) && slot.is_some() {
                bail!("--mesh and --slot are mutually exclusive");
            }
            Ok(CliCommand::Download(DownloadOptions {
                link: link.context("download needs a GameBanana link")?,
                mesh,
                slot,
                character,
                assume_yes,
            }))
        }
        "sync" => {
            let force = args[1..]
                .iter()
                .any(|arg| arg == "--force" || arg == "-f");
            Ok(CliCommand::Sync { force })
        }
        "list" => Ok(CliCommand::List {
            character: args.get(1).map(|code| code.to_ascii_uppercase()),
        }),
        "remove" => Ok(CliCommand::Remove {
            name: args.get(1).context("remove needs a mod name")?.clone(),
        }),
        "clear" => Ok(CliCommand::Clear),
        "paths" => Ok(CliCommand::Paths),
        other => bail!("unknown command {other:?}, try `ggmod help`"),
    }
}

fn run_download(config: &Config, options: DownloadOptions) -> Result<()> {
    let assume_yes = options.assume_yes || config.assume_yes;
    let page_id = gamebanana::parse_page_id(&options.link)?;
    let page = gamebanana::fetch_mod_page(&page_id)?;
    if page.files.is_empty() {
        bail!("mod page {page_id} lists no downloadable files");
    }

    let Some(record) = choose_file(&page, assume_yes)? else {
        println!("[!] Cancelled");
        return Ok(());
    };

    let mod_files = download::fetch_and_extract(
        &record,
        &config.download_dir,
        &page.name,
        config.fallback_sig.as_deref(),
    )?;

    let classification =
        classify_with_overrides(&mod_files.pak_path, &options, assume_yes)?;
    println!(
        "[*] {} mod for {}",
        classification.label(),
        classification
            .character()
            .and_then(chars::display_name)
            .unwrap_or("unknown character")
    );

    let mut mod_record = ModRecord::new(
        &page.name,
        record,
        mod_files.pak_path.clone(),
        mod_files.sig_path.clone(),
        classification,
    );

    let mut registry = ModRegistry::load(&crate::config::data_dir()?)?;
    let slot_dir = mod_record.classification.slot_dir(&config.staging_root);
    let occupied = sync::slot_occupied(&slot_dir);
    let decision = if occupied {
        let replace_ok = prompt_yn(
            &format!("[?] Slot {} is taken. Replace existing mod? (y/N) ", slot_dir.display()),
            assume_yes,
        );
        let add_ok = !replace_ok
            && mod_record.classification.is_mesh()
            && prompt_yn("[?] Add mod alongside instead? (y/N) ", assume_yes);
        sync::resolve_install_conflict(
            occupied,
            mod_record.classification.is_mesh(),
            replace_ok,
            add_ok,
        )
    } else {
        sync::resolve_install_conflict(false, mod_record.classification.is_mesh(), false, false)
    };

    if decision == sync::InstallDecision::Replace {
        unstage_slot_occupants(&mut registry, &config.staging_root, &slot_dir)?;
    }
    if !sync::place_into_slot(&mod_record, &slot_dir, decision)? {
        println!("[!] Cancelled, slot stays as it is");
        return Ok(());
    }

    mod_record.stage(&config.staging_root)?;
    registry.store(&mod_record)?;
    println!("[!] Staged {}; run `ggmod sync` to apply", mod_record.name);
    Ok(())
}

/// A replaced slot must not keep syncing its previous occupants: every
/// staged record that maps to the slot is unstaged, which also clears its
/// name-keyed staging copy, and the registry entry is rewritten so `list`
/// shows it as unstaged.
fn unstage_slot_occupants(
    registry: &mut ModRegistry,
    staging_root: &Path,
    slot: &Path,
) -> Result<()> {
    for mut occupant in registry.list() {
        if !occupant.staged || occupant.classification.slot_dir(staging_root) != slot {
            continue;
        }
        println!("[!] Unstaging replaced mod {}", occupant.name);
        occupant.unstage()?;
        registry.update(&occupant)?;
    }
    Ok(())
}

/// Picks one file from the page: numeric choice for multi-file pages, a
/// plain confirmation for single-file ones. Non-interactive runs take the
/// first file only with `--yes`.
fn choose_file(page: &gamebanana::ModPage, assume_yes: bool) -> Result<Option<FileRecord>> {
    if page.files.len() == 1 {
        let record = &page.files[0];
        println!("[*] Selected: {} - {}", record.file_name, record.description);
        if prompt_yn("[?] Download this archive? (y/N) ", assume_yes) {
            return Ok(Some(record.clone()));
        }
        return Ok(None);
    }

    for (index, record) in page.files.iter().enumerate() {
        println!(
            "[{}] {} - {} ({})",
            index + 1,
            record.file_name,
            record.description,
            format_date(record.date_added),
        );
    }
    if assume_yes {
        return Ok(Some(page.files[0].clone()));
    }
    let Some(line) = read_line("[?] Choice: ") else {
        return Ok(None);
    };
    let Ok(choice) = line.trim().parse::<usize>() else {
        return Ok(None);
    };
    if choice == 0 || choice > page.files.len() {
        return Ok(None);
    }
    Ok(Some(page.files[choice - 1].clone()))
}

/// Runs the classifier over the container, then lets explicit flags or an
/// interactive correction replace what it inferred. Corrections land before
/// staging, so the slot placement below uses the final triple.
fn classify_with_overrides(
    pak_path: &Path,
    options: &DownloadOptions,
    assume_yes: bool,
) -> Result<Classification> {
    let mut pak = PakFile::open(pak_path)?;
    let inferred = classify::classify(&mut pak);

    let has_flag_overrides =
        options.mesh.is_some() || options.slot.is_some() || options.character.is_some();

    let inferred = match inferred {
        Ok(classification) => classification,
        Err(err) if has_flag_overrides => {
            log::warn!("classification failed ({err}), using explicit flags");
            if options.mesh == Some(true) {
                Classification::mesh(options.character.as_deref())?
            } else {
                let slot = options
                    .slot
                    .as_deref()
                    .context("classification failed; pass --slot or --mesh")?;
                Classification::color(options.character.as_deref(), slot)?
            }
        }
        Err(err) => {
            return Err(err.context(format!(
                "could not classify {pak_path:?}; retry with --mesh or --slot/--char"
            )))
        }
    };

    let with_flags = inferred.with_overrides(
        options.mesh,
        options.character.as_deref(),
        options.slot.as_deref(),
    )?;

    if has_flag_overrides || assume_yes {
        return Ok(with_flags);
    }

    let summary = format!(
        "[?] Detected {} mod for {} - keep? (Y/n) ",
        with_flags.label(),
        with_flags
            .character()
            .and_then(chars::display_name)
            .unwrap_or("unknown character"),
    );
    if prompt_yn_default_yes(&summary) {
        return Ok(with_flags);
    }

    let Some(kind) = read_line("[?] Kind (mesh, or a slot number): ") else {
        return Ok(with_flags);
    };
    let kind = kind.trim();
    let corrected = if kind.eq_ignore_ascii_case("mesh") {
        with_flags.with_overrides(Some(true), None, None)?
    } else {
        with_flags.with_overrides(Some(false), None, Some(kind))?
    };
    Ok(corrected)
}

fn run_sync(config: &Config, force: bool) -> Result<()> {
    let report = sync::sync(&config.staging_root, &config.game_mod_dir, force)?;
    println!(
        "[!] Synced: {} copied, {} already present, {} removed",
        report.copied, report.skipped, report.removed
    );
    Ok(())
}

fn run_list(character: Option<&str>) -> Result<()> {
    let registry = ModRegistry::load(&crate::config::data_dir()?)?;
    let records: Vec<ModRecord> = registry
        .list()
        .into_iter()
        .filter(|record| match character {
            Some(code) => record.classification.character() == Some(code),
            None => true,
        })
        .collect();

    if records.is_empty() {
        println!("No mods stored{}", character.map(|c| format!(" for {c}")).unwrap_or_default());
        return Ok(());
    }

    println!("{:<28} {:<16} {:<8} {:<7} added", "name", "character", "type", "staged");
    for record in records {
        println!(
            "{:<28} {:<16} {:<8} {:<7} {}",
            record.name,
            record
                .classification
                .character()
                .and_then(chars::display_name)
                .unwrap_or("?"),
            record.classification.label(),
            if record.staged { "yes" } else { "no" },
            format_date(record.file.date_added),
        );
    }
    Ok(())
}

fn run_remove(name: &str) -> Result<()> {
    let mut registry = ModRegistry::load(&crate::config::data_dir()?)?;
    let Some(mut record) = registry.list().into_iter().find(|record| record.name == name)
    else {
        bail!("no stored mod named {name:?}");
    };
    if record.staged {
        record.unstage()?;
        println!("[*] Unstaged {name}");
    }
    registry.remove(name)?;
    println!("[!] Removed {name} from the registry");
    Ok(())
}

fn run_clear(config: &Config) -> Result<()> {
    if !(config.assume_yes
        || prompt_yn("[?] Drop every stored mod record? (y/N) ", config.assume_yes))
    {
        println!("[!] Cancelled");
        return Ok(());
    }
    let mut registry = ModRegistry::load(&crate::config::data_dir()?)?;
    registry.clear()?;
    println!("[!] Registry cleared; staged files were left in place");
    Ok(())
}

fn run_paths(config: &Config) -> Result<()> {
    println!("data:     {}", crate::config::data_dir()?.display());
    println!("staging:  {}", config.staging_root.display());
    println!("download: {}", config.download_dir.display());
    println!("game:     {}", config.game_mod_dir.display());
    Ok(())
}

/// One-line yes/no prompt. `assume_yes` short-circuits to true; otherwise a
/// failed or empty read rejects, which is the non-interactive default.
fn prompt_yn(question: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    read_line(question)
        .map(|line| line.trim().to_ascii_lowercase().starts_with('y'))
        .unwrap_or(false)
}

/// Like `prompt_yn` but an empty answer keeps the suggestion.
fn prompt_yn_default_yes(question: &str) -> bool {
    match read_line(question) {
        Some(line) => {
            let line = line.trim().to_ascii_lowercase();
            line.is_empty() || line.starts_with('y')
        }
        None => true,
    }
}

fn read_line(question: &str) -> Option<String> {
    print!("{question}");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    if line.is_empty() {
        return None;
    }
    Some(line)
}

fn format_date(timestamp: i64) -> String {
    let Ok(datetime) = OffsetDateTime::from_unix_timestamp(timestamp) else {
        return "-".to_string();
    };
    let Ok(format) = format_description::parse("[year]-[month]-[day]") else {
        return "-".to_string();
    };
    datetime.format(&format).unwrap_or_else(|_| "-".to_string())
}

fn print_help() {
    println!("ggmod - GameBanana mod manager for Guilty Gear -Strive-");
    println!();
    println!("Usage:");
    println!("  ggmod download <link> [--mesh | --slot <n>] [--char <XXX>] [--yes]");
    println!("  ggmod sync [--force]");
    println!("  ggmod list [XXX]");
    println!("  ggmod remove <name>");
    println!("  ggmod clear");
    println!("  ggmod paths");
    println!();
    println!("download   Fetch a mod from a GameBanana page, classify and stage it");
    println!("sync       Copy staged mods into the game's ~mods directory");
    println!("           --force wipes the directory first (destructive)");
    println!("list       Show stored mods, optionally for one character code");
    println!("remove     Unstage a mod and drop its registry record");
    println!("clear      Drop all registry records (staged files stay)");
    println!("paths      Print the directories ggmod uses");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn color_record(name: &str, downloads: &Path) -> ModRecord {
        ModRecord::new(
            name,
            FileRecord {
                file_name: format!("{name}.zip"),
                description: String::new(),
                date_added: 0,
                download_url: String::new(),
            },
            downloads.join(format!("{name}.pak")),
            downloads.join(format!("{name}.sig")),
            Classification::color(Some("SOL"), "07").unwrap(),
        )
    }

    #[test]
    fn replacing_a_slot_occupant_removes_it_from_the_next_sync() {
        let dir = tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        for name in ["mod-a", "mod-b"] {
            fs::write(downloads.join(format!("{name}.pak")), name).unwrap();
            fs::write(downloads.join(format!("{name}.sig")), name).unwrap();
        }
        let staging = dir.path().join("staging");
        let active = dir.path().join("active");
        let mut registry = ModRegistry::load(dir.path()).unwrap();

        let mut first = color_record("mod-a", &downloads);
        let slot = first.classification.slot_dir(&staging);
        assert!(sync::place_into_slot(&first, &slot, sync::InstallDecision::Install).unwrap());
        first.stage(&staging).unwrap();
        registry.store(&first).unwrap();

        let mut second = color_record("mod-b", &downloads);
        unstage_slot_occupants(&mut registry, &staging, &slot).unwrap();
        assert!(sync::place_into_slot(&second, &slot, sync::InstallDecision::Replace).unwrap());
        second.stage(&staging).unwrap();
        registry.store(&second).unwrap();

        sync::sync(&staging, &active, false).unwrap();
        let mut names: Vec<String> = fs::read_dir(&active)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["mod-b.pak", "mod-b.sig"]);

        let records = registry.list();
        let replaced = records.iter().find(|r| r.name == "mod-a").unwrap();
        assert!(!replaced.staged);
        assert!(records.iter().find(|r| r.name == "mod-b").unwrap().staged);
    }

    #[test]
    fn download_flags_parse() {
        let args: Vec<String> = ["download", "https://gamebanana.com/mods/1", "--slot", "7", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let CliCommand::Download(options) = parse_args(&args).unwrap() else {
            panic!("expected download");
        };
        assert_eq!(options.link, "https://gamebanana.com/mods/1");
        assert_eq!(options.mesh, Some(false));
        assert_eq!(options.slot.as_deref(), Some("7"));
        assert!(options.assume_yes);
    }

    #[test]
    fn mesh_and_slot_flags_conflict() {
        let args: Vec<String> = ["download", "link", "--mesh", "--slot", "2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(parse_args(&args).is_err());
    }

    #[test]
    fn sync_force_parses() {
        let args = vec!["sync".to_string(), "--force".to_string()];
        assert!(matches!(
            parse_args(&args).unwrap(),
            CliCommand::Sync { force: true }
        ));
    }

    #[test]
    fn bare_invocation_prints_help() {
        assert!(matches!(parse_args(&[]).unwrap(), CliCommand::Help));
    }

    #[test]
    fn dates_format_for_listing() {
        assert_eq!(format_date(1_700_000_000), "2023-11-14");
    }
}
