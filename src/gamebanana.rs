use crate::registry::FileRecord;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

const DOWNLOAD_PAGE_URL: &str = "https://gamebanana.com/apiv10/Mod/{}/DownloadPage";
const PROFILE_URL: &str = "https://gamebanana.com/apiv10/Mod/{}?_csvProperties=_sName";
const USER_AGENT: &str = "ggmod";

/// A mod page's name plus its downloadable files.
#[derive(Debug, Clone)]
pub struct ModPage {
    pub name: String,
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Deserialize)]
struct DownloadPage {
    #[serde(rename = "_aFiles")]
    files: Vec<WireFile>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(rename = "_sFile")]
    file: String,
    #[serde(rename = "_sDescription", default)]
    description: String,
    #[serde(rename = "_tsDateAdded", default)]
    date_added: i64,
    #[serde(rename = "_sDownloadUrl")]
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(rename = "_sName")]
    name: String,
}

/// Accepts a full `https://gamebanana.com/mods/<id>` URL or a bare numeric id.
pub fn parse_page_id(link: &str) -> Result<String> {
    let tail = link.trim_end_matches('/').rsplit('/').next().unwrap_or(link);
    if tail.is_empty() || !tail.chars().all(|ch| ch.is_ascii_digit()) {
        bail!("not a GameBanana mod link or id: {link}");
    }
    Ok(tail.to_string())
}

pub fn fetch_mod_page(page_id: &str) -> Result<ModPage> {
    let name = fetch_mod_name(page_id)?;
    let files = fetch_file_records(page_id)?;
    Ok(ModPage { name, files })
}

/// Downloadable file records for one mod page.
pub fn fetch_file_records(page_id: &str) -> Result<Vec<FileRecord>> {
    let url = DOWNLOAD_PAGE_URL.replace("{}", page_id);
    let response = agent()
        .get(&url)
        .set("User-Agent", USER_AGENT)
        .call()
        .context("fetch download page")?;
    let page: DownloadPage = response.into_json().context("parse download page")?;
    Ok(page
        .files
        .into_iter()
        .map(|file| FileRecord {
            file_name: file.file,
            description: file.description,
            date_added: file.date_added,
            download_url: file.download_url,
        })
        .collect())
}

fn fetch_mod_name(page_id: &str) -> Result<String> {
    let url = PROFILE_URL.replace("{}", page_id);
    let response = agent()
        .get(&url)
        .set("User-Agent", USER_AGENT)
        .call()
        .context("fetch mod profile")?;
    let profile: Profile = response.into_json().context("parse mod profile")?;
    Ok(slugify(&profile.name))
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(30))
        .timeout_write(Duration::from_secs(30))
        .build()
}

/// Page titles become directory-safe mod names: lowercased, spaces to
/// hyphens, apostrophes dropped.
pub fn slugify(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .replace('\'', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
