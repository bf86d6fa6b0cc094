use crate::{chars, error::ModError};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Listing/content access to a packed asset container. The classifier only
/// ever sees this surface, so tests drive it with an in-memory fake and the
/// pak reader stays behind the seam.
pub trait AssetSource {
    /// Internal asset paths, in container listing order.
    fn paths(&self) -> &[String];
    /// Raw decoded bytes of one asset.
    fn read(&mut self, path: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModKind {
    Mesh,
    ColorSlot,
}

/// What a mod targets: character, mesh vs. color-slot, and the slot number
/// for color mods. Constructed only through the validating factories, so
/// kind and slot can never disagree: `Mesh` has no slot, `ColorSlot` always
/// has a two-digit one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClassificationWire", into = "ClassificationWire")]
pub struct Classification {
    character: Option<String>,
    kind: ModKind,
    slot: Option<String>,
}

impl Classification {
    pub fn mesh(character: Option<&str>) -> Result<Self, ModError> {
        Ok(Self {
            character: validate_character(character)?,
            kind: ModKind::Mesh,
            slot: None,
        })
    }

    pub fn color(character: Option<&str>, slot: &str) -> Result<Self, ModError> {
        Ok(Self {
            character: validate_character(character)?,
            kind: ModKind::ColorSlot,
            slot: Some(normalize_slot(slot)?),
        })
    }

    pub fn character(&self) -> Option<&str> {
        self.character.as_deref()
    }

    pub fn kind(&self) -> ModKind {
        self.kind
    }

    pub fn slot(&self) -> Option<&str> {
        self.slot.as_deref()
    }

    pub fn is_mesh(&self) -> bool {
        self.kind == ModKind::Mesh
    }

    /// Short label for listings: `Mesh` or `Color07`.
    pub fn label(&self) -> String {
        match &self.slot {
            Some(slot) => format!("Color{slot}"),
            None => "Mesh".to_string(),
        }
    }

    /// Per-character install location under the staging root:
    /// `<root>/<CHR>/mesh` or `<root>/<CHR>/<NN>`. Every copy of a mod's
    /// pak/sig pair with this classification lives either here or in the
    /// name-keyed staging directory; both are derived, never stored.
    pub fn slot_dir(&self, staging_root: &Path) -> PathBuf {
        let character = self.character.as_deref().unwrap_or("UNK");
        match &self.slot {
            Some(slot) => staging_root.join(character).join(slot),
            None => staging_root.join(character).join("mesh"),
        }
    }

    /// Applies only the supplied fields on top of `self`, keeping the
    /// mesh/slot exclusion intact. A mesh override together with a slot, or
    /// a non-mesh override with no slot available, is rejected.
    pub fn with_overrides(
        &self,
        mesh: Option<bool>,
        character: Option<&str>,
        slot: Option<&str>,
    ) -> Result<Self, ModError> {
        let character = match character {
            Some(code) => validate_character(Some(code))?,
            None => self.character.clone(),
        };

        let want_mesh = mesh.unwrap_or(self.kind == ModKind::Mesh);
        if want_mesh {
            if slot.is_some() {
                return Err(ModError::ConflictingClassification(
                    "a mesh mod cannot carry a color slot",
                ));
            }
            return Ok(Self {
                character,
                kind: ModKind::Mesh,
                slot: None,
            });
        }

        let slot = match slot {
            Some(value) => normalize_slot(value)?,
            None => match &self.slot {
                Some(value) => value.clone(),
                None => {
                    return Err(ModError::ConflictingClassification(
                        "a color mod needs a slot number",
                    ))
                }
            },
        };
        Ok(Self {
            character,
            kind: ModKind::ColorSlot,
            slot: Some(slot),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct ClassificationWire {
    character: Option<String>,
    kind: ModKind,
    slot: Option<String>,
}

impl TryFrom<ClassificationWire> for Classification {
    type Error = ModError;

    fn try_from(wire: ClassificationWire) -> Result<Self, ModError> {
        match (wire.kind, wire.slot.as_deref()) {
            (ModKind::Mesh, None) => Classification::mesh(wire.character.as_deref()),
            (ModKind::ColorSlot, Some(slot)) => {
                Classification::color(wire.character.as_deref(), slot)
            }
            (ModKind::Mesh, Some(_)) => Err(ModError::ConflictingClassification(
                "stored mesh record carries a slot",
            )),
            (ModKind::ColorSlot, None) => Err(ModError::ConflictingClassification(
                "stored color record is missing its slot",
            )),
        }
    }
}

impl From<Classification> for ClassificationWire {
    fn from(value: Classification) -> Self {
        Self {
            character: value.character,
            kind: value.kind,
            slot: value.slot,
        }
    }
}

fn validate_character(character: Option<&str>) -> Result<Option<String>, ModError> {
    let Some(code) = character else {
        return Ok(None);
    };
    let code = code.to_ascii_uppercase();
    if code.len() != 3 || !chars::is_known_code(&code) {
        return Err(ModError::InvalidCharacterId(code));
    }
    Ok(Some(code))
}

/// Coerces a slot value to the stored two-digit form: `"7"` becomes `"07"`,
/// `"12"` stays `"12"`. Longer digit runs keep their last two digits, the
/// same take the slot heuristic uses on `Color1007`-style matches.
pub fn normalize_slot(raw: &str) -> Result<String, ModError> {
    let digits: String = raw.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() != raw.len() {
        return Err(ModError::ConflictingClassification(
            "slot must be a number",
        ));
    }
    if digits.len() >= 2 {
        Ok(digits[digits.len() - 2..].to_string())
    } else {
        Ok(format!("0{digits}"))
    }
}

/// Everything one scan over the container yields. Both heuristics and all
/// slot evidence are collected in a single pass so each asset is decoded
/// once.
struct ScanEvidence {
    /// Character code hit counts, in first-encountered order.
    character_counts: Vec<(String, usize)>,
    mesh: bool,
    /// `(code, slot)` captures from full costume/material paths.
    slot_votes: Vec<(String, String)>,
    /// Whether a `<AAA>_base.uasset` asset exists; when it does, it alone
    /// decides the fallback and `first_slot` is ignored.
    has_base_asset: bool,
    base_slot: Option<String>,
    first_slot: Option<String>,
    assets: usize,
}

/// Infers character, kind and slot from the container contents.
///
/// Character id is the most frequent `Chara/<code>` match across all assets
/// (ties break toward the earlier find). A mod is a mesh mod if any asset
/// body mentions `Mesh` while the asset path itself is not a shader. Slot
/// comes from the mode of full `/Chara/<id>/Costume../Material/Color<n>/`
/// captures, falling back to a bare `Color<n>` search in the base asset, or
/// in the first asset only when no base asset exists. A base asset without a
/// `Color<n>` run is a failure, not a reason to look elsewhere.
pub fn classify(source: &mut dyn AssetSource) -> Result<Classification> {
    let evidence = scan(source)?;

    let character = mode(&evidence.character_counts).ok_or(ModError::CharacterNotFound {
        assets: evidence.assets,
    })?;
    log::info!(
        "classified character {} ({})",
        character,
        chars::display_name(&character).unwrap_or("?")
    );

    if evidence.mesh {
        return Ok(Classification::mesh(Some(character.as_str()))?);
    }

    let strict: Vec<(String, usize)> = count_in_order(
        evidence
            .slot_votes
            .iter()
            .filter(|(code, _)| *code == character)
            .map(|(_, slot)| slot.clone()),
    );
    let fallback = if evidence.has_base_asset {
        evidence.base_slot
    } else {
        evidence.first_slot
    };
    let slot = mode(&strict)
        .or(fallback)
        .ok_or(ModError::SlotNotFound {
            character: character.clone(),
            assets: evidence.assets,
        })?;

    Ok(Classification::color(Some(character.as_str()), &slot)?)
}

fn scan(source: &mut dyn AssetSource) -> Result<ScanEvidence> {
    let paths: Vec<String> = source.paths().to_vec();
    let mut character_hits = Vec::new();
    let mut mesh = false;
    let mut slot_votes = Vec::new();
    let mut has_base_asset = false;
    let mut base_slot = None;
    let mut first_slot = None;

    for (index, path) in paths.iter().enumerate() {
        let data = source.read(path)?;

        for code in find_character_codes(&data) {
            log::debug!("character pattern {code} in {path}");
            character_hits.push(code);
        }

        if !mesh
            && !path.to_ascii_lowercase().contains("shader")
            && contains(&data, b"Mesh")
        {
            log::debug!("mesh pattern in {path}");
            mesh = true;
        }

        slot_votes.extend(find_slot_votes(&data));

        if !has_base_asset && is_base_asset(path) {
            has_base_asset = true;
            base_slot = find_bare_slot(&data);
        }
        if index == 0 {
            first_slot = find_bare_slot(&data);
        }
    }

    Ok(ScanEvidence {
        character_counts: count_in_order(character_hits.into_iter()),
        mesh,
        slot_votes,
        has_base_asset,
        base_slot,
        first_slot,
        assets: paths.len(),
    })
}

fn count_in_order(values: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(existing, _)| *existing == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    counts
}

fn mode(counts: &[(String, usize)]) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map(|(_, existing)| *count > existing).unwrap_or(true) {
            best = Some((value.as_str(), *count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

/// All `Chara/<code>` occurrences where `<code>` is a known character.
fn find_character_codes(data: &[u8]) -> Vec<String> {
    let mut codes = Vec::new();
    for at in find_all(data, b"Chara/") {
        let start = at + b"Chara/".len();
        let Some(code) = data.get(start..start + 3) else {
            continue;
        };
        if !code.iter().all(|b| b.is_ascii_uppercase()) {
            continue;
        }
        let code = String::from_utf8_lossy(code).to_string();
        if chars::is_known_code(&code) {
            codes.push(code);
        }
    }
    codes
}

/// Captures `(code, slot)` from every full
/// `Chara/<code>/Costume<n>/Material/Color<n>/<code>_base` path in the data.
fn find_slot_votes(data: &[u8]) -> Vec<(String, String)> {
    let mut votes = Vec::new();
    for at in find_all(data, b"Chara/") {
        let mut cursor = at + b"Chara/".len();
        let Some(code) = data.get(cursor..cursor + 3) else {
            continue;
        };
        if !code.iter().all(|b| b.is_ascii_uppercase()) {
            continue;
        }
        let code = String::from_utf8_lossy(code).to_string();
        if !chars::is_known_code(&code) {
            continue;
        }
        cursor += 3;

        if !eat(data, &mut cursor, b"/Costume") {
            continue;
        }
        if read_digits(data, &mut cursor).is_empty() {
            continue;
        }
        if !eat(data, &mut cursor, b"/Material/Color") {
            continue;
        }
        let slot_digits = read_digits(data, &mut cursor);
        if slot_digits.is_empty() {
            continue;
        }
        if !eat(data, &mut cursor, b"/") {
            continue;
        }
        if !eat(data, &mut cursor, code.as_bytes()) {
            continue;
        }
        if !eat(data, &mut cursor, b"_base") {
            continue;
        }

        if let Ok(slot) = normalize_slot(&slot_digits) {
            votes.push((code, slot));
        }
    }
    votes
}

/// First `Color<digits>` run in the data, reduced to its last two digits.
fn find_bare_slot(data: &[u8]) -> Option<String> {
    for at in find_all(data, b"Color") {
        let mut cursor = at + b"Color".len();
        let digits = read_digits(data, &mut cursor);
        if !digits.is_empty() {
            return normalize_slot(&digits).ok();
        }
    }
    None
}

fn is_base_asset(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some(stem) = name.strip_suffix("_base.uasset") else {
        return false;
    };
    stem.len() >= 3
        && stem[stem.len() - 3..]
            .bytes()
            .all(|b| b.is_ascii_uppercase())
}

fn contains(data: &[u8], needle: &[u8]) -> bool {
    find_all(data, needle).next().is_some()
}

fn find_all<'a>(data: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    data.windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(at, _)| at)
}

fn eat(data: &[u8], cursor: &mut usize, expected: &[u8]) -> bool {
    if data.get(*cursor..*cursor + expected.len()) == Some(expected) {
        *cursor += expected.len();
        true
    } else {
        false
    }
}

fn read_digits(data: &[u8], cursor: &mut usize) -> String {
    let mut digits = String::new();
    while let Some(b) = data.get(*cursor) {
        if !b.is_ascii_digit() {
            break;
        }
        digits.push(*b as char);
        *cursor += 1;
    }
    digits
}
