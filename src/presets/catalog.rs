use crate::error::{PullError, Result};
use crate::presets::size::parse_size_string;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path};

/// A preset as declared in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetEntry {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One file entry as written in the catalog, possibly malformed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    Spec {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        size: Option<String>,
    },
    /// Legacy string-only entry, kept for display but never downloadable
    Legacy(String),
    /// Anything else, e.g. a numeric `size`; rejected with a warning
    Invalid(serde_json::Value),
}

/// A well-formed, actionable file declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub relative_path: String,
    pub source_url: String,
    pub declared_size: Option<String>,
}

impl FileSpec {
    /// Declared size in bytes, `None` when absent or unparsable
    #[must_use]
    pub fn declared_bytes(&self) -> Option<u64> {
        self.declared_size.as_deref().and_then(parse_size_string)
    }

    /// Final path component, used for display and side-file names
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Why a file entry was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MalformedFile {
    Legacy(String),
    MissingPath,
    MissingUrl,
    MissingPathAndUrl,
    UnsafePath(String),
    Invalid(String),
}

impl fmt::Display for MalformedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy(raw) => write!(f, "legacy string entry '{raw}' is not actionable"),
            Self::MissingPath => f.write_str("entry has a url but no path"),
            Self::MissingUrl => f.write_str("entry has a path but no url"),
            Self::MissingPathAndUrl => f.write_str("entry has neither path nor url"),
            Self::UnsafePath(path) => write!(f, "path '{path}' escapes the install root"),
            Self::Invalid(raw) => write!(f, "entry {raw} is not a file declaration"),
        }
    }
}

/// Structured, non-fatal diagnostic for a rejected file entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileWarning {
    pub preset_id: String,
    pub index: usize,
    pub reason: MalformedFile,
}

impl fmt::Display for FileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "preset '{}' file #{}: {}",
            self.preset_id, self.index, self.reason
        )
    }
}

impl FileEntry {
    /// Convert into an actionable [`FileSpec`]
    pub fn to_spec(&self) -> std::result::Result<FileSpec, MalformedFile> {
        let (path, url, size) = match self {
            Self::Legacy(raw) => return Err(MalformedFile::Legacy(raw.clone())),
            Self::Invalid(raw) => return Err(MalformedFile::Invalid(raw.to_string())),
            Self::Spec { path, url, size } => (path, url, size),
        };

        let path = path.as_deref().map(str::trim).filter(|p| !p.is_empty());
        let url = url.as_deref().map(str::trim).filter(|u| !u.is_empty());

        let (path, url) = match (path, url) {
            (Some(path), Some(url)) => (path, url),
            (None, None) => return Err(MalformedFile::MissingPathAndUrl),
            (None, Some(_)) => return Err(MalformedFile::MissingPath),
            (Some(_), None) => return Err(MalformedFile::MissingUrl),
        };

        if !is_contained_path(path) {
            return Err(MalformedFile::UnsafePath(path.to_string()));
        }

        Ok(FileSpec {
            relative_path: path.to_string(),
            source_url: url.to_string(),
            declared_size: size.clone(),
        })
    }
}

impl PresetEntry {
    /// Split the declared files into actionable specs and warnings
    #[must_use]
    pub fn file_specs(&self) -> (Vec<FileSpec>, Vec<FileWarning>) {
        let mut specs = Vec::with_capacity(self.files.len());
        let mut warnings = Vec::new();

        for (index, entry) in self.files.iter().enumerate() {
            match entry.to_spec() {
                Ok(spec) => specs.push(spec),
                Err(reason) => warnings.push(FileWarning {
                    preset_id: self.id.clone(),
                    index,
                    reason,
                }),
            }
        }

        (specs, warnings)
    }
}

/// Relative path that stays below the install root
fn is_contained_path(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Ordered, read-only mapping of preset ID to [`PresetEntry`]
#[derive(Debug, Clone, Default)]
pub struct PresetCatalog {
    entries: Vec<PresetEntry>,
    index: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct CatalogDocument {
    presets: Option<OrderedPresets>,
}

/// Presets in document order
struct OrderedPresets(Vec<(String, PresetEntry)>);

impl<'de> Deserialize<'de> for OrderedPresets {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PresetsVisitor;

        impl<'de> Visitor<'de> for PresetsVisitor {
            type Value = OrderedPresets;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of preset id to preset")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut seen = HashSet::new();
                let mut presets = Vec::new();
                while let Some((id, entry)) = map.next_entry::<String, PresetEntry>()? {
                    if !seen.insert(id.clone()) {
                        return Err(de::Error::custom(format!("duplicate preset id '{id}'")));
                    }
                    presets.push((id, entry));
                }
                Ok(OrderedPresets(presets))
            }
        }

        deserializer.deserialize_map(PresetsVisitor)
    }
}

impl PresetCatalog {
    /// Load catalog from file
    ///
    /// `.toml` files are parsed as TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PullError::Catalog(format!(
                "Catalog not found at {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            PullError::Catalog(format!("Failed to read {}: {e}", path.display()))
        })?;

        let catalog = if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }?;

        tracing::debug!(
            "Loaded {} presets from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let document: CatalogDocument = toml::from_str(content)
            .map_err(|e| PullError::Catalog(format!("Failed to parse catalog: {e}")))?;
        Self::from_document(document)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(content)
            .map_err(|e| PullError::Catalog(format!("Failed to parse catalog: {e}")))?;
        Self::from_document(document)
    }

    fn from_document(document: CatalogDocument) -> Result<Self> {
        let presets = document.presets.ok_or_else(|| {
            PullError::Catalog("Catalog is missing the top-level `presets` key".to_string())
        })?;

        let mut catalog = Self::default();
        for (id, mut entry) in presets.0 {
            entry.id.clone_from(&id);
            if entry.name.is_empty() {
                entry.name.clone_from(&id);
            }
            if entry.files.is_empty() {
                tracing::debug!("Preset '{id}' declares no files");
            }
            catalog.index.insert(id, catalog.entries.len());
            catalog.entries.push(entry);
        }

        Ok(catalog)
    }

    /// Find preset by ID
    pub fn get(&self, preset_id: &str) -> Result<&PresetEntry> {
        self.index
            .get(preset_id)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| {
                let hint = self
                    .suggest(preset_id)
                    .map(|s| format!(" (did you mean '{s}'?)"))
                    .unwrap_or_default();
                PullError::NotFound(format!("Unknown preset '{preset_id}'{hint}"))
            })
    }

    #[must_use]
    pub fn contains(&self, preset_id: &str) -> bool {
        self.index.contains_key(preset_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresetEntry> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Presets whose category matches, ignoring case
    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a PresetEntry> {
        self.entries
            .iter()
            .filter(move |e| e.category.eq_ignore_ascii_case(category))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find closest preset ID using Levenshtein distance
    #[must_use]
    pub fn suggest(&self, preset_id: &str) -> Option<&str> {
        if preset_id.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .map(|e| {
                let distance = levenshtein_distance(
                    &preset_id.to_ascii_uppercase(),
                    &e.id.to_ascii_uppercase(),
                );
                (e.id.as_str(), distance)
            })
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 2) // Only suggest if within 2 edits
            .map(|(id, _)| id)
    }
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s2_chars: Vec<char> = s2.chars().collect();
    let mut previous: Vec<usize> = (0..=s2_chars.len()).collect();

    for (i, c1) in s1.chars().enumerate() {
        let mut current = vec![i + 1; s2_chars.len() + 1];
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = usize::from(c1 != *c2);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        previous = current;
    }

    previous[s2_chars.len()]
}
