//! Catalog of installable extensions.
//!
//! Catalog files are JSON:API exports of drupal.org project listings, one file
//! per major platform version:
//!
//! ```json
//! {"data": [{"attributes": {"title": "Token", "field_project_machine_name": "token", ...}}]}
//! ```

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::profile::PlatformKind;

const REQUIRED_KEYS: [&str; 6] = [
    "body",
    "title",
    "drupal_internal__nid",
    "field_project_machine_name",
    "field_active_installs_total",
    "field_security_advisory_coverage",
];

const NODE_URL_PREFIX: &str = "https://www.drupal.org/node/";

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Catalog entry {index} is missing key '{key}'")]
    MissingKey { index: usize, key: String },

    #[error("Invalid catalog platform version: {0}")]
    InvalidVersion(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstructionKind {
    ComposerNamespace,
}

/// One step needed to install an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallInstruction {
    pub kind: InstructionKind,
    /// For `ComposerNamespace`, the package name (`drupal/token`).
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Installable {
    pub title: String,
    pub machine_name: String,
    /// HTML as published.
    pub description: String,
    pub link: String,
    pub platform: PlatformKind,
    /// Platform version the catalog file was published for.
    pub platform_version: Version,
    pub instructions: Vec<InstallInstruction>,
    pub installs_total: u64,
    pub security_coverage: String,
}

impl Installable {
    fn from_attributes(
        index: usize,
        attributes: &Map<String, Value>,
        platform_version: &Version,
    ) -> Result<Self, CatalogError> {
        if let Some(key) = REQUIRED_KEYS.iter().find(|key| !attributes.contains_key(**key)) {
            return Err(CatalogError::MissingKey {
                index,
                key: (*key).to_string(),
            });
        }

        let text = |key: &str| {
            attributes
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let description = match attributes.get("body") {
            Some(Value::String(body)) => body.clone(),
            Some(Value::Object(body)) => body
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };

        let nid = match attributes.get("drupal_internal__nid") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };

        let instructions = attributes
            .get("field_composer_namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.trim().is_empty())
            .map(|ns| InstallInstruction {
                kind: InstructionKind::ComposerNamespace,
                command: ns.trim().to_string(),
            })
            .into_iter()
            .collect();

        Ok(Self {
            title: text("title"),
            machine_name: text("field_project_machine_name"),
            description,
            link: format!("{NODE_URL_PREFIX}{nid}"),
            platform: PlatformKind::Drupal,
            platform_version: platform_version.clone(),
            instructions,
            installs_total: attributes
                .get("field_active_installs_total")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            security_coverage: text("field_security_advisory_coverage"),
        })
    }

    /// Same major version as the catalog it came from.
    pub fn is_compatible_with(&self, version: &Version) -> bool {
        self.platform_version.major == version.major
    }

    /// Case-insensitive match on title or machine name.
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.machine_name.to_lowercase().contains(&needle)
    }

    /// The composer packages this installable needs, in order.
    pub fn composer_namespaces(&self) -> impl Iterator<Item = &str> {
        self.instructions
            .iter()
            .filter(|i| i.kind == InstructionKind::ComposerNamespace)
            .map(|i| i.command.as_str())
    }

    /// Description with markup removed, at most `max_len` characters.
    pub fn plain_description(&self, max_len: usize) -> String {
        if self.description.chars().count() < 2 {
            return self.description.clone();
        }

        let stripped = TAG_PATTERN.replace_all(&self.description, " ");
        let decoded = stripped
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");
        let text = decoded.split_whitespace().collect::<Vec<_>>().join(" ");

        text.chars().take(max_len).collect()
    }
}

#[derive(Deserialize)]
struct CatalogDocument {
    data: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    attributes: Map<String, Value>,
}

/// All installables known to this process, across platform versions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    installables: Vec<Installable>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one JSON:API document published for `platform_version`.
    pub fn parse(json: &str, platform_version: &Version) -> Result<Vec<Installable>, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        document
            .data
            .iter()
            .enumerate()
            .map(|(index, entry)| Installable::from_attributes(index, &entry.attributes, platform_version))
            .collect()
    }

    /// Load a catalog file and add its entries.
    pub fn load_file(&mut self, path: &Path, platform_version: &str) -> Result<usize, CatalogError> {
        let version = crate::profile::parse_platform_version(platform_version)
            .map_err(|_| CatalogError::InvalidVersion(platform_version.to_string()))?;
        let json = std::fs::read_to_string(path)?;
        let entries = Self::parse(&json, &version)?;
        let count = entries.len();
        info!(path = %path.display(), version = %version, count, "Loaded catalog");
        self.installables.extend(entries);
        Ok(count)
    }

    pub fn extend(&mut self, installables: impl IntoIterator<Item = Installable>) {
        self.installables.extend(installables);
    }

    pub fn len(&self) -> usize {
        self.installables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installables.is_empty()
    }

    /// Installables published for the major version of `version`.
    pub fn for_version(&self, version: &Version) -> Vec<&Installable> {
        self.installables
            .iter()
            .filter(|i| i.is_compatible_with(version))
            .collect()
    }

    /// Every entry with exactly this machine name, across versions.
    pub fn find_by_machine_name(&self, machine_name: &str) -> Vec<&Installable> {
        let found: Vec<&Installable> = self
            .installables
            .iter()
            .filter(|i| i.machine_name == machine_name)
            .collect();
        debug!(machine_name, count = found.len(), "Catalog lookup");
        found
    }

    pub fn search(&self, needle: &str) -> Vec<&Installable> {
        self.installables.iter().filter(|i| i.matches(needle)).collect()
    }
}
