//! Catalog export documents.
//!
//! Each logical capability collapses into one document: a primary variant's
//! source under `code`, and every other distinct variant under
//! `platform_overrides`. Documents round-trip through JSON so the diagnostic
//! driver can run against an exported catalog file instead of the built-in
//! registry.

use crate::catalog::metadata::RegisteredCapability;
use crate::catalog::registry::CapabilityRegistry;
use crate::platform::PlatformKey;
use anyhow::{Context, Result, anyhow, bail};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::warn;

const CATALOG_SCHEMA: &str = include_str!("../../schema/catalog.json");

const DOCUMENT_TYPE: &str = "atomic";
const EXECUTION_MODE: &str = "internal";
const SCOPE_GLOBAL: &str = "global";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformOverride {
    pub code: String,
}

/// Serialized form of one logical capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(default = "default_execution_mode")]
    pub execution_mode: String,
    #[serde(default = "default_scope")]
    pub scope: Vec<String>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub platforms: Vec<PlatformKey>,
    #[serde(default = "empty_object")]
    pub input_schema: Value,
    #[serde(default = "empty_object")]
    pub output_schema: Value,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_overrides: Option<BTreeMap<PlatformKey, PlatformOverride>>,
}

fn default_type() -> String {
    DOCUMENT_TYPE.to_string()
}

fn default_execution_mode() -> String {
    EXECUTION_MODE.to_string()
}

fn default_scope() -> Vec<String> {
    vec![SCOPE_GLOBAL.to_string()]
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl CatalogDocument {
    /// Collapse every platform variant of one capability into a document.
    ///
    /// The primary is the `platform` match, else the universal variant, else
    /// the first variant in key order. Slots sharing the primary's
    /// implementation are not repeated as overrides.
    pub(crate) fn from_variants(
        variants: &BTreeMap<PlatformKey, Arc<RegisteredCapability>>,
        platform: &PlatformKey,
    ) -> Option<Self> {
        let primary = variants
            .get(platform)
            .or_else(|| variants.get(&PlatformKey::all()))
            .or_else(|| variants.values().next())?;
        let meta = &primary.metadata;

        let overrides: BTreeMap<PlatformKey, PlatformOverride> = variants
            .iter()
            .filter(|(_, variant)| !Arc::ptr_eq(variant, primary))
            .map(|(key, variant)| {
                (
                    key.clone(),
                    PlatformOverride {
                        code: variant.body.source().to_string(),
                    },
                )
            })
            .collect();

        Some(Self {
            name: meta.name.clone(),
            description: meta.description.clone(),
            kind: default_type(),
            execution_mode: default_execution_mode(),
            scope: default_scope(),
            default: false,
            platforms: variants.keys().cloned().collect(),
            input_schema: meta.input_schema.clone(),
            output_schema: meta.output_schema.clone(),
            requirements: meta.requirements.clone(),
            code: primary.body.source().to_string(),
            platform_overrides: if overrides.is_empty() {
                None
            } else {
                Some(overrides)
            },
        })
    }

    /// Source text to run on `platform`: its override when one exists,
    /// otherwise the primary code.
    pub fn code_for(&self, platform: &PlatformKey) -> &str {
        self.platform_overrides
            .as_ref()
            .and_then(|overrides| overrides.get(platform))
            .map(|entry| entry.code.as_str())
            .unwrap_or(&self.code)
    }
}

/// Name-indexed set of catalog documents.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    documents: BTreeMap<String, CatalogDocument>,
}

impl Catalog {
    pub fn from_documents(documents: impl IntoIterator<Item = CatalogDocument>) -> Self {
        let mut by_name = BTreeMap::new();
        for document in documents {
            if let Some(previous) = by_name.insert(document.name.clone(), document) {
                warn!(capability = %previous.name, "duplicate catalog entry; keeping the last one");
            }
        }
        Self { documents: by_name }
    }

    /// Export `registry` with primaries chosen for `platform`.
    pub fn from_registry(registry: &CapabilityRegistry, platform: &PlatformKey) -> Self {
        Self::from_documents(registry.export_catalog_for(platform))
    }

    /// Load an exported catalog (a JSON array of documents) from disk.
    ///
    /// The file is validated against the bundled catalog schema before
    /// deserialization so malformed exports fail with every violation listed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening catalog {}", path.display()))?;
        let value: Value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        validate_catalog_value(&value)
            .with_context(|| format!("validating catalog {}", path.display()))?;

        let documents: Vec<CatalogDocument> = serde_json::from_value(value)
            .with_context(|| format!("decoding catalog {}", path.display()))?;
        if let Some(idx) = documents.iter().position(|doc| doc.name.trim().is_empty()) {
            bail!(
                "catalog {} entry {} has an empty name",
                path.display(),
                idx
            );
        }
        Ok(Self::from_documents(documents))
    }

    pub fn get(&self, name: &str) -> Option<&CatalogDocument> {
        self.documents.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn documents(&self) -> impl Iterator<Item = &CatalogDocument> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn catalog_schema() -> Result<&'static Value> {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    if let Some(schema) = SCHEMA.get() {
        return Ok(schema);
    }
    let parsed: Value =
        serde_json::from_str(CATALOG_SCHEMA).context("parsing bundled catalog schema")?;
    Ok(SCHEMA.get_or_init(|| parsed))
}

fn validate_catalog_value(value: &Value) -> Result<()> {
    let schema = catalog_schema()?;
    let compiled = JSONSchema::compile(schema)
        .map_err(|err| anyhow!("compiling bundled catalog schema: {err}"))?;
    if let Err(errors) = compiled.validate(value) {
        let details = errors
            .map(|err| format!("{}: {err}", err.instance_path))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("catalog does not match schema:\n{details}");
    }
    Ok(())
}
