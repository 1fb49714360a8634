//! Configuration system for sheet, column and invoice-number patterns

use crate::error::ConfigError;
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const PART_NO: &str = "part_no";
pub const QTY: &str = "qty";
pub const NW: &str = "nw";
pub const GW: &str = "gw";
pub const PRICE: &str = "price";
pub const AMOUNT: &str = "amount";
pub const CURRENCY: &str = "currency";
pub const INV_NO: &str = "inv_no";
pub const PO_NO: &str = "po_no";
pub const COO: &str = "coo";
pub const COD: &str = "cod";
pub const BRAND: &str = "brand";
pub const BRAND_TYPE: &str = "brand_type";
pub const MODEL: &str = "model";
pub const SERIAL: &str = "serial";

/// Fields the engine reads directly; always treated as required
const INVOICE_ENGINE_FIELDS: &[&str] = &[PART_NO, QTY];
const PACKING_ENGINE_FIELDS: &[&str] = &[PART_NO, QTY, NW, GW];

const DEFAULT_CONFIG: &str = include_str!("default_config.toml");

/// Which of the two tables a sheet holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Invoice,
    Packing,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Invoice => "invoice",
            TableKind::Packing => "packing",
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main reconciliation configuration, as written in TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub invoice_sheet: SheetPatterns,
    #[serde(default)]
    pub packing_sheet: SheetPatterns,
    #[serde(default)]
    pub invoice_columns: IndexMap<String, FieldSpec>,
    #[serde(default)]
    pub packing_columns: IndexMap<String, FieldSpec>,
    #[serde(default)]
    pub invoice_number: InvoiceNumberPatterns,
    /// Currency text to target code
    #[serde(default)]
    pub currency_lookup: IndexMap<String, String>,
    /// Country-of-origin text to target code
    #[serde(default)]
    pub country_lookup: IndexMap<String, String>,
}

/// Sheet-name patterns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SheetPatterns {
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Header patterns for one canonical field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

/// Patterns for finding the invoice number in the header area
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceNumberPatterns {
    /// Value embedded in the same cell, first capture group
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Label cell; the value sits to the right or below
    #[serde(default)]
    pub label_patterns: Vec<String>,
    /// Candidates matching any of these are rejected
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl ReconcileConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Column table for one kind of sheet
    pub fn columns(&self, kind: TableKind) -> &IndexMap<String, FieldSpec> {
        match kind {
            TableKind::Invoice => &self.invoice_columns,
            TableKind::Packing => &self.packing_columns,
        }
    }

    /// Validate and compile every pattern
    pub fn compile(&self) -> Result<CompiledConfig, ConfigError> {
        Ok(CompiledConfig {
            invoice_sheet: compile_list(&self.invoice_sheet.patterns, "invoice_sheet", "patterns")?,
            packing_sheet: compile_list(&self.packing_sheet.patterns, "packing_sheet", "patterns")?,
            invoice_columns: compile_fields(
                &self.invoice_columns,
                "invoice_columns",
                INVOICE_ENGINE_FIELDS,
            )?,
            packing_columns: compile_fields(
                &self.packing_columns,
                "packing_columns",
                PACKING_ENGINE_FIELDS,
            )?,
            invoice_number: InvoiceNumberMatchers {
                capture: compile_list(&self.invoice_number.patterns, "invoice_number", "patterns")?,
                label: compile_list(
                    &self.invoice_number.label_patterns,
                    "invoice_number",
                    "label_patterns",
                )?,
                exclude: compile_list(
                    &self.invoice_number.exclude_patterns,
                    "invoice_number",
                    "exclude_patterns",
                )?,
            },
            currency_lookup: LookupTable::build(&self.currency_lookup, "currency_lookup")?,
            country_lookup: LookupTable::build(&self.country_lookup, "country_lookup")?,
        })
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::from_toml_str(DEFAULT_CONFIG).expect("embedded default config is valid TOML")
    }
}

fn compile_pattern(pattern: &str, section: &str, field: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::Regex {
            section: section.to_string(),
            field: field.to_string(),
            source,
        })
}

fn compile_list(patterns: &[String], section: &str, field: &str) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| compile_pattern(p, section, field))
        .collect()
}

fn compile_fields(
    fields: &IndexMap<String, FieldSpec>,
    section: &str,
    engine_fields: &[&str],
) -> Result<FieldPatterns, ConfigError> {
    for name in engine_fields {
        if !fields.contains_key(*name) {
            return Err(ConfigError::MissingField {
                section: section.to_string(),
                field: name.to_string(),
            });
        }
    }

    let mut compiled = IndexMap::new();
    for (name, spec) in fields {
        compiled.insert(
            name.clone(),
            CompiledField {
                patterns: compile_list(&spec.patterns, section, name)?,
                required: spec.required || engine_fields.contains(&name.as_str()),
            },
        );
    }
    Ok(FieldPatterns { fields: compiled })
}

/// Configuration with every regex compiled
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub invoice_sheet: Vec<Regex>,
    pub packing_sheet: Vec<Regex>,
    pub invoice_columns: FieldPatterns,
    pub packing_columns: FieldPatterns,
    pub invoice_number: InvoiceNumberMatchers,
    pub currency_lookup: LookupTable,
    pub country_lookup: LookupTable,
}

impl CompiledConfig {
    pub fn columns(&self, kind: TableKind) -> &FieldPatterns {
        match kind {
            TableKind::Invoice => &self.invoice_columns,
            TableKind::Packing => &self.packing_columns,
        }
    }

    pub fn sheet_patterns(&self, kind: TableKind) -> &[Regex] {
        match kind {
            TableKind::Invoice => &self.invoice_sheet,
            TableKind::Packing => &self.packing_sheet,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledField {
    pub patterns: Vec<Regex>,
    pub required: bool,
}

impl CompiledField {
    pub fn matches(&self, header: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(header))
    }
}

/// Ordered field table; iteration order is configuration order
#[derive(Debug, Clone, Default)]
pub struct FieldPatterns {
    fields: IndexMap<String, CompiledField>,
}

impl FieldPatterns {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CompiledField)> + Clone {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&CompiledField> {
        self.fields.get(name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.required)
            .map(|(k, _)| k.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceNumberMatchers {
    pub capture: Vec<Regex>,
    pub label: Vec<Regex>,
    pub exclude: Vec<Regex>,
}

/// Lookup keys compare trimmed, upper-cased, with ", " collapsed to ","
pub fn normalize_lookup_key(value: &str) -> String {
    value.trim().to_uppercase().replace(", ", ",")
}

/// Value-to-code table keyed by normalized text
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    entries: IndexMap<String, String>,
}

impl LookupTable {
    fn build(raw: &IndexMap<String, String>, section: &str) -> Result<Self, ConfigError> {
        let mut entries = IndexMap::with_capacity(raw.len());
        for (key, code) in raw {
            let normalized = normalize_lookup_key(key);
            if entries.insert(normalized.clone(), code.trim().to_string()).is_some() {
                return Err(ConfigError::DuplicateLookupKey {
                    section: section.to_string(),
                    key: key.clone(),
                    normalized,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, value: &str) -> Option<&str> {
        self.entries.get(&normalize_lookup_key(value)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
