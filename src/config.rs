use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::*;
use crate::error::{Result, SilverError};
use crate::pipeline::ingestion::IngestType;
use crate::pipeline::processing::quality_gate::{RuleBinding, RuleCheck};
use crate::pipeline::table::NullTokens;

pub const DEFAULT_CONFIG_PATH: &str = "silverize.toml";
pub const CONFIG_PATH_ENV: &str = "SILVERIZE_CONFIG";
pub const DATA_ROOT_ENV: &str = "SILVERIZE_DATA_ROOT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub inference: InferenceConfig,
    pub normalize: NormalizeConfig,
    #[serde(default = "default_tables")]
    pub tables: Vec<TableConfig>,
}

/// Storage roots for each layer. Every stage receives these explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub landing_root: PathBuf,
    pub bronze_root: PathBuf,
    pub silver_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under(Path::new("data"))
    }
}

impl PathsConfig {
    /// Standard `landing/`, `bronze/`, `silver/` layout under one data root.
    pub fn under(root: &Path) -> Self {
        Self {
            landing_root: root.join("landing"),
            bronze_root: root.join("bronze"),
            silver_root: root.join("silver"),
        }
    }
}

/// Thresholds and vocabularies for heuristic casting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub numeric_threshold: f64,
    pub temporal_threshold: f64,
    /// Ratios this close to a threshold are flagged as ambiguous in the audit
    pub ambiguity_band: f64,
    pub temporal_keywords: Vec<String>,
    pub null_tokens: Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            numeric_threshold: DEFAULT_NUMERIC_THRESHOLD,
            temporal_threshold: DEFAULT_TEMPORAL_THRESHOLD,
            ambiguity_band: DEFAULT_AMBIGUITY_BAND,
            temporal_keywords: DEFAULT_TEMPORAL_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            null_tokens: DEFAULT_NULL_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl InferenceConfig {
    pub fn null_tokens(&self) -> NullTokens {
        NullTokens::new(&self.null_tokens)
    }
}

/// What to do when two raw headers normalize to the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Merge into the first column's position; per row the right-most non-null value wins.
    #[default]
    CoalesceLast,
    /// Abort the table run with `SchemaConflict`.
    Fail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub collision_policy: CollisionPolicy,
}

/// Per-table bindings: which columns are critical and which rules apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub ingest_type: IngestType,
    #[serde(default)]
    pub critical_fields: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleBinding>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>, ingest_type: IngestType) -> Self {
        Self {
            name: name.into(),
            ingest_type,
            critical_fields: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// The credit-event fact table with the generic credit rules bound.
    pub fn credit_events() -> Self {
        Self {
            name: CREDIT_EVENTS_TABLE.to_string(),
            ingest_type: IngestType::Fact,
            critical_fields: vec![
                "loan_id".to_string(),
                "customer_id".to_string(),
                "event_time".to_string(),
            ],
            rules: vec![
                RuleBinding::new(RULE_NEGATIVE_DPD, "days_past_due", RuleCheck::AtLeast { min: 0.0 }),
                RuleBinding::new(
                    RULE_NEGATIVE_BALANCE,
                    "outstanding_balance",
                    RuleCheck::AtLeast { min: 0.0 },
                ),
                RuleBinding::new(
                    RULE_INVALID_RATE,
                    "interest_rate",
                    RuleCheck::Between { min: 0.0, max: 1.0 },
                ),
            ],
        }
    }

    /// The region dimension: no rules bound.
    pub fn region_reference() -> Self {
        Self::new(REGION_REFERENCE_TABLE, IngestType::Dimension)
    }
}

fn default_tables() -> Vec<TableConfig> {
    vec![TableConfig::credit_events(), TableConfig::region_reference()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            inference: InferenceConfig::default(),
            normalize: NormalizeConfig::default(),
            tables: default_tables(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, `$SILVERIZE_CONFIG`, or `silverize.toml`.
    ///
    /// An explicitly requested file must exist; the default file is optional and
    /// built-in defaults are used without it. `$SILVERIZE_DATA_ROOT` rebases all paths.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    Self::default()
                }
            }
        };

        if let Ok(root) = std::env::var(DATA_ROOT_ENV) {
            info!("Using data root from {}: {}", DATA_ROOT_ENV, root);
            config.paths = PathsConfig::under(Path::new(&root));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SilverError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let inference = &self.inference;
        for (label, value) in [
            ("numeric_threshold", inference.numeric_threshold),
            ("temporal_threshold", inference.temporal_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(SilverError::Config(format!(
                    "inference.{} must be in (0, 1], got {}",
                    label, value
                )));
            }
        }
        if !(0.0..1.0).contains(&inference.ambiguity_band) {
            return Err(SilverError::Config(format!(
                "inference.ambiguity_band must be in [0, 1), got {}",
                inference.ambiguity_band
            )));
        }

        let mut names = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(SilverError::Config("table name must not be empty".to_string()));
            }
            if !names.insert(table.name.as_str()) {
                return Err(SilverError::Config(format!("duplicate table '{}'", table.name)));
            }
            for rule in &table.rules {
                rule.validate()
                    .map_err(|e| SilverError::Config(format!("table '{}': {}", table.name, e)))?;
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Resolve the requested table names, or every configured table when none are given.
    pub fn select_tables(&self, requested: Option<&[String]>) -> Result<Vec<TableConfig>> {
        match requested {
            None => Ok(self.tables.clone()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.table(name)
                        .cloned()
                        .ok_or_else(|| SilverError::Config(format!("unknown table '{}'", name)))
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_credit_rules() {
        let config = Config::default();
        let credit = config.table(CREDIT_EVENTS_TABLE).unwrap();
        assert_eq!(credit.ingest_type, IngestType::Fact);
        assert_eq!(credit.rules.len(), 3);
        assert_eq!(credit.critical_fields, vec!["loan_id", "customer_id", "event_time"]);

        let regions = config.table(REGION_REFERENCE_TABLE).unwrap();
        assert_eq!(regions.ingest_type, IngestType::Dimension);
        assert!(regions.rules.is_empty());
        assert!(regions.critical_fields.is_empty());
    }

    #[test]
    fn parses_table_bindings_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [paths]
            landing_root = "/tmp/l"
            bronze_root = "/tmp/b"
            silver_root = "/tmp/s"

            [inference]
            numeric_threshold = 0.95

            [normalize]
            collision_policy = "fail"

            [[tables]]
            name = "loans"
            ingest_type = "FACT"
            critical_fields = ["loan_id"]

            [[tables.rules]]
            name = "negative_dpd"
            column = "dpd"
            check = { kind = "at_least", min = 0.0 }

            [[tables.rules]]
            name = "invalid_rate"
            column = "rate"
            check = { kind = "between", min = 0.0, max = 1.0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.inference.numeric_threshold, 0.95);
        assert_eq!(config.inference.temporal_threshold, DEFAULT_TEMPORAL_THRESHOLD);
        assert_eq!(config.normalize.collision_policy, CollisionPolicy::Fail);
        assert_eq!(config.paths.silver_root, PathBuf::from("/tmp/s"));
        let loans = config.table("loans").unwrap();
        assert_eq!(loans.rules[1].check, RuleCheck::Between { min: 0.0, max: 1.0 });
    }

    #[test]
    fn rejects_invalid_threshold() {
        let err = Config::from_toml_str("[inference]\nnumeric_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, SilverError::Config(_)));
    }

    #[test]
    fn rejects_duplicate_tables() {
        let err = Config::from_toml_str(
            "[[tables]]\nname = \"a\"\n[[tables]]\nname = \"a\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate table"));
    }

    #[test]
    fn select_tables_rejects_unknown_names() {
        let config = Config::default();
        assert_eq!(config.select_tables(None).unwrap().len(), 2);
        let err = config.select_tables(Some(&["nope".to_string()])).unwrap_err();
        assert!(err.to_string().contains("unknown table"));
    }
}
