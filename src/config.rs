//! Template configuration system.
//!
//! Each report template version (Dacia, Renault, ...) is one JSON file in the
//! `configs/` directory. Switching template is a configuration change: the
//! statistic rules, QA anchors and scoring layout all live here.

use crate::stats::{LineSource, Side, StatisticRule, StatisticSpec, TableSource};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Configuration for one report template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub layout: LayoutConfig,
    pub qa: QaConfig,
    /// Ordered statistic rules; output rows follow this order.
    pub statistics: Vec<StatisticSpec>,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// Where the tables and the digital section sit in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// 1-based page holding the high-level summary table.
    #[serde(default = "default_high_level_page")]
    pub high_level_page: usize,
    /// 1-based page holding the digital KPI table.
    #[serde(default = "default_digital_page")]
    pub digital_page: usize,
    /// First line of the digital section contains this phrase.
    #[serde(default = "default_digital_marker")]
    pub digital_marker: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            high_level_page: default_high_level_page(),
            digital_page: default_digital_page(),
            digital_marker: default_digital_marker(),
        }
    }
}

fn default_high_level_page() -> usize {
    1
}

fn default_digital_page() -> usize {
    3
}

fn default_digital_marker() -> String {
    "DIGITAL".to_string()
}

/// Question/answer region anchors and segmentation tweaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaConfig {
    /// Line that opens the quality assessment (question 1).
    pub first_question: String,
    /// Case-insensitive marker closing the main QA region.
    #[serde(default = "default_end_marker")]
    pub end_marker: String,
    /// Which occurrence of `end_marker` closes the region.
    #[serde(default = "default_end_marker_occurrence")]
    pub end_marker_occurrence: usize,
    /// Line that opens the digital questions.
    pub digital_first_question: String,
    /// Activity score labels interleaved with the QA text.
    #[serde(default)]
    pub activities: Vec<String>,
    /// Question number -> extra physical lines of its label.
    #[serde(default)]
    pub multi_line_questions: BTreeMap<String, usize>,
}

fn default_end_marker() -> String {
    "zoom".to_string()
}

fn default_end_marker_occurrence() -> usize {
    2
}

/// Layout of the dealer scoring sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Status code -> numeric score. Codes absent here are not scored.
    #[serde(default = "default_status_scores")]
    pub status_scores: BTreeMap<String, f64>,
    /// Substring looked up in the address -> country label. First match wins.
    #[serde(default)]
    pub countries: Vec<CountryMapping>,
    #[serde(default)]
    pub required_statistics: Vec<String>,
    /// Row labels, one per required statistic.
    #[serde(default)]
    pub header_names: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            status_scores: default_status_scores(),
            countries: Vec::new(),
            required_statistics: Vec::new(),
            header_names: Vec::new(),
        }
    }
}

fn default_status_scores() -> BTreeMap<String, f64> {
    [("OK", 1.0), ("KO", 0.0), ("PA", 0.5), ("NE", 0.0)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryMapping {
    pub key: String,
    pub label: String,
}

/// In-memory store for all loaded template configs.
#[derive(Debug)]
pub struct ConfigStore {
    configs: HashMap<String, TemplateConfig>,
    default_config: String,
}

impl ConfigStore {
    /// Load all configs from the specified directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut configs = HashMap::new();

        if !dir.exists() {
            anyhow::bail!("Config directory does not exist: {:?}", dir);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {:?}", path))?;

                let config: TemplateConfig = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {:?}", path))?;

                info!("Loaded template: {} from {:?}", config.name, path);
                configs.insert(config.name.clone(), config);
            }
        }

        Self::from_map(configs).with_context(|| format!("No configs found in {:?}", dir))
    }

    /// Create a ConfigStore from a list of configs.
    pub fn from_configs(configs: Vec<TemplateConfig>) -> Result<Self> {
        Self::from_map(configs.into_iter().map(|c| (c.name.clone(), c)).collect())
    }

    fn from_map(configs: HashMap<String, TemplateConfig>) -> Result<Self> {
        let default_config = Self::pick_default(&configs).context("No configs provided")?;
        Ok(Self {
            configs,
            default_config,
        })
    }

    pub fn get(&self, name: &str) -> Option<&TemplateConfig> {
        self.configs.get(name)
    }

    pub fn default_config(&self) -> &TemplateConfig {
        // pick_default only returns keys of the map
        &self.configs[&self.default_config]
    }

    /// List all available template names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    fn pick_default(configs: &HashMap<String, TemplateConfig>) -> Option<String> {
        if configs.contains_key("dacia") {
            return Some("dacia".to_string());
        }
        let mut names: Vec<&String> = configs.keys().collect();
        names.sort();
        names.first().map(|n| n.to_string())
    }
}

/// Runtime settings for the batch binary, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub questions_path: PathBuf,
    pub scoring_path: Option<PathBuf>,
    pub config_dir: PathBuf,
    pub template: Option<String>,
    pub text_provider: String,
    pub max_workers: usize,
    pub report_timeout: Duration,
    pub write_scoring: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            input_dir: env_path("AUDIT_INPUT_DIR", "data/input"),
            output_dir: env_path("AUDIT_OUTPUT_DIR", "data/output"),
            questions_path: env_path(
                "AUDIT_QUESTIONS_PATH",
                "data/external/questions_dacia.xlsx",
            ),
            scoring_path: std::env::var("AUDIT_SCORING_PATH").ok().map(PathBuf::from),
            config_dir: env_path("AUDIT_CONFIG_DIR", "configs"),
            template: std::env::var("AUDIT_TEMPLATE").ok(),
            text_provider: std::env::var("AUDIT_TEXT_PROVIDER")
                .unwrap_or_else(|_| "lopdf".to_string()),
            max_workers: env_parse("AUDIT_MAX_WORKERS", 4)?,
            report_timeout: Duration::from_secs(env_parse("AUDIT_REPORT_TIMEOUT_SECS", 120)?),
            write_scoring: env_parse("AUDIT_WRITE_SCORING", false)?,
        })
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T>(var: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", var, raw)),
        Err(_) => Ok(default),
    }
}

/// Built-in Dacia template, used when no `configs/` directory is present.
pub fn create_default_config() -> TemplateConfig {
    use LineSource::{Detailed, Digital};
    use Side::{Left, Right};

    let statistics = vec![
        StatisticSpec::between("name1", "Dealer name", "Dealer code", 0),
        StatisticSpec::between("address_full", "Location", "RRG", 1),
        StatisticSpec::between("dealer_code", "Dealer code", "NV Renault Sales / year", 0),
        StatisticSpec::between("RRG", "RRG", "NV Dacia Sales / Year", 1),
        StatisticSpec::between(
            "Renault_sales_by_yr",
            "NV Renault Sales / year",
            "Workshop Customers / Day",
            0,
        ),
        StatisticSpec::between(
            "Dacia_sales_by_yr",
            "NV Dacia Sales / Year",
            "Principal Audited Brand",
            1,
        ),
        StatisticSpec::between("wkshp_date", "Workshop Customers / Day", "Auditor", 0),
        StatisticSpec::new(
            "Global_Score",
            StatisticRule::ScoreCell {
                table: TableSource::HighLevel,
                column: 2,
                sentinels: vec!["Global Score".to_string(), String::new()],
            },
        ),
        StatisticSpec::trailing("Auditor", "Auditor", 0),
        StatisticSpec::trailing("audit_date", "Audit Date", 1),
        StatisticSpec::keyword("new_vehicle_activity", Detailed, "NEW VEHICLES ACTIVITY", Right),
        StatisticSpec::keyword("aftersales_activity", Detailed, "AFTERSALES ACTIVITY", Right),
        StatisticSpec::keyword(
            "appointment_booking",
            Detailed,
            "APPOINTMENT BOOKING / PREPARATION",
            Left,
        ),
        StatisticSpec::keyword("customer_journey", Detailed, "CUSTOMER JOURNEY", Left),
        StatisticSpec::keyword("product_presentation", Detailed, "PRODUCT PRESENTATION", Left),
        StatisticSpec::keyword("reception", Detailed, "RECEPTION", Left),
        StatisticSpec::keyword("order_management", Detailed, "ORDER MANAGEMENT", Left),
        StatisticSpec::keyword("production", Detailed, "PRODUCTION", Left),
        StatisticSpec::new(
            "preperation_delivery",
            StatisticRule::Keyword {
                source: Detailed,
                keyword: "PREPARATION / DELIVERY".to_string(),
                alternatives: vec!["Preparation / Delivery".to_string()],
                position: Left,
                occurrence: 1,
            },
        ),
        StatisticSpec::keyword("restitution", Detailed, "RESTITUTION", Left),
        StatisticSpec::new(
            "management1",
            StatisticRule::LineNeighbor {
                source: Detailed,
                keyword: "MANAGEMENT".to_string(),
                line_occurrence: 2,
                side: Left,
            },
        ),
        StatisticSpec::new(
            "management2",
            StatisticRule::LineNeighbor {
                source: Detailed,
                keyword: "MANAGEMENT".to_string(),
                line_occurrence: 2,
                side: Right,
            },
        ),
        StatisticSpec::keyword("basics_sales_methods", Detailed, "Basics Sales Methods", Left),
        StatisticSpec::keyword("brand_store_renault", Detailed, "BRAND STORE RENAULT", Left),
        StatisticSpec::keyword(
            "basics_aftersales_methods",
            Detailed,
            "Basics Aftersales Methods",
            Left,
        ),
        StatisticSpec::keyword(
            "flash_ares_maintainence",
            Detailed,
            "FLASH ARES MAINTENANCE",
            Left,
        ),
        StatisticSpec::keyword("brand_store_dacia", Detailed, "BRAND STORE DACIA", Left),
        StatisticSpec::keyword("digital_dacia", Digital, "DIGITAL DACIA", Right),
        StatisticSpec::keyword("digital_renault", Digital, "DIGITAL RENAULT", Right),
        StatisticSpec::keyword("journey_experience_renault", Digital, "JOURNEY", Left),
        StatisticSpec::keyword("website_conformity_renault", Digital, "Website conformity", Left),
        StatisticSpec::new(
            "journey_experience_dacia",
            StatisticRule::Keyword {
                source: Digital,
                keyword: "JOURNEY".to_string(),
                alternatives: Vec::new(),
                position: Left,
                occurrence: 2,
            },
        ),
        StatisticSpec::keyword("website_conformity_dacia", Digital, "Website conformity", Right),
        StatisticSpec::new(
            "digital_score",
            StatisticRule::Below {
                source: Digital,
                keyword: "Digital Score".to_string(),
            },
        ),
    ];

    let multi_line_questions = [
        "9", "54", "55", "41b", "58", "60", "102", "109", "119", "148c", "151", "211", "203",
        "209", "223", "215", "221",
    ]
    .into_iter()
    .map(|n| (n.to_string(), 1))
    .collect();

    let countries = [
        ("Belgium", "Belgium"),
        ("Italy", "Italy"),
        ("Poland", "Poland"),
        ("United Kingdom", "UK"),
        ("Turkey", "Turkey"),
        ("Morocco", "Morocco"),
        ("Czech Republic", "Czech Republic"),
        ("Slovakia", "Slovakia"),
    ]
    .into_iter()
    .map(|(key, label)| CountryMapping {
        key: key.to_string(),
        label: label.to_string(),
    })
    .collect();

    TemplateConfig {
        name: "dacia".to_string(),
        description: "Dacia dealership audit report".to_string(),
        layout: LayoutConfig::default(),
        qa: QaConfig {
            first_question:
                "1 - The Dacia facade and dedicated entrance comply with the brand’s visual identity charter"
                    .to_string(),
            end_marker: default_end_marker(),
            end_marker_occurrence: default_end_marker_occurrence(),
            digital_first_question:
                "201 - The dealer is correctly represented by Google via his GMB profile"
                    .to_string(),
            activities: to_strings(&[
                "% PRODUCT PRESENTATION",
                "% PREPARATION / DELIVERY",
                "% ORDER MANAGEMENT",
                "% MANAGEMENT",
                "% AFTERSALES ACTIVITY",
                "% APPOINTMENT BOOKING / PREPARATION",
                "% RECEPTION",
                "% PRODUCTION",
                "% RESTITUTION",
                "% Website Conformity",
                "% DIGITAL DACIA",
                "% JOURNEY EXPERIENCE",
            ]),
            multi_line_questions,
        },
        statistics,
        scoring: ScoringConfig {
            status_scores: default_status_scores(),
            countries,
            required_statistics: to_strings(&[
                "name1",
                "address_full",
                "audit_date",
                "Global_Score",
                "new_vehicle_activity",
                "aftersales_activity",
                "digital_score",
                "digital_renault",
                "digital_dacia",
                "dealer_code",
            ]),
            header_names: to_strings(&[
                "DEALERNAME",
                "COUNTRY",
                "AUDIT DATE",
                "GLOBAL SCORE",
                "SALES SCORE",
                "AFTER SALES SCORE",
                "DIGITAL",
                "DIGITAL RENAULT",
                "DIGITAL DACIA",
                "DEALER ID",
            ]),
        },
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
