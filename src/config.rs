//! Configuration: environment settings and evaluation profiles.
//!
//! Profiles are loaded from the `configs/` directory (one JSON file each),
//! falling back to the built-in invoice profile.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::confidence::merge::MergeOptions;
use crate::confidence::resolver::ScoreResolver;

const DEFAULT_PROFILE: &str = "invoice";

/// Process-level settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub profiles_dir: String,
    pub layout: Option<LayoutSettings>,
    pub llm: Option<LlmSettings>,
}

#[derive(Debug, Clone)]
pub struct LayoutSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model_id: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Read settings from the environment. The external services are
    /// optional: without credentials only the pure `/evaluate` path works.
    pub fn from_env() -> Self {
        let layout = match (
            std::env::var("LAYOUT_ENDPOINT").ok(),
            std::env::var("LAYOUT_API_KEY").ok(),
        ) {
            (Some(endpoint), Some(api_key)) => Some(LayoutSettings {
                endpoint,
                api_key,
                model_id: env_or("LAYOUT_MODEL_ID", "prebuilt-layout"),
                poll_interval_ms: env_parse("LAYOUT_POLL_INTERVAL_MS", 2000),
                max_polls: env_parse("LAYOUT_MAX_POLLS", 60),
            }),
            _ => {
                warn!("LAYOUT_ENDPOINT/LAYOUT_API_KEY not set, document processing disabled");
                None
            }
        };

        let llm = match std::env::var("LLM_API_KEY").ok() {
            Some(api_key) => Some(LlmSettings {
                api_url: env_or("LLM_API_URL", "https://api.openai.com/v1/chat/completions"),
                api_key,
                model: env_or("LLM_MODEL", "gpt-4o"),
                max_tokens: env_parse("LLM_MAX_TOKENS", 4096),
            }),
            None => {
                warn!("LLM_API_KEY not set, document processing disabled");
                None
            }
        };

        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            profiles_dir: env_or("PROFILES_DIR", "configs"),
            layout,
            llm,
        }
    }
}

/// How one document type is extracted and judged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationProfile {
    pub name: String,
    pub description: String,
    /// System prompt for the structured extraction call.
    pub prompt: String,
    /// JSON schema the LLM output must conform to.
    pub json_schema: serde_json::Value,
    /// Fields at or above this confidence are flagged as reliable.
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub score_resolver: ScoreResolver,
    #[serde(flatten)]
    pub merge: MergeOptions,
}

fn default_threshold() -> f64 {
    0.8
}

/// In-memory store for all loaded profiles.
#[derive(Debug)]
pub struct ProfileStore {
    profiles: HashMap<String, EvaluationProfile>,
}

impl ProfileStore {
    /// Load all profiles from the specified directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut profiles = HashMap::new();

        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read profile directory: {:?}", dir))?
        {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read profile: {:?}", path))?;
                let profile: EvaluationProfile = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse profile: {:?}", path))?;

                info!("Loaded profile: {} from {:?}", profile.name, path);
                profiles.insert(profile.name.clone(), profile);
            }
        }

        if profiles.is_empty() {
            anyhow::bail!("No profiles found in {:?}", dir);
        }
        Ok(Self::from_map(profiles))
    }

    /// Load from `dir` if it exists, otherwise use the built-in invoice profile.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        if dir.exists() {
            Self::load_from_dir(dir)
        } else {
            warn!("Profile directory {:?} not found, using built-in profile", dir);
            Ok(Self::from_profiles(vec![default_invoice_profile()]))
        }
    }

    pub fn from_profiles(profiles: Vec<EvaluationProfile>) -> Self {
        Self::from_map(profiles.into_iter().map(|p| (p.name.clone(), p)).collect())
    }

    fn from_map(profiles: HashMap<String, EvaluationProfile>) -> Self {
        Self { profiles }
    }

    /// Get a profile by name (returns clone).
    pub fn get(&self, name: &str) -> Option<EvaluationProfile> {
        self.profiles.get(name).cloned()
    }

    /// Get the named profile, or the default one when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Option<EvaluationProfile> {
        self.get(name.unwrap_or(DEFAULT_PROFILE))
    }

    /// List all available profile names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Built-in invoice profile.
pub fn default_invoice_profile() -> EvaluationProfile {
    EvaluationProfile {
        name: DEFAULT_PROFILE.to_string(),
        description: "Invoice field extraction with OCR evidence".to_string(),
        prompt: "You extract data from invoices. Use only values that appear in the document text. \
                 Copy values exactly as written; use null for fields that are not present."
            .to_string(),
        json_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "invoiceId": {"type": ["string", "null"]},
                "invoiceDate": {"type": ["string", "null"]},
                "dueDate": {"type": ["string", "null"]},
                "vendorName": {"type": ["string", "null"]},
                "vendorAddress": {"type": ["string", "null"]},
                "customerName": {"type": ["string", "null"]},
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": {"type": ["string", "null"]},
                            "quantity": {"type": ["number", "null"]},
                            "amount": {"type": ["number", "null"]}
                        },
                        "required": ["description", "quantity", "amount"],
                        "additionalProperties": false
                    }
                },
                "subTotal": {"type": ["number", "null"]},
                "totalTax": {"type": ["number", "null"]},
                "invoiceTotal": {"type": ["number", "null"]}
            },
            "required": [
                "invoiceId", "invoiceDate", "dueDate", "vendorName", "vendorAddress",
                "customerName", "items", "subTotal", "totalTax", "invoiceTotal"
            ],
            "additionalProperties": false
        }),
        confidence_threshold: default_threshold(),
        score_resolver: ScoreResolver::Min,
        merge: MergeOptions::default(),
    }
}
