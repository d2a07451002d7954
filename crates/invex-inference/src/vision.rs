//! Vision backend for structured product analysis.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use invex_core::{Error, Result};

use crate::config::ExtractorConfig;

const PRODUCT_PROMPT: &str = "You are cataloguing a retail product from a photo. \
Respond with a single JSON object and nothing else, using these keys: \
\"brand\" (string or null), \"model\" (string or null), \"category\" (string or null), \
\"ocr_text\" (all legible text, string or null), \"logos\" (array of strings), \
\"objects\" (array of visible object names), \"price_range\" (\"budget\", \"mid\", \"premium\" or null), \
\"usage_tags\" (array of short lowercase usage keywords), \
\"barcode\" (digits of a visible barcode, or null), \"barcode_format\" (string or null), \
\"confidence\" (0.0-1.0, how sure you are about brand and model). \
Use null when unsure; never guess a barcode.";

/// Structured product fields read from one image by a vision model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub logos: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub price_range: Option<String>,
    #[serde(default)]
    pub usage_tags: Vec<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub barcode_format: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// First `{` through last `}`, across lines.
static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

static BARCODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z]{6,48}$").expect("static regex"));

impl VisionAnalysis {
    /// Parse a model response, tolerating code fences and prose around the
    /// JSON object.
    pub fn parse(response: &str) -> Result<Self> {
        let json = JSON_OBJECT
            .find(response)
            .map(|m| m.as_str())
            .ok_or_else(|| Error::Extraction("vision response contained no JSON object".into()))?;
        let analysis: VisionAnalysis = serde_json::from_str(json)
            .map_err(|e| Error::Extraction(format!("invalid vision JSON: {}", e)))?;
        Ok(analysis.normalized())
    }

    /// Trim fields, drop blanks and implausible barcodes, clamp confidence.
    pub fn normalized(mut self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
        }
        fn clean_list(values: Vec<String>, lowercase: bool) -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for value in values {
                let value = value.trim();
                let value = if lowercase {
                    value.to_lowercase()
                } else {
                    value.to_string()
                };
                if !value.is_empty() && !out.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
                    out.push(value);
                }
            }
            out
        }

        self.brand = clean(self.brand);
        self.model = clean(self.model);
        self.category = clean(self.category);
        self.ocr_text = clean(self.ocr_text);
        self.price_range = clean(self.price_range);
        self.barcode_format = clean(self.barcode_format);
        self.barcode = clean(self.barcode)
            .map(|b| b.chars().filter(|c| !c.is_whitespace() && *c != '-').collect::<String>())
            .filter(|b| BARCODE.is_match(b));
        if self.barcode.is_none() {
            self.barcode_format = None;
        }
        self.logos = clean_list(self.logos, false);
        self.objects = clean_list(self.objects, true);
        self.usage_tags = clean_list(self.usage_tags, true);
        self.confidence = self
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0));
        self
    }
}

/// Backend that analyzes product photos with a vision model.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Analyze one product image.
    async fn analyze_product(&self, image_data: &[u8], mime_type: &str) -> Result<VisionAnalysis>;

    /// Check if the vision backend is available.
    async fn health_check(&self) -> Result<bool>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Ollama-based vision backend (e.g., qwen2.5vl, llava).
pub struct OllamaVisionBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaVisionBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(invex_core::defaults::EXTRACT_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(config.ollama_url.clone(), config.vision_model.clone())
            .with_timeout(config.timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>, // base64 encoded
    stream: bool,
    format: String,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl VisionBackend for OllamaVisionBackend {
    async fn analyze_product(&self, image_data: &[u8], mime_type: &str) -> Result<VisionAnalysis> {
        use base64::Engine;
        let start = Instant::now();
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(image_data);

        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: PRODUCT_PROMPT.to_string(),
            images: vec![image_b64],
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Extraction(format!(
                "Vision API returned {}: {}",
                status, body
            )));
        }

        let result: OllamaGenerateResponse = response.json().await.map_err(|e| {
            Error::Extraction(format!("Failed to parse vision response: {}", e))
        })?;

        let analysis = VisionAnalysis::parse(&result.response).inspect_err(|e| {
            warn!(
                subsystem = "inference",
                component = "vision",
                model = %self.model,
                error = %e,
                "Vision model returned unusable output"
            );
        })?;

        debug!(
            subsystem = "inference",
            component = "vision",
            op = "analyze_product",
            model = %self.model,
            mime_type,
            has_brand = analysis.brand.is_some(),
            has_barcode = analysis.barcode.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Vision analysis complete"
        );
        Ok(analysis)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
