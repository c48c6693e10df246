//! Vision-language collaborator
//!
//! Sends an event snapshot to an Ollama-style `/api/generate` endpoint and
//! turns the response into a validated natural-language scene description.
//! The call is synchronous and bounded by a connect timeout plus an overall
//! request timeout, so it is safe from event threads.

use std::path::Path;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::VisionConfig;
use crate::error::{VigilError, VigilResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Classes that make the most informative prompt subject, in order
const PRIMARY_CLASS_PRIORITY: [&str; 5] = ["person", "dog", "cat", "package", "car"];

/// Outcome of a vision call. `is_valid` is false for transport errors,
/// non-200 responses and degenerate model output.
#[derive(Debug, Clone, Default)]
pub struct VisionResult {
    pub context: String,
    pub response_time_seconds: f64,
    pub is_valid: bool,
}

/// Blocking client for the vision-language endpoint
pub struct VisionClient {
    config: VisionConfig,
    client: reqwest::blocking::Client,
    last_prompt: String,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> VigilResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| VigilError::Vision(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
            last_prompt: String::new(),
        })
    }

    /// Analyze a snapshot. Blocks up to the configured timeout; never
    /// panics or errors out — failures come back as an invalid result.
    pub fn analyze(
        &mut self,
        snapshot_path: &Path,
        camera_id: &str,
        detected_class: &str,
    ) -> VisionResult {
        let started = Instant::now();
        let mut result = VisionResult::default();

        let image = match std::fs::read(snapshot_path) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                error!("Vision: empty snapshot file: {}", snapshot_path.display());
                return result;
            }
            Err(e) => {
                error!("Vision: cannot read snapshot {}: {}", snapshot_path.display(), e);
                return result;
            }
        };

        self.last_prompt = self.build_prompt(camera_id, detected_class);

        let body = json!({
            "model": self.config.model,
            "prompt": self.last_prompt,
            "images": [BASE64.encode(&image)],
            "stream": false,
        });

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        let response = self.client.post(&url).json(&body).send();
        result.response_time_seconds = started.elapsed().as_secs_f64();

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!(
                    "Vision: request failed for {}: {} ({:.1}s)",
                    camera_id, e, result.response_time_seconds
                );
                return result;
            }
        };

        if !response.status().is_success() {
            error!("Vision: endpoint returned HTTP {}", response.status());
            return result;
        }

        let parsed: serde_json::Value = match response.json() {
            Ok(v) => v,
            Err(e) => {
                error!("Vision: failed to parse response: {}", e);
                return result;
            }
        };

        result.context = parsed
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();

        // A real description has some length and more than one word.
        result.is_valid = result.context.len() >= 15 && result.context.contains(' ');
        if !result.is_valid {
            warn!(
                "Vision: invalid response (len={}, text='{}')",
                result.context.len(),
                result.context
            );
        }

        info!(
            "Vision: {} analysis for {} in {:.1}s valid={}",
            self.config.model, camera_id, result.response_time_seconds, result.is_valid
        );
        result
    }

    /// Prompt used by the most recent `analyze` call
    pub fn last_prompt(&self) -> &str {
        &self.last_prompt
    }

    /// Resolve the prompt template (camera-specific, then "default", then
    /// the built-in) and substitute `{class}` and `{max_words}`.
    pub fn build_prompt(&self, camera_id: &str, detected_class: &str) -> String {
        let template = self
            .config
            .prompts
            .get(camera_id)
            .or_else(|| self.config.prompts.get("default"))
            .unwrap_or(&self.config.default_prompt);

        template
            .replace("{max_words}", &self.config.max_words.to_string())
            .replace("{class}", detected_class)
    }

    /// Pick the most report-worthy class from a detected set
    pub fn select_primary_class(classes: &[String]) -> String {
        for priority in PRIMARY_CLASS_PRIORITY {
            if classes.iter().any(|c| c == priority) {
                return priority.to_string();
            }
        }
        classes
            .first()
            .cloned()
            .unwrap_or_else(|| "object".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(prompts: &[(&str, &str)]) -> VisionClient {
        let mut config = VisionConfig::default();
        config.max_words = 15;
        for (k, v) in prompts {
            config.prompts.insert(k.to_string(), v.to_string());
        }
        VisionClient::new(&config).unwrap()
    }

    #[test]
    fn test_prompt_camera_specific_template() {
        let client = client_with(&[(
            "patio",
            "Look at the {class} on the patio in {max_words} words.",
        )]);
        assert_eq!(
            client.build_prompt("patio", "person"),
            "Look at the person on the patio in 15 words."
        );
    }

    #[test]
    fn test_prompt_falls_back_to_default_key() {
        let client = client_with(&[("default", "Describe the {class}.")]);
        assert_eq!(client.build_prompt("garage", "car"), "Describe the car.");
    }

    #[test]
    fn test_prompt_falls_back_to_builtin() {
        let client = client_with(&[]);
        let prompt = client.build_prompt("garage", "dog");
        assert!(prompt.contains("dog"));
        assert!(prompt.contains("15"));
        assert!(!prompt.contains("{class}"));
        assert!(!prompt.contains("{max_words}"));
    }

    #[test]
    fn test_primary_class_priority() {
        let classes = vec!["car".to_string(), "person".to_string(), "dog".to_string()];
        assert_eq!(VisionClient::select_primary_class(&classes), "person");

        let classes = vec!["car".to_string(), "cat".to_string()];
        assert_eq!(VisionClient::select_primary_class(&classes), "cat");
    }

    #[test]
    fn test_primary_class_fallbacks() {
        let classes = vec!["bench".to_string(), "kite".to_string()];
        assert_eq!(VisionClient::select_primary_class(&classes), "bench");
        assert_eq!(VisionClient::select_primary_class(&[]), "object");
    }

    #[test]
    fn test_analyze_missing_snapshot_is_invalid() {
        let mut client = client_with(&[]);
        let result = client.analyze(Path::new("/nonexistent.jpg"), "cam", "person");
        assert!(!result.is_valid);
        assert!(result.context.is_empty());
    }
}
