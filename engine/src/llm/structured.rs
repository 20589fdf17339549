//! Structured completions
//!
//! Renders a prompt template, appends JSON-schema format instructions for the
//! expected output type, and deserializes the model's reply into that type.

use super::{extract_json, LLMError, LLMProvider, Message, OpenAIProvider};
use crate::config::LLMConfig;
use crate::secrets::SecretManager;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str =
    "You are a careful assistant. Reply with a single JSON document and nothing else.";

/// Keychain entry holding the provider API key
pub const API_KEY_ENTRY: &str = "openai_api_key";

/// Typed front end over an [`LLMProvider`]
pub struct GenerativeClient {
    provider: Arc<dyn LLMProvider>,
}

impl GenerativeClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Build the configured client, or `None` when generation is disabled or
    /// no credentials can be found. `None` puts every handler in fallback mode.
    pub fn from_config(config: &LLMConfig) -> Option<Self> {
        if !config.enabled {
            debug!("Generative provider disabled in config");
            return None;
        }

        let secrets = SecretManager::new(&config.keyring_service);
        let api_key = match secrets.resolve(&config.api_key_env, API_KEY_ENTRY) {
            Ok(Some(key)) => key,
            Ok(None) => {
                warn!(
                    "No API key in ${} or keychain, running in fallback mode",
                    config.api_key_env
                );
                return None;
            }
            Err(e) => {
                warn!("Credential lookup failed, running in fallback mode: {}", e);
                return None;
            }
        };

        match OpenAIProvider::new(config, Some(api_key)) {
            Ok(provider) => Some(Self::new(Arc::new(provider))),
            Err(e) => {
                warn!("Failed to build provider, running in fallback mode: {}", e);
                None
            }
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn is_available(&self) -> bool {
        self.provider.has_credentials()
    }

    /// Render `template`, ask the provider, and parse the reply as `T`
    pub async fn complete<T>(&self, template: &str, variables: &[(&str, &str)]) -> super::Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        if !self.is_available() {
            return Err(LLMError::ProviderUnavailable(
                "no credentials configured".to_string(),
            ));
        }

        let prompt = format!(
            "{}\n\n{}",
            render_template(template, variables),
            format_instructions::<T>()?
        );

        let reply = self
            .provider
            .generate(&[Message::system(SYSTEM_PROMPT), Message::user(prompt)])
            .await?;

        let json = extract_json(&reply)
            .ok_or_else(|| LLMError::ParseError("reply contains no JSON document".to_string()))?;

        serde_json::from_str(json).map_err(|e| LLMError::ParseError(e.to_string()))
    }
}

/// Substitute `{name}` placeholders in one pass.
///
/// Placeholders with no matching variable are left as written, and
/// substituted values are never re-scanned.
pub fn render_template(template: &str, variables: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match variables.iter().find(|(key, _)| *key == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Instructions telling the model which JSON shape to produce
pub fn format_instructions<T: JsonSchema>() -> super::Result<String> {
    let schema = schemars::schema_for!(T);
    let schema_json = serde_json::to_string_pretty(&schema)
        .map_err(|e| LLMError::InvalidRequest(format!("schema serialization failed: {}", e)))?;

    Ok(format!(
        "The output must be a JSON object that conforms to this JSON schema:\n```json\n{}\n```",
        schema_json
    ))
}
