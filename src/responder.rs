use crate::config::{BotConfig, FALLBACK_GREETINGS, SYSTEM_PROMPT};
use crate::llm::CompletionModel;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Produces the reply for an inbound message. Never fails.
pub struct ResponseGenerator {
    model: Arc<dyn CompletionModel>,
    keywords: Vec<String>,
    info_text: String,
    min_message_length: usize,
    max_message_length: usize,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn CompletionModel>, config: &BotConfig) -> Self {
        Self {
            model,
            keywords: config.keywords.iter().map(|k| k.to_lowercase()).collect(),
            info_text: config.info_text.clone(),
            min_message_length: config.min_message_length,
            max_message_length: config.max_message_length,
        }
    }

    /// Whether the text mentions any configured keyword (case-insensitive substring)
    pub fn matches_keyword(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords
            .iter()
            .any(|keyword| lowered.contains(keyword.as_str()))
    }

    pub async fn generate(&self, message_text: &str) -> String {
        if self.matches_keyword(message_text) {
            info!("Club-related question detected, sending club information");
            return self.info_text.clone();
        }

        let trimmed = message_text.trim();
        let length = trimmed.chars().count();
        if length < self.min_message_length {
            debug!(
                "Message has {length} chars (minimum {min}), using a greeting",
                min = self.min_message_length
            );
            return fallback_greeting();
        }

        let prompt: String = if length > self.max_message_length {
            debug!(
                "Truncating message from {length} to {max} chars",
                max = self.max_message_length
            );
            trimmed.chars().take(self.max_message_length).collect()
        } else {
            trimmed.to_string()
        };

        match self.model.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Language model error: {e}");
                fallback_greeting()
            }
        }
    }
}

fn fallback_greeting() -> String {
    FALLBACK_GREETINGS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("Thanks for your message!")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records prompts and answers with a fixed reply or error
    struct ScriptedModel {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.reply
                .clone()
                .ok_or_else(|| LlmError::Network("operation timed out".to_string()))
        }
    }

    fn generator(model: Arc<ScriptedModel>) -> ResponseGenerator {
        ResponseGenerator::new(model, &BotConfig::default())
    }

    #[tokio::test]
    async fn test_keyword_returns_info_text_without_model_call() {
        let model = ScriptedModel::replying("model reply");
        let generator = generator(model.clone());

        for text in ["How much is MEMBERSHIP?", "where are you", "Opening HOURS please"] {
            assert_eq!(generator.generate(text).await, crate::config::CLUB_INFO);
        }
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_model_reply_used_for_other_messages() {
        let model = ScriptedModel::replying("Glad you like the posts!");
        let generator = generator(model.clone());

        let reply = generator.generate("  great pics, so cool!!  ").await;
        assert_eq!(reply, "Glad you like the posts!");
        assert_eq!(model.prompts(), vec!["great pics, so cool!!"]);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_greeting() {
        let generator = generator(ScriptedModel::failing());
        let reply = generator.generate("great pics, so cool!!").await;
        assert!(!reply.is_empty());
        assert!(FALLBACK_GREETINGS.contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn test_short_message_skips_model() {
        let model = ScriptedModel::replying("model reply");
        let generator = generator(model.clone());

        let reply = generator.generate("hey").await;
        assert!(FALLBACK_GREETINGS.contains(&reply.as_str()));
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_long_message_is_truncated() {
        let model = ScriptedModel::replying("ok");
        let config = BotConfig {
            max_message_length: 12,
            min_message_length: 1,
            ..BotConfig::default()
        };
        let generator = ResponseGenerator::new(model.clone(), &config);

        generator.generate("lovely lovely lovely lovely").await;
        assert_eq!(model.prompts(), vec!["lovely lovel"]);
    }
}
