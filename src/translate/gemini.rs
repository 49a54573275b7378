//! Gemini-based translation using the Generative AI API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SubgenError};

use super::Translator;

/// Translator using Google Gemini API.
pub struct GeminiTranslator {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiTranslator {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: "gemini-2.0-flash".to_string(),
        }
    }

    /// Set a different model (e.g., "gemini-1.5-pro").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Build the translation prompt. Context lines are shown to the model
    /// for disambiguation but explicitly excluded from the requested output.
    fn build_prompt(
        &self,
        texts: &[&str],
        context_before: &[&str],
        context_after: &[&str],
        target_lang: &str,
    ) -> String {
        let lang_name = language_code_to_name(target_lang);

        let numbered_texts: String = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("[{}] {}", i + 1, t))
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Translate each of the following numbered subtitle lines to {lang_name}.\n\
             Return ONLY the translations in the same numbered format, one per line.\n\
             Preserve all formatting and line breaks.\n"
        );

        if !context_before.is_empty() {
            prompt.push_str("\nPreceding dialogue (context only, do NOT translate):\n");
            prompt.push_str(&context_before.join("\n"));
            prompt.push('\n');
        }
        if !context_after.is_empty() {
            prompt.push_str("\nFollowing dialogue (context only, do NOT translate):\n");
            prompt.push_str(&context_after.join("\n"));
            prompt.push('\n');
        }

        prompt.push_str("\nLines to translate:\n");
        prompt.push_str(&numbered_texts);
        prompt
    }

    /// Parse the numbered batch response back into one string per input.
    fn parse_batch_response(&self, response: &str, count: usize) -> Vec<String> {
        let mut results = Vec::with_capacity(count);

        for i in 1..=count {
            let pattern = format!("[{}]", i);
            let next_pattern = format!("[{}]", i + 1);

            if let Some(start) = response.find(&pattern) {
                let text_start = start + pattern.len();
                let text_end = if i < count {
                    response[text_start..]
                        .find(&next_pattern)
                        .map(|p| text_start + p)
                        .unwrap_or(response.len())
                } else {
                    response.len()
                };

                results.push(response[text_start..text_end].trim().to_string());
            }
        }

        // If numbered parsing failed, split by lines as a fallback.
        if results.len() != count {
            warn!(
                "Batch parse failed (got {} of {}), using line-based fallback",
                results.len(),
                count
            );
            results = response
                .lines()
                .filter(|l| !l.trim().is_empty())
                .take(count)
                .map(|l| l.trim().to_string())
                .collect();
        }

        while results.len() < count {
            results.push(String::new());
        }

        results
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate_batch(
        &self,
        texts: &[&str],
        context_before: &[&str],
        context_after: &[&str],
        target_lang: &str,
    ) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            "Translating {} line(s) to {} ({} context lines)",
            texts.len(),
            target_lang,
            context_before.len() + context_after.len()
        );

        let prompt = self.build_prompt(texts, context_before, context_after, target_lang);

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SubgenError::Provider(format!("Translation request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubgenError::Provider(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(SubgenError::Provider(format!(
                "Translation API error ({status}): {body}"
            )));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| SubgenError::Provider(format!("Failed to parse translation response: {e}")))?;

        if let Some(error) = gemini_response.error {
            return Err(SubgenError::Provider(format!("Gemini error: {}", error.message)));
        }

        let translated_text = gemini_response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        Ok(self.parse_batch_response(&translated_text, texts.len()))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Convert language code to a human-readable name for better prompting.
fn language_code_to_name(code: &str) -> &'static str {
    let lowercase = code.to_lowercase();
    match lowercase.as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "id" => "Indonesian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "cs" => "Czech",
        "sv" => "Swedish",
        "da" => "Danish",
        "fi" => "Finnish",
        "no" => "Norwegian",
        "el" => "Greek",
        "he" => "Hebrew",
        "hu" => "Hungarian",
        "ro" => "Romanian",
        _ => "the target language",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translator_creation() {
        let translator = GeminiTranslator::new("test-key".to_string());
        assert_eq!(translator.name(), "gemini");
        assert_eq!(translator.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_with_model() {
        let translator = GeminiTranslator::new("test-key".to_string()).with_model("gemini-1.5-pro");
        assert_eq!(translator.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_build_prompt_includes_context_blocks() {
        let translator = GeminiTranslator::new("test-key".to_string());
        let prompt = translator.build_prompt(
            &["How are you?"],
            &["Hi there."],
            &["See you later."],
            "es",
        );
        assert!(prompt.contains("Spanish"));
        assert!(prompt.contains("[1] How are you?"));
        assert!(prompt.contains("Hi there."));
        assert!(prompt.contains("See you later."));
        assert!(prompt.contains("do NOT translate"));
    }

    #[test]
    fn test_build_prompt_without_context() {
        let translator = GeminiTranslator::new("test-key".to_string());
        let prompt = translator.build_prompt(&["Hello", "Goodbye"], &[], &[], "ja");
        assert!(prompt.contains("Japanese"));
        assert!(prompt.contains("[1] Hello"));
        assert!(prompt.contains("[2] Goodbye"));
        assert!(!prompt.contains("context only"));
    }

    #[test]
    fn test_parse_batch_response() {
        let translator = GeminiTranslator::new("test-key".to_string());
        let response = "[1] Hola\n[2] Adiós";
        let results = translator.parse_batch_response(response, 2);
        assert_eq!(results, vec!["Hola".to_string(), "Adiós".to_string()]);
    }

    #[test]
    fn test_parse_batch_response_line_fallback() {
        let translator = GeminiTranslator::new("test-key".to_string());
        let response = "Hola\nAdiós";
        let results = translator.parse_batch_response(response, 2);
        assert_eq!(results, vec!["Hola".to_string(), "Adiós".to_string()]);
    }

    #[test]
    fn test_parse_batch_response_pads_missing() {
        let translator = GeminiTranslator::new("test-key".to_string());
        let results = translator.parse_batch_response("[1] Uno", 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], "Uno");
    }

    #[test]
    fn test_language_code_to_name() {
        assert_eq!(language_code_to_name("en"), "English");
        assert_eq!(language_code_to_name("ES"), "Spanish");
        assert_eq!(language_code_to_name("xyz"), "the target language");
    }
}
