//! Prompt text configuration and the review prompt sent to providers

use crate::error::SessionError;
use crate::languages::LanguageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const GLOBAL_PROMPT_DEFAULT: &str = "Analyse the differences between the two code samples only.";
const LANGUAGE_PROMPT_PREFIX: &str = "Give one suggestion for improvement for ";

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptField {
    Global,
    Language,
}

impl fmt::Display for PromptField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptField::Global => f.write_str("global"),
            PromptField::Language => f.write_str("language"),
        }
    }
}

/// Guidance appended after the code blocks.
///
/// An empty global prompt means "use the default"; a language without an
/// override uses a generated one naming the language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub global: String,
    pub languages: BTreeMap<LanguageId, String>,
}

impl PromptConfig {
    pub fn effective_global(&self) -> &str {
        if self.global.is_empty() {
            GLOBAL_PROMPT_DEFAULT
        } else {
            &self.global
        }
    }

    pub fn effective_language(&self, lang: &LanguageId) -> String {
        match self.languages.get(lang) {
            Some(text) => text.clone(),
            None => default_language_prompt(lang),
        }
    }

    pub fn has_language_override(&self, lang: &LanguageId) -> bool {
        self.languages.contains_key(lang)
    }

    pub fn set_global(&mut self, text: impl Into<String>, max: usize) -> Result<(), SessionError> {
        let text = text.into();
        check_length(PromptField::Global, &text, max)?;
        self.global = text;
        Ok(())
    }

    pub fn set_language(
        &mut self,
        lang: &LanguageId,
        text: impl Into<String>,
        max: usize,
    ) -> Result<(), SessionError> {
        let text = text.into();
        check_length(PromptField::Language, &text, max)?;
        self.languages.insert(lang.clone(), text);
        Ok(())
    }

    /// Drop the global text and the override for `lang`.
    pub fn reset(&mut self, lang: &LanguageId) {
        self.global.clear();
        self.languages.remove(lang);
    }
}

pub fn default_language_prompt(lang: &LanguageId) -> String {
    format!("{}{}.", LANGUAGE_PROMPT_PREFIX, lang.label())
}

fn check_length(field: PromptField, text: &str, max: usize) -> Result<(), SessionError> {
    let len = text.chars().count();
    if len > max {
        return Err(SessionError::PromptTooLong { field, len, max });
    }
    Ok(())
}

/// Markdown shown as the user message and sent to the provider.
pub fn build_review_prompt(
    lang: &LanguageId,
    last_saved: &str,
    new_saved: &str,
    global_prompt: &str,
    language_prompt: &str,
) -> String {
    let fence_lang = lang.label().to_lowercase();
    let mut out = String::with_capacity(last_saved.len() + new_saved.len() + 256);

    out.push_str("Last saved code:\n");
    push_block(&mut out, &fence_lang, last_saved);
    out.push_str("\n\nNewly saved code:\n");
    push_block(&mut out, &fence_lang, new_saved);
    out.push_str("\n\n");
    out.push_str(global_prompt.trim());

    // The global line is always newline-terminated; a language prompt
    // follows after one blank line.
    out.push('\n');
    let language_prompt = language_prompt.trim();
    if !language_prompt.is_empty() {
        out.push('\n');
        out.push_str(language_prompt);
    }
    out
}

fn push_block(out: &mut String, fence_lang: &str, body: &str) {
    out.push_str(FENCE);
    out.push_str(fence_lang);
    out.push('\n');
    out.push_str(body);
    out.push('\n');
    out.push_str(FENCE);
}
