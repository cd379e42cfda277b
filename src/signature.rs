//! Prompt signatures
//!
//! A signature fingerprints the code and the effective prompt texts that
//! went into a review. Comparing it to the last recorded baseline tells us
//! whether a new review would just repeat the previous one.

use crate::languages::LanguageId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptSignature(String);

impl PromptSignature {
    /// Digest of the three inputs. Each field is length-prefixed so that
    /// moving text from one field to the next always changes the result.
    pub fn compute(code: &str, global_prompt: &str, language_prompt: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [code, global_prompt, language_prompt] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PromptSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last reviewed signature per language
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureTracker {
    baselines: BTreeMap<LanguageId, PromptSignature>,
}

impl SignatureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unchanged(&self, lang: &LanguageId, signature: &PromptSignature) -> bool {
        self.baselines.get(lang) == Some(signature)
    }

    pub fn record(&mut self, lang: &LanguageId, signature: PromptSignature) {
        self.baselines.insert(lang.clone(), signature);
    }

    pub fn baseline(&self, lang: &LanguageId) -> Option<&PromptSignature> {
        self.baselines.get(lang)
    }
}
