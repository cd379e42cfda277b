//! Per-language document versions
//!
//! Each language keeps three texts: the template it started from, the last
//! saved snapshot and the text being edited. `saved_text` is only ever
//! copied from `current_text`, and `current_text` only from an edit or the
//! template, so the triple always reads as default / last reviewed /
//! in progress.

use crate::languages::LanguageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    default_text: String,
    saved_text: String,
    current_text: String,
}

impl DocumentVersion {
    /// Fresh document where all three versions equal the template.
    pub fn from_template(template: &str) -> Self {
        Self {
            default_text: template.to_string(),
            saved_text: template.to_string(),
            current_text: template.to_string(),
        }
    }

    pub fn default_text(&self) -> &str {
        &self.default_text
    }

    pub fn saved_text(&self) -> &str {
        &self.saved_text
    }

    pub fn current_text(&self) -> &str {
        &self.current_text
    }

    /// The editor holds text that has not been saved yet.
    pub fn has_unsaved_changes(&self) -> bool {
        self.current_text != self.saved_text
    }

    pub fn matches_default(&self) -> bool {
        self.current_text == self.default_text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentStore {
    documents: BTreeMap<LanguageId, DocumentVersion>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The language's document, created from its template on first access.
    pub fn get_or_init(&mut self, lang: &LanguageId) -> &DocumentVersion {
        self.entry(lang)
    }

    pub fn get(&self, lang: &LanguageId) -> Option<&DocumentVersion> {
        self.documents.get(lang)
    }

    pub fn update_current(&mut self, lang: &LanguageId, text: impl Into<String>) {
        self.entry(lang).current_text = text.into();
    }

    pub fn save(&mut self, lang: &LanguageId) {
        let doc = self.entry(lang);
        if doc.saved_text != doc.current_text {
            doc.saved_text = doc.current_text.clone();
        }
    }

    pub fn revert_to_default(&mut self, lang: &LanguageId) {
        let doc = self.entry(lang);
        doc.current_text = doc.default_text.clone();
    }

    pub fn languages(&self) -> impl Iterator<Item = &LanguageId> {
        self.documents.keys()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn entry(&mut self, lang: &LanguageId) -> &mut DocumentVersion {
        self.documents
            .entry(lang.clone())
            .or_insert_with(|| DocumentVersion::from_template(lang.default_template()))
    }
}
