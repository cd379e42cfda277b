//! The session aggregate
//!
//! `Session` owns every piece of user state and writes each change through
//! to the key-value store. Writes are best-effort: a failed write is logged
//! and the in-memory state stays authoritative.

use crate::config::Settings;
use crate::conversation::{ChatMessage, ConversationLog, ConversationStore, MessageId};
use crate::credentials::Credentials;
use crate::documents::{DocumentStore, DocumentVersion};
use crate::error::SessionError;
use crate::languages::LanguageId;
use crate::prompt::PromptConfig;
use crate::provider::{ModelId, Provider};
use crate::signature::{PromptSignature, SignatureTracker};
use crate::store::{self, KvStore, RequestLock, StoreKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const DEFAULT_LEFT_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Dark => f.write_str("dark"),
            Theme::Light => f.write_str("light"),
        }
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(anyhow::anyhow!("unknown theme '{}'", other)),
        }
    }
}

pub struct Session {
    kv: Arc<dyn KvStore>,
    settings: Settings,
    language: LanguageId,
    theme: Theme,
    left_percent: f64,
    documents: DocumentStore,
    conversations: ConversationStore,
    prompts: PromptConfig,
    signatures: SignatureTracker,
    model: ModelId,
    credentials: Credentials,
    request: Option<RequestLock>,
    placeholder: Option<&'static str>,
}

impl Session {
    /// Restore a session from `kv`, filling anything missing with defaults.
    pub fn open(kv: Arc<dyn KvStore>, settings: Settings) -> Self {
        let backing = kv.as_ref();

        let language = store::load(backing, StoreKey::Language)
            .unwrap_or_else(|| LanguageId::new(settings.default_language.clone()));
        let theme = store::load(backing, StoreKey::Theme).unwrap_or(settings.default_theme);
        let left_percent = clamp_percent(
            store::load(backing, StoreKey::LeftPercent).unwrap_or(DEFAULT_LEFT_PERCENT),
            settings.min_panel_percent,
        );
        let mut documents: DocumentStore = store::load_or_default(backing, StoreKey::Documents);
        documents.get_or_init(&language);
        let conversations = store::load_or_default(backing, StoreKey::Conversations);
        let signatures = store::load_or_default(backing, StoreKey::Signatures);

        let prompts = PromptConfig {
            global: store::load_or_default(backing, StoreKey::GlobalPrompt),
            languages: store::load_or_default(backing, StoreKey::LanguagePrompts),
        };
        let credentials = settings.credential_backend.load(backing);
        let model = store::load::<ModelId>(backing, StoreKey::Model)
            .unwrap_or_else(|| initial_model(&credentials, &settings.provider_preference));

        tracing::debug!(language = %language, model = %model, "session opened");

        Self {
            kv,
            conversations,
            signatures,
            settings,
            language,
            theme,
            left_percent,
            documents,
            prompts,
            model,
            credentials,
            request: None,
            placeholder: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ── Language ───────────────────────────────────────────────────────────

    pub fn language(&self) -> &LanguageId {
        &self.language
    }

    pub fn set_language(&mut self, lang: LanguageId) {
        self.documents.get_or_init(&lang);
        self.language = lang;
        self.persist(StoreKey::Language, &self.language);
        self.persist(StoreKey::Documents, &self.documents);
    }

    /// Switch languages, optionally saving unsaved work first. Unsaved text
    /// is kept for the old language either way. Returns whether it saved.
    pub fn switch_language(&mut self, lang: LanguageId, save_first: bool) -> bool {
        let saved = save_first && self.document().has_unsaved_changes() && self.save();
        self.set_language(lang);
        saved
    }

    // ── Documents ──────────────────────────────────────────────────────────

    /// Document of the active language
    pub fn document(&mut self) -> &DocumentVersion {
        self.documents.get_or_init(&self.language)
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Replace the editor text of the active language.
    pub fn edit(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        let len = text.chars().count();
        if len > self.settings.max_code_size {
            return Err(SessionError::CodeTooLarge {
                len,
                max: self.settings.max_code_size,
            });
        }
        self.documents.update_current(&self.language, text);
        self.persist(StoreKey::Documents, &self.documents);
        Ok(())
    }

    /// Snapshot the active document. Returns false when there was nothing
    /// new to save.
    pub fn save(&mut self) -> bool {
        if !self.document().has_unsaved_changes() {
            return false;
        }
        self.documents.save(&self.language);
        self.persist(StoreKey::Documents, &self.documents);
        true
    }

    pub fn revert_to_default(&mut self) {
        self.documents.revert_to_default(&self.language);
        self.persist(StoreKey::Documents, &self.documents);
    }

    // ── Conversation ───────────────────────────────────────────────────────

    /// Conversation of the active language
    pub fn conversation(&self) -> ConversationLog {
        self.conversations.snapshot(&self.language)
    }

    pub fn conversation_for(&self, lang: &LanguageId) -> ConversationLog {
        self.conversations.snapshot(lang)
    }

    pub fn append_message(&mut self, lang: &LanguageId, message: ChatMessage) -> MessageId {
        let id = self.conversations.append(lang, message);
        self.persist(StoreKey::Conversations, &self.conversations);
        id
    }

    pub fn update_message<F>(&mut self, lang: &LanguageId, id: MessageId, mutator: F) -> bool
    where
        F: FnOnce(ChatMessage) -> ChatMessage,
    {
        let updated = self.conversations.update_by_id(lang, id, mutator);
        if updated {
            self.persist(StoreKey::Conversations, &self.conversations);
        }
        updated
    }

    /// Replace a message's content in memory only. `flush_conversations`
    /// writes the result.
    pub(crate) fn reveal_message(
        &mut self,
        lang: &LanguageId,
        id: MessageId,
        content: String,
    ) -> bool {
        self.conversations
            .update_by_id(lang, id, |message| ChatMessage { content, ..message })
    }

    pub(crate) fn flush_conversations(&self) {
        self.persist(StoreKey::Conversations, &self.conversations);
    }

    pub fn clear_conversation(&mut self, lang: &LanguageId) {
        self.conversations.clear(lang);
        self.persist(StoreKey::Conversations, &self.conversations);
    }

    /// Loading placeholder of the request in flight, if any. Never stored.
    pub fn placeholder(&self) -> Option<&'static str> {
        self.placeholder
    }

    pub(crate) fn set_placeholder(&mut self, frame: Option<&'static str>) {
        self.placeholder = frame;
    }

    // ── Prompts and signatures ─────────────────────────────────────────────

    pub fn prompts(&self) -> &PromptConfig {
        &self.prompts
    }

    pub fn effective_global_prompt(&self) -> &str {
        self.prompts.effective_global()
    }

    /// Language prompt of the active language
    pub fn effective_language_prompt(&self) -> String {
        self.prompts.effective_language(&self.language)
    }

    pub fn set_global_prompt(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        self.prompts.set_global(text, self.settings.global_prompt_max)?;
        self.persist(StoreKey::GlobalPrompt, &self.prompts.global);
        Ok(())
    }

    pub fn set_language_prompt(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        self.prompts
            .set_language(&self.language, text, self.settings.language_prompt_max)?;
        self.persist(StoreKey::LanguagePrompts, &self.prompts.languages);
        Ok(())
    }

    /// Back to the default global prompt and the active language's default.
    pub fn reset_prompts(&mut self) {
        self.prompts.reset(&self.language);
        self.persist(StoreKey::GlobalPrompt, &self.prompts.global);
        self.persist(StoreKey::LanguagePrompts, &self.prompts.languages);
    }

    /// Signature of what a review of the active language would send now.
    pub fn current_signature(&mut self) -> PromptSignature {
        let language_prompt = self.effective_language_prompt();
        let code = self.documents.get_or_init(&self.language).current_text();
        PromptSignature::compute(code, self.prompts.effective_global(), &language_prompt)
    }

    /// Nothing changed since the last completed review of this language.
    pub fn is_unchanged(&mut self) -> bool {
        let signature = self.current_signature();
        self.signatures.is_unchanged(&self.language, &signature)
    }

    pub fn signatures(&self) -> &SignatureTracker {
        &self.signatures
    }

    pub fn record_signature(&mut self, lang: &LanguageId, signature: PromptSignature) {
        self.signatures.record(lang, signature);
        self.persist(StoreKey::Signatures, &self.signatures);
    }

    // ── Model and credentials ──────────────────────────────────────────────

    pub fn model(&self) -> &ModelId {
        &self.model
    }

    pub fn set_model(&mut self, model: ModelId) -> Result<(), SessionError> {
        if !model.is_cataloged() {
            return Err(SessionError::UnknownModel(model.to_string()));
        }
        self.model = model;
        self.persist(StoreKey::Model, &self.model);
        Ok(())
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn credential(&self, provider: Provider) -> Option<&str> {
        self.credentials.get(provider)
    }

    /// Set or clear (empty secret) one provider key.
    pub fn set_credential(&mut self, provider: Provider, secret: &str) {
        let mut credentials = self.credentials.clone();
        credentials.set(provider, secret);
        self.set_credentials(credentials);
    }

    /// Replace all keys. When the selected model's provider has no key but
    /// another provider does, the light model of the first such provider
    /// is selected.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
        if let Err(err) = self
            .settings
            .credential_backend
            .save(self.kv.as_ref(), &self.credentials)
        {
            tracing::warn!(error = %err, "failed to persist credentials");
        }

        if self.credentials.has(self.model.provider()) {
            return;
        }
        if let Some(provider) = self
            .credentials
            .first_available(&self.settings.provider_preference)
        {
            tracing::info!(provider = provider.as_str(), "switching to provider with a key");
            self.model = provider.light();
            self.persist(StoreKey::Model, &self.model);
        }
    }

    // ── Presentation ───────────────────────────────────────────────────────

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
        self.persist(StoreKey::Theme, &self.theme);
    }

    pub fn left_percent(&self) -> f64 {
        self.left_percent
    }

    /// Set the left pane width, clamped so neither pane gets too narrow.
    pub fn set_left_percent(&mut self, percent: f64) -> f64 {
        self.left_percent = clamp_percent(percent, self.settings.min_panel_percent);
        self.persist(StoreKey::LeftPercent, &self.left_percent);
        self.left_percent
    }

    // ── Request flag ───────────────────────────────────────────────────────

    pub fn is_in_flight(&self) -> bool {
        self.request.is_some()
    }

    /// Claim the single request slot. False when this session or any other
    /// session on the same store already holds it.
    pub(crate) fn try_begin_request(&mut self) -> bool {
        if self.request.is_some() {
            return false;
        }
        let lock = match self.kv.try_lock_request() {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::info!("another review is running on this store");
                return false;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to lock the store for a review");
                RequestLock::local()
            }
        };
        self.request = Some(lock);
        true
    }

    pub(crate) fn end_request(&mut self) {
        self.request = None;
        self.placeholder = None;
    }

    fn persist<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) {
        if let Err(err) = store::save_json(self.kv.as_ref(), key, value) {
            tracing::warn!(key = key.as_str(), error = %err, "failed to persist session state");
        }
    }
}

/// Model used when none was ever chosen.
pub fn initial_model(credentials: &Credentials, preference: &[Provider]) -> ModelId {
    credentials
        .first_available(preference)
        .map(|p| p.light())
        .unwrap_or_default()
}

fn clamp_percent(percent: f64, min: f64) -> f64 {
    let min = min.clamp(0.0, 50.0);
    if percent.is_nan() {
        return DEFAULT_LEFT_PERCENT;
    }
    percent.clamp(min, 100.0 - min)
}

/// Serialized form of the whole session, for diagnostics.
#[derive(Debug, Serialize)]
pub struct SessionSummary<'a> {
    pub language: &'a LanguageId,
    pub model: String,
    pub theme: Theme,
    pub left_percent: f64,
    pub documents: usize,
    pub keys: Vec<&'static str>,
    pub baselines: BTreeMap<&'a str, bool>,
}

impl Session {
    pub fn summary(&self) -> SessionSummary<'_> {
        SessionSummary {
            language: &self.language,
            model: self.model.to_string(),
            theme: self.theme,
            left_percent: self.left_percent,
            documents: self.documents.len(),
            keys: Provider::all()
                .iter()
                .filter(|p| self.credentials.has(**p))
                .map(|p| p.as_str())
                .collect(),
            baselines: self
                .documents
                .languages()
                .map(|lang| (lang.as_str(), self.signatures.baseline(lang).is_some()))
                .collect(),
        }
    }
}
