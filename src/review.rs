//! Review requests
//!
//! A review saves the active document, asks the provider about the diff
//! between the previous and the new snapshot, then reveals the answer into
//! the conversation a few characters at a time.
//!
//! Everything runs on the caller's task. One `select!` loop per phase waits
//! on (in priority order) user cancellation, the provider call and the tick
//! timer, so every conversation change happens in a single, ordered stream.

use crate::config::strings;
use crate::conversation::{ChatMessage, MessageId};
use crate::error::ReviewError;
use crate::languages::LanguageId;
use crate::prompt::build_review_prompt;
use crate::provider::{GatewayError, GatewayRequest, ProviderGateway};
use crate::reveal::{Reveal, RevealConfig, RevealPhase, TickOutcome};
use crate::session::Session;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Live view of a running review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEvent<'a> {
    /// Loading placeholder changed
    Placeholder(&'a str),
    /// A message was added to the conversation
    Appended(&'a ChatMessage),
    /// The answer's visible text grew
    Revealed { id: MessageId, content: &'a str },
}

pub trait ReviewObserver {
    fn on_event(&mut self, event: ReviewEvent<'_>);
}

impl ReviewObserver for () {
    fn on_event(&mut self, _event: ReviewEvent<'_>) {}
}

/// Whether a review may start right now.
pub fn check_eligible(session: &mut Session) -> Result<(), ReviewError> {
    if session.is_in_flight() {
        return Err(ReviewError::AlreadyInFlight);
    }
    if session.is_unchanged() {
        return Err(ReviewError::Unchanged);
    }
    Ok(())
}

/// Run one review of the active language to completion.
///
/// Returns the id of the fully revealed answer. Refusals (`Unchanged`,
/// `AlreadyInFlight`) leave the session untouched; every other error has
/// already been written to the conversation when this returns. The request
/// flag is released on every path, including a panic.
pub async fn request_review(
    session: &mut Session,
    gateway: &dyn ProviderGateway,
    cancel: CancellationToken,
    observer: &mut dyn ReviewObserver,
) -> Result<MessageId, ReviewError> {
    check_eligible(session)?;
    if !session.try_begin_request() {
        return Err(ReviewError::AlreadyInFlight);
    }

    let lang = session.language().clone();
    tracing::info!(language = %lang, model = %session.model(), "review started");

    let outcome = AssertUnwindSafe(run(session, &lang, gateway, &cancel, observer))
        .catch_unwind()
        .await;
    // Reveal ticks only touch memory
    session.flush_conversations();
    session.end_request();

    match outcome {
        Ok(result) => {
            match &result {
                Ok(_) => tracing::info!(language = %lang, "review completed"),
                Err(err) => tracing::info!(language = %lang, error = %err, "review ended early"),
            }
            result
        }
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn run(
    session: &mut Session,
    lang: &LanguageId,
    gateway: &dyn ProviderGateway,
    cancel: &CancellationToken,
    observer: &mut dyn ReviewObserver,
) -> Result<MessageId, ReviewError> {
    // Baseline candidate is taken before anything changes
    let signature = session.current_signature();

    let previous = session.document().saved_text().to_string();
    session.save();
    let saved = session.document().saved_text().to_string();
    let prompt = build_review_prompt(
        lang,
        &previous,
        &saved,
        session.effective_global_prompt(),
        &session.effective_language_prompt(),
    );

    session.clear_conversation(lang);
    append(session, lang, ChatMessage::user(prompt.clone()), observer);

    let model = session.model().clone();
    let provider = model.provider();
    let Some(credential) = session.credential(provider).map(str::to_string) else {
        tracing::warn!(provider = provider.as_str(), "no API key for selected model");
        append(session, lang, ChatMessage::error(strings::NO_TOKEN), observer);
        return Err(ReviewError::MissingCredential { provider });
    };

    let settings = session.settings().clone();
    let mut reveal = Reveal::new(RevealConfig::from_settings(&settings));

    // Dropping `call` aborts the HTTP request; the child token tells the
    // gateway explicitly.
    let call_cancel = cancel.child_token();
    let call = AssertUnwindSafe(gateway.complete(GatewayRequest {
        provider,
        model: model.model().to_string(),
        credential,
        prompt,
        cancel: call_cancel.clone(),
    }))
    .catch_unwind();
    tokio::pin!(call);

    if let Some(frame) = reveal.begin(now()) {
        show_placeholder(session, frame, observer);
    }
    let mut loading_ticks = ticker(settings.loading_tick());

    let answer = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                call_cancel.cancel();
                reveal.cancel(now());
                session.set_placeholder(None);
                append(session, lang, ChatMessage::error(strings::PROMPT_CANCELLED), observer);
                return Err(ReviewError::UserCancelled);
            }
            result = &mut call => {
                session.set_placeholder(None);
                let err = match result {
                    Ok(Ok(text)) => break text,
                    Ok(Err(err)) => err,
                    Err(panic) => GatewayError::Panicked(panic_detail(panic)),
                };
                tracing::warn!(error = %err, "provider call failed");
                reveal.fail(err.to_string(), now());
                append(
                    session,
                    lang,
                    ChatMessage::error(format!("{}{}", strings::PROVIDER_ERROR_PREFIX, err)),
                    observer,
                );
                return Err(ReviewError::Gateway(err));
            }
            _ = loading_ticks.tick() => match reveal.tick(now()) {
                TickOutcome::Placeholder(frame) => show_placeholder(session, frame, observer),
                TickOutcome::Truncated => {
                    call_cancel.cancel();
                    session.set_placeholder(None);
                    tracing::warn!(limit_ms = settings.max_stream_ms, "provider did not answer in time");
                    append(session, lang, ChatMessage::ai(strings::OUTPUT_TRUNCATED), observer);
                    return Err(ReviewError::StreamTimeout);
                }
                _ => {}
            },
        }
    };

    reveal.deliver(answer, now());
    let answer_id = append(session, lang, ChatMessage::ai(""), observer);
    let mut reveal_ticks = ticker(settings.reveal_tick());

    while reveal.phase() != RevealPhase::Completed {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                reveal.cancel(now());
                append(session, lang, ChatMessage::error(strings::PROMPT_CANCELLED), observer);
                return Err(ReviewError::UserCancelled);
            }
            _ = reveal_ticks.tick() => match reveal.tick(now()) {
                TickOutcome::Progress | TickOutcome::Completed => {
                    show_text(session, lang, answer_id, reveal.visible().to_string(), observer);
                }
                TickOutcome::Truncated => {
                    let content = if reveal.visible().is_empty() {
                        strings::OUTPUT_TRUNCATED.to_string()
                    } else {
                        format!("{}\n\n{}", reveal.visible(), strings::OUTPUT_TRUNCATED)
                    };
                    show_text(session, lang, answer_id, content, observer);
                    return Err(ReviewError::StreamTimeout);
                }
                _ => {}
            },
        }
    }

    session.record_signature(lang, signature);
    Ok(answer_id)
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Interval whose first tick is one period away.
fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn append(
    session: &mut Session,
    lang: &LanguageId,
    message: ChatMessage,
    observer: &mut dyn ReviewObserver,
) -> MessageId {
    observer.on_event(ReviewEvent::Appended(&message));
    session.append_message(lang, message)
}

fn show_placeholder(session: &mut Session, frame: &'static str, observer: &mut dyn ReviewObserver) {
    session.set_placeholder(Some(frame));
    observer.on_event(ReviewEvent::Placeholder(frame));
}

fn show_text(
    session: &mut Session,
    lang: &LanguageId,
    id: MessageId,
    content: String,
    observer: &mut dyn ReviewObserver,
) {
    observer.on_event(ReviewEvent::Revealed { id, content: &content });
    session.reveal_message(lang, id, content);
}

fn panic_detail(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::conversation::Role;
    use crate::provider::Provider;
    use crate::store::{MemoryStore, StoreKey};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    enum Script {
        Answer(&'static str),
        Fail(GatewayError),
        Panic,
    }

    struct FakeGateway {
        script: Script,
        delay: Duration,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        fn new(script: Script) -> Self {
            Self {
                script,
                delay: Duration::from_millis(300),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderGateway for FakeGateway {
        async fn complete(&self, request: GatewayRequest) -> Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            tokio::time::sleep(self.delay).await;
            match &self.script {
                Script::Answer(text) => Ok(text.to_string()),
                Script::Fail(err) => Err(err.clone()),
                Script::Panic => panic!("gateway exploded"),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        placeholders: Vec<String>,
        revealed: Vec<String>,
        appended: Vec<Role>,
        cancel_after_chars: Option<(usize, CancellationToken)>,
    }

    impl ReviewObserver for Recorder {
        fn on_event(&mut self, event: ReviewEvent<'_>) {
            match event {
                ReviewEvent::Placeholder(frame) => self.placeholders.push(frame.to_string()),
                ReviewEvent::Appended(message) => self.appended.push(message.role),
                ReviewEvent::Revealed { content, .. } => {
                    self.revealed.push(content.to_string());
                    if let Some((limit, token)) = &self.cancel_after_chars {
                        if content.chars().count() >= *limit {
                            token.cancel();
                        }
                    }
                }
            }
        }
    }

    fn session_with(settings: Settings) -> Session {
        Session::open(Arc::new(MemoryStore::new()), settings)
    }

    fn keyed_session() -> Session {
        let mut session = session_with(Settings::default());
        session.set_credential(Provider::OpenAi, "sk-test");
        session
    }

    fn roles(session: &Session) -> Vec<Role> {
        session.conversation().iter().map(|m| m.role).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn completed_review_reveals_full_answer_and_records_baseline() {
        let mut session = keyed_session();
        session.edit("let a = 1;").unwrap();
        let gateway = FakeGateway::new(Script::Answer("Use const instead of let."));
        let mut recorder = Recorder::default();

        let id = request_review(&mut session, &gateway, CancellationToken::new(), &mut recorder)
            .await
            .unwrap();

        let log = session.conversation();
        assert_eq!(roles(&session), vec![Role::User, Role::Ai]);
        assert_eq!(log.messages()[1].id, id);
        assert_eq!(log.messages()[1].content, "Use const instead of let.");
        assert!(session.is_unchanged());
        assert!(!session.is_in_flight());
        assert!(session.placeholder().is_none());
        assert_eq!(gateway.calls(), 1);

        // 25 chars at 5 per tick
        assert_eq!(recorder.revealed.len(), 5);
        assert_eq!(recorder.revealed[0], "Use c");
        assert_eq!(recorder.placeholders[0], "Thinking");
        assert_eq!(recorder.placeholders[1], "Thinking.");
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_compares_previous_and_new_save() {
        let mut session = keyed_session();
        session.edit("v1").unwrap();
        session.save();
        session.edit("v2").unwrap();
        let gateway = FakeGateway::new(Script::Answer("ok"));

        request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap();

        let sent = gateway.prompts.lock().unwrap()[0].clone();
        assert!(sent.starts_with("Last saved code:\n```javascript\nv1\n```"));
        assert!(sent.contains("Newly saved code:\n```javascript\nv2\n```"));
        assert_eq!(session.conversation().messages()[0].content, sent);
        assert_eq!(session.document().saved_text(), "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_for_python() {
        let mut session = session_with(Settings::default());
        session.set_language(LanguageId::from("python"));
        session.edit("print('hi')").unwrap();
        let gateway = FakeGateway::new(Script::Answer("unused"));

        let err = request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ReviewError::MissingCredential {
                provider: Provider::OpenAi
            }
        );
        let log = session.conversation_for(&LanguageId::from("python"));
        let errors: Vec<_> = log.iter().filter(|m| m.role == Role::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content, strings::NO_TOKEN);
        assert!(!session.is_in_flight());
        assert_eq!(gateway.calls(), 0);
        assert!(!session.is_unchanged());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_code_is_refused_until_edited() {
        let mut session = keyed_session();
        let gateway = FakeGateway::new(Script::Answer("fine"));

        session.edit("a").unwrap();
        session.edit("b").unwrap();
        request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap();
        let log_after_first = session.conversation();

        let err = request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();
        assert_eq!(err, ReviewError::Unchanged);
        assert!(err.is_refusal());
        assert_eq!(session.conversation(), log_after_first);
        assert_eq!(gateway.calls(), 1);

        session.edit("a").unwrap();
        assert!(check_eligible(&mut session).is_ok());
        request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_edit_re_enables_review() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        let gateway = FakeGateway::new(Script::Answer("fine"));
        request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(check_eligible(&mut session), Err(ReviewError::Unchanged));

        session.set_global_prompt("Only talk about naming.").unwrap();
        assert!(check_eligible(&mut session).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_request_refuses_another() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        assert!(session.try_begin_request());
        let gateway = FakeGateway::new(Script::Answer("fine"));

        let err = request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();
        assert_eq!(err, ReviewError::AlreadyInFlight);
        assert!(session.conversation().is_empty());
        assert!(session.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn second_session_on_the_same_store_is_refused() {
        let kv = Arc::new(MemoryStore::new());
        let mut first = Session::open(kv.clone(), Settings::default());
        let mut second = Session::open(kv.clone(), Settings::default());
        second.set_credential(Provider::OpenAi, "sk-test");
        second.edit("from second").unwrap();
        assert!(first.try_begin_request());
        let gateway = FakeGateway::new(Script::Answer("fine"));

        let err = request_review(&mut second, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();
        assert_eq!(err, ReviewError::AlreadyInFlight);
        assert!(second.conversation().is_empty());
        assert_eq!(gateway.calls(), 0);

        first.end_request();
        request_review(&mut second, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_ticks_persist_the_answer_once() {
        let kv = Arc::new(MemoryStore::new());
        let mut session = Session::open(kv.clone(), Settings::default());
        session.set_credential(Provider::OpenAi, "sk-test");
        session.edit("let a = 1;").unwrap();
        let answer = "Prefer const for bindings that are never reassigned, and name the \
                      counter after what it counts rather than after its type.";
        let gateway = FakeGateway::new(Script::Answer(answer));
        let mut recorder = Recorder::default();
        let writes = kv.writes(StoreKey::Conversations);

        request_review(&mut session, &gateway, CancellationToken::new(), &mut recorder)
            .await
            .unwrap();

        assert!(recorder.revealed.len() > 10);
        // clear, user prompt, empty answer, final flush
        assert_eq!(kv.writes(StoreKey::Conversations) - writes, 4);
        let reopened = Session::open(kv.clone(), Settings::default());
        assert_eq!(reopened.conversation().messages()[1].content, answer);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_reveal_stops_growth() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        let gateway = FakeGateway::new(Script::Answer("abcdefghijklmnopqrstuvwxyz"));
        let cancel = CancellationToken::new();
        let mut recorder = Recorder {
            cancel_after_chars: Some((10, cancel.clone())),
            ..Recorder::default()
        };

        let err = request_review(&mut session, &gateway, cancel, &mut recorder)
            .await
            .unwrap_err();

        assert_eq!(err, ReviewError::UserCancelled);
        let log = session.conversation();
        assert_eq!(roles(&session), vec![Role::User, Role::Ai, Role::Error]);
        assert_eq!(log.messages()[1].content, "abcdefghij");
        assert_eq!(log.messages()[2].content, strings::PROMPT_CANCELLED);
        assert_eq!(recorder.revealed.last().map(String::as_str), Some("abcdefghij"));
        assert!(!session.is_unchanged());
        assert!(!session.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_loading_skips_answer() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        let gateway =
            FakeGateway::new(Script::Answer("never shown")).with_delay(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = request_review(&mut session, &gateway, cancel, &mut ())
            .await
            .unwrap_err();

        assert_eq!(err, ReviewError::UserCancelled);
        assert_eq!(roles(&session), vec![Role::User, Role::Error]);
        assert!(session.placeholder().is_none());
        assert!(!session.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_is_truncated() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        let gateway =
            FakeGateway::new(Script::Answer("too late")).with_delay(Duration::from_secs(120));

        let err = request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();

        assert_eq!(err, ReviewError::StreamTimeout);
        let log = session.conversation();
        assert_eq!(roles(&session), vec![Role::User, Role::Ai]);
        assert_eq!(log.messages()[1].content, strings::OUTPUT_TRUNCATED);
        assert!(!session.is_unchanged());
        assert!(!session.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reveal_is_truncated_with_marker() {
        let settings = Settings {
            max_stream_ms: 1_000,
            ..Settings::default()
        };
        let mut session = session_with(settings);
        session.set_credential(Provider::OpenAi, "sk-test");
        session.edit("x").unwrap();
        let long_answer: &'static str = Box::leak("y".repeat(500).into_boxed_str());
        let gateway = FakeGateway::new(Script::Answer(long_answer));

        let err = request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();

        assert_eq!(err, ReviewError::StreamTimeout);
        let content = session.conversation().messages()[1].content.clone();
        assert!(content.ends_with(strings::OUTPUT_TRUNCATED));
        let revealed = content.trim_end_matches(strings::OUTPUT_TRUNCATED).trim_end();
        assert!(!revealed.is_empty());
        assert!(revealed.len() < 500);
        assert!(revealed.chars().all(|c| c == 'y'));
        assert!(!session.is_unchanged());
    }

    #[tokio::test(start_paused = true)]
    async fn provider_error_is_reported() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        let gateway = FakeGateway::new(Script::Fail(GatewayError::Status {
            provider: Provider::OpenAi,
            status: 429,
            body: "rate limited".to_string(),
        }));

        let err = request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::Gateway(GatewayError::Status { status: 429, .. })));
        let log = session.conversation();
        assert_eq!(roles(&session), vec![Role::User, Role::Error]);
        assert_eq!(
            log.messages()[1].content,
            "Provider error: OpenAI error (429): rate limited"
        );
        assert!(!session.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_panic_clears_flag() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        let gateway = FakeGateway::new(Script::Panic);

        let err = request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ReviewError::Gateway(GatewayError::Panicked("gateway exploded".to_string()))
        );
        assert!(!session.is_in_flight());
        let last = session.conversation().last().cloned().unwrap();
        assert_eq!(last.role, Role::Error);
        assert!(last.content.starts_with(strings::PROVIDER_ERROR_PREFIX));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_answer_completes() {
        let mut session = keyed_session();
        session.edit("x").unwrap();
        let gateway = FakeGateway::new(Script::Answer(""));

        request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(session.conversation().messages()[1].content, "");
        assert!(session.is_unchanged());
    }

    #[tokio::test(start_paused = true)]
    async fn each_language_has_its_own_baseline() {
        let mut session = keyed_session();
        let gateway = FakeGateway::new(Script::Answer("ok"));
        session.edit("x").unwrap();
        request_review(&mut session, &gateway, CancellationToken::new(), &mut ())
            .await
            .unwrap();

        session.switch_language(LanguageId::from("css"), false);
        session.edit("x").unwrap();
        assert!(check_eligible(&mut session).is_ok());

        session.switch_language(LanguageId::from("javascript"), false);
        assert_eq!(check_eligible(&mut session), Err(ReviewError::Unchanged));
    }
}
