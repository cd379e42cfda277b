//! Incremental reveal of a finished answer
//!
//! The provider returns the whole answer at once; this state machine plays
//! it back a few characters per tick so it reads as if it were streaming.
//! It owns no timer. Whoever drives it passes the current instant to
//! `tick`, which keeps it deterministic under test.
//!
//! ```text
//! Idle ──begin──▶ Loading ──deliver──▶ Revealing ──▶ Completed
//!                   │  │                   │  │
//!                   │  └──fail──▶ Failed   │  └──timeout──▶ Truncated
//!                   └──timeout──▶ Truncated└──cancel────▶ Cancelled
//! ```
//!
//! Terminal states ignore every further input.

use crate::config::Settings;
use std::time::{Duration, Instant};

/// Frames cycled while waiting for the provider
pub const PLACEHOLDER_FRAMES: [&str; 4] = ["Thinking", "Thinking.", "Thinking..", "Thinking..."];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealConfig {
    pub chars_per_second: u32,
    pub tick: Duration,
    /// Longest either the loading or the revealing phase may last
    pub max_phase: Duration,
}

impl RevealConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chars_per_second: settings.stream_char_rate,
            tick: settings.reveal_tick(),
            max_phase: settings.max_stream(),
        }
    }

    /// Characters exposed per tick, never zero.
    pub fn step(&self) -> usize {
        let per_tick = u128::from(self.chars_per_second) * self.tick.as_millis() / 1000;
        usize::try_from(per_tick).unwrap_or(usize::MAX).max(1)
    }
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealPhase {
    Idle,
    Loading,
    Revealing,
    Completed,
    Truncated,
    Cancelled,
    Failed,
}

impl RevealPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RevealPhase::Completed
                | RevealPhase::Truncated
                | RevealPhase::Cancelled
                | RevealPhase::Failed
        )
    }
}

/// What a `tick` changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Idle or terminal; nothing happened
    Ignored,
    /// Loading placeholder advanced to this frame
    Placeholder(&'static str),
    /// The visible prefix grew
    Progress,
    Completed,
    Truncated,
}

#[derive(Debug, Clone)]
pub struct Reveal {
    config: RevealConfig,
    phase: RevealPhase,
    phase_started: Option<Instant>,
    frame: usize,
    target: String,
    /// Byte offset of the visible prefix, always on a char boundary
    shown: usize,
    failure: Option<String>,
}

impl Reveal {
    pub fn new(config: RevealConfig) -> Self {
        Self {
            config,
            phase: RevealPhase::Idle,
            phase_started: None,
            frame: 0,
            target: String::new(),
            shown: 0,
            failure: None,
        }
    }

    pub fn phase(&self) -> RevealPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Visible part of the answer
    pub fn visible(&self) -> &str {
        &self.target[..self.shown]
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn placeholder(&self) -> Option<&'static str> {
        (self.phase == RevealPhase::Loading)
            .then(|| PLACEHOLDER_FRAMES[self.frame % PLACEHOLDER_FRAMES.len()])
    }

    /// Idle → Loading. Returns the first placeholder frame.
    pub fn begin(&mut self, now: Instant) -> Option<&'static str> {
        if self.phase != RevealPhase::Idle {
            return None;
        }
        self.enter(RevealPhase::Loading, now);
        self.frame = 0;
        self.placeholder()
    }

    /// Loading → Revealing with the full answer. An empty answer completes
    /// straight away.
    pub fn deliver(&mut self, text: impl Into<String>, now: Instant) -> bool {
        if self.phase != RevealPhase::Loading {
            return false;
        }
        self.target = text.into();
        self.shown = 0;
        if self.target.is_empty() {
            self.enter(RevealPhase::Completed, now);
        } else {
            self.enter(RevealPhase::Revealing, now);
        }
        true
    }

    /// Loading → Failed
    pub fn fail(&mut self, detail: impl Into<String>, now: Instant) -> bool {
        if self.phase != RevealPhase::Loading {
            return false;
        }
        self.failure = Some(detail.into());
        self.enter(RevealPhase::Failed, now);
        true
    }

    /// Any non-terminal phase → Cancelled. The visible prefix stays as is.
    pub fn cancel(&mut self, now: Instant) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.enter(RevealPhase::Cancelled, now);
        true
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        match self.phase {
            RevealPhase::Loading | RevealPhase::Revealing if self.timed_out(now) => {
                self.enter(RevealPhase::Truncated, now);
                TickOutcome::Truncated
            }
            RevealPhase::Loading => {
                self.frame = (self.frame + 1) % PLACEHOLDER_FRAMES.len();
                TickOutcome::Placeholder(PLACEHOLDER_FRAMES[self.frame])
            }
            RevealPhase::Revealing => {
                self.shown = advance_chars(&self.target, self.shown, self.config.step());
                if self.shown == self.target.len() {
                    self.enter(RevealPhase::Completed, now);
                    TickOutcome::Completed
                } else {
                    TickOutcome::Progress
                }
            }
            _ => TickOutcome::Ignored,
        }
    }

    fn timed_out(&self, now: Instant) -> bool {
        self.phase_started
            .is_some_and(|start| now.saturating_duration_since(start) > self.config.max_phase)
    }

    fn enter(&mut self, phase: RevealPhase, now: Instant) {
        tracing::debug!(from = ?self.phase, to = ?phase, "reveal transition");
        self.phase = phase;
        self.phase_started = Some(now);
    }
}

/// Byte offset `count` characters past `from`, clamped to the end.
fn advance_chars(text: &str, from: usize, count: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(count)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cps: u32, tick_ms: u64, max_ms: u64) -> RevealConfig {
        RevealConfig {
            chars_per_second: cps,
            tick: Duration::from_millis(tick_ms),
            max_phase: Duration::from_millis(max_ms),
        }
    }

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn step_size_from_rate_and_tick() {
        assert_eq!(config(50, 100, 1000).step(), 5);
        assert_eq!(config(5, 100, 1000).step(), 1);
        assert_eq!(config(0, 100, 1000).step(), 1);
        assert_eq!(config(1000, 250, 1000).step(), 250);
        assert_eq!(RevealConfig::default().step(), 5);
    }

    #[test]
    fn loading_cycles_placeholder_frames() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(config(50, 100, 60_000));
        assert_eq!(reveal.begin(t0), Some("Thinking"));
        assert_eq!(reveal.tick(ms(t0, 250)), TickOutcome::Placeholder("Thinking."));
        assert_eq!(reveal.tick(ms(t0, 500)), TickOutcome::Placeholder("Thinking.."));
        assert_eq!(reveal.tick(ms(t0, 750)), TickOutcome::Placeholder("Thinking..."));
        assert_eq!(reveal.tick(ms(t0, 1000)), TickOutcome::Placeholder("Thinking"));
        assert_eq!(reveal.placeholder(), Some("Thinking"));
    }

    #[test]
    fn reveals_whole_answer_in_steps() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(config(50, 100, 60_000));
        reveal.begin(t0);
        assert!(reveal.deliver("Hello, world!", t0));
        assert_eq!(reveal.phase(), RevealPhase::Revealing);
        assert_eq!(reveal.visible(), "");

        assert_eq!(reveal.tick(ms(t0, 100)), TickOutcome::Progress);
        assert_eq!(reveal.visible(), "Hello");
        assert_eq!(reveal.tick(ms(t0, 200)), TickOutcome::Progress);
        assert_eq!(reveal.visible(), "Hello, wor");
        assert_eq!(reveal.tick(ms(t0, 300)), TickOutcome::Completed);
        assert_eq!(reveal.visible(), "Hello, world!");
        assert!(reveal.is_finished());
    }

    #[test]
    fn never_splits_a_character() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(config(20, 100, 60_000));
        reveal.begin(t0);
        reveal.deliver("héllo wörld 🦀!", t0);

        let mut prev = 0;
        let mut at = 0;
        while !reveal.is_finished() {
            at += 100;
            reveal.tick(ms(t0, at));
            let visible = reveal.visible().chars().count();
            assert!(visible == prev + 2 || reveal.is_finished());
            prev = visible;
        }
        assert_eq!(reveal.visible(), "héllo wörld 🦀!");
    }

    #[test]
    fn empty_answer_completes_on_delivery() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(RevealConfig::default());
        reveal.begin(t0);
        reveal.deliver("", t0);
        assert_eq!(reveal.phase(), RevealPhase::Completed);
        assert_eq!(reveal.tick(ms(t0, 100)), TickOutcome::Ignored);
    }

    #[test]
    fn cancel_mid_reveal_freezes_prefix() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(config(50, 100, 60_000));
        reveal.begin(t0);
        reveal.deliver("abcdefghijklmnopqrstuvwxyz", t0);
        reveal.tick(ms(t0, 100));
        reveal.tick(ms(t0, 200));
        let frozen = reveal.visible().to_string();

        assert!(reveal.cancel(ms(t0, 250)));
        assert_eq!(reveal.phase(), RevealPhase::Cancelled);
        for i in 3..20 {
            assert_eq!(reveal.tick(ms(t0, i * 100)), TickOutcome::Ignored);
        }
        assert_eq!(reveal.visible(), frozen);
        assert!(!reveal.cancel(ms(t0, 5000)));
    }

    #[test]
    fn slow_reveal_truncates() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(config(10, 100, 300));
        reveal.begin(t0);
        reveal.deliver("x".repeat(100), ms(t0, 1000));

        // Phase clock restarts on delivery
        assert_eq!(reveal.tick(ms(t0, 1100)), TickOutcome::Progress);
        assert_eq!(reveal.tick(ms(t0, 1200)), TickOutcome::Progress);
        assert_eq!(reveal.tick(ms(t0, 1300)), TickOutcome::Progress);
        assert_eq!(reveal.tick(ms(t0, 1400)), TickOutcome::Truncated);
        assert_eq!(reveal.visible().len(), 3);
        assert_eq!(reveal.tick(ms(t0, 1500)), TickOutcome::Ignored);
    }

    #[test]
    fn slow_provider_truncates_in_loading() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(config(50, 100, 500));
        reveal.begin(t0);
        assert!(matches!(reveal.tick(ms(t0, 500)), TickOutcome::Placeholder(_)));
        assert_eq!(reveal.tick(ms(t0, 501)), TickOutcome::Truncated);
        assert!(!reveal.deliver("late", ms(t0, 600)));
        assert_eq!(reveal.visible(), "");
    }

    #[test]
    fn failure_only_from_loading() {
        let t0 = Instant::now();
        let mut reveal = Reveal::new(RevealConfig::default());
        assert!(!reveal.fail("early", t0));
        reveal.begin(t0);
        assert!(reveal.fail("boom", t0));
        assert_eq!(reveal.phase(), RevealPhase::Failed);
        assert_eq!(reveal.failure(), Some("boom"));
        assert!(!reveal.cancel(t0));
        assert!(reveal.begin(t0).is_none());
    }

    #[test]
    fn idle_ignores_ticks() {
        let mut reveal = Reveal::new(RevealConfig::default());
        assert_eq!(reveal.tick(Instant::now()), TickOutcome::Ignored);
        assert_eq!(reveal.phase(), RevealPhase::Idle);
        assert!(reveal.placeholder().is_none());
    }
}
