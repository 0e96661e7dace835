// src/buffer.rs
//! Chunk buffer: accumulates finalized speech fragments for one stream until
//! there is enough text to justify a speaker-attribution call.
//!
//! The labeled-context window kept here only feeds the attribution oracle;
//! the authoritative transcript lives in `SessionState`.

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GuardConfig;
use crate::oracle::DynAttribution;
use crate::transcript::Turn;

pub struct ChunkBuffer {
    pending: String,
    context: Vec<Turn>,
    min_words: usize,
    context_cap: usize,
    context_keep: usize,
    attribution: DynAttribution,
    timeout: Duration,
}

impl ChunkBuffer {
    pub fn new(attribution: DynAttribution, cfg: &GuardConfig) -> Self {
        Self {
            pending: String::new(),
            context: Vec::new(),
            min_words: cfg.buffer.min_words.max(1),
            context_cap: cfg.buffer.context_cap.max(1),
            context_keep: cfg.buffer.context_keep.min(cfg.buffer.context_cap.max(1)),
            attribution,
            timeout: cfg.oracle_timeout(),
        }
    }

    /// Append a finalized fragment. Interim results must not be passed here.
    pub fn add(&mut self, text: &str) {
        let t = text.trim();
        if t.is_empty() {
            return;
        }
        if !self.pending.is_empty() {
            self.pending.push(' ');
        }
        self.pending.push_str(t);
    }

    pub fn pending_words(&self) -> usize {
        self.pending.split_whitespace().count()
    }

    pub fn should_flush(&self) -> bool {
        self.pending_words() >= self.min_words
    }

    pub fn context(&self) -> &[Turn] {
        &self.context
    }

    /// Emit the accumulated text as labeled turns and clear the accumulator.
    ///
    /// Empty accumulator => empty result, nothing touched. If the attribution
    /// oracle fails, times out or returns nothing usable, the whole text is
    /// emitted as a single CALLER turn so no speech is dropped. If this future
    /// is dropped mid-call the accumulator is left intact.
    pub async fn flush(&mut self) -> Vec<Turn> {
        let raw = self.pending.trim();
        if raw.is_empty() {
            return Vec::new();
        }
        let raw = raw.to_string();

        let labeled = match tokio::time::timeout(
            self.timeout,
            self.attribution.label(&raw, &self.context),
        )
        .await
        {
            Ok(Ok(segments)) => segments
                .into_iter()
                .filter(|t| !t.text().trim().is_empty())
                .collect::<Vec<_>>(),
            Ok(Err(e)) => {
                warn!(target: "buffer", error = %format!("{e:#}"), "speaker attribution failed");
                Vec::new()
            }
            Err(_) => {
                warn!(target: "buffer", timeout_ms = self.timeout.as_millis() as u64, "speaker attribution timed out");
                Vec::new()
            }
        };

        let segments = if labeled.is_empty() {
            vec![Turn::caller(raw)]
        } else {
            labeled
        };

        debug!(target: "buffer", segments = segments.len(), "flushed");

        self.context.extend(segments.iter().cloned());
        if self.context.len() > self.context_cap {
            let excess = self.context.len() - self.context_keep;
            self.context.drain(0..excess);
        }
        self.pending.clear();

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SpeakerAttribution;
    use crate::transcript::Speaker;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SpeakerAttribution for Echo {
        async fn label(&self, raw: &str, _recent: &[Turn]) -> anyhow::Result<Vec<Turn>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Turn::user(raw)])
        }
        fn name(&self) -> &'static str {
            "echo"
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl SpeakerAttribution for Broken {
        async fn label(&self, _raw: &str, _recent: &[Turn]) -> anyhow::Result<Vec<Turn>> {
            anyhow::bail!("upstream 502")
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn flush_threshold_counts_whitespace_tokens() {
        let mut b = ChunkBuffer::new(echo(), &GuardConfig::default());
        b.add("hello there");
        assert!(!b.should_flush());
        b.add("   ");
        b.add("it's your grandson");
        assert_eq!(b.pending_words(), 5);
        assert!(b.should_flush());
    }

    #[tokio::test]
    async fn empty_flush_has_no_side_effects() {
        let e = echo();
        let mut b = ChunkBuffer::new(e.clone(), &GuardConfig::default());
        assert!(b.flush().await.is_empty());
        assert_eq!(e.calls.load(Ordering::SeqCst), 0);
        assert!(b.context().is_empty());
    }

    #[tokio::test]
    async fn flush_clears_and_never_re_emits() {
        let e = echo();
        let mut b = ChunkBuffer::new(e.clone(), &GuardConfig::default());
        b.add("one two");
        b.add("three four five");
        let out = b.flush().await;
        assert_eq!(out, vec![Turn::user("one two three four five")]);
        assert_eq!(b.pending_words(), 0);
        assert!(b.flush().await.is_empty());
        assert_eq!(e.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_oracle_keeps_the_text_as_caller_turn() {
        let mut b = ChunkBuffer::new(Arc::new(Broken), &GuardConfig::default());
        b.add("please buy gift cards now");
        let out = b.flush().await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].speaker(), Speaker::Caller);
        assert_eq!(out[0].text(), "please buy gift cards now");
    }

    #[tokio::test]
    async fn context_window_trims_to_keep_when_over_cap() {
        let mut b = ChunkBuffer::new(echo(), &GuardConfig::default());
        for i in 0..51 {
            b.add(&format!("segment {i}"));
            b.flush().await;
        }
        // 51 > 50 => trimmed to the last 30
        assert_eq!(b.context().len(), 30);
        assert_eq!(b.context().last().unwrap().text(), "segment 50");
        assert_eq!(b.context()[0].text(), "segment 21");
    }
}
