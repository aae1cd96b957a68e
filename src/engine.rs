//! Inference engine seam.
//!
//! The protocol layer owns exactly one engine for its whole lifetime and
//! drives it through [`InferenceEngine`]. Model loading, tokenization and
//! sampling live behind this trait; a real runtime implements it and
//! registers a backend name in [`load_engine`].
//!
//! `respond` is a synchronous contract: it must return only after every
//! generated byte has been written to the sink, because the caller closes the
//! stream frame immediately afterwards.

use crate::session::{ChatMessage, Role};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Engine-side generation counters reported by `status` requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatus {
    /// Length of the last encoded prompt.
    pub prompt_len: usize,
    /// Length of the last generated sequence.
    pub gen_seq_len: usize,
}

pub trait InferenceEngine: std::fmt::Debug {
    /// Generate a reply for `messages`, streaming every byte into `sink`.
    /// Must not return before all output has reached the sink.
    fn respond(
        &mut self,
        messages: &[ChatMessage],
        sink: &mut dyn Write,
        max_new_tokens: Option<i64>,
    ) -> Result<()>;

    /// Drop internal generation state (KV cache etc.). Session history is the
    /// caller's business.
    fn reset(&mut self);

    fn status(&self) -> EngineStatus;
}

// ============================================================================
// Engine loading
// ============================================================================

/// Engine config file: a small JSON object selecting a backend. Backend
/// implementations read their own settings from the same file; unknown keys
/// are ignored here.
#[derive(Debug, Deserialize)]
struct EngineConfig {
    backend: String,
}

/// Construct the engine named by the config file. Failure here is fatal for
/// the process: the dispatch loop never starts without an engine.
pub fn load_engine(config_path: &Path) -> Result<Box<dyn InferenceEngine>> {
    let raw = fs::read_to_string(config_path)
        .with_context(|| format!("read engine config {}", config_path.display()))?;
    let config: EngineConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parse engine config {}", config_path.display()))?;

    match config.backend.as_str() {
        "loopback" => Ok(Box::new(LoopbackEngine::default())),
        other => bail!("unsupported engine backend: {other}"),
    }
}

// ============================================================================
// Loopback backend
// ============================================================================

/// Built-in model-free backend: replies with the latest user message, capped
/// at `max_new_tokens` characters. Exists so the protocol layer can be
/// exercised end-to-end (wiring tests, client demos) without a model runtime.
#[derive(Debug, Default)]
pub struct LoopbackEngine {
    prompt_len: usize,
    gen_seq_len: usize,
}

impl InferenceEngine for LoopbackEngine {
    fn respond(
        &mut self,
        messages: &[ChatMessage],
        sink: &mut dyn Write,
        max_new_tokens: Option<i64>,
    ) -> Result<()> {
        self.prompt_len = messages.iter().map(|m| m.content.chars().count()).sum();
        self.gen_seq_len = 0;

        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let cap = match max_new_tokens {
            Some(n) if n >= 0 => n as usize,
            _ => usize::MAX,
        };

        // One write per character, mimicking token-at-a-time streaming.
        let mut utf8 = [0u8; 4];
        for c in reply.chars().take(cap) {
            sink.write_all(c.encode_utf8(&mut utf8).as_bytes())
                .context("write generated text")?;
            self.gen_seq_len += 1;
        }
        sink.flush().context("flush generated text")?;
        Ok(())
    }

    fn reset(&mut self) {
        self.prompt_len = 0;
        self.gen_seq_len = 0;
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            prompt_len: self.prompt_len,
            gen_seq_len: self.gen_seq_len,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
