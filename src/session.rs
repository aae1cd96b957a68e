//! Session state and the blocking dispatch loop.
//!
//! One session per process: a system prompt plus ordered chat history, owned
//! by the loop and mutated only by the handlers it calls. The loop is
//! single-threaded and fully blocking — one request is in flight at a time,
//! so a long generation delays `status`/`reset` until it completes.
//!
//! The loop is generic over its reader and writers so tests drive it with
//! in-memory buffers instead of real pipes.

use crate::engine::InferenceEngine;
use crate::log_debug;
use crate::protocol::{parse_max_new_tokens, Request, StderrMessage};
use crate::stream::{CaptureSink, FramingSink, TeeSink};
use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

// ============================================================================
// Chat messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation entry. Ordering is significant; entries are immutable
/// once appended to the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lives for the process lifetime. History grows by a (user, assistant) pair
/// per successful chat turn; `reset` clears history but keeps the system
/// prompt. `processing` is true only inside a chat turn.
#[derive(Debug, Default)]
pub struct SessionState {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub processing: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full message list for one chat turn:
    /// `[system if non-empty] ++ history ++ [new user message]`.
    fn build_messages(&self, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::new(Role::System, self.system_prompt.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::new(Role::User, prompt));
        messages
    }
}

// ============================================================================
// Stderr emission
// ============================================================================

/// Write one structured message line and flush. Emission failures are
/// swallowed: stderr going away must not take the session down mid-turn.
pub fn emit<W: Write>(err: &mut W, msg: &StderrMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = writeln!(err, "{json}");
        let _ = err.flush();
    }
}

// ============================================================================
// Request handlers
// ============================================================================

fn handle_chat<O: Write, E: Write>(
    state: &mut SessionState,
    engine: &mut dyn InferenceEngine,
    stdout: &mut O,
    stderr: &mut E,
    prompt: &str,
    max_new_tokens: Option<&str>,
    stream_end_grace: Duration,
) -> Result<()> {
    state.processing = true;
    let max_new_tokens = max_new_tokens.and_then(parse_max_new_tokens);
    let messages = state.build_messages(prompt);

    let mut framing = FramingSink::new(&mut *stdout);
    let mut capture = CaptureSink::new();
    let generation = {
        let mut tee = TeeSink::new(&mut framing, &mut capture);
        engine.respond(&messages, &mut tee, max_new_tokens)
    };

    framing.flush().context("flush stdout stream")?;
    if !stream_end_grace.is_zero() {
        // Escape hatch for engines that return before their last write.
        thread::sleep(stream_end_grace);
    }
    framing.end_stream().context("close stdout stream")?;

    let full_response = capture.into_string();
    match generation {
        Ok(()) => {
            state
                .history
                .push(ChatMessage::new(Role::User, prompt.to_string()));
            state
                .history
                .push(ChatMessage::new(Role::Assistant, full_response.clone()));
            emit(stderr, &StderrMessage::status("success", "流式输出完成"));
            emit(
                stderr,
                &StderrMessage::response("完整响应已生成", &full_response),
            );
        }
        Err(e) => {
            // Failed turns are not recorded; the client may simply retry.
            log_debug(&format!("generation failed: {e:#}"));
            emit(stderr, &StderrMessage::error(&format!("生成响应失败: {e}")));
        }
    }
    state.processing = false;
    Ok(())
}

fn handle_system_prompt<E: Write>(state: &mut SessionState, stderr: &mut E, content: &str) {
    if content.is_empty() {
        emit(stderr, &StderrMessage::error("系统提示词内容为空"));
    } else {
        state.system_prompt = content.to_string();
        emit(stderr, &StderrMessage::success("系统提示词设置成功"));
    }
}

fn handle_reset<E: Write>(
    state: &mut SessionState,
    engine: &mut dyn InferenceEngine,
    stderr: &mut E,
) {
    state.history.clear();
    engine.reset();
    emit(
        stderr,
        &StderrMessage::success("模型已重置，对话历史已清空，系统提示词保留"),
    );
}

fn handle_status<E: Write>(
    state: &SessionState,
    engine: &dyn InferenceEngine,
    stderr: &mut E,
) {
    let status = if state.processing { "processing" } else { "idle" };
    let counters = engine.status();
    let info = format!(
        "status:{status},prompt_len:{},gen_seq_len:{},chat_history_count:{}",
        counters.prompt_len,
        counters.gen_seq_len,
        state.history.len()
    );
    emit(stderr, &StderrMessage::status("info", &info));
}

// ============================================================================
// Dispatch loop
// ============================================================================

/// Blocking dispatch loop: one request per stdin line until `exit` or EOF.
/// Blank lines are skipped; undecodable lines are answered with an `error`
/// message and the loop keeps running.
pub fn run_loop<R, O, E>(
    input: &mut R,
    stdout: &mut O,
    stderr: &mut E,
    engine: &mut dyn InferenceEngine,
    state: &mut SessionState,
    stream_end_grace: Duration,
) -> Result<()>
where
    R: BufRead,
    O: Write,
    E: Write,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = input.read_line(&mut line).context("read request line")?;
        if read == 0 {
            log_debug("stdin closed, leaving dispatch loop");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(trimmed) {
            Ok(Request::Chat {
                prompt,
                max_new_tokens,
                ..
            }) => {
                handle_chat(
                    state,
                    engine,
                    stdout,
                    stderr,
                    &prompt,
                    max_new_tokens.as_deref(),
                    stream_end_grace,
                )?;
            }
            Ok(Request::SystemPrompt { content, .. }) => {
                handle_system_prompt(state, stderr, &content);
            }
            Ok(Request::Reset { .. }) => {
                handle_reset(state, engine, stderr);
            }
            Ok(Request::Status { .. }) => {
                handle_status(state, engine, stderr);
            }
            Ok(Request::Exit) => {
                log_debug("exit requested");
                break;
            }
            Err(e) => {
                emit(stderr, &StderrMessage::error(&format!("无法解析请求: {e}")));
            }
        }
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
