//! Per-frame interpretation: fragments, completion signals, and upstream errors.

use serde_json::Value;
use tracing::{debug, trace};

use itinera_shared::{ItineraError, Result};

use crate::anchors;
use crate::frame::RawFrame;
use crate::rules::RuleChain;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Event types the upstream service is known to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `conversation.message.delta`
    MessageDelta,
    /// `conversation.message.completed`
    MessageCompleted,
    /// `message` (also the default when a frame has no `event:` line)
    Message,
    /// Any `conversation.chat.*` status event.
    ChatStatus,
    Error,
    Ping,
    Done,
    /// Anything else; ignored.
    Unknown,
}

impl EventKind {
    pub fn classify(event_type: &str) -> Self {
        match event_type {
            "error" => Self::Error,
            "ping" => Self::Ping,
            "done" => Self::Done,
            "message" => Self::Message,
            t if t.contains("conversation.message.delta") => Self::MessageDelta,
            t if t.contains("conversation.message.completed") => Self::MessageCompleted,
            t if t.contains("conversation.chat") => Self::ChatStatus,
            _ => Self::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Accumulation state for one ingestion call.
///
/// `finished` only ever goes from false to true, and a complete response,
/// once recorded, is never replaced.
#[derive(Debug, Default)]
pub struct StreamState {
    accumulated: String,
    complete: Option<String>,
    answer_deltas: u32,
    finished: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    #[cfg(test)]
    fn complete_response(&self) -> Option<&str> {
        self.complete.as_deref()
    }

    /// Number of answer-type `conversation.message.delta` events seen.
    pub fn answer_deltas(&self) -> u32 {
        self.answer_deltas
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn append(&mut self, fragment: &str) {
        self.accumulated.push_str(fragment);
    }

    fn set_complete(&mut self, text: String) {
        if self.complete.is_none() {
            self.complete = Some(text);
        }
        self.finished = true;
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    /// Split into (complete response, accumulated text).
    pub fn into_parts(self) -> (Option<String>, String) {
        (self.complete, self.accumulated)
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Applies frames to a [`StreamState`].
pub struct Interpreter {
    /// 1-based answer-delta index that carries the whole answer; `None` disables.
    complete_delta: Option<u32>,
    fragment_rules: RuleChain,
    complete_rules: RuleChain,
}

impl Interpreter {
    pub fn new(complete_delta: Option<u32>) -> Self {
        Self {
            complete_delta,
            fragment_rules: RuleChain::answer_fragments(),
            complete_rules: RuleChain::complete_answer(),
        }
    }

    /// Apply one frame.
    ///
    /// Returns [`ItineraError::MalformedFrame`] when the data is not JSON (the
    /// caller may skip it) and [`ItineraError::Protocol`] for upstream errors.
    pub fn interpret(&self, frame: &RawFrame, state: &mut StreamState) -> Result<()> {
        let kind = EventKind::classify(&frame.event_type);

        // Kinds that need no payload.
        match kind {
            EventKind::Ping | EventKind::ChatStatus | EventKind::Unknown => return Ok(()),
            EventKind::Done | EventKind::MessageCompleted => {
                state.finish();
                return Ok(());
            }
            EventKind::Error => return Err(error_event(&frame.data)),
            EventKind::MessageDelta | EventKind::Message => {}
        }

        if frame.data.is_empty() {
            return Ok(());
        }

        let payload: Value = serde_json::from_str(&frame.data).map_err(|e| {
            ItineraError::malformed_frame(format!("{} data is not JSON: {e}", frame.event_type))
        })?;

        if kind == EventKind::MessageDelta && str_at(&payload, &["type"]) == Some("answer") {
            state.answer_deltas += 1;
            if Some(state.answer_deltas) == self.complete_delta {
                match self.complete_answer(&frame.data, &payload) {
                    Some(text) => {
                        debug!(
                            delta = state.answer_deltas,
                            chars = text.chars().count(),
                            "complete answer found in delta"
                        );
                        state.set_complete(text);
                        return Ok(());
                    }
                    None => debug!(delta = state.answer_deltas, "delta carried no complete answer"),
                }
            }
        }

        let subtype = message_subtype(&payload);
        match subtype {
            Some("error") => return Err(upstream_error(&payload)),
            Some("message.delta") | Some("answer") => {
                if let Some(m) = self.fragment_rules.first_match(&payload) {
                    trace!(rule = m.rule, len = m.text.len(), "fragment");
                    state.append(m.text);
                }
            }
            _ => {}
        }

        if subtype == Some("generate_answer_finish")
            || payload.pointer("/message/is_finish").and_then(Value::as_bool) == Some(true)
        {
            state.finish();
        }

        Ok(())
    }

    /// The whole answer from the designated delta: anchored text in the raw
    /// data, then a raw `"content"` field, then structured fields.
    fn complete_answer(&self, raw: &str, payload: &Value) -> Option<String> {
        anchors::find_answer(raw)
            .or_else(|| anchors::find_content_field(raw))
            .or_else(|| {
                self.complete_rules
                    .first_match(payload)
                    .map(|m| m.text.to_string())
            })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn str_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = payload;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str()
}

/// First string among `type`, `message.type`, `msg_type`, `event`.
fn message_subtype(payload: &Value) -> Option<&str> {
    str_at(payload, &["type"])
        .or_else(|| str_at(payload, &["message", "type"]))
        .or_else(|| str_at(payload, &["msg_type"]))
        .or_else(|| str_at(payload, &["event"]))
}

/// Error carried by an `error` event; the data need not be JSON.
fn error_event(data: &str) -> ItineraError {
    match serde_json::from_str::<Value>(data) {
        Ok(payload) if payload.is_object() => upstream_error(&payload),
        _ if data.trim().is_empty() => ItineraError::protocol(None, "upstream reported an error"),
        _ => ItineraError::protocol(None, data.trim()),
    }
}

/// Pull the upstream code/message out of the shapes the service uses.
fn upstream_error(payload: &Value) -> ItineraError {
    const CODE_PATHS: [&str; 4] = [
        "/error_information/err_code",
        "/error/code",
        "/last_error/code",
        "/code",
    ];
    const MESSAGE_PATHS: [&str; 5] = [
        "/error_information/err_msg",
        "/error/message",
        "/last_error/msg",
        "/msg",
        "/message",
    ];

    let code = CODE_PATHS
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    let message = MESSAGE_PATHS
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find_map(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or("upstream reported an error");

    ItineraError::protocol(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> RawFrame {
        RawFrame {
            event_type: event.into(),
            data: data.into(),
        }
    }

    fn delta(content: &str) -> RawFrame {
        let data = serde_json::json!({"type": "answer", "role": "assistant", "content": content});
        frame("conversation.message.delta", &data.to_string())
    }

    const ANSWER: &str = "旅行推荐:西安之旅\n行程规划:详细安排...\n旅行红黑榜:推荐/避坑...";

    #[test]
    fn classify_event_kinds() {
        assert_eq!(EventKind::classify("conversation.message.delta"), EventKind::MessageDelta);
        assert_eq!(
            EventKind::classify("conversation.message.completed"),
            EventKind::MessageCompleted
        );
        assert_eq!(EventKind::classify("conversation.chat.created"), EventKind::ChatStatus);
        assert_eq!(EventKind::classify("message"), EventKind::Message);
        assert_eq!(EventKind::classify("done"), EventKind::Done);
        assert_eq!(EventKind::classify("heartbeat"), EventKind::Unknown);
    }

    #[test]
    fn deltas_accumulate_fragments() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        for piece in ["旅行推荐:", "西安", "\n"] {
            interp.interpret(&delta(piece), &mut state).unwrap();
        }
        assert_eq!(state.accumulated_text(), "旅行推荐:西安\n");
        assert_eq!(state.answer_deltas(), 3);
        assert!(!state.is_finished());
    }

    #[test]
    fn fast_path_fires_on_second_answer_delta_only() {
        let interp = Interpreter::new(Some(2));
        let mut state = StreamState::new();

        interp.interpret(&delta(ANSWER), &mut state).unwrap();
        assert!(state.complete_response().is_none());
        assert!(!state.is_finished());

        interp.interpret(&delta(ANSWER), &mut state).unwrap();
        assert_eq!(state.complete_response(), Some(ANSWER));
        assert!(state.is_finished());
    }

    #[test]
    fn fast_path_does_not_fire_on_third_delta() {
        let interp = Interpreter::new(Some(2));
        let mut state = StreamState::new();
        interp.interpret(&delta("片段一"), &mut state).unwrap();
        // Second delta has no usable text at all.
        let empty = frame(
            "conversation.message.delta",
            r#"{"type":"answer","content":""}"#,
        );
        interp.interpret(&empty, &mut state).unwrap();
        assert!(state.complete_response().is_none());
        interp.interpret(&delta(ANSWER), &mut state).unwrap();
        assert!(state.complete_response().is_none());
        assert!(!state.is_finished());
        assert_eq!(state.answer_deltas(), 3);
    }

    #[test]
    fn non_answer_deltas_do_not_count() {
        let interp = Interpreter::new(Some(2));
        let mut state = StreamState::new();
        let verbose = frame(
            "conversation.message.delta",
            r#"{"type":"verbose","content":"{\"msg_type\":\"x\"}"}"#,
        );
        interp.interpret(&verbose, &mut state).unwrap();
        interp.interpret(&delta(ANSWER), &mut state).unwrap();
        assert_eq!(state.answer_deltas(), 1);
        assert!(state.complete_response().is_none());
        assert_eq!(state.accumulated_text(), ANSWER);
    }

    #[test]
    fn fast_path_falls_back_to_content_field() {
        let interp = Interpreter::new(Some(1));
        let mut state = StreamState::new();
        interp.interpret(&delta("没有分节的完整回答"), &mut state).unwrap();
        assert_eq!(state.complete_response(), Some("没有分节的完整回答"));
    }

    #[test]
    fn fast_path_falls_back_to_object_value() {
        let interp = Interpreter::new(Some(1));
        let mut state = StreamState::new();
        let f = frame(
            "conversation.message.delta",
            r#"{"type":"answer","object":{"value":"结构化回答"}}"#,
        );
        interp.interpret(&f, &mut state).unwrap();
        assert_eq!(state.complete_response(), Some("结构化回答"));
    }

    #[test]
    fn fast_path_ignores_blank_object_value() {
        let interp = Interpreter::new(Some(1));
        let mut state = StreamState::new();
        let f = frame(
            "conversation.message.delta",
            r#"{"type":"answer","object":{"value":"   "}}"#,
        );
        interp.interpret(&f, &mut state).unwrap();
        assert!(state.complete_response().is_none());
        assert!(!state.is_finished());
    }

    #[test]
    fn complete_response_is_never_overwritten() {
        let mut state = StreamState::new();
        state.set_complete("first".into());
        state.set_complete("second".into());
        assert_eq!(state.complete_response(), Some("first"));
    }

    #[test]
    fn message_event_with_nested_answer() {
        let interp = Interpreter::new(Some(2));
        let mut state = StreamState::new();
        let f = frame(
            "message",
            r#"{"event":"message","message":{"role":"assistant","type":"answer","content":"你好"},"is_finish":false}"#,
        );
        interp.interpret(&f, &mut state).unwrap();
        assert_eq!(state.accumulated_text(), "你好");
        assert_eq!(state.answer_deltas(), 0);
    }

    #[test]
    fn nested_is_finish_finishes() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        let f = frame(
            "message",
            r#"{"message":{"type":"answer","content":"尾","is_finish":true}}"#,
        );
        interp.interpret(&f, &mut state).unwrap();
        assert_eq!(state.accumulated_text(), "尾");
        assert!(state.is_finished());
    }

    #[test]
    fn generate_answer_finish_finishes() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        let f = frame("message", r#"{"msg_type":"generate_answer_finish"}"#);
        interp.interpret(&f, &mut state).unwrap();
        assert!(state.is_finished());
        assert_eq!(state.accumulated_text(), "");
    }

    #[test]
    fn completed_and_done_finish_without_payload() {
        let interp = Interpreter::new(None);

        let mut state = StreamState::new();
        interp
            .interpret(&frame("conversation.message.completed", "not json"), &mut state)
            .unwrap();
        assert!(state.is_finished());

        let mut state = StreamState::new();
        interp.interpret(&frame("done", "[DONE]"), &mut state).unwrap();
        assert!(state.is_finished());
    }

    #[test]
    fn ping_and_chat_status_are_ignored() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        interp.interpret(&frame("ping", "{}"), &mut state).unwrap();
        interp
            .interpret(
                &frame("conversation.chat.in_progress", r#"{"content":"ignored"}"#),
                &mut state,
            )
            .unwrap();
        interp.interpret(&frame("mystery", r#"{"content":"x"}"#), &mut state).unwrap();
        assert_eq!(state.accumulated_text(), "");
        assert!(!state.is_finished());
    }

    #[test]
    fn malformed_json_is_recoverable() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        let err = interp
            .interpret(&frame("conversation.message.delta", "{\"type\":"), &mut state)
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn error_event_carries_code_and_message() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        let err = interp
            .interpret(&frame("error", r#"{"code":4011,"msg":"bot not published"}"#), &mut state)
            .unwrap_err();
        match err {
            ItineraError::Protocol { code, message } => {
                assert_eq!(code.as_deref(), Some("4011"));
                assert_eq!(message, "bot not published");
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
    }

    #[test]
    fn error_event_with_plain_text_data() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        let err = interp
            .interpret(&frame("error", "rate limited"), &mut state)
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream error: rate limited");
    }

    #[test]
    fn error_subtype_in_message_fails() {
        let interp = Interpreter::new(None);
        let mut state = StreamState::new();
        let f = frame(
            "message",
            r#"{"event":"error","error_information":{"err_code":700012,"err_msg":"quota exceeded"}}"#,
        );
        let err = interp.interpret(&f, &mut state).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("700012"));
        assert!(err.to_string().contains("quota exceeded"));
    }
}
