//! Dialogue session: conversation history, modes, and exchange mediation.
//!
//! [`DialogueSession`] is the exclusive owner of the conversation history.
//! Turns are immutable once appended; append order is conversation order.
//! Callers serialize [`send_user_turn`](DialogueSession::send_user_turn)
//! invocations (one in flight at a time) so history is never interleaved.
//!
//! The session stays free of audio concerns: after each reply the caller
//! routes the text through sanitize -> chunk -> playback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::exchange::{ExchangeProvider, ExchangeTurn};
use crate::persona::{OPENING_LINE, PERSONA_SCRIPT};
use crate::{DialogueError, DialogueResult};

// ---------------------------------------------------------------------------
// Turns and modes
// ---------------------------------------------------------------------------

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human participant (or a synthetic user-authored instruction).
    User,
    /// The AI assistant.
    Assistant,
}

/// One message in the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who authored the turn.
    pub role: Role,
    /// The turn text.
    pub text: String,
    /// When the turn was appended.
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Dialogue mode. Session-scoped; transitions are explicit in both
/// directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueMode {
    /// Free-form code/conversation analysis.
    #[default]
    Analysis,
    /// Scripted mock interview driven by the persona instruction.
    Interview,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a dialogue session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Initial dialogue mode.
    #[serde(default)]
    pub mode: DialogueMode,

    /// Template for the visible assistant turn appended on exchange
    /// failure. `{error}` expands to the error description.
    #[serde(default = "default_error_template")]
    pub error_template: String,

    /// Persona instruction override. `None` uses the built-in script.
    #[serde(default)]
    pub persona: Option<String>,

    /// Opening line override for interview mode. `None` uses the built-in
    /// line.
    #[serde(default)]
    pub opening_line: Option<String>,
}

fn default_error_template() -> String {
    "Oops! Something went wrong: {error}".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: DialogueMode::default(),
            error_template: default_error_template(),
            persona: None,
            opening_line: None,
        }
    }
}

// ---------------------------------------------------------------------------
// DialogueSession
// ---------------------------------------------------------------------------

/// Owner of the conversation history and mediator of all AI exchanges.
pub struct DialogueSession {
    config: SessionConfig,
    mode: DialogueMode,
    history: Vec<Turn>,
    provider: Arc<dyn ExchangeProvider>,
}

impl DialogueSession {
    /// Create a session backed by the given exchange provider.
    pub fn new(config: SessionConfig, provider: Arc<dyn ExchangeProvider>) -> Self {
        let mode = config.mode;
        Self {
            config,
            mode,
            history: Vec::new(),
            provider,
        }
    }

    /// Current dialogue mode.
    pub fn mode(&self) -> DialogueMode {
        self.mode
    }

    /// The conversation so far, in append order.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// The persona instruction text in effect.
    pub fn persona(&self) -> &str {
        self.config.persona.as_deref().unwrap_or(PERSONA_SCRIPT)
    }

    fn opening_line(&self) -> &str {
        self.config.opening_line.as_deref().unwrap_or(OPENING_LINE)
    }

    /// Enter interview mode.
    ///
    /// Appends the persona instruction as a user turn and the canned
    /// opening line as an assistant turn, then returns the opening line
    /// for the caller to speak. A no-op when already interviewing.
    pub fn start_interview(&mut self) -> String {
        let opening = self.opening_line().to_string();
        if self.mode == DialogueMode::Interview {
            return opening;
        }
        self.mode = DialogueMode::Interview;
        let persona = self.persona().to_string();
        self.history.push(Turn::user(persona));
        self.history.push(Turn::assistant(opening.clone()));
        tracing::info!("interview mode started");
        opening
    }

    /// Leave interview mode and return to free-form analysis.
    pub fn end_interview(&mut self) {
        if self.mode == DialogueMode::Interview {
            self.mode = DialogueMode::Analysis;
            tracing::info!("interview mode ended");
        }
    }

    /// Build the outbound history for the AI collaborator.
    ///
    /// In interview mode the persona instruction is prepended as the first
    /// entry regardless of where it occurs in local history, because the
    /// collaborator always needs to see it first.
    pub fn outbound_history(&self) -> Vec<ExchangeTurn> {
        let mut outbound = Vec::with_capacity(self.history.len() + 1);
        if self.mode == DialogueMode::Interview {
            outbound.push(ExchangeTurn::user(self.persona()));
        }
        outbound.extend(self.history.iter().map(|turn| match turn.role {
            Role::User => ExchangeTurn::user(&turn.text),
            Role::Assistant => ExchangeTurn::model(&turn.text),
        }));
        outbound
    }

    /// Send one user turn through the AI collaborator.
    ///
    /// Blank input is rejected without appending a turn or making a call.
    /// On exchange failure the configured error template is rendered,
    /// appended as a visible assistant turn, and returned as the reply:
    /// failures are recovered locally, never thrown to the UI layer.
    ///
    /// Callers must keep at most one call in flight and route the returned
    /// reply text into the speech pipeline.
    pub async fn send_user_turn(&mut self, text: &str) -> DialogueResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DialogueError::EmptyInput);
        }

        self.history.push(Turn::user(text));
        self.run_exchange(text).await
    }

    /// Send the original editor's code-analysis turn.
    ///
    /// Wraps the code and optional test-case input in a user turn, then
    /// asks the collaborator to analyze it. Follows the same recovery
    /// rules as [`send_user_turn`](DialogueSession::send_user_turn).
    pub async fn analyze_code(
        &mut self,
        code: &str,
        test_input: Option<&str>,
    ) -> DialogueResult<String> {
        if code.trim().is_empty() {
            return Err(DialogueError::EmptyInput);
        }

        let turn_text = format!(
            "Please analyze my code:\n\n{code}\n\nTest Case Input:\n{}",
            test_input.filter(|s| !s.trim().is_empty()).unwrap_or("None")
        );
        self.history.push(Turn::user(turn_text));
        self.run_exchange("Analyze the above code and test cases.").await
    }

    /// Run one exchange for the already-appended user turn and record the
    /// reply (or the recovered error description) as an assistant turn.
    async fn run_exchange(&mut self, input: &str) -> DialogueResult<String> {
        let outbound = self.outbound_history();

        match self.provider.exchange(&outbound, input).await {
            Ok(reply) => {
                self.history.push(Turn::assistant(reply.clone()));
                Ok(reply)
            }
            Err(error) => {
                tracing::warn!(error = %error, "exchange failed; recording visible error turn");
                let visible = self
                    .config
                    .error_template
                    .replace("{error}", &error.to_string());
                self.history.push(Turn::assistant(visible.clone()));
                Ok(visible)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeRole;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Mock exchange provider with scripted replies and call recording.
    struct MockExchange {
        reply: Result<String, String>,
        calls: Mutex<Vec<(Vec<ExchangeTurn>, String)>>,
    }

    impl MockExchange {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Vec<ExchangeTurn>, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeProvider for MockExchange {
        async fn exchange(
            &self,
            history: &[ExchangeTurn],
            input: &str,
        ) -> DialogueResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push((history.to_vec(), input.to_string()));
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(message) => Err(DialogueError::ExchangeError(message.clone())),
            }
        }
    }

    fn session(provider: Arc<MockExchange>) -> DialogueSession {
        DialogueSession::new(SessionConfig::default(), provider)
    }

    // -- send_user_turn --

    #[tokio::test]
    async fn successful_exchange_appends_both_turns() {
        let provider = MockExchange::replying("A heap is a tree-shaped structure.");
        let mut session = session(provider.clone());

        let reply = session.send_user_turn("What is a heap?").await.unwrap();
        assert_eq!(reply, "A heap is a tree-shaped structure.");

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, "What is a heap?");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].text, reply);
    }

    #[tokio::test]
    async fn blank_input_appends_nothing_and_makes_no_call() {
        let provider = MockExchange::replying("unused");
        let mut session = session(provider.clone());

        for blank in ["", "   ", "\n\t"] {
            let result = session.send_user_turn(blank).await;
            assert!(matches!(result, Err(DialogueError::EmptyInput)));
        }

        assert!(session.history().is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn exchange_failure_becomes_visible_assistant_turn() {
        let provider = MockExchange::failing("connection reset");
        let mut session = session(provider);

        let reply = session.send_user_turn("hello?").await.unwrap();
        assert!(reply.starts_with("Oops! Something went wrong:"));
        assert!(reply.contains("connection reset"));

        // The failure is in the transcript, and the conversation continues.
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].text, reply);
    }

    #[tokio::test]
    async fn custom_error_template_is_rendered() {
        let provider = MockExchange::failing("quota exhausted");
        let config = SessionConfig {
            error_template: "The assistant hit a snag ({error}). Try again.".into(),
            ..SessionConfig::default()
        };
        let mut session = DialogueSession::new(config, provider);

        let reply = session.send_user_turn("hi").await.unwrap();
        assert!(reply.starts_with("The assistant hit a snag"));
        assert!(reply.contains("quota exhausted"));
    }

    #[tokio::test]
    async fn turns_append_in_conversation_order() {
        let provider = MockExchange::replying("ok");
        let mut session = session(provider);

        session.send_user_turn("first").await.unwrap();
        session.send_user_turn("second").await.unwrap();

        let texts: Vec<&str> = session.history().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "ok", "second", "ok"]);
        for pair in session.history().windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    // -- Modes --

    #[tokio::test]
    async fn start_interview_appends_persona_and_opening() {
        let provider = MockExchange::replying("ok");
        let mut session = session(provider);

        let opening = session.start_interview();
        assert_eq!(session.mode(), DialogueMode::Interview);
        assert!(opening.contains("coding preparation"));

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, session.persona());
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].text, opening);
    }

    #[tokio::test]
    async fn start_interview_twice_is_a_noop() {
        let provider = MockExchange::replying("ok");
        let mut session = session(provider);

        session.start_interview();
        let len = session.history().len();
        session.start_interview();
        assert_eq!(session.history().len(), len);
    }

    #[tokio::test]
    async fn interview_outbound_history_leads_with_persona() {
        let provider = MockExchange::replying("Tell me about arrays.");
        let mut session = session(provider.clone());

        session.start_interview();
        session.send_user_turn("I want to practice DSA.").await.unwrap();
        session.send_user_turn("Arrays please.").await.unwrap();

        // Regardless of how many turns exist locally, every outbound list
        // starts with the persona instruction as a user entry.
        for (history, _input) in provider.calls() {
            let first = &history[0];
            assert_eq!(first.role, ExchangeRole::User);
            assert_eq!(first.text, session.persona());
        }
    }

    #[tokio::test]
    async fn analysis_outbound_history_starts_with_user_turn() {
        let provider = MockExchange::replying("ok");
        let mut session = session(provider.clone());

        session.send_user_turn("analyze this").await.unwrap();

        let calls = provider.calls();
        let (history, input) = &calls[0];
        assert_eq!(history[0].role, ExchangeRole::User);
        assert_eq!(input, "analyze this");
    }

    #[tokio::test]
    async fn end_interview_returns_to_analysis() {
        let provider = MockExchange::replying("ok");
        let mut session = session(provider.clone());

        session.start_interview();
        session.end_interview();
        assert_eq!(session.mode(), DialogueMode::Analysis);

        // The persona is no longer prepended once back in analysis mode.
        session.send_user_turn("plain question").await.unwrap();
        let calls = provider.calls();
        let (history, _) = calls.last().unwrap();
        // Local history still contains the persona turn from the interview,
        // but nothing extra is prepended. The outbound list was built before
        // the reply turn was appended.
        assert_eq!(history.len(), session.history().len() - 1);
        assert_eq!(history[0].text, session.persona());
    }

    // -- Code analysis --

    #[tokio::test]
    async fn analyze_code_builds_analysis_turn() {
        let provider = MockExchange::replying("Looks fine.");
        let mut session = session(provider.clone());

        session
            .analyze_code("print(42)", Some("n = 3"))
            .await
            .unwrap();

        let calls = provider.calls();
        let (history, input) = &calls[0];
        assert!(history[0].text.starts_with("Please analyze my code:"));
        assert!(history[0].text.contains("print(42)"));
        assert!(history[0].text.contains("n = 3"));
        assert_eq!(input, "Analyze the above code and test cases.");
    }

    #[tokio::test]
    async fn analyze_code_without_input_says_none() {
        let provider = MockExchange::replying("ok");
        let mut session = session(provider.clone());

        session.analyze_code("fn main() {}", None).await.unwrap();

        let calls = provider.calls();
        assert!(calls[0].0[0].text.ends_with("Test Case Input:\nNone"));
    }

    #[tokio::test]
    async fn analyze_code_rejects_empty_code() {
        let provider = MockExchange::replying("unused");
        let mut session = session(provider.clone());

        let result = session.analyze_code("  ", None).await;
        assert!(matches!(result, Err(DialogueError::EmptyInput)));
        assert!(provider.calls().is_empty());
    }

    // -- Config --

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.mode, DialogueMode::Analysis);
        assert_eq!(config.error_template, "Oops! Something went wrong: {error}");
        assert!(config.persona.is_none());
        assert!(config.opening_line.is_none());
    }

    #[test]
    fn session_config_deserialize_defaults() {
        let config: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.mode, DialogueMode::Analysis);
        assert!(config.error_template.contains("{error}"));
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let turn = Turn {
            role: Role::Assistant,
            text: "hello".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
    }
}
