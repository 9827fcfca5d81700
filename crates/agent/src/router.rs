use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keystone_modules::CommandDispatcher;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::pipeline::AgentPipeline;
use crate::recall::{normalize_key, RecallStore};

static RX_DO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:do|please|execute)\s+(.+)$").unwrap());
static RX_YES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(?:yes|approve|confirm)\s*$").unwrap());
static RX_NO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(?:no|deny|cancel)\s*$").unwrap());
static RX_RECALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:recall|get)\s+(.+)$").unwrap());
static RX_REMEMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^remember\s+(.+?)(?:\s+is\s+|\s*=\s*)(.+)$").unwrap());
static RX_ASSIGN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s*=\s*(.+)$").unwrap());
static RX_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(?:status|help)\s*$").unwrap());

const LAST_OUTCOME: &str = "lastoutcome";

/// What a line of conversation asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Submit(String),
    Resolve(bool),
    Remember(String, String),
    Recall(String),
    Consent(String),
    Status,
}

/// Classify one line. Anything unrecognized goes to the pipeline.
pub fn route(text: &str) -> Route {
    let text = text.trim();
    if let Some(caps) = RX_DO.captures(text) {
        return Route::Submit(caps[1].trim().to_string());
    }
    if RX_YES.is_match(text) {
        return Route::Resolve(true);
    }
    if RX_NO.is_match(text) {
        return Route::Resolve(false);
    }
    if let Some(caps) = RX_RECALL.captures(text) {
        return Route::Recall(normalize_key(&caps[1]));
    }
    if text.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("consent")) {
        return Route::Consent(text.to_string());
    }
    if RX_STATUS.is_match(text) {
        return Route::Status;
    }
    if let Some(caps) = RX_REMEMBER.captures(text).or_else(|| RX_ASSIGN.captures(text)) {
        return Route::Remember(normalize_key(&caps[1]), caps[2].trim().to_string());
    }
    Route::Submit(text.to_string())
}

/// Front door for chat-style hosts: one pipeline per session, plus the
/// remember/recall and consent side channels.
pub struct ConversationRouter {
    dispatcher: CommandDispatcher,
    recall: Arc<dyn RecallStore>,
    confirm_ttl: chrono::Duration,
    remember_outcomes: bool,
    sessions: Mutex<HashMap<String, Arc<AgentPipeline>>>,
}

impl ConversationRouter {
    pub fn new(dispatcher: CommandDispatcher, recall: Arc<dyn RecallStore>, confirm_ttl: chrono::Duration) -> Self {
        Self {
            dispatcher,
            recall,
            confirm_ttl,
            remember_outcomes: true,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn remember_outcomes(mut self, enabled: bool) -> Self {
        self.remember_outcomes = enabled;
        self
    }

    /// The pipeline for a session, created on first use.
    pub fn pipeline(&self, session: &str) -> Arc<AgentPipeline> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session.to_string())
            .or_insert_with(|| {
                debug!(session_key = %session, "New conversation pipeline");
                let mut pipeline =
                    AgentPipeline::new(self.dispatcher.clone(), self.confirm_ttl).with_session(session);
                if self.remember_outcomes {
                    pipeline = pipeline.with_recall(self.recall.clone());
                }
                Arc::new(pipeline)
            })
            .clone()
    }

    pub fn sessions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Drop a session's pipeline. Anything pending in it is discarded.
    pub fn end_session(&self, session: &str) -> bool {
        let removed = self.sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(session);
        if let Some(pipeline) = &removed {
            debug!(session_key = %session, pending = pipeline.pending().is_some(), "Conversation ended");
        }
        removed.is_some()
    }

    /// Clear expired confirmations in every session, then evict sessions
    /// that have nothing pending and are not in use. Returns how many
    /// confirmations expired.
    pub fn sweep_all(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let swept = sessions.values().filter(|p| p.sweep()).count();
        let before = sessions.len();
        sessions.retain(|_, p| Arc::strong_count(p) > 1 || p.pending().is_some());
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Idle conversations evicted");
        }
        swept
    }

    pub async fn handle(&self, session: &str, text: &str) -> String {
        let pipeline = self.pipeline(session);
        match route(text) {
            Route::Submit(utterance) => pipeline.submit(&utterance).await.text,
            Route::Resolve(approve) => pipeline.resolve(approve).await.text,
            Route::Recall(key) => {
                let lookup = if key == LAST_OUTCOME { pipeline.outcome_key() } else { key.clone() };
                self.recall
                    .recall(&lookup)
                    .unwrap_or_else(|| format!("No value found for key: {}", key))
            }
            Route::Remember(key, value) => match self.recall.remember(&key, &value) {
                Ok(()) => format!("Remembered {} = {}", key, value),
                Err(e) => {
                    warn!(session_key = %session, error = %e, "Remember failed");
                    format!("(could not remember: {})", e)
                }
            },
            Route::Consent(command) => self
                .dispatcher
                .invoke("Consent", &command)
                .await
                .unwrap_or_else(|| "(consent module unavailable)".to_string()),
            Route::Status => self.status(&pipeline),
        }
    }

    fn status(&self, pipeline: &AgentPipeline) -> String {
        let mut lines = Vec::new();
        match pipeline.pending() {
            Some(action) => lines.push(format!(
                "Pending: {} (reason: {}, expires {})",
                action.plan.goal,
                action.reason,
                action.expires_at.format("%H:%M:%S")
            )),
            None => lines.push("Pending: none".to_string()),
        }
        lines.push(format!("Modules: {}", self.dispatcher.registry().names().join(", ")));
        lines.push(
            "Commands: do <request>, yes/no, remember <key> is <value>, recall <key>, consent help".to_string(),
        );
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        assert_eq!(route("do turn off the lights"), Route::Submit("turn off the lights".into()));
        assert_eq!(route("Yes"), Route::Resolve(true));
        assert_eq!(route(" cancel "), Route::Resolve(false));
        assert_eq!(route("recall Favorite Color"), Route::Recall("favoritecolor".into()));
        assert_eq!(
            route("remember favorite color is blue"),
            Route::Remember("favoritecolor".into(), "blue".into())
        );
        assert_eq!(route("volume = 11"), Route::Remember("volume".into(), "11".into()));
        assert_eq!(route("consent list"), Route::Consent("consent list".into()));
        assert_eq!(route("help"), Route::Status);
        assert_eq!(route("turn off the lights"), Route::Submit("turn off the lights".into()));
    }

    fn router() -> ConversationRouter {
        let registry = keystone_modules::CapabilityRegistry::new();
        let dispatcher = CommandDispatcher::new(registry, std::time::Duration::from_secs(1));
        let recall: Arc<dyn RecallStore> = Arc::new(crate::recall::InMemoryRecallStore::new());
        ConversationRouter::new(dispatcher, recall, chrono::Duration::seconds(60))
    }

    #[test]
    fn test_end_session_and_idle_eviction() {
        let router = router();
        router.pipeline("a");
        router.pipeline("b");
        assert_eq!(router.sessions(), vec!["a", "b"]);

        assert!(router.end_session("a"));
        assert!(!router.end_session("a"));
        assert_eq!(router.sessions(), vec!["b"]);

        let held = router.pipeline("c");
        assert_eq!(router.sweep_all(), 0);
        assert_eq!(router.sessions(), vec!["c"]);
        drop(held);
        router.sweep_all();
        assert!(router.sessions().is_empty());
    }
}
