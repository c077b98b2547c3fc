//! Scripted agent for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::types::{
    AgentApiError, AgentSession, MessagePart, PromptInfo, PromptRequest, PromptResponse,
    TokenUsage,
};
use super::{AgentHandle, AgentLaunchConfig, AgentLauncher, AgentResult};

/// Shared script state inspected by tests.
#[derive(Default)]
pub struct AgentScript {
    /// Text the agent answers every prompt with.
    pub response_text: Mutex<String>,
    /// When set, responses carry this error and the run fails.
    pub fail_with: Mutex<Option<String>>,
    /// When set, `launch` itself fails.
    pub refuse_launch: Mutex<Option<String>>,
    pub sessions: Mutex<Vec<AgentSession>>,
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub prompts: Mutex<Vec<(String, String)>>,
    session_counter: AtomicUsize,
}

impl AgentScript {
    pub fn answering(text: impl Into<String>) -> Arc<Self> {
        let script = Self::default();
        *script.response_text.lock().unwrap() = text.into();
        Arc::new(script)
    }

    pub fn failing(message: impl Into<String>) -> Arc<Self> {
        let script = Self::default();
        *script.fail_with.lock().unwrap() = Some(message.into());
        Arc::new(script)
    }

    pub fn seed_session(&self, id: &str, directory: &str) {
        self.sessions.lock().unwrap().push(AgentSession {
            id: id.to_string(),
            title: None,
            directory: Some(directory.to_string()),
        });
    }

    pub fn prompted_sessions(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn last_prompt_text(&self) -> Option<String> {
        self.prompts
            .lock()
            .unwrap()
            .last()
            .map(|(_, text)| text.clone())
    }
}

/// Launcher returning handles bound to a shared script.
pub struct ScriptedAgentLauncher {
    pub script: Arc<AgentScript>,
    pub configs: Mutex<Vec<AgentLaunchConfig>>,
}

impl ScriptedAgentLauncher {
    pub fn new(script: Arc<AgentScript>) -> Self {
        Self {
            script,
            configs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AgentLauncher for ScriptedAgentLauncher {
    async fn launch(
        &self,
        _sandbox_id: &str,
        config: AgentLaunchConfig,
    ) -> AgentResult<Box<dyn AgentHandle>> {
        if let Some(message) = self.script.refuse_launch.lock().unwrap().clone() {
            return Err(super::AgentError::Launch(message));
        }
        self.script.launches.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().unwrap().push(config);
        Ok(Box::new(ScriptedAgentHandle {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedAgentHandle {
    script: Arc<AgentScript>,
}

#[async_trait]
impl AgentHandle for ScriptedAgentHandle {
    async fn list_sessions(&self, directory: &str) -> AgentResult<Vec<AgentSession>> {
        Ok(self
            .script
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.directory.as_deref() == Some(directory))
            .cloned()
            .collect())
    }

    async fn create_session(&self, directory: &str) -> AgentResult<AgentSession> {
        let n = self.script.session_counter.fetch_add(1, Ordering::SeqCst);
        let session = AgentSession {
            id: format!("ses_{:04}", n),
            title: None,
            directory: Some(directory.to_string()),
        };
        self.script.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn prompt(
        &self,
        session_id: &str,
        request: PromptRequest,
    ) -> AgentResult<PromptResponse> {
        let text = request
            .parts
            .iter()
            .map(|part| match part {
                super::types::PromptPart::Text { text } => text.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.script
            .prompts
            .lock()
            .unwrap()
            .push((session_id.to_string(), text));

        let error = self
            .script
            .fail_with
            .lock()
            .unwrap()
            .clone()
            .map(|message| AgentApiError {
                name: Some("AgentError".to_string()),
                message: Some(message),
            });

        Ok(PromptResponse {
            info: PromptInfo {
                error,
                tokens: Some(TokenUsage {
                    input: Some(120),
                    output: Some(48),
                    reasoning: None,
                }),
            },
            parts: vec![MessagePart::Text {
                text: self.script.response_text.lock().unwrap().clone(),
            }],
        })
    }

    async fn close(&self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}
