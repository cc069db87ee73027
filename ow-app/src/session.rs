//! Session orchestration: one task-scoped conversation per run, with the
//! event stream drained alongside the prompt call.

use crate::backend::{BackendEvent, Message, MessageRole, ModelBackend};
use futures_util::StreamExt;
use ow_llm::ModelRef;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    pub fn can_advance_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Created, Self::Errored)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Errored)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

struct Lifecycle<'a> {
    session_id: &'a str,
    state: SessionState,
}

impl<'a> Lifecycle<'a> {
    fn new(session_id: &'a str) -> Self {
        tracing::debug!(session_id, state = %SessionState::Created, "session state");
        Self {
            session_id,
            state: SessionState::Created,
        }
    }

    fn advance(&mut self, next: SessionState) {
        if self.state.is_terminal() || !self.state.can_advance_to(next) {
            tracing::error!(session_id = self.session_id, from = %self.state, to = %next, "invalid session transition");
            return;
        }
        tracing::debug!(session_id = self.session_id, from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub state: SessionState,
    /// Concatenated text parts of the final assistant message.
    pub text: String,
}

/// Owns the single active session for a caller. A second `run` while one is
/// in flight is rejected.
pub struct SessionOrchestrator {
    backend: Arc<dyn ModelBackend>,
    grace_period: Duration,
    active: AtomicBool,
}

struct ActiveGuard<'a>(&'a AtomicBool);

impl<'a> ActiveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> anyhow::Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| anyhow::anyhow!("a session is already active on this orchestrator"))?;
        Ok(Self(flag))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SessionOrchestrator {
    pub fn new(backend: Arc<dyn ModelBackend>, grace_period: Duration) -> Self {
        Self {
            backend,
            grace_period,
            active: AtomicBool::new(false),
        }
    }

    /// Create a session, send `prompt`, forward each newly completed assistant
    /// message to `sink`, and delete the session on every exit path.
    #[tracing::instrument(level = "info", skip(self, prompt, sink), fields(model = %model))]
    pub async fn run(
        &self,
        title: &str,
        model: &ModelRef,
        prompt: &str,
        sink: mpsc::Sender<Message>,
    ) -> anyhow::Result<SessionOutcome> {
        let _guard = ActiveGuard::acquire(&self.active)?;

        let session_id = self.backend.create_session(title).await?;
        let mut lifecycle = Lifecycle::new(&session_id);
        lifecycle.advance(SessionState::Running);

        let result = self.drive(&session_id, model, prompt, &sink).await;

        match &result {
            Ok(_) => lifecycle.advance(SessionState::Completed),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "session errored");
                lifecycle.advance(SessionState::Errored);
            }
        }
        if let Err(e) = self.backend.delete_session(&session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "session teardown failed");
        }
        let state = lifecycle.state;

        let message = result?;
        let text = message.text();
        tracing::info!(session_id = %session_id, text_len = text.len(), "session completed");
        Ok(SessionOutcome {
            session_id,
            state,
            text,
        })
    }

    async fn drive(
        &self,
        session_id: &str,
        model: &ModelRef,
        prompt: &str,
        sink: &mpsc::Sender<Message>,
    ) -> anyhow::Result<Message> {
        let mut events = self.backend.subscribe().await?;
        let stop = CancellationToken::new();

        let consumer = async {
            let mut completed: HashSet<String> = HashSet::new();
            loop {
                let event = tokio::select! {
                    biased;
                    event = events.next() => event,
                    _ = stop.cancelled() => break,
                };
                let Some(event) = event else {
                    tracing::debug!(session_id, "event stream ended");
                    break;
                };
                let BackendEvent::MessageUpdated { info } = event else {
                    continue;
                };
                if info.session_id != session_id
                    || info.role != MessageRole::Assistant
                    || !info.is_completed()
                {
                    continue;
                }
                if !completed.insert(info.id.clone()) {
                    continue;
                }
                match self.backend.message(session_id, &info.id).await {
                    Ok(message) => deliver(sink, message).await,
                    Err(e) => {
                        tracing::warn!(session_id, message_id = %info.id, error = %e, "failed to fetch completed message");
                    }
                }
            }
            completed
        };

        let producer = async {
            let result = self.backend.prompt(session_id, model, prompt).await;
            if result.is_ok() {
                tokio::time::sleep(self.grace_period).await;
            }
            stop.cancel();
            result
        };

        let (completed, result) = tokio::join!(consumer, producer);
        let message = result?;

        if message.info.role == MessageRole::Assistant && !completed.contains(&message.info.id) {
            tracing::debug!(session_id, message_id = %message.info.id, "final message delivered from prompt result");
            deliver(sink, message.clone()).await;
        }
        Ok(message)
    }
}

async fn deliver(sink: &mpsc::Sender<Message>, message: Message) {
    if sink.send(message).await.is_err() {
        tracing::debug!("message sink closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EventStream, MessageInfo, MessageTime, Part};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn message(id: &str, session: &str, role: MessageRole, completed: bool, text: &str) -> Message {
        Message {
            info: MessageInfo {
                id: id.to_string(),
                session_id: session.to_string(),
                role,
                time: MessageTime {
                    created: 1,
                    completed: completed.then_some(2),
                },
            },
            parts: vec![Part::Text {
                text: text.to_string(),
            }],
        }
    }

    fn updated(msg: &Message) -> BackendEvent {
        BackendEvent::MessageUpdated {
            info: msg.info.clone(),
        }
    }

    const SESSION: &str = "ses_1";

    struct ScriptedBackend {
        events: Mutex<Vec<BackendEvent>>,
        messages: HashMap<String, Message>,
        prompt_result: Mutex<Option<anyhow::Result<Message>>>,
        prompt_delay: Duration,
        fail_create: bool,
        creates: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(events: Vec<BackendEvent>, messages: Vec<Message>, prompt_result: anyhow::Result<Message>) -> Self {
            Self {
                events: Mutex::new(events),
                messages: messages
                    .into_iter()
                    .map(|m| (m.info.id.clone(), m))
                    .collect(),
                prompt_result: Mutex::new(Some(prompt_result)),
                prompt_delay: Duration::from_millis(50),
                fail_create: false,
                creates: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn create_session(&self, _title: &str) -> anyhow::Result<String> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(anyhow::anyhow!("backend unavailable"));
            }
            Ok(SESSION.to_string())
        }

        async fn subscribe(&self) -> anyhow::Result<EventStream> {
            let events = std::mem::take(&mut *self.events.lock().unwrap());
            let stream = futures_util::stream::iter(events).chain(futures_util::stream::pending());
            Ok(Box::pin(stream))
        }

        async fn prompt(&self, _session_id: &str, _model: &ModelRef, _text: &str) -> anyhow::Result<Message> {
            tokio::time::sleep(self.prompt_delay).await;
            self.prompt_result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(anyhow::anyhow!("prompt already consumed")))
        }

        async fn message(&self, _session_id: &str, message_id: &str) -> anyhow::Result<Message> {
            self.messages
                .get(message_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("message not found: {message_id}"))
        }

        async fn delete_session(&self, _session_id: &str) -> anyhow::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn model() -> ModelRef {
        ModelRef::new("test", "model")
    }

    fn drain(mut rx: mpsc::Receiver<Message>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            ids.push(msg.info.id);
        }
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_each_completed_assistant_message_once_in_order() {
        let m1_partial = message("m1", SESSION, MessageRole::Assistant, false, "");
        let m1 = message("m1", SESSION, MessageRole::Assistant, true, "first");
        let m2 = message("m2", SESSION, MessageRole::Assistant, true, "final answer");
        let foreign = message("m3", "ses_other", MessageRole::Assistant, true, "not ours");
        let user = message("m4", SESSION, MessageRole::User, true, "prompt");
        let backend = Arc::new(ScriptedBackend::new(
            vec![
                updated(&user),
                updated(&m1_partial),
                updated(&m1),
                updated(&foreign),
                updated(&m1),
                updated(&m2),
                BackendEvent::SessionIdle {
                    session_id: SESSION.to_string(),
                },
            ],
            vec![m1.clone(), m2.clone(), foreign, user],
            Ok(m2.clone()),
        ));
        let orchestrator = SessionOrchestrator::new(backend.clone(), Duration::from_millis(100));
        let (tx, rx) = mpsc::channel(16);

        let outcome = orchestrator.run("t", &model(), "go", tx).await.unwrap();

        assert_eq!(outcome.text, "final answer");
        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(drain(rx), vec!["m1", "m2"]);
        assert_eq!(backend.deletes.load(Ordering::SeqCst), 1);
        assert!(!orchestrator.active.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_failure_still_deletes_session_once() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![],
            vec![],
            Err(anyhow::anyhow!("model exploded")),
        ));
        let orchestrator = SessionOrchestrator::new(backend.clone(), Duration::from_millis(100));
        let (tx, _rx) = mpsc::channel(4);

        let err = orchestrator.run("t", &model(), "go", tx).await.unwrap_err();

        assert!(err.to_string().contains("model exploded"));
        assert_eq!(backend.deletes.load(Ordering::SeqCst), 1);
        assert!(!orchestrator.active.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn final_message_is_delivered_when_no_event_arrived() {
        let m5 = message("m5", SESSION, MessageRole::Assistant, true, "only via result");
        let backend = Arc::new(ScriptedBackend::new(vec![], vec![], Ok(m5)));
        let orchestrator = SessionOrchestrator::new(backend, Duration::from_millis(100));
        let (tx, rx) = mpsc::channel(4);

        let outcome = orchestrator.run("t", &model(), "go", tx).await.unwrap();

        assert_eq!(outcome.text, "only via result");
        assert_eq!(drain(rx), vec!["m5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_concurrent_session_is_rejected() {
        let m = message("m1", SESSION, MessageRole::Assistant, true, "done");
        let backend = Arc::new(ScriptedBackend::new(vec![], vec![], Ok(m.clone())));
        let orchestrator = SessionOrchestrator::new(backend.clone(), Duration::from_millis(10));
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        let model_a = model();
        let model_b = model();
        let (first, second) = tokio::join!(orchestrator.run("a", &model_a, "go", tx1), async {
            tokio::task::yield_now().await;
            orchestrator.run("b", &model_b, "go", tx2).await
        });

        assert!(first.is_ok());
        assert!(second.unwrap_err().to_string().contains("already active"));
        assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
        assert!(!orchestrator.active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_create_has_nothing_to_delete() {
        let mut backend = ScriptedBackend::new(
            vec![],
            vec![],
            Ok(message("m", SESSION, MessageRole::Assistant, true, "")),
        );
        backend.fail_create = true;
        let backend = Arc::new(backend);
        let orchestrator = SessionOrchestrator::new(backend.clone(), Duration::ZERO);
        let (tx, _rx) = mpsc::channel(1);

        assert!(orchestrator.run("t", &model(), "go", tx).await.is_err());
        assert_eq!(backend.deletes.load(Ordering::SeqCst), 0);
        assert!(!orchestrator.active.load(Ordering::SeqCst));
    }

    #[test]
    fn terminal_states_are_final() {
        use SessionState::*;
        assert!(Created.can_advance_to(Running));
        assert!(Running.can_advance_to(Completed));
        assert!(Running.can_advance_to(Errored));
        assert!(!Completed.can_advance_to(Errored));
        assert!(!Errored.can_advance_to(Running));
        assert!(Completed.is_terminal() && Errored.is_terminal());
        assert!(!Running.is_terminal());
    }
}
