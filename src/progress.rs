//! Progress stream: one `{action, session, phase, iteration, error}` record
//! per phase START/END/ERROR. Non-blocking delivery — drops on a full
//! channel with a warning, grounded on `backend/src/agents/executor/mod.rs`'s
//! `AgentEvent` + `mpsc::Sender` forwarding.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    End,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub action: Action,
    pub session: String,
    pub phase: Option<usize>,
    pub iteration: Option<usize>,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn start(session: impl Into<String>, phase: usize, iteration: Option<usize>) -> Self {
        Self {
            action: Action::Start,
            session: session.into(),
            phase: Some(phase),
            iteration,
            error: None,
        }
    }

    pub fn end(session: impl Into<String>, phase: usize, iteration: Option<usize>) -> Self {
        Self {
            action: Action::End,
            session: session.into(),
            phase: Some(phase),
            iteration,
            error: None,
        }
    }

    pub fn error(
        session: impl Into<String>,
        phase: Option<usize>,
        iteration: Option<usize>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            action: Action::Error,
            session: session.into(),
            phase,
            iteration,
            error: Some(error.into()),
        }
    }
}

/// Wraps an `mpsc::Sender`, sending non-blockingly and logging + dropping on
/// a full channel rather than back-pressuring the caller.
#[derive(Clone)]
pub struct ProgressSink {
    sender: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Err(e) = self.sender.try_send(event) {
            tracing::warn!("progress channel full or closed, dropping event: {e}");
        }
    }
}

/// Creates a bounded progress channel per [`crate::config::EngineConfig`]'s
/// `progress_channel_capacity`.
pub fn channel(capacity: usize) -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ProgressSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event_when_channel_has_room() {
        let (sink, mut rx) = channel(4);
        sink.send(ProgressEvent::start("S", 0, None));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.session, "S");
        assert_eq!(event.action, Action::Start);
    }

    #[tokio::test]
    async fn send_drops_silently_when_channel_is_full() {
        let (sink, _rx) = channel(1);
        sink.send(ProgressEvent::start("S", 0, None));
        // Second send has nowhere to go (receiver hasn't drained) and must
        // not block or panic.
        sink.send(ProgressEvent::end("S", 0, None));
    }
}
