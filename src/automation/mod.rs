//! Seam between the relay and the WhatsApp Web automation client.
//!
//! The relay consumes a deliberately narrow surface: a one-shot bootstrap
//! that starts emitting lifecycle events, a fresh chat listing, and a send
//! operation. Everything else the client does (transport, crypto, session
//! persistence) stays behind this trait.

#[cfg(feature = "whatsapp-web")]
pub mod session_store;
pub mod whatsapp_web;

use crate::session::SessionController;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle events raised by the automation client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationEvent {
    /// A pairing QR challenge was issued (payload to render and scan).
    QrIssued(String),
    /// The phone accepted the link; transport not yet usable.
    Authenticated,
    /// The session transport is live; sends are now permitted.
    Ready,
}

/// One known chat, in the order the automation layer returns it.
#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// Initialize the underlying session and start emitting lifecycle events
    /// on `events`. Returns once the client is running; an error here is
    /// fatal to the process (no retry policy, the supervisor restarts us).
    async fn bootstrap(&self, events: mpsc::Sender<AutomationEvent>) -> anyhow::Result<()>;

    /// The full set of known chats, fetched fresh. Order matters: fuzzy
    /// contact resolution picks the first match.
    async fn list_chats(&self) -> anyhow::Result<Vec<ChatRecord>>;

    /// Deliver one text message to a transport identifier.
    async fn send_message(&self, target: &str, body: &str) -> anyhow::Result<()>;
}

/// Drain automation events into session-state transitions. This task is the
/// single writer of the session controller.
pub fn spawn_event_pump(
    session: Arc<SessionController>,
    mut events: mpsc::Receiver<AutomationEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AutomationEvent::QrIssued(payload) => session.on_qr_issued(&payload),
                AutomationEvent::Authenticated => session.on_authenticated(),
                AutomationEvent::Ready => session.on_ready(),
            }
        }
        tracing::debug!("automation event stream closed");
    })
}
