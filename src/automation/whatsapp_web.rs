//! WhatsApp Web automation client backed by wa-rs.
//!
//! Requires the `whatsapp-web` feature:
//! ```sh
//! cargo build --features whatsapp-web
//! ```
//! Without it a stub is compiled whose bootstrap fails, which is fatal at
//! startup: the relay cannot do anything without its transport.
//!
//! Session persistence lives in a rusqlite store (see
//! [`super::session_store`]); deleting the database file forces a fresh QR
//! pairing.

use super::{AutomationClient, AutomationEvent, ChatRecord};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

#[cfg(feature = "whatsapp-web")]
use super::session_store::SessionStore;
#[cfg(feature = "whatsapp-web")]
use anyhow::anyhow;
#[cfg(feature = "whatsapp-web")]
use parking_lot::Mutex;
#[cfg(feature = "whatsapp-web")]
use std::sync::Arc;

#[cfg(feature = "whatsapp-web")]
pub struct WhatsAppWebClient {
    /// Session database path
    session_path: PathBuf,
    /// Transport-side ceiling for one delivery attempt
    send_timeout: Duration,
    /// Client handle for sending messages
    client: Arc<Mutex<Option<Arc<wa_rs::Client>>>>,
    /// Session store, shared with the event handler for the chat directory
    store: Arc<Mutex<Option<Arc<SessionStore>>>>,
    /// Bot handle for shutdown
    bot_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

#[cfg(feature = "whatsapp-web")]
impl WhatsAppWebClient {
    pub fn new(session_path: PathBuf, send_timeout: Duration) -> Self {
        Self {
            session_path,
            send_timeout,
            client: Arc::new(Mutex::new(None)),
            store: Arc::new(Mutex::new(None)),
            bot_handle: Arc::new(Mutex::new(None)),
        }
    }
}

#[cfg(feature = "whatsapp-web")]
#[async_trait]
impl AutomationClient for WhatsAppWebClient {
    async fn bootstrap(&self, events: mpsc::Sender<AutomationEvent>) -> anyhow::Result<()> {
        use wa_rs::bot::Bot;
        use wa_rs::store::{Device, DeviceStore};
        use wa_rs_binary::jid::JidExt as _;
        use wa_rs_core::types::events::Event;
        use wa_rs_tokio_transport::TokioWebSocketTransportFactory;
        use wa_rs_ureq_http::UreqHttpClient;

        tracing::info!(
            "WhatsApp Web client starting (session: {})",
            self.session_path.display()
        );

        let backend = Arc::new(SessionStore::open(&self.session_path)?);

        let mut device = Device::new(backend.clone());
        if backend.exists().await? {
            tracing::info!("found existing session, loading device");
            if let Some(core_device) = backend.load().await? {
                device.load_from_serializable(core_device);
            } else {
                anyhow::bail!("Device exists but failed to load");
            }
        } else {
            tracing::info!("no existing session, new device will be created during pairing");
        }

        let mut transport_factory = TokioWebSocketTransportFactory::new();
        if let Ok(ws_url) = std::env::var("WHATSAPP_WS_URL") {
            transport_factory = transport_factory.with_url(ws_url);
        }

        let http_client = UreqHttpClient::new();

        let events_tx = events.clone();
        let directory = backend.clone();
        let builder = Bot::builder()
            .with_backend(backend.clone())
            .with_transport_factory(transport_factory)
            .with_http_client(http_client)
            .on_event(move |event, _client| {
                let events = events_tx.clone();
                let directory = directory.clone();
                async move {
                    match event {
                        Event::PairingQrCode { code, .. } => {
                            let _ = events.send(AutomationEvent::QrIssued(code)).await;
                        }
                        Event::PairSuccess(_) => {
                            let _ = events.send(AutomationEvent::Authenticated).await;
                        }
                        Event::Connected(_) => {
                            let _ = events.send(AutomationEvent::Ready).await;
                        }
                        Event::LoggedOut(_) => {
                            tracing::warn!("WhatsApp Web was logged out");
                        }
                        Event::StreamError(stream_error) => {
                            tracing::error!("WhatsApp Web stream error: {:?}", stream_error);
                        }
                        Event::Message(_msg, info) => {
                            // The push name on the message is the best
                            // display-name signal the event carries.
                            let chat = info.source.chat.to_string();
                            let name = if info.push_name.is_empty() {
                                info.source.sender.user().to_string()
                            } else {
                                info.push_name.clone()
                            };
                            if let Err(e) = directory.record_chat(&chat, &name) {
                                tracing::warn!("failed to record chat {chat}: {e}");
                            }
                        }
                        _ => {}
                    }
                }
            });

        let mut bot = builder.build().await?;
        *self.client.lock() = Some(bot.client());

        let handle = bot.run().await?;
        *self.bot_handle.lock() = Some(handle);
        *self.store.lock() = Some(backend);

        Ok(())
    }

    async fn list_chats(&self) -> anyhow::Result<Vec<ChatRecord>> {
        let store = self.store.lock().clone();
        let Some(store) = store else {
            anyhow::bail!("WhatsApp Web client not connected. Initialize the bot first.");
        };
        store.list_chats()
    }

    async fn send_message(&self, target: &str, body: &str) -> anyhow::Result<()> {
        let client = self.client.lock().clone();
        let Some(client) = client else {
            anyhow::bail!("WhatsApp Web client not connected. Initialize the bot first.");
        };

        let to = target
            .trim()
            .parse::<wa_rs_binary::jid::Jid>()
            .map_err(|e| anyhow!("Invalid WhatsApp JID `{target}`: {e}"))?;

        let outgoing = wa_rs_proto::whatsapp::Message {
            conversation: Some(body.to_string()),
            ..Default::default()
        };

        let message_id =
            tokio::time::timeout(self.send_timeout, client.send_message(to, outgoing))
                .await
                .map_err(|_| {
                    anyhow!(
                        "send to {target} timed out after {}s",
                        self.send_timeout.as_secs()
                    )
                })??;
        tracing::debug!("sent message to {} (id: {})", target, message_id);
        Ok(())
    }
}

// Stub implementation when the feature is not enabled
#[cfg(not(feature = "whatsapp-web"))]
pub struct WhatsAppWebClient {
    _private: (),
}

#[cfg(not(feature = "whatsapp-web"))]
impl WhatsAppWebClient {
    pub fn new(_session_path: PathBuf, _send_timeout: Duration) -> Self {
        Self { _private: () }
    }
}

#[cfg(not(feature = "whatsapp-web"))]
#[async_trait]
impl AutomationClient for WhatsAppWebClient {
    async fn bootstrap(&self, _events: mpsc::Sender<AutomationEvent>) -> anyhow::Result<()> {
        anyhow::bail!(
            "WhatsApp Web client requires the 'whatsapp-web' feature. \
            Enable with: cargo build --features whatsapp-web"
        );
    }

    async fn list_chats(&self) -> anyhow::Result<Vec<ChatRecord>> {
        anyhow::bail!(
            "WhatsApp Web client requires the 'whatsapp-web' feature. \
            Enable with: cargo build --features whatsapp-web"
        );
    }

    async fn send_message(&self, _target: &str, _body: &str) -> anyhow::Result<()> {
        anyhow::bail!(
            "WhatsApp Web client requires the 'whatsapp-web' feature. \
            Enable with: cargo build --features whatsapp-web"
        );
    }
}
