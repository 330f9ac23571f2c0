//! Session lifecycle for the automated WhatsApp Web link.
//!
//! The controller owns two pieces of process-wide state: where the session is
//! in its `Uninitialized → AwaitingScan → Ready` lifecycle, and the current
//! QR challenge while one is outstanding. Only the automation event pump
//! writes; HTTP handlers read through the accessors.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    AwaitingScan,
    Ready,
}

/// A pairing QR code as issued by the automation layer: the raw payload plus
/// an SVG rendering for the `/qr` page. Rendering can fail on a malformed
/// payload, in which case the page falls back to showing the payload text.
#[derive(Debug, Clone)]
pub struct QrChallenge {
    pub payload: String,
    pub svg: Option<String>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    qr: Option<QrChallenge>,
}

pub struct SessionController {
    inner: Mutex<Inner>,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A QR challenge was issued, or re-issued: WhatsApp Web rotates codes
    /// until one is scanned, latest wins. Ignored once the session is ready.
    pub fn on_qr_issued(&self, payload: &str) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Ready {
            tracing::debug!("ignoring QR issued after session became ready");
            return;
        }

        match render_terminal_qr(payload) {
            Ok(rendered) => {
                eprintln!();
                eprintln!("Scan this QR code in WhatsApp > Linked Devices:");
                eprintln!("{rendered}");
                eprintln!();
            }
            Err(err) => {
                tracing::warn!("failed to render pairing QR in terminal: {err}");
                tracing::info!("QR payload: {payload}");
            }
        }

        inner.qr = Some(QrChallenge {
            payload: payload.to_string(),
            svg: render_svg_qr(payload)
                .map_err(|err| tracing::warn!("failed to render pairing QR as SVG: {err}"))
                .ok(),
        });
        inner.state = SessionState::AwaitingScan;
        tracing::info!("QR challenge issued, awaiting scan");
    }

    /// Phone accepted the link. Informational only; the transport is not
    /// usable until the ready event follows.
    pub fn on_authenticated(&self) {
        tracing::info!("authenticated, waiting for session to come up");
    }

    /// Transport is live. Terminal for the modeled lifecycle; the QR challenge
    /// must never be presented again from here on.
    pub fn on_ready(&self) {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Ready;
        inner.qr = None;
        tracing::info!("WhatsApp session ready");
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn qr(&self) -> Option<QrChallenge> {
        self.inner.lock().qr.clone()
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a QR payload into terminal-friendly text.
fn render_terminal_qr(payload: &str) -> Result<String> {
    let payload = payload.trim();
    if payload.is_empty() {
        anyhow::bail!("QR payload is empty");
    }

    let qr = qrcode::QrCode::new(payload.as_bytes())
        .map_err(|err| anyhow!("Failed to encode QR payload: {err}"))?;

    Ok(qr
        .render::<qrcode::render::unicode::Dense1x2>()
        .quiet_zone(true)
        .build())
}

/// Render a QR payload as an SVG document for embedding in the `/qr` page.
fn render_svg_qr(payload: &str) -> Result<String> {
    let payload = payload.trim();
    if payload.is_empty() {
        anyhow::bail!("QR payload is empty");
    }

    let qr = qrcode::QrCode::new(payload.as_bytes())
        .map_err(|err| anyhow!("Failed to encode QR payload: {err}"))?;

    Ok(qr
        .render::<qrcode::render::svg::Color>()
        .min_dimensions(240, 240)
        .quiet_zone(true)
        .build())
}
