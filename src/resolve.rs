//! Per-request send mediation: readiness gate, input validation, contact
//! resolution, delivery.
//!
//! Resolution is two-phase and deterministic. A contact that strips to ten or
//! more digits is addressed numerically and the chat list is never consulted:
//! unambiguous numeric addressing wins over name resolution when both could
//! apply. Anything shorter falls through to a case-insensitive substring scan
//! over the chat list, fetched fresh per call, with the first match winning.

use crate::automation::AutomationClient;
use crate::error::RelayError;
use crate::session::SessionController;

/// Minimum stripped-digit length for the direct phone-number path.
const MIN_DIRECT_DIGITS: usize = 10;

/// Where a message is going, and the identifier reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// Normalized phone digits; addressed as `<digits>@c.us`.
    Number(String),
    /// An existing chat matched by name.
    Chat { id: String, name: String },
}

impl ResolvedTarget {
    /// The identifier handed to the automation layer.
    pub fn transport_id(&self) -> String {
        match self {
            ResolvedTarget::Number(digits) => format!("{digits}@c.us"),
            ResolvedTarget::Chat { id, .. } => id.clone(),
        }
    }

    /// The identifier reported in the success response: normalized digits or
    /// the chat's display name.
    pub fn display(&self) -> &str {
        match self {
            ResolvedTarget::Number(digits) => digits,
            ResolvedTarget::Chat { name, .. } => name,
        }
    }
}

fn strip_non_digits(contact: &str) -> String {
    contact.chars().filter(char::is_ascii_digit).collect()
}

/// Resolve a contact string to a delivery target. Queries the chat list only
/// when the numeric path does not apply.
pub async fn resolve_target(
    client: &dyn AutomationClient,
    contact: &str,
) -> Result<ResolvedTarget, RelayError> {
    let digits = strip_non_digits(contact);
    if digits.len() >= MIN_DIRECT_DIGITS {
        return Ok(ResolvedTarget::Number(digits));
    }

    // Fetched fresh every call: the chat list changes underneath us and
    // "first match" must track the live ordering.
    let chats = client
        .list_chats()
        .await
        .map_err(|err| RelayError::Delivery(err.to_string()))?;

    let needle = contact.to_lowercase();
    chats
        .into_iter()
        .find(|chat| chat.name.to_lowercase().contains(&needle))
        .map(|chat| ResolvedTarget::Chat {
            id: chat.id,
            name: chat.name,
        })
        .ok_or(RelayError::ContactNotFound)
}

/// The whole `send` contract: gate on readiness, validate, resolve, deliver.
/// Returns the resolved target so the handler can report it.
pub async fn relay_message(
    session: &SessionController,
    client: &dyn AutomationClient,
    contact: Option<&str>,
    message: Option<&str>,
) -> Result<ResolvedTarget, RelayError> {
    if !session.is_ready() {
        return Err(RelayError::NotReady);
    }

    let contact = contact.map(str::trim).unwrap_or_default();
    let message = message.map(str::trim).unwrap_or_default();
    if contact.is_empty() || message.is_empty() {
        return Err(RelayError::BadInput(
            "contact and message are required".into(),
        ));
    }

    let target = resolve_target(client, contact).await?;

    client
        .send_message(&target.transport_id(), message)
        .await
        .map_err(|err| RelayError::Delivery(err.to_string()))?;

    tracing::info!("sent message to {}", target.display());
    Ok(target)
}
