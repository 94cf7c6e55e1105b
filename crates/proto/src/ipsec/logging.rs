//! Structured logging for Main Mode
//!
//! Provides structured, contextual logging using the `tracing` framework.
//! Exchanges are identified by their cookies (hex) and role; secrets and
//! key material are never passed to these functions.
//!
//! # Log Levels
//!
//! - **TRACE**: Message send/receive, timer activity
//! - **DEBUG**: Proposal selection, step-level handler detail
//! - **INFO**: Exchange start/completion, state transitions, SA removal
//! - **WARN**: Retransmissions
//! - **ERROR**: Failed exchanges, authentication failures
//!
//! # Example
//!
//! ```no_run
//! use oakley_proto::ipsec::ikev1::state::{MainModeState, Role};
//! use oakley_proto::ipsec::logging;
//!
//! // Initialize tracing subscriber (in tests or applications)
//! tracing_subscriber::fmt()
//!     .with_env_filter("oakley_proto::ipsec=debug")
//!     .init();
//!
//! logging::log_state_transition(
//!     &[0x01; 8],
//!     Role::Initiator,
//!     MainModeState::Initiator1,
//!     MainModeState::Initiator3,
//! );
//! ```

use super::events::RemovalReason;
use super::ikev1::identity::Identifier;
use super::ikev1::message::Cookie;
use super::ikev1::proposal::SaAttributes;
use super::ikev1::sa::CookiePair;
use super::ikev1::state::{MainModeState, Role};
use super::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Log a Main Mode state transition
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `role` - Our role
/// * `from` - State that handled the message
/// * `to` - Next state
pub fn log_state_transition(icookie: &Cookie, role: Role, from: MainModeState, to: MainModeState) {
    info!(
        icookie = %hex::encode(icookie),
        role = %role,
        state_from = %from,
        state_to = %to,
        "Main Mode state transition"
    );
}

/// Log the start of an exchange
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `role` - "initiator" when started locally, "responder" on first inbound
/// * `peer` - Peer address
/// * `policy` - Policy name
pub fn log_exchange_start(icookie: &Cookie, role: Role, peer: SocketAddr, policy: &str) {
    info!(
        icookie = %hex::encode(icookie),
        role = %role,
        peer = %peer,
        policy = policy,
        "Main Mode exchange started"
    );
}

/// Log exchange completion
///
/// # Arguments
///
/// * `cookies` - Cookie pair of the established SA
/// * `role` - Our role
/// * `peer` - Peer address
/// * `duration` - Time since the exchange started
pub fn log_exchange_complete(cookies: &CookiePair, role: Role, peer: SocketAddr, duration: Duration) {
    info!(
        icookie = %hex::encode(cookies.icookie()),
        rcookie = %hex::encode(cookies.rcookie()),
        role = %role,
        peer = %peer,
        duration_ms = duration.as_millis() as u64,
        "Phase 1 SA established"
    );
}

/// Log exchange failure
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `role` - Our role
/// * `state` - State whose handler failed
/// * `error` - Failure
pub fn log_exchange_failed(icookie: &Cookie, role: Role, state: MainModeState, error: &Error) {
    error!(
        icookie = %hex::encode(icookie),
        role = %role,
        state = %state,
        error = %error,
        notify = ?error.notify_type(),
        "Main Mode exchange failed"
    );
}

/// Log the negotiated attributes
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `attrs` - Selected attributes
pub fn log_proposal_selected(icookie: &Cookie, attrs: &SaAttributes) {
    debug!(
        icookie = %hex::encode(icookie),
        encryption = ?attrs.encryption,
        hash = ?attrs.hash,
        auth_method = ?attrs.auth_method,
        group = ?attrs.group,
        key_len = ?attrs.key_len,
        lifetime_secs = attrs.lifetime_secs(),
        "Proposal selected"
    );
}

/// Log authentication success
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `peer_id` - Authenticated peer identity
/// * `auth_method` - "PSK" or "RSA"
pub fn log_authentication_success(icookie: &Cookie, peer_id: &Identifier, auth_method: &str) {
    info!(
        icookie = %hex::encode(icookie),
        peer_id = %peer_id,
        auth_method = auth_method,
        "Peer authenticated successfully"
    );
}

/// Log authentication failure
///
/// The reason stays in the local log; the peer only ever sees
/// `AuthenticationFailed`.
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `reason` - Failure reason
pub fn log_authentication_failed(icookie: &Cookie, reason: &str) {
    error!(
        icookie = %hex::encode(icookie),
        reason = reason,
        "Peer authentication failed"
    );
}

/// Log message send
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `state` - State that produced the message
/// * `peer` - Peer address
/// * `size_bytes` - Datagram size in bytes
pub fn log_message_send(icookie: &Cookie, state: MainModeState, peer: SocketAddr, size_bytes: usize) {
    trace!(
        icookie = %hex::encode(icookie),
        state = %state,
        peer = %peer,
        size_bytes = size_bytes,
        "Sending ISAKMP message"
    );
}

/// Log message receive
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `state` - State that will handle the message
/// * `peer` - Peer address
/// * `size_bytes` - Datagram size in bytes
pub fn log_message_recv(icookie: &Cookie, state: MainModeState, peer: SocketAddr, size_bytes: usize) {
    trace!(
        icookie = %hex::encode(icookie),
        state = %state,
        peer = %peer,
        size_bytes = size_bytes,
        "Received ISAKMP message"
    );
}

/// Log a retransmission of the last outbound message
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `peer` - Peer address
/// * `trigger` - "duplicate" for a repeated inbound message, "timer" for a resend timeout
/// * `count` - Resends of this message so far
pub fn log_retransmission(icookie: &Cookie, peer: SocketAddr, trigger: &str, count: u8) {
    warn!(
        icookie = %hex::encode(icookie),
        peer = %peer,
        trigger = trigger,
        count = count,
        "Retransmitting last message"
    );
}

/// Log SA removal
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `policy` - Owning policy
/// * `reason` - Removal trigger
pub fn log_sa_removed(icookie: &Cookie, policy: &str, reason: RemovalReason) {
    info!(
        icookie = %hex::encode(icookie),
        policy = policy,
        reason = ?reason,
        "Phase 1 SA removed"
    );
}
