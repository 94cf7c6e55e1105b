//! Main Mode exchange (RFC 2409 Section 5)
//!
//! One handler per state, selected by [`MainModeState`]. The dispatcher
//! screens the header, answers retransmissions from the last sent message,
//! runs the handler and either advances, completes or aborts the exchange.
//!
//! ```text
//! Initiator                          Responder
//! HDR, SA                     -->
//!                             <--    HDR, SA
//! HDR, KE, Ni                 -->
//!                             <--    HDR, KE, Nr [, CR]
//! HDR*, IDii [, CR] [, CERT],
//!       HASH_I | SIG_I        -->
//!                             <--    HDR*, IDir [, CERT], HASH_R | SIG_R
//! ```
//!
//! Sending, timer arming and the CBC IV chain are driven from here so that
//! a handler that fails half way never leaves a message sent with partially
//! updated SA state.

use super::auth::{
    auth_parameters, generate_hash_data, generate_id_data, verify_auth_data, AuthParams,
    HashInputs, PeerProof,
};
use super::cert_exchange;
use super::constants::{AuthMethod, ExchangeType, HeaderFlags, PayloadType};
use super::handle::{message_digest, MessageDigest, Phase1Handle};
use super::keymat::{generate_nonce, KeyExchangeInputs, Phase1Keys, SkeyidSecret};
use super::message::{message_body, IsakmpHeader, Message, OutboundMessage};
use super::payload::{CertPayload, CertReqPayload, KePayload, NoncePayload, SaPayload};
use super::proposal::{
    construct_proposal, convert_attributes, select_proposal, verify_attributes,
    verify_selection_sa,
};
use super::sa::generate_cookie;
use super::state::{MainModeState, Role};
use crate::ipsec::config::{EngineConfig, Policy, PolicyFlags};
use crate::ipsec::crypto::DhKeyPair;
use crate::ipsec::events::{EventQueue, RemovalReason, SaEvent};
use crate::ipsec::logging;
use crate::ipsec::sadb::{EstablishedSa, Phase1Status, SaDatabase, SaRecord};
use crate::ipsec::timer::{TimerKey, TimerKind, TimerService};
use crate::ipsec::{Error, Result};
use oakley_platform::Transport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of feeding one message to an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran; this message was sent
    Continue(Vec<u8>),
    /// The SA is established
    Complete,
    /// Duplicate inbound message; the last message was sent again
    Retransmitted(Vec<u8>),
    /// The exchange was aborted
    Failed(Error),
}

/// What a handler may touch while processing one message
pub struct StateContext<'a> {
    /// Policy of the exchange
    pub policy: &'a Policy,
    /// SA database of that policy
    pub sadb: &'a SaDatabase,
    /// Engine configuration
    pub config: &'a EngineConfig,
    /// Outbound datagrams
    pub transport: &'a mut dyn Transport,
    /// Exchange timers
    pub timers: &'a mut dyn TimerService,
    /// Deferred SA removal
    pub events: &'a mut EventQueue,
    /// Current time
    pub now: Instant,
    /// Local address the message arrived on
    pub local: Option<SocketAddr>,
}

struct Inbound<'a> {
    header: IsakmpHeader,
    data: &'a [u8],
    digest: MessageDigest,
}

/// Run the exchange one step
///
/// `datagram` is `None` only for the Initiator's first message.
///
/// # Errors
///
/// Messages that are rejected before reaching a handler (unsupported
/// exchange type, authentication-only flag, non-zero message id, anything
/// after completion) return `Err` and leave the exchange untouched. A
/// failing handler aborts the exchange and is reported as
/// [`Outcome::Failed`].
pub fn process_main_mode(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    datagram: Option<&[u8]>,
) -> Result<Outcome> {
    if handle.deleted {
        return Err(Error::InvalidState("exchange is being removed".into()));
    }

    let inbound = match datagram {
        Some(data) => {
            let header = IsakmpHeader::from_bytes(data)?;
            if header.exchange_type != ExchangeType::IdentityProtection {
                return Err(Error::UnsupportedExchangeType(header.exchange_type.to_u8()));
            }
            if header.flags.is_auth_only() {
                return Err(Error::InvalidFlags(header.flags.value()));
            }
            if header.message_id != 0 {
                return Err(Error::InvalidMessageId(header.message_id));
            }

            let digest = message_digest(data);
            if handle.is_retransmission(&digest) {
                return resend_last(handle, ctx.transport, "duplicate").map(Outcome::Retransmitted);
            }

            logging::log_message_recv(
                &handle.sa.cookies.icookie(),
                handle.state,
                handle.sa.remote,
                data.len(),
            );
            Some(Inbound {
                header,
                data,
                digest,
            })
        }
        None => None,
    };

    if handle.state.is_complete() {
        return Err(Error::UnexpectedMessage(
            "Phase 1 exchange already complete".into(),
        ));
    }
    if let Some(local) = ctx.local {
        handle.sa.local = Some(local);
    }

    let from = handle.state;
    let sent = match run_state(handle, ctx, inbound.as_ref()) {
        Ok(sent) => sent,
        Err(err) => {
            abort(handle, ctx.sadb, ctx.timers, ctx.events, &err);
            return Ok(Outcome::Failed(err));
        }
    };

    let to = from.next();
    handle.state = to;
    logging::log_state_transition(&handle.sa.cookies.icookie(), handle.role(), from, to);

    if !to.is_complete() {
        return Ok(Outcome::Continue(sent.unwrap_or_default()));
    }

    match finalize(handle, ctx) {
        Ok(()) => Ok(Outcome::Complete),
        Err(err) => {
            abort(handle, ctx.sadb, ctx.timers, ctx.events, &err);
            Ok(Outcome::Failed(err))
        }
    }
}

fn run_state(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: Option<&Inbound<'_>>,
) -> Result<Option<Vec<u8>>> {
    if let Some(msg) = inbound {
        check_header(handle, &msg.header)?;
    }

    match (handle.state, inbound) {
        (MainModeState::Initiator1, None) => initiator_send_sa(handle, ctx).map(Some),
        (MainModeState::Responder2, Some(msg)) => responder_select_sa(handle, ctx, msg).map(Some),
        (MainModeState::Initiator3, Some(msg)) => {
            initiator_key_exchange(handle, ctx, msg).map(Some)
        }
        (MainModeState::Responder4, Some(msg)) => {
            responder_key_exchange(handle, ctx, msg).map(Some)
        }
        (MainModeState::Initiator5, Some(msg)) => initiator_send_auth(handle, ctx, msg).map(Some),
        (MainModeState::Responder6, Some(msg)) => {
            responder_verify_auth(handle, ctx, msg).map(Some)
        }
        (MainModeState::Initiator7, Some(msg)) => {
            initiator_verify_auth(handle, ctx, msg).map(|()| None)
        }
        (MainModeState::Initiator1, Some(_)) => Err(Error::UnexpectedMessage(
            "Initiator has not sent its proposal yet".into(),
        )),
        (state, _) => Err(Error::UnexpectedMessage(format!(
            "{} needs an inbound message",
            state
        ))),
    }
}

/// State-specific header checks
fn check_header(handle: &mut Phase1Handle, header: &IsakmpHeader) -> Result<()> {
    let encrypted = header.flags.is_encrypted();

    match handle.state {
        MainModeState::Responder2 => {
            if header.next_payload != PayloadType::SA.to_u8() {
                return Err(Error::UnexpectedPayload(header.next_payload));
            }
            if header.has_responder_cookie() {
                return Err(Error::InvalidCookie);
            }
        }
        MainModeState::Initiator1 | MainModeState::Complete => return Ok(()),
        _ => {
            // written once in state 3; must never change afterwards
            handle.sa.cookies.set_rcookie(header.responder_cookie)?;
        }
    }

    if encrypted != handle.state.expects_encryption() {
        return Err(Error::InvalidFlags(header.flags.value()));
    }
    Ok(())
}

/// State 1: send our proposal
fn initiator_send_sa(handle: &mut Phase1Handle, ctx: &mut StateContext<'_>) -> Result<Vec<u8>> {
    let sa = construct_proposal(ctx.policy)?;
    let body = sa.to_payload_data();

    let mut message = outbound(handle, 0);
    message.push(PayloadType::SA, body.clone());
    let datagram = message.to_bytes()?;

    handle.scratch_mut()?.sa_body = Some(body);
    arm_phase1_timeout(handle, ctx);
    debug!(
        icookie = %hex::encode(handle.sa.cookies.icookie()),
        transforms = ctx.policy.transforms.len(),
        "proposal built"
    );
    send(handle, ctx, None, datagram)
}

/// State 2: select a transform and register the SA
fn responder_select_sa(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: &Inbound<'_>,
) -> Result<Vec<u8>> {
    let message = Message::from_bytes(inbound.data)?;
    let sa_body = message
        .payload_body(PayloadType::SA)
        .ok_or(Error::MissingPayload("SA"))?;

    let offered = SaPayload::from_payload_data(sa_body)?;
    let selected = select_proposal(&offered, ctx.policy)?;
    let attributes = convert_attributes(verify_selection_sa(&selected)?)?;
    logging::log_proposal_selected(&handle.sa.cookies.icookie(), &attributes);

    let auth = auth_parameters(
        ctx.policy,
        attributes.auth_method,
        None,
        handle.sa.remote.ip(),
    )?;

    handle.sa.cookies.set_rcookie(generate_cookie())?;
    handle.sa.attributes = Some(attributes);
    ctx.sadb.insert(SaRecord::negotiating(&handle.sa))?;
    handle.registered = true;

    let scratch = handle.scratch_mut()?;
    scratch.auth = Some(auth);
    scratch.sa_body = Some(sa_body.to_vec());

    let mut reply = outbound(handle, 0);
    reply.push(PayloadType::SA, selected.to_payload_data());
    let datagram = reply.to_bytes()?;

    arm_phase1_timeout(handle, ctx);
    send(handle, ctx, Some(inbound.digest), datagram)
}

/// State 3: check the Responder's selection, send KE and nonce
fn initiator_key_exchange(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: &Inbound<'_>,
) -> Result<Vec<u8>> {
    let message = Message::from_bytes(inbound.data)?;
    let icookie = handle.sa.cookies.icookie();
    ctx.sadb.set_rcookie(&icookie, handle.sa.cookies.rcookie())?;

    let body = message
        .payload_body(PayloadType::SA)
        .ok_or(Error::MissingPayload("SA"))?;
    let selection = SaPayload::from_payload_data(body)?;
    let transform = verify_selection_sa(&selection)?;
    let attributes = convert_attributes(transform).map_err(|err| {
        debug!(icookie = %hex::encode(icookie), error = %err, "selected transform unusable");
        Error::ProposalTampered
    })?;
    verify_attributes(&attributes, ctx.policy)?;
    logging::log_proposal_selected(&icookie, &attributes);

    let auth = auth_parameters(
        ctx.policy,
        attributes.auth_method,
        None,
        handle.sa.remote.ip(),
    )?;
    let dh = DhKeyPair::generate(attributes.group);
    let nonce = generate_nonce(ctx.config.nonce_len);

    let mut reply = outbound(handle, 0);
    push_key_exchange(&mut reply, &dh, &nonce);
    let datagram = reply.to_bytes()?;

    handle.sa.attributes = Some(attributes);
    let scratch = handle.scratch_mut()?;
    scratch.auth = Some(auth);
    scratch.dh = Some(dh);
    scratch.nonce = Some(nonce);

    send(handle, ctx, Some(inbound.digest), datagram)
}

/// State 4: store the Initiator's KE and nonce, answer with ours
fn responder_key_exchange(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: &Inbound<'_>,
) -> Result<Vec<u8>> {
    let message = Message::from_bytes(inbound.data)?;
    let (peer_public, peer_nonce) = read_key_exchange(&message)?;

    let attributes = *handle.sa.attributes()?;
    let dh = DhKeyPair::generate(attributes.group);
    let nonce = generate_nonce(ctx.config.nonce_len);

    let mut reply = outbound(handle, 0);
    push_key_exchange(&mut reply, &dh, &nonce);
    if attributes.auth_method == AuthMethod::RsaSignatures
        && cert_exchange::inband_enabled(ctx.policy)
    {
        reply.push(
            PayloadType::CR,
            cert_exchange::generate_certreq(ctx.policy)?.to_payload_data(),
        );
    }
    let datagram = reply.to_bytes()?;

    let scratch = handle.scratch_mut()?;
    scratch.dh = Some(dh);
    scratch.nonce = Some(nonce);
    scratch.peer_public = Some(peer_public);
    scratch.peer_nonce = Some(peer_nonce);

    // rejects a bad peer public value before anything goes out
    derive_keys(handle)?;
    send(handle, ctx, Some(inbound.digest), datagram)
}

/// State 5: store the Responder's KE and nonce, send our identity
fn initiator_send_auth(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: &Inbound<'_>,
) -> Result<Vec<u8>> {
    let message = Message::from_bytes(inbound.data)?;
    let (peer_public, peer_nonce) = read_key_exchange(&message)?;
    let certreq = read_certreq(&message)?;

    let scratch = handle.scratch_mut()?;
    scratch.peer_public = Some(peer_public);
    scratch.peer_nonce = Some(peer_nonce);
    scratch.certreq_received |= certreq;

    derive_keys(handle)?;

    let (datagram, ciphertext) = build_auth_message(handle, ctx)?;
    let sent = send(handle, ctx, Some(inbound.digest), datagram)?;
    handle.sa.keys_mut()?.advance_iv(&ciphertext)?;
    Ok(sent)
}

/// State 6: verify the Initiator, send our identity
fn responder_verify_auth(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: &Inbound<'_>,
) -> Result<Vec<u8>> {
    let body = message_body(&inbound.header, inbound.data)?;
    let message = decrypt(handle.sa.keys()?, &inbound.header, body)?;
    verify_peer(handle, ctx, &message)?;
    handle.sa.keys_mut()?.advance_iv(body)?;

    let (datagram, ciphertext) = build_auth_message(handle, ctx)?;
    let sent = send(handle, ctx, Some(inbound.digest), datagram)?;
    handle.sa.keys_mut()?.advance_iv(&ciphertext)?;
    Ok(sent)
}

/// State 7: verify the Responder
fn initiator_verify_auth(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: &Inbound<'_>,
) -> Result<()> {
    let body = message_body(&inbound.header, inbound.data)?;
    let message = decrypt(handle.sa.keys()?, &inbound.header, body)?;
    verify_peer(handle, ctx, &message)?;
    handle.sa.keys_mut()?.advance_iv(body)
}

fn outbound(handle: &Phase1Handle, flags: u8) -> OutboundMessage {
    OutboundMessage::new(IsakmpHeader::main_mode(
        handle.sa.cookies.icookie(),
        handle.sa.cookies.rcookie(),
        HeaderFlags::new(flags),
    ))
}

fn push_key_exchange(message: &mut OutboundMessage, dh: &DhKeyPair, nonce: &[u8]) {
    message.push(
        PayloadType::KE,
        KePayload {
            key_data: dh.public().to_vec(),
        }
        .to_payload_data(),
    );
    message.push(
        PayloadType::Nonce,
        NoncePayload {
            nonce: nonce.to_vec(),
        }
        .to_payload_data(),
    );
}

fn read_key_exchange(message: &Message) -> Result<(Vec<u8>, Vec<u8>)> {
    let ke = message
        .payload_body(PayloadType::KE)
        .ok_or(Error::MissingPayload("KE"))?;
    let nonce = message
        .payload_body(PayloadType::Nonce)
        .ok_or(Error::MissingPayload("Nonce"))?;

    let ke = KePayload::from_payload_data(ke)?;
    let nonce = NoncePayload::from_payload_data(nonce)?;
    Ok((ke.key_data, nonce.nonce))
}

/// Whether the message carries a CERT-REQUEST we can satisfy
fn read_certreq(message: &Message) -> Result<bool> {
    for payload in message.find_all(PayloadType::CR) {
        let request = CertReqPayload::from_payload_data(&payload.body)?;
        if cert_exchange::certreq_supported(&request) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Decrypt and decode an ID/HASH message
///
/// A wrong SKEYID_e only shows up as an undecodable body, so any failure
/// here is reported as `AuthenticationFailed`.
fn decrypt(keys: &Phase1Keys, header: &IsakmpHeader, body: &[u8]) -> Result<Message> {
    keys.decrypt(body)
        .and_then(|plaintext| Message::from_decrypted(header.clone(), &plaintext))
        .map_err(|_| {
            debug!(icookie = %hex::encode(header.initiator_cookie), "encrypted body did not decode");
            Error::AuthenticationFailed
        })
}

/// Compute the shared secret and run the key schedule
fn derive_keys(handle: &mut Phase1Handle) -> Result<()> {
    let (sa, scratch) = handle.split_mut()?;
    let dh = scratch.dh()?;
    let own_nonce = scratch.nonce()?;
    let peer_nonce = scratch.peer_nonce()?;
    let peer_public = scratch.peer_public()?;
    let shared = dh.compute_shared(peer_public)?;

    let (nonce_i, nonce_r, public_i, public_r) = match sa.role {
        Role::Initiator => (own_nonce, peer_nonce, dh.public(), peer_public),
        Role::Responder => (peer_nonce, own_nonce, peer_public, dh.public()),
    };
    let secret = match scratch.auth()? {
        AuthParams::PresharedKey(key) => SkeyidSecret::PresharedKey(key.as_slice()),
        AuthParams::Signature(_) => SkeyidSecret::Signature,
    };

    let icookie = sa.cookies.icookie();
    let rcookie = sa.cookies.rcookie();
    let keys = Phase1Keys::derive(
        sa.attributes()?,
        &KeyExchangeInputs {
            secret,
            nonce_i,
            nonce_r,
            shared: &shared,
            icookie: &icookie,
            rcookie: &rcookie,
            public_i,
            public_r,
        },
    )?;
    sa.keys = Some(keys);
    Ok(())
}

/// Build the encrypted ID [CR] [CERT] HASH|SIG message
///
/// Returns the datagram and its ciphertext body for the IV chain.
fn build_auth_message(handle: &Phase1Handle, ctx: &StateContext<'_>) -> Result<(Vec<u8>, Vec<u8>)> {
    let policy = ctx.policy;
    let local = handle
        .sa
        .local
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::InvalidState("local address unknown".into()))?;
    let scratch = handle.scratch()?;
    let auth = scratch.auth()?;

    let mut message = outbound(handle, HeaderFlags::ENCRYPTION);
    let id_body = generate_id_data(policy, auth, local)?.to_payload_data();
    message.push(PayloadType::ID, id_body.clone());

    if let AuthParams::Signature(credentials) = auth {
        if handle.role() == Role::Initiator && cert_exchange::inband_enabled(policy) {
            message.push(
                PayloadType::CR,
                cert_exchange::generate_certreq(policy)?.to_payload_data(),
            );
        }
        if policy.flags.contains(PolicyFlags::SEND_CERT_PROACTIVELY) || scratch.certreq_received {
            message.push(
                PayloadType::CERT,
                cert_exchange::generate_cert(credentials)?.to_payload_data(),
            );
        }
    }

    let keys = handle.sa.keys()?;
    let inputs = HashInputs {
        sender_public: scratch.dh()?.public(),
        receiver_public: scratch.peer_public()?,
        cookies: &handle.sa.cookies,
        sa_body: scratch.sa_body()?,
        id_body: &id_body,
    };
    let (kind, proof) = generate_hash_data(keys, auth, &inputs)?;
    message.push(kind, proof);

    let ciphertext = keys.encrypt(&message.payload_chain()?)?;
    let datagram = message.assemble(&ciphertext)?;
    Ok((datagram, ciphertext))
}

/// Check the peer's ID and HASH / SIG
fn verify_peer(handle: &mut Phase1Handle, ctx: &StateContext<'_>, message: &Message) -> Result<()> {
    let policy = ctx.policy;
    let id_body = message
        .payload_body(PayloadType::ID)
        .ok_or(Error::MissingPayload("ID"))?;
    let certreq = read_certreq(message)?;

    let (peer_id, certificate) = {
        let scratch = handle.scratch()?;
        let auth = scratch.auth()?;

        let (proof, certificate) = match auth {
            AuthParams::PresharedKey(_) => (
                message
                    .payload_body(PayloadType::HASH)
                    .ok_or(Error::MissingPayload("HASH"))?,
                None,
            ),
            AuthParams::Signature(_) => {
                let signature = message
                    .payload_body(PayloadType::SIG)
                    .ok_or(Error::MissingPayload("SIG"))?;
                let inband = message
                    .payload_body(PayloadType::CERT)
                    .map(CertPayload::from_payload_data)
                    .transpose()?;
                let certificate = cert_exchange::peer_certificate(policy, inband.as_ref())?;
                (signature, Some(certificate))
            }
        };

        let inputs = HashInputs {
            sender_public: scratch.peer_public()?,
            receiver_public: scratch.dh()?.public(),
            cookies: &handle.sa.cookies,
            sa_body: scratch.sa_body()?,
            id_body,
        };
        let peer_id = verify_auth_data(
            policy,
            handle.sa.keys()?,
            &inputs,
            &PeerProof {
                auth,
                id_body,
                proof,
                certificate: certificate.as_ref(),
                peer_addr: handle.sa.remote.ip(),
            },
        )?;
        (peer_id, certificate)
    };

    handle.sa.peer_id = Some(peer_id);
    let scratch = handle.scratch_mut()?;
    scratch.peer_id_body = Some(id_body.to_vec());
    scratch.peer_certificate = certificate;
    scratch.certreq_received |= certreq;
    Ok(())
}

fn arm_phase1_timeout(handle: &Phase1Handle, ctx: &mut StateContext<'_>) {
    ctx.timers.set(
        TimerKey::new(TimerKind::Phase1Timeout, handle.sa.cookies.icookie()),
        ctx.now,
        ctx.config.phase1_timeout,
    );
}

/// Hand a datagram to the transport and remember it for resends
///
/// The inbound digest is only recorded once the answer is out.
fn send(
    handle: &mut Phase1Handle,
    ctx: &mut StateContext<'_>,
    inbound: Option<MessageDigest>,
    datagram: Vec<u8>,
) -> Result<Vec<u8>> {
    ctx.transport.send(handle.sa.remote, &datagram)?;

    let icookie = handle.sa.cookies.icookie();
    logging::log_message_send(&icookie, handle.state, handle.sa.remote, datagram.len());
    handle.record_exchange(inbound, datagram.clone());
    ctx.timers.set(
        TimerKey::new(TimerKind::MessageResend, icookie),
        ctx.now,
        ctx.config.resend_interval,
    );
    Ok(datagram)
}

/// Send the last outbound message again
pub fn resend_last(
    handle: &Phase1Handle,
    transport: &mut dyn Transport,
    trigger: &str,
) -> Result<Vec<u8>> {
    let datagram = handle
        .last_outbound()
        .ok_or_else(|| Error::InvalidState("nothing sent yet".into()))?
        .to_vec();
    transport.send(handle.sa.remote, &datagram)?;
    logging::log_retransmission(
        &handle.sa.cookies.icookie(),
        handle.sa.remote,
        trigger,
        handle.resends,
    );
    Ok(datagram)
}

/// Publish the established SA
fn finalize(handle: &mut Phase1Handle, ctx: &mut StateContext<'_>) -> Result<()> {
    let icookie = handle.sa.cookies.icookie();
    ctx.timers.cancel(TimerKey::new(TimerKind::MessageResend, icookie));
    ctx.timers.cancel(TimerKey::new(TimerKind::Phase1Timeout, icookie));
    handle.release_scratch();

    let keys = handle
        .sa
        .keys
        .take()
        .ok_or_else(|| Error::Internal("Phase 1 keys missing at completion".into()))?;
    let attributes = *handle.sa.attributes()?;

    let waiters = ctx.sadb.establish(EstablishedSa {
        cookies: handle.sa.cookies,
        role: handle.role(),
        remote: handle.sa.remote,
        attributes,
        keys: Arc::new(keys),
        peer_id: handle.sa.peer_id.clone(),
        established_at: ctx.now,
    })?;

    ctx.timers.set(
        TimerKey::new(TimerKind::SaLifetime, icookie),
        ctx.now,
        Duration::from_secs(u64::from(attributes.lifetime_secs())),
    );
    for waiter in waiters {
        waiter.resume(Phase1Status::Established);
    }

    logging::log_exchange_complete(
        &handle.sa.cookies,
        handle.role(),
        handle.sa.remote,
        ctx.now.saturating_duration_since(handle.started_at),
    );
    Ok(())
}

/// Tear down a failed exchange
///
/// Every timer is cancelled and the scratch dropped at once. Phase 2
/// waiters are resumed with `err`. A registered SA is marked deleted and
/// queued for removal; an unregistered one is left for the caller to drop.
pub fn abort(
    handle: &mut Phase1Handle,
    sadb: &SaDatabase,
    timers: &mut dyn TimerService,
    events: &mut EventQueue,
    err: &Error,
) {
    let icookie = handle.sa.cookies.icookie();
    logging::log_exchange_failed(&icookie, handle.role(), handle.state, err);

    timers.cancel_all(&icookie);
    handle.release_scratch();
    handle.sa.keys = None;
    handle.deleted = true;

    if !handle.registered {
        return;
    }

    match sadb.mark_deleted(&icookie) {
        Ok(waiters) => {
            for waiter in waiters {
                waiter.resume(Phase1Status::Failed(err.clone()));
            }
        }
        Err(e) => warn!(icookie = %hex::encode(icookie), error = %e, "unable to mark SA deleted"),
    }
    events.push(SaEvent::RemoveSa {
        policy: handle.sa.policy.clone(),
        icookie,
        reason: RemovalReason::Aborted,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::config::PolicyTransform;
    use crate::ipsec::crypto::DhGroup;
    use crate::ipsec::ikev1::constants::{EncryptionAlgorithm, HashAlgorithm};
    use crate::ipsec::ikev1::identity::Identifier;
    use crate::ipsec::ikev1::sa::{CookiePair, IkeSa};
    use crate::ipsec::sadb::{Phase2Waiter, SaState};
    use crate::ipsec::timer::TimerWheel;
    use oakley_platform::QueuedTransport;

    struct Side {
        policy: Policy,
        sadb: SaDatabase,
        config: EngineConfig,
        transport: QueuedTransport,
        timers: TimerWheel,
        events: EventQueue,
        addr: SocketAddr,
    }

    impl Side {
        fn new(addr: &str, peer: &str, psk: &[u8]) -> Self {
            let addr: SocketAddr = addr.parse().unwrap();
            let peer: SocketAddr = peer.parse().unwrap();
            let policy = Policy::builder("test")
                .with_transform(PolicyTransform::new(
                    EncryptionAlgorithm::AesCbc,
                    HashAlgorithm::Sha1,
                    AuthMethod::PreSharedKey,
                    DhGroup::Modp1024,
                ))
                .with_preshared_key(Identifier::from(peer.ip()), psk.to_vec())
                .build()
                .unwrap();
            Side {
                policy,
                sadb: SaDatabase::new(),
                config: EngineConfig::default(),
                transport: QueuedTransport::new(),
                timers: TimerWheel::new(),
                events: EventQueue::new(),
                addr,
            }
        }

        fn run(&mut self, handle: &mut Phase1Handle, datagram: Option<&[u8]>) -> Result<Outcome> {
            let mut ctx = StateContext {
                policy: &self.policy,
                sadb: &self.sadb,
                config: &self.config,
                transport: &mut self.transport,
                timers: &mut self.timers,
                events: &mut self.events,
                now: Instant::now(),
                local: Some(self.addr),
            };
            process_main_mode(handle, &mut ctx, datagram)
        }

        fn last_sent(&mut self) -> Vec<u8> {
            self.transport.drain().pop().unwrap().data
        }
    }

    const I_ADDR: &str = "192.0.2.1:500";
    const R_ADDR: &str = "192.0.2.2:500";

    fn pair(i_psk: &[u8], r_psk: &[u8]) -> (Side, Side) {
        (Side::new(I_ADDR, R_ADDR, i_psk), Side::new(R_ADDR, I_ADDR, r_psk))
    }

    fn start(side: &mut Side) -> (Phase1Handle, Vec<u8>) {
        let sa = IkeSa::new(
            CookiePair::new(generate_cookie()),
            Role::Initiator,
            "test",
            R_ADDR.parse().unwrap(),
        );
        let mut handle = Phase1Handle::new(sa, Instant::now());
        side.sadb.insert(SaRecord::negotiating(&handle.sa)).unwrap();
        handle.registered = true;

        let out = side.run(&mut handle, None).unwrap();
        let Outcome::Continue(m1) = out else {
            panic!("unexpected outcome {:?}", out)
        };
        side.transport.drain();
        (handle, m1)
    }

    fn responder_for(m1: &[u8]) -> Phase1Handle {
        let header = IsakmpHeader::from_bytes(m1).unwrap();
        Phase1Handle::new(
            IkeSa::new(
                CookiePair::new(header.initiator_cookie),
                Role::Responder,
                "test",
                I_ADDR.parse().unwrap(),
            ),
            Instant::now(),
        )
    }

    fn continued(out: Result<Outcome>) -> Vec<u8> {
        match out.unwrap() {
            Outcome::Continue(m) => m,
            other => panic!("expected Continue, got {:?}", other),
        }
    }

    /// Runs messages 1..=5 and returns everything needed to finish
    fn run_to_message5(
        i: &mut Side,
        r: &mut Side,
    ) -> (Phase1Handle, Phase1Handle, Vec<u8>) {
        let (mut ih, m1) = start(i);
        let mut rh = responder_for(&m1);
        let m2 = continued(r.run(&mut rh, Some(&m1)));
        let m3 = continued(i.run(&mut ih, Some(&m2)));
        let m4 = continued(r.run(&mut rh, Some(&m3)));
        let m5 = continued(i.run(&mut ih, Some(&m4)));
        i.transport.drain();
        r.transport.drain();
        (ih, rh, m5)
    }

    #[test]
    fn test_psk_exchange_completes() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (mut ih, mut rh, m5) = run_to_message5(&mut i, &mut r);
        assert_eq!(ih.state, MainModeState::Initiator7);
        assert_eq!(rh.state, MainModeState::Responder6);

        let (waiter, mut rx) = Phase2Waiter::new(1);
        i.sadb.add_waiter(&ih.sa.cookies.icookie(), waiter).unwrap();

        assert_eq!(r.run(&mut rh, Some(&m5)).unwrap(), Outcome::Complete);
        let m6 = r.last_sent();
        assert_eq!(i.run(&mut ih, Some(&m6)).unwrap(), Outcome::Complete);

        assert!(ih.state.is_complete() && rh.state.is_complete());
        assert!(!ih.has_scratch() && !rh.has_scratch());

        let icookie = ih.sa.cookies.icookie();
        assert_eq!(i.sadb.state(&icookie), Some(SaState::Established));
        assert_eq!(r.sadb.state(&icookie), Some(SaState::Established));

        let i_sa = i.sadb.established(&icookie).unwrap();
        let r_sa = r.sadb.established(&icookie).unwrap();
        assert_eq!(i_sa.keys.skeyid_d(), r_sa.keys.skeyid_d());
        assert_eq!(i_sa.keys.iv(), r_sa.keys.iv());
        assert_eq!(i_sa.peer_id, Some(Identifier::from(R_ADDR.parse::<SocketAddr>().unwrap().ip())));

        assert_eq!(rx.try_recv().unwrap(), Phase1Status::Established);

        // only the lifetime timer survives completion
        assert!(i.timers.is_set(TimerKey::new(TimerKind::SaLifetime, icookie)));
        assert!(!i.timers.is_set(TimerKey::new(TimerKind::MessageResend, icookie)));
        assert!(!r.timers.is_set(TimerKey::new(TimerKind::Phase1Timeout, icookie)));
    }

    #[test]
    fn test_duplicate_is_resent_not_reprocessed() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (_ih, m1) = start(&mut i);
        let mut rh = responder_for(&m1);

        let m2 = continued(r.run(&mut rh, Some(&m1)));
        let rcookie = rh.sa.cookies.rcookie();

        assert_eq!(
            r.run(&mut rh, Some(&m1)).unwrap(),
            Outcome::Retransmitted(m2.clone())
        );
        assert_eq!(rh.state, MainModeState::Responder4);
        assert_eq!(rh.sa.cookies.rcookie(), rcookie);
        assert_eq!(r.sadb.len(), 1);
    }

    #[test]
    fn test_final_message_resent_after_completion() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (mut ih, mut rh, m5) = run_to_message5(&mut i, &mut r);

        assert_eq!(r.run(&mut rh, Some(&m5)).unwrap(), Outcome::Complete);
        let m6 = r.last_sent();
        assert_eq!(
            r.run(&mut rh, Some(&m5)).unwrap(),
            Outcome::Retransmitted(m6.clone())
        );

        assert_eq!(i.run(&mut ih, Some(&m6)).unwrap(), Outcome::Complete);
        // the Initiator sent nothing in state 7, so this is a new message
        assert!(matches!(
            i.run(&mut ih, Some(&m6)),
            Err(Error::UnexpectedMessage(_))
        ));
        assert_eq!(
            i.sadb.state(&ih.sa.cookies.icookie()),
            Some(SaState::Established)
        );
    }

    #[test]
    fn test_psk_mismatch_aborts_responder() {
        let (mut i, mut r) = pair(b"secret", b"other");
        let (_ih, mut rh, m5) = run_to_message5(&mut i, &mut r);
        let icookie = rh.sa.cookies.icookie();

        let (waiter, mut rx) = Phase2Waiter::new(9);
        r.sadb.add_waiter(&icookie, waiter).unwrap();

        // wrong key means wrong SKEYID_e, so message 5 decrypts to garbage
        assert_eq!(
            r.run(&mut rh, Some(&m5)).unwrap(),
            Outcome::Failed(Error::AuthenticationFailed)
        );
        assert!(rh.deleted);
        assert!(r.transport.is_empty());
        assert!(r.timers.is_empty());
        assert_eq!(r.sadb.state(&icookie), Some(SaState::Deleted));
        assert_eq!(
            rx.try_recv().unwrap(),
            Phase1Status::Failed(Error::AuthenticationFailed)
        );
        assert!(r.events.is_pending(&icookie));

        assert!(matches!(
            r.run(&mut rh, Some(&m5)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_hash_r_mismatch_aborts_initiator() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (mut ih, mut rh, m5) = run_to_message5(&mut i, &mut r);
        let icookie = ih.sa.cookies.icookie();

        let (waiter, mut rx) = Phase2Waiter::new(2);
        i.sadb.add_waiter(&icookie, waiter).unwrap();

        assert_eq!(r.run(&mut rh, Some(&m5)).unwrap(), Outcome::Complete);
        let m6 = r.last_sent();

        // HASH_R covers SAi_b, so a different offer on our side breaks it
        let sa_body = ih.scratch_mut().unwrap().sa_body.as_mut().unwrap();
        sa_body[0] ^= 0xff;

        assert_eq!(
            i.run(&mut ih, Some(&m6)).unwrap(),
            Outcome::Failed(Error::AuthenticationFailed)
        );
        assert_eq!(i.sadb.state(&icookie), Some(SaState::Deleted));
        assert_eq!(
            rx.try_recv().unwrap(),
            Phase1Status::Failed(Error::AuthenticationFailed)
        );
    }

    #[test]
    fn test_duplicate_key_exchange_keeps_dh_pair() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (mut ih, m1) = start(&mut i);
        let mut rh = responder_for(&m1);
        let m2 = continued(r.run(&mut rh, Some(&m1)));
        let m3 = continued(i.run(&mut ih, Some(&m2)));

        let m4 = continued(r.run(&mut rh, Some(&m3)));
        let r_public = rh.scratch().unwrap().dh().unwrap().public().to_vec();
        assert_eq!(rh.state, MainModeState::Responder6);
        assert_eq!(
            r.run(&mut rh, Some(&m3)).unwrap(),
            Outcome::Retransmitted(m4.clone())
        );
        assert_eq!(rh.state, MainModeState::Responder6);
        assert_eq!(rh.scratch().unwrap().dh().unwrap().public(), &r_public[..]);

        let m5 = continued(i.run(&mut ih, Some(&m4)));
        let i_public = ih.scratch().unwrap().dh().unwrap().public().to_vec();
        let iv = ih.sa.keys().unwrap().iv().to_vec();
        assert_eq!(ih.state, MainModeState::Initiator7);
        assert_eq!(
            i.run(&mut ih, Some(&m4)).unwrap(),
            Outcome::Retransmitted(m5)
        );
        assert_eq!(ih.state, MainModeState::Initiator7);
        assert_eq!(ih.scratch().unwrap().dh().unwrap().public(), &i_public[..]);
        assert_eq!(ih.sa.keys().unwrap().iv(), &iv[..]);
    }

    #[test]
    fn test_bad_public_value_gets_no_reply() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (mut ih, m1) = start(&mut i);
        let mut rh = responder_for(&m1);
        let m2 = continued(r.run(&mut rh, Some(&m1)));
        let mut m3 = continued(i.run(&mut ih, Some(&m2)));
        r.transport.drain();

        // KE is the first payload; zero its public value
        let len = DhGroup::Modp1024.prime_len();
        m3[32..32 + len].fill(0);

        assert!(matches!(
            r.run(&mut rh, Some(&m3)).unwrap(),
            Outcome::Failed(Error::CryptoError(_))
        ));
        assert!(r.transport.is_empty());
        assert!(rh.deleted);
    }

    #[test]
    fn test_header_rejects_leave_exchange_alone() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (_ih, m1) = start(&mut i);
        let mut rh = responder_for(&m1);

        let mut auth_only = m1.clone();
        auth_only[19] |= HeaderFlags::AUTH_ONLY;
        assert_eq!(
            r.run(&mut rh, Some(&auth_only)),
            Err(Error::InvalidFlags(HeaderFlags::AUTH_ONLY))
        );

        let mut with_id = m1.clone();
        with_id[23] = 1;
        assert_eq!(
            r.run(&mut rh, Some(&with_id)),
            Err(Error::InvalidMessageId(1))
        );

        assert_eq!(rh.state, MainModeState::Responder2);
        assert!(!rh.deleted);
        continued(r.run(&mut rh, Some(&m1)));
    }

    #[test]
    fn test_state_checks_abort() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (_ih, m1) = start(&mut i);

        // first message claiming a responder cookie
        let mut rh = responder_for(&m1);
        let mut bad = m1.clone();
        bad[8] = 1;
        assert_eq!(
            r.run(&mut rh, Some(&bad)).unwrap(),
            Outcome::Failed(Error::InvalidCookie)
        );
        assert!(rh.deleted && !rh.registered);
        assert!(r.sadb.is_empty());

        // first message with the encryption flag
        let mut rh = responder_for(&m1);
        let mut bad = m1.clone();
        bad[19] |= HeaderFlags::ENCRYPTION;
        assert_eq!(
            r.run(&mut rh, Some(&bad)).unwrap(),
            Outcome::Failed(Error::InvalidFlags(HeaderFlags::ENCRYPTION))
        );
    }

    #[test]
    fn test_missing_message() {
        let (mut i, mut r) = pair(b"secret", b"secret");
        let (mut ih, m1) = start(&mut i);
        let mut rh = responder_for(&m1);

        assert!(matches!(
            r.run(&mut rh, None).unwrap(),
            Outcome::Failed(Error::UnexpectedMessage(_))
        ));
        assert!(matches!(
            i.run(&mut ih, None).unwrap(),
            Outcome::Failed(Error::UnexpectedMessage(_))
        ));
        assert!(i.events.is_pending(&ih.sa.cookies.icookie()));
    }
}
