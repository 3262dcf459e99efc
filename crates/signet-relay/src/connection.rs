//! Per-connection task: handshake, then a read/write/liveness loop that
//! never inspects payloads beyond the minimum needed to route (§4.E — the
//! relay only ever sees opaque envelopes). Grounded on the teacher's
//! per-route task plus its `tokio::sync::mpsc` shutdown pattern in
//! `main.rs`, generalized from a Veilid route to one WebSocket connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use serde::Deserialize;
use signet_crypto::Config;
use signet_protocol::envelope::{build_frame, parse_frame};
use signet_protocol::messages::{ClientHelloPayload, ErrorPayload, ServerHelloPayload};
use signet_protocol::transport::Transport;
use signet_protocol::wire::{self, EnvelopeType};
use signet_protocol::TransportError;

use crate::broker::{Broker, ClientHandle, ClientState};
use crate::error::RelayError;
use crate::transport_axum::AxumWsTransport;

/// Minimal shape shared by every routable payload: just enough to find a
/// destination and a correlation id, without deserializing (let alone
/// verifying) the rest. `chat`/`key_exchange` carry `id`; `ack` carries
/// `message_id` instead — either is accepted as the envelope's reference.
#[derive(Deserialize)]
struct RoutingPeek {
    payload: RoutingTarget,
}

#[derive(Deserialize)]
struct RoutingTarget {
    to: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

struct RoutingInfo {
    to: String,
    reference: String,
}

fn peek_routing(payload_bytes: &[u8]) -> Result<RoutingInfo, TransportError> {
    let peek: RoutingPeek = serde_json::from_slice(payload_bytes)
        .map_err(|e| TransportError::Malformed(format!("unroutable payload: {e}")))?;
    let reference = peek.payload.id.or(peek.payload.message_id).unwrap_or_default();
    Ok(RoutingInfo { to: peek.payload.to, reference })
}

/// Build an `error` frame answering `reference` (the originating envelope's
/// id, or empty when the frame couldn't be parsed that far) with `err`'s
/// code (§4.E: "answers the sender with `error{code=UserOffline,
/// ref=envelope.id}`").
fn error_frame(err: &RelayError, reference: &str) -> Result<Vec<u8>, TransportError> {
    build_frame(
        EnvelopeType::Error,
        &ErrorPayload { code: err.code().into(), reference: reference.into(), message: err.to_string() },
    )
}

pub async fn handle_connection(socket: WebSocket, addr: String, broker: Arc<Broker>) {
    let transport = AxumWsTransport::new(socket);

    if let Err(e) = run(transport, broker, &addr).await {
        tracing::debug!(addr = %addr, error = %e, "connection ended");
    }
}

async fn run(mut transport: impl Transport, broker: Arc<Broker>, addr: &str) -> Result<(), RelayError> {
    let cfg = Config::global();
    let read_deadline = Duration::from_secs(cfg.relay_idle_timeout_secs);

    let (_conn_id, handle, mut outbound_rx) = broker.register();

    if let Err(e) = handshake(&mut transport, &broker, &handle, read_deadline).await {
        tracing::info!(addr = %addr, error = %e, "handshake failed");
        broker.remove(&handle);
        return Err(e);
    }
    tracing::info!(addr = %addr, user_id = ?handle.user_id(), "client authenticated");

    let result = serve(
        &mut transport,
        &broker,
        &handle,
        &mut outbound_rx,
        cfg.relay_ping_interval_secs,
        cfg.relay_idle_timeout_secs,
    )
    .await;
    broker.remove(&handle);
    result
}

/// Drive the `client_hello` / `server_hello` / signed-`client_hello`
/// challenge-response exchange (§9 open question resolution).
async fn handshake(
    transport: &mut impl Transport,
    broker: &Broker,
    handle: &Arc<ClientHandle>,
    deadline: Duration,
) -> Result<(), RelayError> {
    let first = transport.recv_frame(deadline).await?.ok_or(TransportError::Closed)?;
    let hello: ClientHelloPayload = parse_frame(EnvelopeType::ClientHello, &first)?;
    if hello.challenge_signature.is_some() {
        return Err(TransportError::Malformed("first client_hello must not carry a challenge signature".into()).into());
    }

    let server_hello = build_frame(EnvelopeType::ServerHello, &ServerHelloPayload { challenge: handle.challenge })?;
    transport.send_frame(server_hello).await?;

    let second = transport.recv_frame(deadline).await?.ok_or(TransportError::Closed)?;
    let response: ClientHelloPayload = parse_frame(EnvelopeType::ClientHello, &second)?;
    let signature = response
        .challenge_signature
        .ok_or_else(|| TransportError::Malformed("missing challenge signature".into()))?;

    broker.authenticate(handle, response.user_id, response.identity_sig_pub, signature).map_err(|e| {
        broker.record_auth_failure();
        e
    })
}

/// Main read/write/liveness loop, entered only once `handle` is `AUTHENTICATED`.
///
/// Liveness is two independent clocks: every `ping_interval_secs` of
/// inbound silence draws a `ping`, but the connection is only actually
/// closed once `idle_timeout_secs` passes with no inbound frame at all
/// (§4.E Liveness) — the recv deadline shrinks towards that second bound
/// as it approaches so the close happens close to on time, not after an
/// extra full ping cycle.
async fn serve(
    transport: &mut impl Transport,
    broker: &Broker,
    handle: &Arc<ClientHandle>,
    outbound_rx: &mut tokio::sync::mpsc::Receiver<Vec<u8>>,
    ping_interval_secs: u64,
    idle_timeout_secs: u64,
) -> Result<(), RelayError> {
    let ping_interval = Duration::from_secs(ping_interval_secs);
    let idle_timeout = Duration::from_secs(idle_timeout_secs);

    loop {
        let idle = handle.idle_for();
        if idle >= idle_timeout {
            tracing::info!(user_id = ?handle.user_id(), "closing connection after idle timeout");
            return Ok(());
        }
        let recv_deadline = ping_interval.min(idle_timeout - idle);

        tokio::select! {
            biased;

            () = handle.superseded.notified() => {
                let err = RelayError::Superseded;
                let frame = error_frame(&err, "")?;
                let _ = transport.send_frame(frame).await;
                return Err(err);
            }

            maybe_out = outbound_rx.recv() => {
                match maybe_out {
                    Some(frame) => transport.send_frame(frame).await?,
                    None => return Ok(()),
                }
            }

            received = transport.recv_frame(recv_deadline) => {
                match received {
                    Ok(Some(frame)) if frame.is_empty() => {
                        // WS-level control frame; no envelope to process.
                    }
                    Ok(Some(frame)) => {
                        handle.touch();
                        if let Err(e) = dispatch(transport, broker, handle, &frame).await {
                            tracing::info!(error = %e, "closing connection after protocol violation");
                            let reply = error_frame(&e, "")?;
                            let _ = transport.send_frame(reply).await;
                            return Ok(());
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(TransportError::Timeout) => {
                        let ping = build_frame(EnvelopeType::Ping, &())?;
                        transport.send_frame(ping).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

/// Route one inbound envelope, or handle it locally if it's a
/// protocol-level message (ping/pong) the relay itself answers.
///
/// Recoverable routing failures (`UserOffline`, `QueueFull`, `RateLimited`)
/// are answered with an `error` envelope carrying the originating frame's
/// id and then swallowed — the connection stays open, matching §4.E's
/// "signals `QueueFull` to the sender" / S6's `error{code=UserOffline,
/// ref=envelope.id}`. Anything else (an unrecognized envelope type, a
/// malformed payload, a type that's invalid post-handshake) is returned as
/// `Err` so `serve` answers with `error` and closes the connection, per
/// §4.D: "Unknown types MUST be answered with `error` and the connection
/// closed."
async fn dispatch(
    transport: &mut impl Transport,
    broker: &Broker,
    handle: &Arc<ClientHandle>,
    frame: &[u8],
) -> Result<(), RelayError> {
    if handle.state() != ClientState::Authenticated {
        return Err(RelayError::NotAuthenticated);
    }

    let (header, payload) = wire::decode_frame(frame)?;

    match header.kind {
        EnvelopeType::Pong => Ok(()),
        EnvelopeType::Ping => {
            let pong = build_frame(EnvelopeType::Pong, &())?;
            transport.send_frame(pong).await?;
            Ok(())
        }
        EnvelopeType::Chat | EnvelopeType::KeyExchange | EnvelopeType::Ack => {
            let routing = peek_routing(payload)?;
            if let Err(e) = broker.check_rate(handle) {
                let reply = error_frame(&e, &routing.reference)?;
                transport.send_frame(reply).await?;
                return Ok(());
            }
            match broker.route(&routing.to, frame.to_vec()) {
                Ok(()) => Ok(()),
                Err(e @ (RelayError::UserOffline | RelayError::QueueFull)) => {
                    let reply = error_frame(&e, &routing.reference)?;
                    transport.send_frame(reply).await?;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        EnvelopeType::Presence => {
            // No destination to route to — the relay doesn't know a user's
            // contact graph. Presence only shows up indirectly, through
            // `/stats.authenticated_users`.
            Ok(())
        }
        EnvelopeType::ClientHello | EnvelopeType::ServerHello | EnvelopeType::Error => {
            Err(RelayError::Transport(TransportError::Malformed(format!(
                "{:?} is not valid after the handshake",
                header.kind
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use signet_crypto::{IdentityKeyPair, RatchetMessage};

    use super::*;

    struct MockTransport {
        inbound: VecDeque<Vec<u8>>,
        outbound: Vec<Vec<u8>>,
    }

    impl MockTransport {
        fn with_inbound(frames: Vec<Vec<u8>>) -> Self {
            Self { inbound: frames.into(), outbound: Vec::new() }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
            self.outbound.push(frame);
            Ok(())
        }

        async fn recv_frame(&mut self, _deadline: Duration) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(self.inbound.pop_front())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn client_hello_frame(user_id: &str, identity: &IdentityKeyPair, challenge_signature: Option<[u8; 64]>) -> Vec<u8> {
        build_frame(
            EnvelopeType::ClientHello,
            &ClientHelloPayload {
                user_id: user_id.into(),
                identity_sig_pub: identity.signing_public_bytes(),
                challenge_signature,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn handshake_succeeds_with_valid_challenge_response() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        let identity = IdentityKeyPair::generate();

        let first = client_hello_frame("alice", &identity, None);
        let signature = identity.sign(&handle.challenge).to_bytes();
        let second = client_hello_frame("alice", &identity, Some(signature));

        let mut transport = MockTransport::with_inbound(vec![first, second]);
        handshake(&mut transport, &broker, &handle, Duration::from_secs(1)).await.unwrap();

        assert_eq!(handle.state(), crate::broker::ClientState::Authenticated);
        assert_eq!(handle.user_id().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn handshake_rejects_forged_signature() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        let identity = IdentityKeyPair::generate();
        let impostor = IdentityKeyPair::generate();

        let first = client_hello_frame("alice", &identity, None);
        // Signed by a different key than the one advertised as `identity_sig_pub`.
        let bad_signature = impostor.sign(&handle.challenge).to_bytes();
        let second = client_hello_frame("alice", &identity, Some(bad_signature));

        let mut transport = MockTransport::with_inbound(vec![first, second]);
        assert!(handshake(&mut transport, &broker, &handle, Duration::from_secs(1)).await.is_err());
        assert_eq!(handle.state(), crate::broker::ClientState::Connected);
    }

    #[tokio::test]
    async fn dispatch_before_authentication_is_rejected() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        let mut transport = MockTransport::with_inbound(vec![]);

        let ping = build_frame(EnvelopeType::Ping, &()).unwrap();
        let result = dispatch(&mut transport, &broker, &handle, &ping).await;
        assert!(matches!(result, Err(RelayError::NotAuthenticated)));
    }

    fn authenticate(broker: &Broker, handle: &Arc<ClientHandle>, user_id: &str) {
        let identity = IdentityKeyPair::generate();
        let signature = identity.sign(&handle.challenge).to_bytes();
        broker
            .authenticate(handle, user_id.into(), identity.signing_public_bytes(), signature)
            .unwrap();
    }

    #[tokio::test]
    async fn dispatch_routes_chat_to_recipients_queue() {
        let broker = Broker::new();

        let (_, sender, _sender_rx) = broker.register();
        authenticate(&broker, &sender, "alice");

        let (_, _recipient, mut recipient_rx) = broker.register();
        authenticate(&broker, &_recipient, "bob");

        let chat = signet_protocol::messages::ChatPayload {
            id: "m1".into(),
            from: "alice".into(),
            to: "bob".into(),
            ratchet: RatchetMessage { dh_pub: [0u8; 32], n: 0, pn: 0, ciphertext: vec![1, 2, 3] },
            timestamp_ms: 0,
        };
        let frame = build_frame(EnvelopeType::Chat, &chat).unwrap();

        let mut transport = MockTransport::with_inbound(vec![]);
        dispatch(&mut transport, &broker, &sender, &frame).await.unwrap();

        let delivered = recipient_rx.try_recv().unwrap();
        assert_eq!(delivered, frame);
    }

    #[tokio::test]
    async fn dispatch_answers_ping_with_pong() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        authenticate(&broker, &handle, "carol");

        let ping = build_frame(EnvelopeType::Ping, &()).unwrap();
        let mut transport = MockTransport::with_inbound(vec![]);
        dispatch(&mut transport, &broker, &handle, &ping).await.unwrap();

        assert_eq!(transport.outbound.len(), 1);
        let (header, _) = wire::decode_frame(&transport.outbound[0]).unwrap();
        assert_eq!(header.kind, EnvelopeType::Pong);
    }

    #[test]
    fn peek_routing_reads_destination_and_id() {
        let chat = signet_protocol::messages::ChatPayload {
            id: "m1".into(),
            from: "alice".into(),
            to: "bob".into(),
            ratchet: RatchetMessage { dh_pub: [0u8; 32], n: 0, pn: 0, ciphertext: vec![] },
            timestamp_ms: 0,
        };
        let frame = build_frame(EnvelopeType::Chat, &chat).unwrap();
        let (_, payload) = wire::decode_frame(&frame).unwrap();
        let routing = peek_routing(payload).unwrap();
        assert_eq!(routing.to, "bob");
        assert_eq!(routing.reference, "m1");
    }

    #[tokio::test]
    async fn dispatch_answers_offline_recipient_with_error_and_ref() {
        let broker = Broker::new();
        let (_, sender, _sender_rx) = broker.register();
        authenticate(&broker, &sender, "alice");

        let chat = signet_protocol::messages::ChatPayload {
            id: "m1".into(),
            from: "alice".into(),
            to: "carol".into(),
            ratchet: RatchetMessage { dh_pub: [0u8; 32], n: 0, pn: 0, ciphertext: vec![1, 2, 3] },
            timestamp_ms: 0,
        };
        let frame = build_frame(EnvelopeType::Chat, &chat).unwrap();

        let mut transport = MockTransport::with_inbound(vec![]);
        dispatch(&mut transport, &broker, &sender, &frame).await.unwrap();

        assert_eq!(transport.outbound.len(), 1);
        let (header, payload) = wire::decode_frame(&transport.outbound[0]).unwrap();
        assert_eq!(header.kind, EnvelopeType::Error);
        let err: signet_protocol::messages::ErrorPayload = serde_json::from_slice(payload).unwrap();
        assert_eq!(err.code, "UserOffline");
        assert_eq!(err.reference, "m1");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_envelope_type() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        authenticate(&broker, &handle, "dave");

        let mut frame = build_frame(EnvelopeType::Ping, &()).unwrap();
        frame[10..12].copy_from_slice(&999u16.to_be_bytes());

        let mut transport = MockTransport::with_inbound(vec![]);
        let result = dispatch(&mut transport, &broker, &handle, &frame).await;
        assert!(matches!(
            result,
            Err(RelayError::Transport(TransportError::UnknownEnvelopeType(999)))
        ));
    }
}
