use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use betalift_core::ConversationId;
use betalift_protocol::{
    parse_envelope, Ack, ClientEvent, CorrelationId, Envelope, ProtocolError,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use super::{
    auth::{authenticate_with_token, handshake_token, AuthContext},
    core::{AppState, ConnectionControl, GATEWAY_PING_INTERVAL_SECS},
    errors::AuthFailure,
    gateway_events,
    handlers::{dispatch_request, UNKNOWN_EVENT_MESSAGE},
    ingress_rate_limit::IngressWindow,
    metrics::{
        record_gateway_event_dropped, record_gateway_event_emitted,
        record_gateway_event_parse_rejected, record_gateway_event_unknown_received,
        record_ws_disconnect, GATEWAY_DROP_REASON_FULL_QUEUE,
    },
    types::GatewayAuthQuery,
};

const POLICY_VIOLATION_CLOSE_CODE: u16 = 1008;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    ClientClose,
    SocketError,
    StreamEnded,
    EventTooLarge,
    IngressRateLimited,
    InvalidEnvelope,
    OutboundQueueFull,
    WriterStopped,
}

impl Disconnect {
    fn as_str(self) -> &'static str {
        match self {
            Self::ClientClose => "client_close",
            Self::SocketError => "socket_error",
            Self::StreamEnded => "connection_closed",
            Self::EventTooLarge => "event_too_large",
            Self::IngressRateLimited => "ingress_rate_limited",
            Self::InvalidEnvelope => "invalid_envelope",
            Self::OutboundQueueFull => "outbound_queue_full",
            Self::WriterStopped => "writer_stopped",
        }
    }
}

/// How the writer task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    SlowConsumer,
    Finished,
}

pub(crate) async fn gateway_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<GatewayAuthQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthFailure> {
    let token =
        handshake_token(query.token.as_deref(), &headers).ok_or(AuthFailure::MissingToken)?;
    let auth = authenticate_with_token(&state, token).inspect_err(|failure| {
        tracing::warn!(event = "gateway.handshake", outcome = failure.as_str());
    })?;
    tracing::info!(event = "gateway.handshake", outcome = "accepted", user_id = %auth.user_id);

    Ok(ws.on_upgrade(move |socket| async move {
        handle_gateway_connection(state, socket, auth).await;
    }))
}

/// Joins one room per conversation the user is in. A store failure leaves the
/// connection usable with no rooms.
async fn join_initial_rooms(
    state: &AppState,
    connection_id: Uuid,
    auth: &AuthContext,
) -> Vec<ConversationId> {
    let conversation_ids: Vec<ConversationId> = match state
        .services
        .store
        .conversations_for_user(&auth.user_id)
        .await
    {
        Ok(conversations) => conversations
            .into_iter()
            .map(|conversation| conversation.id)
            .collect(),
        Err(error) => {
            tracing::error!(
                event = "gateway.initial_rooms_failed",
                user_id = %auth.user_id,
                error = %error
            );
            Vec::new()
        }
    };
    state
        .rooms
        .join_rooms(connection_id, conversation_ids.iter())
        .await;
    conversation_ids
}

fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut control_rx: watch::Receiver<ConnectionControl>,
) -> JoinHandle<WriterExit> {
    tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(GATEWAY_PING_INTERVAL_SECS));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return WriterExit::Finished;
                    }
                }
                changed = control_rx.changed() => {
                    if changed.is_err() {
                        return WriterExit::Finished;
                    }
                    if *control_rx.borrow() == ConnectionControl::Close {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: POLICY_VIOLATION_CLOSE_CODE,
                                reason: "slow_consumer".into(),
                            })))
                            .await;
                        return WriterExit::SlowConsumer;
                    }
                }
                next = outbound_rx.recv() => {
                    let Some(payload) = next else {
                        return WriterExit::Finished;
                    };
                    if sink.send(Message::Text(payload.into())).await.is_err() {
                        return WriterExit::Finished;
                    }
                }
            }
        }
    })
}

/// Bytes of a data frame, `Ok(None)` for control frames to skip.
fn frame_bytes(message: Message, max_bytes: usize) -> Result<Option<Vec<u8>>, Disconnect> {
    let bytes = match message {
        Message::Text(text) => text.as_bytes().to_vec(),
        Message::Binary(bytes) => bytes.to_vec(),
        Message::Close(_) => return Err(Disconnect::ClientClose),
        Message::Ping(_) | Message::Pong(_) => return Ok(None),
    };
    if bytes.len() > max_bytes {
        return Err(Disconnect::EventTooLarge);
    }
    Ok(Some(bytes))
}

/// A correlated request: either a parsed envelope or just the malformed
/// event name, which still earns an ack.
#[derive(Debug)]
enum Request {
    Envelope(Envelope<Value>),
    UnrecognizedName(String),
}

/// Requests must carry a correlation id; anything else is a protocol violation.
fn correlated_request(bytes: &[u8]) -> Result<(Request, CorrelationId), Disconnect> {
    let envelope = match parse_envelope(bytes) {
        Ok(envelope) => envelope,
        Err(ProtocolError::UnrecognizedEventName {
            name,
            id: Some(request_id),
        }) => return Ok((Request::UnrecognizedName(name), request_id)),
        Err(ProtocolError::UnrecognizedEventName { id: None, .. }) => {
            record_gateway_event_parse_rejected("missing_correlation_id");
            return Err(Disconnect::InvalidEnvelope);
        }
        Err(_) => {
            record_gateway_event_parse_rejected("invalid_envelope");
            return Err(Disconnect::InvalidEnvelope);
        }
    };
    let Some(request_id) = envelope.id.clone() else {
        record_gateway_event_parse_rejected("missing_correlation_id");
        return Err(Disconnect::InvalidEnvelope);
    };
    Ok((Request::Envelope(envelope), request_id))
}

fn unknown_event(event_name: &str, metric_label: &str) -> Ack {
    record_gateway_event_unknown_received(metric_label);
    Ack::failed(event_name, UNKNOWN_EVENT_MESSAGE, Vec::new())
}

async fn answer(state: &AppState, auth: &AuthContext, request: &Request) -> Ack {
    match request {
        Request::Envelope(envelope) => {
            let event_name = envelope.t.as_str();
            match ClientEvent::from_name(event_name) {
                Some(event) => dispatch_request(state, auth, event, &envelope.d).await,
                None => unknown_event(event_name, event_name),
            }
        }
        Request::UnrecognizedName(name) => unknown_event(name, "malformed_name"),
    }
}

pub(crate) async fn handle_gateway_connection(
    state: AppState,
    socket: WebSocket,
    auth: AuthContext,
) {
    let connection_id = Uuid::new_v4();
    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(state.runtime.gateway_outbound_queue);
    let (control_tx, control_rx) = watch::channel(ConnectionControl::Open);
    state
        .rooms
        .register_connection(
            connection_id,
            auth.user_id.clone(),
            outbound_tx.clone(),
            control_tx,
        )
        .await;

    let conversation_ids = join_initial_rooms(&state, connection_id, &auth).await;
    let ready_event = gateway_events::ready(&auth.user_id, &conversation_ids);
    if outbound_tx.send(ready_event.payload).await.is_ok() {
        record_gateway_event_emitted("connection", ready_event.event_type);
    }
    tracing::info!(
        event = "gateway.connected",
        connection_id = %connection_id,
        user_id = %auth.user_id,
        rooms = conversation_ids.len()
    );

    let mut writer = spawn_writer(sink, outbound_rx, control_rx);
    let mut writer_exit = None;
    let mut ingress = IngressWindow::new(
        state.runtime.gateway_ingress_events_per_window,
        state.runtime.gateway_ingress_window,
    );
    let reason = loop {
        let incoming = tokio::select! {
            incoming = stream.next() => incoming,
            exit = &mut writer => {
                writer_exit = Some(exit);
                break Disconnect::WriterStopped;
            }
        };
        let message = match incoming {
            None => break Disconnect::StreamEnded,
            Some(Err(_)) => break Disconnect::SocketError,
            Some(Ok(message)) => message,
        };
        let bytes = match frame_bytes(message, state.runtime.max_gateway_event_bytes) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(reason) => break reason,
        };
        if !ingress.admit() {
            break Disconnect::IngressRateLimited;
        }
        let (request, request_id) = match correlated_request(&bytes) {
            Ok(request) => request,
            Err(reason) => break reason,
        };

        let ack = answer(&state, &auth, &request).await;
        let ack_event = gateway_events::ack(&request_id, &ack);
        if outbound_tx.try_send(ack_event.payload).is_err() {
            record_gateway_event_dropped(
                "connection",
                ack_event.event_type,
                GATEWAY_DROP_REASON_FULL_QUEUE,
            );
            break Disconnect::OutboundQueueFull;
        }
        record_gateway_event_emitted("connection", ack_event.event_type);
        tracing::debug!(
            event = "gateway.request",
            connection_id = %connection_id,
            request_id = request_id.as_str(),
            success = ack.success
        );
    };

    state.rooms.remove_connection(connection_id).await;
    let writer_exit = match writer_exit {
        Some(exit) => exit,
        None => {
            writer.abort();
            writer.await
        }
    };
    let reason = match writer_exit {
        Ok(WriterExit::SlowConsumer) => "slow_consumer",
        _ => reason.as_str(),
    };
    record_ws_disconnect(reason);
    tracing::info!(
        event = "gateway.disconnected",
        connection_id = %connection_id,
        user_id = %auth.user_id,
        reason
    );
}
