use betalift_protocol::{CorrelationId, ServerEvent, PROTOCOL_VERSION};
use serde::Serialize;

use crate::server::metrics::{record_gateway_event_dropped, GATEWAY_DROP_REASON_SERIALIZE_ERROR};

pub(crate) struct GatewayEvent {
    pub(crate) event_type: &'static str,
    pub(crate) payload: String,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a, T> {
    v: u16,
    t: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    d: T,
}

pub(super) fn build_event<T: Serialize>(
    event: ServerEvent,
    id: Option<&CorrelationId>,
    payload: T,
) -> GatewayEvent {
    let event_type = event.as_str();
    let envelope = OutboundEnvelope {
        v: PROTOCOL_VERSION,
        t: event_type,
        id: id.map(CorrelationId::as_str),
        d: payload,
    };
    let payload = serde_json::to_string(&envelope).unwrap_or_else(|error| {
        record_gateway_event_dropped("connection", event_type, GATEWAY_DROP_REASON_SERIALIZE_ERROR);
        tracing::error!(event = "gateway.event.serialize_failed", event_type, error = %error);
        format!(r#"{{"v":{PROTOCOL_VERSION},"t":"{event_type}","d":null}}"#)
    });
    GatewayEvent {
        event_type,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use betalift_protocol::{CorrelationId, ServerEvent};
    use serde::Serialize;
    use serde_json::Value;

    use super::{build_event, GatewayEvent};

    #[derive(Serialize)]
    struct EnvelopeTestPayload<'a> {
        value: &'a str,
    }

    fn parse(event: &GatewayEvent) -> Value {
        serde_json::from_str(&event.payload).expect("event payload should be valid json")
    }

    #[test]
    fn build_event_wraps_typed_payload_in_gateway_envelope() {
        let event = build_event(
            ServerEvent::NewMessage,
            None,
            EnvelopeTestPayload { value: "ok" },
        );
        let envelope = parse(&event);
        assert_eq!(envelope["v"], Value::from(1));
        assert_eq!(envelope["t"], Value::from("new_message"));
        assert!(envelope.get("id").is_none());
        assert_eq!(envelope["d"]["value"], Value::from("ok"));
    }

    #[test]
    fn build_event_echoes_correlation_id() {
        let id = CorrelationId::try_from(String::from("req-7")).unwrap();
        let event = build_event(ServerEvent::Ack, Some(&id), Value::Null);
        assert_eq!(parse(&event)["id"], Value::from("req-7"));
    }
}
