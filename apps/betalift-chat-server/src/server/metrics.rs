use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{Mutex, OnceLock},
};

pub(crate) const GATEWAY_DROP_REASON_FULL_QUEUE: &str = "full_queue";
pub(crate) const GATEWAY_DROP_REASON_CLOSED: &str = "closed";
pub(crate) const GATEWAY_DROP_REASON_SERIALIZE_ERROR: &str = "serialize_error";

static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) rate_limit_hits: Mutex<HashMap<&'static str, u64>>,
    pub(crate) ws_disconnects: Mutex<HashMap<&'static str, u64>>,
    pub(crate) gateway_events_emitted: Mutex<HashMap<(String, String), u64>>,
    pub(crate) gateway_events_dropped: Mutex<HashMap<(String, String, String), u64>>,
    pub(crate) gateway_events_unknown_received: Mutex<HashMap<String, u64>>,
    pub(crate) gateway_events_parse_rejected: Mutex<HashMap<&'static str, u64>>,
    pub(crate) queue_publishes: Mutex<HashMap<&'static str, u64>>,
}

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

fn snapshot<K: Clone>(counters: &Mutex<HashMap<K, u64>>) -> HashMap<K, u64> {
    counters
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone())
}

fn write_header(output: &mut String, name: &str, help: &str) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
}

pub(crate) fn render_metrics() -> String {
    let state = metrics_state();
    let mut output = String::new();

    write_header(
        &mut output,
        "betalift_auth_failures_total",
        "Count of rejected gateway and REST authentications by reason",
    );
    let mut entries: Vec<_> = snapshot(&state.auth_failures).into_iter().collect();
    entries.sort_unstable();
    for (reason, value) in entries {
        let _ = writeln!(
            output,
            "betalift_auth_failures_total{{reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "betalift_rate_limit_hits_total",
        "Count of rate-limit rejections by action",
    );
    let mut entries: Vec<_> = snapshot(&state.rate_limit_hits).into_iter().collect();
    entries.sort_unstable();
    for (action, value) in entries {
        let _ = writeln!(
            output,
            "betalift_rate_limit_hits_total{{action=\"{action}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "betalift_ws_disconnects_total",
        "Count of websocket disconnect events by reason",
    );
    let mut entries: Vec<_> = snapshot(&state.ws_disconnects).into_iter().collect();
    entries.sort_unstable();
    for (reason, value) in entries {
        let _ = writeln!(
            output,
            "betalift_ws_disconnects_total{{reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "betalift_gateway_events_emitted_total",
        "Count of emitted gateway events by scope and type",
    );
    let mut entries: Vec<_> = snapshot(&state.gateway_events_emitted)
        .into_iter()
        .collect();
    entries.sort_unstable();
    for ((scope, event_type), value) in entries {
        let _ = writeln!(
            output,
            "betalift_gateway_events_emitted_total{{scope=\"{scope}\",event_type=\"{event_type}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "betalift_gateway_events_dropped_total",
        "Count of dropped gateway events by scope, type and reason",
    );
    let mut entries: Vec<_> = snapshot(&state.gateway_events_dropped)
        .into_iter()
        .collect();
    entries.sort_unstable();
    for ((scope, event_type, reason), value) in entries {
        let _ = writeln!(
            output,
            "betalift_gateway_events_dropped_total{{scope=\"{scope}\",event_type=\"{event_type}\",reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "betalift_gateway_events_unknown_received_total",
        "Count of requests naming an unknown event",
    );
    let mut entries: Vec<_> = snapshot(&state.gateway_events_unknown_received)
        .into_iter()
        .collect();
    entries.sort_unstable();
    for (event_type, value) in entries {
        let _ = writeln!(
            output,
            "betalift_gateway_events_unknown_received_total{{event_type=\"{event_type}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "betalift_gateway_events_parse_rejected_total",
        "Count of inbound frames rejected during parsing by reason",
    );
    let mut entries: Vec<_> = snapshot(&state.gateway_events_parse_rejected)
        .into_iter()
        .collect();
    entries.sort_unstable();
    for (reason, value) in entries {
        let _ = writeln!(
            output,
            "betalift_gateway_events_parse_rejected_total{{reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "betalift_queue_publishes_total",
        "Count of notification queue publish attempts by outcome",
    );
    let mut entries: Vec<_> = snapshot(&state.queue_publishes).into_iter().collect();
    entries.sort_unstable();
    for (outcome, value) in entries {
        let _ = writeln!(
            output,
            "betalift_queue_publishes_total{{outcome=\"{outcome}\"}} {value}"
        );
    }

    output
}

pub(crate) fn record_auth_failure(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().auth_failures.lock() {
        *counters.entry(reason).or_insert(0) += 1;
    }
}

pub(crate) fn record_rate_limit_hit(action: &'static str) {
    if let Ok(mut counters) = metrics_state().rate_limit_hits.lock() {
        *counters.entry(action).or_insert(0) += 1;
    }
}

pub(crate) fn record_ws_disconnect(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().ws_disconnects.lock() {
        *counters.entry(reason).or_insert(0) += 1;
    }
}

pub(crate) fn record_gateway_event_emitted(scope: &'static str, event_type: &str) {
    if let Ok(mut counters) = metrics_state().gateway_events_emitted.lock() {
        *counters
            .entry((scope.to_owned(), event_type.to_owned()))
            .or_insert(0) += 1;
    }
}

pub(crate) fn record_gateway_event_dropped(
    scope: &'static str,
    event_type: &str,
    reason: &'static str,
) {
    if let Ok(mut counters) = metrics_state().gateway_events_dropped.lock() {
        *counters
            .entry((scope.to_owned(), event_type.to_owned(), reason.to_owned()))
            .or_insert(0) += 1;
    }
}

pub(crate) fn record_gateway_event_unknown_received(event_type: &str) {
    if let Ok(mut counters) = metrics_state().gateway_events_unknown_received.lock() {
        *counters.entry(event_type.to_owned()).or_insert(0) += 1;
    }
}

pub(crate) fn record_gateway_event_parse_rejected(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().gateway_events_parse_rejected.lock() {
        *counters.entry(reason).or_insert(0) += 1;
    }
}

pub(crate) fn record_queue_publish(outcome: &'static str) {
    if let Ok(mut counters) = metrics_state().queue_publishes.lock() {
        *counters.entry(outcome).or_insert(0) += 1;
    }
}
