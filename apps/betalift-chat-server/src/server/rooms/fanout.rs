use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::server::{
    core::OutboundSender,
    gateway_events::GatewayEvent,
    metrics::{
        record_gateway_event_dropped, GATEWAY_DROP_REASON_CLOSED, GATEWAY_DROP_REASON_FULL_QUEUE,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Delivery {
    Queued,
    /// The writer is behind; the connection must be closed.
    Lagging,
    Gone,
}

/// Non-blocking enqueue of one event; drops are counted under `scope`.
pub(super) fn enqueue(sender: &OutboundSender, event: &GatewayEvent, scope: &'static str) -> Delivery {
    match sender.try_send(event.payload.clone()) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => {
            record_gateway_event_dropped(scope, event.event_type, GATEWAY_DROP_REASON_FULL_QUEUE);
            Delivery::Lagging
        }
        Err(TrySendError::Closed(_)) => {
            record_gateway_event_dropped(scope, event.event_type, GATEWAY_DROP_REASON_CLOSED);
            Delivery::Gone
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct FanoutReport {
    pub(super) delivered: usize,
    pub(super) lagging: Vec<Uuid>,
    pub(super) pruned: Vec<Uuid>,
}

/// Enqueues `event` for every room member. Members that could not take it
/// are removed from `members` and listed in `pruned`.
pub(super) fn fan_out(
    members: &mut HashMap<Uuid, OutboundSender>,
    event: &GatewayEvent,
    scope: &'static str,
) -> FanoutReport {
    let mut report = FanoutReport::default();
    members.retain(|connection_id, sender| match enqueue(sender, event, scope) {
        Delivery::Queued => {
            report.delivered += 1;
            true
        }
        Delivery::Lagging => {
            report.lagging.push(*connection_id);
            report.pruned.push(*connection_id);
            false
        }
        Delivery::Gone => {
            report.pruned.push(*connection_id);
            false
        }
    });
    report
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{enqueue, fan_out, Delivery};
    use crate::server::gateway_events::GatewayEvent;

    fn event() -> GatewayEvent {
        GatewayEvent {
            event_type: "new_message",
            payload: String::from("{\"t\":\"new_message\"}"),
        }
    }

    #[test]
    fn enqueue_classifies_each_sender_state() {
        let (open, mut open_rx) = mpsc::channel::<String>(1);
        assert_eq!(enqueue(&open, &event(), "connection"), Delivery::Queued);
        assert_eq!(enqueue(&open, &event(), "connection"), Delivery::Lagging);
        assert!(open_rx.try_recv().is_ok());

        let (closed, closed_rx) = mpsc::channel::<String>(1);
        drop(closed_rx);
        assert_eq!(enqueue(&closed, &event(), "connection"), Delivery::Gone);
    }

    #[test]
    fn fan_out_prunes_members_that_cannot_keep_up() {
        let healthy = Uuid::new_v4();
        let lagging = Uuid::new_v4();
        let gone = Uuid::new_v4();

        let (healthy_tx, _healthy_rx) = mpsc::channel::<String>(4);
        let (lagging_tx, _lagging_rx) = mpsc::channel::<String>(1);
        lagging_tx.try_send(String::from("backlog")).unwrap();
        let (gone_tx, gone_rx) = mpsc::channel::<String>(1);
        drop(gone_rx);

        let mut members =
            HashMap::from([(healthy, healthy_tx), (lagging, lagging_tx), (gone, gone_tx)]);
        let report = fan_out(&mut members, &event(), "room");

        assert_eq!(report.delivered, 1);
        assert_eq!(report.lagging, vec![lagging]);
        let mut pruned = report.pruned.clone();
        pruned.sort();
        let mut expected = vec![lagging, gone];
        expected.sort();
        assert_eq!(pruned, expected);
        assert_eq!(members.keys().copied().collect::<Vec<_>>(), vec![healthy]);
    }
}
