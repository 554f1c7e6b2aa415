mod fanout;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use betalift_core::{ConversationId, UserId};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use super::{
    core::{ConnectionControl, OutboundSender},
    gateway_events::GatewayEvent,
    metrics::record_gateway_event_emitted,
};

use fanout::{enqueue, fan_out, Delivery};

struct ConnectionEntry {
    user_id: UserId,
    sender: OutboundSender,
    control: watch::Sender<ConnectionControl>,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct RoomTables {
    connections: HashMap<Uuid, ConnectionEntry>,
    rooms: HashMap<ConversationId, HashMap<Uuid, OutboundSender>>,
    users: HashMap<UserId, HashSet<Uuid>>,
}

impl RoomTables {
    fn join(&mut self, connection_id: Uuid, conversation_id: &ConversationId) -> bool {
        let Some(entry) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        if !entry.rooms.insert(conversation_id.clone()) {
            return false;
        }
        self.rooms
            .entry(conversation_id.clone())
            .or_default()
            .insert(connection_id, entry.sender.clone());
        true
    }

    fn close_slow(&self, slow_connections: &[Uuid]) {
        for connection_id in slow_connections {
            if let Some(entry) = self.connections.get(connection_id) {
                let _ = entry.control.send(ConnectionControl::Close);
            }
        }
    }
}

/// Tracks live connections, which user owns each one and which conversation
/// rooms each has joined.
#[derive(Clone, Default)]
pub(crate) struct RoomRegistry {
    tables: Arc<RwLock<RoomTables>>,
}

impl RoomRegistry {
    pub(crate) async fn register_connection(
        &self,
        connection_id: Uuid,
        user_id: UserId,
        sender: OutboundSender,
        control: watch::Sender<ConnectionControl>,
    ) {
        let mut tables = self.tables.write().await;
        tables
            .users
            .entry(user_id.clone())
            .or_default()
            .insert(connection_id);
        tables.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                sender,
                control,
                rooms: HashSet::new(),
            },
        );
    }

    pub(crate) async fn join_rooms<'a>(
        &self,
        connection_id: Uuid,
        conversation_ids: impl IntoIterator<Item = &'a ConversationId>,
    ) {
        let mut tables = self.tables.write().await;
        for conversation_id in conversation_ids {
            tables.join(connection_id, conversation_id);
        }
    }

    /// Joins every live connection of `user_id` to the room, returning the
    /// connections that were not members yet.
    pub(crate) async fn join_user_connections(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Vec<Uuid> {
        let mut tables = self.tables.write().await;
        let connection_ids: Vec<Uuid> = tables
            .users
            .get(user_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default();
        connection_ids
            .into_iter()
            .filter(|connection_id| tables.join(*connection_id, conversation_id))
            .collect()
    }

    /// Sends `event` to every connection in the room. Listeners whose queue is
    /// full are dropped from the room and told to close.
    pub(crate) async fn broadcast(
        &self,
        conversation_id: &ConversationId,
        event: &GatewayEvent,
    ) -> usize {
        let mut tables = self.tables.write().await;
        let Some(members) = tables.rooms.get_mut(conversation_id) else {
            return 0;
        };
        let report = fan_out(members, event, "room");
        if members.is_empty() {
            tables.rooms.remove(conversation_id);
        }
        for connection_id in &report.pruned {
            if let Some(entry) = tables.connections.get_mut(connection_id) {
                entry.rooms.remove(conversation_id);
            }
        }
        tables.close_slow(&report.lagging);
        if report.delivered > 0 {
            record_gateway_event_emitted("room", event.event_type);
        }
        report.delivered
    }

    /// Sends `event` to specific connections, closing any that cannot keep up.
    pub(crate) async fn send_to_connections(&self, connection_ids: &[Uuid], event: &GatewayEvent) {
        let tables = self.tables.read().await;
        let mut lagging = Vec::new();
        for connection_id in connection_ids {
            let Some(entry) = tables.connections.get(connection_id) else {
                continue;
            };
            match enqueue(&entry.sender, event, "connection") {
                Delivery::Queued => record_gateway_event_emitted("connection", event.event_type),
                Delivery::Lagging => lagging.push(*connection_id),
                Delivery::Gone => {}
            }
        }
        tables.close_slow(&lagging);
    }

    pub(crate) async fn remove_connection(&self, connection_id: Uuid) {
        let mut tables = self.tables.write().await;
        let Some(entry) = tables.connections.remove(&connection_id) else {
            return;
        };
        for conversation_id in &entry.rooms {
            if let Some(listeners) = tables.rooms.get_mut(conversation_id) {
                listeners.remove(&connection_id);
                if listeners.is_empty() {
                    tables.rooms.remove(conversation_id);
                }
            }
        }
        if let Some(connections) = tables.users.get_mut(&entry.user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                tables.users.remove(&entry.user_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn room_members(&self, conversation_id: &ConversationId) -> Vec<Uuid> {
        self.tables
            .read()
            .await
            .rooms
            .get(conversation_id)
            .map(|listeners| listeners.keys().copied().collect())
            .unwrap_or_default()
    }
}
