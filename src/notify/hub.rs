use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::offer::OfferPayload;
use crate::notify::{Event, NotificationSink};

const CONNECTION_BUFFER: usize = 64;

enum HubCommand {
    Register {
        party_id: Uuid,
        connection_id: Uuid,
        tx: mpsc::Sender<Event>,
    },
    Unregister {
        party_id: Uuid,
        connection_id: Uuid,
    },
    Deliver {
        party_id: Uuid,
        event: Event,
    },
}

pub struct Subscription {
    pub party_id: Uuid,
    pub connection_id: Uuid,
    pub events: mpsc::Receiver<Event>,
}

/// Handle to the connection table. The table itself lives in [`HubWorker`];
/// every change goes through its command channel.
pub struct NotificationHub {
    commands: mpsc::Sender<HubCommand>,
    broadcast_tx: broadcast::Sender<Event>,
}

pub struct HubWorker {
    commands: mpsc::Receiver<HubCommand>,
    connections: HashMap<Uuid, HashMap<Uuid, mpsc::Sender<Event>>>,
}

impl NotificationHub {
    pub fn new(buffer_size: usize) -> (Self, HubWorker) {
        let (commands_tx, commands_rx) = mpsc::channel(buffer_size);
        let (broadcast_tx, _unused_rx) = broadcast::channel(buffer_size);

        (
            Self {
                commands: commands_tx,
                broadcast_tx,
            },
            HubWorker {
                commands: commands_rx,
                connections: HashMap::new(),
            },
        )
    }

    pub async fn subscribe(&self, party_id: Uuid) -> Result<Subscription, AppError> {
        let (tx, events) = mpsc::channel(CONNECTION_BUFFER);
        let connection_id = Uuid::new_v4();

        self.commands
            .send(HubCommand::Register {
                party_id,
                connection_id,
                tx,
            })
            .await
            .map_err(|err| AppError::Internal(format!("notification hub stopped: {err}")))?;

        Ok(Subscription {
            party_id,
            connection_id,
            events,
        })
    }

    pub async fn unsubscribe(&self, party_id: Uuid, connection_id: Uuid) {
        let _ = self
            .commands
            .send(HubCommand::Unregister {
                party_id,
                connection_id,
            })
            .await;
    }

    pub fn subscribe_broadcast(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }

    fn deliver(&self, party_id: Uuid, event: Event) {
        if let Err(err) = self.commands.try_send(HubCommand::Deliver { party_id, event }) {
            warn!(party_id = %party_id, error = %err, "notification dropped");
        }
    }
}

impl NotificationSink for NotificationHub {
    fn send_offer(&self, provider_id: Uuid, offer: OfferPayload) {
        self.deliver(provider_id, Event::Offer(offer));
    }

    fn push_event(&self, party_id: Uuid, event: Event) {
        self.deliver(party_id, event);
    }

    fn broadcast(&self, event: Event) {
        if self.broadcast_tx.send(event).is_err() {
            debug!("broadcast skipped: no listeners");
        }
    }
}

impl HubWorker {
    pub async fn run(mut self) {
        info!("notification hub started");

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register {
                    party_id,
                    connection_id,
                    tx,
                } => {
                    self.connections
                        .entry(party_id)
                        .or_default()
                        .insert(connection_id, tx);
                    debug!(
                        party_id = %party_id,
                        connection_id = %connection_id,
                        "connection registered"
                    );
                }
                HubCommand::Unregister {
                    party_id,
                    connection_id,
                } => self.remove(party_id, connection_id),
                HubCommand::Deliver { party_id, event } => self.deliver(party_id, event),
            }
        }

        info!("notification hub stopped: command channel closed");
    }

    fn deliver(&mut self, party_id: Uuid, event: Event) {
        let Some(connections) = self.connections.get_mut(&party_id) else {
            debug!(party_id = %party_id, "no live connection for party");
            return;
        };

        connections.retain(|connection_id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    party_id = %party_id,
                    connection_id = %connection_id,
                    "connection lagging, event dropped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if connections.is_empty() {
            self.connections.remove(&party_id);
        }
    }

    fn remove(&mut self, party_id: Uuid, connection_id: Uuid) {
        if let Some(connections) = self.connections.get_mut(&party_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                self.connections.remove(&party_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_only_the_addressed_party() {
        let (hub, worker) = NotificationHub::new(16);
        tokio::spawn(worker.run());

        let alice = Uuid::from_u128(1);
        let bob = Uuid::from_u128(2);
        let mut alice_sub = hub.subscribe(alice).await.unwrap();
        let mut bob_sub = hub.subscribe(bob).await.unwrap();

        let event = Event::OfferAccepted {
            order_id: Uuid::from_u128(9),
        };
        hub.push_event(alice, event.clone());

        assert_eq!(alice_sub.events.recv().await, Some(event));
        assert!(bob_sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivery_without_worker_is_dropped_silently() {
        let (hub, worker) = NotificationHub::new(1);
        drop(worker);

        hub.push_event(
            Uuid::from_u128(1),
            Event::SearchTimeout {
                order_id: Uuid::from_u128(2),
            },
        );
        hub.broadcast(Event::SearchTimeout {
            order_id: Uuid::from_u128(2),
        });
    }
}
