// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for episode and lesson events
//
// In-memory fan-out over a tokio broadcast channel. Publishing never blocks
// and never fails the loop; slow subscribers lag and lose the oldest events.

use crate::domain::episode::EpisodeId;
use crate::domain::events::{EpisodeEvent, LessonEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Episode(EpisodeEvent),
    Lesson(LessonEvent),
}

impl DomainEvent {
    pub fn episode_id(&self) -> EpisodeId {
        match self {
            DomainEvent::Episode(e) => e.episode_id,
            DomainEvent::Lesson(e) => e.episode_id(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity is how many events are buffered before the oldest are dropped
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_episode_event(&self, event: EpisodeEvent) {
        self.publish(DomainEvent::Episode(event));
    }

    pub fn publish_lesson_event(&self, event: LessonEvent) {
        self.publish(DomainEvent::Lesson(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only errs when nobody is listening
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Episode events for one episode only; lesson events and other
    /// episodes are skipped.
    pub fn subscribe_episode(&self, episode_id: EpisodeId) -> EpisodeEventReceiver {
        EpisodeEventReceiver {
            receiver: self.sender.subscribe(),
            episode_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

pub struct EpisodeEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    episode_id: EpisodeId,
}

impl EpisodeEventReceiver {
    pub async fn recv(&mut self) -> Result<EpisodeEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Episode(episode_event) = event {
                if episode_event.episode_id == self.episode_id {
                    return Ok(episode_event);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
