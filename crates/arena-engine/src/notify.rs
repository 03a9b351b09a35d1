//! Engine event bus.
//!
//! Phase changes and resolutions are published on a `tokio::sync::broadcast`
//! channel. Consumers (API layer, websocket pushers, audit log) subscribe and
//! receive events in the order the engine committed them; a slow consumer
//! lags and drops rather than blocking the scheduler.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use arena_common::{CompetitionId, Phase, TokenAddress};

/// Default event buffer per subscriber.
const CHANNEL_CAPACITY: usize = 256;

/// Events published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    /// A competition moved to a new phase.
    PhaseChanged {
        competition_id: CompetitionId,
        from: Phase,
        to: Phase,
        timestamp: DateTime<Utc>,
    },
    /// A competition resolved with a winner. Emitted after the
    /// `PhaseChanged { to: Resolved }` event for the same competition.
    Resolved {
        competition_id: CompetitionId,
        winner_token: TokenAddress,
        token_a_performance: Decimal,
        token_b_performance: Decimal,
    },
}

/// Broadcast publisher for engine events.
#[derive(Debug)]
pub struct Notifier {
    tx: broadcast::Sender<EngineEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the event stream. Events published before the call are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send with no live subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        debug!(?event, "Publishing engine event");
        let _ = self.tx.send(event);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
