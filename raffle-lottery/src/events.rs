use raffle_core::{Address, Amount, RequestId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Notifications for off-chain observers, published after the state change commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum RaffleEvent {
    RaffleEnter {
        player: Address,
        amount: Amount,
    },
    RequestedRaffleWinner {
        request_id: RequestId,
    },
    WinnerPicked {
        winner: Address,
        prize: Amount,
        request_id: RequestId,
        round: u64,
    },
}

/// Fan-out of raffle events to any number of listeners
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RaffleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RaffleEvent) {
        // no listeners is fine
        if self.sender.send(event).is_err() {
            tracing::trace!("Raffle event dropped, no subscribers");
        }
    }
}
