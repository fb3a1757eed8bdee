use crate::raffle::Raffle;
use crate::Result;
use parking_lot::Mutex;
use raffle_core::RequestId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Upkeep trigger: polls `check_upkeep` and calls `perform_upkeep` when it
/// reports work to do.
#[derive(Debug, Clone)]
pub struct UpkeepKeeper {
    raffle: Arc<Mutex<Raffle>>,
    poll_interval: Duration,
}

impl UpkeepKeeper {
    pub fn new(raffle: Arc<Mutex<Raffle>>, poll_interval: Duration) -> Self {
        Self {
            raffle,
            poll_interval,
        }
    }

    /// One check-then-perform cycle. Returns the new request id if upkeep ran.
    pub fn poll_once(&self) -> Result<Option<RequestId>> {
        let mut raffle = self.raffle.lock();

        let (upkeep_needed, perform_data) = raffle.check_upkeep(&[]);
        if !upkeep_needed {
            return Ok(None);
        }

        let request_id = raffle.perform_upkeep(&perform_data)?;
        tracing::debug!("Keeper performed upkeep for raffle {}", raffle.id());
        Ok(Some(request_id))
    }

    /// Poll until `shutdown` flips to true or the request receiver is gone.
    ///
    /// Each new request id is forwarded on `requests`. Failed upkeeps are
    /// logged and retried on the next tick.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        requests: mpsc::Sender<RequestId>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Upkeep keeper started (every {:?})", self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once() {
                        Ok(Some(request_id)) => {
                            if requests.send(request_id).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Upkeep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Upkeep keeper stopped");
        Ok(())
    }
}
