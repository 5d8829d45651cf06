//! Wait for block production.

use crate::Error;
use ibctest_runtime::Clock;
use std::{future::Future, time::Duration};
use tracing::{debug, info};

/// How long to keep polling a node before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Budget {
    /// Maximum number of height queries.
    pub attempts: usize,

    /// Delay between consecutive queries.
    pub interval: Duration,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            attempts: 300,
            interval: Duration::from_secs(1),
        }
    }
}

/// Poll `height` until it has advanced by `blocks`, returning the height reached.
///
/// Query errors are treated as "not yet" (a node often refuses connections
/// while it boots) and consume an attempt like any other poll.
pub async fn wait_for_blocks<C, F, Fut>(
    clock: &C,
    node: &str,
    blocks: u64,
    budget: Budget,
    mut height: F,
) -> Result<u64, Error>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u64, Error>>,
{
    let mut start = None;
    let mut reached = 0;
    for attempt in 0..budget.attempts {
        if attempt > 0 {
            clock.sleep(budget.interval).await;
        }
        let current = match height().await {
            Ok(current) => current,
            Err(err) => {
                debug!(node, attempt, ?err, "height query failed");
                continue;
            }
        };
        reached = current;
        let start = *start.get_or_insert(current);
        if current >= start.saturating_add(blocks) {
            info!(node, start, height = current, "blocks produced");
            return Ok(current);
        }
    }
    Err(Error::LivenessTimeout {
        node: node.to_string(),
        start: start.unwrap_or_default(),
        reached,
        attempts: budget.attempts,
    })
}
