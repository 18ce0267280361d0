//! Custom test assertions for E2E tests

use std::time::Duration;
use tokio::sync::broadcast;
use seedrelay::{Event, TransferId};

/// Result of waiting for a transfer to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Transfer completed successfully
    Completed,
    /// Transfer failed with error
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for the first transfer to reach a terminal state
///
/// Returns the transfer id alongside the outcome; the id is `None` on timeout or a
/// closed channel.
pub async fn wait_for_any_transfer(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
) -> (Option<TransferId>, WaitResult) {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::TransferComplete { id, .. }) => return (Some(id), WaitResult::Completed),
                Ok(Event::TransferFailed { id, error, .. }) => {
                    return (Some(id), WaitResult::Failed(error));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return (None, WaitResult::ChannelClosed);
                }
            }
        }
    })
    .await;

    result.unwrap_or((None, WaitResult::Timeout))
}

/// Collect events until `predicate` matches one, or the timeout passes
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = predicate(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}

/// Assert the outcome is [`WaitResult::Completed`]
pub fn assert_completed(result: &WaitResult) {
    match result {
        WaitResult::Completed => {}
        other => panic!("Expected transfer to complete, got {:?}", other),
    }
}
