//! Single-slot order feed.
//!
//! The order arrives asynchronously (from a subscription, a file, a test)
//! and is picked up by a non-blocking poll from the sequencer's startup wait.

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::info;

use super::poll::{PollOutcome, PollPolicy, poll_until};
use crate::errors::PipelineError;
use crate::model::Order;

/// Create a connected sender and feed. At most one order passes through.
pub fn order_channel() -> (OrderSender, OrderFeed) {
    let (tx, rx) = oneshot::channel();
    (OrderSender { tx }, OrderFeed { rx })
}

#[derive(Debug)]
pub struct OrderSender {
    tx: oneshot::Sender<Order>,
}

impl OrderSender {
    /// Deliver the order. Gives it back if the feed was already dropped.
    pub fn send(self, order: Order) -> Result<(), Order> {
        self.tx.send(order)
    }
}

#[derive(Debug)]
pub struct OrderFeed {
    rx: oneshot::Receiver<Order>,
}

impl OrderFeed {
    /// Poll for the order at the policy's interval until it arrives.
    pub async fn wait(mut self, policy: &PollPolicy) -> Result<Order, PipelineError> {
        let rx = &mut self.rx;
        let outcome = poll_until(policy, "an order", |_| {
            std::future::ready(match rx.try_recv() {
                Ok(order) => Ok(Some(order)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Closed) => Err(PipelineError::OrderFeedClosed),
            })
        })
        .await?;

        match outcome {
            PollOutcome::Ready { value: order, .. } => {
                info!(
                    order_id = %order.order_id,
                    shipments = order.shipments.len(),
                    "Received order"
                );
                Ok(order)
            }
            PollOutcome::Exhausted { attempts } => {
                Err(PipelineError::OrderWaitExhausted { attempts })
            }
        }
    }
}
