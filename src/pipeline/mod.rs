//! Pipeline sequencing: wait for the order, then Q1 → Q2 → dispatch.

pub mod order;
pub mod poll;
pub mod sequencer;

pub use order::{OrderFeed, OrderSender, order_channel};
pub use poll::{PollOutcome, PollPolicy, poll_until};
pub use sequencer::{PipelineSettings, Sequencer, ShipmentOutcome, transport_to};
