//! Domain models shared by the monitor and the execution engine

mod order;
mod wallet;

pub use order::{
    AttemptOutcome, ExecutionAttempt, ExecutionReceipt, FailedOrderRecord, OrderAmount,
    OrderIntent, OrderSide, OrderStatus, Quote,
};
pub use wallet::{ObservationChannel, PurchaseEvent, WatchedWallet};
