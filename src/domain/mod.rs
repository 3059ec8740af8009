//! Pure order and pricing rules, free of persistence and transport concerns.

pub mod order;
pub mod pricing;
pub mod status;

pub use order::{LineChange, LineItem, OrderAggregate, OrderError};
pub use status::{OrderStatus, PaymentStatus};
