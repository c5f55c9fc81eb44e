pub mod cancel_order_command;

pub use cancel_order_command::{CancelItemSelector, CancelOrderCommand, CancelOrderResult};
