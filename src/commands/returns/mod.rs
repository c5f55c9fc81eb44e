pub mod complete_return_command;
pub mod create_return_command;
pub mod update_return_status_command;

pub use complete_return_command::{CompleteReturnCommand, CompleteReturnResult};
pub use create_return_command::{CreateReturnCommand, CreateReturnResult, ReturnLine};
pub use update_return_status_command::{UpdateReturnStatusCommand, UpdateReturnStatusResult};
