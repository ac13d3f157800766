pub mod clerk;
pub mod server;
pub mod utils;

pub use clerk::{Clerk, ClerkError, RetryPolicy};
