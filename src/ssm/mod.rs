pub mod filter;
pub mod instance;
pub mod invocation;
pub mod readiness;
pub mod results;
