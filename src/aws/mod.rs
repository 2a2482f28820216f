pub mod api;
pub mod sdk;
pub mod session;
