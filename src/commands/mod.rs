pub mod attach;
pub mod run;
pub mod session;
