pub mod logging;
pub mod retry;
