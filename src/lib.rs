pub mod config;
pub mod errors;
pub mod healer;
pub mod logging;
