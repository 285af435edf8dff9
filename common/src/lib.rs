pub mod config;
pub mod moment;
