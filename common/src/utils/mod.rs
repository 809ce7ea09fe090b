pub mod config;
pub mod idle_guard;
