pub mod config;
pub mod providers;
pub mod stats;
pub mod sweep;
pub mod translate;
