pub mod config;
pub mod invoke;
pub mod runs;
pub mod serve;
