pub mod authorize;
pub mod health;
pub mod run;
pub mod runs;
