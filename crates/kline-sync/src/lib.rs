pub mod config;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod scheduler;

#[cfg(test)]
mod testing;
