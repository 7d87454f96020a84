pub mod bots;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod positions;
pub mod webhook;
