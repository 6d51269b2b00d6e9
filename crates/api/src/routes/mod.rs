pub mod bills;
pub mod events;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod restaurants;
pub mod sessions;
