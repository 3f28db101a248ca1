pub mod agents;
pub mod audit;
pub mod escalations;
pub mod health;
pub mod query;
