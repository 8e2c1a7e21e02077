pub mod audit;
pub mod cell;
pub mod config;
pub mod errors;
pub mod inspect;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod scenario;
pub mod telemetry;
