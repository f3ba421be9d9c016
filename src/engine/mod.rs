pub mod admission;
pub mod points;
pub mod ranking;
pub mod service;

pub use service::PredictionEngine;
