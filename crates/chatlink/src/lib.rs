pub mod errors;
pub mod models;
pub mod predictor;
pub mod providers;
pub mod toolkit;
pub mod tools;
