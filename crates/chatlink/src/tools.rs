//! Ready-made tools that can be registered in a [`crate::toolkit::Toolkit`]
pub mod calculator;

pub use calculator::CalculatorTool;
