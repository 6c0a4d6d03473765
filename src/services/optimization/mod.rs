pub mod optimization_engine;
pub mod strategies;

pub use optimization_engine::{OptimizationEngine, OptimizationEngineStats};
pub use strategies::FileOp;
