pub mod config;
pub mod dispatch;
pub mod executor;
pub mod network;
pub mod node;
pub mod raft;

// Public exports
pub use config::Config;
pub use dispatch::{Dispatcher, ExecutionMode};
pub use executor::{CalculationRequest, Executor, Operator};
pub use node::CalculatorNode;
pub use raft::{ClusterView, Raft, RaftConfig};
