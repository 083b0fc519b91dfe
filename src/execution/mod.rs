// Order execution: session parameters, position state and the decision loop
pub mod driver;
pub mod executor;
pub mod parameters;
pub mod position;

pub use driver::{CycleOutcome, Driver};
pub use executor::{order_quantity, BandWindow, Executor, DEFAULT_FETCH_LIMIT};
pub use parameters::{ParameterStore, TradingParameters};
pub use position::{ClosedPosition, Position, PositionState};
