pub mod live_orders;
pub mod position_sizer;

pub use live_orders::{
    LiveOrderOrchestrator, OrderStep, PlacementReport, StepOutcome, StepStatus, DEFAULT_STEP_TIMEOUT,
};
pub use position_sizer::{size_position, SizingError, SizingInput, SizingResult};
