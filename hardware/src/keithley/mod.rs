mod smu2450;
mod tsp;

pub use smu2450::{SenseMode, Smu2450, SmuArgs};
pub use tsp::{TspDevice, TspError, TspResult, DEFAULT_TSP_PORT};
