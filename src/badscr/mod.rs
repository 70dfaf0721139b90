//! Per-run review of bad scaler reads: reads whose interval should be excluded
//! from the run's data.

pub mod command;
pub mod detector;
pub mod interval;
pub mod method;
pub mod scaler_reads;
