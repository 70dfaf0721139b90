//! Calibration of detector elements from accumulated histograms, and review of
//! the bad scaler reads of data-taking runs.
//!
//! A [`calib::module::CalibModule`] walks one [`calib::strategy::Strategy`] over
//! every element of a detector and persists the new values through a
//! [`store::ParameterStore`]. The [`badscr::detector::BadScalerReadDetector`] does
//! the same per run for scaler reads.

#![warn(clippy::all, rust_2018_idioms)]

pub mod badscr;
pub mod calib;
pub mod config;
pub mod error;
pub mod fitter;
pub mod histoer;
pub mod store;
