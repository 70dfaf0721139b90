pub mod common;
pub mod fitter;
pub mod landau;
pub mod models;
pub mod solver;
