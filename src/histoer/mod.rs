pub mod any;
pub mod histo1d;
pub mod histo2d;
pub mod histo3d;
pub mod peak_finder;
