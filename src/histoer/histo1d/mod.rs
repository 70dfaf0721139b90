pub mod histogram1d;
pub mod rebinning;
pub mod utility;
