pub mod command;
pub mod detector;
pub mod module;
pub mod strategy;
pub mod tree_time;
pub mod values;
