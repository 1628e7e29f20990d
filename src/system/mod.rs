/// System module: host-level housekeeping around a build

pub mod clean;

pub use clean::{clean, CleanOptions, CleanReport};
