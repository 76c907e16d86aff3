//! Utility functions and types

mod timer;

pub use timer::Timer;
