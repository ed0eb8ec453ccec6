// src/lib.rs
pub mod array;
pub mod benchmark;
pub mod config;
pub mod dataset;
pub mod error;
pub mod ope;

pub use array::NdArray;
pub use dataset::BanditFeedback;
pub use error::{OpeError, OpeResult};
