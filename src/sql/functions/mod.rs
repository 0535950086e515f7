//! Scalar function implementations shared by the interpreter's SQL opcodes
//! and the vectorized kernels.

pub mod arithmetic;
pub mod like;
pub mod numeric;

pub use arithmetic::{add_overflow, mul_overflow, sub_overflow};
pub use like::like;
