//! Cache-blocked quantized GEMM.
//!
//! The product is broken into blocks that fit in L1/L2 cache. Each block of
//! each side is packed into kernel order (with per-line sums), the
//! micro-kernel accumulates raw `u8 x u8` products, and the unpacker folds
//! in the offsets and requantizes to bytes.
//!
//! - `pack`: kernel-order packing and line sums
//! - `unpack`: offset correction and requantization
//! - `block_params`: block sizes from the cache budget
//! - `single_thread`: the blocked loop nest on one thread

pub mod block_params;
pub mod pack;
pub mod single_thread;
pub mod unpack;
