//! Multi-threaded quantized GEMM.
//!
//! The result is cut into slabs along its larger dimension, one slab per
//! thread, in multiples of the kernel tile. Every slab runs the ordinary
//! single-threaded blocked loop with its own scratch buffers, so threads
//! never share anything mutable. Thread count adapts to problem size:
//! small products stay on the calling thread.

pub mod multi_thread;
