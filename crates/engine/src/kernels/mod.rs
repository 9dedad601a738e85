//! Dense per-precision operators over contiguous buffers (spec §2 row A).
//!
//! Every function here is allocation-free (the caller supplies the
//! output buffer), returns no error (shape/precision checks already
//! happened at graph-build time), and is safe to call concurrently on
//! disjoint outputs.

pub mod activation;
pub mod attention;
pub mod elementwise;
pub mod gemm;
pub mod reduce;
pub mod rmsnorm;
pub mod rope;
pub mod sampling;
pub mod scalar;
pub mod softmax;
pub mod transpose;
