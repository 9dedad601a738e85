//! Element precisions used throughout the graph, cache and kernels.

/// The three element types every buffer in this engine may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    I8,
    F16,
    F32,
}

impl Precision {
    /// Size in bytes of a single element of this precision.
    pub const fn element_size(self) -> usize {
        match self {
            Precision::I8 => 1,
            Precision::F16 => 2,
            Precision::F32 => 4,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Precision::I8 => "I8",
            Precision::F16 => "F16",
            Precision::F32 => "F32",
        };
        f.write_str(s)
    }
}
