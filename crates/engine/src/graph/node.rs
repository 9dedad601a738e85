//! Node identity and the per-operator parameter union (spec §3, §9).

use crate::buffer::BufferDesc;
use crate::precision::Precision;

/// A stable index into `Graph::nodes`. Monotonic within a graph's
/// lifetime; insertion order equals topological order by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    Add,
    Sub,
    Mul,
    Div,
    Exp,
    Sqrt,
    Cos,
    Sin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    SiLU,
    GELU,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Variance,
    Min,
    Max,
}

/// Per-operand stride arrays and output shape for a broadcast binary op.
/// 0-stride marks a broadcast axis for that operand.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastInfo {
    pub output_shape: Vec<usize>,
    pub lhs_strides: Vec<usize>,
    pub rhs_strides: Vec<usize>,
}

/// GEMM quantization scales, `(a_s, b_s, c_s)`, used only for the I8 path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmScales {
    pub a_scale: f32,
    pub b_scale: f32,
    pub c_scale: f32,
}

/// Tagged union over operator parameters (spec §9's "per-op parameter
/// union" design note): each variant carries exactly the fields its
/// operator needs, rather than one struct with mostly-irrelevant fields.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// An externally-owned or memory-mapped leaf with no inputs.
    Input,
    ElementwiseBinary {
        op: BinaryOp,
        broadcast: Option<BroadcastInfo>,
    },
    ScalarOp {
        op: ScalarOp,
        value: f32,
    },
    Activation {
        kind: ActivationKind,
    },
    /// `C[M×N] = A[M×K] · Bᵀ[N×K]`. `scales` is `Some` only for the I8
    /// quantized path; `None` selects the same-precision F16/F32 paths
    /// or the I8→I32 unscaled-accumulator path (selected by output
    /// precision override on `BufferDesc`).
    Matmul {
        pretransposed_rhs: bool,
        scales: Option<GemmScales>,
    },
    Transpose {
        permutation: Vec<usize>,
    },
    Reduce {
        op: ReduceOp,
        axis: Option<isize>,
    },
    RmsNorm {
        eps: f32,
    },
    Rope {
        theta: f32,
        position_offset: usize,
    },
    Softmax,
    Attention {
        scale: f32,
        causal: bool,
        window_size: usize,
        position_offset: usize,
    },
    Sample {
        temperature: f32,
        top_p: f32,
        top_k: usize,
        seed: u64,
    },
    Reshape {
        target: Vec<usize>,
    },
    Concat {
        axis: usize,
    },
    Embedding,
    PrecisionCast {
        target: Precision,
    },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Input => "Input",
            OpKind::ElementwiseBinary { .. } => "ElementwiseBinary",
            OpKind::ScalarOp { .. } => "ScalarOp",
            OpKind::Activation { .. } => "Activation",
            OpKind::Matmul { .. } => "Matmul",
            OpKind::Transpose { .. } => "Transpose",
            OpKind::Reduce { .. } => "Reduce",
            OpKind::RmsNorm { .. } => "RmsNorm",
            OpKind::Rope { .. } => "Rope",
            OpKind::Softmax => "Softmax",
            OpKind::Attention { .. } => "Attention",
            OpKind::Sample { .. } => "Sample",
            OpKind::Reshape { .. } => "Reshape",
            OpKind::Concat { .. } => "Concat",
            OpKind::Embedding => "Embedding",
            OpKind::PrecisionCast { .. } => "PrecisionCast",
        }
    }
}

/// Immutable after construction except for `output` (filled in by
/// `execute`). An input id always names a node added earlier.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub op: OpKind,
    pub inputs: Vec<NodeId>,
    pub output_desc: BufferDesc,
    pub output: crate::buffer::Buffer,
}

impl GraphNode {
    pub fn new(id: NodeId, op: OpKind, inputs: Vec<NodeId>, output_desc: BufferDesc) -> Self {
        Self {
            id,
            op,
            inputs,
            output_desc,
            output: crate::buffer::Buffer::Unallocated,
        }
    }
}
