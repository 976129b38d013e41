//! Core programs: the step sequences compute tiles run.
//!
//! A program only touches its own tile's buffers and the channel ports its
//! tile is attached to. Loops carry a fixed trip count, so every program is
//! finite and can be unrolled by the verifier.
//!
//! ```
//! use tilefabric_core::{DeviceFamily, DType, Graph, IndexExpr, Operand, Port, ProgramBuilder, TensorType};
//!
//! # fn main() -> tilefabric_core::Result<()> {
//! let mut graph = Graph::new(DeviceFamily::Npu1);
//! let shim = graph.tile(0, 0)?;
//! let core = graph.tile(0, 2)?;
//! let elem = TensorType::vector(DType::I32, 1)?;
//! let input = graph.object_fifo("in", shim, core, 2, elem)?;
//! let local = graph.buffer(core, "local", TensorType::vector(DType::I32, 8)?, Default::default())?;
//!
//! let mut program = ProgramBuilder::new();
//! program.for_range(8, |body| {
//!     body.acquire(input, Port::Consume, 1);
//!     body.copy(Operand::buffer(local, IndexExpr::iv(0)), Operand::element(input, Port::Consume, 0, 0));
//!     body.release(input, Port::Consume, 1);
//! });
//! graph.core(core, program.build())?;
//! # Ok(())
//! # }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::BufferId;
use crate::channel::{ChannelId, Port};
use crate::kernel::KernelId;
use crate::types::Scalar;

/// Index into the flattened scalars of a buffer or element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexExpr {
    Const(usize),
    /// `scale * iv[level] + offset`, `level` 0 being the outermost loop
    Var { level: usize, scale: usize, offset: usize },
}

impl IndexExpr {
    /// The induction variable of loop `level`
    pub const fn iv(level: usize) -> Self {
        IndexExpr::Var {
            level,
            scale: 1,
            offset: 0,
        }
    }

    /// Evaluate against the current induction variables (outermost first).
    pub fn eval(&self, ivs: &[usize]) -> Option<usize> {
        match *self {
            IndexExpr::Const(value) => Some(value),
            IndexExpr::Var { level, scale, offset } => ivs.get(level).map(|iv| iv * scale + offset),
        }
    }

    fn max_level(&self) -> Option<usize> {
        match *self {
            IndexExpr::Const(_) => None,
            IndexExpr::Var { level, .. } => Some(level),
        }
    }
}

impl From<usize> for IndexExpr {
    fn from(value: usize) -> Self {
        IndexExpr::Const(value)
    }
}

impl fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IndexExpr::Const(value) => write!(f, "{value}"),
            IndexExpr::Var { level, scale, offset } => {
                if scale != 1 {
                    write!(f, "{scale}*")?;
                }
                write!(f, "i{level}")?;
                if offset != 0 {
                    write!(f, "+{offset}")?;
                }
                Ok(())
            }
        }
    }
}

/// A scalar location a step reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// `buffer[index]`
    Buffer { buffer: BufferId, index: IndexExpr },
    /// `acquired[element][index]` on a channel port; `element` 0 is the oldest held slot
    Element {
        channel: ChannelId,
        port: Port,
        element: usize,
        index: IndexExpr,
    },
}

impl Operand {
    pub fn buffer(buffer: BufferId, index: impl Into<IndexExpr>) -> Self {
        Operand::Buffer {
            buffer,
            index: index.into(),
        }
    }

    pub fn element(channel: ChannelId, port: Port, element: usize, index: impl Into<IndexExpr>) -> Self {
        Operand::Element {
            channel,
            port,
            element,
            index: index.into(),
        }
    }

    fn index(&self) -> IndexExpr {
        match self {
            Operand::Buffer { index, .. } | Operand::Element { index, .. } => *index,
        }
    }
}

/// Right-hand side of a copy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Operand(Operand),
    Const(Scalar),
}

impl From<Operand> for Source {
    fn from(operand: Operand) -> Self {
        Source::Operand(operand)
    }
}

impl From<Scalar> for Source {
    fn from(value: Scalar) -> Self {
        Source::Const(value)
    }
}

/// Comparison used by predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

/// Data-dependent branch condition, local to the tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `value % modulus == remainder` (integer semantics, Euclidean remainder)
    ModEq { value: Operand, modulus: i64, remainder: i64 },
    /// `lhs <op> rhs`
    Cmp { lhs: Operand, op: CmpOp, rhs: Scalar },
}

impl Predicate {
    pub fn is_even(value: Operand) -> Self {
        Predicate::ModEq {
            value,
            modulus: 2,
            remainder: 0,
        }
    }

    pub fn operand(&self) -> Operand {
        match self {
            Predicate::ModEq { value, .. } => *value,
            Predicate::Cmp { lhs, .. } => *lhs,
        }
    }
}

/// Argument of an external kernel call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KernelArg {
    /// A whole tile buffer, by reference
    Buffer(BufferId),
    /// A whole acquired element, by reference
    Element { channel: ChannelId, port: Port, element: usize },
    Scalar(Scalar),
}

/// One program step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    Acquire {
        channel: ChannelId,
        port: Port,
        count: usize,
    },
    Release {
        channel: ChannelId,
        port: Port,
        count: usize,
    },
    Copy {
        dst: Operand,
        src: Source,
    },
    Call {
        kernel: KernelId,
        args: Vec<KernelArg>,
    },
    Loop {
        trip_count: usize,
        body: Vec<Step>,
    },
    Branch {
        predicate: Predicate,
        then_steps: Vec<Step>,
        else_steps: Vec<Step>,
    },
}

/// Steps bound to one tile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreProgram {
    pub steps: Vec<Step>,
}

impl CoreProgram {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Visit every step depth-first, with the loop nesting level it sits at.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Step, usize)) {
        fn go<'a>(steps: &'a [Step], depth: usize, visit: &mut impl FnMut(&'a Step, usize)) {
            for step in steps {
                visit(step, depth);
                match step {
                    Step::Loop { body, .. } => go(body, depth + 1, visit),
                    Step::Branch {
                        then_steps,
                        else_steps,
                        ..
                    } => {
                        go(then_steps, depth, visit);
                        go(else_steps, depth, visit);
                    }
                    _ => {}
                }
            }
        }
        go(&self.steps, 0, visit);
    }

    /// Operands referenced by a step (not descending into nested steps)
    pub fn step_operands(step: &Step) -> Vec<Operand> {
        match step {
            Step::Copy { dst, src } => {
                let mut operands = vec![*dst];
                if let Source::Operand(src) = src {
                    operands.push(*src);
                }
                operands
            }
            Step::Branch { predicate, .. } => vec![predicate.operand()],
            _ => Vec::new(),
        }
    }

    /// Deepest loop level an index expression refers to that has no enclosing loop,
    /// as `(referenced level, available depth)`.
    pub(crate) fn unbound_induction_variable(&self) -> Option<(usize, usize)> {
        let mut found = None;
        self.walk(&mut |step, depth| {
            if found.is_some() {
                return;
            }
            for operand in Self::step_operands(step) {
                if let Some(level) = operand.index().max_level() {
                    if level >= depth {
                        found = Some((level, depth));
                    }
                }
            }
        });
        found
    }
}

/// Imperative construction of a [`CoreProgram`]
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    steps: Vec<Step>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, channel: ChannelId, port: Port, count: usize) -> &mut Self {
        self.steps.push(Step::Acquire { channel, port, count });
        self
    }

    pub fn release(&mut self, channel: ChannelId, port: Port, count: usize) -> &mut Self {
        self.steps.push(Step::Release { channel, port, count });
        self
    }

    pub fn copy(&mut self, dst: Operand, src: impl Into<Source>) -> &mut Self {
        self.steps.push(Step::Copy { dst, src: src.into() });
        self
    }

    pub fn call(&mut self, kernel: KernelId, args: Vec<KernelArg>) -> &mut Self {
        self.steps.push(Step::Call { kernel, args });
        self
    }

    /// `for _ in range(trip_count)`; the body's induction variable is the next level.
    pub fn for_range(&mut self, trip_count: usize, body: impl FnOnce(&mut ProgramBuilder)) -> &mut Self {
        let mut inner = ProgramBuilder::new();
        body(&mut inner);
        self.steps.push(Step::Loop {
            trip_count,
            body: inner.steps,
        });
        self
    }

    pub fn branch(
        &mut self,
        predicate: Predicate,
        then_body: impl FnOnce(&mut ProgramBuilder),
        else_body: impl FnOnce(&mut ProgramBuilder),
    ) -> &mut Self {
        let mut then_steps = ProgramBuilder::new();
        then_body(&mut then_steps);
        let mut else_steps = ProgramBuilder::new();
        else_body(&mut else_steps);
        self.steps.push(Step::Branch {
            predicate,
            then_steps: then_steps.steps,
            else_steps: else_steps.steps,
        });
        self
    }

    pub fn build(self) -> CoreProgram {
        CoreProgram { steps: self.steps }
    }
}
