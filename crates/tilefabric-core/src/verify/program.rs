//! Abstract interpretation of core programs.
//!
//! Loops are unrolled in full (trip counts are construction-time constants)
//! while a per-(channel, port) held count is tracked. Both arms of a branch
//! are interpreted from the same state and must agree. The interpretation
//! also records how many elements each port releases and the unrolled
//! position of its last release, which flow balance and completion coverage
//! build on.

use std::collections::{BTreeMap, BTreeSet};

use crate::buffer::{Buffer, BufferId};
use crate::channel::{ChannelId, Port};
use crate::graph::Graph;
use crate::kernel::{ArgType, KernelId};
use crate::program::{CoreProgram, KernelArg, Operand, Predicate, Source, Step};
use crate::tile::TileId;
use crate::types::Scalar;

use super::Violation;

type PortKey = (ChannelId, Port);

/// What one program does to its channel ports over a full run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProgramSummary {
    /// Elements released per port
    pub released: BTreeMap<PortKey, u64>,
    /// Unrolled step position of the last release per port
    pub last_release: BTreeMap<PortKey, u64>,
    /// Every port the program acquires or releases
    pub driven: BTreeSet<PortKey>,
}

/// Interpret every program of `graph`, in tile order.
pub(crate) fn interpret_all(graph: &Graph, violations: &mut Vec<Violation>) -> BTreeMap<TileId, ProgramSummary> {
    graph
        .programs()
        .map(|(tile, program)| (tile, interpret(graph, tile, program, violations)))
        .collect()
}

fn interpret(graph: &Graph, tile: TileId, program: &CoreProgram, violations: &mut Vec<Violation>) -> ProgramSummary {
    let mut interp = Interpreter {
        graph,
        tile,
        label: graph.tile_label(tile),
        held: BTreeMap::new(),
        summary: ProgramSummary::default(),
        position: 0,
        ivs: Vec::new(),
        violations: Vec::new(),
    };
    interp.run(&program.steps);

    let leaks: Vec<(PortKey, usize)> = interp
        .held
        .iter()
        .filter(|(_, &held)| held > 0)
        .map(|(&key, &held)| (key, held))
        .collect();
    for ((channel, port), held) in leaks {
        interp.report(Violation::PendingReleaseLeak {
            tile: interp.label.clone(),
            channel: graph.channel_name(channel),
            port,
            held,
        });
    }

    let Interpreter {
        summary,
        violations: found,
        ..
    } = interp;
    for violation in found {
        push_unique(violations, violation);
    }
    summary
}

pub(crate) fn push_unique(violations: &mut Vec<Violation>, violation: Violation) {
    if !violations.contains(&violation) {
        violations.push(violation);
    }
}

struct Interpreter<'g> {
    graph: &'g Graph,
    tile: TileId,
    label: String,
    held: BTreeMap<PortKey, usize>,
    summary: ProgramSummary,
    position: u64,
    ivs: Vec<usize>,
    violations: Vec<Violation>,
}

impl<'g> Interpreter<'g> {
    fn report(&mut self, violation: Violation) {
        push_unique(&mut self.violations, violation);
    }

    fn run(&mut self, steps: &[Step]) {
        for step in steps {
            self.position += 1;
            self.step(step);
        }
    }

    fn step(&mut self, step: &Step) {
        match step {
            Step::Acquire { channel, port, count } => self.acquire(*channel, *port, *count),
            Step::Release { channel, port, count } => self.release(*channel, *port, *count),
            Step::Copy { dst, src } => {
                self.operand(dst, true);
                if let Source::Operand(src) = src {
                    self.operand(src, false);
                }
            }
            Step::Call { kernel, args } => self.call(*kernel, args),
            Step::Loop { trip_count, body } => {
                for iv in 0..*trip_count {
                    self.ivs.push(iv);
                    self.run(body);
                    self.ivs.pop();
                }
            }
            Step::Branch {
                predicate,
                then_steps,
                else_steps,
            } => self.branch(predicate, then_steps, else_steps),
        }
    }

    fn channel_label(&self, channel: ChannelId) -> String {
        self.graph.channel_name(channel)
    }

    /// Ownership of a channel port: the program's tile must sit at that end.
    fn check_port(&mut self, channel: ChannelId, port: Port) {
        let Ok(endpoint) = self.graph.endpoint(channel, port) else {
            return;
        };
        if endpoint != self.tile {
            self.report(Violation::OwnershipViolation {
                tile: self.label.clone(),
                message: format!(
                    "drives the {port} end of channel '{}', which belongs to {}",
                    self.channel_label(channel),
                    self.graph.tile_label(endpoint)
                ),
            });
        }
    }

    fn acquire(&mut self, channel: ChannelId, port: Port, count: usize) {
        self.summary.driven.insert((channel, port));
        self.check_port(channel, port);
        let graph = self.graph;
        let Ok(fifo) = graph.channel(channel) else {
            return;
        };
        if count > fifo.depth {
            self.report(Violation::CapacityExceeded {
                tile: self.label.clone(),
                channel: fifo.name.clone(),
                requested: count,
                depth: fifo.depth,
            });
            return;
        }
        let held = self.held.entry((channel, port)).or_insert(0);
        if *held > 0 {
            let message = format!("acquire({count}) while {held} slot(s) are still held");
            *held = count;
            self.report(Violation::ReleaseMismatch {
                tile: self.label.clone(),
                channel: self.channel_label(channel),
                port,
                message,
            });
            return;
        }
        *held = count;
    }

    fn release(&mut self, channel: ChannelId, port: Port, count: usize) {
        self.summary.driven.insert((channel, port));
        self.check_port(channel, port);
        let held = self.held.entry((channel, port)).or_insert(0);
        if count > *held {
            let message = format!("release({count}) but only {held} slot(s) held");
            *held = 0;
            self.report(Violation::ReleaseMismatch {
                tile: self.label.clone(),
                channel: self.channel_label(channel),
                port,
                message,
            });
            return;
        }
        *held -= count;
        *self.summary.released.entry((channel, port)).or_insert(0) += count as u64;
        self.summary.last_release.insert((channel, port), self.position);
    }

    fn held(&self, channel: ChannelId, port: Port) -> usize {
        self.held.get(&(channel, port)).copied().unwrap_or(0)
    }

    fn owned_buffer(&mut self, buffer: BufferId) -> Option<&'g Buffer> {
        let graph = self.graph;
        let info = graph.buffer_info(buffer).ok()?;
        if info.tile != self.tile {
            self.report(Violation::OwnershipViolation {
                tile: self.label.clone(),
                message: format!(
                    "references buffer '{}' of {}",
                    info.name,
                    graph.tile_label(info.tile)
                ),
            });
        }
        Some(info)
    }

    /// `element` must be an acquired slot of `(channel, port)`.
    fn check_element(&mut self, channel: ChannelId, port: Port, element: usize) -> bool {
        self.check_port(channel, port);
        let held = self.held(channel, port);
        if element >= held {
            self.report(Violation::IndexOutOfBounds {
                tile: self.label.clone(),
                target: format!("acquired {port} elements of channel '{}'", self.channel_label(channel)),
                index: element,
                len: held,
            });
            return false;
        }
        true
    }

    fn operand(&mut self, operand: &Operand, write: bool) {
        match *operand {
            Operand::Buffer { buffer, index } => {
                let Some(info) = self.owned_buffer(buffer) else {
                    return;
                };
                if let Some(index) = index.eval(&self.ivs) {
                    if index >= info.len() {
                        self.report(Violation::IndexOutOfBounds {
                            tile: self.label.clone(),
                            target: format!("buffer '{}'", info.name),
                            index,
                            len: info.len(),
                        });
                    }
                }
            }
            Operand::Element {
                channel,
                port,
                element,
                index,
            } => {
                if write && port == Port::Consume {
                    self.report(Violation::OwnershipViolation {
                        tile: self.label.clone(),
                        message: format!(
                            "writes a consume-side element of channel '{}'",
                            self.channel_label(channel)
                        ),
                    });
                }
                if !self.check_element(channel, port, element) {
                    return;
                }
                let graph = self.graph;
                let Ok(fifo) = graph.channel(channel) else {
                    return;
                };
                let len = fifo.element.num_elements();
                if let Some(index) = index.eval(&self.ivs) {
                    if index >= len {
                        self.report(Violation::IndexOutOfBounds {
                            tile: self.label.clone(),
                            target: format!("element of channel '{}'", fifo.name),
                            index,
                            len,
                        });
                    }
                }
            }
        }
    }

    fn call(&mut self, kernel: KernelId, args: &[KernelArg]) {
        let graph = self.graph;
        let Ok(function) = graph.kernel(kernel) else {
            return;
        };
        if args.len() != function.inputs.len() {
            self.report(Violation::SignatureMismatch {
                tile: self.label.clone(),
                kernel: function.name.clone(),
                message: format!("expected {} argument(s), got {}", function.inputs.len(), args.len()),
            });
        }

        for (position, (arg, expected)) in args.iter().zip(&function.inputs).enumerate() {
            let actual = match arg {
                KernelArg::Buffer(buffer) => match self.owned_buffer(*buffer) {
                    Some(info) => ArgType::Tensor(info.ty.clone()),
                    None => continue,
                },
                KernelArg::Element { channel, port, element } => {
                    if !self.check_element(*channel, *port, *element) {
                        continue;
                    }
                    match graph.channel(*channel) {
                        Ok(fifo) => ArgType::Tensor(fifo.element.clone()),
                        Err(_) => continue,
                    }
                }
                KernelArg::Scalar(value) => {
                    let compatible = match (value, expected) {
                        (Scalar::Float(_), ArgType::Scalar(dtype)) => dtype.is_float(),
                        (Scalar::Int(_), ArgType::Scalar(_)) => true,
                        _ => false,
                    };
                    if !compatible {
                        let violation = Violation::SignatureMismatch {
                            tile: self.label.clone(),
                            kernel: function.name.clone(),
                            message: format!("argument {position}: scalar {value} passed for {expected}"),
                        };
                        self.report(violation);
                    }
                    continue;
                }
            };
            if &actual != expected {
                let violation = Violation::SignatureMismatch {
                    tile: self.label.clone(),
                    kernel: function.name.clone(),
                    message: format!("argument {position}: {actual} passed for {expected}"),
                };
                self.report(violation);
            }
        }
    }

    fn branch(&mut self, predicate: &Predicate, then_steps: &[Step], else_steps: &[Step]) {
        self.operand(&predicate.operand(), false);

        let held_before = self.held.clone();
        let released_before = self.summary.released.clone();
        self.run(then_steps);
        let then_held = std::mem::replace(&mut self.held, held_before);
        let then_released = self.summary.released.clone();
        self.summary.released = released_before;
        self.run(else_steps);

        let keys: BTreeSet<PortKey> = then_held
            .keys()
            .chain(self.held.keys())
            .chain(then_released.keys())
            .chain(self.summary.released.keys())
            .copied()
            .collect();
        for (channel, port) in keys {
            let held = (
                then_held.get(&(channel, port)).copied().unwrap_or(0),
                self.held(channel, port),
            );
            let released = (
                then_released.get(&(channel, port)).copied().unwrap_or(0),
                self.summary.released.get(&(channel, port)).copied().unwrap_or(0),
            );
            if held.0 != held.1 || released.0 != released.1 {
                self.report(Violation::BranchImbalance {
                    tile: self.label.clone(),
                    channel: self.channel_label(channel),
                    port,
                    then_held: held.0,
                    else_held: held.1,
                });
            }
        }
        // Continue from the `then` arm; when the arms disagree the
        // violation above already invalidates the graph.
        self.held = then_held;
        self.summary.released = then_released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::InitialValue;
    use crate::device::DeviceFamily;
    use crate::error::ErrorKind;
    use crate::program::{IndexExpr, ProgramBuilder};
    use crate::types::{DType, TensorType};

    fn single_core() -> (Graph, TileId, ChannelId) {
        let mut graph = Graph::new(DeviceFamily::Npu1);
        let shim = graph.tile(0, 0).unwrap();
        let core = graph.tile(0, 2).unwrap();
        let input = graph
            .object_fifo("in", shim, core, 2, TensorType::vector(DType::I32, 4).unwrap())
            .unwrap();
        (graph, core, input)
    }

    fn kinds(violations: &[Violation]) -> Vec<ErrorKind> {
        violations.iter().map(Violation::kind).collect()
    }

    #[test]
    fn balanced_loop_records_release_totals() {
        let (mut graph, core, input) = single_core();
        let mut program = ProgramBuilder::new();
        program.for_range(16, |body| {
            body.acquire(input, Port::Consume, 1);
            body.release(input, Port::Consume, 1);
        });
        graph.core(core, program.build()).unwrap();

        let mut violations = Vec::new();
        let summaries = interpret_all(&graph, &mut violations);
        assert!(violations.is_empty(), "{violations:?}");
        assert_eq!(summaries[&core].released[&(input, Port::Consume)], 16);
    }

    #[test]
    fn element_index_past_shape_is_reported_once() {
        let (mut graph, core, input) = single_core();
        let local = graph
            .buffer(core, "local", TensorType::vector(DType::I32, 4).unwrap(), InitialValue::default())
            .unwrap();
        let mut program = ProgramBuilder::new();
        program.for_range(3, |body| {
            body.acquire(input, Port::Consume, 1);
            body.copy(
                Operand::buffer(local, 0),
                Operand::element(input, Port::Consume, 0, IndexExpr::Const(4)),
            );
            body.release(input, Port::Consume, 1);
        });
        graph.core(core, program.build()).unwrap();

        let mut violations = Vec::new();
        interpret_all(&graph, &mut violations);
        assert_eq!(kinds(&violations), vec![ErrorKind::IndexOutOfBounds]);
    }

    #[test]
    fn branch_arms_must_agree_on_held_slots() {
        let (mut graph, core, input) = single_core();
        let flag = graph
            .buffer(core, "flag", TensorType::vector(DType::I32, 1).unwrap(), InitialValue::default())
            .unwrap();
        let mut program = ProgramBuilder::new();
        program.branch(
            Predicate::is_even(Operand::buffer(flag, 0)),
            |then| {
                then.acquire(input, Port::Consume, 1);
            },
            |_| {},
        );
        graph.core(core, program.build()).unwrap();

        let mut violations = Vec::new();
        interpret_all(&graph, &mut violations);
        assert!(kinds(&violations).contains(&ErrorKind::ReleaseMismatch));
    }

    #[test]
    fn writing_a_consume_element_is_an_ownership_violation() {
        let (mut graph, core, input) = single_core();
        let mut program = ProgramBuilder::new();
        program.acquire(input, Port::Consume, 1);
        program.copy(Operand::element(input, Port::Consume, 0, 0), Scalar::Int(1));
        program.release(input, Port::Consume, 1);
        graph.core(core, program.build()).unwrap();

        let mut violations = Vec::new();
        interpret_all(&graph, &mut violations);
        assert_eq!(kinds(&violations), vec![ErrorKind::OwnershipViolation]);
    }
}
