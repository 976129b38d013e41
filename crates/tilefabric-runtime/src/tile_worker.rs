//! Execution of one core program on real data.
//!
//! The worker owns its tile's buffers outright. Channel elements live in the
//! shared FIFOs; the worker only keeps the handles it currently holds, oldest
//! first, so `element` 0 of an operand always names the oldest held slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;

use num_traits::ToPrimitive;
use tilefabric_core::{
    Buffer, BufferId, ChannelId, CoreProgram, ElementHandle, ErrorKind, Graph, IndexExpr, KernelArg, KernelId,
    Operand, Port, Predicate, Source, Step, TileId,
};
use tilefabric_tracing::performance::{record_program, PerformanceSpan};

use crate::element::Element;
use crate::error::{Result, RuntimeError};
use crate::fabric::Fabric;
use crate::kernel::{KernelArgs, KernelValue};

pub(crate) struct TileWorker<'a, 'g, T: Element> {
    fabric: &'a Fabric<'g, T>,
    tile: TileId,
    label: String,
    buffers: BTreeMap<BufferId, Vec<T>>,
    held: HashMap<(ChannelId, Port), Vec<ElementHandle>>,
    ivs: Vec<usize>,
    steps: u64,
}

impl<'a, 'g, T: Element> TileWorker<'a, 'g, T> {
    pub fn new(fabric: &'a Fabric<'g, T>, tile: TileId) -> Result<Self> {
        let graph = fabric.graph;
        let label = graph.tile_label(tile);
        let buffers = graph
            .buffers()
            .filter(|(_, buffer)| buffer.tile == tile)
            .map(|(id, buffer)| initial_contents::<T>(buffer).map(|data| (id, data)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            fabric,
            tile,
            label,
            buffers,
            held: HashMap::new(),
            ivs: Vec::new(),
            steps: 0,
        })
    }

    /// Run `program` to completion and hand back the tile's final buffers.
    pub fn run(mut self, program: &CoreProgram) -> Result<BTreeMap<BufferId, Vec<T>>> {
        let span = PerformanceSpan::new(&self.label, None);
        let _entered = span.enter();

        self.exec(&program.steps)?;

        if let Some(((channel, port), handles)) = self.held.iter().find(|(_, handles)| !handles.is_empty()) {
            return Err(self.error(
                ErrorKind::PendingReleaseLeak,
                format!(
                    "program ended holding {} slot(s) of '{}' {port}",
                    handles.len(),
                    self.fabric.graph.channel_name(*channel)
                ),
            ));
        }

        self.fabric.counters.program_steps.fetch_add(self.steps, Ordering::Relaxed);
        record_program(&self.label, self.steps as usize, span.elapsed_us());
        tracing::info!(tile = %self.label, steps = self.steps, "tile_program_complete");
        Ok(self.buffers)
    }

    fn exec(&mut self, steps: &[Step]) -> Result<()> {
        for step in steps {
            self.exec_step(step)?;
        }
        Ok(())
    }

    fn exec_step(&mut self, step: &Step) -> Result<()> {
        self.steps += 1;
        match step {
            Step::Acquire { channel, port, count } => self.acquire(*channel, *port, *count),
            Step::Release { channel, port, count } => self.release(*channel, *port, *count),
            Step::Copy { dst, src } => {
                let value = match src {
                    Source::Operand(operand) => self.read(operand)?,
                    Source::Const(value) => T::from_scalar(*value).ok_or_else(|| {
                        self.error(
                            ErrorKind::SignatureMismatch,
                            format!("constant {value:?} does not fit {}", T::DTYPE),
                        )
                    })?,
                };
                self.write(dst, value)
            }
            Step::Call { kernel, args } => self.call(*kernel, args),
            Step::Loop { trip_count, body } => {
                for iv in 0..*trip_count {
                    self.ivs.push(iv);
                    let result = self.exec(body);
                    self.ivs.pop();
                    result?;
                }
                Ok(())
            }
            Step::Branch {
                predicate,
                then_steps,
                else_steps,
            } => {
                if self.holds(predicate)? {
                    self.exec(then_steps)
                } else {
                    self.exec(else_steps)
                }
            }
        }
    }

    fn acquire(&mut self, channel: ChannelId, port: Port, count: usize) -> Result<()> {
        self.check_endpoint(channel, port)?;
        let handles = self
            .fabric
            .fifo(channel)?
            .acquire(port, count, &self.label, &self.fabric.control)?;
        self.held.insert((channel, port), handles);
        Ok(())
    }

    fn release(&mut self, channel: ChannelId, port: Port, count: usize) -> Result<()> {
        self.check_endpoint(channel, port)?;
        self.fabric
            .fifo(channel)?
            .release(port, count, &self.label, &self.fabric.control)?;
        if let Some(handles) = self.held.get_mut(&(channel, port)) {
            *handles = handles.split_off(count.min(handles.len()));
        }
        Ok(())
    }

    fn check_endpoint(&self, channel: ChannelId, port: Port) -> Result<()> {
        if self.fabric.graph.endpoint(channel, port)? != self.tile {
            return Err(self.error(
                ErrorKind::OwnershipViolation,
                format!(
                    "'{}' {port} is not attached to this tile",
                    self.fabric.graph.channel_name(channel)
                ),
            ));
        }
        Ok(())
    }

    fn handle(&self, channel: ChannelId, port: Port, element: usize) -> Result<ElementHandle> {
        self.held
            .get(&(channel, port))
            .and_then(|handles| handles.get(element))
            .copied()
            .ok_or_else(|| {
                self.error(
                    ErrorKind::IndexOutOfBounds,
                    format!(
                        "element {element} of '{}' {port} is not held",
                        self.fabric.graph.channel_name(channel)
                    ),
                )
            })
    }

    fn index(&self, index: IndexExpr) -> Result<usize> {
        index
            .eval(&self.ivs)
            .ok_or_else(|| self.error(ErrorKind::InvalidDeclaration, format!("index {index} has no enclosing loop")))
    }

    fn buffer(&self, buffer: BufferId) -> Result<&Vec<T>> {
        self.buffers.get(&buffer).ok_or_else(|| self.foreign(buffer))
    }

    fn foreign(&self, buffer: BufferId) -> RuntimeError {
        let name = self
            .fabric
            .graph
            .buffer_info(buffer)
            .map(|b| b.name.clone())
            .unwrap_or_else(|_| format!("#{}", buffer.index()));
        self.error(ErrorKind::OwnershipViolation, format!("buffer '{name}' belongs to another tile"))
    }

    fn read(&self, operand: &Operand) -> Result<T> {
        match *operand {
            Operand::Buffer { buffer, index } => {
                let index = self.index(index)?;
                self.buffer(buffer)?
                    .get(index)
                    .copied()
                    .ok_or_else(|| self.out_of_bounds(operand, index))
            }
            Operand::Element {
                channel,
                port,
                element,
                index,
            } => {
                let handle = self.handle(channel, port, element)?;
                let index = self.index(index)?;
                self.fabric
                    .fifo(channel)?
                    .read_scalar(handle.slot, index)
                    .ok_or_else(|| self.out_of_bounds(operand, index))
            }
        }
    }

    fn write(&mut self, operand: &Operand, value: T) -> Result<()> {
        match *operand {
            Operand::Buffer { buffer, index } => {
                let index = self.index(index)?;
                match self.buffers.get_mut(&buffer) {
                    Some(data) => match data.get_mut(index) {
                        Some(slot) => {
                            *slot = value;
                            Ok(())
                        }
                        None => Err(self.out_of_bounds(operand, index)),
                    },
                    None => Err(self.foreign(buffer)),
                }
            }
            Operand::Element {
                channel,
                port,
                element,
                index,
            } => {
                if port == Port::Consume {
                    return Err(self.error(
                        ErrorKind::OwnershipViolation,
                        format!(
                            "write to consumed element of '{}'",
                            self.fabric.graph.channel_name(channel)
                        ),
                    ));
                }
                let handle = self.handle(channel, port, element)?;
                let index = self.index(index)?;
                if self.fabric.fifo(channel)?.write_scalar(handle.slot, index, value) {
                    Ok(())
                } else {
                    Err(self.out_of_bounds(operand, index))
                }
            }
        }
    }

    fn holds(&self, predicate: &Predicate) -> Result<bool> {
        match *predicate {
            Predicate::ModEq {
                value,
                modulus,
                remainder,
            } => {
                if modulus == 0 {
                    return Err(self.error(ErrorKind::InvalidDeclaration, "predicate modulus is zero"));
                }
                let value = self.read(&value)?.to_i64().ok_or_else(|| {
                    self.error(ErrorKind::InvalidDeclaration, "predicate operand has no integer value")
                })?;
                Ok(value.rem_euclid(modulus) == remainder)
            }
            Predicate::Cmp { lhs, op, rhs } => {
                let value = self.read(&lhs)?.to_f64().unwrap_or(f64::NAN);
                Ok(op.apply(value, rhs.as_f64()))
            }
        }
    }

    fn call(&mut self, kernel: KernelId, args: &[KernelArg]) -> Result<()> {
        let name = self.fabric.graph.kernel(kernel)?.name.clone();
        let implementation = self
            .fabric
            .kernel(kernel)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingKernel(name.clone()))?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(match *arg {
                KernelArg::Buffer(buffer) => KernelValue::Tensor(self.buffer(buffer)?.clone()),
                KernelArg::Element { channel, port, element } => {
                    let handle = self.handle(channel, port, element)?;
                    KernelValue::Tensor(self.fabric.fifo(channel)?.read(handle.slot))
                }
                KernelArg::Scalar(value) => KernelValue::Scalar(value),
            });
        }

        let mut call_args = KernelArgs::new(values);
        implementation
            .invoke(&mut call_args)
            .map_err(|err| RuntimeError::KernelFailure {
                kernel: name.clone(),
                tile: self.label.clone(),
                message: err.to_string(),
            })?;

        for (arg, value) in args.iter().zip(call_args.into_values()) {
            let KernelValue::Tensor(data) = value else {
                continue;
            };
            match *arg {
                KernelArg::Buffer(buffer) => {
                    if let Some(target) = self.buffers.get_mut(&buffer) {
                        target.copy_from_slice(&data);
                    }
                }
                KernelArg::Element {
                    channel,
                    port: Port::Produce,
                    element,
                } => {
                    let handle = self.handle(channel, Port::Produce, element)?;
                    self.fabric.fifo(channel)?.write(handle.slot, &data)?;
                }
                // Consume-side elements are read-only to the kernel.
                _ => {}
            }
        }
        tracing::trace!(tile = %self.label, kernel = %name, "kernel_call");
        Ok(())
    }

    fn out_of_bounds(&self, operand: &Operand, index: usize) -> RuntimeError {
        self.error(ErrorKind::IndexOutOfBounds, format!("index {index} out of bounds in {operand:?}"))
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> RuntimeError {
        RuntimeError::program(self.label.clone(), kind, message)
    }
}

fn initial_contents<T: Element>(buffer: &Buffer) -> Result<Vec<T>> {
    buffer
        .initial
        .expand(buffer.len())
        .into_iter()
        .map(|value| {
            T::from_scalar(value).ok_or_else(|| {
                RuntimeError::program(
                    format!("buffer '{}'", buffer.name),
                    ErrorKind::SignatureMismatch,
                    format!("initial value {value:?} does not fit {}", T::DTYPE),
                )
            })
        })
        .collect()
}

/// Initial contents of every buffer, for tiles that never run a program.
pub(crate) fn all_initial_buffers<T: Element>(graph: &Graph) -> Result<BTreeMap<BufferId, Vec<T>>> {
    graph
        .buffers()
        .map(|(id, buffer)| initial_contents::<T>(buffer).map(|data| (id, data)))
        .collect()
}
