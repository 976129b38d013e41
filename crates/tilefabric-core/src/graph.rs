//! The explicitly owned declaration arena.
//!
//! A [`Graph`] holds every tile, buffer, channel, link, kernel declaration,
//! core program and the runtime sequence of one design. Declarations hand out
//! `Copy` handles; nothing is looked up by name after declaration.
//!
//! Only single-declaration problems fail here. Cross-cutting properties
//! (link compatibility, program balance, descriptor reuse across the whole
//! sequence, ...) are left to [`crate::GraphVerifier`], which reports them all
//! at once.

use std::collections::BTreeMap;

use crate::buffer::{Buffer, BufferId, InitialValue};
use crate::channel::{ChannelId, ObjectFifo, Port};
use crate::device::DeviceFamily;
use crate::dma::{Direction, DmaTask, SizeDescriptor, TaskId, TaskSpec, TaskState, TransferMode};
use crate::error::{FabricError, Result};
use crate::kernel::{ArgType, ExternalFunction, KernelId};
use crate::link::{Link, LinkId};
use crate::program::{CoreProgram, KernelArg, Operand, Source, Step};
use crate::sequence::{HostArgId, RuntimeSequence, SeqOp};
use crate::tile::{Coord, Tile, TileId, TileRole};
use crate::types::TensorType;

/// Declaration arena for one design
#[derive(Debug, Clone)]
pub struct Graph {
    family: DeviceFamily,
    tiles: Vec<Tile>,
    buffers: Vec<Buffer>,
    channels: Vec<ObjectFifo>,
    links: Vec<Link>,
    kernels: Vec<ExternalFunction>,
    programs: BTreeMap<TileId, CoreProgram>,
    sequence: RuntimeSequence,
}

impl Graph {
    pub fn new(family: DeviceFamily) -> Self {
        Self {
            family,
            tiles: Vec::new(),
            buffers: Vec::new(),
            channels: Vec::new(),
            links: Vec::new(),
            kernels: Vec::new(),
            programs: BTreeMap::new(),
            sequence: RuntimeSequence::default(),
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    /// `tile(col, row)`: the role follows from the device's row layout.
    pub fn tile(&mut self, col: u8, row: u8) -> Result<TileId> {
        let coord = Coord::new(col, row);
        let role = self.family.role_at(coord).ok_or_else(|| {
            FabricError::topology(format!(
                "tile {coord} is outside the {}x{} array of {:?}",
                self.family.columns(),
                self.family.rows(),
                self.family
            ))
        })?;
        if self.tiles.iter().any(|tile| tile.coord == coord) {
            return Err(FabricError::declaration(format!("tile {coord} declared twice")));
        }

        let id = TileId(self.tiles.len());
        self.tiles.push(Tile {
            role,
            coord,
            memory_capacity: self.family.memory_capacity(role),
        });
        tracing::debug!(tile = id.0, %coord, %role, "tile_declared");
        Ok(id)
    }

    /// Declare a buffer in `tile`'s local memory.
    pub fn buffer(
        &mut self,
        tile: TileId,
        name: impl Into<String>,
        ty: TensorType,
        initial: InitialValue,
    ) -> Result<BufferId> {
        let name = name.into();
        let owner = self.tile_info(tile)?;
        if owner.is_shim() {
            return Err(FabricError::declaration(format!(
                "buffer '{name}': shim tile {} has no local memory",
                owner.coord
            )));
        }
        if self.buffers.iter().any(|b| b.tile == tile && b.name == name) {
            return Err(FabricError::declaration(format!(
                "buffer '{name}' declared twice on tile {}",
                owner.coord
            )));
        }

        let buffer = Buffer::new(name, tile, ty, initial)?;
        let id = BufferId(self.buffers.len());
        tracing::debug!(buffer = id.0, name = %buffer.name, ty = %buffer.ty, "buffer_declared");
        self.buffers.push(buffer);
        Ok(id)
    }

    /// `object_fifo(name, producer, consumer, depth, element)`
    pub fn object_fifo(
        &mut self,
        name: impl Into<String>,
        producer: TileId,
        consumer: TileId,
        depth: usize,
        element: TensorType,
    ) -> Result<ChannelId> {
        let name = name.into();
        self.tile_info(producer)?;
        self.tile_info(consumer)?;
        if depth == 0 {
            return Err(FabricError::declaration(format!("channel '{name}': depth must be at least 1")));
        }
        if self.channels.iter().any(|ch| ch.name == name) {
            return Err(FabricError::declaration(format!("channel '{name}' declared twice")));
        }

        let id = ChannelId(self.channels.len());
        tracing::debug!(channel = id.0, %name, depth, element = %element, "channel_declared");
        self.channels.push(ObjectFifo {
            name,
            producer,
            consumer,
            depth,
            element,
        });
        Ok(id)
    }

    /// `object_fifo_link(upstream, downstream)`
    pub fn link(&mut self, upstream: ChannelId, downstream: ChannelId) -> Result<LinkId> {
        self.channel(upstream)?;
        self.channel(downstream)?;
        let id = LinkId(self.links.len());
        self.links.push(Link { upstream, downstream });
        tracing::debug!(link = id.0, upstream = upstream.0, downstream = downstream.0, "link_declared");
        Ok(id)
    }

    /// `external_func(name, inputs)`
    pub fn external_func(&mut self, name: impl Into<String>, inputs: Vec<ArgType>) -> Result<KernelId> {
        self.declare_kernel(ExternalFunction {
            name: name.into(),
            inputs,
            object_file: None,
        })
    }

    /// Declare a kernel, optionally naming the object file it is compiled into.
    pub fn declare_kernel(&mut self, function: ExternalFunction) -> Result<KernelId> {
        if function.name.is_empty() {
            return Err(FabricError::declaration("external function needs a name"));
        }
        if self.kernels.iter().any(|k| k.name == function.name) {
            return Err(FabricError::declaration(format!(
                "external function '{}' declared twice",
                function.name
            )));
        }
        let id = KernelId(self.kernels.len());
        self.kernels.push(function);
        Ok(id)
    }

    /// Bind `program` to `tile`. Every handle it mentions must exist, every
    /// loop must run at least once and every index variable must have an
    /// enclosing loop; everything else is checked by the verifier.
    pub fn core(&mut self, tile: TileId, program: CoreProgram) -> Result<()> {
        let info = self.tile_info(tile)?;
        if info.is_shim() {
            return Err(FabricError::declaration(format!(
                "shim tile {} cannot run a core program",
                info.coord
            )));
        }
        if self.programs.contains_key(&tile) {
            return Err(FabricError::declaration(format!(
                "tile {} already has a core program",
                info.coord
            )));
        }
        let label = info.label();
        self.check_program_handles(&label, &program)?;
        if let Some((level, depth)) = program.unbound_induction_variable() {
            return Err(FabricError::declaration(format!(
                "{label}: index uses loop level {level} but only {depth} loop(s) enclose it"
            )));
        }

        tracing::debug!(tile = %label, steps = program.steps.len(), "core_program_declared");
        self.programs.insert(tile, program);
        Ok(())
    }

    fn check_program_handles(&self, label: &str, program: &CoreProgram) -> Result<()> {
        let mut result = Ok(());
        program.walk(&mut |step, _| {
            if result.is_err() {
                return;
            }
            result = self.check_step(label, step);
        });
        result
    }

    fn check_step(&self, label: &str, step: &Step) -> Result<()> {
        match step {
            Step::Acquire { channel, count, .. } | Step::Release { channel, count, .. } => {
                self.channel(*channel)?;
                if *count == 0 {
                    return Err(FabricError::declaration(format!(
                        "{label}: acquire/release count must be at least 1"
                    )));
                }
            }
            Step::Copy { dst, src } => {
                self.check_operand(dst)?;
                if let Source::Operand(src) = src {
                    self.check_operand(src)?;
                }
            }
            Step::Call { kernel, args } => {
                self.kernel(*kernel)?;
                for arg in args {
                    match arg {
                        KernelArg::Buffer(buffer) => {
                            self.buffer_info(*buffer)?;
                        }
                        KernelArg::Element { channel, .. } => {
                            self.channel(*channel)?;
                        }
                        KernelArg::Scalar(_) => {}
                    }
                }
            }
            Step::Loop { trip_count, .. } => {
                if *trip_count == 0 {
                    return Err(FabricError::declaration(format!(
                        "{label}: loop trip count must be at least 1"
                    )));
                }
            }
            Step::Branch { predicate, .. } => {
                self.check_operand(&predicate.operand())?;
            }
        }
        Ok(())
    }

    fn check_operand(&self, operand: &Operand) -> Result<()> {
        match operand {
            Operand::Buffer { buffer, .. } => self.buffer_info(*buffer).map(|_| ()),
            Operand::Element { channel, .. } => self.channel(*channel).map(|_| ()),
        }
    }

    // ------------------------------------------------------------------
    // Runtime sequence
    // ------------------------------------------------------------------

    /// Declare the next host argument (external memory region) of the sequence.
    pub fn host_arg(&mut self, ty: TensorType) -> HostArgId {
        let id = HostArgId(self.sequence.host_args.len());
        self.sequence.host_args.push(ty);
        id
    }

    /// `npu_dma_memcpy_nd`: create and start a transfer in one step.
    pub fn memcpy_nd(
        &mut self,
        channel: ChannelId,
        host: HostArgId,
        sizes: SizeDescriptor,
        bd_id: Option<u8>,
        issue_token: bool,
    ) -> Result<TaskId> {
        let spec = self.task_spec(channel, host, sizes, issue_token, TransferMode::Collapsed)?;
        let id = self.sequence.tasks.create(spec, bd_id)?;
        self.sequence.tasks.start(&[id])?;
        self.sequence.ops.push(SeqOp::Memcpy(id));
        Ok(id)
    }

    /// `dma_wait(channels...)`: await and free every outstanding collapsed
    /// transfer bound to `channels`.
    pub fn dma_wait(&mut self, channels: &[ChannelId]) -> Result<Vec<TaskId>> {
        for channel in channels {
            self.channel(*channel)?;
        }
        let covered: Vec<TaskId> = self
            .sequence
            .tasks
            .iter()
            .filter(|task| {
                task.mode == TransferMode::Collapsed
                    && task.state == TaskState::Started
                    && channels.contains(&task.channel)
            })
            .map(|task| task.id)
            .collect();
        if covered.is_empty() {
            return Err(FabricError::declaration(format!(
                "dma_wait on channel(s) {:?} with no outstanding transfer",
                channels.iter().map(|c| c.0).collect::<Vec<_>>()
            )));
        }
        self.sequence.tasks.await_tasks(&covered)?;
        self.sequence.tasks.free(&covered)?;
        self.sequence.ops.push(SeqOp::Wait {
            channels: channels.to_vec(),
            tasks: covered.clone(),
        });
        Ok(covered)
    }

    /// `shim_dma_single_bd_task`: declare an explicit-mode task (state `Created`).
    pub fn dma_task(
        &mut self,
        channel: ChannelId,
        host: HostArgId,
        sizes: SizeDescriptor,
        bd_id: Option<u8>,
        issue_token: bool,
    ) -> Result<TaskId> {
        let spec = self.task_spec(channel, host, sizes, issue_token, TransferMode::Explicit)?;
        let id = self.sequence.tasks.create(spec, bd_id)?;
        self.sequence.ops.push(SeqOp::Create(id));
        Ok(id)
    }

    /// `dma_start_task(tasks...)`
    pub fn dma_start(&mut self, tasks: &[TaskId]) -> Result<()> {
        self.sequence.tasks.start(tasks)?;
        self.sequence.ops.push(SeqOp::Start(tasks.to_vec()));
        Ok(())
    }

    /// `dma_await_task(tasks...)`
    pub fn dma_await(&mut self, tasks: &[TaskId]) -> Result<()> {
        self.sequence.tasks.await_tasks(tasks)?;
        self.sequence.ops.push(SeqOp::Await(tasks.to_vec()));
        Ok(())
    }

    /// `dma_free_task(tasks...)`
    pub fn dma_free(&mut self, tasks: &[TaskId]) -> Result<()> {
        self.sequence.tasks.free(tasks)?;
        self.sequence.ops.push(SeqOp::Free(tasks.to_vec()));
        Ok(())
    }

    fn task_spec(
        &self,
        channel: ChannelId,
        host: HostArgId,
        sizes: SizeDescriptor,
        issue_token: bool,
        mode: TransferMode,
    ) -> Result<TaskSpec> {
        let fifo = self.channel(channel)?;
        if self.sequence.host_arg(host).is_none() {
            return Err(FabricError::UnknownHandle {
                entity: "host argument",
                index: host.0,
            });
        }
        let (shim, direction) = if self.tile_info(fifo.producer)?.is_shim() {
            (fifo.producer, Direction::Fill)
        } else if self.tile_info(fifo.consumer)?.is_shim() {
            (fifo.consumer, Direction::Drain)
        } else {
            return Err(FabricError::topology(format!(
                "channel '{}' has no shim tile end for a DMA transfer",
                fifo.name
            )));
        };
        Ok(TaskSpec {
            shim,
            shim_label: self.tile_info(shim)?.label(),
            channel,
            host,
            sizes,
            issue_token,
            mode,
            direction,
        })
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn tile_info(&self, id: TileId) -> Result<&Tile> {
        self.tiles.get(id.0).ok_or(FabricError::UnknownHandle {
            entity: "tile",
            index: id.0,
        })
    }

    pub fn buffer_info(&self, id: BufferId) -> Result<&Buffer> {
        self.buffers.get(id.0).ok_or(FabricError::UnknownHandle {
            entity: "buffer",
            index: id.0,
        })
    }

    pub fn channel(&self, id: ChannelId) -> Result<&ObjectFifo> {
        self.channels.get(id.0).ok_or(FabricError::UnknownHandle {
            entity: "channel",
            index: id.0,
        })
    }

    pub fn kernel(&self, id: KernelId) -> Result<&ExternalFunction> {
        self.kernels.get(id.0).ok_or(FabricError::UnknownHandle {
            entity: "kernel",
            index: id.0,
        })
    }

    pub fn task(&self, id: TaskId) -> Result<&DmaTask> {
        self.sequence.tasks.get(id)
    }

    /// Tile at `coord`, if declared
    pub fn tile_at(&self, coord: Coord) -> Option<TileId> {
        self.tiles.iter().position(|t| t.coord == coord).map(TileId)
    }

    pub fn channel_by_name(&self, name: &str) -> Option<ChannelId> {
        self.channels.iter().position(|c| c.name == name).map(ChannelId)
    }

    pub fn tiles(&self) -> impl Iterator<Item = (TileId, &Tile)> {
        self.tiles.iter().enumerate().map(|(i, t)| (TileId(i), t))
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.buffers.iter().enumerate().map(|(i, b)| (BufferId(i), b))
    }

    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &ObjectFifo)> {
        self.channels.iter().enumerate().map(|(i, c)| (ChannelId(i), c))
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links.iter().enumerate().map(|(i, l)| (LinkId(i), l))
    }

    pub fn kernels(&self) -> impl Iterator<Item = (KernelId, &ExternalFunction)> {
        self.kernels.iter().enumerate().map(|(i, k)| (KernelId(i), k))
    }

    /// Core programs in tile order
    pub fn programs(&self) -> impl Iterator<Item = (TileId, &CoreProgram)> {
        self.programs.iter().map(|(tile, program)| (*tile, program))
    }

    pub fn program(&self, tile: TileId) -> Option<&CoreProgram> {
        self.programs.get(&tile)
    }

    pub fn sequence(&self) -> &RuntimeSequence {
        &self.sequence
    }

    /// Label of a tile for diagnostics; unknown handles render as `tile#n`.
    pub fn tile_label(&self, id: TileId) -> String {
        self.tile_info(id)
            .map(Tile::label)
            .unwrap_or_else(|_| format!("tile#{}", id.0))
    }

    /// Name of a channel for diagnostics; unknown handles render as `channel#n`.
    pub fn channel_name(&self, id: ChannelId) -> String {
        self.channel(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|_| format!("channel#{}", id.0))
    }

    /// Tile attached to `port` of `channel`
    pub fn endpoint(&self, channel: ChannelId, port: Port) -> Result<TileId> {
        Ok(self.channel(channel)?.endpoint(port))
    }

    /// Role of the tile attached to `port` of `channel`
    pub fn endpoint_role(&self, channel: ChannelId, port: Port) -> Result<TileRole> {
        Ok(self.tile_info(self.endpoint(channel, port)?)?.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::program::ProgramBuilder;
    use crate::types::DType;

    fn i32s(len: usize) -> TensorType {
        TensorType::vector(DType::I32, len).unwrap()
    }

    #[test]
    fn coordinates_are_unique_and_on_grid() {
        let mut graph = Graph::new(DeviceFamily::Npu1);
        let shim = graph.tile(0, 0).unwrap();
        assert_eq!(graph.tile_info(shim).unwrap().role, TileRole::Shim);
        assert_eq!(graph.tile(0, 0).unwrap_err().kind(), ErrorKind::InvalidDeclaration);
        assert_eq!(graph.tile(7, 2).unwrap_err().kind(), ErrorKind::InvalidTopology);
    }

    #[test]
    fn shim_tiles_cannot_own_buffers_or_programs() {
        let mut graph = Graph::new(DeviceFamily::Npu2);
        let shim = graph.tile(1, 0).unwrap();
        let err = graph.buffer(shim, "b", i32s(4), InitialValue::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDeclaration);
        let err = graph.core(shim, CoreProgram::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDeclaration);
    }

    #[test]
    fn zero_depth_channel_fails_immediately() {
        let mut graph = Graph::new(DeviceFamily::Npu1);
        let a = graph.tile(0, 0).unwrap();
        let b = graph.tile(0, 2).unwrap();
        let err = graph.object_fifo("in", a, b, 0, i32s(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDeclaration);
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let mut other = Graph::new(DeviceFamily::Npu1);
        other.tile(0, 0).unwrap();
        let foreign = other.tile(0, 2).unwrap();

        let mut graph = Graph::new(DeviceFamily::Npu1);
        let err = graph.buffer(foreign, "b", i32s(1), InitialValue::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownHandle);
    }

    #[test]
    fn one_program_per_tile_and_loops_run_at_least_once() {
        let mut graph = Graph::new(DeviceFamily::Npu1);
        let core = graph.tile(0, 2).unwrap();
        graph.core(core, CoreProgram::default()).unwrap();
        assert_eq!(
            graph.core(core, CoreProgram::default()).unwrap_err().kind(),
            ErrorKind::InvalidDeclaration
        );

        let other = graph.tile(1, 2).unwrap();
        let mut program = ProgramBuilder::new();
        program.for_range(0, |_| {});
        assert_eq!(
            graph.core(other, program.build()).unwrap_err().kind(),
            ErrorKind::InvalidDeclaration
        );
    }

    #[test]
    fn transfer_direction_follows_shim_end() {
        let mut graph = Graph::new(DeviceFamily::Npu1);
        let shim = graph.tile(0, 0).unwrap();
        let core = graph.tile(0, 2).unwrap();
        let input = graph.object_fifo("in", shim, core, 2, i32s(4)).unwrap();
        let output = graph.object_fifo("out", core, shim, 2, i32s(4)).unwrap();
        let a = graph.host_arg(i32s(16));
        let b = graph.host_arg(i32s(16));

        let fill = graph.memcpy_nd(input, a, SizeDescriptor::new(vec![16]).unwrap(), None, false).unwrap();
        let drain = graph.memcpy_nd(output, b, SizeDescriptor::new(vec![16]).unwrap(), None, false).unwrap();
        assert_eq!(graph.task(fill).unwrap().direction, Direction::Fill);
        assert_eq!(graph.task(drain).unwrap().direction, Direction::Drain);
        assert_eq!(graph.task(fill).unwrap().bd_id, 0);
        assert_eq!(graph.task(drain).unwrap().bd_id, 1);

        let covered = graph.dma_wait(&[output]).unwrap();
        assert_eq!(covered, vec![drain]);
        assert_eq!(graph.task(drain).unwrap().state, TaskState::Freed);
        assert_eq!(graph.task(fill).unwrap().state, TaskState::Started);
    }

    #[test]
    fn channel_without_shim_end_cannot_carry_dma() {
        let mut graph = Graph::new(DeviceFamily::Npu1);
        let a = graph.tile(0, 2).unwrap();
        let b = graph.tile(0, 3).unwrap();
        let ch = graph.object_fifo("x", a, b, 2, i32s(1)).unwrap();
        let host = graph.host_arg(i32s(4));
        let err = graph
            .memcpy_nd(ch, host, SizeDescriptor::new(vec![4]).unwrap(), None, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTopology);
    }

    #[test]
    fn memcpy_on_busy_descriptor_collides() {
        let mut graph = Graph::new(DeviceFamily::Npu1);
        let shim = graph.tile(0, 0).unwrap();
        let core = graph.tile(0, 2).unwrap();
        let input = graph.object_fifo("in", shim, core, 2, i32s(1)).unwrap();
        let host = graph.host_arg(i32s(8));
        let sizes = SizeDescriptor::new(vec![8]).unwrap();
        graph.memcpy_nd(input, host, sizes.clone(), Some(1), false).unwrap();
        let err = graph.memcpy_nd(input, host, sizes, Some(1), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DescriptorCollision);
    }
}
