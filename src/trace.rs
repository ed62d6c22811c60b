//! Execution trace records consumed by the proving subsystem.
//!
//! One step is recorded per executed instruction, across all frames, in
//! execution order. The exact downstream encoding is out of scope here; the
//! records carry everything the prover needs to replay the step.

use primitive_types::U256;

use crate::memory::MemoryTag;
use crate::opcode::Opcode;

/// Direction of a memory operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryAccess {
	Read,
	Write,
}

/// One memory operation performed by an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryOp {
	pub access: MemoryAccess,
	pub addr: u32,
	pub value: U256,
	pub tag: MemoryTag,
}

/// One executed instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraceStep {
	/// Identifier of the frame's memory space.
	pub space_id: u32,
	pub pc: u32,
	pub opcode: Opcode,
	/// Resolved offset operands, in operand order.
	pub operands: Vec<u32>,
	/// Memory deltas of this step, in operation order.
	pub memory_ops: Vec<MemoryOp>,
}
