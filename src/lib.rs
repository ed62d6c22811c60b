//! Interpreter core for a gas-metered, tagged-memory rollup virtual machine.
//!
//! The crate executes public bytecode deterministically: instructions are
//! parsed up front, dispatched through an evaluation table, metered against a
//! two-dimensional gas budget, and every failure is classified and surfaced
//! as a causally chained revert reason. Nested calls run synchronously, each
//! in its own frame with exclusive memory and a gas sub-budget.

mod backend;
mod curve;
mod decoder;
mod error;
mod etable;
mod field;
mod frame;
mod gas;
mod interpreter;
mod journal;
mod memory;
mod opcode;
mod trace;

pub use crate::backend::{Backend, MemoryBackend};
pub use crate::curve::{decode_points, ec_add, msm, CurvePoint, POINT_FIELDS};
pub use crate::decoder::{
	parse, validate_pc, Immediate, ImmediateKind, Instruction, OperandShape,
};
pub use crate::error::{AvmError, FailingFunction, RevertReason};
pub use crate::etable::{cost_of, CallRequest, Control, Efn, Etable, OpcodeCost, OpcodeEntry};
pub use crate::field::{
	field_from_u256, field_to_u256, from_radix_be, grumpkin_scalar_from_u256, modulus,
	to_radix_be, AvmField, GrumpkinScalar,
};
pub use crate::frame::{AvmContext, ChildFrame, FrameStatus};
pub use crate::gas::{Gas, GasDimension, GasFees, Gasometer};
pub use crate::interpreter::{AvmInterpreter, ExecutionRequest, ExecutionResult};
pub use crate::journal::{Journal, LogEntry, OutboundMessage, SideEffects, StorageWrite};
pub use crate::memory::{MemoryTag, MemoryValue, TaggedMemory, MEMORY_ADDRESS_SPACE};
pub use crate::opcode::Opcode;
pub use crate::trace::{MemoryAccess, MemoryOp, TraceStep};

use core::fmt;
use primitive_types::U256;

/// A contract address. Addresses are field-sized values in the address space
/// of the rollup.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Address(pub U256);

impl Address {
	pub const fn zero() -> Self {
		Self(U256::zero())
	}
}

impl From<u64> for Address {
	fn from(v: u64) -> Self {
		Self(U256::from(v))
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:#066x}", self.0)
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self)
	}
}

/// Selector of the function a frame is executing, taken from the first
/// calldata word at frame entry. Purely diagnostic.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct FunctionSelector(pub u32);

impl fmt::Display for FunctionSelector {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:#010x}", self.0)
	}
}
