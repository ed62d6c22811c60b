//! Execution frames.
//!
//! A frame is created when a call begins and destroyed when it returns or
//! reverts. It owns its memory space and gas sub-budget exclusively; parent
//! linkage lives on the interpreter's recursion stack, never as an owning
//! reference, and each frame keeps an ordered record of the children it
//! spawned.

use primitive_types::U256;

use crate::error::FailingFunction;
use crate::gas::{Gas, Gasometer};
use crate::memory::TaggedMemory;
use crate::{Address, FunctionSelector};

/// Lifecycle of a frame. `Returned` and `Reverted` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameStatus {
	Running,
	Returned,
	Reverted,
}

/// Summary of a completed child frame, in creation order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChildFrame {
	pub space_id: u32,
	pub address: Address,
	pub status: FrameStatus,
	pub gas_consumed: Gas,
}

/// One nested execution of a contract call.
#[derive(Debug)]
pub struct AvmContext {
	/// Index into the parsed instruction sequence.
	pub pc: u32,
	/// Memory exclusive to this frame.
	pub memory: TaggedMemory,
	/// This frame's gas sub-budget.
	pub gasometer: Gasometer,
	/// Nesting depth; the top-level entry is 0.
	pub depth: usize,
	/// Whether state mutation is forbidden in this frame and below.
	pub is_static: bool,
	/// The contract being executed.
	pub address: Address,
	/// The calling contract (or transaction origin at depth 0).
	pub sender: Address,
	/// Input values, readable through CALLDATACOPY.
	pub calldata: Vec<U256>,
	/// Return data of the most recent completed child call.
	pub return_data: Vec<U256>,
	/// Identifier of this frame's memory space in the trace.
	pub space_id: u32,
	pub status: FrameStatus,
	/// Completed children, in creation order.
	pub children: Vec<ChildFrame>,
}

impl AvmContext {
	pub fn new(
		space_id: u32,
		depth: usize,
		address: Address,
		sender: Address,
		is_static: bool,
		calldata: Vec<U256>,
		gas: Gas,
	) -> Self {
		Self {
			pc: 0,
			memory: TaggedMemory::new(),
			gasometer: Gasometer::new(gas),
			depth,
			is_static,
			address,
			sender,
			calldata,
			return_data: Vec::new(),
			space_id,
			status: FrameStatus::Running,
			children: Vec::new(),
		}
	}

	/// Selector of the function this frame executes: the low 32 bits of the
	/// first calldata word. Diagnostic only.
	pub fn selector(&self) -> FunctionSelector {
		FunctionSelector(self.calldata.first().map_or(0, U256::low_u32))
	}

	/// This frame's identity for revert diagnostics.
	pub fn failing_function(&self) -> FailingFunction {
		FailingFunction {
			contract_address: self.address,
			function_selector: self.selector(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn selector_comes_from_the_first_calldata_word() {
		let frame = AvmContext::new(
			0,
			0,
			Address::from(1),
			Address::from(2),
			false,
			vec![U256::from(0xdead_beefu64), U256::from(7u64)],
			Gas::new(10, 10),
		);
		assert_eq!(frame.selector(), FunctionSelector(0xdead_beef));
	}

	#[test]
	fn empty_calldata_has_the_zero_selector() {
		let frame = AvmContext::new(
			0,
			0,
			Address::zero(),
			Address::zero(),
			false,
			vec![],
			Gas::empty(),
		);
		assert_eq!(frame.selector(), FunctionSelector(0));
	}
}
