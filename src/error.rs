//! Failure classification and revert propagation.
//!
//! Every failure in the core maps to exactly one [`AvmError`] variant
//! carrying its structured payload; human-readable text is rendered only at
//! the diagnostic boundary through `Display`. When a frame unwinds, its
//! classification is wrapped into a [`RevertReason`] recording the failing
//! function and a call-stack snapshot, and each caller frame wraps the
//! callee's reason as its own cause.

use std::borrow::Cow;

use thiserror::Error;

use crate::curve::CurvePoint;
use crate::gas::GasDimension;
use crate::memory::MemoryTag;
use crate::{Address, FunctionSelector};

/// Closed classification of every failure mode in the interpreter core.
///
/// All variants except [`AvmError::Parsing`] are local to one frame: the
/// frame transitions to `Reverted` and the classification is returned to the
/// parent as a value. `Parsing` aborts the whole transaction, since a
/// malformed instruction stream has no meaningful partial semantics.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AvmError {
	/// Structurally malformed bytecode at decode time. Fatal.
	#[error("Cannot parse bytecode at byte {offset}: {message}")]
	Parsing {
		/// Byte position at which decoding failed.
		offset: u32,
		/// What was wrong with the stream.
		message: Cow<'static, str>,
	},
	/// Program counter outside `[0, code_len)` at a fetch or jump.
	#[error("Invalid program counter {pc}, max is {code_len}")]
	InvalidProgramCounter { pc: u32, code_len: u32 },
	/// The opcode byte does not name a member of the closed instruction set.
	#[error("Opcode {byte:#04x} is not in the instruction set")]
	InvalidOpcode { byte: u8 },
	/// A memory read observed a tag different from the expected one.
	#[error("Tag mismatch at offset {offset}, got {got}, expected {expected}")]
	TagMismatch {
		offset: u32,
		got: MemoryTag,
		expected: MemoryTag,
	},
	/// A relative address resolved past the 32-bit addressable space.
	#[error("Address out of range. Base address {base}, relative offset {offset}")]
	RelativeAddressOutOfRange { base: u32, offset: u32 },
	/// A slice `[base, base + size)` escapes the 32-bit addressable space.
	#[error("Memory slice is out of range. Base address {base}, size {size}")]
	MemorySliceOutOfRange { base: u32, size: u32 },
	/// One or more gas dimensions cannot cover a charge. The charge is
	/// rejected atomically; `dimensions` names every deficient one.
	#[error("Not enough {} gas left", fmt_dimensions(.dimensions))]
	OutOfGas { dimensions: Vec<GasDimension> },
	/// Invalid numeric operation, such as division or inversion by zero.
	#[error("{0}")]
	Arithmetic(Cow<'static, str>),
	/// Multi-scalar-multiplication input whose field count is not a
	/// multiple of 3.
	#[error("Points vector length should be a multiple of 3, was {0}")]
	MsmPointsLength(u32),
	/// A multi-scalar-multiplication input point off the curve.
	#[error("Point {0} is not on the curve.")]
	MsmPointNotOnCurve(CurvePoint),
	/// Invalid radix/size combination for a radix conversion.
	#[error("{0}")]
	RadixInput(Cow<'static, str>),
	/// A state-mutating instruction dispatched under a static frame.
	#[error("Static call cannot update the state, emit L2->L1 messages or generate logs")]
	StaticCallAlteration,
	/// The call target has no code.
	#[error("No bytecode found at: {0}")]
	NoBytecodeForContract(Address),
}

impl AvmError {
	/// Whether the failure aborts the whole transaction rather than
	/// reverting a single frame.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Parsing { .. })
	}
}

fn fmt_dimensions(dimensions: &[GasDimension]) -> String {
	dimensions
		.iter()
		.map(|d| d.to_string().to_uppercase())
		.collect::<Vec<_>>()
		.join(", ")
}

/// Identity of the function a failing frame was executing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FailingFunction {
	pub contract_address: Address,
	pub function_selector: FunctionSelector,
}

/// Structured, causally chained description of why a frame failed.
///
/// Immutable once built. The `cause` link points at the reason produced by a
/// callee frame, so walking `cause` goes from the surfaced result down to the
/// innermost root failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RevertReason {
	/// Rendered message of this frame's classification.
	pub message: String,
	/// The frame that failed.
	pub failing_function: FailingFunction,
	/// Call-stack snapshot at classification time, outermost to innermost.
	pub call_stack: Vec<FailingFunction>,
	/// Reason produced by the callee whose failure this frame propagated.
	pub cause: Option<Box<RevertReason>>,
}

impl RevertReason {
	/// Classify a local failure of `failing_function` into a root reason.
	pub fn from_error(
		error: &AvmError,
		failing_function: FailingFunction,
		call_stack: Vec<FailingFunction>,
	) -> Self {
		Self {
			message: error.to_string(),
			failing_function,
			call_stack,
			cause: None,
		}
	}

	/// Wrap a callee's reason as the cause of this frame's own revert.
	pub fn wrapping(
		cause: RevertReason,
		failing_function: FailingFunction,
		call_stack: Vec<FailingFunction>,
	) -> Self {
		Self {
			message: format!("Nested call to {} reverted", cause.failing_function.contract_address),
			failing_function,
			call_stack,
			cause: Some(Box::new(cause)),
		}
	}

	/// Number of links in the cause chain, this reason included. Equals the
	/// call depth at which the root failure occurred.
	pub fn chain_len(&self) -> usize {
		1 + self.cause.as_ref().map_or(0, |c| c.chain_len())
	}

	/// The innermost root-cause reason.
	pub fn root_cause(&self) -> &RevertReason {
		self.cause.as_ref().map_or(self, |c| c.root_cause())
	}
}

impl core::fmt::Display for RevertReason {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		write!(
			f,
			"{} (in {} selector {})",
			self.message, self.failing_function.contract_address, self.failing_function.function_selector
		)?;
		if let Some(cause) = &self.cause {
			write!(f, "\ncaused by: {}", cause)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn func(addr: u64) -> FailingFunction {
		FailingFunction {
			contract_address: Address::from(addr),
			function_selector: FunctionSelector(0),
		}
	}

	#[test]
	fn renders_out_of_gas_dimensions_uppercase() {
		let err = AvmError::OutOfGas {
			dimensions: vec![GasDimension::Da, GasDimension::L2],
		};
		assert_eq!(err.to_string(), "Not enough DA, L2 gas left");
	}

	#[test]
	fn chain_is_ordered_innermost_first() {
		let root = RevertReason::from_error(
			&AvmError::Arithmetic("Division by zero".into()),
			func(3),
			vec![func(1), func(2), func(3)],
		);
		let mid = RevertReason::wrapping(root, func(2), vec![func(1), func(2)]);
		let top = RevertReason::wrapping(mid, func(1), vec![func(1)]);

		assert_eq!(top.chain_len(), 3);
		assert_eq!(top.root_cause().message, "Division by zero");
		assert_eq!(top.root_cause().failing_function, func(3));
	}

	#[test]
	fn only_parsing_is_fatal() {
		assert!(AvmError::Parsing {
			offset: 0,
			message: "truncated".into()
		}
		.is_fatal());
		assert!(!AvmError::InvalidOpcode { byte: 0xff }.is_fatal());
	}
}
