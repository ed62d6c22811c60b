//! The top-level fetch-decode-execute driver.
//!
//! Execution of one transaction is single-threaded and strictly sequential.
//! Nested calls run synchronously: a callee frame reaches a terminal status
//! before its caller resumes, which keeps the produced trace deterministic
//! for the proving subsystem. Every classified failure either reverts the
//! current frame (becoming a value returned to the parent) or, for parsing
//! damage only, aborts the whole transaction.

use log::{debug, trace};
use primitive_types::U256;

use crate::backend::Backend;
use crate::decoder::{parse, validate_pc, Instruction};
use crate::error::{AvmError, FailingFunction, RevertReason};
use crate::etable::{CallRequest, Control, Etable};
use crate::frame::{AvmContext, ChildFrame, FrameStatus};
use crate::gas::Gas;
use crate::journal::{Journal, SideEffects};
use crate::memory::{MemoryTag, TaggedMemory};
use crate::trace::TraceStep;
use crate::{Address, FunctionSelector};

/// Inputs of one top-level execution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionRequest {
	pub address: Address,
	pub sender: Address,
	pub calldata: Vec<U256>,
	pub gas: Gas,
	pub static_call: bool,
}

/// Result record of one top-level execution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionResult {
	pub success: bool,
	pub return_data: Vec<U256>,
	pub gas_consumed: Gas,
	/// Accumulated side effects; empty when the execution reverted or was
	/// static.
	pub side_effects: SideEffects,
	/// Present iff `success` is false.
	pub revert_reason: Option<RevertReason>,
	/// Ordered execution trace across all frames.
	pub trace: Vec<TraceStep>,
}

/// Terminal result of one frame.
enum FrameOutcome {
	Returned {
		return_data: Vec<U256>,
	},
	Reverted {
		return_data: Vec<U256>,
		reason: RevertReason,
	},
}

impl FrameOutcome {
	fn status(&self) -> FrameStatus {
		match self {
			Self::Returned { .. } => FrameStatus::Returned,
			Self::Reverted { .. } => FrameStatus::Reverted,
		}
	}
}

enum StepResult {
	Continue,
	Exit(FrameOutcome),
}

/// The interpreter. One instance executes one transaction.
pub struct AvmInterpreter<'a, B: Backend> {
	backend: &'a B,
	etable: Etable<B>,
	journal: Journal,
	trace: Vec<TraceStep>,
	/// Identities of the live frames, outermost first.
	call_stack: Vec<FailingFunction>,
	next_space_id: u32,
}

impl<'a, B: Backend> AvmInterpreter<'a, B> {
	pub fn new(backend: &'a B) -> Self {
		Self {
			backend,
			etable: Etable::runtime(),
			journal: Journal::new(),
			trace: Vec::new(),
			call_stack: Vec::new(),
			next_space_id: 0,
		}
	}

	/// Execute a transaction to completion.
	///
	/// Returns `Err` only for the transaction-fatal `Parsing`
	/// classification; every other failure is a `success == false` result
	/// carrying the full revert chain.
	pub fn execute(mut self, request: ExecutionRequest) -> Result<ExecutionResult, AvmError> {
		debug!(
			"executing {} from {} static={} gas={:?}",
			request.address, request.sender, request.static_call, request.gas
		);

		let (outcome, gas_consumed) = match self.backend.bytecode(request.address) {
			Some(bytecode) => {
				let space_id = self.fresh_space_id();
				let mut frame = AvmContext::new(
					space_id,
					0,
					request.address,
					request.sender,
					request.static_call,
					request.calldata,
					request.gas,
				);
				let outcome = self.run_call(&mut frame, &bytecode)?;
				(outcome, frame.gasometer.consumed())
			}
			None => {
				let failing = FailingFunction {
					contract_address: request.address,
					function_selector: FunctionSelector(
						request.calldata.first().map_or(0, U256::low_u32),
					),
				};
				let error = AvmError::NoBytecodeForContract(request.address);
				let outcome = FrameOutcome::Reverted {
					return_data: Vec::new(),
					reason: RevertReason::from_error(&error, failing, vec![failing]),
				};
				(outcome, Gas::empty())
			}
		};

		let success = matches!(outcome, FrameOutcome::Returned { .. });
		let side_effects = if success && !request.static_call {
			self.journal.into_effects()
		} else {
			SideEffects::default()
		};
		let (return_data, revert_reason) = match outcome {
			FrameOutcome::Returned { return_data } => (return_data, None),
			FrameOutcome::Reverted {
				return_data,
				reason,
			} => (return_data, Some(reason)),
		};

		debug!(
			"execution finished success={} gas_consumed={:?}",
			success, gas_consumed
		);
		Ok(ExecutionResult {
			success,
			return_data,
			gas_consumed,
			side_effects,
			revert_reason,
			trace: self.trace,
		})
	}

	fn fresh_space_id(&mut self) -> u32 {
		let id = self.next_space_id;
		self.next_space_id += 1;
		id
	}

	/// Run one frame against its raw bytecode: parse, loop, settle the
	/// journal and the frame status.
	fn run_call(
		&mut self,
		frame: &mut AvmContext,
		bytecode: &[u8],
	) -> Result<FrameOutcome, AvmError> {
		self.call_stack.push(frame.failing_function());
		let checkpoint = self.journal.checkpoint();

		let outcome = match parse(bytecode) {
			Ok(code) => self.run_loop(frame, &code),
			Err(error) if error.is_fatal() => Err(error),
			Err(error) => Ok(self.revert_outcome(frame, &error)),
		};

		let outcome = match outcome {
			Ok(outcome) => outcome,
			Err(fatal) => {
				self.call_stack.pop();
				return Err(fatal);
			}
		};

		if outcome.status() == FrameStatus::Reverted {
			self.journal.rollback(checkpoint);
		}
		frame.status = outcome.status();
		self.call_stack.pop();
		debug!(
			"frame {} at depth {} finished {:?}",
			frame.address,
			frame.depth,
			frame.status
		);
		Ok(outcome)
	}

	fn run_loop(
		&mut self,
		frame: &mut AvmContext,
		code: &[Instruction],
	) -> Result<FrameOutcome, AvmError> {
		loop {
			match self.step(frame, code) {
				Ok(StepResult::Continue) => {}
				Ok(StepResult::Exit(outcome)) => return Ok(outcome),
				Err(error) if error.is_fatal() => return Err(error),
				Err(error) => return Ok(self.revert_outcome(frame, &error)),
			}
		}
	}

	/// Classify a local failure of `frame` into a terminal outcome.
	fn revert_outcome(&mut self, frame: &mut AvmContext, error: &AvmError) -> FrameOutcome {
		debug!(
			"frame {} reverting at pc {}: {}",
			frame.address, frame.pc, error
		);
		FrameOutcome::Reverted {
			return_data: Vec::new(),
			reason: RevertReason::from_error(
				error,
				frame.failing_function(),
				self.call_stack.clone(),
			),
		}
	}

	/// Execute one instruction.
	fn step(
		&mut self,
		frame: &mut AvmContext,
		code: &[Instruction],
	) -> Result<StepResult, AvmError> {
		let pc = frame.pc;
		validate_pc(pc, code.len() as u32)?;
		let instr = &code[pc as usize];

		// Static restriction is checked before gas and before any effect.
		if frame.is_static && instr.opcode.mutates_state() {
			return Err(AvmError::StaticCallAlteration);
		}

		let entry = self.etable.entry(instr.opcode);
		let (cost, eval) = (entry.cost, entry.eval);
		frame.gasometer.charge(cost.base)?;

		let offsets = resolve_offsets(frame, instr)?;
		trace!(
			"space {} pc {} {} {:?}",
			frame.space_id,
			pc,
			instr.opcode,
			offsets
		);

		let control = eval(frame, &mut self.journal, self.backend, instr, &offsets)?;
		self.trace.push(TraceStep {
			space_id: frame.space_id,
			pc,
			opcode: instr.opcode,
			operands: offsets,
			memory_ops: frame.memory.take_ops(),
		});

		match control {
			Control::Continue => {
				frame.pc += 1;
				Ok(StepResult::Continue)
			}
			Control::Jump(target) => {
				validate_pc(target, code.len() as u32)?;
				frame.pc = target;
				Ok(StepResult::Continue)
			}
			Control::Return(return_data) => {
				Ok(StepResult::Exit(FrameOutcome::Returned { return_data }))
			}
			Control::Revert(return_data) => Ok(StepResult::Exit(FrameOutcome::Reverted {
				return_data,
				reason: RevertReason {
					message: "Assertion failed".to_string(),
					failing_function: frame.failing_function(),
					call_stack: self.call_stack.clone(),
					cause: None,
				},
			})),
			Control::Call(request) => self.enter_call(frame, request),
		}
	}

	/// Run a nested call to completion and resume the caller.
	fn enter_call(
		&mut self,
		caller: &mut AvmContext,
		request: CallRequest,
	) -> Result<StepResult, AvmError> {
		// Code lookup precedes any gas movement, so an absent target costs
		// the caller exactly the fixed call overhead.
		let bytecode = self
			.backend
			.bytecode(request.target)
			.ok_or(AvmError::NoBytecodeForContract(request.target))?;

		let allocation = request.gas.min(caller.gasometer.remaining());
		caller.gasometer.charge(allocation)?;

		let space_id = self.fresh_space_id();
		let mut callee = AvmContext::new(
			space_id,
			caller.depth + 1,
			request.target,
			caller.address,
			caller.is_static || request.is_static,
			request.calldata,
			allocation,
		);
		debug!(
			"call {} -> {} depth {} static={} allocation={:?}",
			caller.address, request.target, callee.depth, callee.is_static, allocation
		);
		let call_step = self.trace.len().saturating_sub(1);

		let outcome = self.run_call(&mut callee, &bytecode)?;

		let consumed = callee.gasometer.consumed();
		caller.gasometer.refund(allocation.sub(consumed));
		caller.children.push(ChildFrame {
			space_id,
			address: request.target,
			status: outcome.status(),
			gas_consumed: consumed,
		});

		match outcome {
			FrameOutcome::Returned { return_data } => {
				caller.return_data = return_data;
				caller
					.memory
					.write(request.success_offset, U256::one(), MemoryTag::U1);
				// The success-flag write belongs to the CALL step.
				if let Some(step) = self.trace.get_mut(call_step) {
					step.memory_ops.extend(caller.memory.take_ops());
				}
				caller.pc += 1;
				Ok(StepResult::Continue)
			}
			FrameOutcome::Reverted {
				return_data,
				reason,
			} => Ok(StepResult::Exit(FrameOutcome::Reverted {
				return_data,
				reason: RevertReason::wrapping(
					reason,
					caller.failing_function(),
					self.call_stack.clone(),
				),
			})),
		}
	}
}

/// Resolve offset operands, applying relative-addressing mode bits against
/// the frame's base pointer at address 0.
fn resolve_offsets(frame: &mut AvmContext, instr: &Instruction) -> Result<Vec<u32>, AvmError> {
	let mut resolved = Vec::with_capacity(instr.offsets.len());
	let mut base_pointer = None;
	for (i, offset) in instr.offsets.iter().enumerate() {
		if instr.mode & (1 << i) != 0 {
			let base = match base_pointer {
				Some(base) => base,
				None => {
					let base = frame.memory.read_u32(0)?;
					base_pointer = Some(base);
					base
				}
			};
			resolved.push(TaggedMemory::resolve_relative(base, *offset)?);
		} else {
			resolved.push(*offset);
		}
	}
	Ok(resolved)
}
