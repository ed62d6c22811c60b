//! The evaluation table: opcode -> (gas cost, evaluation function).
//!
//! Dispatch is a single indexed lookup; every member of the closed opcode
//! set has an entry, and bytes outside the set map to an entry that
//! classifies them. Evaluation functions are pure with respect to their
//! inputs: they touch only the frame, the journal and the read-only backend,
//! and report control flow back to the interpreter loop.

use std::borrow::Cow;

use primitive_types::U256;

use crate::backend::Backend;
use crate::curve::{ec_add, msm, CurvePoint};
use crate::decoder::{Immediate, Instruction};
use crate::error::AvmError;
use crate::field;
use crate::frame::AvmContext;
use crate::gas::Gas;
use crate::journal::Journal;
use crate::memory::{MemoryTag, TaggedMemory};
use crate::opcode::Opcode;
use crate::Address;

/// What the interpreter loop should do after one instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Control {
	/// Advance to the next instruction.
	Continue,
	/// Transfer control to an instruction index.
	Jump(u32),
	/// Exit the frame successfully with return data.
	Return(Vec<U256>),
	/// Exit the frame with an explicit revert.
	Revert(Vec<U256>),
	/// Enter a nested call; the callee runs to completion before the
	/// caller resumes.
	Call(CallRequest),
}

/// Parameters of a nested call, decoded from memory by CALL/STATICCALL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallRequest {
	pub target: Address,
	/// Requested gas allocation, clamped to the caller's remainder.
	pub gas: Gas,
	pub calldata: Vec<U256>,
	pub is_static: bool,
	/// Where the caller wants the success flag written.
	pub success_offset: u32,
}

/// Fixed gas cost of one opcode: a base charge plus a per-item charge for
/// instructions whose work scales with an input length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpcodeCost {
	pub base: Gas,
	pub per_item: Gas,
}

const fn fixed(da: u64, l2: u64) -> OpcodeCost {
	OpcodeCost {
		base: Gas::new(da, l2),
		per_item: Gas::empty(),
	}
}

const fn scaling(da: u64, l2: u64, item_da: u64, item_l2: u64) -> OpcodeCost {
	OpcodeCost {
		base: Gas::new(da, l2),
		per_item: Gas::new(item_da, item_l2),
	}
}

/// The fixed cost table. The numbers are not an economic model; they are
/// constants so execution is deterministic and metered.
pub const fn cost_of(opcode: Opcode) -> OpcodeCost {
	match opcode {
		Opcode::Add
		| Opcode::Sub
		| Opcode::Mul
		| Opcode::Div
		| Opcode::FDiv
		| Opcode::Eq
		| Opcode::Lt
		| Opcode::Lte
		| Opcode::And
		| Opcode::Or
		| Opcode::Xor
		| Opcode::Not
		| Opcode::Shl
		| Opcode::Shr => fixed(0, 10),
		Opcode::Set | Opcode::Mov | Opcode::Cast => fixed(0, 10),
		Opcode::CalldataCopy | Opcode::ReturndataCopy => scaling(0, 20, 0, 4),
		Opcode::CalldataSize | Opcode::ReturndataSize => fixed(0, 10),
		Opcode::Jump => fixed(0, 10),
		Opcode::JumpI => fixed(0, 15),
		Opcode::Return | Opcode::Revert => scaling(0, 20, 0, 2),
		Opcode::SLoad => fixed(0, 200),
		Opcode::SStore => fixed(512, 200),
		Opcode::EmitLog => scaling(256, 100, 64, 8),
		Opcode::SendMessage => fixed(512, 100),
		Opcode::Call | Opcode::StaticCall => fixed(0, 2000),
		Opcode::ToRadixBe => scaling(0, 50, 0, 4),
		Opcode::EcAdd => fixed(0, 500),
		Opcode::Msm => scaling(0, 1000, 0, 200),
	}
}

/// Evaluation function type.
pub type Efn<B> = fn(
	&mut AvmContext,
	&mut Journal,
	&B,
	&Instruction,
	&[u32],
) -> Result<Control, AvmError>;

/// One table entry.
pub struct OpcodeEntry<B> {
	pub cost: OpcodeCost,
	pub eval: Efn<B>,
}

const ETABLE_SIZE: usize = 64;

/// The evaluation table, indexed by opcode byte.
pub struct Etable<B>([OpcodeEntry<B>; ETABLE_SIZE]);

impl<B: Backend> Etable<B> {
	/// Build the runtime table. Bytes outside the instruction set get an
	/// entry that classifies them as invalid.
	pub fn runtime() -> Self {
		Self(std::array::from_fn(|byte| match Opcode::parse(byte as u8) {
			Ok(opcode) => OpcodeEntry {
				cost: cost_of(opcode),
				eval: eval_of(opcode),
			},
			Err(_) => OpcodeEntry {
				cost: fixed(0, 0),
				eval: eval_invalid::<B>,
			},
		}))
	}

	pub fn entry(&self, opcode: Opcode) -> &OpcodeEntry<B> {
		&self.0[opcode.as_u8() as usize]
	}
}

fn eval_of<B: Backend>(opcode: Opcode) -> Efn<B> {
	match opcode {
		Opcode::Add
		| Opcode::Sub
		| Opcode::Mul
		| Opcode::Div
		| Opcode::FDiv
		| Opcode::Eq
		| Opcode::Lt
		| Opcode::Lte
		| Opcode::And
		| Opcode::Or
		| Opcode::Xor
		| Opcode::Shl
		| Opcode::Shr => eval_binary::<B>,
		Opcode::Not => eval_not::<B>,
		Opcode::Set => eval_set::<B>,
		Opcode::Mov => eval_mov::<B>,
		Opcode::Cast => eval_cast::<B>,
		Opcode::CalldataCopy => eval_calldata_copy::<B>,
		Opcode::CalldataSize => eval_calldata_size::<B>,
		Opcode::ReturndataCopy => eval_returndata_copy::<B>,
		Opcode::ReturndataSize => eval_returndata_size::<B>,
		Opcode::Jump => eval_jump::<B>,
		Opcode::JumpI => eval_jumpi::<B>,
		Opcode::Return => eval_return::<B>,
		Opcode::Revert => eval_revert::<B>,
		Opcode::SLoad => eval_sload::<B>,
		Opcode::SStore => eval_sstore::<B>,
		Opcode::EmitLog => eval_emit_log::<B>,
		Opcode::SendMessage => eval_send_message::<B>,
		Opcode::Call | Opcode::StaticCall => eval_call::<B>,
		Opcode::ToRadixBe => eval_to_radix_be::<B>,
		Opcode::EcAdd => eval_ec_add::<B>,
		Opcode::Msm => eval_msm::<B>,
	}
}

fn eval_invalid<B>(
	_frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	_offsets: &[u32],
) -> Result<Control, AvmError> {
	Err(AvmError::InvalidOpcode {
		byte: instr.opcode.as_u8(),
	})
}

fn instruction_tag(instr: &Instruction) -> MemoryTag {
	// Shapes guarantee a tag wherever this is called.
	instr.tag.unwrap_or(MemoryTag::Field)
}

fn require_integer_tag(tag: MemoryTag, what: &'static str) -> Result<(), AvmError> {
	if tag == MemoryTag::Field {
		return Err(AvmError::Arithmetic(Cow::Owned(format!(
			"{} is not supported on field elements",
			what
		))));
	}
	Ok(())
}

fn eval_binary<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let tag = instruction_tag(instr);
	let a = frame.memory.read(offsets[0], tag)?;
	let b = frame.memory.read(offsets[1], tag)?;
	let is_field = tag == MemoryTag::Field;

	let (value, out_tag) = match instr.opcode {
		Opcode::Add if is_field => (field_binop(a, b, |x, y| x + y), tag),
		Opcode::Sub if is_field => (field_binop(a, b, |x, y| x - y), tag),
		Opcode::Mul if is_field => (field_binop(a, b, |x, y| x * y), tag),
		Opcode::Add => (a.overflowing_add(b).0, tag),
		Opcode::Sub => (a.overflowing_sub(b).0, tag),
		Opcode::Mul => (a.overflowing_mul(b).0, tag),
		Opcode::Div => {
			require_integer_tag(tag, "Integer division")?;
			(field::u_div(a, b)?, tag)
		}
		Opcode::FDiv => {
			if !is_field {
				return Err(AvmError::Arithmetic(Cow::Borrowed(
					"Field division requires field operands",
				)));
			}
			(
				field::field_to_u256(&field::f_div(
					field::field_from_u256(a),
					field::field_from_u256(b),
				)?),
				tag,
			)
		}
		Opcode::Eq => (U256::from(u8::from(a == b)), MemoryTag::U1),
		Opcode::Lt => (U256::from(u8::from(a < b)), MemoryTag::U1),
		Opcode::Lte => (U256::from(u8::from(a <= b)), MemoryTag::U1),
		Opcode::And => {
			require_integer_tag(tag, "Bitwise AND")?;
			(a & b, tag)
		}
		Opcode::Or => {
			require_integer_tag(tag, "Bitwise OR")?;
			(a | b, tag)
		}
		Opcode::Xor => {
			require_integer_tag(tag, "Bitwise XOR")?;
			(a ^ b, tag)
		}
		Opcode::Shl => {
			require_integer_tag(tag, "Shift")?;
			(shift_left(a, b), tag)
		}
		Opcode::Shr => {
			require_integer_tag(tag, "Shift")?;
			(shift_right(a, b), tag)
		}
		// The table routes only binary opcodes here.
		_ => return Err(AvmError::InvalidOpcode {
			byte: instr.opcode.as_u8(),
		}),
	};

	frame.memory.write(offsets[2], value, out_tag);
	Ok(Control::Continue)
}

fn field_binop(a: U256, b: U256, f: fn(field::AvmField, field::AvmField) -> field::AvmField) -> U256 {
	field::field_to_u256(&f(field::field_from_u256(a), field::field_from_u256(b)))
}

fn shift_left(a: U256, b: U256) -> U256 {
	if b >= U256::from(256u64) {
		U256::zero()
	} else {
		a << b.low_u32()
	}
}

fn shift_right(a: U256, b: U256) -> U256 {
	if b >= U256::from(256u64) {
		U256::zero()
	} else {
		a >> b.low_u32()
	}
}

fn eval_not<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let tag = instruction_tag(instr);
	require_integer_tag(tag, "Bitwise NOT")?;
	let a = frame.memory.read(offsets[0], tag)?;
	frame.memory.write(offsets[1], !a, tag);
	Ok(Control::Continue)
}

fn eval_set<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let tag = instruction_tag(instr);
	let value = match instr.immediate {
		Some(Immediate::Value(v)) => v,
		Some(Immediate::U32(v)) => U256::from(v),
		None => U256::zero(),
	};
	frame.memory.write(offsets[0], value, tag);
	Ok(Control::Continue)
}

fn eval_mov<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	_instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let slot = frame.memory.get(offsets[0]);
	let value = frame.memory.read(offsets[0], slot.tag)?;
	frame.memory.write(offsets[1], value, slot.tag);
	Ok(Control::Continue)
}

fn eval_cast<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let dst_tag = instruction_tag(instr);
	let slot = frame.memory.get(offsets[0]);
	if slot.tag == MemoryTag::Uninitialized {
		return Err(AvmError::TagMismatch {
			offset: offsets[0],
			got: MemoryTag::Uninitialized,
			expected: dst_tag,
		});
	}
	let value = frame.memory.read(offsets[0], slot.tag)?;
	frame.memory.write(offsets[1], value, dst_tag);
	Ok(Control::Continue)
}

fn charge_items(frame: &mut AvmContext, opcode: Opcode, items: u64) -> Result<(), AvmError> {
	frame.gasometer.charge(cost_of(opcode).per_item.scale(items))
}

fn eval_calldata_copy<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let start = frame.memory.read_u32(offsets[0])?;
	let size = frame.memory.read_u32(offsets[1])?;
	charge_items(frame, instr.opcode, u64::from(size))?;
	// Out-of-range calldata reads as zero.
	let values: Vec<U256> = (0..size)
		.map(|i| {
			frame
				.calldata
				.get(start as usize + i as usize)
				.copied()
				.unwrap_or_default()
		})
		.collect();
	frame.memory.write_slice(offsets[2], &values, MemoryTag::Field)?;
	Ok(Control::Continue)
}

fn eval_calldata_size<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	_instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let size = U256::from(frame.calldata.len());
	frame.memory.write(offsets[0], size, MemoryTag::U32);
	Ok(Control::Continue)
}

fn eval_returndata_copy<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let start = frame.memory.read_u32(offsets[0])?;
	let size = frame.memory.read_u32(offsets[1])?;
	charge_items(frame, instr.opcode, u64::from(size))?;
	let values: Vec<U256> = (0..size)
		.map(|i| {
			frame
				.return_data
				.get(start as usize + i as usize)
				.copied()
				.unwrap_or_default()
		})
		.collect();
	frame.memory.write_slice(offsets[2], &values, MemoryTag::Field)?;
	Ok(Control::Continue)
}

fn eval_returndata_size<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	_instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let size = U256::from(frame.return_data.len());
	frame.memory.write(offsets[0], size, MemoryTag::U32);
	Ok(Control::Continue)
}

fn immediate_target(instr: &Instruction) -> u32 {
	match instr.immediate {
		Some(Immediate::U32(target)) => target,
		_ => 0,
	}
}

fn eval_jump<B>(
	_frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	_offsets: &[u32],
) -> Result<Control, AvmError> {
	Ok(Control::Jump(immediate_target(instr)))
}

fn eval_jumpi<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let condition = frame.memory.read(offsets[0], MemoryTag::U1)?;
	if condition.is_zero() {
		Ok(Control::Continue)
	} else {
		Ok(Control::Jump(immediate_target(instr)))
	}
}

fn read_sized_slice(
	frame: &mut AvmContext,
	opcode: Opcode,
	start: u32,
	size_offset: u32,
) -> Result<Vec<U256>, AvmError> {
	let size = frame.memory.read_u32(size_offset)?;
	charge_items(frame, opcode, u64::from(size))?;
	let values = frame.memory.read_slice(start, size)?;
	Ok(values.into_iter().map(|v| v.value).collect())
}

fn eval_return<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let data = read_sized_slice(frame, instr.opcode, offsets[0], offsets[1])?;
	Ok(Control::Return(data))
}

fn eval_revert<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let data = read_sized_slice(frame, instr.opcode, offsets[0], offsets[1])?;
	Ok(Control::Revert(data))
}

fn eval_sload<B: Backend>(
	frame: &mut AvmContext,
	journal: &mut Journal,
	backend: &B,
	_instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let slot = frame.memory.read(offsets[0], MemoryTag::Field)?;
	let value = journal
		.pending_storage(frame.address, slot)
		.unwrap_or_else(|| backend.storage_read(frame.address, slot));
	frame.memory.write(offsets[1], value, MemoryTag::Field);
	Ok(Control::Continue)
}

fn eval_sstore<B>(
	frame: &mut AvmContext,
	journal: &mut Journal,
	_backend: &B,
	_instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let value = frame.memory.read(offsets[0], MemoryTag::Field)?;
	let slot = frame.memory.read(offsets[1], MemoryTag::Field)?;
	journal.write_storage(frame.address, slot, value);
	Ok(Control::Continue)
}

fn eval_emit_log<B>(
	frame: &mut AvmContext,
	journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let size = frame.memory.read_u32(offsets[1])?;
	charge_items(frame, instr.opcode, u64::from(size))?;
	let fields = frame
		.memory
		.read_slice_with_tag(offsets[0], size, MemoryTag::Field)?;
	journal.emit_log(frame.address, fields);
	Ok(Control::Continue)
}

fn eval_send_message<B>(
	frame: &mut AvmContext,
	journal: &mut Journal,
	_backend: &B,
	_instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let recipient = frame.memory.read(offsets[0], MemoryTag::Field)?;
	let content = frame.memory.read(offsets[1], MemoryTag::Field)?;
	journal.send_message(frame.address, recipient, content);
	Ok(Control::Continue)
}

fn eval_call<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let da_gas = frame.memory.read_u32(offsets[0])?;
	let l2_offset = TaggedMemory::resolve_relative(offsets[0], 1)?;
	let l2_gas = frame.memory.read_u32(l2_offset)?;
	let target = Address(frame.memory.read(offsets[1], MemoryTag::Field)?);
	let args_size = frame.memory.read_u32(offsets[3])?;
	let calldata = frame
		.memory
		.read_slice(offsets[2], args_size)?
		.into_iter()
		.map(|v| v.value)
		.collect();

	Ok(Control::Call(CallRequest {
		target,
		gas: Gas::new(u64::from(da_gas), u64::from(l2_gas)),
		calldata,
		is_static: instr.opcode == Opcode::StaticCall,
		success_offset: offsets[4],
	}))
}

fn eval_to_radix_be<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let value = frame.memory.read(offsets[0], MemoryTag::Field)?;
	let radix = frame.memory.read_u32(offsets[1])?;
	let num_limbs = frame.memory.read_u32(offsets[2])?;
	charge_items(frame, instr.opcode, u64::from(num_limbs))?;
	let limbs = field::to_radix_be(value, radix, num_limbs)?;
	let values: Vec<U256> = limbs.into_iter().map(U256::from).collect();
	frame.memory.write_slice(offsets[3], &values, MemoryTag::U8)?;
	Ok(Control::Continue)
}

fn eval_ec_add<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	_instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let p = frame
		.memory
		.read_slice_with_tag(offsets[0], 3, MemoryTag::Field)?;
	let q = frame
		.memory
		.read_slice_with_tag(offsets[1], 3, MemoryTag::Field)?;
	let sum = ec_add(
		CurvePoint::from_fields(p[0], p[1], p[2]),
		CurvePoint::from_fields(q[0], q[1], q[2]),
	)?;
	frame
		.memory
		.write_slice(offsets[2], &sum.to_fields(), MemoryTag::Field)?;
	Ok(Control::Continue)
}

fn eval_msm<B>(
	frame: &mut AvmContext,
	_journal: &mut Journal,
	_backend: &B,
	instr: &Instruction,
	offsets: &[u32],
) -> Result<Control, AvmError> {
	let num_fields = frame.memory.read_u32(offsets[2])?;
	if num_fields % 3 != 0 {
		return Err(AvmError::MsmPointsLength(num_fields));
	}
	let num_points = num_fields / 3;
	charge_items(frame, instr.opcode, u64::from(num_points))?;

	let point_fields = frame
		.memory
		.read_slice_with_tag(offsets[0], num_fields, MemoryTag::Field)?;
	let scalars: Vec<_> = frame
		.memory
		.read_slice_with_tag(offsets[1], num_points, MemoryTag::Field)?
		.into_iter()
		.map(field::grumpkin_scalar_from_u256)
		.collect();

	let result = msm(&point_fields, &scalars)?;
	frame
		.memory
		.write_slice(offsets[3], &result.to_fields(), MemoryTag::Field)?;
	Ok(Control::Continue)
}
