//! Tagged memory for one execution frame.
//!
//! Memory is a sparse map over the 32-bit address space. Every slot pairs a
//! value of up to 256 bits with a tag naming its declared type; reads state
//! the tag they expect and fail on a mismatch. A frame's memory is exclusive
//! to it and released when the frame is destroyed.

use std::collections::HashMap;
use std::fmt;

use primitive_types::U256;

use crate::error::AvmError;
use crate::field;
use crate::trace::{MemoryAccess, MemoryOp};

/// Number of addressable slots: the full 32-bit space.
pub const MEMORY_ADDRESS_SPACE: u64 = 1 << 32;

/// Declared type of a memory slot's contents.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum MemoryTag {
	/// A slot that has never been written.
	Uninitialized = 0,
	U1 = 1,
	U8 = 2,
	U16 = 3,
	U32 = 4,
	U64 = 5,
	U128 = 6,
	/// A prime-field element.
	Field = 7,
}

impl MemoryTag {
	/// Decode a tag byte from the instruction stream.
	pub fn from_byte(byte: u8) -> Option<Self> {
		Some(match byte {
			1 => Self::U1,
			2 => Self::U8,
			3 => Self::U16,
			4 => Self::U32,
			5 => Self::U64,
			6 => Self::U128,
			7 => Self::Field,
			_ => return None,
		})
	}

	/// Bit width of an integer tag. `None` for `Field` and `Uninitialized`.
	pub fn bits(&self) -> Option<u32> {
		Some(match self {
			Self::U1 => 1,
			Self::U8 => 8,
			Self::U16 => 16,
			Self::U32 => 32,
			Self::U64 => 64,
			Self::U128 => 128,
			Self::Field | Self::Uninitialized => return None,
		})
	}

	/// Truncate `value` so it is representable under this tag. Integer tags
	/// mask to their width; `Field` reduces modulo the field prime.
	pub fn truncate(&self, value: U256) -> U256 {
		match self.bits() {
			Some(bits) => value & ((U256::one() << bits) - U256::one()),
			None => match self {
				Self::Field => value % field::modulus(),
				Self::Uninitialized => value,
				_ => value,
			},
		}
	}
}

impl fmt::Display for MemoryTag {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Self::Uninitialized => "UNINITIALIZED",
			Self::U1 => "U1",
			Self::U8 => "U8",
			Self::U16 => "U16",
			Self::U32 => "U32",
			Self::U64 => "U64",
			Self::U128 => "U128",
			Self::Field => "FF",
		};
		f.write_str(name)
	}
}

/// A value paired with its declared tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryValue {
	pub value: U256,
	pub tag: MemoryTag,
}

impl MemoryValue {
	pub fn new(value: U256, tag: MemoryTag) -> Self {
		Self {
			value: tag.truncate(value),
			tag,
		}
	}

	/// The untouched-slot value.
	pub const fn uninitialized() -> Self {
		Self {
			value: U256::zero(),
			tag: MemoryTag::Uninitialized,
		}
	}
}

/// Typed addressable storage for one execution frame.
///
/// Reads and writes are recorded in an op log drained by the interpreter
/// after each instruction into the execution trace.
#[derive(Debug, Default)]
pub struct TaggedMemory {
	slots: HashMap<u32, MemoryValue>,
	ops: Vec<MemoryOp>,
}

impl TaggedMemory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current value of a slot regardless of tag. Unwritten slots read as
	/// `Uninitialized` zero.
	pub fn get(&self, offset: u32) -> MemoryValue {
		self.slots
			.get(&offset)
			.copied()
			.unwrap_or(MemoryValue::uninitialized())
	}

	/// Read a slot, checking its stored tag against `expected`.
	pub fn read(&mut self, offset: u32, expected: MemoryTag) -> Result<U256, AvmError> {
		let slot = self.get(offset);
		if slot.tag != expected {
			return Err(AvmError::TagMismatch {
				offset,
				got: slot.tag,
				expected,
			});
		}
		self.ops.push(MemoryOp {
			access: MemoryAccess::Read,
			addr: offset,
			value: slot.value,
			tag: slot.tag,
		});
		Ok(slot.value)
	}

	/// Read a slot expected to hold a `U32`, as a native integer.
	pub fn read_u32(&mut self, offset: u32) -> Result<u32, AvmError> {
		Ok(self.read(offset, MemoryTag::U32)?.low_u32())
	}

	/// Write a slot. Always succeeds for any 32-bit offset; the value is
	/// truncated to the tag's representable range.
	pub fn write(&mut self, offset: u32, value: U256, tag: MemoryTag) {
		let slot = MemoryValue::new(value, tag);
		self.ops.push(MemoryOp {
			access: MemoryAccess::Write,
			addr: offset,
			value: slot.value,
			tag: slot.tag,
		});
		self.slots.insert(offset, slot);
	}

	/// Resolve a relative operand against a base pointer.
	pub fn resolve_relative(base: u32, offset: u32) -> Result<u32, AvmError> {
		let resolved = u64::from(base) + u64::from(offset);
		if resolved >= MEMORY_ADDRESS_SPACE {
			return Err(AvmError::RelativeAddressOutOfRange { base, offset });
		}
		Ok(resolved as u32)
	}

	/// Read `size` consecutive slots starting at `base`, tags untouched.
	pub fn read_slice(&mut self, base: u32, size: u32) -> Result<Vec<MemoryValue>, AvmError> {
		if u64::from(base) + u64::from(size) > MEMORY_ADDRESS_SPACE {
			return Err(AvmError::MemorySliceOutOfRange { base, size });
		}
		let mut values = Vec::with_capacity(size as usize);
		for i in 0..size {
			let slot = self.get(base + i);
			self.ops.push(MemoryOp {
				access: MemoryAccess::Read,
				addr: base + i,
				value: slot.value,
				tag: slot.tag,
			});
			values.push(slot);
		}
		Ok(values)
	}

	/// Read a slice in which every slot must carry `expected`.
	pub fn read_slice_with_tag(
		&mut self,
		base: u32,
		size: u32,
		expected: MemoryTag,
	) -> Result<Vec<U256>, AvmError> {
		let values = self.read_slice(base, size)?;
		for (i, slot) in values.iter().enumerate() {
			if slot.tag != expected {
				return Err(AvmError::TagMismatch {
					offset: base + i as u32,
					got: slot.tag,
					expected,
				});
			}
		}
		Ok(values.into_iter().map(|v| v.value).collect())
	}

	/// Write a slice of values starting at `base` under one tag.
	pub fn write_slice(&mut self, base: u32, values: &[U256], tag: MemoryTag) -> Result<(), AvmError> {
		if u64::from(base) + values.len() as u64 > MEMORY_ADDRESS_SPACE {
			return Err(AvmError::MemorySliceOutOfRange {
				base,
				size: values.len() as u32,
			});
		}
		for (i, value) in values.iter().enumerate() {
			self.write(base + i as u32, *value, tag);
		}
		Ok(())
	}

	/// Drain the ops recorded since the last call. One drain per executed
	/// instruction keeps trace steps aligned with instructions.
	pub fn take_ops(&mut self) -> Vec<MemoryOp> {
		std::mem::take(&mut self.ops)
	}
}
