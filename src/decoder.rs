//! Bytecode decoding and program-counter validation.
//!
//! The whole stream is parsed before the first instruction executes. The
//! program counter then indexes the parsed instruction sequence, so every
//! fetch and every jump target is checked against `[0, code_len)`.
//!
//! Wire layout of one instruction:
//! `[opcode u8] [mode u8] [tag u8]? [immediate u32|32 bytes]? [offset u32 BE]*`
//! where the tag, immediate and offset-count are fixed by the opcode's
//! operand shape. Mode bit `i` marks offset operand `i` as relative to the
//! frame's base pointer.

use primitive_types::U256;

use crate::error::AvmError;
use crate::memory::MemoryTag;
use crate::opcode::Opcode;

/// Immediate operand kinds, as described by an operand shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImmediateKind {
	None,
	/// A 4-byte instruction index (jump targets).
	U32,
	/// A full 32-byte value (SET).
	Value,
}

/// Decoded immediate operand.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Immediate {
	U32(u32),
	Value(U256),
}

/// Decode layout of one opcode's operands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OperandShape {
	pub has_tag: bool,
	pub immediate: ImmediateKind,
	pub offsets: u8,
}

impl OperandShape {
	const fn new(has_tag: bool, immediate: ImmediateKind, offsets: u8) -> Self {
		Self {
			has_tag,
			immediate,
			offsets,
		}
	}

	/// The shape of `opcode`'s operands; drives both decode and encode.
	pub const fn of(opcode: Opcode) -> Self {
		use ImmediateKind::*;
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
			| Opcode::Shr => Self::new(true, None, 3),
			Opcode::Not | Opcode::Cast => Self::new(true, None, 2),
			Opcode::Set => Self::new(true, Value, 1),
			Opcode::Mov => Self::new(false, None, 2),
			Opcode::CalldataCopy | Opcode::ReturndataCopy => Self::new(false, None, 3),
			Opcode::CalldataSize | Opcode::ReturndataSize => Self::new(false, None, 1),
			Opcode::Jump => Self::new(false, U32, 0),
			Opcode::JumpI => Self::new(false, U32, 1),
			Opcode::Return | Opcode::Revert => Self::new(false, None, 2),
			Opcode::SLoad | Opcode::SStore => Self::new(false, None, 2),
			Opcode::EmitLog | Opcode::SendMessage => Self::new(false, None, 2),
			Opcode::Call | Opcode::StaticCall => Self::new(false, None, 5),
			Opcode::ToRadixBe => Self::new(false, None, 4),
			Opcode::EcAdd => Self::new(false, None, 3),
			Opcode::Msm => Self::new(false, None, 4),
		}
	}
}

/// One decoded instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
	pub opcode: Opcode,
	/// Relative-addressing bits, one per offset operand.
	pub mode: u8,
	pub tag: Option<MemoryTag>,
	pub immediate: Option<Immediate>,
	pub offsets: Vec<u32>,
}

impl Instruction {
	/// Encoded byte length of this instruction.
	pub fn encoded_size(&self) -> usize {
		let shape = OperandShape::of(self.opcode);
		let imm = match shape.immediate {
			ImmediateKind::None => 0,
			ImmediateKind::U32 => 4,
			ImmediateKind::Value => 32,
		};
		2 + usize::from(shape.has_tag) + imm + 4 * shape.offsets as usize
	}

	/// Serialize; exact inverse of [`parse`] for a single instruction.
	pub fn encode(&self) -> Vec<u8> {
		let mut bytes = Vec::with_capacity(self.encoded_size());
		bytes.push(self.opcode.as_u8());
		bytes.push(self.mode);
		if let Some(tag) = self.tag {
			bytes.push(tag as u8);
		}
		match self.immediate {
			Some(Immediate::U32(v)) => bytes.extend_from_slice(&v.to_be_bytes()),
			Some(Immediate::Value(v)) => {
				let mut be = [0u8; 32];
				v.to_big_endian(&mut be);
				bytes.extend_from_slice(&be);
			}
			None => {}
		}
		for offset in &self.offsets {
			bytes.extend_from_slice(&offset.to_be_bytes());
		}
		bytes
	}
}

struct Reader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn take(&mut self, n: usize) -> Result<&'a [u8], AvmError> {
		if self.pos + n > self.bytes.len() {
			return Err(AvmError::Parsing {
				offset: self.pos as u32,
				message: "unexpected end of bytecode".into(),
			});
		}
		let slice = &self.bytes[self.pos..self.pos + n];
		self.pos += n;
		Ok(slice)
	}

	fn byte(&mut self) -> Result<u8, AvmError> {
		Ok(self.take(1)?[0])
	}

	fn u32_be(&mut self) -> Result<u32, AvmError> {
		let bytes = self.take(4)?;
		Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
	}
}

/// Parse a whole bytecode stream into its instruction sequence.
///
/// An unrecognized opcode byte classifies as `InvalidOpcode` (reverting the
/// frame being entered); structural damage such as truncated operands or an
/// invalid tag byte is `Parsing` and aborts the transaction.
pub fn parse(bytecode: &[u8]) -> Result<Vec<Instruction>, AvmError> {
	let mut reader = Reader {
		bytes: bytecode,
		pos: 0,
	};
	let mut instructions = Vec::new();

	while reader.pos < bytecode.len() {
		let at = reader.pos as u32;
		let opcode = Opcode::parse(reader.byte()?)?;
		let shape = OperandShape::of(opcode);

		let mode = reader.byte()?;
		if shape.offsets < 8 && mode >> shape.offsets != 0 {
			return Err(AvmError::Parsing {
				offset: at,
				message: format!(
					"addressing mode {:#04x} names operands {} does not have",
					mode, opcode
				)
				.into(),
			});
		}

		let tag = if shape.has_tag {
			let byte = reader.byte()?;
			match MemoryTag::from_byte(byte) {
				Some(tag) => Some(tag),
				None => {
					return Err(AvmError::Parsing {
						offset: at,
						message: format!("invalid tag byte {:#04x}", byte).into(),
					})
				}
			}
		} else {
			None
		};

		let immediate = match shape.immediate {
			ImmediateKind::None => None,
			ImmediateKind::U32 => Some(Immediate::U32(reader.u32_be()?)),
			ImmediateKind::Value => Some(Immediate::Value(U256::from_big_endian(reader.take(32)?))),
		};

		let mut offsets = Vec::with_capacity(shape.offsets as usize);
		for _ in 0..shape.offsets {
			offsets.push(reader.u32_be()?);
		}

		instructions.push(Instruction {
			opcode,
			mode,
			tag,
			immediate,
			offsets,
		});
	}

	Ok(instructions)
}

/// Check a program counter against the parsed code length.
pub fn validate_pc(pc: u32, code_len: u32) -> Result<(), AvmError> {
	if pc >= code_len {
		return Err(AvmError::InvalidProgramCounter { pc, code_len });
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn set(dst: u32, value: u64, tag: MemoryTag) -> Instruction {
		Instruction {
			opcode: Opcode::Set,
			mode: 0,
			tag: Some(tag),
			immediate: Some(Immediate::Value(U256::from(value))),
			offsets: vec![dst],
		}
	}

	#[test]
	fn encode_parse_round_trip() {
		let program = vec![
			set(0, 5, MemoryTag::U32),
			Instruction {
				opcode: Opcode::Add,
				mode: 0b010,
				tag: Some(MemoryTag::U32),
				immediate: None,
				offsets: vec![0, 1, 2],
			},
			Instruction {
				opcode: Opcode::Jump,
				mode: 0,
				tag: None,
				immediate: Some(Immediate::U32(7)),
				offsets: vec![],
			},
		];
		let bytes: Vec<u8> = program.iter().flat_map(|i| i.encode()).collect();
		assert_eq!(parse(&bytes).unwrap(), program);
	}

	#[test]
	fn encoded_size_matches_encoding() {
		let instr = set(9, 1, MemoryTag::Field);
		assert_eq!(instr.encode().len(), instr.encoded_size());
	}

	#[test]
	fn unknown_opcode_byte_classifies_as_invalid_opcode() {
		assert_eq!(
			parse(&[0xee]).unwrap_err(),
			AvmError::InvalidOpcode { byte: 0xee }
		);
	}

	#[test]
	fn truncated_operands_are_a_parsing_error() {
		// SET announces a tag and a 32-byte immediate but the stream ends.
		let err = parse(&[Opcode::Set.as_u8(), 0, MemoryTag::U32 as u8, 1, 2]).unwrap_err();
		assert!(matches!(err, AvmError::Parsing { .. }));
		assert!(err.is_fatal());
	}

	#[test]
	fn invalid_tag_byte_is_a_parsing_error() {
		let mut bytes = set(0, 5, MemoryTag::U32).encode();
		bytes[2] = 0x7f;
		assert!(matches!(
			parse(&bytes).unwrap_err(),
			AvmError::Parsing { .. }
		));
	}

	#[test]
	fn stray_mode_bits_are_a_parsing_error() {
		let mut bytes = set(0, 5, MemoryTag::U32).encode();
		bytes[1] = 0b10;
		assert!(matches!(
			parse(&bytes).unwrap_err(),
			AvmError::Parsing { .. }
		));
	}

	#[test]
	fn pc_validation_carries_pc_and_code_len() {
		assert!(validate_pc(0, 4).is_ok());
		assert!(validate_pc(3, 4).is_ok());
		let err = validate_pc(4, 4).unwrap_err();
		assert_eq!(err, AvmError::InvalidProgramCounter { pc: 4, code_len: 4 });
		assert_eq!(err.to_string(), "Invalid program counter 4, max is 4");
	}
}
