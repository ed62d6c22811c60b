//! The closed instruction set.

use std::fmt;

use crate::error::AvmError;

/// Opcode enum. One-to-one corresponding to a `u8` value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum Opcode {
	// Arithmetic and logic, operating on one declared tag.
	Add = 0x00,
	Sub = 0x01,
	Mul = 0x02,
	/// Integer division. Field operands are an arithmetic error.
	Div = 0x03,
	/// Field division. Operands must carry the field tag.
	FDiv = 0x04,
	Eq = 0x05,
	Lt = 0x06,
	Lte = 0x07,
	And = 0x08,
	Or = 0x09,
	Xor = 0x0a,
	Not = 0x0b,
	Shl = 0x0c,
	Shr = 0x0d,

	// Memory.
	Set = 0x10,
	Mov = 0x11,
	Cast = 0x12,

	// Calldata and return data.
	CalldataCopy = 0x18,
	CalldataSize = 0x19,
	ReturndataCopy = 0x1a,
	ReturndataSize = 0x1b,

	// Control flow.
	Jump = 0x20,
	JumpI = 0x21,
	Return = 0x22,
	Revert = 0x23,

	// Persistent state and side effects.
	SLoad = 0x28,
	SStore = 0x29,
	EmitLog = 0x2a,
	SendMessage = 0x2b,

	// Nested calls.
	Call = 0x30,
	StaticCall = 0x31,

	// Crypto.
	ToRadixBe = 0x38,
	EcAdd = 0x39,
	Msm = 0x3a,
}

impl Opcode {
	/// Decode an opcode byte, rejecting anything outside the closed set.
	pub fn parse(byte: u8) -> Result<Self, AvmError> {
		Some(byte)
			.and_then(|b| match b {
				0x00 => Some(Self::Add),
				0x01 => Some(Self::Sub),
				0x02 => Some(Self::Mul),
				0x03 => Some(Self::Div),
				0x04 => Some(Self::FDiv),
				0x05 => Some(Self::Eq),
				0x06 => Some(Self::Lt),
				0x07 => Some(Self::Lte),
				0x08 => Some(Self::And),
				0x09 => Some(Self::Or),
				0x0a => Some(Self::Xor),
				0x0b => Some(Self::Not),
				0x0c => Some(Self::Shl),
				0x0d => Some(Self::Shr),
				0x10 => Some(Self::Set),
				0x11 => Some(Self::Mov),
				0x12 => Some(Self::Cast),
				0x18 => Some(Self::CalldataCopy),
				0x19 => Some(Self::CalldataSize),
				0x1a => Some(Self::ReturndataCopy),
				0x1b => Some(Self::ReturndataSize),
				0x20 => Some(Self::Jump),
				0x21 => Some(Self::JumpI),
				0x22 => Some(Self::Return),
				0x23 => Some(Self::Revert),
				0x28 => Some(Self::SLoad),
				0x29 => Some(Self::SStore),
				0x2a => Some(Self::EmitLog),
				0x2b => Some(Self::SendMessage),
				0x30 => Some(Self::Call),
				0x31 => Some(Self::StaticCall),
				0x38 => Some(Self::ToRadixBe),
				0x39 => Some(Self::EcAdd),
				0x3a => Some(Self::Msm),
				_ => None,
			})
			.ok_or(AvmError::InvalidOpcode { byte })
	}

	pub const fn as_u8(self) -> u8 {
		self as u8
	}

	/// Whether the instruction writes persistent state, emits a log, or
	/// sends an outbound message. Rejected under a static frame before any
	/// side effect occurs.
	pub const fn mutates_state(self) -> bool {
		matches!(self, Self::SStore | Self::EmitLog | Self::SendMessage)
	}
}

impl fmt::Display for Opcode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?}", self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_round_trips_the_whole_set() {
		for byte in 0..=0xffu8 {
			if let Ok(opcode) = Opcode::parse(byte) {
				assert_eq!(opcode.as_u8(), byte);
			}
		}
	}

	#[test]
	fn unknown_byte_is_named_in_the_classification() {
		let err = Opcode::parse(0xee).unwrap_err();
		assert_eq!(err, AvmError::InvalidOpcode { byte: 0xee });
		assert_eq!(err.to_string(), "Opcode 0xee is not in the instruction set");
	}

	#[test]
	fn only_state_touching_opcodes_are_static_restricted() {
		for opcode in [Opcode::SStore, Opcode::EmitLog, Opcode::SendMessage] {
			assert!(opcode.mutates_state());
		}
		for opcode in [Opcode::Add, Opcode::SLoad, Opcode::Call, Opcode::Return] {
			assert!(!opcode.mutates_state());
		}
	}
}
