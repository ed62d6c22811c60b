//! External collaborators of the interpreter core.

use std::collections::HashMap;

use primitive_types::U256;

use crate::Address;

/// Read-only view of committed chain state.
///
/// Contract-code lookup returning `None` classifies as
/// `NoBytecodeForContract` at the call site. Storage writes never flow
/// through here; they are journaled and surfaced in the execution result.
pub trait Backend {
	/// Bytecode deployed at `address`, if any.
	fn bytecode(&self, address: Address) -> Option<Vec<u8>>;

	/// Committed storage value; unset slots read as zero.
	fn storage_read(&self, address: Address, slot: U256) -> U256;
}

/// In-memory backend for tests and local execution.
#[derive(Debug, Default)]
pub struct MemoryBackend {
	code: HashMap<Address, Vec<u8>>,
	storage: HashMap<(Address, U256), U256>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn deploy(&mut self, address: Address, bytecode: Vec<u8>) {
		self.code.insert(address, bytecode);
	}

	pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) {
		self.storage.insert((address, slot), value);
	}
}

impl Backend for MemoryBackend {
	fn bytecode(&self, address: Address) -> Option<Vec<u8>> {
		self.code.get(&address).cloned()
	}

	fn storage_read(&self, address: Address, slot: U256) -> U256 {
		self.storage
			.get(&(address, slot))
			.copied()
			.unwrap_or_default()
	}
}
