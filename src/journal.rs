//! Checkpointed journal of side effects.
//!
//! State writes, logs and outbound messages are appended during execution
//! and rolled back to the enclosing frame's checkpoint when that frame
//! reverts. Nothing is committed anywhere until the interpreter assembles
//! the final result.

use primitive_types::U256;

use crate::Address;

/// One storage write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StorageWrite {
	pub address: Address,
	pub slot: U256,
	pub value: U256,
}

/// One emitted log: the emitting contract and its field payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
	pub address: Address,
	pub fields: Vec<U256>,
}

/// One L2-to-L1 message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutboundMessage {
	pub sender: Address,
	pub recipient: U256,
	pub content: U256,
}

/// Side effects accumulated by a transaction, surfaced in the result when
/// the execution succeeded and was not static.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SideEffects {
	pub storage_writes: Vec<StorageWrite>,
	pub logs: Vec<LogEntry>,
	pub messages: Vec<OutboundMessage>,
}

impl SideEffects {
	pub fn is_empty(&self) -> bool {
		self.storage_writes.is_empty() && self.logs.is_empty() && self.messages.is_empty()
	}
}

/// Lengths of the journal's logs at frame entry.
#[derive(Clone, Copy, Debug)]
pub struct Checkpoint {
	storage_writes: usize,
	logs: usize,
	messages: usize,
}

/// Append-only effect log with per-frame rollback.
#[derive(Debug, Default)]
pub struct Journal {
	effects: SideEffects,
}

impl Journal {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn checkpoint(&self) -> Checkpoint {
		Checkpoint {
			storage_writes: self.effects.storage_writes.len(),
			logs: self.effects.logs.len(),
			messages: self.effects.messages.len(),
		}
	}

	/// Discard everything appended since `checkpoint`.
	pub fn rollback(&mut self, checkpoint: Checkpoint) {
		self.effects.storage_writes.truncate(checkpoint.storage_writes);
		self.effects.logs.truncate(checkpoint.logs);
		self.effects.messages.truncate(checkpoint.messages);
	}

	pub fn write_storage(&mut self, address: Address, slot: U256, value: U256) {
		self.effects.storage_writes.push(StorageWrite {
			address,
			slot,
			value,
		});
	}

	/// The value a storage read observes: the newest uncommitted write, if
	/// any, wins over committed state.
	pub fn pending_storage(&self, address: Address, slot: U256) -> Option<U256> {
		self.effects
			.storage_writes
			.iter()
			.rev()
			.find(|w| w.address == address && w.slot == slot)
			.map(|w| w.value)
	}

	pub fn emit_log(&mut self, address: Address, fields: Vec<U256>) {
		self.effects.logs.push(LogEntry { address, fields });
	}

	pub fn send_message(&mut self, sender: Address, recipient: U256, content: U256) {
		self.effects.messages.push(OutboundMessage {
			sender,
			recipient,
			content,
		});
	}

	pub fn into_effects(self) -> SideEffects {
		self.effects
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rollback_discards_effects_after_the_checkpoint() {
		let mut journal = Journal::new();
		journal.write_storage(Address::from(1), U256::from(1u64), U256::from(10u64));
		let checkpoint = journal.checkpoint();
		journal.write_storage(Address::from(1), U256::from(2u64), U256::from(20u64));
		journal.emit_log(Address::from(1), vec![U256::from(3u64)]);
		journal.rollback(checkpoint);

		let effects = journal.into_effects();
		assert_eq!(effects.storage_writes.len(), 1);
		assert!(effects.logs.is_empty());
	}

	#[test]
	fn pending_storage_sees_the_newest_write() {
		let mut journal = Journal::new();
		let addr = Address::from(9);
		journal.write_storage(addr, U256::from(1u64), U256::from(10u64));
		journal.write_storage(addr, U256::from(1u64), U256::from(11u64));
		assert_eq!(
			journal.pending_storage(addr, U256::from(1u64)),
			Some(U256::from(11u64))
		);
		assert_eq!(journal.pending_storage(addr, U256::from(2u64)), None);
	}
}
