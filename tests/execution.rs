//! End-to-end execution tests against an in-memory backend.

use avm_interpreter::{
	Address, AvmError, AvmInterpreter, ExecutionRequest, ExecutionResult, Gas, Immediate,
	Instruction, LogEntry, MemoryBackend, MemoryTag, Opcode, OutboundMessage, StorageWrite,
};
use primitive_types::U256;

fn instr(
	opcode: Opcode,
	mode: u8,
	tag: Option<MemoryTag>,
	immediate: Option<Immediate>,
	offsets: Vec<u32>,
) -> Instruction {
	Instruction {
		opcode,
		mode,
		tag,
		immediate,
		offsets,
	}
}

fn set(dst: u32, value: impl Into<U256>, tag: MemoryTag) -> Instruction {
	instr(
		Opcode::Set,
		0,
		Some(tag),
		Some(Immediate::Value(value.into())),
		vec![dst],
	)
}

fn binary(opcode: Opcode, tag: MemoryTag, a: u32, b: u32, dst: u32) -> Instruction {
	instr(opcode, 0, Some(tag), None, vec![a, b, dst])
}

fn ret(start: u32, size_offset: u32) -> Instruction {
	instr(Opcode::Return, 0, None, None, vec![start, size_offset])
}

fn assemble(program: &[Instruction]) -> Vec<u8> {
	program.iter().flat_map(Instruction::encode).collect()
}

/// SET the five memory slots a CALL consumes and issue the call.
///
/// Layout: da gas at `base`, l2 gas at `base + 1`, target at `base + 2`,
/// args size (zero) at `base + 3`, success flag at `base + 4`.
fn call_with_no_args(base: u32, target: Address, l2_gas: u32) -> Vec<Instruction> {
	vec![
		set(base, 0u64, MemoryTag::U32),
		set(base + 1, l2_gas, MemoryTag::U32),
		set(base + 2, target.0, MemoryTag::Field),
		set(base + 3, 0u64, MemoryTag::U32),
		instr(
			Opcode::Call,
			0,
			None,
			None,
			vec![base, base + 2, 0, base + 3, base + 4],
		),
	]
}

fn execute(
	backend: &MemoryBackend,
	address: Address,
	calldata: Vec<U256>,
	gas: Gas,
) -> ExecutionResult {
	execute_static(backend, address, calldata, gas, false)
}

fn execute_static(
	backend: &MemoryBackend,
	address: Address,
	calldata: Vec<U256>,
	gas: Gas,
	static_call: bool,
) -> ExecutionResult {
	AvmInterpreter::new(backend)
		.execute(ExecutionRequest {
			address,
			sender: Address::from(0xaaaa),
			calldata,
			gas,
			static_call,
		})
		.unwrap()
}

const PLENTY: Gas = Gas::new(1_000_000, 1_000_000);

#[test]
fn add_two_numbers_and_return() {
	let target = Address::from(1);
	let program = assemble(&[
		set(0, 5u64, MemoryTag::U32),
		set(1, 7u64, MemoryTag::U32),
		binary(Opcode::Add, MemoryTag::U32, 0, 1, 2),
		set(3, 1u64, MemoryTag::U32),
		ret(2, 3),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(result.success);
	assert_eq!(result.return_data, vec![U256::from(12u64)]);
	assert!(result.revert_reason.is_none());
	// 3 SETs and an ADD at 10 l2 each, RETURN at 20 + 2 per value.
	assert_eq!(result.gas_consumed, Gas::new(0, 62));
}

#[test]
fn countdown_loop_with_backward_jump() {
	let target = Address::from(2);
	let program = assemble(&[
		set(0, 3u64, MemoryTag::U32),
		set(1, 1u64, MemoryTag::U32),
		set(9, 0u64, MemoryTag::U32),
		binary(Opcode::Sub, MemoryTag::U32, 0, 1, 0),
		binary(Opcode::Eq, MemoryTag::U32, 0, 9, 2),
		instr(Opcode::Not, 0, Some(MemoryTag::U1), None, vec![2, 3]),
		instr(Opcode::JumpI, 0, None, Some(Immediate::U32(3)), vec![3]),
		set(4, 1u64, MemoryTag::U32),
		ret(0, 4),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(result.success);
	assert_eq!(result.return_data, vec![U256::zero()]);
}

#[test]
fn relative_addressing_resolves_against_the_base_pointer() {
	let target = Address::from(3);
	let program = assemble(&[
		set(0, 100u64, MemoryTag::U32),
		set(100, 5u64, MemoryTag::U32),
		set(101, 7u64, MemoryTag::U32),
		// All three operands relative: 0+100, 1+100, 2+100.
		instr(
			Opcode::Add,
			0b111,
			Some(MemoryTag::U32),
			None,
			vec![0, 1, 2],
		),
		set(5, 1u64, MemoryTag::U32),
		ret(102, 5),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(result.success);
	assert_eq!(result.return_data, vec![U256::from(12u64)]);
}

#[test]
fn calldata_flows_through_copy_and_field_arithmetic() {
	let target = Address::from(4);
	let program = assemble(&[
		set(0, 0u64, MemoryTag::U32),
		set(1, 2u64, MemoryTag::U32),
		instr(Opcode::CalldataCopy, 0, None, None, vec![0, 1, 10]),
		binary(Opcode::Add, MemoryTag::Field, 10, 11, 12),
		set(2, 1u64, MemoryTag::U32),
		ret(12, 2),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let calldata = vec![U256::from(5u64), U256::from(7u64)];
	let result = execute(&backend, target, calldata, PLENTY);
	assert!(result.success);
	assert_eq!(result.return_data, vec![U256::from(12u64)]);
}

#[test]
fn tag_mismatch_reverts_with_offset_and_tags() {
	let target = Address::from(5);
	let program = assemble(&[
		set(0, 5u64, MemoryTag::U64),
		set(1, 7u64, MemoryTag::U64),
		binary(Opcode::Add, MemoryTag::U32, 0, 1, 2),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(!result.success);
	let reason = result.revert_reason.unwrap();
	assert_eq!(
		reason.message,
		"Tag mismatch at offset 0, got U64, expected U32"
	);
	assert_eq!(reason.failing_function.contract_address, target);
}

#[test]
fn division_by_zero_reverts_the_frame() {
	let target = Address::from(6);
	let program = assemble(&[
		set(0, 1u64, MemoryTag::U32),
		set(1, 0u64, MemoryTag::U32),
		binary(Opcode::Div, MemoryTag::U32, 0, 1, 2),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(!result.success);
	assert_eq!(result.revert_reason.unwrap().message, "Division by zero");
}

#[test]
fn out_of_gas_halts_before_the_deficient_charge() {
	let target = Address::from(7);
	let program = assemble(&[
		set(0, 1u64, MemoryTag::U32),
		set(1, 2u64, MemoryTag::U32),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	// Enough for one SET (10 l2) but not two.
	let result = execute(&backend, target, vec![], Gas::new(0, 15));
	assert!(!result.success);
	assert_eq!(
		result.revert_reason.unwrap().message,
		"Not enough L2 gas left"
	);
	assert_eq!(result.gas_consumed, Gas::new(0, 10));
}

#[test]
fn jump_outside_the_code_reverts_with_the_bad_pc() {
	let target = Address::from(8);
	let program = assemble(&[instr(
		Opcode::Jump,
		0,
		None,
		Some(Immediate::U32(5)),
		vec![],
	)]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(!result.success);
	assert_eq!(
		result.revert_reason.unwrap().message,
		"Invalid program counter 5, max is 1"
	);
}

#[test]
fn truncated_bytecode_is_fatal() {
	let target = Address::from(9);
	let mut backend = MemoryBackend::new();
	// SET announces a tag and a 32-byte immediate, then the stream ends.
	backend.deploy(target, vec![Opcode::Set.as_u8(), 0, MemoryTag::U32 as u8]);

	let err = AvmInterpreter::new(&backend)
		.execute(ExecutionRequest {
			address: target,
			sender: Address::from(0xaaaa),
			calldata: vec![],
			gas: PLENTY,
			static_call: false,
		})
		.unwrap_err();
	assert!(err.is_fatal());
	assert!(matches!(err, AvmError::Parsing { .. }));
}

#[test]
fn storage_round_trips_through_the_journal() {
	let target = Address::from(10);
	let program = assemble(&[
		set(0, 42u64, MemoryTag::Field),
		set(1, 7u64, MemoryTag::Field),
		instr(Opcode::SStore, 0, None, None, vec![0, 1]),
		// SLOAD of the same slot must observe the uncommitted write.
		instr(Opcode::SLoad, 0, None, None, vec![1, 2]),
		set(3, 1u64, MemoryTag::U32),
		ret(2, 3),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(result.success);
	assert_eq!(result.return_data, vec![U256::from(42u64)]);
	assert_eq!(
		result.side_effects.storage_writes,
		vec![StorageWrite {
			address: target,
			slot: U256::from(7u64),
			value: U256::from(42u64),
		}]
	);
}

#[test]
fn logs_and_messages_surface_in_the_side_effects() {
	let target = Address::from(11);
	let program = assemble(&[
		set(0, 11u64, MemoryTag::Field),
		set(1, 1u64, MemoryTag::U32),
		instr(Opcode::EmitLog, 0, None, None, vec![0, 1]),
		set(2, 5u64, MemoryTag::Field),
		set(3, 6u64, MemoryTag::Field),
		instr(Opcode::SendMessage, 0, None, None, vec![2, 3]),
		set(4, 0u64, MemoryTag::U32),
		ret(0, 4),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(result.success);
	assert_eq!(
		result.side_effects.logs,
		vec![LogEntry {
			address: target,
			fields: vec![U256::from(11u64)],
		}]
	);
	assert_eq!(
		result.side_effects.messages,
		vec![OutboundMessage {
			sender: target,
			recipient: U256::from(5u64),
			content: U256::from(6u64),
		}]
	);
}

#[test]
fn static_execution_rejects_state_mutation_before_any_effect() {
	let target = Address::from(12);
	let program = assemble(&[
		set(0, 1u64, MemoryTag::Field),
		set(1, 2u64, MemoryTag::Field),
		instr(Opcode::SStore, 0, None, None, vec![0, 1]),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute_static(&backend, target, vec![], PLENTY, true);
	assert!(!result.success);
	assert_eq!(
		result.revert_reason.unwrap().message,
		"Static call cannot update the state, emit L2->L1 messages or generate logs"
	);
	assert!(result.side_effects.is_empty());
}

#[test]
fn staticness_is_inherited_by_nested_calls() {
	let inner = Address::from(13);
	let outer = Address::from(14);
	let mut backend = MemoryBackend::new();
	backend.deploy(
		inner,
		assemble(&[
			set(0, 1u64, MemoryTag::Field),
			set(1, 2u64, MemoryTag::Field),
			instr(Opcode::SStore, 0, None, None, vec![0, 1]),
		]),
	);
	// A plain CALL out of a static context must still be static.
	backend.deploy(outer, assemble(&call_with_no_args(10, inner, 10_000)));

	let result = execute_static(&backend, outer, vec![], PLENTY, true);
	assert!(!result.success);
	let reason = result.revert_reason.unwrap();
	assert_eq!(reason.chain_len(), 2);
	assert_eq!(
		reason.root_cause().message,
		"Static call cannot update the state, emit L2->L1 messages or generate logs"
	);
	assert!(result.side_effects.is_empty());
}

#[test]
fn successful_nested_call_returns_data_and_refunds_unused_gas() {
	let callee = Address::from(15);
	let caller = Address::from(16);
	let mut backend = MemoryBackend::new();
	backend.deploy(
		callee,
		assemble(&[
			set(0, 99u64, MemoryTag::Field),
			set(1, 1u64, MemoryTag::U32),
			ret(0, 1),
		]),
	);
	let mut program = call_with_no_args(10, callee, 1000);
	program.extend([
		set(5, 0u64, MemoryTag::U32),
		set(6, 1u64, MemoryTag::U32),
		instr(Opcode::ReturndataCopy, 0, None, None, vec![5, 6, 7]),
		set(8, 1u64, MemoryTag::U32),
		ret(7, 8),
	]);
	backend.deploy(caller, assemble(&program));

	let result = execute(&backend, caller, vec![], Gas::new(0, 10_000));
	assert!(result.success);
	assert_eq!(result.return_data, vec![U256::from(99u64)]);
	// Caller: 7 SETs at 10, CALL at 2000, RETURNDATACOPY at 20 + 4,
	// RETURN at 20 + 2. Callee: 2 SETs at 10, RETURN at 20 + 2; the rest
	// of its 1000 l2 allocation comes back to the caller.
	assert_eq!(result.gas_consumed, Gas::new(0, 2158));
	// Both memory spaces appear in the trace.
	assert!(result.trace.iter().any(|step| step.space_id == 0));
	assert!(result.trace.iter().any(|step| step.space_id == 1));
}

#[test]
fn nested_failure_builds_a_cause_chain_down_to_the_root() {
	let a = Address::from(17);
	let b = Address::from(18);
	let c = Address::from(19);
	let mut backend = MemoryBackend::new();
	backend.deploy(
		c,
		assemble(&[
			set(0, 1u64, MemoryTag::U32),
			set(1, 0u64, MemoryTag::U32),
			binary(Opcode::Div, MemoryTag::U32, 0, 1, 2),
		]),
	);
	backend.deploy(b, assemble(&call_with_no_args(10, c, 50_000)));
	backend.deploy(a, assemble(&call_with_no_args(10, b, 100_000)));

	let result = execute(&backend, a, vec![], PLENTY);
	assert!(!result.success);
	let reason = result.revert_reason.unwrap();
	assert_eq!(reason.chain_len(), 3);
	assert_eq!(reason.failing_function.contract_address, a);
	let root = reason.root_cause();
	assert_eq!(root.message, "Division by zero");
	assert_eq!(root.failing_function.contract_address, c);
	// The root's stack snapshot covers all three live frames.
	assert_eq!(root.call_stack.len(), 3);
	assert!(result.side_effects.is_empty());
}

#[test]
fn calling_an_address_without_code_costs_only_the_call_overhead() {
	let caller = Address::from(20);
	let absent = Address::from(0xdead);
	let mut backend = MemoryBackend::new();
	backend.deploy(caller, assemble(&call_with_no_args(0, absent, 50)));

	let result = execute(&backend, caller, vec![], PLENTY);
	assert!(!result.success);
	let reason = result.revert_reason.unwrap();
	assert_eq!(reason.message, format!("No bytecode found at: {}", absent));
	assert_eq!(reason.failing_function.contract_address, caller);
	// 4 SETs at 10 l2 plus the fixed CALL overhead; the requested
	// allocation is never charged.
	assert_eq!(result.gas_consumed, Gas::new(0, 2040));
}

#[test]
fn executing_an_address_without_code_reverts_without_running() {
	let absent = Address::from(21);
	let backend = MemoryBackend::new();

	let result = execute(&backend, absent, vec![], PLENTY);
	assert!(!result.success);
	assert_eq!(
		result.revert_reason.unwrap().message,
		format!("No bytecode found at: {}", absent)
	);
	assert_eq!(result.gas_consumed, Gas::empty());
	assert!(result.trace.is_empty());
}

#[test]
fn invalid_opcode_in_a_callee_reverts_that_call() {
	let caller = Address::from(22);
	let broken = Address::from(23);
	let mut backend = MemoryBackend::new();
	backend.deploy(broken, vec![0xee]);
	backend.deploy(caller, assemble(&call_with_no_args(0, broken, 1000)));

	let result = execute(&backend, caller, vec![], PLENTY);
	assert!(!result.success);
	let reason = result.revert_reason.unwrap();
	assert_eq!(reason.chain_len(), 2);
	assert_eq!(
		reason.root_cause().message,
		"Opcode 0xee is not in the instruction set"
	);
}

#[test]
fn to_radix_be_writes_big_endian_limbs() {
	let target = Address::from(24);
	let program = assemble(&[
		set(0, 0x0102u64, MemoryTag::Field),
		set(1, 256u64, MemoryTag::U32),
		set(2, 3u64, MemoryTag::U32),
		instr(Opcode::ToRadixBe, 0, None, None, vec![0, 1, 2, 10]),
		set(3, 3u64, MemoryTag::U32),
		ret(10, 3),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(result.success);
	assert_eq!(
		result.return_data,
		vec![U256::zero(), U256::from(1u64), U256::from(2u64)]
	);
}

#[test]
fn explicit_revert_surfaces_the_revert_data() {
	let target = Address::from(25);
	let program = assemble(&[
		set(0, 123u64, MemoryTag::Field),
		set(1, 1u64, MemoryTag::U32),
		instr(Opcode::Revert, 0, None, None, vec![0, 1]),
	]);
	let mut backend = MemoryBackend::new();
	backend.deploy(target, program);

	let result = execute(&backend, target, vec![], PLENTY);
	assert!(!result.success);
	assert_eq!(result.return_data, vec![U256::from(123u64)]);
	assert_eq!(result.revert_reason.unwrap().message, "Assertion failed");
	assert!(result.side_effects.is_empty());
}
