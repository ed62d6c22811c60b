//! Per-dimension gas accounting.
//!
//! Two resources are metered independently: data-availability gas and
//! compute (L2) gas. A charge is atomic across dimensions: if any dimension
//! would go negative the whole charge is rejected and every deficient
//! dimension is named. Gas charged by prior successful operations is never
//! refunded within a frame.

use std::fmt;

use primitive_types::U256;

use crate::error::AvmError;

/// One independently metered resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum GasDimension {
	/// Data-availability gas.
	Da,
	/// Compute gas.
	L2,
}

impl fmt::Display for GasDimension {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Da => f.write_str("da"),
			Self::L2 => f.write_str("l2"),
		}
	}
}

/// A gas amount per dimension.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Gas {
	pub da_gas: u64,
	pub l2_gas: u64,
}

impl Gas {
	pub const fn new(da_gas: u64, l2_gas: u64) -> Self {
		Self { da_gas, l2_gas }
	}

	pub const fn empty() -> Self {
		Self::new(0, 0)
	}

	pub const fn get(&self, dimension: GasDimension) -> u64 {
		match dimension {
			GasDimension::Da => self.da_gas,
			GasDimension::L2 => self.l2_gas,
		}
	}

	pub fn add(&self, other: Gas) -> Gas {
		Gas::new(
			self.da_gas.saturating_add(other.da_gas),
			self.l2_gas.saturating_add(other.l2_gas),
		)
	}

	pub fn sub(&self, other: Gas) -> Gas {
		Gas::new(
			self.da_gas.saturating_sub(other.da_gas),
			self.l2_gas.saturating_sub(other.l2_gas),
		)
	}

	pub fn scale(&self, factor: u64) -> Gas {
		Gas::new(
			self.da_gas.saturating_mul(factor),
			self.l2_gas.saturating_mul(factor),
		)
	}

	/// Component-wise minimum; used to clamp a requested call allocation to
	/// what the caller has left.
	pub fn min(&self, other: Gas) -> Gas {
		Gas::new(self.da_gas.min(other.da_gas), self.l2_gas.min(other.l2_gas))
	}
}

/// Tracks the remaining budget of one frame.
#[derive(Clone, Debug)]
pub struct Gasometer {
	limit: Gas,
	remaining: Gas,
}

impl Gasometer {
	pub fn new(limit: Gas) -> Self {
		Self {
			limit,
			remaining: limit,
		}
	}

	pub const fn remaining(&self) -> Gas {
		self.remaining
	}

	/// Gas consumed so far, per dimension.
	pub fn consumed(&self) -> Gas {
		self.limit.sub(self.remaining)
	}

	/// Deduct `cost` from every dimension, atomically.
	pub fn charge(&mut self, cost: Gas) -> Result<(), AvmError> {
		let mut deficient = Vec::new();
		if cost.da_gas > self.remaining.da_gas {
			deficient.push(GasDimension::Da);
		}
		if cost.l2_gas > self.remaining.l2_gas {
			deficient.push(GasDimension::L2);
		}
		if !deficient.is_empty() {
			return Err(AvmError::OutOfGas {
				dimensions: deficient,
			});
		}
		self.remaining = self.remaining.sub(cost);
		Ok(())
	}

	/// Return a callee's unused allocation. Only ever called with the
	/// remainder of a sub-budget previously charged through [`charge`].
	///
	/// [`charge`]: Self::charge
	pub fn refund(&mut self, gas: Gas) {
		self.remaining = self.remaining.add(gas).min(self.limit);
	}
}

/// Per-dimension prices, applied to consumed gas only after execution
/// completes. Opaque to the interpreter loop.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GasFees {
	pub fee_per_da_gas: U256,
	pub fee_per_l2_gas: U256,
}

impl GasFees {
	pub fn new(fee_per_da_gas: impl Into<U256>, fee_per_l2_gas: impl Into<U256>) -> Self {
		Self {
			fee_per_da_gas: fee_per_da_gas.into(),
			fee_per_l2_gas: fee_per_l2_gas.into(),
		}
	}

	pub const fn empty() -> Self {
		Self {
			fee_per_da_gas: U256::zero(),
			fee_per_l2_gas: U256::zero(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.fee_per_da_gas.is_zero() && self.fee_per_l2_gas.is_zero()
	}

	/// Total fee for `consumed` gas.
	pub fn fee(&self, consumed: Gas) -> U256 {
		self.fee_per_da_gas * U256::from(consumed.da_gas)
			+ self.fee_per_l2_gas * U256::from(consumed.l2_gas)
	}
}
