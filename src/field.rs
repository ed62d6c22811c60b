//! Modular arithmetic over the native field.
//!
//! The native field of the machine is the scalar field of BN254, which is
//! also the base field of the Grumpkin curve used by the curve unit. Values
//! cross between tagged memory (`U256`) and field elements at this boundary.

use std::borrow::Cow;

use ark_ff::{BigInteger, Field, PrimeField};
use primitive_types::U256;

use crate::error::AvmError;

/// The native field element type.
pub type AvmField = ark_grumpkin::Fq;

/// Scalars for the curve unit, i.e. the Grumpkin scalar field.
pub type GrumpkinScalar = ark_grumpkin::Fr;

/// The field modulus as a `U256`.
pub fn modulus() -> U256 {
	U256::from_little_endian(&AvmField::MODULUS.to_bytes_le())
}

/// Interpret a 256-bit value as a field element, reducing mod the prime.
pub fn field_from_u256(value: U256) -> AvmField {
	let mut le = [0u8; 32];
	value.to_little_endian(&mut le);
	AvmField::from_le_bytes_mod_order(&le)
}

/// Canonical 256-bit representation of a field element.
pub fn field_to_u256(value: &AvmField) -> U256 {
	U256::from_little_endian(&value.into_bigint().to_bytes_le())
}

/// Interpret a 256-bit value as a Grumpkin scalar. The scalar modulus is
/// larger than the native field's, so canonical native values always fit.
pub fn grumpkin_scalar_from_u256(value: U256) -> GrumpkinScalar {
	let mut le = [0u8; 32];
	value.to_little_endian(&mut le);
	GrumpkinScalar::from_le_bytes_mod_order(&le)
}

/// Field division. Classifies a zero divisor instead of panicking.
pub fn f_div(a: AvmField, b: AvmField) -> Result<AvmField, AvmError> {
	let inv = f_inverse(&b)?;
	Ok(a * inv)
}

/// Multiplicative inverse in the field.
pub fn f_inverse(value: &AvmField) -> Result<AvmField, AvmError> {
	value
		.inverse()
		.ok_or(AvmError::Arithmetic(Cow::Borrowed("Field inverse of zero")))
}

/// Integer division on tagged unsigned values.
pub fn u_div(a: U256, b: U256) -> Result<U256, AvmError> {
	if b.is_zero() {
		return Err(AvmError::Arithmetic(Cow::Borrowed("Division by zero")));
	}
	Ok(a / b)
}

/// Decompose `value` into `num_limbs` big-endian digits of base `radix`.
///
/// Fails when the radix is outside `[2, 256]` or the digits cannot represent
/// the value exactly.
pub fn to_radix_be(value: U256, radix: u32, num_limbs: u32) -> Result<Vec<u8>, AvmError> {
	if !(2..=256).contains(&radix) {
		return Err(AvmError::RadixInput(
			format!("Radix {} is not in the range [2, 256]", radix).into(),
		));
	}
	if num_limbs == 0 && !value.is_zero() {
		return Err(AvmError::RadixInput(
			format!("Cannot represent {} in 0 limbs", value).into(),
		));
	}

	let radix = U256::from(radix);
	let mut limbs = vec![0u8; num_limbs as usize];
	let mut rest = value;
	for limb in limbs.iter_mut().rev() {
		let (quotient, digit) = rest.div_mod(radix);
		*limb = digit.low_u32() as u8;
		rest = quotient;
	}
	if !rest.is_zero() {
		return Err(AvmError::RadixInput(
			format!("Value {} does not fit in {} limbs of radix {}", value, num_limbs, radix).into(),
		));
	}
	Ok(limbs)
}

/// Recompose a big-endian digit sequence produced by [`to_radix_be`].
pub fn from_radix_be(limbs: &[u8], radix: u32) -> Result<U256, AvmError> {
	if !(2..=256).contains(&radix) {
		return Err(AvmError::RadixInput(
			format!("Radix {} is not in the range [2, 256]", radix).into(),
		));
	}
	let radix = U256::from(radix);
	let mut value = U256::zero();
	for limb in limbs {
		value = value
			.checked_mul(radix)
			.and_then(|v| v.checked_add(U256::from(*limb)))
			.ok_or_else(|| {
				AvmError::RadixInput(Cow::Borrowed("Digit sequence overflows 256 bits"))
			})?;
	}
	Ok(value)
}

#[cfg(test)]
mod tests {
	use super::*;
	use ark_ff::{One, Zero};

	#[test]
	fn field_round_trips_through_u256() {
		let value = U256::from(123456789u64);
		assert_eq!(field_to_u256(&field_from_u256(value)), value);
	}

	#[test]
	fn values_at_or_above_the_modulus_reduce() {
		assert_eq!(field_to_u256(&field_from_u256(modulus())), U256::zero());
		assert_eq!(
			field_to_u256(&field_from_u256(modulus() + U256::one())),
			U256::one()
		);
	}

	#[test]
	fn field_division_by_zero_is_classified() {
		let err = f_div(AvmField::one(), AvmField::zero()).unwrap_err();
		assert!(matches!(err, AvmError::Arithmetic(_)));
		assert_eq!(err.to_string(), "Field inverse of zero");
	}

	#[test]
	fn integer_division_by_zero_is_classified() {
		let err = u_div(U256::from(10u64), U256::zero()).unwrap_err();
		assert_eq!(err.to_string(), "Division by zero");
	}

	#[test]
	fn radix_one_is_rejected() {
		let err = to_radix_be(U256::from(5u64), 1, 8).unwrap_err();
		assert!(matches!(err, AvmError::RadixInput(_)));
	}

	#[test]
	fn radix_256_round_trips_all_byte_widths() {
		for v in [0u64, 1, 255, 256, 0xdead_beef, u64::MAX] {
			let value = U256::from(v);
			let limbs = to_radix_be(value, 256, 8).unwrap();
			assert_eq!(from_radix_be(&limbs, 256).unwrap(), value);
		}
	}

	#[test]
	fn digits_are_most_significant_first() {
		let limbs = to_radix_be(U256::from(0x0102u64), 256, 3).unwrap();
		assert_eq!(limbs, vec![0, 1, 2]);
	}

	#[test]
	fn value_too_large_for_limbs_is_rejected() {
		let err = to_radix_be(U256::from(256u64), 256, 1).unwrap_err();
		assert!(matches!(err, AvmError::RadixInput(_)));
	}
}
