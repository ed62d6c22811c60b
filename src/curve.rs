//! Elliptic-curve unit: Grumpkin points, addition and multi-scalar
//! multiplication.
//!
//! Points cross the memory boundary as runs of three field values
//! `(x, y, is_infinity)`. Every decoded point is validated against the curve
//! equation before use.

use std::fmt;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::Zero;
use primitive_types::U256;

use crate::error::AvmError;
use crate::field::{field_from_u256, field_to_u256, AvmField, GrumpkinScalar};

type Affine = ark_grumpkin::Affine;
type Projective = ark_grumpkin::Projective;

/// Number of field values a point occupies in memory.
pub const POINT_FIELDS: u32 = 3;

/// A curve point as the machine sees it: a coordinate pair plus an
/// infinity flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CurvePoint {
	pub x: AvmField,
	pub y: AvmField,
	pub is_infinity: bool,
}

impl CurvePoint {
	pub fn new(x: AvmField, y: AvmField, is_infinity: bool) -> Self {
		Self { x, y, is_infinity }
	}

	/// Decode from a `(x, y, is_infinity)` field triple.
	pub fn from_fields(x: U256, y: U256, is_infinity: U256) -> Self {
		Self {
			x: field_from_u256(x),
			y: field_from_u256(y),
			is_infinity: !is_infinity.is_zero(),
		}
	}

	/// The `(x, y, is_infinity)` memory representation.
	pub fn to_fields(&self) -> [U256; 3] {
		[
			field_to_u256(&self.x),
			field_to_u256(&self.y),
			U256::from(u8::from(self.is_infinity)),
		]
	}

	/// Validate against the curve equation and convert for arithmetic.
	fn to_affine(self) -> Result<Affine, AvmError> {
		if self.is_infinity {
			return Ok(Affine::identity());
		}
		let affine = Affine::new_unchecked(self.x, self.y);
		if !affine.is_on_curve() {
			return Err(AvmError::MsmPointNotOnCurve(self));
		}
		Ok(affine)
	}

	fn from_affine(affine: Affine) -> Self {
		match affine.xy() {
			Some((x, y)) => Self::new(x, y, false),
			None => Self::new(AvmField::zero(), AvmField::zero(), true),
		}
	}
}

impl fmt::Display for CurvePoint {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.is_infinity {
			f.write_str("(infinity)")
		} else {
			write!(
				f,
				"({:#x}, {:#x})",
				field_to_u256(&self.x),
				field_to_u256(&self.y)
			)
		}
	}
}

/// Decode a run of field values into points, three values per point.
pub fn decode_points(fields: &[U256]) -> Result<Vec<CurvePoint>, AvmError> {
	if fields.len() % POINT_FIELDS as usize != 0 {
		return Err(AvmError::MsmPointsLength(fields.len() as u32));
	}
	Ok(fields
		.chunks_exact(POINT_FIELDS as usize)
		.map(|chunk| CurvePoint::from_fields(chunk[0], chunk[1], chunk[2]))
		.collect())
}

/// Add two points, validating both against the curve equation.
pub fn ec_add(p: CurvePoint, q: CurvePoint) -> Result<CurvePoint, AvmError> {
	let sum = p.to_affine()?.into_group() + q.to_affine()?.into_group();
	Ok(CurvePoint::from_affine(sum.into_affine()))
}

/// Multi-scalar multiplication over a run of point triples.
///
/// `point_fields` holds three field values per point; its length must be a
/// multiple of 3 and every point must lie on the curve. The result is the
/// deterministic sum of each point scaled by its scalar.
pub fn msm(point_fields: &[U256], scalars: &[GrumpkinScalar]) -> Result<CurvePoint, AvmError> {
	let points = decode_points(point_fields)?;
	if scalars.len() != points.len() {
		return Err(AvmError::Arithmetic(
			format!(
				"MSM expects one scalar per point, got {} scalars for {} points",
				scalars.len(),
				points.len()
			)
			.into(),
		));
	}

	let mut acc = Projective::zero();
	for (point, scalar) in points.into_iter().zip(scalars) {
		acc += point.to_affine()?.into_group() * *scalar;
	}
	Ok(CurvePoint::from_affine(acc.into_affine()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use ark_ff::One;

	fn generator() -> CurvePoint {
		CurvePoint::from_affine(Affine::generator())
	}

	fn fields_of(points: &[CurvePoint]) -> Vec<U256> {
		points.iter().flat_map(|p| p.to_fields()).collect()
	}

	#[test]
	fn length_not_a_multiple_of_three_is_rejected() {
		let fields = vec![U256::zero(); 4];
		let err = msm(&fields, &[]).unwrap_err();
		assert_eq!(err, AvmError::MsmPointsLength(4));
		assert_eq!(
			err.to_string(),
			"Points vector length should be a multiple of 3, was 4"
		);
	}

	#[test]
	fn off_curve_point_is_rejected_with_the_point() {
		let bogus = CurvePoint::from_fields(U256::from(1u64), U256::from(1u64), U256::zero());
		let err = msm(&fields_of(&[bogus]), &[GrumpkinScalar::one()]).unwrap_err();
		assert_eq!(err, AvmError::MsmPointNotOnCurve(bogus));
	}

	#[test]
	fn msm_matches_repeated_addition() {
		let g = generator();
		// 2*G + 3*G == 5*G
		let lhs = msm(
			&fields_of(&[g, g]),
			&[GrumpkinScalar::from(2u64), GrumpkinScalar::from(3u64)],
		)
		.unwrap();
		let rhs = msm(&fields_of(&[g]), &[GrumpkinScalar::from(5u64)]).unwrap();
		assert_eq!(lhs, rhs);
	}

	#[test]
	fn msm_is_deterministic() {
		let g = generator();
		let doubled = ec_add(g, g).unwrap();
		let fields = fields_of(&[g, doubled]);
		let scalars = [GrumpkinScalar::from(7u64), GrumpkinScalar::from(11u64)];
		assert_eq!(
			msm(&fields, &scalars).unwrap(),
			msm(&fields, &scalars).unwrap()
		);
	}

	#[test]
	fn infinity_inputs_contribute_identity() {
		let g = generator();
		let inf = CurvePoint::new(AvmField::zero(), AvmField::zero(), true);
		let sum = msm(
			&fields_of(&[g, inf]),
			&[GrumpkinScalar::one(), GrumpkinScalar::from(99u64)],
		)
		.unwrap();
		assert_eq!(sum, g);
	}

	#[test]
	fn ec_add_validates_operands() {
		let bogus = CurvePoint::from_fields(U256::from(2u64), U256::from(5u64), U256::zero());
		assert!(matches!(
			ec_add(generator(), bogus),
			Err(AvmError::MsmPointNotOnCurve(_))
		));
	}
}
