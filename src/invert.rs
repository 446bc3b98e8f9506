//! Running bit field formulas backwards: given the bits observed on the wire,
//! work out what the field's value operand must have been.

use crate::{
    ast::Expression,
    expression::{bit_reverse, ones},
    Error, NameEngine,
};
use std::rc::Rc;

/// What inverting an expression against an observed value produced.
#[derive(Debug, PartialEq)]
pub(crate) enum Inverted {
    /// The named parameter carries `value` in the bits of `mask`
    Assign { name: String, value: i64, mask: i64 },
    /// The expression evaluated to the observed value; nothing to record
    Verified,
    /// Not enough names assigned yet; re-check once more bits are known
    Pending,
}

/// True when arithmetic can be undone through the mask: all known bits form
/// one contiguous run from bit 0, so no borrow or carry escapes into
/// unknown territory.
fn arithmetic_mask(mask: i64) -> bool {
    mask != 0 && (mask & mask.wrapping_add(1)) == 0
}

/// Invert `expr` given that its value, restricted to `mask`, was observed to
/// be `rhs`. The exact algebraic inverse exists for names, complement,
/// negation, nested bit fields and constant-operand arithmetic; anything
/// else is verified by forward evaluation or deferred.
pub(crate) fn invert(
    expr: &Rc<Expression>,
    rhs: i64,
    mask: i64,
    engine: &NameEngine,
) -> Result<Inverted, Error> {
    match expr.as_ref() {
        Expression::Identifier(name) => Ok(Inverted::Assign {
            name: name.clone(),
            value: rhs & mask,
            mask,
        }),
        Expression::Complement(expr) => invert(expr, !rhs, mask, engine),
        Expression::Negative(expr) if arithmetic_mask(mask) => {
            invert(expr, rhs.wrapping_neg() & mask, mask, engine)
        }
        Expression::Number(n) => {
            if ((n ^ rhs) & mask) != 0 {
                Err(Error::ParameterInconsistency(expr.to_string()))
            } else {
                Ok(Inverted::Verified)
            }
        }
        Expression::BitField {
            value,
            reverse,
            length,
            offset,
        } => {
            let length = length.eval(engine)?;
            let offset = match offset {
                Some(offset) => offset.eval(engine)?,
                None => 0,
            };

            if !(0..64).contains(&length) || !(0..64).contains(&offset) {
                return Err(Error::Semantic(format!(
                    "bit field {length}:{offset} not supported"
                )));
            }

            let rhs = if *reverse {
                bit_reverse(rhs, length)
            } else {
                rhs
            };

            invert(
                value,
                (rhs & ones(length)) << offset,
                (mask & ones(length)) << offset,
                engine,
            )
        }
        Expression::Add(left, right) if arithmetic_mask(mask) => {
            match (known(left, engine), known(right, engine)) {
                (Some(value), _) => invert(right, rhs.wrapping_sub(value) & mask, mask, engine),
                (_, Some(value)) => invert(left, rhs.wrapping_sub(value) & mask, mask, engine),
                _ => fallback(expr, rhs, mask, engine),
            }
        }
        Expression::Subtract(left, right) if arithmetic_mask(mask) => {
            match (known(left, engine), known(right, engine)) {
                (Some(value), _) => invert(right, value.wrapping_sub(rhs) & mask, mask, engine),
                (_, Some(value)) => invert(left, rhs.wrapping_add(value) & mask, mask, engine),
                _ => fallback(expr, rhs, mask, engine),
            }
        }
        Expression::Multiply(left, right) if arithmetic_mask(mask) => {
            let inner = |known_value: i64, other: &Rc<Expression>| {
                if known_value == 0 {
                    // multiplication by zero loses the operand; never guess
                    Err(Error::ParameterInconsistency(expr.to_string()))
                } else if rhs % known_value != 0 {
                    Err(Error::ParameterInconsistency(expr.to_string()))
                } else {
                    invert(other, (rhs / known_value) & mask, mask, engine)
                }
            };

            match (known(left, engine), known(right, engine)) {
                (Some(value), _) => inner(value, right),
                (_, Some(value)) => inner(value, left),
                _ => fallback(expr, rhs, mask, engine),
            }
        }
        Expression::BitwiseXor(left, right) => {
            match (known(left, engine), known(right, engine)) {
                (Some(value), _) => invert(right, rhs ^ value, mask, engine),
                (_, Some(value)) => invert(left, rhs ^ value, mask, engine),
                _ => fallback(expr, rhs, mask, engine),
            }
        }
        _ => fallback(expr, rhs, mask, engine),
    }
}

fn known(expr: &Rc<Expression>, engine: &NameEngine) -> Option<i64> {
    expr.eval(engine).ok()
}

/// No algebraic inverse; verify forwards if we can, else leave pending.
fn fallback(
    expr: &Rc<Expression>,
    rhs: i64,
    mask: i64,
    engine: &NameEngine,
) -> Result<Inverted, Error> {
    match expr.eval(engine) {
        Ok(value) => {
            if ((value ^ rhs) & mask) != 0 {
                Err(Error::ParameterInconsistency(expr.to_string()))
            } else {
                Ok(Inverted::Verified)
            }
        }
        Err(Error::NameUnassigned(_)) => Ok(Inverted::Pending),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn name(n: &str) -> Rc<Expression> {
        Rc::new(Expression::Identifier(n.to_owned()))
    }

    fn number(n: i64) -> Rc<Expression> {
        Rc::new(Expression::Number(n))
    }

    #[test]
    fn identity() {
        let engine = NameEngine::new();

        assert_eq!(
            invert(&name("D"), 0b1011, 0xff, &engine).unwrap(),
            Inverted::Assign {
                name: "D".to_owned(),
                value: 0b1011,
                mask: 0xff
            }
        );
    }

    #[test]
    fn complement() {
        let engine = NameEngine::new();
        let expr = Rc::new(Expression::Complement(name("F")));

        // observed 0b01 in two bits means F carried 0b10 there
        assert_eq!(
            invert(&expr, 0b01, 0b11, &engine).unwrap(),
            Inverted::Assign {
                name: "F".to_owned(),
                value: 0b10,
                mask: 0b11
            }
        );
    }

    #[test]
    fn constant_offset() {
        let engine = NameEngine::new();

        // (D - 1) observed as 3 means D = 4
        let expr = Rc::new(Expression::Subtract(name("D"), number(1)));

        assert_eq!(
            invert(&expr, 3, 0b111, &engine).unwrap(),
            Inverted::Assign {
                name: "D".to_owned(),
                value: 4,
                mask: 0b111
            }
        );

        // (1 - D) observed as 1 means D = 0
        let expr = Rc::new(Expression::Subtract(number(1), name("D")));

        assert_eq!(
            invert(&expr, 1, 0b1, &engine).unwrap(),
            Inverted::Assign {
                name: "D".to_owned(),
                value: 0,
                mask: 0b1
            }
        );
    }

    #[test]
    fn zero_multiply_never_guesses() {
        let engine = NameEngine::new();
        let expr = Rc::new(Expression::Multiply(number(0), name("D")));

        assert!(matches!(
            invert(&expr, 0, 0xff, &engine),
            Err(Error::ParameterInconsistency(_))
        ));
    }

    #[test]
    fn nested_bitfield() {
        let engine = NameEngine::new();

        // F:1:6 observed as 1 means bit 6 of F is set
        let expr = Rc::new(Expression::BitField {
            value: name("F"),
            reverse: false,
            length: number(1),
            offset: Some(number(6)),
        });

        assert_eq!(
            invert(&expr, 1, 0b1, &engine).unwrap(),
            Inverted::Assign {
                name: "F".to_owned(),
                value: 1 << 6,
                mask: 1 << 6
            }
        );
    }

    #[test]
    fn literal_mismatch() {
        let engine = NameEngine::new();

        assert!(matches!(
            invert(&number(3), 1, 0b11, &engine),
            Err(Error::ParameterInconsistency(_))
        ));
        assert_eq!(invert(&number(3), 3, 0b11, &engine).unwrap(), Inverted::Verified);
    }

    #[test]
    fn deferred_when_unassigned() {
        let engine = NameEngine::new();

        // D ^ S cannot be unpicked while neither is known
        let expr = Rc::new(Expression::BitwiseXor(name("D"), name("S")));

        assert_eq!(invert(&expr, 1, 1, &engine).unwrap(), Inverted::Pending);
    }
}
