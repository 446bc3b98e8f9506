//! Evaluation of IRP expressions against a [`NameEngine`].

use crate::{ast::Expression, Error, NameEngine};
use std::{collections::HashMap, fmt};

/// A bitmask with the lowest `width` bits set.
pub(crate) fn ones(width: i64) -> i64 {
    if width >= 64 {
        !0
    } else {
        (1i64 << width) - 1
    }
}

/// Reverse the lowest `width` bits of a value; higher bits are dropped.
pub(crate) fn bit_reverse(value: i64, width: i64) -> i64 {
    if width == 0 {
        0
    } else {
        (((value as u64).reverse_bits() >> (64 - width as u32)) as i64) & ones(width)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::Number(v) => write!(f, "{v}"),
            Expression::Identifier(id) => write!(f, "{id}"),
            Expression::Add(left, right) => write!(f, "({left} + {right})"),
            Expression::Subtract(left, right) => write!(f, "({left} - {right})"),
            Expression::Multiply(left, right) => write!(f, "({left} * {right})"),
            Expression::Divide(left, right) => write!(f, "({left} / {right})"),
            Expression::Power(left, right) => write!(f, "({left} ** {right})"),
            Expression::Modulo(left, right) => write!(f, "({left} % {right})"),
            Expression::BitwiseOr(left, right) => write!(f, "({left} | {right})"),
            Expression::BitwiseAnd(left, right) => write!(f, "({left} & {right})"),
            Expression::BitwiseXor(left, right) => write!(f, "({left} ^ {right})"),
            Expression::ShiftLeft(left, right) => write!(f, "({left} << {right})"),
            Expression::ShiftRight(left, right) => write!(f, "({left} >> {right})"),

            Expression::Equal(left, right) => write!(f, "({left} == {right})"),
            Expression::NotEqual(left, right) => write!(f, "({left} != {right})"),
            Expression::Greater(left, right) => write!(f, "({left} > {right})"),
            Expression::GreaterEqual(left, right) => write!(f, "({left} >= {right})"),
            Expression::Less(left, right) => write!(f, "({left} < {right})"),
            Expression::LessEqual(left, right) => write!(f, "({left} <= {right})"),

            Expression::Or(left, right) => write!(f, "({left} || {right})"),
            Expression::And(left, right) => write!(f, "({left} && {right})"),
            Expression::Conditional(cond, left, right) => {
                write!(f, "({cond} ? {left} : {right})")
            }
            Expression::Complement(expr) => write!(f, "~{expr}"),
            Expression::Not(expr) => write!(f, "!{expr}"),
            Expression::Negative(expr) => write!(f, "-{expr}"),
            Expression::BitCount(expr) => write!(f, "#({expr})"),
            Expression::BitField {
                value,
                reverse,
                length,
                offset,
            } => {
                write!(f, "{}:{}{}", value, if *reverse { "-" } else { "" }, length)?;
                if let Some(offset) = offset {
                    write!(f, ":{offset}")?;
                }
                Ok(())
            }
            Expression::InfiniteBitField { value, offset } => {
                write!(f, "{value}::{offset}")
            }
            Expression::Assignment(name, expr) => write!(f, "{name}={expr}"),
            Expression::List(list) => {
                write!(f, "(")?;
                for (i, expr) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{expr}")?;
                }
                write!(f, ")")
            }
            expr => write!(f, "{expr:?}"),
        }
    }
}

impl Expression {
    /// Evaluate an arithmetic expression. Deterministic and side-effect free;
    /// the only failures are unassigned names and arithmetic misuse.
    pub fn eval(&self, engine: &NameEngine) -> Result<i64, Error> {
        match self {
            Expression::Number(n) => Ok(*n),
            Expression::Identifier(id) => engine.get(id),
            Expression::Negative(e) => Ok(-e.eval(engine)?),
            Expression::Complement(e) => Ok(!e.eval(engine)?),
            Expression::Not(e) => Ok((e.eval(engine)? == 0) as i64),
            Expression::Add(l, r) => Ok(l.eval(engine)?.wrapping_add(r.eval(engine)?)),
            Expression::Subtract(l, r) => Ok(l.eval(engine)?.wrapping_sub(r.eval(engine)?)),
            Expression::Multiply(l, r) => Ok(l.eval(engine)?.wrapping_mul(r.eval(engine)?)),
            Expression::Divide(l, r) => {
                let divisor = r.eval(engine)?;

                if divisor == 0 {
                    return Err(Error::Semantic("divide by zero".into()));
                }

                Ok(l.eval(engine)? / divisor)
            }
            Expression::Modulo(l, r) => {
                let divisor = r.eval(engine)?;

                if divisor == 0 {
                    return Err(Error::Semantic("divide by zero".into()));
                }

                Ok(l.eval(engine)? % divisor)
            }
            Expression::BitwiseAnd(l, r) => Ok(l.eval(engine)? & r.eval(engine)?),
            Expression::BitwiseOr(l, r) => Ok(l.eval(engine)? | r.eval(engine)?),
            Expression::BitwiseXor(l, r) => Ok(l.eval(engine)? ^ r.eval(engine)?),
            Expression::Power(l, r) => {
                let exponent = r.eval(engine)?;

                if exponent < 0 {
                    return Err(Error::Semantic("power to negative not supported".into()));
                }

                Ok(l.eval(engine)?.wrapping_pow(exponent as u32))
            }
            Expression::BitCount(e) => Ok((e.eval(engine)? as u64).count_ones() as i64),
            Expression::ShiftLeft(l, r) => {
                Ok(l.eval(engine)?.wrapping_shl(r.eval(engine)? as u32))
            }
            Expression::ShiftRight(l, r) => {
                Ok(l.eval(engine)?.wrapping_shr(r.eval(engine)? as u32))
            }
            Expression::Equal(l, r) => Ok((l.eval(engine)? == r.eval(engine)?) as i64),
            Expression::NotEqual(l, r) => Ok((l.eval(engine)? != r.eval(engine)?) as i64),
            Expression::Greater(l, r) => Ok((l.eval(engine)? > r.eval(engine)?) as i64),
            Expression::GreaterEqual(l, r) => Ok((l.eval(engine)? >= r.eval(engine)?) as i64),
            Expression::Less(l, r) => Ok((l.eval(engine)? < r.eval(engine)?) as i64),
            Expression::LessEqual(l, r) => Ok((l.eval(engine)? <= r.eval(engine)?) as i64),
            Expression::Or(l, r) => {
                if l.eval(engine)? != 0 {
                    Ok(1)
                } else {
                    Ok((r.eval(engine)? != 0) as i64)
                }
            }
            Expression::And(l, r) => {
                if l.eval(engine)? == 0 {
                    Ok(0)
                } else {
                    Ok((r.eval(engine)? != 0) as i64)
                }
            }
            Expression::Conditional(cond, l, r) => {
                if cond.eval(engine)? != 0 {
                    l.eval(engine)
                } else {
                    r.eval(engine)
                }
            }
            Expression::BitField { .. } => Ok(self.bitfield(engine)?.0),
            Expression::InfiniteBitField { value, offset } => {
                Ok(value.eval(engine)? >> offset.eval(engine)?)
            }
            Expression::List(list) if list.len() == 1 => list[0].eval(engine),
            _ => Err(Error::Semantic(format!("cannot evaluate {self}"))),
        }
    }

    /// Evaluate a finite bit field to its value and its width.
    pub fn bitfield(&self, engine: &NameEngine) -> Result<(i64, i64), Error> {
        if let Expression::BitField {
            value,
            reverse,
            length,
            offset,
        } = self
        {
            let mut bits = value.eval(engine)?;

            if let Some(offset) = offset {
                let offset = offset.eval(engine)?;

                if !(0..64).contains(&offset) {
                    return Err(Error::Semantic(format!(
                        "bit field offset {offset} not supported"
                    )));
                }

                bits >>= offset;
            }

            let length = length.eval(engine)?;

            if !(0..64).contains(&length) {
                return Err(Error::Semantic(format!(
                    "bit field length {length} not supported"
                )));
            }

            if *reverse {
                bits = bit_reverse(bits, length);
            }

            Ok((bits & ones(length), length))
        } else {
            Err(Error::Semantic(format!("{self} is not a bit field")))
        }
    }

    /// Post-order visit of all nodes in this expression.
    pub fn visit<T, F>(&self, ctx: &mut T, visit: &F)
    where
        F: Fn(&Expression, &mut T),
    {
        match self {
            Expression::Complement(expr)
            | Expression::Not(expr)
            | Expression::Negative(expr)
            | Expression::BitCount(expr)
            | Expression::Assignment(_, expr) => {
                expr.visit(ctx, visit);
            }
            Expression::Add(left, right)
            | Expression::Subtract(left, right)
            | Expression::Multiply(left, right)
            | Expression::Divide(left, right)
            | Expression::Modulo(left, right)
            | Expression::Power(left, right)
            | Expression::ShiftLeft(left, right)
            | Expression::ShiftRight(left, right)
            | Expression::BitwiseAnd(left, right)
            | Expression::BitwiseOr(left, right)
            | Expression::BitwiseXor(left, right)
            | Expression::Greater(left, right)
            | Expression::GreaterEqual(left, right)
            | Expression::Less(left, right)
            | Expression::LessEqual(left, right)
            | Expression::Equal(left, right)
            | Expression::NotEqual(left, right)
            | Expression::And(left, right)
            | Expression::Or(left, right) => {
                left.visit(ctx, visit);
                right.visit(ctx, visit);
            }
            Expression::Conditional(cond, left, right) => {
                cond.visit(ctx, visit);
                left.visit(ctx, visit);
                right.visit(ctx, visit);
            }
            Expression::BitField {
                value,
                length,
                offset,
                ..
            } => {
                value.visit(ctx, visit);
                length.visit(ctx, visit);
                if let Some(offset) = offset {
                    offset.visit(ctx, visit);
                }
            }
            Expression::InfiniteBitField { value, offset } => {
                value.visit(ctx, visit);
                offset.visit(ctx, visit);
            }
            Expression::List(list) => {
                for e in list {
                    e.visit(ctx, visit);
                }
            }
            Expression::Variation(variants) => {
                for list in variants {
                    for e in list {
                        e.visit(ctx, visit);
                    }
                }
            }
            Expression::Stream(stream) => {
                for e in &stream.bit_spec {
                    e.visit(ctx, visit);
                }
                for e in &stream.stream {
                    e.visit(ctx, visit);
                }
            }
            _ => (),
        }
        visit(self, ctx);
    }

    /// Complexity measure; used to rank competing decodes, the simplest
    /// protocol first.
    pub fn weight(&self) -> u32 {
        let mut weight = 0u32;

        self.visit(&mut weight, &|expr, weight| {
            *weight += match expr {
                Expression::Number(_) | Expression::Identifier(_) => 1,
                Expression::FlashConstant(..)
                | Expression::GapConstant(..)
                | Expression::FlashIdentifier(..)
                | Expression::GapIdentifier(..) => 1,
                Expression::ExtentConstant(..) | Expression::ExtentIdentifier(..) => 2,
                Expression::BitField { .. } | Expression::InfiniteBitField { .. } => 2,
                Expression::List(_) => 0,
                _ => 1,
            };
        });

        weight
    }

    /// Stable name to value map for downstream consumers (XML export,
    /// source code generators).
    pub fn properties(&self) -> HashMap<String, String> {
        let kind = match self {
            Expression::Number(_) => "number",
            Expression::Identifier(_) => "name",
            Expression::FlashConstant(..) | Expression::FlashIdentifier(..) => "flash",
            Expression::GapConstant(..) | Expression::GapIdentifier(..) => "gap",
            Expression::ExtentConstant(..) | Expression::ExtentIdentifier(..) => "extent",
            Expression::BitField { .. } => "bitfield",
            Expression::InfiniteBitField { .. } => "infinite-bitfield",
            Expression::Assignment(..) => "assignment",
            Expression::Stream(_) => "stream",
            Expression::Variation(_) => "variation",
            Expression::List(_) => "list",
            _ => "operator",
        };

        let mut props = HashMap::new();
        props.insert("kind".to_owned(), kind.to_owned());
        props.insert("weight".to_owned(), self.weight().to_string());
        props.insert("irp".to_owned(), self.to_string());
        props
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::rc::Rc;

    fn engine(pairs: &[(&str, i64)]) -> NameEngine {
        let mut engine = NameEngine::new();
        for (name, value) in pairs {
            engine.define(name, *value).unwrap();
        }
        engine
    }

    #[test]
    fn arithmetic() {
        let engine = engine(&[("D", 0xe9), ("F", 1)]);

        let expr = Expression::Subtract(
            Rc::new(Expression::Number(255)),
            Rc::new(Expression::Identifier("D".to_owned())),
        );

        assert_eq!(expr.eval(&engine), Ok(22));
        assert_eq!(format!("{expr}"), "(255 - D)");
    }

    #[test]
    fn bitfield() {
        let engine = engine(&[("F", 0b0100_0001)]);

        // F:1:6
        let expr = Expression::BitField {
            value: Rc::new(Expression::Identifier("F".to_owned())),
            reverse: false,
            length: Rc::new(Expression::Number(1)),
            offset: Some(Rc::new(Expression::Number(6))),
        };

        assert_eq!(expr.bitfield(&engine), Ok((1, 1)));

        // ~F:4 (complement wraps the value operand)
        let expr = Expression::BitField {
            value: Rc::new(Expression::Complement(Rc::new(Expression::Identifier(
                "F".to_owned(),
            )))),
            reverse: false,
            length: Rc::new(Expression::Number(4)),
            offset: None,
        };

        assert_eq!(expr.bitfield(&engine), Ok((0b1110, 4)));

        // F:-8 reversed
        let expr = Expression::BitField {
            value: Rc::new(Expression::Identifier("F".to_owned())),
            reverse: true,
            length: Rc::new(Expression::Number(8)),
            offset: None,
        };

        assert_eq!(expr.bitfield(&engine), Ok((0b1000_0010, 8)));
    }

    #[test]
    fn weight_orders_simpler_first() {
        let simple = Expression::Identifier("F".to_owned());
        let complex = Expression::Add(
            Rc::new(Expression::Identifier("F".to_owned())),
            Rc::new(Expression::Number(1)),
        );

        assert!(simple.weight() < complex.weight());
    }

    #[test]
    fn reverse_helper() {
        assert_eq!(bit_reverse(0b110, 3), 0b011);
        assert_eq!(bit_reverse(0b1, 1), 0b1);
        assert_eq!(bit_reverse(0x01, 8), 0x80);
    }
}
