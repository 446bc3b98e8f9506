//! Accumulation of partially known parameters during recognition.

use crate::{ast::Expression, Error, NameEngine};
use log::trace;
use std::{collections::HashMap, fmt, rc::Rc};

pub(crate) const ALL_BITS: i64 = !0;

/// A parameter of which only some bit positions are known: bits set in
/// `bitmask` carry the value given in the corresponding bits of `value`,
/// all other bits are unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitwiseParameter {
    value: i64,
    bitmask: i64,
}

impl BitwiseParameter {
    pub fn new(value: i64, bitmask: i64) -> Self {
        BitwiseParameter {
            value: value & bitmask,
            bitmask,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bitmask == 0
    }

    /// Two observations agree when they match on the overlap of their masks.
    pub fn is_consistent(&self, other: &BitwiseParameter) -> bool {
        ((self.value ^ other.value) & self.bitmask & other.bitmask) == 0
    }

    pub fn is_consistent_value(&self, value: i64) -> bool {
        ((self.value ^ value) & self.bitmask) == 0
    }

    /// Union of two consistent observations.
    pub fn aggregate(&mut self, other: &BitwiseParameter) {
        self.value |= other.value & other.bitmask;
        self.bitmask |= other.bitmask;
    }

    pub fn value(&self) -> i64 {
        self.value & self.bitmask
    }

    pub fn bitmask(&self) -> i64 {
        self.bitmask
    }
}

impl fmt::Display for BitwiseParameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}&{:b}", self.value(), self.bitmask)
    }
}

#[derive(Debug, Clone)]
struct Parameter {
    bits: BitwiseParameter,
    /// Definition this parameter must satisfy, re-checked once enough bits
    /// are known
    expression: Option<Rc<Expression>>,
    needs_check: bool,
}

/// Collects the bitwise observations per parameter name made while walking a
/// signal, merging each with conflict detection, and materializes them into a
/// [`NameEngine`] once recognition completes.
#[derive(Debug, Clone, Default)]
pub struct ParameterCollector {
    map: HashMap<String, Parameter>,
}

impl ParameterCollector {
    pub fn new() -> Self {
        ParameterCollector::default()
    }

    /// Record that `name` must equal `expression`; checked lazily because the
    /// expression usually references parameters still to be collected.
    pub fn add_expression(&mut self, name: &str, expression: Rc<Expression>) {
        self.map.insert(
            name.to_owned(),
            Parameter {
                bits: BitwiseParameter::default(),
                expression: Some(expression),
                needs_check: false,
            },
        );
    }

    /// Merge an observation of some bits of `name`.
    pub fn add(&mut self, name: &str, value: i64, bitmask: i64) -> Result<(), Error> {
        let observed = BitwiseParameter::new(value, bitmask);

        trace!("collecting {name} = {observed}");

        match self.map.get_mut(name) {
            Some(parameter) => {
                if !parameter.bits.is_consistent(&observed) {
                    trace!("conflicting bits for {name}");
                    return Err(Error::ParameterInconsistency(name.to_owned()));
                }

                if parameter.expression.is_some() {
                    parameter.needs_check = true;
                }

                parameter.bits.aggregate(&observed);
                Ok(())
            }
            None => {
                self.map.insert(
                    name.to_owned(),
                    Parameter {
                        bits: observed,
                        expression: None,
                        needs_check: false,
                    },
                );
                Ok(())
            }
        }
    }

    /// Replace whatever is known about `name`; used by assignment items.
    pub fn overwrite(&mut self, name: &str, value: i64) {
        trace!("overwriting {name} = {value}");

        self.map.insert(
            name.to_owned(),
            Parameter {
                bits: BitwiseParameter::new(value, ALL_BITS),
                expression: None,
                needs_check: false,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        let parameter = self.map.get(name)?;

        if parameter.bits.is_empty() {
            None
        } else {
            Some(parameter.bits.value())
        }
    }

    /// All names with at least one known bit, with their values.
    pub fn values(&self) -> impl Iterator<Item = (&str, i64)> {
        self.map.iter().filter_map(|(name, parameter)| {
            if parameter.bits.is_empty() {
                None
            } else {
                Some((name.as_str(), parameter.bits.value()))
            }
        })
    }

    /// Copy all collected values into `engine`, leaving names already present
    /// untouched.
    pub fn add_to_name_engine(&self, engine: &mut NameEngine) -> Result<(), Error> {
        for (name, parameter) in &self.map {
            if !parameter.bits.is_empty() && !engine.is_defined(name) {
                engine.define(name, parameter.bits.value())?;
            }
        }
        Ok(())
    }

    /// Re-verify every parameter whose defining expression could not be
    /// evaluated when its bits arrived, then clear the pending set. The
    /// authoritative engine is the caller's, extended with all collected
    /// values.
    pub fn check_consistency(&mut self, engine: &NameEngine) -> Result<(), Error> {
        let mut extended = engine.clone();
        self.add_to_name_engine(&mut extended)?;

        for (name, parameter) in &mut self.map {
            if !parameter.needs_check {
                continue;
            }

            if let Some(expression) = &parameter.expression {
                match expression.eval(&extended) {
                    Ok(expected) => {
                        if !parameter.bits.is_consistent_value(expected) {
                            trace!("{name} = {} but definition gives {expected}", parameter.bits);
                            return Err(Error::ParameterInconsistency(name.to_owned()));
                        }
                        parameter.needs_check = false;
                    }
                    // still not enough information; leave pending
                    Err(Error::NameUnassigned(_)) => (),
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for ParameterCollector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, parameter)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{name}={}", parameter.bits)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge() {
        let mut collector = ParameterCollector::new();

        collector.add("D", 0b10, 0b10).unwrap();

        // overlapping bit disagrees
        assert_eq!(
            collector.add("D", 0b00, 0b10),
            Err(Error::ParameterInconsistency("D".to_owned()))
        );

        // same bits again is fine
        collector.add("D", 0b10, 0b10).unwrap();

        // disjoint bits union
        collector.add("D", 0b01, 0b01).unwrap();
        assert_eq!(collector.get("D"), Some(0b11));
    }

    #[test]
    fn consistent() {
        let a = BitwiseParameter::new(0b1010, 0b1111);
        let b = BitwiseParameter::new(0b0010, 0b0011);
        let c = BitwiseParameter::new(0b0001, 0b0011);

        assert!(a.is_consistent(&b));
        assert!(b.is_consistent(&a));
        assert!(!a.is_consistent(&c));
        assert!(a.is_consistent_value(0b1010));
        assert!(!a.is_consistent_value(0b1011));
    }

    #[test]
    fn deferred_definition() {
        // S must equal 255 - D; D arrives later
        let mut collector = ParameterCollector::new();

        collector.add_expression(
            "S",
            Rc::new(Expression::Subtract(
                Rc::new(Expression::Number(255)),
                Rc::new(Expression::Identifier("D".to_owned())),
            )),
        );

        collector.add("S", 22, 0xff).unwrap();
        collector.add("D", 233, 0xff).unwrap();

        collector.check_consistency(&NameEngine::new()).unwrap();

        // and an inconsistent value is caught
        let mut collector = ParameterCollector::new();

        collector.add_expression(
            "S",
            Rc::new(Expression::Subtract(
                Rc::new(Expression::Number(255)),
                Rc::new(Expression::Identifier("D".to_owned())),
            )),
        );

        collector.add("S", 23, 0xff).unwrap();
        collector.add("D", 233, 0xff).unwrap();

        assert_eq!(
            collector.check_consistency(&NameEngine::new()),
            Err(Error::ParameterInconsistency("S".to_owned()))
        );
    }
}
