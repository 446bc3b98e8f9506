//! Bindings from parameter names to values or deferred expressions.

use crate::{ast::Expression, Error};
use std::{collections::HashMap, fmt, rc::Rc};

#[derive(Debug, Clone)]
enum Binding {
    Value(i64),
    /// IRP definitions are evaluated each time they are referenced
    Deferred(Rc<Expression>),
}

/// The variable environment of one render or recognize session.
///
/// A name bound to a value cannot be re-bound to a different value through
/// [`NameEngine::define`]; that is a conflict. IRP assignment items such as
/// `T=1-T` deliberately replace values and go through
/// [`NameEngine::assign`] instead. Cloning yields an independent copy, which
/// is the only way to fork session state.
#[derive(Default, Debug, Clone)]
pub struct NameEngine {
    vars: HashMap<String, Binding>,
}

pub(crate) fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

impl NameEngine {
    pub fn new() -> Self {
        NameEngine::default()
    }

    /// Bind a name to a value. Binding the same value twice is a no-op,
    /// binding a different value is a conflict.
    pub fn define(&mut self, name: &str, value: i64) -> Result<(), Error> {
        if !valid_name(name) {
            return Err(Error::InvalidName(name.to_owned()));
        }

        match self.vars.get(name) {
            Some(Binding::Value(old)) if *old != value => {
                Err(Error::NameConflict(name.to_owned()))
            }
            Some(Binding::Value(_)) => Ok(()),
            _ => {
                self.vars.insert(name.to_owned(), Binding::Value(value));
                Ok(())
            }
        }
    }

    /// Replace any existing binding. Used by assignment items in the stream.
    pub fn assign(&mut self, name: &str, value: i64) -> Result<(), Error> {
        if !valid_name(name) {
            return Err(Error::InvalidName(name.to_owned()));
        }

        self.vars.insert(name.to_owned(), Binding::Value(value));

        Ok(())
    }

    /// Bind a name to an expression which is evaluated on every reference.
    pub fn define_expression(&mut self, name: &str, expr: Rc<Expression>) -> Result<(), Error> {
        if !valid_name(name) {
            return Err(Error::InvalidName(name.to_owned()));
        }

        self.vars.insert(name.to_owned(), Binding::Deferred(expr));

        Ok(())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Resolved value of a name, evaluating deferred expressions.
    pub fn get(&self, name: &str) -> Result<i64, Error> {
        match self.vars.get(name) {
            Some(Binding::Value(value)) => Ok(*value),
            Some(Binding::Deferred(expr)) => expr.eval(self),
            None => Err(Error::NameUnassigned(name.to_owned())),
        }
    }

    /// Names bound to plain values, in no particular order.
    pub fn values(&self) -> impl Iterator<Item = (&str, i64)> {
        self.vars.iter().filter_map(|(name, b)| match b {
            Binding::Value(value) => Some((name.as_str(), *value)),
            Binding::Deferred(_) => None,
        })
    }
}

impl fmt::Display for NameEngine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (name, binding) in &self.vars {
            if !first {
                write!(f, ",")?;
            }
            match binding {
                Binding::Value(value) => write!(f, "{name}={value}")?,
                Binding::Deferred(expr) => write!(f, "{name}={expr}")?,
            }
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conflict() {
        let mut engine = NameEngine::new();

        engine.define("X", 5).unwrap();
        engine.define("X", 5).unwrap();

        assert_eq!(
            engine.define("X", 7),
            Err(Error::NameConflict("X".to_owned()))
        );

        // assignment items may replace values
        engine.assign("X", 7).unwrap();
        assert_eq!(engine.get("X"), Ok(7));
    }

    #[test]
    fn names() {
        let mut engine = NameEngine::new();

        assert_eq!(
            engine.define("4ever", 1),
            Err(Error::InvalidName("4ever".to_owned()))
        );

        engine.define("_x9", 1).unwrap();

        assert_eq!(
            engine.get("nothere"),
            Err(Error::NameUnassigned("nothere".to_owned()))
        );
    }

    #[test]
    fn deferred() {
        let mut engine = NameEngine::new();

        engine.define("D", 5).unwrap();
        engine
            .define_expression(
                "S",
                Rc::new(Expression::Subtract(
                    Rc::new(Expression::Number(255)),
                    Rc::new(Expression::Identifier("D".to_owned())),
                )),
            )
            .unwrap();

        assert_eq!(engine.get("S"), Ok(250));

        // forked copies do not alias
        let copy = engine.clone();
        engine.assign("D", 6).unwrap();
        assert_eq!(copy.get("D"), Ok(5));
        assert_eq!(engine.get("S"), Ok(249));
    }
}
