//! The physical time model: flash/gap classification, unit conversion and
//! the interleaving analysis that decides how strict the recognizer must be
//! when consuming durations.

use crate::{
    ast::{Expression, GeneralSpec, Unit},
    Error,
};
use std::rc::Rc;

/// Classification of the physical effect of a stream item.
///
/// `None` is the identity element for [`DurationType::combine`];
/// `Indeterminate` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationType {
    Flash,
    Gap,
    None,
    Indeterminate,
}

impl DurationType {
    /// Classification of the join of two sub-streams.
    pub fn combine(self, other: DurationType) -> DurationType {
        if self == other {
            self
        } else if self == DurationType::None {
            other
        } else if other == DurationType::None {
            self
        } else {
            DurationType::Indeterminate
        }
    }

    /// True when this duration may physically follow `preceding`: a real IR
    /// waveform cannot contain two consecutive flashes or gaps.
    pub fn interleaving_ok(self, preceding: DurationType) -> bool {
        self != DurationType::Indeterminate
            && preceding != DurationType::Indeterminate
            && (self == DurationType::Flash && preceding == DurationType::Gap
                || self == DurationType::Gap && preceding == DurationType::Flash
                || self == DurationType::None
                || preceding == DurationType::None)
    }
}

impl Unit {
    pub(crate) fn eval(&self, v: i64, spec: &GeneralSpec) -> Result<i64, Error> {
        match self {
            Unit::Units if spec.unit == 0.0 => {
                Err(Error::Semantic("cannot use units when unit set to 0".into()))
            }
            Unit::Units => Ok((v as f64 * spec.unit) as i64),
            Unit::Microseconds => Ok(v),
            Unit::Milliseconds => Ok(v * 1000),
            Unit::Pulses if spec.carrier == 0 => Err(Error::Semantic(
                "pulses cannot be used with zero carrier".into(),
            )),
            Unit::Pulses => Ok(v * 1_000_000 / spec.carrier),
        }
    }

    pub(crate) fn eval_float(&self, v: f64, spec: &GeneralSpec) -> Result<i64, Error> {
        match self {
            Unit::Units if spec.unit == 0.0 => {
                Err(Error::Semantic("cannot use units when unit set to 0".into()))
            }
            Unit::Units => Ok((v * spec.unit) as i64),
            Unit::Microseconds => Ok(v as i64),
            Unit::Milliseconds => Ok((v * 1000.0) as i64),
            Unit::Pulses if spec.carrier == 0 => Err(Error::Semantic(
                "pulses cannot be used with zero carrier".into(),
            )),
            Unit::Pulses => Ok((v * 1_000_000.0) as i64 / spec.carrier),
        }
    }
}

/// Duration type of the first physical output of an item.
pub(crate) fn starting_duration_type(expr: &Expression) -> DurationType {
    match expr {
        Expression::FlashConstant(..) | Expression::FlashIdentifier(..) => DurationType::Flash,
        Expression::GapConstant(..)
        | Expression::GapIdentifier(..)
        | Expression::ExtentConstant(..)
        | Expression::ExtentIdentifier(..) => DurationType::Gap,
        Expression::Assignment(..) => DurationType::None,
        Expression::List(list) => edge_duration_type(list, false),
        Expression::Stream(stream) => edge_duration_type(&stream.stream, false),
        // a bit field renders as its bit spec does; decided by the caller
        _ => DurationType::Indeterminate,
    }
}

/// Duration type of the last physical output of an item.
pub(crate) fn ending_duration_type(expr: &Expression) -> DurationType {
    match expr {
        Expression::FlashConstant(..) | Expression::FlashIdentifier(..) => DurationType::Flash,
        Expression::GapConstant(..)
        | Expression::GapIdentifier(..)
        | Expression::ExtentConstant(..)
        | Expression::ExtentIdentifier(..) => DurationType::Gap,
        Expression::Assignment(..) => DurationType::None,
        Expression::List(list) => edge_duration_type(list, true),
        Expression::Stream(stream) => edge_duration_type(&stream.stream, true),
        _ => DurationType::Indeterminate,
    }
}

fn edge_duration_type(items: &[Rc<Expression>], last: bool) -> DurationType {
    let mut iter: Box<dyn Iterator<Item = &Rc<Expression>>> = if last {
        Box::new(items.iter().rev())
    } else {
        Box::new(items.iter())
    };

    match iter.find(|e| !matches!(e.as_ref(), Expression::Assignment(..))) {
        Some(expr) if last => ending_duration_type(expr),
        Some(expr) => starting_duration_type(expr),
        None => DurationType::None,
    }
}

/// A bit spec interleaves when every alternative starts and ends with the
/// same flash/gap orientation, so consecutive chunks always alternate and the
/// recognizer can insist on consuming whole physical durations. Biphase
/// specs such as `<1,-1|-1,1>` do not interleave; there the recognizer must
/// be allowed to split durations ("rest" consumption).
pub(crate) fn bit_spec_interleaving(bit_spec: &[Rc<Expression>]) -> bool {
    let mut start = DurationType::None;
    let mut end = DurationType::None;

    for alternative in bit_spec {
        start = start.combine(starting_duration_type(alternative));
        end = end.combine(ending_duration_type(alternative));
    }

    start != DurationType::Indeterminate
        && end != DurationType::Indeterminate
        && start.interleaving_ok(end)
}

/// Reject explicitly adjacent same-typed durations, e.g. a flash directly
/// followed by another flash. Rendered output always alternates; a protocol
/// written this way is malformed. Extents count as gaps but may follow one
/// (the padding can be zero); assignments are physically invisible.
pub(crate) fn check_alternation(items: &[Rc<Expression>]) -> Result<(), Error> {
    let mut preceding = DurationType::None;

    for item in items {
        match item.as_ref() {
            Expression::FlashConstant(..) | Expression::FlashIdentifier(..) => {
                if preceding == DurationType::Flash {
                    return Err(Error::Semantic(
                        "consecutive flash durations do not alternate".into(),
                    ));
                }
                preceding = DurationType::Flash;
            }
            Expression::GapConstant(..) | Expression::GapIdentifier(..) => {
                if preceding == DurationType::Gap {
                    return Err(Error::Semantic(
                        "consecutive gap durations do not alternate".into(),
                    ));
                }
                preceding = DurationType::Gap;
            }
            Expression::ExtentConstant(..) | Expression::ExtentIdentifier(..) => {
                preceding = DurationType::Gap;
            }
            Expression::Assignment(..) => (),
            _ => preceding = DurationType::None,
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use DurationType::*;

    #[test]
    fn combine() {
        assert_eq!(None.combine(Flash), Flash);
        assert_eq!(Flash.combine(None), Flash);
        assert_eq!(Flash.combine(Flash), Flash);
        assert_eq!(Flash.combine(Gap), Indeterminate);
        assert_eq!(Gap.combine(Flash), Indeterminate);
        assert_eq!(Indeterminate.combine(None), Indeterminate);
    }

    #[test]
    fn interleaving() {
        assert!(Flash.interleaving_ok(Gap));
        assert!(Gap.interleaving_ok(Flash));
        assert!(None.interleaving_ok(Flash));
        assert!(Gap.interleaving_ok(None));
        assert!(!Flash.interleaving_ok(Flash));
        assert!(!Gap.interleaving_ok(Gap));
        assert!(!Flash.interleaving_ok(Indeterminate));
        assert!(!Indeterminate.interleaving_ok(Gap));
    }

    #[test]
    fn units() {
        let spec = GeneralSpec {
            unit: 564.0,
            ..Default::default()
        };

        assert_eq!(Unit::Units.eval(16, &spec), Ok(9024));
        assert_eq!(Unit::Milliseconds.eval(108, &spec), Ok(108000));
        assert_eq!(Unit::Microseconds.eval(564, &spec), Ok(564));
        // 38kHz default carrier
        assert_eq!(Unit::Pulses.eval(38, &spec), Ok(1000));
    }
}
