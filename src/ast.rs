//! The parse tree of one IRP protocol. These structures are built once by the
//! parser and then shared read-only between render and recognize sessions.

use std::rc::Rc;

/// A parsed IRP protocol, ready for rendering and recognition.
#[derive(Debug)]
pub struct Irp {
    pub general_spec: GeneralSpec,
    pub stream: Rc<Expression>,
    pub definitions: Vec<Rc<Expression>>,
    pub parameters: Vec<ParameterSpec>,
}

/// Protocol wide constants: the base time unit, carrier frequency, duty cycle
/// and bit ordering.
#[derive(Debug, PartialEq)]
pub struct GeneralSpec {
    /// Duty cycle of the carrier pulse wave, between 1% and 99%
    pub duty_cycle: Option<u8>,
    /// Carrier frequency in Hertz. 0 means unmodulated
    pub carrier: i64,
    /// Least significant bit first when encoding variables
    pub lsb: bool,
    /// Length of one unit in microseconds
    pub unit: f64,
}

impl Default for GeneralSpec {
    fn default() -> Self {
        GeneralSpec {
            duty_cycle: None,
            carrier: 38000,
            lsb: true,
            unit: 1.0,
        }
    }
}

#[derive(PartialEq, Copy, Clone, Debug)]
pub enum Unit {
    Units,
    Microseconds,
    Milliseconds,
    Pulses,
}

#[derive(PartialEq, Debug, Clone)]
pub enum RepeatMarker {
    Any,
    OneOrMore,
    Count(i64),
    CountOrMore(i64),
}

impl RepeatMarker {
    /// How many iterations belong to the intro pass
    pub(crate) fn minimum(&self) -> i64 {
        match self {
            RepeatMarker::Any => 0,
            RepeatMarker::OneOrMore => 1,
            RepeatMarker::Count(n) | RepeatMarker::CountOrMore(n) => *n,
        }
    }
}

/// One `<bitspec>(stream)` with an optional repeat marker. The bit spec may be
/// empty, in which case the enclosing scope's bit spec stays in force.
#[derive(PartialEq, Debug, Clone)]
pub struct Stream {
    pub bit_spec: Vec<Rc<Expression>>,
    pub stream: Vec<Rc<Expression>>,
    pub repeat: Option<RepeatMarker>,
}

/// Expression tree node. Durations, bit fields, streams and plain arithmetic
/// all share this type; rendering and recognition dispatch on the variant.
#[derive(PartialEq, Debug, Clone)]
pub enum Expression {
    FlashConstant(f64, Unit),
    GapConstant(f64, Unit),
    ExtentConstant(f64, Unit),
    FlashIdentifier(String, Unit),
    GapIdentifier(String, Unit),
    ExtentIdentifier(String, Unit),
    Assignment(String, Rc<Expression>),
    Number(i64),
    Identifier(String),
    BitField {
        value: Rc<Expression>,
        reverse: bool,
        length: Rc<Expression>,
        offset: Option<Rc<Expression>>,
    },
    InfiniteBitField {
        value: Rc<Expression>,
        offset: Rc<Expression>,
    },
    Complement(Rc<Expression>),
    Not(Rc<Expression>),
    Negative(Rc<Expression>),
    BitCount(Rc<Expression>),

    Power(Rc<Expression>, Rc<Expression>),
    Multiply(Rc<Expression>, Rc<Expression>),
    Divide(Rc<Expression>, Rc<Expression>),
    Modulo(Rc<Expression>, Rc<Expression>),
    Add(Rc<Expression>, Rc<Expression>),
    Subtract(Rc<Expression>, Rc<Expression>),

    ShiftLeft(Rc<Expression>, Rc<Expression>),
    ShiftRight(Rc<Expression>, Rc<Expression>),

    LessEqual(Rc<Expression>, Rc<Expression>),
    Less(Rc<Expression>, Rc<Expression>),
    Greater(Rc<Expression>, Rc<Expression>),
    GreaterEqual(Rc<Expression>, Rc<Expression>),
    Equal(Rc<Expression>, Rc<Expression>),
    NotEqual(Rc<Expression>, Rc<Expression>),

    BitwiseAnd(Rc<Expression>, Rc<Expression>),
    BitwiseOr(Rc<Expression>, Rc<Expression>),
    BitwiseXor(Rc<Expression>, Rc<Expression>),
    Or(Rc<Expression>, Rc<Expression>),
    And(Rc<Expression>, Rc<Expression>),
    Conditional(Rc<Expression>, Rc<Expression>, Rc<Expression>),
    List(Vec<Rc<Expression>>),
    Stream(Stream),
    Variation(Vec<Vec<Rc<Expression>>>),
}

/// One entry of the parameter specs block, e.g. `D:0..255=255-S`.
#[derive(Debug)]
pub struct ParameterSpec {
    pub name: String,
    /// Memory parameters (`@`) keep their value from the previous signal
    pub memory: bool,
    pub min: i64,
    pub max: i64,
    pub default: Option<Rc<Expression>>,
}
