//! This library interprets [IRP Notation](http://hifi-remote.com/wiki/index.php?title=IRP_Notation),
//! a domain-specific language describing [Consumer IR](https://en.wikipedia.org/wiki/Consumer_IR)
//! remote control protocols. From one IRP description it can *render* — turn
//! parameter values into the exact flash/gap timings a remote would emit —
//! and *recognize* — recover the parameter values from an observed timing
//! sequence. A protocol database with prefer-over rules disambiguates
//! captures matching more than one protocol.
//!
//! ## Rendering NEC1
//!
//! ```
//! use irpmatch::{Irp, NameEngine};
//!
//! let irp = Irp::parse(r#"
//!     {38.4k,564}<1,-1|1,-3>(16,-8,D:8,S:8,F:8,~F:8,1,^108m)*
//!     [D:0..255,S:0..255=255-D,F:0..255]"#)
//!     .expect("parse should succeed");
//!
//! let mut params = NameEngine::new();
//! params.define("D", 255).unwrap();
//! params.define("S", 52).unwrap();
//! params.define("F", 1).unwrap();
//!
//! let signal = irp.render(params).expect("render should succeed");
//! println!("{}", irpmatch::message::print_rawir(&signal.repeat));
//! ```
//!
//! The output alternates *flash* (infrared light on, printed with a leading
//! `+`) and *gap* (light off, leading `-`), in microseconds.
//!
//! ## Recognizing a signal
//!
//! ```
//! use irpmatch::{DecodeOptions, Irp, NameEngine};
//!
//! let irp = Irp::parse(r#"
//!     {38.4k,564}<1,-1|1,-3>(16,-8,D:8,S:8,F:8,~F:8,1,^108m)*
//!     [D:0..255,S:0..255=255-D,F:0..255]"#)
//!     .expect("parse should succeed");
//!
//! let mut params = NameEngine::new();
//! params.define("D", 255).unwrap();
//! params.define("S", 52).unwrap();
//! params.define("F", 1).unwrap();
//!
//! let signal = irp.render(params).expect("render should succeed");
//!
//! let decoded = irp.recognize(&signal, DecodeOptions::default())
//!     .expect("signal should decode");
//! assert_eq!(decoded["F"], 1);
//! ```

pub mod ast;
mod collector;
mod decode;
mod duration;
mod error;
mod expression;
mod invert;
pub mod message;
mod nameengine;
mod parser;
pub mod protocols;
mod recognize;
mod render;
#[cfg(test)]
mod tests;

pub use ast::Irp;
pub use collector::{BitwiseParameter, ParameterCollector};
pub use decode::{Decode, Decoder, NamedProtocol, PreferOver};
pub use duration::DurationType;
pub use error::Error;
pub use nameengine::NameEngine;
pub use recognize::DecodeOptions;

/// One of the three structurally distinct segments of a repeatable IR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Intro = 0,
    Repeat = 1,
    Ending = 2,
}

/// A rendered signal: the physical sequences per pass. Even entries of each
/// sequence are flash, odd entries are gap, in microseconds.
#[derive(Debug, PartialEq, Default)]
pub struct IrSignal {
    pub intro: Vec<u32>,
    pub repeat: Vec<u32>,
    pub ending: Vec<u32>,
    /// Carrier frequency in Hertz; 0 means unmodulated
    pub carrier: i64,
    /// Duty cycle of the carrier pulse wave, between 1% and 99%
    pub duty_cycle: Option<u8>,
}

/// A flat raw infrared message.
#[derive(Debug, PartialEq, Default)]
pub struct Message {
    /// The carrier frequency. None means unknown, Some(0) means unmodulated
    pub carrier: Option<i64>,
    /// The duty cycle if known. Between 1% and 99%
    pub duty_cycle: Option<u8>,
    /// The flash and gap information in microseconds. All even entries are
    /// flash, odd are gap
    pub raw: Vec<u32>,
}
