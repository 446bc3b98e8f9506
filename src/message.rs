//! Raw IR text format, e.g. `+9024 -4512 +564`.

use crate::{Error, IrSignal, Message};
use num::Integer;
use std::fmt::Write;

impl Message {
    /// Create an empty message
    pub fn new() -> Self {
        Message::default()
    }

    /// Concatenate two messages
    pub fn extend(&mut self, other: &Message) {
        if self.carrier.is_none() {
            self.carrier = other.carrier;
        }

        if self.duty_cycle.is_none() {
            self.duty_cycle = other.duty_cycle;
        }

        self.raw.extend_from_slice(&other.raw);
    }

    /// Do we have a trailing gap
    pub fn has_trailing_gap(&self) -> bool {
        let len = self.raw.len();

        len > 0 && (len % 2) == 0
    }

    /// Remove any trailing gap
    pub fn remove_trailing_gap(&mut self) {
        if self.has_trailing_gap() {
            self.raw.pop();
        }
    }

    /// Print the flash and gap information as a raw IR string
    pub fn print_rawir(&self) -> String {
        print_rawir(&self.raw)
    }

    /// Parse a raw IR string of the form `+9000 -45000 +2250`. The leading
    /// `+` and `-` may be omitted, but when present they are checked for
    /// consistency.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let mut raw = Vec::new();
        let mut flash = true;

        for e in s.split(|c: char| c.is_whitespace() || c == ',') {
            if e.is_empty() {
                continue;
            }

            let mut chars = e.chars().peekable();

            match chars.peek() {
                Some('+') => {
                    if !flash {
                        return Err(Error::Parse("unexpected ‘+’ encountered".into()));
                    }
                    chars.next();
                }
                Some('-') => {
                    if flash {
                        return Err(Error::Parse("unexpected ‘-’ encountered".into()));
                    }
                    chars.next();
                }
                Some(ch) if !ch.is_numeric() => {
                    return Err(Error::Parse(format!("unexpected ‘{ch}’ encountered")));
                }
                _ => (),
            }

            let v = chars.collect::<String>();

            let v = v
                .parse()
                .map_err(|_| Error::Parse(format!("invalid number ‘{v}’")))?;

            if v == 0 {
                return Err(Error::Parse("nonsensical 0 length".into()));
            }

            raw.push(v);

            flash = !flash;
        }

        if raw.is_empty() {
            return Err(Error::Parse("missing length".into()));
        }

        Ok(Message {
            raw,
            carrier: None,
            duty_cycle: None,
        })
    }
}

/// Convert a slice of durations to a raw IR string
pub fn print_rawir(raw: &[u32]) -> String {
    let mut s = String::new();

    for (i, v) in raw.iter().enumerate() {
        write!(
            s,
            "{}{}{}",
            if i == 0 { "" } else { " " },
            if i.is_even() { "+" } else { "-" },
            v
        )
        .unwrap();
    }

    s
}

impl IrSignal {
    /// Flatten the signal to a single message with the given number of
    /// repeats.
    pub fn to_message(&self, repeats: u64) -> Message {
        let mut raw = self.intro.clone();

        for _ in 0..repeats {
            raw.extend_from_slice(&self.repeat);
        }

        raw.extend_from_slice(&self.ending);

        Message {
            carrier: Some(self.carrier),
            duty_cycle: self.duty_cycle,
            raw,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn print() {
        assert_eq!(print_rawir(&[100, 50, 75]), "+100 -50 +75");
    }

    #[test]
    fn parse() {
        assert_eq!(
            Message::parse("+100 +100"),
            Err(Error::Parse("unexpected ‘+’ encountered".into()))
        );

        assert_eq!(
            Message::parse("+100 -100 -1"),
            Err(Error::Parse("unexpected ‘-’ encountered".into()))
        );

        assert_eq!(
            Message::parse("+100 -100").unwrap().raw,
            vec![100u32, 100u32]
        );

        assert_eq!(
            Message::parse(""),
            Err(Error::Parse("missing length".into()))
        );

        assert_eq!(
            Message::parse("+0"),
            Err(Error::Parse("nonsensical 0 length".into()))
        );

        assert_eq!(
            Message::parse("100,100,+1,-20000").unwrap().raw,
            vec![100u32, 100u32, 1u32, 20000u32]
        );
    }
}
