//! Decoding one signal against a whole protocol database, and resolving
//! ambiguous results with prefer-over rules.

use crate::{parser::parse_expression, ast::Expression, DecodeOptions, Error, Irp, IrSignal, NameEngine};
use itertools::Itertools;
use log::{debug, trace};
use std::{collections::HashMap, rc::Rc};

/// A disambiguation rule: when this protocol decodes a signal and the
/// predicate holds, the named competing protocol is dropped from the result.
#[derive(Debug, Clone)]
pub struct PreferOver {
    pub protocol_name: String,
    /// Absent means always true
    pub predicate: Option<Rc<Expression>>,
}

impl PreferOver {
    /// Parse a rule in the database format: either a bare protocol name or
    /// `predicate;name`.
    pub fn parse(s: &str) -> Result<PreferOver, Error> {
        match s.split_once(';') {
            Some((predicate, name)) => Ok(PreferOver {
                protocol_name: name.trim().to_owned(),
                predicate: Some(parse_expression(predicate)?),
            }),
            None => Ok(PreferOver {
                protocol_name: s.trim().to_owned(),
                predicate: None,
            }),
        }
    }

    /// The protocol to be removed, if the predicate holds under the decode's
    /// resolved parameters. A predicate that cannot be evaluated never
    /// removes anything.
    pub fn to_be_removed(&self, engine: &NameEngine) -> Option<&str> {
        match &self.predicate {
            None => Some(&self.protocol_name),
            Some(predicate) => match predicate.eval(engine) {
                Ok(0) => None,
                Ok(_) => Some(&self.protocol_name),
                Err(err) => {
                    trace!(
                        "prefer-over predicate {predicate} did not evaluate: {err}"
                    );
                    None
                }
            },
        }
    }
}

/// A protocol from the database, ready to decode.
pub struct NamedProtocol {
    pub name: String,
    pub irp: Irp,
    pub prefer_over: Vec<PreferOver>,
    pub options: DecodeOptions,
}

/// One successful decode of a signal.
#[derive(Debug, PartialEq)]
pub struct Decode {
    pub name: String,
    pub params: HashMap<String, i64>,
}

/// Decodes raw signals against a set of protocols.
pub struct Decoder {
    protocols: Vec<NamedProtocol>,
}

impl Decoder {
    pub fn new(protocols: Vec<NamedProtocol>) -> Self {
        Decoder { protocols }
    }

    /// Try every protocol on the signal and filter the matches with the
    /// prefer-over rules of the matching protocols. Disambiguation never
    /// empties the result: if every candidate would be removed, all are kept.
    pub fn decode(&self, signal: &IrSignal) -> Vec<Decode> {
        let mut matches = Vec::new();

        for protocol in &self.protocols {
            match protocol.irp.recognize(signal, protocol.options) {
                Ok(params) => {
                    debug!("decoded as {}: {params:?}", protocol.name);
                    matches.push((protocol, params));
                }
                Err(err) => {
                    trace!("{} did not decode: {err}", protocol.name);
                }
            }
        }

        let mut removals: Vec<String> = Vec::new();

        for (protocol, params) in &matches {
            if protocol.prefer_over.is_empty() {
                continue;
            }

            let mut engine = NameEngine::new();
            for (name, value) in params {
                let _ = engine.define(name, *value);
            }

            for rule in &protocol.prefer_over {
                if let Some(loser) = rule.to_be_removed(&engine) {
                    debug!("{} prefers over {loser}", protocol.name);
                    removals.push(loser.to_owned());
                }
            }
        }

        let keep_all = matches
            .iter()
            .all(|(protocol, _)| removals.iter().any(|name| *name == protocol.name));

        matches
            .into_iter()
            .filter(|(protocol, _)| {
                keep_all || !removals.iter().any(|name| *name == protocol.name)
            })
            // simplest protocol first
            .sorted_by_key(|(protocol, _)| (protocol.irp.weight(), protocol.name.clone()))
            .map(|(protocol, params)| Decode {
                name: protocol.name.clone(),
                params,
            })
            .collect()
    }
}

impl Irp {
    /// Complexity of the whole protocol; used to rank competing decodes.
    pub fn weight(&self) -> u32 {
        self.stream.weight()
            + self
                .definitions
                .iter()
                .map(|definition| definition.weight())
                .sum::<u32>()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_rules() {
        let rule = PreferOver::parse("NEC1").unwrap();

        assert_eq!(rule.protocol_name, "NEC1");
        assert!(rule.predicate.is_none());

        let rule = PreferOver::parse("D==0;Pioneer").unwrap();

        assert_eq!(rule.protocol_name, "Pioneer");

        let mut engine = NameEngine::new();
        engine.define("D", 0).unwrap();
        assert_eq!(rule.to_be_removed(&engine), Some("Pioneer"));

        let mut engine = NameEngine::new();
        engine.define("D", 5).unwrap();
        assert_eq!(rule.to_be_removed(&engine), None);

        // unassigned name fails open
        let engine = NameEngine::new();
        assert_eq!(rule.to_be_removed(&engine), None);
    }
}
