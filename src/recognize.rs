//! Recognition: walk the stream for each pass, consuming an observed
//! physical sequence and constraining parameters until every bit is known.

use crate::{
    ast::{Expression, GeneralSpec, Irp, RepeatMarker, Stream},
    collector::ParameterCollector,
    duration::bit_spec_interleaving,
    expression::{bit_reverse, ones},
    invert::{invert, Inverted},
    render::{pass_iterations, separates_passes},
    Error, IrSignal, NameEngine, Pass,
};
use log::trace;
use std::{collections::HashMap, rc::Rc};

/// Matching tolerances. The defaults are the ones the protocol database
/// assumes when a protocol does not override them.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Maximum absolute difference in microseconds
    pub absolute_tolerance: u32,
    /// Maximum relative difference as a fraction of the expected duration
    pub relative_tolerance: f32,
    /// A trailing gap at least this long matches any longer expected leadout
    pub minimum_leadout: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            absolute_tolerance: 100,
            relative_tolerance: 0.3,
            minimum_leadout: 20000,
        }
    }
}

impl Irp {
    /// Recover the parameter values which would render to the given signal,
    /// or report that the signal is not an instance of this protocol.
    pub fn recognize(
        &self,
        signal: &IrSignal,
        options: DecodeOptions,
    ) -> Result<HashMap<String, i64>, Error> {
        let mut engine = NameEngine::new();
        let mut collector = ParameterCollector::new();

        for definition in &self.definitions {
            if let Expression::Assignment(name, expr) = definition.as_ref() {
                engine.define_expression(name, expr.clone())?;
                collector.add_expression(name, expr.clone());
            }
        }

        let mut data = RecognizeData::new(&self.general_spec, options, engine, collector);

        data.recognize_pass(self, Pass::Intro, &signal.intro)?;
        data.recognize_pass(self, Pass::Repeat, &signal.repeat)?;
        data.recognize_pass(self, Pass::Ending, &signal.ending)?;

        data.check_consistency()?;

        let mut result = HashMap::new();

        if self.parameters.is_empty() {
            for (name, value) in data.collector.values() {
                result.insert(name.to_owned(), value);
            }

            return Ok(result);
        }

        for parameter in &self.parameters {
            match data.collector.get(&parameter.name) {
                Some(value) => {
                    if value < parameter.min || value > parameter.max {
                        return Err(Error::NoMatch(format!(
                            "{value} is outside the range {}..{} for parameter {}",
                            parameter.min, parameter.max, parameter.name
                        )));
                    }

                    result.insert(parameter.name.clone(), value);
                }
                None if parameter.default.is_some() => (),
                None => return Err(Error::NameUnassigned(parameter.name.clone())),
            }
        }

        Ok(result)
    }
}

/// One bit spec currently in force.
#[derive(Clone, Copy)]
struct Scope<'a> {
    bit_spec: &'a [Rc<Expression>],
    interleaving: bool,
}

/// Bits consumed from the physical stream but not yet attributed to a
/// complete field, in transmission order.
#[derive(Clone, Copy, Default)]
struct DanglingBits {
    bits: i64,
    count: i64,
}

impl DanglingBits {
    fn push(&mut self, bits: i64, count: i64) {
        self.bits = (self.bits << count) | (bits & ones(count));
        self.count += count;
    }

    /// Take up to `wanted` of the oldest pending bits.
    fn take(&mut self, wanted: i64) -> (i64, i64) {
        let taken = std::cmp::min(wanted, self.count);

        if taken == 0 {
            return (0, 0);
        }

        let value = (self.bits >> (self.count - taken)) & ones(taken);
        self.count -= taken;
        self.bits &= ones(self.count);

        (value, taken)
    }
}

/// Mutable state while recognizing one signal. Cloning forks the state for a
/// candidate branch: the collector, engine and pending set are deep copies,
/// the sequence and parse tree stay shared.
#[derive(Clone)]
struct RecognizeData<'a> {
    general_spec: &'a GeneralSpec,
    options: DecodeOptions,
    sequence: &'a [u32],
    /// Index of the entry being consumed; even entries are flash
    position: usize,
    /// Microseconds already consumed of the current entry
    consumed: i64,
    /// Physical microseconds matched so far this pass
    total: i64,
    extent_marker: Vec<i64>,
    scopes: Vec<Scope<'a>>,
    collector: ParameterCollector,
    /// Definitions; never carries decoded values directly
    engine: NameEngine,
    /// Values set by assignment items, shadowing collected bits
    assigned: NameEngine,
    /// Equations which could not be verified when their bits arrived
    pending: Vec<(Rc<Expression>, i64, i64)>,
    dangling: DanglingBits,
    /// When false the matcher may consume durations partially
    interleaving: bool,
    pass: Pass,
    state: Pass,
}

impl<'a> RecognizeData<'a> {
    fn new(
        general_spec: &'a GeneralSpec,
        options: DecodeOptions,
        engine: NameEngine,
        collector: ParameterCollector,
    ) -> Self {
        RecognizeData {
            general_spec,
            options,
            sequence: &[],
            position: 0,
            consumed: 0,
            total: 0,
            extent_marker: Vec::new(),
            scopes: Vec::new(),
            collector,
            engine,
            assigned: NameEngine::new(),
            pending: Vec::new(),
            dangling: DanglingBits::default(),
            interleaving: true,
            pass: Pass::Intro,
            state: Pass::Intro,
        }
    }

    /// Definitions extended with everything decoded so far.
    fn extended_engine(&self) -> NameEngine {
        let mut engine = self.engine.clone();

        // collected bits; names covered by definitions stay deferred
        let _ = self.collector.add_to_name_engine(&mut engine);

        for (name, value) in self.assigned.values() {
            let _ = engine.assign(name, value);
        }

        engine
    }

    fn recognize_pass(&mut self, irp: &'a Irp, pass: Pass, sequence: &'a [u32]) -> Result<(), Error> {
        self.sequence = sequence;
        self.position = 0;
        self.consumed = 0;
        self.total = 0;
        self.extent_marker.clear();
        self.pass = pass;
        self.state = Pass::Intro;

        self.push_extent_marker();
        self.recognize_item(&irp.stream, None, Pass::Intro as usize)?;
        self.pop_extent_marker();

        if self.position < self.sequence.len() {
            return Err(Error::NoMatch(format!(
                "{} unmatched trailing durations",
                self.sequence.len() - self.position
            )));
        }

        if self.dangling.count != 0 {
            return Err(Error::NoMatch("dangling bits at end of pass".into()));
        }

        self.check_consistency()
    }

    /// Validate all speculative bindings recorded so far against what is now
    /// known, then clear the pending set.
    fn check_consistency(&mut self) -> Result<(), Error> {
        let engine = self.extended_engine();

        for (expr, rhs, mask) in self.pending.drain(..) {
            match expr.eval(&engine) {
                Ok(value) => {
                    if ((value ^ rhs) & mask) != 0 {
                        trace!("pending {expr} = {value} contradicts observed bits");
                        return Err(Error::ParameterInconsistency(expr.to_string()));
                    }
                }
                // still not enough information; nothing to hold against it
                Err(Error::NameUnassigned(_)) => (),
                Err(err) => return Err(err),
            }
        }

        self.collector.check_consistency(&self.engine)
    }

    fn push_extent_marker(&mut self) {
        self.extent_marker.push(self.total);
    }

    fn pop_extent_marker(&mut self) {
        self.extent_marker.pop();
    }

    fn tolerance_eq(&self, expected: i64, received: i64) -> bool {
        let diff = (expected - received).abs();

        diff <= self.options.absolute_tolerance as i64
            || (diff as f64) <= self.options.relative_tolerance as f64 * expected as f64
    }

    /// May durations be consumed partially here? True inside a bit spec
    /// scope that does not interleave: its alternatives merge with their
    /// physical neighbours, so an entry may span several expected durations.
    fn may_split(&self, level: Option<usize>) -> bool {
        !self.interleaving || level.is_some_and(|level| !self.scopes[level].interleaving)
    }

    /// Consume an expected flash or gap from the observed sequence. When
    /// `may_split` holds, an entry longer than expected may be consumed
    /// partially, leaving the rest for the next item.
    fn expect_duration(
        &mut self,
        expected: i64,
        flash: bool,
        leadout: bool,
        may_split: bool,
    ) -> Result<(), Error> {
        if expected <= 0 {
            return Ok(());
        }

        if self.position >= self.sequence.len() {
            return Err(Error::NoMatch("sequence ended".into()));
        }

        if (self.position % 2 == 0) != flash {
            return Err(Error::NoMatch(format!(
                "expected {} but observed {}",
                if flash { "flash" } else { "gap" },
                if flash { "gap" } else { "flash" },
            )));
        }

        let remaining = self.sequence[self.position] as i64 - self.consumed;

        if leadout
            && !flash
            && expected >= self.options.minimum_leadout as i64
            && remaining >= self.options.minimum_leadout as i64
        {
            trace!("leadout {remaining} matches expected {expected}");
            self.advance(remaining);
            return Ok(());
        }

        if self.tolerance_eq(expected, remaining) {
            trace!(
                "matched {} {remaining} (expected {expected})",
                if flash { "flash" } else { "gap" }
            );
            self.advance(remaining);
            Ok(())
        } else if may_split && remaining > expected {
            trace!(
                "matched {} {expected} of {remaining} (partial consume)",
                if flash { "flash" } else { "gap" }
            );
            self.consumed += expected;
            self.total += expected;
            Ok(())
        } else {
            Err(Error::NoMatch(format!(
                "observed {} of {remaining} does not match expected {expected}",
                if flash { "flash" } else { "gap" }
            )))
        }
    }

    fn advance(&mut self, remaining: i64) {
        self.total += remaining;
        self.position += 1;
        self.consumed = 0;
    }

    fn expect_extent(&mut self, extent: i64, may_split: bool) -> Result<(), Error> {
        let elapsed = self.total - *self.extent_marker.last().unwrap();
        let padding = extent - elapsed;

        if padding < 0 {
            return Err(Error::NoMatch(format!(
                "extent of {extent}us shorter than the {elapsed}us already matched"
            )));
        }

        if padding == 0 {
            return Ok(());
        }

        self.expect_duration(padding, false, true, may_split)
    }

    fn recognize_stream(
        &mut self,
        items: &'a [Rc<Expression>],
        level: Option<usize>,
        variant: usize,
    ) -> Result<(), Error> {
        for expr in items {
            if let Expression::Variation(variants) = expr.as_ref() {
                if self.state != self.pass {
                    continue;
                }

                match variants.get(variant) {
                    Some(list) if !list.is_empty() => {
                        self.recognize_stream(list, level, variant)?;
                    }
                    _ => break,
                }

                continue;
            }

            if !matches!(expr.as_ref(), Expression::Stream(_)) && self.state != self.pass {
                continue;
            }

            self.recognize_item(expr, level, variant)?;
        }

        Ok(())
    }

    fn recognize_item(
        &mut self,
        expr: &'a Rc<Expression>,
        level: Option<usize>,
        variant: usize,
    ) -> Result<(), Error> {
        let gs = self.general_spec;

        let may_split = self.may_split(level);

        match expr.as_ref() {
            Expression::FlashConstant(v, unit) => {
                let expected = unit.eval_float(*v, gs)?;
                self.expect_duration(expected, true, false, may_split)
            }
            Expression::FlashIdentifier(id, unit) => {
                let expected = unit.eval(self.extended_engine().get(id)?, gs)?;
                self.expect_duration(expected, true, false, may_split)
            }
            Expression::GapConstant(v, unit) => {
                let expected = unit.eval_float(*v, gs)?;
                self.expect_duration(expected, false, false, may_split)
            }
            Expression::GapIdentifier(id, unit) => {
                let expected = unit.eval(self.extended_engine().get(id)?, gs)?;
                self.expect_duration(expected, false, false, may_split)
            }
            Expression::ExtentConstant(v, unit) => {
                let extent = unit.eval_float(*v, gs)?;
                self.expect_extent(extent, may_split)
            }
            Expression::ExtentIdentifier(id, unit) => {
                let extent = unit.eval(self.extended_engine().get(id)?, gs)?;
                self.expect_extent(extent, may_split)
            }
            Expression::Assignment(id, expr) => {
                match expr.eval(&self.extended_engine()) {
                    Ok(value) => self.assigned.assign(id, value)?,
                    Err(Error::NameUnassigned(name)) => {
                        trace!("assignment {id}={expr} skipped, {name} not assigned");
                    }
                    Err(err) => return Err(err),
                }
                Ok(())
            }
            Expression::Stream(stream) => self.recognize_nested_stream(stream, level, variant),
            Expression::BitField { .. } => self.recognize_bitfield(expr, level),
            Expression::InfiniteBitField { .. } => Err(Error::Semantic(
                "infinite bit field cannot be recognized".into(),
            )),
            Expression::List(list) => self.recognize_stream(list, level, variant),
            _ => Err(Error::Semantic(format!(
                "expression {expr} not expected in stream"
            ))),
        }
    }

    fn recognize_nested_stream(
        &mut self,
        stream: &'a Stream,
        level: Option<usize>,
        variant: usize,
    ) -> Result<(), Error> {
        let level = if !stream.bit_spec.is_empty() {
            self.scopes.push(Scope {
                bit_spec: &stream.bit_spec,
                interleaving: bit_spec_interleaving(&stream.bit_spec),
            });

            Some(self.scopes.len() - 1)
        } else {
            level
        };

        if separates_passes(stream) {
            let iterations = pass_iterations(stream, self.pass);
            let variant = self.pass as usize;

            for _ in 0..iterations {
                self.push_extent_marker();
                self.recognize_stream(&stream.stream, level, variant)?;
                self.pop_extent_marker();
            }

            self.state = Pass::Ending;
        } else {
            let count = match &stream.repeat {
                None => 1,
                Some(RepeatMarker::Count(count)) => *count,
                Some(_) => unreachable!(),
            };

            if self.state == self.pass {
                for _ in 0..count {
                    self.push_extent_marker();
                    self.recognize_stream(&stream.stream, level, variant)?;
                    self.pop_extent_marker();
                }
            } else if stream
                .stream
                .iter()
                .any(|e| matches!(e.as_ref(), Expression::Stream(_)))
            {
                self.push_extent_marker();
                self.recognize_stream(&stream.stream, level, variant)?;
                self.pop_extent_marker();
            }
        }

        if !stream.bit_spec.is_empty() {
            self.scopes.pop();
        }

        Ok(())
    }

    /// Match one bit spec alternative against the observed sequence. Each
    /// candidate runs on a forked copy of the state; the first that fits is
    /// adopted, a candidate failing with a recoverable error is discarded.
    fn recognize_chunk(&mut self, level: usize) -> Result<i64, Error> {
        let scope = self.scopes[level];
        let lower_level = level.checked_sub(1);

        for (index, alternative) in scope.bit_spec.iter().enumerate() {
            let Expression::List(items) = alternative.as_ref() else {
                continue;
            };

            let mut candidate = self.clone();
            candidate.interleaving = scope.interleaving;

            match candidate.recognize_stream(items, lower_level, self.pass as usize) {
                Ok(()) => {
                    trace!("bit spec alternative {index} matched");
                    candidate.interleaving = self.interleaving;
                    *self = candidate;
                    return Ok(index as i64);
                }
                Err(err) if err.rejects_candidate() => {
                    trace!("bit spec alternative {index} rejected: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::NoMatch("no bit spec alternative matches".into()))
    }

    fn recognize_bitfield(&mut self, expr: &'a Rc<Expression>, level: Option<usize>) -> Result<(), Error> {
        let Expression::BitField {
            value,
            reverse,
            length,
            offset,
        } = expr.as_ref()
        else {
            unreachable!();
        };

        let Some(level) = level else {
            return Err(Error::Semantic("bits not permitted here".into()));
        };

        let engine = self.extended_engine();
        let length = length.eval(&engine)?;
        let offset = match offset {
            Some(offset) => offset.eval(&engine)?,
            None => 0,
        };

        if !(0..64).contains(&length) {
            return Err(Error::Semantic(format!(
                "bit field length {length} not supported"
            )));
        }

        if !(0..64).contains(&offset) {
            return Err(Error::Semantic(format!(
                "bit field offset {offset} not supported"
            )));
        }

        let chunk_size = match self.scopes[level].bit_spec.len() {
            1..=2 => 1,
            3..=4 => 2,
            5..=8 => 3,
            9..=16 => 4,
            _ => unreachable!(),
        };

        let transmitted = if self.general_spec.lsb {
            // chunks carry the field low bits first; carrying bits between
            // fields would need look-ahead, so require chunk alignment
            if self.dangling.count != 0 || length % chunk_size != 0 {
                return Err(Error::NoMatch(
                    "bit field does not align with bit spec chunks".into(),
                ));
            }

            let mut transmitted = 0;

            for i in 0..length / chunk_size {
                let chunk = self.recognize_chunk(level)?;
                transmitted |= chunk << (i * chunk_size);
            }

            transmitted
        } else {
            let (mut transmitted, mut have) = self.dangling.take(length);

            while have < length {
                let chunk = self.recognize_chunk(level)?;

                if have + chunk_size <= length {
                    transmitted = (transmitted << chunk_size) | chunk;
                    have += chunk_size;
                } else {
                    // the chunk straddles the field boundary; the excess low
                    // bits belong to the next field
                    let excess = have + chunk_size - length;
                    transmitted = (transmitted << (chunk_size - excess)) | (chunk >> excess);
                    self.dangling.push(chunk, excess);
                    have = length;
                }
            }

            transmitted
        };

        let payload = if *reverse {
            bit_reverse(transmitted, length)
        } else {
            transmitted
        };

        trace!("bit field {expr} observed as {payload}");

        let rhs = payload << offset;
        let mask = ones(length) << offset;

        match invert(value, rhs, mask, &self.extended_engine())? {
            Inverted::Assign { name, value, mask } => {
                // an assignment item may already pin this name
                if let Ok(assigned) = self.assigned.get(&name) {
                    if ((assigned ^ value) & mask) != 0 {
                        return Err(Error::ParameterInconsistency(name));
                    }
                }

                self.collector.add(&name, value, mask)
            }
            Inverted::Verified => Ok(()),
            Inverted::Pending => {
                self.pending.push((value.clone(), rhs, mask));
                Ok(())
            }
        }
    }
}
