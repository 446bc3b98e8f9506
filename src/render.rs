//! Rendering: walk the stream for one pass and produce the physical
//! flash/gap sequence.

use crate::{
    ast::{Expression, GeneralSpec, Irp, RepeatMarker, Stream},
    Error, IrSignal, NameEngine, Pass,
};
use bitvec::prelude::*;
use log::warn;
use std::rc::Rc;

impl Irp {
    /// Render the protocol to physical timings with the given parameter
    /// values, one sequence per pass.
    pub fn render(&self, mut engine: NameEngine) -> Result<IrSignal, Error> {
        self.prepare_engine(&mut engine)?;

        Ok(IrSignal {
            carrier: self.general_spec.carrier,
            duty_cycle: self.general_spec.duty_cycle,
            intro: self.render_pass(Pass::Intro, &engine)?,
            repeat: self.render_pass(Pass::Repeat, &engine)?,
            ending: self.render_pass(Pass::Ending, &engine)?,
        })
    }

    /// Render a single pass.
    pub fn render_pass(&self, pass: Pass, engine: &NameEngine) -> Result<Vec<u32>, Error> {
        let mut data = RenderData::new(&self.general_spec, engine.clone(), pass);

        data.push_extent_marker();
        data.render_item(&self.stream, None, Pass::Intro as usize)?;
        data.pop_extent_marker();

        Ok(data.raw)
    }

    /// Check supplied parameters against the parameter specs, fill in
    /// defaults and install the definitions.
    pub(crate) fn prepare_engine(&self, engine: &mut NameEngine) -> Result<(), Error> {
        for parameter in &self.parameters {
            let value = if let Ok(value) = engine.get(&parameter.name) {
                value
            } else if let Some(default) = &parameter.default {
                let value = default.eval(engine)?;

                engine.define(&parameter.name, value)?;

                value
            } else {
                return Err(Error::NameUnassigned(parameter.name.clone()));
            };

            if value < parameter.min || value > parameter.max {
                return Err(Error::Semantic(format!(
                    "{value} is outside the range {}..{} for parameter {}",
                    parameter.min, parameter.max, parameter.name
                )));
            }
        }

        // if parameters are declared, only declared names may be supplied
        if !self.parameters.is_empty() {
            for (name, _) in engine.values() {
                if !self.parameters.iter().any(|parameter| parameter.name == name) {
                    return Err(Error::InvalidName(name.to_owned()));
                }
            }
        }

        for definition in &self.definitions {
            if let Expression::Assignment(name, expr) = definition.as_ref() {
                engine.define_expression(name, expr.clone())?;
            }
        }

        Ok(())
    }
}

/// Decide whether a stream separates the passes: it is where the intro ends
/// and the repeating part lives. A stream whose first item is a variation is
/// implicitly pass separating.
pub(crate) fn separates_passes(stream: &Stream) -> bool {
    matches!(
        stream.repeat,
        Some(RepeatMarker::Any) | Some(RepeatMarker::OneOrMore) | Some(RepeatMarker::CountOrMore(_))
    ) || has_variation(stream)
}

pub(crate) fn has_variation(stream: &Stream) -> bool {
    matches!(
        stream.stream.first().map(Rc::as_ref),
        Some(Expression::Variation(_))
    )
}

/// Iterations of the pass separating stream which belong to `pass`.
pub(crate) fn pass_iterations(stream: &Stream, pass: Pass) -> i64 {
    let minimum = stream.repeat.as_ref().map_or(0, RepeatMarker::minimum);

    match pass {
        Pass::Intro if has_variation(stream) => std::cmp::max(1, minimum),
        Pass::Intro => minimum,
        Pass::Repeat => 1,
        Pass::Ending if variant_count(stream) == 3 => 1,
        Pass::Ending => 0,
    }
}

fn variant_count(stream: &Stream) -> usize {
    if let Some(Expression::Variation(variants)) = stream.stream.first().map(Rc::as_ref) {
        variants.len()
    } else {
        0
    }
}

/// One bit spec scope; bit fields accumulate bits here until a duration or
/// the end of the stream flushes them through the bit spec.
struct BitSpecScope<'b> {
    bit_spec: &'b [Rc<Expression>],
    bitstream: BitVec<usize, LocalBits>,
}

/// Mutable state while rendering one pass.
pub(crate) struct RenderData<'a, 'b> {
    general_spec: &'a GeneralSpec,
    /// Output. Even entries are flash, odd are gap
    raw: Vec<u32>,
    /// Microseconds rendered so far, including a leading gap
    total: i64,
    extent_marker: Vec<i64>,
    scopes: Vec<BitSpecScope<'b>>,
    engine: NameEngine,
    /// The pass being rendered
    pass: Pass,
    /// Where the traversal currently is
    state: Pass,
}

impl<'a, 'b> RenderData<'a, 'b> {
    fn new(general_spec: &'a GeneralSpec, engine: NameEngine, pass: Pass) -> Self {
        RenderData {
            general_spec,
            raw: Vec::new(),
            total: 0,
            extent_marker: Vec::new(),
            scopes: Vec::new(),
            engine,
            pass,
            state: Pass::Intro,
        }
    }

    /// Extents pad from the start of the current stream iteration
    fn push_extent_marker(&mut self) {
        self.extent_marker.push(self.total);
    }

    fn pop_extent_marker(&mut self) {
        self.extent_marker.pop();
    }

    fn add_flash(&mut self, length: i64) -> Result<(), Error> {
        if length <= 0 {
            warn!("length should be non-zero");
            return Ok(());
        }

        self.total = self
            .total
            .checked_add(length)
            .ok_or_else(|| Error::Semantic("length overflow".into()))?;

        if (self.raw.len() % 2) == 1 {
            let last = self.raw.last_mut().unwrap();

            *last = last
                .checked_add(length as u32)
                .ok_or_else(|| Error::Semantic("length overflow".into()))?;
        } else {
            self.raw.push(length as u32);
        }

        Ok(())
    }

    fn add_gap(&mut self, length: i64) -> Result<(), Error> {
        if length <= 0 {
            warn!("length should be non-zero");
            return Ok(());
        }

        // leading gaps still count towards the total
        self.total = self
            .total
            .checked_add(length)
            .ok_or_else(|| Error::Semantic("length overflow".into()))?;

        let len = self.raw.len();

        if len == 0 {
            // ignore leading gaps
        } else if (len % 2) == 0 {
            let last = self.raw.last_mut().unwrap();

            *last = last
                .checked_add(length as u32)
                .ok_or_else(|| Error::Semantic("length overflow".into()))?;
        } else {
            self.raw.push(length as u32);
        }

        Ok(())
    }

    fn add_extent(&mut self, extent: i64) -> Result<(), Error> {
        let elapsed = self.total - *self.extent_marker.last().unwrap();
        let padding = extent - elapsed;

        if padding < 0 {
            return Err(Error::Semantic(format!(
                "extent of {extent}us shorter than the {elapsed}us already rendered"
            )));
        }

        if padding > 0 {
            self.add_gap(padding)?;
        }

        Ok(())
    }

    fn add_bits(&mut self, bits: i64, length: i64, level: Option<usize>) -> Result<(), Error> {
        match level {
            Some(level) => {
                let mut bv = BitVec::<usize, LocalBits>::from_element(bits as usize);

                bv.truncate(length as usize);

                bv.reverse();

                let scope = &mut self.scopes[level];

                if self.general_spec.lsb {
                    bv.append(&mut scope.bitstream);
                    scope.bitstream = bv;
                } else {
                    scope.bitstream.append(&mut bv);
                }

                Ok(())
            }
            None => Err(Error::Semantic("bits not permitted here".into())),
        }
    }

    /// Convert the bits accumulated in a scope to physical output through its
    /// bit spec, recursing into lower scopes.
    fn flush_level(&mut self, level: Option<usize>, variant: usize) -> Result<(), Error> {
        let Some(level) = level else {
            return Ok(());
        };

        let lower_level = level.checked_sub(1);

        if !self.scopes[level].bitstream.is_empty() {
            let mut bits = BitVec::new();

            std::mem::swap(&mut bits, &mut self.scopes[level].bitstream);

            let bit_spec: &'b [Rc<Expression>] = self.scopes[level].bit_spec;
            let max_bit = bit_spec.len();

            let bits_step = match max_bit {
                1..=2 => 1,
                3..=4 => 2,
                5..=8 => 3,
                9..=16 => 4,
                _ => unreachable!(),
            };

            if bits.len() % bits_step != 0 {
                return Err(Error::Semantic(format!(
                    "{} bits accumulated, not a multiple of the bit spec chunk size {bits_step}",
                    bits.len()
                )));
            }

            if !self.general_spec.lsb {
                for bit in bits.chunks(bits_step) {
                    let bit = bit_to_usize(bit);

                    if bit >= max_bit {
                        return Err(Error::Semantic(format!(
                            "cannot encode {bit} with current bit spec"
                        )));
                    }

                    self.render_item(&bit_spec[bit], lower_level, variant)?;
                }
            } else {
                for bit in bits.chunks(bits_step).rev() {
                    let bit = bit_to_usize(bit);

                    if bit >= max_bit {
                        return Err(Error::Semantic(format!(
                            "cannot encode {bit} with current bit spec"
                        )));
                    }

                    self.render_item(&bit_spec[bit], lower_level, variant)?;
                }
            }
        }

        self.flush_level(lower_level, variant)?;

        Ok(())
    }

    fn render_stream(
        &mut self,
        items: &'b [Rc<Expression>],
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
                        self.render_stream(list, level, variant)?;
                    }
                    // an empty variant cancels the whole iteration
                    _ => break,
                }

                continue;
            }

            // everything but a stream item is skipped outside the pass being
            // rendered; streams are walked to find the pass separator
            if !matches!(expr.as_ref(), Expression::Stream(_)) && self.state != self.pass {
                continue;
            }

            self.render_item(expr, level, variant)?;
        }

        Ok(())
    }

    fn render_item(
        &mut self,
        expr: &'b Rc<Expression>,
        level: Option<usize>,
        variant: usize,
    ) -> Result<(), Error> {
        let gs = self.general_spec;

        match expr.as_ref() {
            Expression::FlashConstant(v, unit) => {
                self.flush_level(level, variant)?;
                let length = unit.eval_float(*v, gs)?;
                self.add_flash(length)?;
            }
            Expression::FlashIdentifier(id, unit) => {
                self.flush_level(level, variant)?;
                let length = unit.eval(self.engine.get(id)?, gs)?;
                self.add_flash(length)?;
            }
            Expression::GapConstant(v, unit) => {
                self.flush_level(level, variant)?;
                let length = unit.eval_float(*v, gs)?;
                self.add_gap(length)?;
            }
            Expression::GapIdentifier(id, unit) => {
                self.flush_level(level, variant)?;
                let length = unit.eval(self.engine.get(id)?, gs)?;
                self.add_gap(length)?;
            }
            Expression::ExtentConstant(v, unit) => {
                self.flush_level(level, variant)?;
                let extent = unit.eval_float(*v, gs)?;
                self.add_extent(extent)?;
            }
            Expression::ExtentIdentifier(id, unit) => {
                self.flush_level(level, variant)?;
                let extent = unit.eval(self.engine.get(id)?, gs)?;
                self.add_extent(extent)?;
            }
            Expression::Assignment(id, expr) => {
                self.flush_level(level, variant)?;

                let value = expr.eval(&self.engine)?;

                self.engine.assign(id, value)?;
            }
            Expression::Stream(stream) => {
                self.render_nested_stream(stream, level, variant)?;
            }
            Expression::BitField { .. } => {
                let (bits, length) = expr.bitfield(&self.engine)?;

                self.add_bits(bits, length, level)?;
            }
            Expression::InfiniteBitField { .. } => {
                return Err(Error::Semantic(
                    "infinite bit field cannot be rendered".into(),
                ));
            }
            Expression::List(list) => {
                self.render_stream(list, level, variant)?;
            }
            _ => {
                return Err(Error::Semantic(format!(
                    "expression {expr} not expected in stream"
                )));
            }
        }

        Ok(())
    }

    fn render_nested_stream(
        &mut self,
        stream: &'b Stream,
        level: Option<usize>,
        variant: usize,
    ) -> Result<(), Error> {
        let level = if !stream.bit_spec.is_empty() {
            self.scopes.push(BitSpecScope {
                bit_spec: &stream.bit_spec,
                bitstream: BitVec::new(),
            });

            Some(level.map_or(0, |level| level + 1))
        } else {
            level
        };

        if separates_passes(stream) {
            // the stream where intro ends and the repeat lives; items after
            // it belong to the ending pass
            let iterations = pass_iterations(stream, self.pass);
            let variant = self.pass as usize;

            for _ in 0..iterations {
                self.push_extent_marker();
                self.render_stream(&stream.stream, level, variant)?;
                self.pop_extent_marker();
            }

            self.state = Pass::Ending;
        } else {
            let count = match &stream.repeat {
                None => 1,
                Some(RepeatMarker::Count(count)) => *count,
                // pass separating markers handled above
                Some(_) => unreachable!(),
            };

            if self.state == self.pass {
                for _ in 0..count {
                    self.push_extent_marker();
                    self.render_stream(&stream.stream, level, variant)?;
                    self.pop_extent_marker();
                }
            } else if stream
                .stream
                .iter()
                .any(|e| matches!(e.as_ref(), Expression::Stream(_)))
            {
                // walk through to find the pass separating stream
                self.push_extent_marker();
                self.render_stream(&stream.stream, level, variant)?;
                self.pop_extent_marker();
            }
        }

        self.flush_level(level, variant)?;

        if !stream.bit_spec.is_empty() {
            self.scopes.pop();
        }

        Ok(())
    }
}

// see https://github.com/bitvecto-rs/bitvec/issues/119
fn bit_to_usize(bit: &BitSlice) -> usize {
    let mut v = 0;

    for i in 0..bit.len() {
        if bit[i] {
            v |= 1 << (bit.len() - 1 - i);
        }
    }

    v
}
