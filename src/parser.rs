//! Parsing of IRP notation into the [`ast`](crate::ast) structures.

use crate::{
    ast::{Expression, GeneralSpec, Irp, ParameterSpec, RepeatMarker, Stream, Unit},
    duration::check_alternation,
    nameengine::valid_name,
    Error, NameEngine,
};
use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
    str::FromStr,
};

#[derive(PartialEq)]
enum GeneralItem<'a> {
    Msb,
    Lsb,
    Value(f64, Option<&'a str>),
}

peg::parser! {
    grammar irp_notation() for str {
        pub(super) rule protocol() -> (Vec<GeneralItem<'input>>, Expression, Vec<Expression>, Vec<ParameterSpec>)
         = gs:general_spec() stream:bitspec_irstream() def:definitions()* specs:parameter_specs()?
        {
            (gs, stream, def.into_iter().flatten().collect(), specs.unwrap_or_default())
        }

        pub(super) rule bare_expression() -> Expression
         = _ e:expression() { e }

        rule general_spec() -> Vec<GeneralItem<'input>>
         = _ "{" _ items:(general_item() ** ",") "}" _ { items }

        rule general_item() -> GeneralItem<'input>
         = _ "msb" _ { GeneralItem::Msb }
         / _ "lsb" _ { GeneralItem::Lsb }
         / _ v:number_decimals() _ u:$("u" / "p" / "k" / "%")? _ { GeneralItem::Value(v, u) }

        rule number_decimals() -> f64
         = n:$(['0'..='9']* "." ['0'..='9']+)
         {? f64::from_str(n).map_err(|_| "f64") }
         / n:$(['0'..='9']+)
         {? f64::from_str(n).map_err(|_| "f64") }

        rule definitions() -> Vec<Expression>
         = "{" _ def:(definition() ** ("," _)) "}" _ { def }

        rule definition() -> Expression
         = i:identifier() _ "=" _ e:expression() _ { Expression::Assignment(i.to_owned(), Rc::new(e)) }

        // ternary, right associative, lowest precedence
        #[cache_left_rec]
        rule expression() -> Expression
         = cond:expression() "?" _ left:logical_or() ":" _ right:logical_or()
           { Expression::Conditional(Rc::new(cond), Rc::new(left), Rc::new(right)) }
         / logical_or()

        #[cache_left_rec]
        rule logical_or() -> Expression
         = left:logical_or() "||" _ right:logical_and()
           { Expression::Or(Rc::new(left), Rc::new(right)) }
         / logical_and()

        #[cache_left_rec]
        rule logical_and() -> Expression
         = left:logical_and() "&&" _ right:bitwise_or()
           { Expression::And(Rc::new(left), Rc::new(right)) }
         / bitwise_or()

        #[cache_left_rec]
        rule bitwise_or() -> Expression
         = left:bitwise_or() !"||" "|" _ right:bitwise_and()
           { Expression::BitwiseOr(Rc::new(left), Rc::new(right)) }
         / bitwise_and()

        #[cache_left_rec]
        rule bitwise_and() -> Expression
         = left:bitwise_and() !"&&" "&" _ right:bitwise_xor()
           { Expression::BitwiseAnd(Rc::new(left), Rc::new(right)) }
         / bitwise_xor()

        #[cache_left_rec]
        rule bitwise_xor() -> Expression
         = left:bitwise_xor() "^" _ right:equality()
           { Expression::BitwiseXor(Rc::new(left), Rc::new(right)) }
         / equality()

        #[cache_left_rec]
        rule equality() -> Expression
         = left:equality() "!=" _ right:relational()
           { Expression::NotEqual(Rc::new(left), Rc::new(right)) }
         / left:equality() "==" _ right:relational()
           { Expression::Equal(Rc::new(left), Rc::new(right)) }
         / relational()

        #[cache_left_rec]
        rule relational() -> Expression
         = left:relational() "<=" _ right:shift()
           { Expression::LessEqual(Rc::new(left), Rc::new(right)) }
         / left:relational() ">=" _ right:shift()
           { Expression::GreaterEqual(Rc::new(left), Rc::new(right)) }
         / left:relational() !"<<" "<" _ right:shift()
           { Expression::Less(Rc::new(left), Rc::new(right)) }
         / left:relational() !">>" ">" _ right:shift()
           { Expression::Greater(Rc::new(left), Rc::new(right)) }
         / shift()

        #[cache_left_rec]
        rule shift() -> Expression
         = left:shift() "<<" _ right:additive()
           { Expression::ShiftLeft(Rc::new(left), Rc::new(right)) }
         / left:shift() ">>" _ right:additive()
           { Expression::ShiftRight(Rc::new(left), Rc::new(right)) }
         / additive()

        #[cache_left_rec]
        rule additive() -> Expression
         = left:additive() "+" _ right:multiplicative()
           { Expression::Add(Rc::new(left), Rc::new(right)) }
         / left:additive() "-" _ right:multiplicative()
           { Expression::Subtract(Rc::new(left), Rc::new(right)) }
         / multiplicative()

        #[cache_left_rec]
        rule multiplicative() -> Expression
         = left:multiplicative() !"**" "*" _ right:power()
           { Expression::Multiply(Rc::new(left), Rc::new(right)) }
         / left:multiplicative() "/" _ right:power()
           { Expression::Divide(Rc::new(left), Rc::new(right)) }
         / left:multiplicative() "%" _ right:power()
           { Expression::Modulo(Rc::new(left), Rc::new(right)) }
         / power()

        rule power() -> Expression
         = left:unary() "**" _ right:power()
           { Expression::Power(Rc::new(left), Rc::new(right)) }
         / unary()

        rule unary() -> Expression
         = "#" _ expr:unary() { Expression::BitCount(Rc::new(expr)) }
         / "!" _ expr:unary() { Expression::Not(Rc::new(expr)) }
         / "-" _ expr:unary() { Expression::Negative(Rc::new(expr)) }
         / bit_field()
         / "~" _ expr:unary() { Expression::Complement(Rc::new(expr)) }
         / primary()

        // `~D:4` complements the value operand, not the extracted field
        rule bit_field() -> Expression
         = complement:"~"? _ value:primary() ":" _ reverse:"-"? length:primary() offset:offset()?
         {
            let value = if complement.is_some() {
                Rc::new(Expression::Complement(Rc::new(value)))
            } else {
                Rc::new(value)
            };

            Expression::BitField {
                value,
                reverse: reverse.is_some(),
                length: Rc::new(length),
                offset: offset.map(Rc::new),
            }
         }
         / complement:"~"? _ value:primary() "::" _ offset:primary()
         {
            let value = if complement.is_some() {
                Rc::new(Expression::Complement(Rc::new(value)))
            } else {
                Rc::new(value)
            };

            Expression::InfiniteBitField {
                value,
                offset: Rc::new(offset),
            }
         }

        rule offset() -> Expression
         = ":" _ offset:primary() { offset }

        rule primary() -> Expression
         = number()
         / i:identifier() _ { Expression::Identifier(i.to_owned()) }
         / "(" _ e:expression() ")" _ { e }

        rule identifier() -> &'input str
         = quiet!{$(['_' | 'a'..='z' | 'A'..='Z']['_' | 'a'..='z' | 'A'..='Z' | '0'..='9']*)}
         / expected!("identifier")

        rule bare_number() -> i64
         = "0x" n:$(['0'..='9' | 'a'..='f' | 'A'..='F']+) _
         {? i64::from_str_radix(n, 16).map_err(|_| "i64") }
         / "0b" n:$(['0'..='1']+) _
         {? i64::from_str_radix(n, 2).map_err(|_| "i64") }
         / n:$("0" ['0'..='7']*) _
         {? i64::from_str_radix(n, 8).map_err(|_| "i64") }
         / n:$(['1'..='9'] ['0'..='9']*) _
         {? n.parse().map_err(|_| "i64") }
         / "UINT8_MAX" _ { u8::MAX as i64 }
         / "UINT16_MAX" _ { u16::MAX as i64 }
         / "UINT32_MAX" _ { u32::MAX as i64 }
         / "UINT64_MAX" _ { u64::MAX as i64 }

        rule number() -> Expression
         = n:bare_number() !(_ ['u' | 'm' | 'p']) { Expression::Number(n) }

        rule duration() -> Expression
         = id:identifier() _ unit:unit() { Expression::FlashIdentifier(id.to_owned(), unit) }
         / "-" id:identifier() _ unit:unit() { Expression::GapIdentifier(id.to_owned(), unit) }
         / "^" id:identifier() _ unit:unit() { Expression::ExtentIdentifier(id.to_owned(), unit) }
         / number:number_decimals() _ unit:unit() { Expression::FlashConstant(number, unit) }
         / "-" number:number_decimals() _ unit:unit() { Expression::GapConstant(number, unit) }
         / "^" number:number_decimals() _ unit:unit() { Expression::ExtentConstant(number, unit) }

        rule unit() -> Unit
         = "m" _ { Unit::Milliseconds }
         / "u" _ { Unit::Microseconds }
         / "p" _ { Unit::Pulses }
         / _ { Unit::Units }

        rule bare_irstream() -> Vec<Rc<Expression>>
         = items:(irstream_item() ** ("," _)) { items }

        rule irstream() -> Expression
         = "(" _ stream:bare_irstream() ")" _ repeat:repeat_marker()?
         {
            Expression::Stream(Stream {
                bit_spec: Vec::new(),
                stream,
                repeat,
            })
         }

        rule repeat_marker() -> RepeatMarker
         = "*" _ { RepeatMarker::Any }
         / "+" _ { RepeatMarker::OneOrMore }
         / n:$(['0'..='9']+) _ more:"+"? _
         {?
            match n.parse() {
                Ok(n) if more.is_some() => Ok(RepeatMarker::CountOrMore(n)),
                Ok(n) => Ok(RepeatMarker::Count(n)),
                Err(_) => Err("i64")
            }
         }

        rule irstream_item() -> Rc<Expression>
         = item:(variation()
         / bit_field()
         / definition()
         / duration()
         / irstream()
         / bitspec_irstream()) { Rc::new(item) }

        rule bare_bitspec() -> Rc<Expression>
         = bitspec:(irstream_item() ** ("," _))
         { Rc::new(Expression::List(bitspec)) }

        rule bitspec() -> Vec<Rc<Expression>>
         = "<" _ bare:(bare_bitspec() ++ (!"||" "|" _)) ">" _ { bare }

        rule bitspec_irstream() -> Expression
         = bit_spec:bitspec() irstream:irstream() {
            if let Expression::Stream(mut stream) = irstream {
                stream.bit_spec = bit_spec;

                Expression::Stream(stream)
            } else {
                unreachable!()
            }
         }

        rule variation() -> Expression
         = a1:alternative() a2:alternative() a3:alternative()?
         {
            let mut list = vec![a1, a2];

            if let Some(e) = a3 {
                list.push(e);
            }

            Expression::Variation(list)
         }

        rule alternative() -> Vec<Rc<Expression>>
         = "[" _ bare:bare_irstream() "]" _ { bare }

        rule parameter_specs() -> Vec<ParameterSpec>
         = "[" _ specs:(parameter_spec() ** ("," _)) "]" _ { specs }

        rule parameter_spec() -> ParameterSpec
         = id:identifier() _ memory:"@"? _ ":" _ min:bare_number() _ ".." _ max:bare_number() _ default:initializer()?
         {
            ParameterSpec {
                name: id.to_owned(),
                memory: memory.is_some(),
                min,
                max,
                default: default.map(Rc::new),
            }
        }

        rule initializer() -> Expression
         = "=" _ expr:expression() { expr }

        rule _ = quiet!{(comment_line() / comment_block() / [' ' | '\n' | '\r' | '\t'])*}

        rule comment_line() = "//" [^'\n']*
        rule comment_block() = "/*" ([_] !"*/")* [_] "*/"
    }
}

/// Parse a bare expression, e.g. a prefer-over predicate.
pub(crate) fn parse_expression(input: &str) -> Result<Rc<Expression>, Error> {
    match irp_notation::bare_expression(input) {
        Ok(expr) => Ok(Rc::new(expr)),
        Err(pos) => Err(Error::Parse(pos.to_string())),
    }
}

impl Irp {
    /// Parse an IRP protocol and validate it. The result can be shared
    /// between any number of render and recognize sessions.
    pub fn parse(input: &str) -> Result<Irp, Error> {
        match irp_notation::protocol(input) {
            Ok((general, stream, definitions, parameters)) => {
                let general_spec = general_spec(&general)?;

                check_parameters(&parameters)?;

                let definitions: Vec<Rc<Expression>> =
                    definitions.into_iter().map(Rc::new).collect();

                check_definitions(&definitions, &parameters)?;

                let stream = Rc::new(stream);

                let mut repeat_segments = 0;
                check_stream(&stream, false, &mut repeat_segments)?;

                Ok(Irp {
                    general_spec,
                    stream,
                    definitions,
                    parameters,
                })
            }
            Err(pos) => Err(Error::Parse(pos.to_string())),
        }
    }
}

fn general_spec(items: &[GeneralItem]) -> Result<GeneralSpec, Error> {
    let mut res = GeneralSpec::default();

    let mut unit = None;
    let mut lsb = None;
    let mut carrier = None;

    for item in items {
        match item {
            GeneralItem::Lsb | GeneralItem::Msb => {
                if lsb.is_some() {
                    return Err(Error::Parse("bit order (lsb,msb) specified twice".into()));
                }

                lsb = Some(*item == GeneralItem::Lsb);
            }
            GeneralItem::Value(v, u) => {
                let v = *v;

                let u = match u {
                    Some("%") => {
                        if !(1.0..=99.0).contains(&v) {
                            return Err(Error::Parse(format!("duty cycle {v}% not valid")));
                        }
                        if res.duty_cycle.is_some() {
                            return Err(Error::Parse("duty cycle specified twice".into()));
                        }

                        res.duty_cycle = Some(v as u8);

                        continue;
                    }
                    Some("k") => {
                        if carrier.is_some() {
                            return Err(Error::Parse("carrier frequency specified twice".into()));
                        }

                        carrier = Some((v * 1000.0) as i64);

                        continue;
                    }
                    Some("p") => Unit::Pulses,
                    Some("u") | None => Unit::Units,
                    _ => unreachable!(),
                };

                unit = Some((v, u));
            }
        }
    }

    if let Some(carrier) = carrier {
        res.carrier = carrier;
    }

    if let Some((v, u)) = unit {
        res.unit = match u {
            Unit::Pulses => v * 1_000_000.0 / res.carrier as f64,
            _ => v,
        };
    }

    if lsb == Some(false) {
        res.lsb = false;
    }

    Ok(res)
}

fn check_parameters(parameters: &[ParameterSpec]) -> Result<(), Error> {
    let mut seen: Vec<&str> = Vec::new();
    let mut engine = NameEngine::new();

    for parameter in parameters {
        if !valid_name(&parameter.name) {
            return Err(Error::InvalidName(parameter.name.clone()));
        }

        if seen.contains(&parameter.name.as_str()) {
            return Err(Error::Parse(format!(
                "duplicate parameter called {}",
                parameter.name
            )));
        }
        seen.push(&parameter.name);

        if parameter.min < 0 || parameter.max < 0 || parameter.min > parameter.max {
            return Err(Error::Parse(format!(
                "invalid minimum {} and maximum {} for parameter {}",
                parameter.min, parameter.max, parameter.name
            )));
        }

        if parameter.memory && parameter.default.is_none() {
            return Err(Error::Parse(format!(
                "memory parameter {} requires default value",
                parameter.name
            )));
        }

        engine.define(&parameter.name, parameter.min)?;
    }

    for parameter in parameters {
        if let Some(default) = &parameter.default {
            default.eval(&engine)?;
        }
    }

    Ok(())
}

fn check_definitions(
    definitions: &[Rc<Expression>],
    parameters: &[ParameterSpec],
) -> Result<(), Error> {
    let mut deps: HashMap<&str, HashSet<String>> = HashMap::new();

    for definition in definitions {
        if let Expression::Assignment(name, expr) = definition.as_ref() {
            if deps.contains_key(name.as_str()) {
                return Err(Error::Parse(format!("duplicate definition called {name}")));
            }

            if parameters.iter().any(|parameter| &parameter.name == name) {
                return Err(Error::Parse(format!(
                    "definition {name} overrides parameter with same name"
                )));
            }

            let mut dependents = HashSet::new();
            expr.visit(&mut dependents, &|expr, dependents| {
                if let Expression::Identifier(var) = expr {
                    dependents.insert(var.to_owned());
                }
            });

            deps.insert(name.as_str(), dependents);
        } else {
            return Err(Error::Parse(format!("invalid definition {definition}")));
        }
    }

    // no definition may reach itself through other definitions
    for start in deps.keys() {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = deps[start].iter().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            if name == *start {
                return Err(Error::Parse(format!("definition for {start} is circular")));
            }

            if visited.insert(name) {
                if let Some(dependents) = deps.get(name) {
                    stack.extend(dependents.iter().map(String::as_str));
                }
            }
        }
    }

    Ok(())
}

fn check_stream(expr: &Expression, in_repeat: bool, repeat_segments: &mut u32) -> Result<(), Error> {
    match expr {
        Expression::Stream(stream) => {
            let mut inner_repeat = in_repeat;

            match &stream.repeat {
                Some(RepeatMarker::Count(count)) | Some(RepeatMarker::CountOrMore(count))
                    if *count > 64 =>
                {
                    return Err(Error::Parse(format!("repeat count of {count} too large")));
                }
                Some(RepeatMarker::Any)
                | Some(RepeatMarker::OneOrMore)
                | Some(RepeatMarker::CountOrMore(_)) => {
                    if in_repeat {
                        return Err(Error::Parse(
                            "repeat marker inside repeating stream".into(),
                        ));
                    }

                    *repeat_segments += 1;

                    if *repeat_segments > 1 {
                        return Err(Error::Parse("multiple repeating streams".into()));
                    }

                    inner_repeat = true;
                }
                _ => (),
            }

            check_alternation(&stream.stream)?;

            for expr in &stream.stream {
                match expr.as_ref() {
                    Expression::FlashConstant(..)
                    | Expression::FlashIdentifier(..)
                    | Expression::GapConstant(..)
                    | Expression::GapIdentifier(..)
                    | Expression::ExtentConstant(..)
                    | Expression::ExtentIdentifier(..)
                    | Expression::Assignment(..)
                    | Expression::BitField { .. }
                    | Expression::InfiniteBitField { .. }
                    | Expression::Stream(..)
                    | Expression::Variation(..) => {
                        check_stream(expr, inner_repeat, repeat_segments)?
                    }
                    _ => {
                        return Err(Error::Parse(format!(
                            "expression {expr} not expected in stream"
                        )));
                    }
                }
            }

            if stream.bit_spec.len() > 16 {
                return Err(Error::Parse(format!(
                    "bit spec contains {} alternatives, no more than 16 supported",
                    stream.bit_spec.len()
                )));
            }

            for expr in &stream.bit_spec {
                if let Expression::List(list) = expr.as_ref() {
                    check_alternation(list)?;

                    for expr in list {
                        check_stream(expr, inner_repeat, repeat_segments)?;
                    }
                } else {
                    return Err(Error::Parse("bit should be list of expressions".into()));
                }
            }
        }
        Expression::List(list) => {
            for expr in list {
                check_stream(expr, in_repeat, repeat_segments)?;
            }
        }
        Expression::Variation(variants) => {
            for list in variants {
                check_alternation(list)?;

                for expr in list {
                    check_stream(expr, in_repeat, repeat_segments)?;
                }
            }
        }
        Expression::BitField { length, .. } => {
            if let Ok(length) = length.eval(&NameEngine::new()) {
                if !(0..64).contains(&length) {
                    return Err(Error::Parse(format!(
                        "bit field of length {length} not supported"
                    )));
                }
            }
        }
        _ => (),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn precedence() {
        let irp = Irp::parse("{}<1|-1>(1,-1){A=B<<C+D*E}").unwrap();

        assert_eq!(format!("{}", irp.definitions[0]), "A=(B << (C + (D * E)))");

        let irp = Irp::parse("{}<1|-1>(1,-1){A=F**G**H+128*~T>=8}").unwrap();

        assert_eq!(
            format!("{}", irp.definitions[0]),
            "A=(((F ** (G ** H)) + (128 * ~T)) >= 8)"
        );

        let irp = Irp::parse("{}<1|-1>(1,-1){A=F||G&&H|I&J^K}").unwrap();

        assert_eq!(
            format!("{}", irp.definitions[0]),
            "A=(F || (G && (H | (I & (J ^ K)))))"
        );

        let irp = Irp::parse("{}<1|-1>(1,-1){A=E<<F+G*2}").unwrap();

        assert_eq!(format!("{}", irp.definitions[0]), "A=(E << (F + (G * 2)))");
    }

    #[test]
    fn general_spec_items() {
        let irp = Irp::parse("{38.4k,564}<1,-1|1,-3>(D:8,1,-100)[D:0..255]").unwrap();

        assert_eq!(irp.general_spec.carrier, 38400);
        assert_eq!(irp.general_spec.unit, 564.0);
        assert!(irp.general_spec.lsb);

        let irp = Irp::parse("{36k,msb,889}<1,-1|-1,1>(D:5,1,-100)[D:0..31]").unwrap();

        assert!(!irp.general_spec.lsb);

        assert!(Irp::parse("{msb,lsb}<1|-1>(1,-1)").is_err());
        assert!(Irp::parse("{38k,40k}<1|-1>(1,-1)").is_err());
    }

    #[test]
    fn malformed() {
        // two explicitly adjacent flashes cannot alternate
        assert!(matches!(
            Irp::parse("{564}<1,-1|1,-3>(16,8,D:8,1,-100)[D:0..255]"),
            Err(Error::Semantic(_))
        ));

        // circular definitions
        assert!(Irp::parse("{}<1|-1>(D:8,-100){A=B+1,B=A+1}[D:0..255]").is_err());

        // duplicate parameter
        assert!(Irp::parse("{}<1|-1>(D:8,-100)[D:0..255,D:0..3]").is_err());

        // nested repeat markers
        assert!(Irp::parse("{}<1|-1>((D:8,(1,-1)*,-100)*)[D:0..255]").is_err());
    }

    #[test]
    fn parameter_specs() {
        let irp =
            Irp::parse("{38.4k,564}<1,-1|1,-3>(D:8,S:8,1,^108m)*[D:0..255,S:0..255=255-D]").unwrap();

        assert_eq!(irp.parameters.len(), 2);
        assert_eq!(irp.parameters[0].name, "D");
        assert_eq!(irp.parameters[0].min, 0);
        assert_eq!(irp.parameters[0].max, 255);
        assert!(irp.parameters[1].default.is_some());
    }
}
