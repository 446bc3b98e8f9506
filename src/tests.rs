#![cfg(test)]

use crate::{DecodeOptions, Decoder, Error, Irp, IrSignal, Message, NameEngine, NamedProtocol, PreferOver};
use rand::Rng;

fn params(pairs: &[(&str, i64)]) -> NameEngine {
    let mut engine = NameEngine::new();
    for (name, value) in pairs {
        engine.define(name, *value).unwrap();
    }
    engine
}

const NEC1: &str = "{38.4k,564}<1,-1|1,-3>(16,-8,D:8,S:8,F:8,~F:8,1,^108m)* [D:0..255,S:0..255=255-D,F:0..255]";
const NEC1_REPEATING: &str = "{38.4k,564}<1,-1|1,-3>(16,-8,D:8,S:8,F:8,~F:8,1,^108m,(16,-4,1,^108m)*) [D:0..255,S:0..255=255-D,F:0..255]";
const RC5: &str = "{36k,msb,889}<1,-1|-1,1>((1,~F:1:6,T:1,D:5,F:6,^114m)*,T=1-T)[D:0..31,F:0..127,T@:0..1=0]";
const SONY8: &str = "{40k,600}<1,-1|2,-1>(4,-1,F:8,^45m)[F:0..255]";
const SONY12: &str = "{40k,600}<1,-1|2,-1>(4,-1,F:7,D:5,^45m)*[F:0..127,D:0..31]";

#[test]
fn nec_render() {
    let irp = Irp::parse(NEC1).unwrap();

    let signal = irp
        .render(params(&[("D", 0xe9), ("S", 0xfe), ("F", 1)]))
        .unwrap();

    assert_eq!(signal.carrier, 38400);
    assert!(signal.intro.is_empty());
    assert!(signal.ending.is_empty());
    assert_eq!(
        signal.repeat,
        Message::parse("+9024,-4512,+564,-1692,+564,-564,+564,-564,+564,-1692,+564,-564,+564,-1692,+564,-1692,+564,-1692,+564,-564,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-35244").unwrap().raw
    );

    // S defaults to 255-D
    let signal = irp.render(params(&[("D", 0xe9), ("F", 1)])).unwrap();

    assert_eq!(
        signal.repeat,
        Message::parse("+9024,-4512,+564,-1692,+564,-564,+564,-564,+564,-1692,+564,-564,+564,-1692,+564,-1692,+564,-1692,+564,-564,+564,-1692,+564,-1692,+564,-564,+564,-1692,+564,-564,+564,-564,+564,-564,+564,-1692,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-564,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-1692,+564,-39756").unwrap().raw
    );
}

#[test]
fn nec_repeating_render() {
    let irp = Irp::parse(NEC1_REPEATING).unwrap();

    let signal = irp
        .render(params(&[("D", 64), ("S", 191), ("F", 196)]))
        .unwrap();

    assert_eq!(
        signal.intro,
        Message::parse("+9024 -4512 +564 -564 +564 -564 +564 -564 +564 -564 +564 -564 +564 -564 +564 -1692 +564 -564 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -564 +564 -1692 +564 -564 +564 -564 +564 -1692 +564 -564 +564 -564 +564 -564 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -564 +564 -1692 +564 -1692 +564 -1692 +564 -564 +564 -564 +564 -39756").unwrap().raw
    );
    assert_eq!(
        signal.repeat,
        Message::parse("+9024 -2256 +564 -96156").unwrap().raw
    );
    assert!(signal.ending.is_empty());
}

#[test]
fn rc5_render() {
    let irp = Irp::parse(RC5).unwrap();

    let signal = irp.render(params(&[("F", 1), ("D", 30), ("T", 0)])).unwrap();

    assert!(signal.intro.is_empty());
    assert_eq!(
        signal.repeat,
        Message::parse("+889 -889 +1778 -1778 +889 -889 +889 -889 +889 -889 +1778 -889 +889 -889 +889 -889 +889 -889 +889 -889 +889 -1778 +889 -89997").unwrap().raw
    );
}

#[test]
fn sony8_render() {
    let irp = Irp::parse(SONY8).unwrap();

    let signal = irp.render(params(&[("F", 196)])).unwrap();

    // no repeat marker: everything is intro
    assert_eq!(
        signal.intro,
        Message::parse("+2400 -600 +600 -600 +600 -600 +1200 -600 +600 -600 +600 -600 +600 -600 +1200 -600 +1200 -31200").unwrap().raw
    );
    assert!(signal.repeat.is_empty());
    assert!(signal.ending.is_empty());
}

#[test]
fn nec_recognize() {
    let irp = Irp::parse(NEC1_REPEATING).unwrap();

    let signal = IrSignal {
        intro: Message::parse("+9024 -4512 +564 -564 +564 -564 +564 -564 +564 -564 +564 -564 +564 -564 +564 -1692 +564 -564 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -564 +564 -1692 +564 -564 +564 -564 +564 -1692 +564 -564 +564 -564 +564 -564 +564 -1692 +564 -1692 +564 -1692 +564 -1692 +564 -564 +564 -1692 +564 -1692 +564 -1692 +564 -564 +564 -564 +564 -39756").unwrap().raw,
        repeat: Message::parse("+9024 -2256 +564 -96156").unwrap().raw,
        ending: Vec::new(),
        carrier: 38400,
        duty_cycle: None,
    };

    let decoded = irp.recognize(&signal, DecodeOptions::default()).unwrap();

    assert_eq!(decoded["D"], 64);
    assert_eq!(decoded["S"], 191);
    assert_eq!(decoded["F"], 196);
}

#[test]
fn recognize_rejects_corrupted_check_field() {
    let irp = Irp::parse(NEC1).unwrap();

    let mut signal = irp
        .render(params(&[("D", 0), ("S", 0), ("F", 0)]))
        .unwrap();

    // flip the first bit of ~F:8 from 1 to 0; the check field no longer
    // complements F
    let f_start = 2 + 2 * 24;
    assert_eq!(signal.repeat[f_start + 1], 1692);
    signal.repeat[f_start + 1] = 564;
    // keep the extent at the same total length
    *signal.repeat.last_mut().unwrap() += 1692 - 564;

    assert!(matches!(
        irp.recognize(&signal, DecodeOptions::default()),
        Err(Error::ParameterInconsistency(_))
    ));
}

#[test]
fn recognize_wrong_protocol() {
    let nec = Irp::parse(NEC1).unwrap();
    let sony = Irp::parse(SONY8).unwrap();

    let signal = sony.render(params(&[("F", 196)])).unwrap();

    assert!(matches!(
        nec.recognize(&signal, DecodeOptions::default()),
        Err(Error::NoMatch(_))
    ));
}

#[test]
fn roundtrip_nec() {
    let irp = Irp::parse(NEC1).unwrap();
    let mut rng = rand::thread_rng();

    for _ in 0..50 {
        let d = rng.gen_range(0..=255);
        let s = rng.gen_range(0..=255);
        let f = rng.gen_range(0..=255);

        let signal = irp.render(params(&[("D", d), ("S", s), ("F", f)])).unwrap();

        let decoded = irp.recognize(&signal, DecodeOptions::default()).unwrap();

        assert_eq!(decoded["D"], d);
        assert_eq!(decoded["S"], s);
        assert_eq!(decoded["F"], f);
    }
}

#[test]
fn roundtrip_sony12() {
    let irp = Irp::parse(SONY12).unwrap();
    let mut rng = rand::thread_rng();

    for _ in 0..50 {
        let d = rng.gen_range(0..=31);
        let f = rng.gen_range(0..=127);

        let signal = irp.render(params(&[("D", d), ("F", f)])).unwrap();

        let decoded = irp.recognize(&signal, DecodeOptions::default()).unwrap();

        assert_eq!(decoded["D"], d);
        assert_eq!(decoded["F"], f);
    }
}

#[test]
fn roundtrip_rc5() {
    let irp = Irp::parse(RC5).unwrap();
    let mut rng = rand::thread_rng();

    for _ in 0..50 {
        let d = rng.gen_range(0..=31);
        let f = rng.gen_range(0..=127);
        let t = rng.gen_range(0..=1);

        let signal = irp.render(params(&[("D", d), ("F", f), ("T", t)])).unwrap();

        let decoded = irp.recognize(&signal, DecodeOptions::default()).unwrap();

        assert_eq!(decoded["D"], d);
        assert_eq!(decoded["F"], f);
        assert_eq!(decoded["T"], t);
    }
}

#[test]
fn roundtrip_arithmetic_bitfield() {
    // the field transmits D-1; recognition must run the formula backwards
    let irp = Irp::parse("{500}<1,-1|1,-3>((D-1):3,1,^60m)*[D:1..8]").unwrap();

    for d in 1..=8i64 {
        let signal = irp.render(params(&[("D", d)])).unwrap();

        let decoded = irp.recognize(&signal, DecodeOptions::default()).unwrap();

        assert_eq!(decoded["D"], d);
    }
}

#[test]
fn roundtrip_chunked_bitspec() {
    // two bits per chunk, and A:3 does not align: the last chunk carries one
    // bit of A and the bit of B
    let irp =
        Irp::parse("{500,msb}<1,-1|1,-3|2,-1|2,-3>(A:3,B:1,1,^60m)*[A:0..7,B:0..1]").unwrap();

    for a in 0..8i64 {
        for b in 0..2i64 {
            let signal = irp.render(params(&[("A", a), ("B", b)])).unwrap();

            let decoded = irp.recognize(&signal, DecodeOptions::default()).unwrap();

            assert_eq!(decoded["A"], a, "A for A={a} B={b}");
            assert_eq!(decoded["B"], b, "B for A={a} B={b}");
        }
    }
}

#[test]
fn checksum_definition_verified() {
    // C is defined, not a parameter; its transmitted bits must agree with
    // D^S once both are known
    const IRP: &str = "{500}<1,-2|2,-1>(D:4,S:4,C:4,1,^60m)*{C=D^S}[D:0..15,S:0..15]";

    let irp = Irp::parse(IRP).unwrap();

    let signal = irp.render(params(&[("D", 3), ("S", 5)])).unwrap();

    let decoded = irp.recognize(&signal, DecodeOptions::default()).unwrap();

    assert_eq!(decoded["D"], 3);
    assert_eq!(decoded["S"], 5);
    assert!(!decoded.contains_key("C"));

    // corrupt the last checksum bit; both bit spec alternatives are 1500us
    // long, so the extent still fits and only the consistency check can
    // catch it
    let mut signal = irp.render(params(&[("D", 0), ("S", 0)])).unwrap();

    assert_eq!(&signal.repeat[22..24], [500, 1000]);
    signal.repeat[22] = 1000;
    signal.repeat[23] = 500;

    assert!(matches!(
        irp.recognize(&signal, DecodeOptions::default()),
        Err(Error::ParameterInconsistency(_))
    ));
}

#[test]
fn extent_too_short() {
    // 5ms extent after more than 20ms of frame
    let irp = Irp::parse("{564}<1,-1|1,-3>(16,-8,D:8,1,^5m)*[D:0..255]").unwrap();

    assert!(matches!(
        irp.render(params(&[("D", 0)])),
        Err(Error::Semantic(_))
    ));
}

#[test]
fn undeclared_parameter_rejected() {
    let irp = Irp::parse(NEC1).unwrap();

    assert!(matches!(
        irp.render(params(&[("D", 1), ("S", 2), ("F", 3), ("X", 4)])),
        Err(Error::InvalidName(_))
    ));

    assert!(matches!(
        irp.render(params(&[("D", 1), ("S", 2)])),
        Err(Error::NameUnassigned(_))
    ));

    assert!(matches!(
        irp.render(params(&[("D", 300), ("S", 2), ("F", 3)])),
        Err(Error::Semantic(_))
    ));
}

#[test]
fn rendered_sequences_alternate() {
    let irp = Irp::parse(RC5).unwrap();

    for t in 0..=1i64 {
        let signal = irp.render(params(&[("F", 53), ("D", 17), ("T", t)])).unwrap();

        // folding guarantees strict flash/gap alternation with no zero
        // length entries
        assert!(signal.repeat.iter().all(|&d| d > 0));
    }
}

fn named(name: &str, irp: &str, prefer_over: &[&str]) -> NamedProtocol {
    NamedProtocol {
        name: name.to_owned(),
        irp: Irp::parse(irp).unwrap(),
        prefer_over: prefer_over
            .iter()
            .map(|rule| PreferOver::parse(rule).unwrap())
            .collect(),
        options: DecodeOptions::default(),
    }
}

#[test]
fn prefer_over() {
    const PROTO: &str = "{500}<1,-2|2,-1>(D:4,3,-30m)*[D:0..15]";

    let signal = Irp::parse(PROTO)
        .unwrap()
        .render(params(&[("D", 5)]))
        .unwrap();

    // B prefers over A: only B remains
    let decoder = Decoder::new(vec![named("A", PROTO, &[]), named("B", PROTO, &["A"])]);

    let decodes = decoder.decode(&signal);

    assert_eq!(decodes.len(), 1);
    assert_eq!(decodes[0].name, "B");
    assert_eq!(decodes[0].params["D"], 5);

    // predicate is false: both remain
    let decoder = Decoder::new(vec![
        named("A", PROTO, &[]),
        named("B", PROTO, &["D==9;A"]),
    ]);

    let decodes = decoder.decode(&signal);

    assert_eq!(decodes.len(), 2);

    // mutual removal would empty the result: everything is kept
    let decoder = Decoder::new(vec![
        named("A", PROTO, &["B"]),
        named("B", PROTO, &["A"]),
    ]);

    let decodes = decoder.decode(&signal);

    assert_eq!(decodes.len(), 2);
}

#[test]
fn decoder_ranks_by_weight() {
    const SIMPLE: &str = "{500}<1,-2|2,-1>(D:4,3,-30m)*[D:0..15]";
    // same wire format, one more definition to weigh it down
    const COMPLEX: &str = "{500}<1,-2|2,-1>(D:4,3,-30m)*{X=D+D*3}[D:0..15]";

    let signal = Irp::parse(SIMPLE)
        .unwrap()
        .render(params(&[("D", 7)]))
        .unwrap();

    let decoder = Decoder::new(vec![
        named("heavy", COMPLEX, &[]),
        named("light", SIMPLE, &[]),
    ]);

    let decodes = decoder.decode(&signal);

    assert_eq!(decodes.len(), 2);
    assert_eq!(decodes[0].name, "light");
}
