// Incremental-equivalence tests for the runtime.
//
// The central property: for any input and any decomposition into chunks, a
// parser fed chunk by chunk (yielding on short input) produces the same
// result as a parser fed everything at once. Exercised over a hand-written
// stand-in for generated parse code, the incremental token matcher, and
// the fiber primitives it all rests on.

use proptest::prelude::*;

use spicy_rt::error::Error;
use spicy_rt::parser::ResumableParser;
use spicy_rt::regexp::RegExp;
use spicy_rt::stream::View;
use spicy_rt::unpack::{unpack_uint, ByteOrder};

// ── A representative generated parser ────────────────────────────────────
//
// Wire format: u8 tag, u16 big-endian length, `length` payload bytes,
// repeated until a zero tag.

#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    tag: u8,
    payload: Vec<u8>,
}

fn parse_records(view: View) -> Result<Vec<Record>, Error> {
    let mut records = Vec::new();
    let mut view = view;
    loop {
        let head = view.extract(1)?;
        view = view.advance(1);
        if head[0] == 0 {
            return Ok(records);
        }
        let len_bytes = view.extract(2)?;
        let (len, _) = unpack_uint(&len_bytes, 2, ByteOrder::Big)?;
        view = view.advance(2);
        let payload = view.extract(len)?;
        view = view.advance(len);
        records.push(Record {
            tag: head[0],
            payload,
        });
    }
}

fn encode(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for r in records {
        out.push(r.tag);
        out.extend_from_slice(&(r.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&r.payload);
    }
    out.push(0);
    out
}

fn run_chunked(input: &[u8], chunk_sizes: &[usize]) -> Vec<Record> {
    let mut p = ResumableParser::new(parse_records);
    let mut rest = input;
    for &size in chunk_sizes {
        if rest.is_empty() {
            break;
        }
        let take = size.clamp(1, rest.len());
        let (chunk, tail) = rest.split_at(take);
        p.feed(chunk).unwrap();
        rest = tail;
    }
    if !rest.is_empty() {
        p.feed(rest).unwrap();
    }
    p.finish().unwrap();
    p.get::<Vec<Record>>().expect("completed parse")
}

fn arb_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(
        (1u8..=255, prop::collection::vec(any::<u8>(), 0..24))
            .prop_map(|(tag, payload)| Record { tag, payload }),
        0..6,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    // B fed as B1 ++ B2 ++ ... parses identically to B fed at once.
    #[test]
    fn chunked_equals_whole(
        records in arb_records(),
        chunk_sizes in prop::collection::vec(1usize..7, 1..32),
    ) {
        let input = encode(&records);

        let whole = run_chunked(&input, &[input.len().max(1)]);
        let chunked = run_chunked(&input, &chunk_sizes);

        prop_assert_eq!(&whole, &records);
        prop_assert_eq!(chunked, whole);
    }

    // The token matcher decides identically regardless of chunking.
    #[test]
    fn matcher_chunking_is_transparent(
        input in prop::collection::vec(any::<u8>(), 0..40),
        cut in 0usize..40,
    ) {
        let re = RegExp::new_set(&[("GET", 1), ("PUT", 2), ("P[A-Z]+T", 3)]).unwrap();

        let mut whole = re.state().unwrap();
        let w = whole.advance(&input, true).unwrap();

        let cut = cut.min(input.len());
        let mut chunked = re.state().unwrap();
        let first = chunked.advance(&input[..cut], false).unwrap();
        let c = if first.rc < 0 {
            chunked.advance(&input[cut..], true).unwrap()
        } else {
            first
        };

        prop_assert_eq!(w.rc, c.rc);
    }
}

// ── Concrete end-to-end scenarios ────────────────────────────────────────

#[test]
fn single_byte_feeding() {
    let records = vec![
        Record {
            tag: 7,
            payload: b"hello".to_vec(),
        },
        Record {
            tag: 9,
            payload: vec![],
        },
    ];
    let input = encode(&records);
    let parsed = run_chunked(&input, &vec![1; input.len()]);
    assert_eq!(parsed, records);
}

#[test]
fn truncated_stream_reports_parse_error() {
    let mut p = ResumableParser::new(parse_records);
    // Tag + length announce 5 payload bytes; only 2 arrive.
    p.feed(&[1, 0, 5, b'a', b'b']).unwrap();
    assert!(!p.completed());
    let err = p.finish().unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "{err:?}");
}

#[test]
fn incremental_regex_scenario() {
    // Anchored `HELLO`, fed as "HEL" then "LO-".
    let re = RegExp::new("HELLO").unwrap();
    let mut ms = re.state().unwrap();

    let a = ms.advance(b"HEL", false).unwrap();
    assert_eq!((a.rc, a.consumed), (-1, 3));

    let b = ms.advance(b"LO-", false).unwrap();
    assert_eq!((b.rc, b.consumed), (1, 2));
}

#[test]
fn abort_midway_releases_cleanly() {
    let mut p = ResumableParser::new(parse_records);
    p.feed(&[1, 0, 9]).unwrap();
    assert!(!p.completed());
    p.abort();
    assert!(p.completed());
    assert_eq!(p.get::<Vec<Record>>(), None);
}
