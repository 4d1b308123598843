// Pipeline conformance tests for spicyc.
//
// Each test drives the full library pipeline (parse → fixed-point
// resolution → validation → transform → codegen) over inline sources and
// checks the observable contract: emitted C++, grammar finalization, or
// the diagnostic that stops the pipeline.

use std::path::PathBuf;

use spicyc::pipeline::{Driver, DriverOptions, Stage};

fn driver() -> Driver {
    Driver::new(DriverOptions::default())
}

fn compile_ok(source: &str, file: &str) -> Driver {
    let mut d = driver();
    assert!(d.load_string(source, &PathBuf::from(file)), "load failed");
    if let Err(e) = d.compile() {
        panic!(
            "pipeline stopped at {:?}:\n{}",
            e.failing_stage,
            d.diagnostics
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        );
    }
    d
}

fn compile_err(source: &str, file: &str) -> (Driver, Stage) {
    let mut d = driver();
    assert!(d.load_string(source, &PathBuf::from(file)), "load failed");
    let err = d.compile().expect_err("expected pipeline failure");
    let stage = err.failing_stage;
    (d, stage)
}

// ── Positive cases ───────────────────────────────────────────────────────

#[test]
fn http_like_unit_compiles_to_cpp() {
    let d = compile_ok(
        r#"
        module HTTP;

        public type Request = unit {
            method: /[A-Z]+/;
            : b" ";
            uri: bytes &size=16;
            : b" ";
            version: uint8;
        };
        "#,
        "http.spicy",
    );
    let cpp = &d.cpp_sources()[0].1;
    assert!(cpp.contains("struct Request {"));
    assert!(cpp.contains("Request parse_Request(hilti::rt::stream::View& data)"));
    assert!(cpp.contains("match_token"));
    assert!(cpp.contains("register_parser(\"HTTP::Request\""));

    let g = d.ctx.grammars.get("HTTP::Request").unwrap();
    assert!(g.is_finalized());
}

#[test]
fn nested_units_compile_and_chain_parsers() {
    let d = compile_ok(
        r#"
        module TLV;

        type Header = unit {
            tag: uint8;
            len: uint16;
        };

        public type Record = unit {
            hdr: Header;
            body: bytes &size=4;
        };
        "#,
        "tlv.spicy",
    );
    let cpp = &d.cpp_sources()[0].1;
    assert!(cpp.contains("__unit.hdr = parse_Header(data);"));
}

#[test]
fn hooks_and_dollar_dollar_compile() {
    let d = compile_ok(
        r#"
        module P;

        type Msg = unit {
            n: uint8;
            items: uint8[] &count=self.n;
            on n { print $$; }
            on items foreach { print $$; }
            on %done { print self; }
        };
        "#,
        "p.spicy",
    );
    let cpp = &d.cpp_sources()[0].1;
    assert!(cpp.contains("on_Msg_n_value"));
    assert!(cpp.contains("on_Msg_items_foreach"));
    assert!(cpp.contains("on_Msg_done"));
}

#[test]
fn hilti_module_with_functions_compiles() {
    let d = compile_ok(
        r#"
        module Math {
            const BASE = 100;
            global total: uint64 = 0;
            public function add(a: uint64, b: uint64) : uint64 {
                local sum: uint64 = a + b;
                return sum + BASE;
            }
        }
        "#,
        "math.hlt",
    );
    let cpp = &d.cpp_sources()[0].1;
    assert!(cpp.contains("add(const hilti::rt::integer::safe<std::uint64_t>& a"));
    assert!(cpp.contains("return (sum + 100U);"));
    assert!(cpp.contains("check_stack"));
}

#[test]
fn cross_module_import_compiles() {
    let mut d = driver();
    d.load_string(
        r#"
        module Colors;
        public type Color = enum { Red = 1, Green = 2 };
        "#,
        &PathBuf::from("colors.spicy"),
    );
    d.load_string(
        r#"
        module App;
        import Colors;
        const DEFAULT = Colors::Color::Green;
        "#,
        &PathBuf::from("app.spicy"),
    );
    d.compile().unwrap();
    assert!(!d.has_errors());
    // Both modules emit a unit; plus the linker wiring unit.
    assert_eq!(d.cpp_sources().len(), 3);
}

#[test]
fn emitted_cpp_is_deterministic() {
    let source = r#"
        module P;
        type A = unit { x: uint32; };
        type B = unit { y: uint16; z: bytes &size=2; };
    "#;
    let first = compile_ok(source, "p.spicy").cpp_sources();
    let second = compile_ok(source, "p.spicy").cpp_sources();
    assert_eq!(first, second);
}

#[test]
fn linker_unit_aggregates_module_inits() {
    let mut d = driver();
    d.load_string("module A;", &PathBuf::from("a.spicy"));
    d.load_string("module B;", &PathBuf::from("b.spicy"));
    d.compile().unwrap();
    let linker = d.linker_unit.as_ref().unwrap().format();
    let a = linker.find("A_hlto_init();").unwrap();
    let b = linker.find("B_hlto_init();").unwrap();
    assert!(a < b, "init order must follow unit order");
}

// ── Negative cases ───────────────────────────────────────────────────────

#[test]
fn unknown_id_is_reported_with_source_id() {
    let (d, stage) = compile_err(
        r#"
        module M;
        function f() : uint64 { return missing_thing; }
        "#,
        "m.hlt",
    );
    assert_eq!(stage, Stage::ValidatePost);
    assert!(d
        .diagnostics
        .iter()
        .any(|x| x.message.contains("unknown ID 'missing_thing'")));
}

#[test]
fn ll1_ambiguity_names_production_and_symbol() {
    let (d, stage) = compile_err(
        r#"
        module P;
        type Msg = unit {
            switch {
                b"a" -> x: uint8;
                b"a" -> y: uint16;
            };
        };
        "#,
        "p.spicy",
    );
    assert_eq!(stage, Stage::Transform);
    let all = d
        .diagnostics
        .iter()
        .map(|x| x.message.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(all.contains("ambiguous"), "{all}");
    assert!(all.contains("\"a\""), "{all}");
    assert!(all.contains("P::Msg"), "{all}");
}

#[test]
fn dollar_dollar_outside_context_is_rejected() {
    let (d, stage) = compile_err(
        r#"
        module M;
        function f() : uint64 { return $$; }
        "#,
        "m.hlt",
    );
    assert_eq!(stage, Stage::ValidatePost);
    assert!(d.diagnostics.iter().any(|x| x.message.contains("$$")));
}

#[test]
fn attribute_misuse_stops_before_transform() {
    let (d, stage) = compile_err(
        r#"
        module P;
        type Msg = unit {
            n: uint8 &until=($$ == 0);
        };
        "#,
        "p.spicy",
    );
    assert_eq!(stage, Stage::ValidatePre);
    assert!(d
        .diagnostics
        .iter()
        .any(|x| x.message.contains("container")));
}

#[test]
fn type_mismatch_in_operator_is_reported() {
    let (d, stage) = compile_err(
        r#"
        module M;
        function f() : uint64 { return b"abc" + 1; }
        "#,
        "m.hlt",
    );
    assert_eq!(stage, Stage::ValidatePost);
    assert!(d
        .diagnostics
        .iter()
        .any(|x| x.message.contains("no matching operator")));
}

#[test]
fn syntax_error_stops_at_parse() {
    let mut d = driver();
    d.load_string("module ;;;", &PathBuf::from("bad.spicy"));
    let err = d.compile().expect_err("expected failure");
    assert_eq!(err.failing_stage, Stage::Parse);
}

// ── Round-trip law ───────────────────────────────────────────────────────

#[test]
fn printed_hilti_reparses_to_identical_unifications() {
    let source = r#"
        module RT {
            global counter: uint64 = 0;
            type Pair = struct { a: uint32; b: bytes; };
            public function bump(by: uint64) : uint64 {
                counter = counter + by;
                return counter;
            }
        }
    "#;
    let d = compile_ok(source, "rt.hlt");
    let printed = spicyc::printer::print_module(&d.ctx, d.units[0].root);

    let mut d2 = driver();
    assert!(
        d2.load_string(&printed, &PathBuf::from("rt2.hlt")),
        "printed module failed to parse:\n{printed}"
    );
    d2.compile()
        .unwrap_or_else(|e| panic!("reparse pipeline failed at {:?}:\n{printed}", e.failing_stage));

    // Compare the unification of the named struct type in both runs.
    let unif = |d: &Driver| -> Vec<String> {
        let mut v: Vec<String> = d
            .ctx
            .live_nodes()
            .into_iter()
            .filter_map(|n| d.ctx.unification(n).map(str::to_string))
            .filter(|u| u.contains("struct("))
            .collect();
        v.sort();
        v.dedup();
        v
    };
    assert_eq!(unif(&d), unif(&d2));
}
