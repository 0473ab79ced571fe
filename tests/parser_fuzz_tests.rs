//! Property-based fuzzing of the front end
//!
//! The scanner, parser and checker must reject arbitrary input with an
//! error, never a panic.

use hookscript::compiler::Compiler;
use hookscript::{SExprParser, SExprScanner};
use proptest::prelude::*;

/// Random printable ASCII
fn arbitrary_source_string() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[\x20-\x7E\n]{0,300}").unwrap()
}

/// Token soup that looks like hookscript
fn sexp_like_string() -> impl Strategy<Value = String> {
    prop::collection::vec(sexp_token(), 0..60).prop_map(|tokens| tokens.join(" "))
}

fn sexp_token() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("(".to_string()),
        Just(")".to_string()),
        Just("[".to_string()),
        Just("]".to_string()),
        Just("defprogram".to_string()),
        Just("defmap".to_string()),
        Just("defconfig".to_string()),
        Just("deftype".to_string()),
        Just("defn".to_string()),
        Just("let".to_string()),
        Just("when".to_string()),
        Just("return".to_string()),
        Just(":kind".to_string()),
        Just(":attach".to_string()),
        Just(":type".to_string()),
        Just("xdp".to_string()),
        Just("tc".to_string()),
        Just("hash".to_string()),
        Just("u32".to_string()),
        Just("XDP_PASS".to_string()),
        Just("\"eth0\"".to_string()),
        Just("+".to_string()),
        Just(">".to_string()),
        (-1000i64..1000i64).prop_map(|n| n.to_string()),
        "[a-z_]{1,8}".prop_map(|s| s),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn scanner_never_panics(source in arbitrary_source_string()) {
        let _ = SExprScanner::new(&source).scan_tokens();
    }

    #[test]
    fn parser_never_panics(source in sexp_like_string()) {
        if let Ok(tokens) = SExprScanner::new(&source).scan_tokens() {
            let _ = SExprParser::new(tokens).parse();
        }
    }

    #[test]
    fn pipeline_errors_carry_a_phase(source in sexp_like_string()) {
        if let Err(err) = Compiler::default().run(&source) {
            prop_assert!(err.phase().is_some());
        }
    }
}
