//! Integration tests for incremental reparsing
//!
//! These tests cover:
//! - Entry invalidation and preservation on edits
//! - Reparse results equal to parsing from scratch
//! - Observable reuse on unedited reparses
//! - Both table implementations

use repeg::prelude::*;

// ============================================================================
// Test Grammar
// ============================================================================

const VALUE: u16 = 1;
const OBJECT: u16 = 2;
const ARRAY: u16 = 3;
const STRING: u16 = 4;
const NUMBER: u16 = 5;

fn json() -> Pattern {
    let ws = || nt("Ws");
    let digits = || range(b'0', b'9').plus();
    GrammarBuilder::new()
        .rule("Doc", seq([ws(), nt("Value"), ws(), any().not()]))
        .rule(
            "Value",
            choice([
                nt("Object"),
                nt("Array"),
                nt("String"),
                nt("Number"),
                lit("true"),
                lit("false"),
                lit("null"),
            ])
            .memo(VALUE),
        )
        .rule(
            "Object",
            seq([
                lit("{"),
                ws(),
                seq([nt("Member"), seq([ws(), lit(","), ws(), nt("Member")]).star()]).opt(),
                ws(),
                lit("}"),
            ])
            .capture(OBJECT)
            .memo(OBJECT),
        )
        .rule("Member", seq([nt("String"), ws(), lit(":"), ws(), nt("Value")]))
        .rule(
            "Array",
            seq([
                lit("["),
                ws(),
                seq([nt("Value"), seq([ws(), lit(","), ws(), nt("Value")]).star()]).opt(),
                ws(),
                lit("]"),
            ])
            .capture(ARRAY)
            .memo(ARRAY),
        )
        .rule(
            "String",
            seq([
                lit("\""),
                class(Charset::from_bytes(b"\"\\").complement())
                    .or(lit("\\").then(any()))
                    .star(),
                lit("\""),
            ])
            .capture(STRING)
            .memo(STRING),
        )
        .rule(
            "Number",
            seq([lit("-").opt(), digits(), lit(".").then(digits()).opt()])
                .capture(NUMBER)
                .memo(NUMBER),
        )
        .rule("Ws", one_of(" \t\r\n").star())
        .start("Doc")
        .build()
}

fn json_parser() -> Parser {
    Parser::new(&json()).unwrap()
}

/// `[` followed by 30 nine-digit numbers separated by `, `
fn number_list() -> String {
    let numbers: Vec<String> = (0..30)
        .map(|i| format!("{:09}", 100_000_000 + i * 12_345))
        .collect();
    format!("[{}]", numbers.join(", "))
}

fn replace(text: &str, start: usize, end: usize, with: &str) -> String {
    format!("{}{}{}", &text[..start], with, &text[end..])
}

// ============================================================================
// Edit Scenarios
// ============================================================================

#[test]
fn test_single_byte_edit_evicts_stale_entries() {
    let text = number_list();
    assert_eq!(&text[144..153], "100160485");

    let mut inc = IncrementalParser::new(json_parser());
    let first = inc.parse(text.as_str()).unwrap();
    assert!(first.matched);
    assert_eq!(first.find_all(NUMBER).len(), 30);

    let before = inc.table().len();
    let removed = inc.apply_edit(Edit::new(150, 151, 1));
    let after = inc.table().len();
    assert!(removed > 0);
    assert!(after < before);
    assert!(after > 0);

    let edited = replace(&text, 150, 151, "9");
    let again = inc.reparse(edited.as_str()).unwrap();
    let scratch = json_parser().parse(edited.as_str()).unwrap();
    assert_eq!(again.result, scratch);
    assert!(again.reused_entries > 0);
    assert_eq!(again.result.find_all(NUMBER)[13].text_lossy(edited.as_str()), "100169485");
}

#[test]
fn test_unedited_reparse_reports_same_examined() {
    let text = number_list();
    let mut inc = IncrementalParser::new(json_parser());
    let first = inc.parse(text.as_str()).unwrap();

    let again = inc.reparse(text.as_str()).unwrap();
    assert_eq!(again.result.examined, first.examined);
    assert_eq!(again.result, first);
    assert!(again.stats.memo_hits > 0);
    assert_eq!(again.stats.memo_misses, 0);
}

#[test]
fn test_insert_at_start() {
    let text = number_list();
    let mut inc = IncrementalParser::new(json_parser());
    inc.parse(text.as_str()).unwrap();

    let edited = format!("  {}", text);
    let again = inc.parse_with_edit(edited.as_str(), Edit::insert(0, 2)).unwrap();
    assert_eq!(again.result, json_parser().parse(edited.as_str()).unwrap());
    assert!(again.reused_entries > 0);
}

#[test]
fn test_append_at_end() {
    let text = number_list();
    let mut inc = IncrementalParser::new(json_parser());
    inc.parse(text.as_str()).unwrap();

    let edited = format!("{}\n", text);
    let again = inc
        .parse_with_edit(edited.as_str(), Edit::insert(text.len(), 1))
        .unwrap();
    assert_eq!(again.result, json_parser().parse(edited.as_str()).unwrap());

    let broken = format!("{}x", edited);
    let again = inc
        .parse_with_edit(broken.as_str(), Edit::insert(edited.len(), 1))
        .unwrap();
    assert!(!again.result.matched);
    assert_eq!(again.result, json_parser().parse(broken.as_str()).unwrap());
}

#[test]
fn test_edit_across_entry_boundary() {
    let text = number_list();
    let mut inc = IncrementalParser::new(json_parser());
    inc.parse(text.as_str()).unwrap();

    // last digit of item 3, the separator and first digit of item 4
    let edited = replace(&text, 42, 46, "7 ,8");
    let again = inc
        .parse_with_edit(edited.as_str(), Edit::replace(42, 4, 4))
        .unwrap();
    assert_eq!(again.result, json_parser().parse(edited.as_str()).unwrap());
    assert_eq!(again.result.find_all(NUMBER).len(), 30);
}

#[test]
fn test_edit_that_breaks_then_fixes_document() {
    let text = number_list();
    let mut inc = IncrementalParser::new(json_parser());
    inc.parse(text.as_str()).unwrap();

    let broken = replace(&text, 100, 101, "x");
    let again = inc
        .parse_with_edit(broken.as_str(), Edit::replace(100, 1, 1))
        .unwrap();
    assert!(!again.result.matched);
    assert_eq!(again.result, json_parser().parse(broken.as_str()).unwrap());

    let fixed = replace(&broken, 100, 101, "5");
    let again = inc
        .parse_with_edit(fixed.as_str(), Edit::replace(100, 1, 1))
        .unwrap();
    assert!(again.result.matched);
    assert_eq!(again.result, json_parser().parse(fixed.as_str()).unwrap());
}

#[test]
fn test_nested_document() {
    let text = r#"{"name": "repeg", "tags": ["peg", "vm", "memo"], "size": {"rows": 12, "cols": -3.5}}"#;
    let mut inc = IncrementalParser::new(json_parser());
    let first = inc.parse(text).unwrap();
    assert!(first.matched);
    assert_eq!(first.find_all(OBJECT).len(), 2);
    assert_eq!(first.find_all(STRING).len(), 9);

    let at = text.find("12").unwrap();
    let edited = replace(text, at, at + 2, "1200");
    let again = inc
        .parse_with_edit(edited.as_str(), Edit::replace(at, 2, 4))
        .unwrap();
    assert_eq!(again.result, json_parser().parse(edited.as_str()).unwrap());
    assert_eq!(
        again.result.find_all(NUMBER)[0].text_lossy(edited.as_str()),
        "1200"
    );
}

#[test]
fn test_lru_table_gives_same_results() {
    let text = number_list();
    let mut inc = IncrementalParser::with_table(json_parser(), LruTable::new(1024, 4));
    inc.parse(text.as_str()).unwrap();

    let edited = replace(&text, 150, 151, "0");
    let again = inc
        .parse_with_edit(edited.as_str(), Edit::new(150, 151, 1))
        .unwrap();
    assert_eq!(again.result, json_parser().parse(edited.as_str()).unwrap());
    assert!(again.reused_entries > 0);
}

#[test]
fn test_chunked_document_edits() {
    let text = number_list();
    let mut doc = ChunkedInput::new(&text, 16);
    let mut inc = IncrementalParser::new(json_parser());
    inc.parse(&doc).unwrap();

    let edits = [
        doc.edit(12, 21, b"7"),
        doc.edit(0, 1, b" ["),
        doc.edit(60, 60, b" "),
    ];
    let again = inc.parse_with_edits(&doc, &edits).unwrap();
    let flat = doc.to_vec();
    assert_eq!(again.result, json_parser().parse(flat.as_slice()).unwrap());
    assert!(again.result.matched);
    assert_eq!(inc.edits_applied(), 3);
}
