//! file: core/src/ast/expr.rs
//! description: parsing helpers for expressions and literals.
//!
//! This module contains functions that parse `expression` rules from the
//! `pest`-generated `RulesParser` into `AstNode` structures, plus the
//! decoders for string and hex literals. Parsing helpers attach
//! `Location`/`Span` metadata using the `rules` helpers to aid
//! diagnostics.
//!
use crate::{
    ast::{AstNode, AstNodeKind, Rule, rules},
    error::Unimplemented,
    source::Source,
};

use super::err::BuildError;

pub(crate) fn parse_expression_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    let next_rule = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    match next_rule.as_rule() {
        Rule::call => parse_call_rule(next_rule, source),
        Rule::literal => parse_literal_rule(next_rule, source),
        Rule::ident => Ok(AstNode::new(
            AstNodeKind::Identifier {
                name: next_rule.as_str().to_string(),
            },
            location,
            span,
        )),
        _ => Err(BuildError::syntax(
            &format!("unexpected expression rule: {:?}", next_rule.as_rule()),
            location,
            span,
        )),
    }
}

pub(crate) fn parse_call_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    let name_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let name = name_pair.as_str().to_string();

    let mut args = Vec::new();
    if let Some(args_pair) = inner_pairs.next() {
        for arg in args_pair.into_inner() {
            args.push(parse_expression_rule(arg, source)?);
        }
    }

    Ok(AstNode::new(
        AstNodeKind::Call { name, args },
        location,
        span,
    ))
}

fn parse_literal_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    let next_rule = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    match next_rule.as_rule() {
        Rule::hex_number => {
            let text = next_rule.as_str();
            match u64::from_str_radix(&text[2..], 16) {
                Ok(value) => Ok(AstNode::new(AstNodeKind::Number { value }, location, span)),
                Err(_) => Err(BuildError::syntax(
                    &format!("number literal \"{}\" does not fit a machine word", text),
                    location,
                    span,
                )),
            }
        }
        Rule::dec_number => {
            let text = next_rule.as_str();
            match text.parse::<u64>() {
                Ok(value) => Ok(AstNode::new(AstNodeKind::Number { value }, location, span)),
                Err(_) => Err(BuildError::syntax(
                    &format!("number literal \"{}\" does not fit a machine word", text),
                    location,
                    span,
                )),
            }
        }
        Rule::bool_lit => Ok(AstNode::new(
            AstNodeKind::Bool {
                value: next_rule.as_str() == "true",
            },
            location,
            span,
        )),
        Rule::string => {
            let value = decode_string_literal(&next_rule, source)?;
            Ok(AstNode::new(
                AstNodeKind::StringLit { value },
                location,
                span,
            ))
        }
        _ => Err(BuildError::syntax(
            &format!("unexpected literal rule: {:?}", next_rule.as_rule()),
            location,
            span,
        )),
    }
}

/// Decode a `string` pair into text, resolving escape sequences.
pub(crate) fn decode_string_literal(
    pair: &pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<String, BuildError> {
    let bytes = decode_string_bytes(pair, source)?;
    // Escapes may have produced arbitrary bytes; map them through latin-1
    // so no byte is lost.
    Ok(bytes.iter().map(|&b| b as char).collect())
}

/// Decode a `string` pair into raw bytes, resolving escape sequences.
///
/// Unicode escapes are not representable in data segments and raise an
/// unimplemented fault instead of guessing an encoding.
pub(crate) fn decode_string_bytes(
    pair: &pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<Vec<u8>, BuildError> {
    let location = rules::get_location_from_pair(pair, source);
    let raw = pair
        .clone()
        .into_inner()
        .next()
        .map(|inner| inner.as_str().to_string())
        .unwrap_or_default();

    let mut out = Vec::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('"') => out.push(b'"'),
            Some('\\') => out.push(b'\\'),
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('0') => out.push(0),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        let text: String = [hi, lo].iter().collect();
                        match u8::from_str_radix(&text, 16) {
                            Ok(byte) => out.push(byte),
                            Err(_) => {
                                return Err(BuildError::syntax(
                                    &format!("invalid hex escape \"\\x{}\"", text),
                                    location,
                                    rules::get_span_from_pair(pair),
                                ));
                            }
                        }
                    }
                    _ => {
                        return Err(BuildError::syntax(
                            "truncated hex escape",
                            location,
                            rules::get_span_from_pair(pair),
                        ));
                    }
                }
            }
            Some('u') => {
                return Err(BuildError::Unimplemented(Unimplemented::new(
                    "unicode escape sequences in string data",
                    location,
                )));
            }
            other => {
                return Err(BuildError::syntax(
                    &format!("unknown escape sequence \"\\{}\"", other.unwrap_or(' ')),
                    location,
                    rules::get_span_from_pair(pair),
                ));
            }
        }
    }
    Ok(out)
}

/// Decode a `hex_string` pair into raw bytes.
pub(crate) fn decode_hex_bytes(
    pair: &pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<Vec<u8>, BuildError> {
    let location = rules::get_location_from_pair(pair, source);
    let raw = pair
        .clone()
        .into_inner()
        .next()
        .map(|inner| inner.as_str().to_string())
        .unwrap_or_default();

    let digits: Vec<char> = raw.chars().collect();
    let mut out = Vec::with_capacity(digits.len() / 2);
    for chunk in digits.chunks(2) {
        let text: String = chunk.iter().collect();
        match u8::from_str_radix(&text, 16) {
            Ok(byte) => out.push(byte),
            Err(_) => {
                return Err(BuildError::syntax(
                    &format!("invalid hex digits \"{}\"", text),
                    location,
                    rules::get_span_from_pair(pair),
                ));
            }
        }
    }
    Ok(out)
}
