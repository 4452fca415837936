//! file: core/src/ast/unit.rs
//! description: parsing of whole sources into unit trees.
//!
use pest::Parser;

use crate::location::{Location, Span};
use crate::object::{DataSegment, SubNode, Unit};
use crate::reports::{self, Report, ReportCollector};
use crate::source::Source;

use super::err::BuildError;
use super::rules::{self, Rule, RulesParser};
use super::{expr, stmt};

/// Unit nesting beyond this depth is rejected at parse time.
pub const MAX_UNIT_DEPTH: usize = 64;

/// Parse a whole source into a unit tree.
///
/// A bare code block is wrapped into an anonymous unit named "unit".
/// Returns `None` after pushing diagnostics when the source does not
/// parse.
pub fn parse_program(source: &Source, reports: &mut ReportCollector) -> Option<Unit> {
    let mut pairs = match RulesParser::parse(Rule::program, &source.content) {
        Ok(pairs) => pairs,
        Err(err) => {
            reports.push(report_from_pest_error(&err, source));
            return None;
        }
    };
    let program = pairs
        .next()
        .expect("a successful parse yields exactly one program pair");

    match build_program(program, source) {
        Ok(unit) => Some(unit),
        Err(err) => {
            reports.push(err.into_report());
            None
        }
    }
}

fn build_program(
    program: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<Unit, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&program, source);
    let first = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    match first.as_rule() {
        Rule::unit_def => parse_unit_rule(first, source, 0),
        Rule::block => {
            let code = stmt::parse_block_rule(first, source)?;
            let mut unit = Unit::new("unit");
            unit.code = Some(code);
            Ok(unit)
        }
        other => Err(BuildError::syntax(
            &format!("unexpected top level rule: {:?}", other),
            location,
            span,
        )),
    }
}

fn parse_unit_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
    depth: usize,
) -> Result<Unit, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    if depth >= MAX_UNIT_DEPTH {
        return Err(BuildError::limit(
            &format!("unit nesting exceeds {} levels", MAX_UNIT_DEPTH),
            location,
            span,
        ));
    }

    rules::fetch_next_pair(&mut inner_pairs, &location, &span)?; // kw_unit
    let name_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let name = expr::decode_string_literal(&name_pair, source)?;
    check_container_name("unit", &name, &location, &span)?;

    let mut unit = Unit::new(name);

    let code_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let (mut code_inner, code_location, code_span) = rules::get_data_from_rule(&code_pair, source);
    rules::fetch_next_pair(&mut code_inner, &code_location, &code_span)?; // kw_code
    let block_pair = rules::fetch_next_pair(&mut code_inner, &code_location, &code_span)?;
    unit.code = Some(stmt::parse_block_rule(block_pair, source)?);

    for sub_pair in inner_pairs {
        let (mut sub_inner, sub_location, sub_span) = rules::get_data_from_rule(&sub_pair, source);
        let node_pair = rules::fetch_next_pair(&mut sub_inner, &sub_location, &sub_span)?;
        let sub = match node_pair.as_rule() {
            Rule::unit_def => SubNode::Unit(parse_unit_rule(node_pair, source, depth + 1)?),
            Rule::data_def => SubNode::Data(parse_data_rule(node_pair, source)?),
            other => {
                return Err(BuildError::syntax(
                    &format!("unexpected sub node rule: {:?}", other),
                    sub_location,
                    sub_span,
                ));
            }
        };
        if sub.name() == unit.name || unit.find_sub(sub.name()).is_some() {
            return Err(BuildError::data(
                &format!(
                    "name \"{}\" is already used in unit \"{}\"",
                    sub.name(),
                    unit.name
                ),
                sub_location,
                sub_span,
            ));
        }
        unit.subs.push(sub);
    }

    Ok(unit)
}

fn parse_data_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<DataSegment, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    rules::fetch_next_pair(&mut inner_pairs, &location, &span)?; // kw_data
    let name_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let name = expr::decode_string_literal(&name_pair, source)?;
    check_container_name("data segment", &name, &location, &span)?;

    let contents_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let contents = match contents_pair.as_rule() {
        Rule::hex_string => expr::decode_hex_bytes(&contents_pair, source)?,
        Rule::string => expr::decode_string_bytes(&contents_pair, source)?,
        other => {
            return Err(BuildError::syntax(
                &format!("unexpected data contents rule: {:?}", other),
                location,
                span,
            ));
        }
    };

    let mut segment = DataSegment::new(name, contents);
    segment.location = location;
    segment.span = span;
    Ok(segment)
}

fn check_container_name(
    kind: &str,
    name: &str,
    location: &Option<Location>,
    span: &Option<Span>,
) -> Result<(), BuildError> {
    if name.is_empty() {
        return Err(BuildError::data(
            &format!("{} name may not be empty", kind),
            location.clone(),
            *span,
        ));
    }
    if name.contains('.') {
        return Err(BuildError::data(
            &format!("{} name \"{}\" may not contain dots", kind, name),
            location.clone(),
            *span,
        ));
    }
    Ok(())
}

fn report_from_pest_error(err: &pest::error::Error<Rule>, source: &Source) -> Report {
    let location = match err.line_col {
        pest::error::LineColLocation::Pos((line, column))
        | pest::error::LineColLocation::Span((line, column), _) => {
            Location::new(source.name.clone(), line, column)
        }
    };
    let span = match err.location {
        pest::error::InputLocation::Pos(p) => Span::new(p, p),
        pest::error::InputLocation::Span((s, e)) => Span::new(s, e),
    };
    Report::error(
        &format!("syntax error: {}", err.variant.message()),
        Some(location),
        Some(span),
        Some(reports::E_SYNTAX),
        None,
        None,
    )
}
