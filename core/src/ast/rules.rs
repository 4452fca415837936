use pest_derive::Parser;

use crate::location;
use crate::source::Source;

use super::err::BuildError;

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct RulesParser;

pub(crate) fn fetch_next_pair<'a>(
    pairs: &mut pest::iterators::Pairs<'a, Rule>,
    location: &Option<location::Location>,
    span: &Option<location::Span>,
) -> Result<pest::iterators::Pair<'a, Rule>, BuildError> {
    match pairs.next() {
        Some(pair) => Ok(pair),
        None => Err(BuildError::syntax(
            "expected more inner pairs but found none",
            location.clone(),
            *span,
        )),
    }
}

pub(crate) fn get_data_from_rule<'a>(
    rule: &pest::iterators::Pair<'a, Rule>,
    source: &Source,
) -> (
    pest::iterators::Pairs<'a, Rule>,
    Option<crate::location::Location>,
    Option<crate::location::Span>,
) {
    let inner_rules = rule.clone().into_inner();
    let span = get_span_from_pair(rule);
    let location = get_location_from_pair(rule, source);
    (inner_rules, location, span)
}

pub fn get_location_from_pair(
    rule: &pest::iterators::Pair<Rule>,
    source: &Source,
) -> Option<crate::location::Location> {
    let span = rule.as_span();
    Some(crate::location::Location {
        file: source.name.clone(),
        line: span.start_pos().line_col().0,
        column: span.start_pos().line_col().1,
    })
}

pub fn get_span_from_pair(rule: &pest::iterators::Pair<Rule>) -> Option<crate::location::Span> {
    let span = rule.as_span();
    Some(crate::location::Span {
        start: span.start(),
        end: span.end(),
    })
}
