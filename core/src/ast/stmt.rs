//! file: core/src/ast/stmt.rs
//! description: parsing helpers for blocks and statements.
//!
//! This module contains functions that parse `block` and `statement`
//! rules from the `pest`-generated `RulesParser` into `AstNode`
//! structures. Parsing helpers attach `Location`/`Span` metadata using
//! the `rules` helpers to aid diagnostics.
//!
use crate::{
    ast::{AstNode, AstNodeKind, Rule, TypedName, rules},
    source::Source,
};

use super::err::BuildError;

pub(crate) fn parse_block_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    let mut statements = Vec::new();
    for stmt in inner_pairs {
        statements.push(parse_statement_rule(stmt, source)?);
    }
    Ok(AstNode::new(
        AstNodeKind::Block { statements },
        location,
        span,
    ))
}

pub(crate) fn parse_statement_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    let next_rule = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    match next_rule.as_rule() {
        Rule::block => parse_block_rule(next_rule, source),
        Rule::fn_def => parse_fn_def_rule(next_rule, source),
        Rule::var_decl => parse_var_decl_rule(next_rule, source),
        Rule::if_stmt => parse_if_rule(next_rule, source),
        Rule::for_stmt => parse_for_rule(next_rule, source),
        Rule::break_stmt => Ok(AstNode::new(AstNodeKind::Break, location, span)),
        Rule::continue_stmt => Ok(AstNode::new(AstNodeKind::Continue, location, span)),
        Rule::leave_stmt => Ok(AstNode::new(AstNodeKind::Leave, location, span)),
        Rule::assignment => parse_assignment_rule(next_rule, source),
        Rule::expr_stmt => {
            let (mut inner, inner_location, inner_span) =
                rules::get_data_from_rule(&next_rule, source);
            let call_pair = rules::fetch_next_pair(&mut inner, &inner_location, &inner_span)?;
            let expr = super::expr::parse_call_rule(call_pair, source)?;
            Ok(AstNode::new(
                AstNodeKind::ExprStatement {
                    expr: Box::new(expr),
                },
                inner_location,
                inner_span,
            ))
        }
        _ => Err(BuildError::syntax(
            &format!("unexpected statement rule: {:?}", next_rule.as_rule()),
            location,
            span,
        )),
    }
}

pub(crate) fn parse_typed_name_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<TypedName, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    let name_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let ty = inner_pairs.next().map(|p| p.as_str().to_string());
    Ok(TypedName::new(name_pair.as_str(), ty))
}

fn parse_var_decl_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    rules::fetch_next_pair(&mut inner_pairs, &location, &span)?; // kw_let
    let name_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let name = parse_typed_name_rule(name_pair, source)?;
    let value = match inner_pairs.next() {
        Some(expr) => Some(Box::new(super::expr::parse_expression_rule(expr, source)?)),
        None => None,
    };
    Ok(AstNode::new(
        AstNodeKind::VarDecl { name, value },
        location,
        span,
    ))
}

fn parse_assignment_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    let name_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let value_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let value = super::expr::parse_expression_rule(value_pair, source)?;
    Ok(AstNode::new(
        AstNodeKind::Assignment {
            name: name_pair.as_str().to_string(),
            value: Box::new(value),
        },
        location,
        span,
    ))
}

fn parse_if_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    rules::fetch_next_pair(&mut inner_pairs, &location, &span)?; // kw_if
    let condition_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let condition = super::expr::parse_expression_rule(condition_pair, source)?;
    let body_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let body = parse_block_rule(body_pair, source)?;

    let else_body = match inner_pairs.next() {
        Some(_kw_else) => {
            let else_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
            let node = match else_pair.as_rule() {
                Rule::if_stmt => parse_if_rule(else_pair, source)?,
                Rule::block => parse_block_rule(else_pair, source)?,
                _ => {
                    return Err(BuildError::syntax(
                        &format!("unexpected else branch rule: {:?}", else_pair.as_rule()),
                        location,
                        span,
                    ));
                }
            };
            Some(Box::new(node))
        }
        None => None,
    };

    Ok(AstNode::new(
        AstNodeKind::If {
            condition: Box::new(condition),
            body: Box::new(body),
            else_body,
        },
        location,
        span,
    ))
}

fn parse_for_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    rules::fetch_next_pair(&mut inner_pairs, &location, &span)?; // kw_for
    let init_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let init = parse_block_rule(init_pair, source)?;
    let condition_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let condition = super::expr::parse_expression_rule(condition_pair, source)?;
    let post_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let post = parse_block_rule(post_pair, source)?;
    let body_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let body = parse_block_rule(body_pair, source)?;

    Ok(AstNode::new(
        AstNodeKind::For {
            init: Box::new(init),
            condition: Box::new(condition),
            post: Box::new(post),
            body: Box::new(body),
        },
        location,
        span,
    ))
}

fn parse_fn_def_rule(
    pair: pest::iterators::Pair<Rule>,
    source: &Source,
) -> Result<AstNode, BuildError> {
    let (mut inner_pairs, location, span) = rules::get_data_from_rule(&pair, source);
    rules::fetch_next_pair(&mut inner_pairs, &location, &span)?; // kw_fn
    let name_pair = rules::fetch_next_pair(&mut inner_pairs, &location, &span)?;
    let name = name_pair.as_str().to_string();

    let mut params = Vec::new();
    let mut ret = None;
    let mut body = None;
    for p in inner_pairs {
        match p.as_rule() {
            Rule::param_list => {
                for tn in p.into_inner() {
                    params.push(parse_typed_name_rule(tn, source)?);
                }
            }
            Rule::typed_name => ret = Some(parse_typed_name_rule(p, source)?),
            Rule::block => body = Some(parse_block_rule(p, source)?),
            _ => {
                return Err(BuildError::syntax(
                    &format!("unexpected rule in function definition: {:?}", p.as_rule()),
                    location,
                    span,
                ));
            }
        }
    }
    let body = body.ok_or_else(|| {
        BuildError::syntax("function definition has no body", location.clone(), span)
    })?;

    Ok(AstNode::new(
        AstNodeKind::FunctionDef {
            name,
            params,
            ret,
            body: Box::new(body),
        },
        location,
        span,
    ))
}
