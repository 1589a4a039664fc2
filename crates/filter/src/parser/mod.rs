use crate::error::FilterError;
use pest::Parser;
use pest::iterators::Pair;

pub mod ast;

#[derive(pest_derive::Parser)]
#[grammar = "parser/xpath1.pest"]
pub struct XPathParser;

type PResult<T> = Result<T, FilterError>;

/// Parse an XPath 1.0 expression into the AST.
pub fn parse_xpath(input: &str) -> PResult<ast::Expr> {
    let mut pairs = XPathParser::parse(Rule::xpath, input).map_err(|e| FilterError::Syntax(e.to_string()))?;
    let root = pairs.next().ok_or_else(|| malformed("empty parse tree"))?;
    let expr = root.into_inner().next().ok_or_else(|| malformed("missing expression"))?;
    build_expr(expr)
}

fn malformed(what: &str) -> FilterError {
    FilterError::Syntax(format!("unexpected parse tree: {what}"))
}

fn next_pair<'i>(inner: &mut pest::iterators::Pairs<'i, Rule>, what: &str) -> PResult<Pair<'i, Rule>> {
    inner.next().ok_or_else(|| malformed(what))
}

fn build_expr(pair: Pair<'_, Rule>) -> PResult<ast::Expr> {
    match pair.as_rule() {
        Rule::expr | Rule::path_expr | Rule::primary_expr | Rule::location_path => {
            let mut inner = pair.into_inner();
            build_expr(next_pair(&mut inner, "expression body")?)
        }
        Rule::or_expr
        | Rule::and_expr
        | Rule::equality_expr
        | Rule::relational_expr
        | Rule::additive_expr
        | Rule::multiplicative_expr => build_binary_chain(pair),
        Rule::unary_expr => {
            let mut negations = 0usize;
            let mut operand = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::neg => negations += 1,
                    _ => operand = Some(build_expr(p)?),
                }
            }
            let mut expr = operand.ok_or_else(|| malformed("unary operand"))?;
            for _ in 0..negations {
                expr = ast::Expr::Negate(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::union_expr => {
            let mut inner = pair.into_inner();
            let mut expr = build_expr(next_pair(&mut inner, "union operand")?)?;
            for p in inner {
                expr = ast::Expr::Union(Box::new(expr), Box::new(build_expr(p)?));
            }
            Ok(expr)
        }
        Rule::filter_path => build_filter_path(pair),
        Rule::filter_expr => {
            let mut inner = pair.into_inner();
            let primary = build_expr(next_pair(&mut inner, "primary expression")?)?;
            let predicates = inner.map(build_predicate).collect::<PResult<Vec<_>>>()?;
            if predicates.is_empty() {
                Ok(primary)
            } else {
                Ok(ast::Expr::Filter { primary: Box::new(primary), predicates })
            }
        }
        Rule::variable_ref => {
            let mut inner = pair.into_inner();
            Ok(ast::Expr::VarRef(ast::QName::parse(next_pair(&mut inner, "variable name")?.as_str())))
        }
        Rule::literal => {
            let content = pair.into_inner().next().map(|p| p.as_str().to_string()).unwrap_or_default();
            Ok(ast::Expr::Literal(ast::Literal::String(content)))
        }
        Rule::number => {
            let text = pair.as_str();
            let value = text.parse::<f64>().map_err(|e| FilterError::Syntax(format!("invalid number '{text}': {e}")))?;
            Ok(ast::Expr::Literal(ast::Literal::Number(value)))
        }
        Rule::function_call => {
            let mut inner = pair.into_inner();
            let name = ast::QName::parse(next_pair(&mut inner, "function name")?.as_str());
            let args = inner.map(build_expr).collect::<PResult<Vec<_>>>()?;
            Ok(ast::Expr::FunctionCall { name, args })
        }
        Rule::absolute_location_path => {
            let mut steps = Vec::new();
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::descendant_root => steps.push(descendant_or_self_step()),
                    Rule::root => {}
                    Rule::relative_location_path => collect_steps(p, &mut steps)?,
                    other => return Err(malformed(&format!("{other:?} in absolute path"))),
                }
            }
            Ok(ast::Expr::Path { start: ast::PathStart::Root, steps })
        }
        Rule::relative_location_path => {
            let mut steps = Vec::new();
            collect_steps(pair, &mut steps)?;
            Ok(ast::Expr::Path { start: ast::PathStart::Context, steps })
        }
        other => Err(malformed(&format!("{other:?}"))),
    }
}

fn build_binary_chain(pair: Pair<'_, Rule>) -> PResult<ast::Expr> {
    let mut inner = pair.into_inner();
    let mut left = build_expr(next_pair(&mut inner, "left operand")?)?;
    while let Some(op) = inner.next() {
        let op = binary_op(op.as_str())?;
        let right = build_expr(next_pair(&mut inner, "right operand")?)?;
        left = ast::Expr::binary(left, op, right);
    }
    Ok(left)
}

fn binary_op(token: &str) -> PResult<ast::BinaryOp> {
    use ast::BinaryOp as B;
    Ok(match token.trim() {
        "or" => B::Or,
        "and" => B::And,
        "=" => B::Eq,
        "!=" => B::Ne,
        "<" => B::Lt,
        "<=" => B::Le,
        ">" => B::Gt,
        ">=" => B::Ge,
        "+" => B::Add,
        "-" => B::Sub,
        "*" => B::Mul,
        "div" => B::Div,
        "mod" => B::Mod,
        other => return Err(malformed(&format!("operator '{other}'"))),
    })
}

fn build_filter_path(pair: Pair<'_, Rule>) -> PResult<ast::Expr> {
    let mut inner = pair.into_inner();
    let head = build_expr(next_pair(&mut inner, "filter expression")?)?;
    let Some(sep) = inner.next() else {
        return Ok(head);
    };
    let mut steps = Vec::new();
    if sep.as_str() == "//" {
        steps.push(descendant_or_self_step());
    }
    collect_steps(next_pair(&mut inner, "relative path")?, &mut steps)?;
    Ok(ast::Expr::Path { start: ast::PathStart::Expr(Box::new(head)), steps })
}

fn collect_steps(pair: Pair<'_, Rule>, steps: &mut Vec<ast::Step>) -> PResult<()> {
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::step => steps.push(build_step(p)?),
            Rule::path_sep if p.as_str() == "//" => steps.push(descendant_or_self_step()),
            Rule::path_sep => {}
            other => return Err(malformed(&format!("{other:?} in location path"))),
        }
    }
    Ok(())
}

fn descendant_or_self_step() -> ast::Step {
    ast::Step { axis: ast::Axis::DescendantOrSelf, test: ast::NodeTest::Kind(ast::NodeType::Node), predicates: Vec::new() }
}

fn build_step(pair: Pair<'_, Rule>) -> PResult<ast::Step> {
    let mut axis = ast::Axis::Child;
    let mut test = None;
    let mut predicates = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::abbreviated_step => {
                let abbreviated = p.into_inner().next().ok_or_else(|| malformed("abbreviated step"))?;
                let axis = if abbreviated.as_rule() == Rule::parent_step { ast::Axis::Parent } else { ast::Axis::SelfAxis };
                return Ok(ast::Step { axis, test: ast::NodeTest::Kind(ast::NodeType::Node), predicates });
            }
            Rule::axis_specifier => {
                let spec = p.into_inner().next().ok_or_else(|| malformed("axis specifier"))?;
                axis = match spec.as_rule() {
                    Rule::abbrev_attribute => ast::Axis::Attribute,
                    _ => {
                        let name = spec.into_inner().next().ok_or_else(|| malformed("axis name"))?;
                        ast::Axis::from_name(name.as_str())
                            .ok_or_else(|| FilterError::Syntax(format!("unknown axis '{}'", name.as_str())))?
                    }
                };
            }
            Rule::node_test => test = Some(build_node_test(p)?),
            Rule::predicate => predicates.push(build_predicate(p)?),
            other => return Err(malformed(&format!("{other:?} in step"))),
        }
    }
    let test = test.ok_or_else(|| malformed("node test"))?;
    Ok(ast::Step { axis, test, predicates })
}

fn build_node_test(pair: Pair<'_, Rule>) -> PResult<ast::NodeTest> {
    let test = pair.into_inner().next().ok_or_else(|| malformed("node test body"))?;
    match test.as_rule() {
        Rule::pi_test => {
            let target = test.into_inner().next().and_then(|lit| lit.into_inner().next()).map(|s| s.as_str().to_string());
            Ok(ast::NodeTest::ProcessingInstruction(target))
        }
        Rule::node_type_test => {
            let kind = test.into_inner().next().ok_or_else(|| malformed("node type"))?;
            Ok(ast::NodeTest::Kind(match kind.as_str() {
                "text" => ast::NodeType::Text,
                "comment" => ast::NodeType::Comment,
                _ => ast::NodeType::Node,
            }))
        }
        Rule::name_test => {
            let name = test.into_inner().next().ok_or_else(|| malformed("name test"))?;
            Ok(match name.as_rule() {
                Rule::wildcard => ast::NodeTest::AnyName,
                Rule::prefix_wildcard => {
                    ast::NodeTest::NamespaceWildcard(name.as_str().trim_end_matches(":*").to_string())
                }
                _ => ast::NodeTest::Name(ast::QName::parse(name.as_str())),
            })
        }
        other => Err(malformed(&format!("{other:?} as node test"))),
    }
}

fn build_predicate(pair: Pair<'_, Rule>) -> PResult<ast::Expr> {
    let mut inner = pair.into_inner();
    build_expr(next_pair(&mut inner, "predicate expression")?)
}

#[cfg(test)]
mod tests {
    use super::ast::{Axis, BinaryOp, Expr, Literal, NodeTest, NodeType, PathStart};
    use super::*;
    use rstest::rstest;

    fn path_steps(expr: &Expr) -> Vec<(Axis, NodeTest)> {
        match expr {
            Expr::Path { steps, .. } => steps.iter().map(|s| (s.axis, s.test.clone())).collect(),
            other => panic!("not a path: {other:?}"),
        }
    }

    #[test]
    fn absolute_path_with_prefixes() {
        let expr = parse_xpath("/s:Envelope/s:Header/a:To").unwrap();
        let Expr::Path { start, steps } = &expr else { panic!("expected path") };
        assert_eq!(*start, PathStart::Root);
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.axis == Axis::Child));
        assert_eq!(steps[2].test, NodeTest::Name(ast::QName { prefix: Some("a".into()), local: "To".into() }));
    }

    #[test]
    fn double_slash_expands_to_descendant_or_self() {
        let steps = path_steps(&parse_xpath("//a//@b").unwrap());
        assert_eq!(steps[0], (Axis::DescendantOrSelf, NodeTest::Kind(NodeType::Node)));
        assert_eq!(steps[2], (Axis::DescendantOrSelf, NodeTest::Kind(NodeType::Node)));
        assert_eq!(steps[3].0, Axis::Attribute);
    }

    #[rstest]
    #[case("1 + 2 * 3", BinaryOp::Add)]
    #[case("a or b and c", BinaryOp::Or)]
    #[case("a = 'x' and b != 2", BinaryOp::And)]
    #[case("4 div 2 mod 3", BinaryOp::Mod)]
    #[case("1 <= 2", BinaryOp::Le)]
    fn operator_precedence(#[case] input: &str, #[case] top: BinaryOp) {
        match parse_xpath(input).unwrap() {
            Expr::Binary { op, .. } => assert_eq!(op, top),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keywords_are_names_in_step_position() {
        let steps = path_steps(&parse_xpath("/or/and/div").unwrap());
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].1, NodeTest::Name(ast::QName::parse("or")));
    }

    #[test]
    fn node_type_tests_are_not_function_calls() {
        let steps = path_steps(&parse_xpath("a/text()").unwrap());
        assert_eq!(steps[1].1, NodeTest::Kind(NodeType::Text));
        let steps = path_steps(&parse_xpath("processing-instruction('x')").unwrap());
        assert_eq!(steps[0].1, NodeTest::ProcessingInstruction(Some("x".into())));
    }

    #[test]
    fn wildcards_and_axes() {
        let steps = path_steps(&parse_xpath("child::*/p:*/descendant::x/..").unwrap());
        assert_eq!(steps[0], (Axis::Child, NodeTest::AnyName));
        assert_eq!(steps[1], (Axis::Child, NodeTest::NamespaceWildcard("p".into())));
        assert_eq!(steps[2].0, Axis::Descendant);
        assert_eq!(steps[3], (Axis::Parent, NodeTest::Kind(NodeType::Node)));
    }

    #[test]
    fn literals_numbers_variables_and_calls() {
        assert_eq!(parse_xpath("\"a'b\"").unwrap(), Expr::Literal(Literal::String("a'b".into())));
        assert_eq!(parse_xpath(".5").unwrap(), Expr::Literal(Literal::Number(0.5)));
        assert_eq!(parse_xpath("$v").unwrap(), Expr::VarRef(ast::QName::parse("v")));
        match parse_xpath("sm:header()").unwrap() {
            Expr::FunctionCall { name, args } => {
                assert_eq!(name.to_string(), "sm:header");
                assert!(args.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn filter_expression_followed_by_path() {
        let expr = parse_xpath("(//a)[1]/b").unwrap();
        let Expr::Path { start: PathStart::Expr(head), steps } = expr else { panic!("expected path") };
        assert!(matches!(*head, Expr::Filter { .. }));
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn negation_and_union() {
        assert!(matches!(parse_xpath("--1").unwrap(), Expr::Negate(inner) if matches!(*inner, Expr::Negate(_))));
        assert!(matches!(parse_xpath("a | b | c").unwrap(), Expr::Union(..)));
    }

    #[rstest]
    #[case("")]
    #[case("/a[")]
    #[case("1 +")]
    #[case("'unterminated")]
    #[case("a/")]
    fn syntax_errors(#[case] input: &str) {
        assert!(matches!(parse_xpath(input), Err(FilterError::Syntax(_))), "{input}");
    }
}
