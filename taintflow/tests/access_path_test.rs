//! Access Path Tests
//!
//! Parameter normalization and call-site argument matching.

use compact_str::CompactString;

use taintflow::access_path::{
    match_actuals_to_formals, normalize_parameters, Formal, PathLabel, Root,
};

fn parse_def(source: &str) -> ruff_python_ast::StmtFunctionDef {
    let parsed = ruff_python_parser::parse_module(source).expect("parse");
    let module = parsed.into_syntax();
    match module.body.into_iter().next() {
        Some(ruff_python_ast::Stmt::FunctionDef(func)) => func,
        _ => panic!("expected a function definition"),
    }
}

fn parse_call(source: &str) -> ruff_python_ast::ExprCall {
    let parsed = ruff_python_parser::parse_module(source).expect("parse");
    let module = parsed.into_syntax();
    match module.body.into_iter().next() {
        Some(ruff_python_ast::Stmt::Expr(expr)) => match *expr.value {
            ruff_python_ast::Expr::Call(call) => call,
            _ => panic!("expected a call"),
        },
        _ => panic!("expected an expression statement"),
    }
}

fn formals_of(source: &str) -> Vec<Formal> {
    let func = parse_def(source);
    normalize_parameters(&func.parameters)
        .iter()
        .map(|param| Formal {
            root: param.root.clone(),
            name: param.name.clone(),
        })
        .collect()
}

#[test]
fn normalize_assigns_positions_and_star_roots() {
    let formals = formals_of("def f(a, b, *rest, key=None, **extra): ...\n");
    assert_eq!(formals.len(), 5);
    assert_eq!(
        formals[0].root,
        Root::PositionalParameter {
            position: 0,
            name: CompactString::from("a")
        }
    );
    assert_eq!(
        formals[1].root,
        Root::PositionalParameter {
            position: 1,
            name: CompactString::from("b")
        }
    );
    assert_eq!(formals[2].root, Root::StarParameter);
    assert_eq!(
        formals[3].root,
        Root::NamedParameter(CompactString::from("key"))
    );
    assert_eq!(formals[4].root, Root::StarStarParameter);
}

#[test]
fn positional_arguments_align_in_order() {
    let formals = formals_of("def f(a, b): ...\n");
    let call = parse_call("f(x, y)\n");
    let matched = match_actuals_to_formals(&call.arguments, &formals);

    assert_eq!(matched.len(), 2);
    assert_eq!(matched[0].matches.len(), 1);
    assert_eq!(matched[0].matches[0].root, formals[0].root);
    assert_eq!(matched[1].matches[0].root, formals[1].root);
}

#[test]
fn keywords_match_by_name() {
    let formals = formals_of("def f(a, b): ...\n");
    let call = parse_call("f(b=y, a=x)\n");
    let matched = match_actuals_to_formals(&call.arguments, &formals);

    assert_eq!(matched[0].keyword.as_deref(), Some("b"));
    assert_eq!(matched[0].matches[0].root, formals[1].root);
    assert_eq!(matched[1].matches[0].root, formals[0].root);
}

#[test]
fn unknown_keyword_falls_back_to_star_star() {
    let formals = formals_of("def f(a, **extra): ...\n");
    let call = parse_call("f(x, other=y)\n");
    let matched = match_actuals_to_formals(&call.arguments, &formals);

    let other = &matched[1];
    assert_eq!(other.matches.len(), 1);
    assert_eq!(other.matches[0].root, Root::StarStarParameter);
    assert_eq!(
        other.matches[0].actual_path.as_slice(),
        &[PathLabel::Field(CompactString::from("other"))]
    );
}

#[test]
fn starred_actual_unfolds_over_remaining_positionals() {
    let formals = formals_of("def f(a, b, c): ...\n");
    let call = parse_call("f(x, *rest)\n");
    let matched = match_actuals_to_formals(&call.arguments, &formals);

    // `x` binds a; `*rest` covers b and c, element-wise.
    assert_eq!(matched[0].matches[0].root, formals[0].root);
    let star = &matched[1];
    assert_eq!(star.matches.len(), 2);
    assert!(star
        .matches
        .iter()
        .all(|m| m.actual_path.as_slice() == [PathLabel::AnyIndex]));
}

#[test]
fn overflow_positionals_reach_star_parameter() {
    let formals = formals_of("def f(a, *rest): ...\n");
    let call = parse_call("f(x, y, z)\n");
    let matched = match_actuals_to_formals(&call.arguments, &formals);

    assert_eq!(matched[1].matches[0].root, Root::StarParameter);
    assert_eq!(
        matched[1].matches[0].actual_path.as_slice(),
        &[PathLabel::Index(0)]
    );
    assert_eq!(
        matched[2].matches[0].actual_path.as_slice(),
        &[PathLabel::Index(1)]
    );
}

#[test]
fn double_star_actual_feeds_named_formals() {
    let formals = formals_of("def f(a, b): ...\n");
    let call = parse_call("f(**mapping)\n");
    let matched = match_actuals_to_formals(&call.arguments, &formals);

    assert_eq!(matched.len(), 1);
    let paths: Vec<_> = matched[0]
        .matches
        .iter()
        .map(|m| m.actual_path.as_slice().to_vec())
        .collect();
    assert!(paths.contains(&vec![PathLabel::Field(CompactString::from("a"))]));
    assert!(paths.contains(&vec![PathLabel::Field(CompactString::from("b"))]));
}

#[test]
fn argument_order_is_preserved() {
    let formals = formals_of("def f(a, b, c): ...\n");
    let call = parse_call("f(x, c=z, b=y)\n");
    let matched = match_actuals_to_formals(&call.arguments, &formals);
    let keywords: Vec<Option<&str>> = matched.iter().map(|m| m.keyword.as_deref()).collect();
    assert_eq!(keywords, vec![None, Some("c"), Some("b")]);
}
