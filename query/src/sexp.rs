//! S-expression reader.
//!
//! Produces an untyped tree; names and types are resolved by the compiler.

use chumsky::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    List(Vec<Sexp>),
    Str(String),
    Int(i64),
    Bool(bool),
    Symbol(String),
}

/// Parser for a single s-expression without surrounding whitespace.
pub fn reader() -> impl Parser<char, Sexp, Error = Simple<char>> + Clone {
    recursive(|sexp| {
        let escape = just('\\').ignore_then(choice((
            just('\\'),
            just('"'),
            just('n').to('\n'),
            just('t').to('\t'),
        )));

        let string = none_of("\\\"")
            .or(escape)
            .repeated()
            .delimited_by(just('"'), just('"'))
            .collect::<String>()
            .map(Sexp::Str);

        let atom = filter(|c: &char| !c.is_whitespace() && !matches!(c, '(' | ')' | '"'))
            .repeated()
            .at_least(1)
            .collect::<String>()
            .map(classify_atom);

        // `padded` on the closing paren also covers `( )`.
        let list = sexp
            .padded()
            .repeated()
            .delimited_by(just('('), just(')').padded())
            .map(Sexp::List);

        choice((list, string, atom))
    })
}

/// Reads exactly one expression; surrounding whitespace is allowed.
pub fn read(source: &str) -> Result<Sexp, Vec<Simple<char>>> {
    reader().padded().then_ignore(end()).parse(source)
}

fn classify_atom(atom: String) -> Sexp {
    match atom.as_str() {
        "#t" => Sexp::Bool(true),
        "#f" => Sexp::Bool(false),
        _ => match atom.parse::<i64>() {
            Ok(n) => Sexp::Int(n),
            Err(_) => Sexp::Symbol(atom),
        },
    }
}

/// One-line description of a reader error.
pub(crate) fn describe_error(error: &Simple<char>) -> String {
    let found = error
        .found()
        .map(|c| format!("'{c}'"))
        .unwrap_or_else(|| "end of input".to_string());

    let mut expected: Vec<String> = error
        .expected()
        .map(|e| match e {
            Some(c) => format!("'{c}'"),
            None => "end of input".to_string(),
        })
        .collect();
    expected.sort();
    expected.dedup();

    if expected.is_empty() {
        format!("unexpected {found}")
    } else {
        format!("unexpected {found}, expected {}", expected.join(" or "))
    }
}
