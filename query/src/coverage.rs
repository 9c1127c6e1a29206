use crate::expr::{Expression, FieldSelector, Node};

/// Whether `expression` can be answered from cached fields alone.
///
/// True when every field test in the tree is a text test on one of
/// `covered` fields, at any depth under `and`, `or` and `not`. Boolean
/// constants are answerable; `exists`, any-field tests and calendar
/// predicates are not.
pub fn is_summary_answerable(expression: &Expression, covered: &[&str]) -> bool {
    answerable(expression.root(), covered)
}

fn answerable(node: &Node, covered: &[&str]) -> bool {
    match node {
        Node::Const(_) => true,
        Node::And(children) | Node::Or(children) => {
            children.iter().all(|child| answerable(child, covered))
        }
        Node::Not(inner) => answerable(inner, covered),
        Node::Text {
            field: FieldSelector::Named(name),
            ..
        } => covered.contains(&name.as_str()),
        Node::Text {
            field: FieldSelector::Any,
            ..
        }
        | Node::Exists(_)
        | Node::OccursIn { .. }
        | Node::HasCategories(_)
        | Node::HasAlarms(_)
        | Node::IsCompleted
        | Node::CompletedBefore(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Compiler;

    const COVERED: &[&str] = &["id", "full_name", "email"];

    fn answerable_query(query: &str) -> bool {
        let expression = Compiler::calendar().compile(query).unwrap();
        is_summary_answerable(&expression, COVERED)
    }

    #[test]
    fn text_tests_on_covered_fields() {
        assert!(answerable_query(r#"(contains "full_name" "foo")"#));
        assert!(answerable_query(r#"(is "id" "42")"#));
        assert!(answerable_query(r#"(beginswith "email" "a")"#));
        assert!(answerable_query(r#"(endswith? "email" ".org")"#));
    }

    #[test]
    fn uncovered_field_is_not_answerable() {
        assert!(!answerable_query(r#"(contains "note" "foo")"#));
    }

    #[test]
    fn recurses_through_combinators() {
        assert!(answerable_query(
            r#"(and (is "id" "42") (or (not (contains "full_name" "x")) #f))"#
        ));
        assert!(!answerable_query(
            r#"(or (is "id" "42") (not (contains "note" "x")))"#
        ));
    }

    #[test]
    fn constants_are_answerable() {
        assert!(answerable_query("#t"));
        assert!(answerable_query("(and)"));
    }

    #[test]
    fn other_predicates_are_not() {
        assert!(!answerable_query(r#"(exists "email")"#));
        assert!(!answerable_query(r#"(contains "x-evolution-any-field" "a")"#));
        assert!(!answerable_query("(is-completed)"));
        assert!(!answerable_query(
            r#"(and (is "id" "1") (occur-in-time-range (time-now) (time-add-day (time-now) 1)))"#
        ));
    }
}
