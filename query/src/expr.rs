//! Compiled expression trees.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    String,
    Time,
    Int,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "boolean",
            ValueType::String => "string",
            ValueType::Time => "time",
            ValueType::Int => "integer",
        };
        f.write_str(name)
    }
}

/// Which field a field test looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelector {
    /// Every field of the table's any-field list, first match wins.
    Any,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTest {
    Contains,
    Is,
    BeginsWith,
    EndsWith,
}

impl TextTest {
    /// Both sides are expected to be lowercased already.
    pub fn matches(self, haystack: &str, needle: &str) -> bool {
        match self {
            TextTest::Contains => haystack.contains(needle),
            TextTest::Is => haystack == needle,
            TextTest::BeginsWith => haystack.starts_with(needle),
            TextTest::EndsWith => haystack.ends_with(needle),
        }
    }
}

/// Time-valued subexpression, in UNIX seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeExpr {
    At(i64),
    Now,
    DayBegin(Box<TimeExpr>),
    DayEnd(Box<TimeExpr>),
    AddDays(Box<TimeExpr>, i64),
}

/// Boolean-valued node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Const(bool),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    /// `needle` is stored lowercased.
    Text {
        test: TextTest,
        field: FieldSelector,
        needle: String,
    },
    Exists(FieldSelector),
    OccursIn {
        start: TimeExpr,
        end: TimeExpr,
    },
    /// `None` asks for records without categories.
    HasCategories(Option<Vec<String>>),
    HasAlarms(Box<Node>),
    IsCompleted,
    CompletedBefore(TimeExpr),
}

/// A compiled query. Cloning is cheap and the tree is shared across threads.
#[derive(Debug, Clone)]
pub struct Expression {
    root: Arc<Node>,
    any_fields: Arc<[String]>,
    source: Arc<str>,
}

impl Expression {
    pub(crate) fn new(root: Node, any_fields: &[String], source: &str) -> Self {
        Self {
            root: Arc::new(root),
            any_fields: any_fields.into(),
            source: source.into(),
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Fields tried, in order, by any-field tests.
    pub fn any_fields(&self) -> &[String] {
        &self.any_fields
    }

    /// The query text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.any_fields == other.any_fields
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
