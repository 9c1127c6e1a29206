//! Query text to [`Expression`].

use crate::expr::{Expression, FieldSelector, Node, TextTest, TimeExpr, ValueType};
use crate::sexp::{self, Sexp};
use crate::table::{ANY_FIELD, Builtin, PredicateTable};
use crate::time;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("expected a predicate name, found {found}")]
    MissingPredicate { found: &'static str },

    #[error("unexpected symbol: {0}")]
    UnexpectedSymbol(String),

    #[error("unknown predicate: {0}")]
    UnknownPredicate(String),

    #[error("{name} expects {expected} argument(s), found {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("{name}: argument {position} must be {expected}, found {found}")]
    TypeMismatch {
        name: String,
        position: usize,
        expected: ValueType,
        found: ValueType,
    },

    #[error("invalid time literal: {0:?}")]
    InvalidTime(String),

    #[error("query must be boolean, found {0}")]
    NotBoolean(ValueType),
}

/// Intermediate result of lowering one subexpression.
enum Typed {
    Bool(Node),
    Str(String),
    Time(TimeExpr),
    Int(i64),
}

impl Typed {
    fn value_type(&self) -> ValueType {
        match self {
            Typed::Bool(_) => ValueType::Bool,
            Typed::Str(_) => ValueType::String,
            Typed::Time(_) => ValueType::Time,
            Typed::Int(_) => ValueType::Int,
        }
    }
}

/// Compiles query strings against one [`PredicateTable`].
#[derive(Debug, Clone)]
pub struct Compiler {
    table: PredicateTable,
}

impl Compiler {
    pub fn new(table: PredicateTable) -> Self {
        Self { table }
    }

    pub fn contacts() -> Self {
        Self::new(PredicateTable::contacts())
    }

    pub fn calendar() -> Self {
        Self::new(PredicateTable::calendar())
    }

    pub fn table(&self) -> &PredicateTable {
        &self.table
    }

    /// Parses and type-checks `source`. Nothing is retained on failure.
    pub fn compile(&self, source: &str) -> Result<Expression, CompileError> {
        let result = self.compile_inner(source);
        match &result {
            Ok(_) => debug!(query = source, "compiled query"),
            Err(e) => debug!(query = source, error = %e, "query rejected"),
        }
        result
    }

    fn compile_inner(&self, source: &str) -> Result<Expression, CompileError> {
        let tree = sexp::read(source).map_err(|errors| match errors.first() {
            Some(error) => CompileError::Syntax {
                offset: error.span().start,
                message: sexp::describe_error(error),
            },
            None => CompileError::Syntax {
                offset: 0,
                message: "unreadable query".to_string(),
            },
        })?;

        match self.lower(&tree)? {
            Typed::Bool(root) => Ok(Expression::new(root, self.table.any_fields(), source)),
            other => Err(CompileError::NotBoolean(other.value_type())),
        }
    }

    fn lower(&self, tree: &Sexp) -> Result<Typed, CompileError> {
        match tree {
            Sexp::Bool(b) => Ok(Typed::Bool(Node::Const(*b))),
            Sexp::Str(s) => Ok(Typed::Str(s.clone())),
            Sexp::Int(n) => Ok(Typed::Int(*n)),
            Sexp::Symbol(s) => Err(CompileError::UnexpectedSymbol(s.clone())),
            Sexp::List(items) => self.lower_call(items),
        }
    }

    fn lower_call(&self, items: &[Sexp]) -> Result<Typed, CompileError> {
        let (name, args) = match items.split_first() {
            Some((Sexp::Symbol(name), args)) => (name.as_str(), args),
            Some((other, _)) => {
                return Err(CompileError::MissingPredicate {
                    found: kind_of(other),
                });
            }
            None => return Err(CompileError::MissingPredicate { found: "nothing" }),
        };

        let builtin = self
            .table
            .resolve(name)
            .ok_or_else(|| CompileError::UnknownPredicate(name.to_string()))?;

        if builtin == Builtin::HasCategories && matches!(args, [Sexp::Bool(false)]) {
            return Ok(Typed::Bool(Node::HasCategories(None)));
        }

        let signature = builtin.signature();
        if !signature.accepts_count(args.len()) {
            return Err(CompileError::Arity {
                name: name.to_string(),
                expected: signature.arity(),
                found: args.len(),
            });
        }

        let args = Args {
            compiler: self,
            name,
            args,
        };

        let typed = match builtin {
            Builtin::And => Typed::Bool(Node::And(args.all_bools()?)),
            Builtin::Or => Typed::Bool(Node::Or(args.all_bools()?)),
            Builtin::Not => Typed::Bool(Node::Not(Box::new(args.bool(0)?))),
            Builtin::Contains => args.text_test(TextTest::Contains)?,
            Builtin::Is => args.text_test(TextTest::Is)?,
            Builtin::BeginsWith => args.text_test(TextTest::BeginsWith)?,
            Builtin::EndsWith => args.text_test(TextTest::EndsWith)?,
            Builtin::Exists => Typed::Bool(Node::Exists(selector(args.string(0)?))),
            Builtin::OccurInTimeRange => Typed::Bool(Node::OccursIn {
                start: args.time(0)?,
                end: args.time(1)?,
            }),
            Builtin::HasCategories => {
                let wanted = (0..args.len())
                    .map(|i| args.string(i))
                    .collect::<Result<Vec<_>, _>>()?;
                Typed::Bool(Node::HasCategories(Some(wanted)))
            }
            Builtin::HasAlarms => Typed::Bool(Node::HasAlarms(Box::new(args.bool(0)?))),
            Builtin::IsCompleted => Typed::Bool(Node::IsCompleted),
            Builtin::CompletedBefore => Typed::Bool(Node::CompletedBefore(args.time(0)?)),
            Builtin::TimeNow => Typed::Time(TimeExpr::Now),
            Builtin::MakeTime => {
                let literal = args.string(0)?;
                let at = time::parse_time(&literal).ok_or(CompileError::InvalidTime(literal))?;
                Typed::Time(TimeExpr::At(at))
            }
            Builtin::TimeDayBegin => Typed::Time(TimeExpr::DayBegin(Box::new(args.time(0)?))),
            Builtin::TimeDayEnd => Typed::Time(TimeExpr::DayEnd(Box::new(args.time(0)?))),
            Builtin::TimeAddDay => {
                Typed::Time(TimeExpr::AddDays(Box::new(args.time(0)?), args.int(1)?))
            }
        };
        Ok(typed)
    }
}

/// Arguments of one application, lowered and type-checked on demand.
struct Args<'a> {
    compiler: &'a Compiler,
    name: &'a str,
    args: &'a [Sexp],
}

impl Args<'_> {
    fn len(&self) -> usize {
        self.args.len()
    }

    fn lower(&self, index: usize) -> Result<Typed, CompileError> {
        match self.args.get(index) {
            Some(arg) => self.compiler.lower(arg),
            None => Err(CompileError::Arity {
                name: self.name.to_string(),
                expected: (index + 1).to_string(),
                found: self.args.len(),
            }),
        }
    }

    fn mismatch(&self, index: usize, expected: ValueType, found: &Typed) -> CompileError {
        CompileError::TypeMismatch {
            name: self.name.to_string(),
            position: index + 1,
            expected,
            found: found.value_type(),
        }
    }

    fn bool(&self, index: usize) -> Result<Node, CompileError> {
        match self.lower(index)? {
            Typed::Bool(node) => Ok(node),
            other => Err(self.mismatch(index, ValueType::Bool, &other)),
        }
    }

    fn all_bools(&self) -> Result<Vec<Node>, CompileError> {
        (0..self.len()).map(|i| self.bool(i)).collect()
    }

    fn string(&self, index: usize) -> Result<String, CompileError> {
        match self.lower(index)? {
            Typed::Str(s) => Ok(s),
            other => Err(self.mismatch(index, ValueType::String, &other)),
        }
    }

    fn time(&self, index: usize) -> Result<TimeExpr, CompileError> {
        match self.lower(index)? {
            Typed::Time(t) => Ok(t),
            other => Err(self.mismatch(index, ValueType::Time, &other)),
        }
    }

    fn int(&self, index: usize) -> Result<i64, CompileError> {
        match self.lower(index)? {
            Typed::Int(n) => Ok(n),
            other => Err(self.mismatch(index, ValueType::Int, &other)),
        }
    }

    fn text_test(&self, test: TextTest) -> Result<Typed, CompileError> {
        let field = selector(self.string(0)?);
        let needle = self.string(1)?.to_lowercase();
        Ok(Typed::Bool(Node::Text {
            test,
            field,
            needle,
        }))
    }
}

fn selector(field: String) -> FieldSelector {
    if field == ANY_FIELD {
        FieldSelector::Any
    } else {
        FieldSelector::Named(field)
    }
}

fn kind_of(tree: &Sexp) -> &'static str {
    match tree {
        Sexp::List(_) => "a list",
        Sexp::Str(_) => "a string",
        Sexp::Int(_) => "an integer",
        Sexp::Bool(_) => "a boolean",
        Sexp::Symbol(_) => "a symbol",
    }
}
