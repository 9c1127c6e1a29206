//! Predicate tables: which names a dialect understands.

use crate::expr::ValueType;
use almanac_core::types::fields;
use std::collections::HashMap;

/// Field name that matches when any of the table's searchable fields does.
pub const ANY_FIELD: &str = "x-evolution-any-field";

const CONTACT_ANY_FIELDS: &[&str] = &[
    fields::FULL_NAME,
    fields::GIVEN_NAME,
    fields::FAMILY_NAME,
    fields::NICKNAME,
    fields::FILE_AS,
    fields::EMAIL,
    fields::PHONE,
    fields::ORG,
    fields::TITLE,
    fields::URL,
    fields::NOTE,
    fields::CATEGORIES,
];

const CALENDAR_ANY_FIELDS: &[&str] = &[
    fields::SUMMARY,
    fields::DESCRIPTION,
    fields::COMMENT,
    fields::LOCATION,
    fields::ATTENDEE,
    fields::ORGANIZER,
    fields::CATEGORIES,
];

/// Every operation the evaluator knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    And,
    Or,
    Not,
    Contains,
    Is,
    BeginsWith,
    EndsWith,
    Exists,
    OccurInTimeRange,
    HasCategories,
    HasAlarms,
    IsCompleted,
    CompletedBefore,
    TimeNow,
    MakeTime,
    TimeDayBegin,
    TimeDayEnd,
    TimeAddDay,
}

/// Argument and result types of a builtin.
///
/// A builtin with `rest` accepts any number of extra arguments of that type
/// after the fixed `params`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [ValueType],
    pub rest: Option<ValueType>,
    pub returns: ValueType,
}

impl Signature {
    const fn fixed(params: &'static [ValueType], returns: ValueType) -> Self {
        Self {
            params,
            rest: None,
            returns,
        }
    }

    const fn variadic(
        params: &'static [ValueType],
        rest: ValueType,
        returns: ValueType,
    ) -> Self {
        Self {
            params,
            rest: Some(rest),
            returns,
        }
    }

    pub fn accepts_count(&self, count: usize) -> bool {
        match self.rest {
            None => count == self.params.len(),
            Some(_) => count >= self.params.len(),
        }
    }

    /// Human-readable arity, used in error messages.
    pub fn arity(&self) -> String {
        match self.rest {
            None => self.params.len().to_string(),
            Some(_) => format!("at least {}", self.params.len()),
        }
    }
}

impl Builtin {
    pub fn signature(self) -> Signature {
        use ValueType::{Bool, Int, String, Time};

        match self {
            Builtin::And | Builtin::Or => Signature::variadic(&[], Bool, Bool),
            Builtin::Not => Signature::fixed(&[Bool], Bool),
            Builtin::Contains | Builtin::Is | Builtin::BeginsWith | Builtin::EndsWith => {
                Signature::fixed(&[String, String], Bool)
            }
            Builtin::Exists => Signature::fixed(&[String], Bool),
            Builtin::OccurInTimeRange => Signature::fixed(&[Time, Time], Bool),
            // `(has-categories #f)` is special-cased by the compiler.
            Builtin::HasCategories => Signature::variadic(&[String], String, Bool),
            Builtin::HasAlarms => Signature::fixed(&[Bool], Bool),
            Builtin::IsCompleted => Signature::fixed(&[], Bool),
            Builtin::CompletedBefore => Signature::fixed(&[Time], Bool),
            Builtin::TimeNow => Signature::fixed(&[], Time),
            Builtin::MakeTime => Signature::fixed(&[String], Time),
            Builtin::TimeDayBegin | Builtin::TimeDayEnd => Signature::fixed(&[Time], Time),
            Builtin::TimeAddDay => Signature::fixed(&[Time, Int], Time),
        }
    }
}

/// Name resolution for one query dialect.
///
/// Tables are plain values: build one of the stock dialects and register
/// extra names on top of it as needed.
#[derive(Debug, Clone)]
pub struct PredicateTable {
    names: HashMap<String, Builtin>,
    any_fields: Vec<String>,
}

impl PredicateTable {
    /// Combinators, field tests and time helpers; no calendar predicates.
    ///
    /// `any_fields` is the order in which [`ANY_FIELD`] tries fields.
    pub fn new<I, S>(any_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self {
            names: HashMap::new(),
            any_fields: any_fields.into_iter().map(Into::into).collect(),
        };
        for (name, builtin) in [
            ("and", Builtin::And),
            ("or", Builtin::Or),
            ("not", Builtin::Not),
            ("contains", Builtin::Contains),
            ("is", Builtin::Is),
            ("beginswith", Builtin::BeginsWith),
            ("endswith", Builtin::EndsWith),
            ("exists", Builtin::Exists),
            ("time-now", Builtin::TimeNow),
            ("make-time", Builtin::MakeTime),
            ("time-day-begin", Builtin::TimeDayBegin),
            ("time-day-end", Builtin::TimeDayEnd),
            ("time-add-day", Builtin::TimeAddDay),
        ] {
            table.register(name, builtin);
        }
        table
    }

    pub fn contacts() -> Self {
        Self::new(CONTACT_ANY_FIELDS.iter().copied())
    }

    /// Calendar dialect, including the `?`-suffixed spellings.
    pub fn calendar() -> Self {
        let mut table = Self::new(CALENDAR_ANY_FIELDS.iter().copied());
        for (name, builtin) in [
            ("occur-in-time-range", Builtin::OccurInTimeRange),
            ("has-categories", Builtin::HasCategories),
            ("has-alarms", Builtin::HasAlarms),
            ("is-completed", Builtin::IsCompleted),
            ("completed-before", Builtin::CompletedBefore),
        ] {
            table.register(name, builtin);
        }

        for name in [
            "contains",
            "is",
            "beginswith",
            "endswith",
            "exists",
            "has-categories",
            "has-alarms",
            "is-completed",
            "completed-before",
            "occur-in-time-range",
        ] {
            if let Some(builtin) = table.resolve(name) {
                table.register(format!("{name}?"), builtin);
            }
        }
        table
    }

    /// Adds or replaces a name. Returns the builtin it previously resolved to.
    pub fn register(&mut self, name: impl Into<String>, builtin: Builtin) -> Option<Builtin> {
        self.names.insert(name.into(), builtin)
    }

    /// Builder-style [`PredicateTable::register`].
    pub fn with(mut self, name: impl Into<String>, builtin: Builtin) -> Self {
        self.register(name, builtin);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Builtin> {
        self.names.get(name).copied()
    }

    pub fn any_fields(&self) -> &[String] {
        &self.any_fields
    }
}
