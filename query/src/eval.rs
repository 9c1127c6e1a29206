//! Expression evaluation against single records.

use crate::expr::{Expression, FieldSelector, Node, TextTest, TimeExpr};
use crate::time;
use almanac_core::types::{FieldView, Record, fields};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Half-open time span `[start, end)` in UNIX seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// An empty interval is an instant and intersects spans that contain it.
    pub fn intersects(&self, other: &Interval) -> bool {
        if self.start >= self.end {
            other.start <= self.start && self.start < other.end
        } else {
            self.start < other.end && other.start < self.end
        }
    }
}

/// Expands a record into the intervals at which it occurs.
///
/// Recurrence rules are not interpreted here; embedders that understand them
/// plug in their own source.
pub trait OccurrenceSource: Send + Sync {
    /// Feeds occurrences of `record` to `visit` until it breaks. `window` is a
    /// hint; yielding occurrences outside it is allowed.
    fn for_each_occurrence(
        &self,
        record: &Record,
        window: Interval,
        visit: &mut dyn FnMut(Interval) -> ControlFlow<()>,
    );
}

/// Treats every record as occurring once, from `dtstart` to `dtend`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleOccurrence;

impl OccurrenceSource for SingleOccurrence {
    fn for_each_occurrence(
        &self,
        record: &Record,
        _window: Interval,
        visit: &mut dyn FnMut(Interval) -> ControlFlow<()>,
    ) {
        let Some(start) = record.text(fields::DTSTART).and_then(time::parse_time) else {
            return;
        };
        let end = record
            .text(fields::DTEND)
            .and_then(time::parse_time)
            .filter(|end| *end >= start)
            .unwrap_or(start);
        let _ = visit(Interval::new(start, end));
    }
}

/// Evaluation context: a fixed `now` and the recurrence expansion.
#[derive(Clone)]
pub struct Evaluator {
    now: i64,
    occurrences: Arc<dyn OccurrenceSource>,
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator").field("now", &self.now).finish()
    }
}

impl Evaluator {
    pub fn new(now: i64) -> Self {
        Self {
            now,
            occurrences: Arc::new(SingleOccurrence),
        }
    }

    pub fn at_current_time() -> Self {
        Self::new(time::now())
    }

    pub fn with_occurrences(mut self, occurrences: Arc<dyn OccurrenceSource>) -> Self {
        self.occurrences = occurrences;
        self
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn matches(&self, expression: &Expression, record: &Record) -> bool {
        let context = Context {
            now: self.now,
            occurrences: self.occurrences.as_ref(),
            any_fields: expression.any_fields(),
            record,
        };
        context.node(expression.root())
    }
}

/// [`Evaluator::matches`] with the default occurrence source.
pub fn evaluate(expression: &Expression, record: &Record, now: i64) -> bool {
    Evaluator::new(now).matches(expression, record)
}

struct Context<'a> {
    now: i64,
    occurrences: &'a dyn OccurrenceSource,
    any_fields: &'a [String],
    record: &'a Record,
}

impl Context<'_> {
    fn node(&self, node: &Node) -> bool {
        match node {
            Node::Const(b) => *b,
            Node::And(children) => children.iter().all(|child| self.node(child)),
            Node::Or(children) => children.iter().any(|child| self.node(child)),
            Node::Not(inner) => !self.node(inner),
            Node::Text {
                test,
                field,
                needle,
            } => self
                .fields(field)
                .any(|name| text_matches(self.record.lookup(name), *test, needle)),
            Node::Exists(field) => self
                .fields(field)
                .any(|name| exists(self.record.lookup(name))),
            Node::OccursIn { start, end } => {
                let window = Interval::new(self.time(start), self.time(end));
                let mut hit = false;
                self.occurrences
                    .for_each_occurrence(self.record, window, &mut |occurrence| {
                        if occurrence.intersects(&window) {
                            hit = true;
                            ControlFlow::Break(())
                        } else {
                            ControlFlow::Continue(())
                        }
                    });
                hit
            }
            Node::HasCategories(None) => !exists(self.record.lookup(fields::CATEGORIES)),
            Node::HasCategories(Some(wanted)) => {
                let present: Vec<&str> = self.record.lookup(fields::CATEGORIES).texts().collect();
                wanted.iter().all(|w| present.contains(&w.as_str()))
            }
            Node::HasAlarms(expected) => {
                let has_alarms = matches!(
                    self.record.lookup(fields::HAS_ALARMS),
                    FieldView::Flag(true)
                );
                has_alarms == self.node(expected)
            }
            Node::IsCompleted => self.completed_at().is_some(),
            Node::CompletedBefore(t) => self.completed_at().is_some_and(|at| at < self.time(t)),
        }
    }

    fn fields<'b>(&'b self, selector: &'b FieldSelector) -> impl Iterator<Item = &'b str> {
        let (named, any): (Option<&str>, &[String]) = match selector {
            FieldSelector::Named(name) => (Some(name), &[]),
            FieldSelector::Any => (None, self.any_fields),
        };
        named.into_iter().chain(any.iter().map(String::as_str))
    }

    fn time(&self, expr: &TimeExpr) -> i64 {
        match expr {
            TimeExpr::At(t) => *t,
            TimeExpr::Now => self.now,
            TimeExpr::DayBegin(inner) => time::day_begin(self.time(inner)),
            TimeExpr::DayEnd(inner) => time::day_end(self.time(inner)),
            TimeExpr::AddDays(inner, days) => time::add_days(self.time(inner), *days),
        }
    }

    fn completed_at(&self) -> Option<i64> {
        self.record
            .text(fields::COMPLETED)
            .and_then(time::parse_time)
    }
}

/// Absent fields and empty lists compare as the empty string.
fn text_matches(view: FieldView<'_>, test: TextTest, needle: &str) -> bool {
    let mut values = view.texts().peekable();
    if values.peek().is_none() {
        return test.matches("", needle);
    }
    values.any(|value| test.matches(&value.to_lowercase(), needle))
}

fn exists(view: FieldView<'_>) -> bool {
    match view {
        FieldView::Absent => false,
        FieldView::Text(s) => !s.is_empty(),
        FieldView::List(items) => items.iter().any(|item| !item.is_empty()),
        FieldView::Flag(_) => true,
    }
}
