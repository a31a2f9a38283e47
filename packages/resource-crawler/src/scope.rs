//! Scope predicates: composable capability matching over resources.
//!
//! A [`Predicate`] is an explicit tree of `All` / `Any` / `Not` nodes over
//! named leaf checks. Nested groups of the same operator are flattened when
//! built, and evaluation short-circuits. A leaf that reads a missing field
//! simply evaluates to `false`.
//!
//! ```ignore
//! use resource_crawler::scope::{all_of, not, type_equals, meta_truthy};
//!
//! let fresh_pages = all_of([type_equals("html"), not(meta_truthy("stale"))]);
//! ```

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::handler::Handler;
use crate::resource::Resource;

type LeafFn = Arc<dyn Fn(&Resource) -> bool + Send + Sync>;

/// A capability scope.
#[derive(Clone)]
pub enum Predicate {
    /// Matches everything. The scope of a handler declared without one.
    Always,
    /// Matches nothing.
    Never,
    Leaf { name: String, check: LeafFn },
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    /// Named leaf over an arbitrary check.
    pub fn leaf<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Resource) -> bool + Send + Sync + 'static,
    {
        Predicate::Leaf {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn eval(&self, resource: &Resource) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::Leaf { check, .. } => check(resource),
            Predicate::Not(inner) => !inner.eval(resource),
            Predicate::All(ps) => ps.iter().all(|p| p.eval(resource)),
            Predicate::Any(ps) => ps.iter().any(|p| p.eval(resource)),
        }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        all_of([self, other])
    }

    pub fn or(self, other: Predicate) -> Predicate {
        any_of([self, other])
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        not(self)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => f.write_str("Always"),
            Predicate::Never => f.write_str("Never"),
            Predicate::Leaf { name, .. } => write!(f, "{name}"),
            Predicate::Not(inner) => write!(f, "Not({inner:?})"),
            Predicate::All(ps) => f.debug_tuple("All").field(ps).finish(),
            Predicate::Any(ps) => f.debug_tuple("Any").field(ps).finish(),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::Always
    }
}

// =============================================================================
// Combinators
// =============================================================================

/// Conjunction. Nested `All` groups are spliced in and `Always` terms dropped.
pub fn all_of(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    let mut terms = Vec::new();
    for p in predicates {
        match p {
            Predicate::Always => {}
            Predicate::Never => return Predicate::Never,
            Predicate::All(inner) => terms.extend(inner),
            other => terms.push(other),
        }
    }
    match terms.len() {
        0 => Predicate::Always,
        1 => terms.remove(0),
        _ => Predicate::All(terms),
    }
}

/// Disjunction. Nested `Any` groups are spliced in and `Never` terms dropped.
pub fn any_of(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    let mut terms = Vec::new();
    for p in predicates {
        match p {
            Predicate::Never => {}
            Predicate::Always => return Predicate::Always,
            Predicate::Any(inner) => terms.extend(inner),
            other => terms.push(other),
        }
    }
    match terms.len() {
        0 => Predicate::Never,
        1 => terms.remove(0),
        _ => Predicate::Any(terms),
    }
}

pub fn not(predicate: Predicate) -> Predicate {
    match predicate {
        Predicate::Always => Predicate::Never,
        Predicate::Never => Predicate::Always,
        Predicate::Not(inner) => *inner,
        other => Predicate::Not(Box::new(other)),
    }
}

// =============================================================================
// Leaves
// =============================================================================

pub fn type_equals(kind: impl Into<String>) -> Predicate {
    let kind = kind.into();
    Predicate::leaf(format!("type == {kind:?}"), move |r| r.kind == kind)
}

pub fn meta_equals(key: impl Into<String>, value: impl Into<Value>) -> Predicate {
    let key = key.into();
    let value = value.into();
    Predicate::leaf(format!("meta.{key} == {value}"), move |r| {
        r.meta_value(&key) == Some(&value)
    })
}

/// True when `meta[key]` exists and is truthy.
pub fn meta_truthy(key: impl Into<String>) -> Predicate {
    let key = key.into();
    Predicate::leaf(format!("meta.{key}"), move |r| {
        r.meta_value(&key).is_some_and(is_truthy)
    })
}

/// True when `meta[key]` is a string matching `pattern`.
pub fn meta_matches(key: impl Into<String>, pattern: Regex) -> Predicate {
    let key = key.into();
    Predicate::leaf(format!("meta.{key} ~ /{pattern}/"), move |r| {
        r.meta_str(&key).is_some_and(|s| pattern.is_match(s))
    })
}

/// True when the payload is an object whose `key` field is truthy.
pub fn data_field_truthy(key: impl Into<String>) -> Predicate {
    let key = key.into();
    Predicate::leaf(format!("data.{key}"), move |r| {
        r.data.field(&key).is_some_and(is_truthy)
    })
}

pub fn custom<F>(name: impl Into<String>, check: F) -> Predicate
where
    F: Fn(&Resource) -> bool + Send + Sync + 'static,
{
    Predicate::leaf(name, check)
}

/// True for resources produced by exactly this handler instance.
///
/// Requires both the persisted parent fingerprint and the transient handler
/// identity to match, so resources produced by an earlier process (or
/// inserted externally) never satisfy it.
pub fn produced_by(handler: &Handler) -> Predicate {
    let fingerprint = handler.fingerprint().clone();
    let id = handler.id();
    Predicate::leaf(format!("produced_by({})", handler.name()), move |r| {
        r.parent_handler_fingerprint.as_ref() == Some(&fingerprint)
            && r.lineage.produced_by == Some(id)
    })
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn res(kind: &str) -> Resource {
        Resource::seed(ResourceDescriptor::new(kind))
    }

    #[test]
    fn all_of_flattens_nested_groups() {
        let p = all_of([
            type_equals("a"),
            all_of([meta_truthy("x"), meta_truthy("y")]),
            Predicate::Always,
        ]);
        match p {
            Predicate::All(terms) => assert_eq!(terms.len(), 3),
            other => panic!("expected All, got {other:?}"),
        }
    }

    #[test]
    fn any_of_flattens_and_collapses() {
        let p = any_of([any_of([type_equals("a"), type_equals("b")]), type_equals("c")]);
        match &p {
            Predicate::Any(terms) => assert_eq!(terms.len(), 3),
            other => panic!("expected Any, got {other:?}"),
        }
        assert!(matches!(any_of([type_equals("a")]), Predicate::Leaf { .. }));
        assert!(matches!(any_of(Vec::new()), Predicate::Never));
        assert!(matches!(all_of(Vec::new()), Predicate::Always));
    }

    #[test]
    fn evaluation_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let counted = custom("counted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let p = all_of([type_equals("a"), counted.clone()]);
        assert!(!p.eval(&res("b")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let p = any_of([type_equals("a"), counted]);
        assert!(p.eval(&res("a")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_fields_fail_rather_than_panic() {
        let r = res("a");
        assert!(!meta_truthy("nope").eval(&r));
        assert!(!meta_equals("nope", 1).eval(&r));
        assert!(!meta_matches("nope", Regex::new(".*").unwrap()).eval(&r));
        assert!(!data_field_truthy("nope").eval(&r));
    }

    #[test]
    fn not_inverts_and_double_not_cancels() {
        let r = res("a");
        assert!(!not(type_equals("a")).eval(&r));
        assert!(matches!(not(not(type_equals("a"))), Predicate::Leaf { .. }));
        assert!(type_equals("b").not().eval(&r));
    }

    #[test]
    fn meta_leaves() {
        let r = Resource::seed(
            ResourceDescriptor::new("page")
                .with_meta("contentType", "text/html; charset=utf-8")
                .with_meta("resolved", true)
                .with_meta("count", 0),
        );
        assert!(meta_truthy("resolved").eval(&r));
        assert!(!meta_truthy("count").eval(&r));
        assert!(meta_equals("count", 0).eval(&r));
        assert!(meta_matches("contentType", Regex::new("^text/html").unwrap()).eval(&r));
        assert!(type_equals("page").and(meta_truthy("resolved")).eval(&r));
        assert!(type_equals("x").or(meta_truthy("resolved")).eval(&r));
    }

    #[test]
    fn produced_by_requires_fingerprint_and_identity() {
        use crate::handler::{HandlerSpec, TransformOutput};

        let handler =
            HandlerSpec::from_sync_fn("a", "1", |_| Ok(TransformOutput::Nothing)).finalize();
        let twin = HandlerSpec::from_sync_fn("a", "1", |_| Ok(TransformOutput::Nothing)).finalize();
        let parent = res("seed");

        let child = Resource::child_of(
            ResourceDescriptor::new("b"),
            &parent,
            handler.fingerprint(),
            handler.id(),
        );
        assert!(produced_by(&handler).eval(&child));
        assert!(!produced_by(&twin).eval(&child));

        let mut external = child.clone();
        external.lineage.produced_by = None;
        assert!(!produced_by(&handler).eval(&external));
    }
}
