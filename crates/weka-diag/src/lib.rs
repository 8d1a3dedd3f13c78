//! Error reporting and diagnostics for the Weka core.
//!
//! This crate provides structured diagnostics with source location
//! passthrough. The core is fail-fast: every error kind here is fatal at
//! the core boundary, and the external driver renders diagnostics against
//! the positions the parser attached to the AST.
//!
//! The key invariant: no unification variables leak into user-facing
//! output: callers print substituted, sanitized types.

use std::fmt;

// ---------------------------------------------------------------------------
// Severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

/// Broad category for diagnostics, mapping one-to-one onto the fatal
/// error kinds of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Substitution or application violates kinding.
    KindMismatch,
    /// Two distinct rigid constants unified.
    TypeMismatch,
    /// Infinite type attempted.
    OccursCheck,
    /// Context mentions variables absent from the head after reduction.
    AmbiguousOverload,
    /// The CHR solver produced more than one residual.
    NonConfluentContext,
    /// Identifier not found in the environment.
    UndefinedName,
    /// No instance matches an overload placeholder.
    InstanceNotFound,
    /// A heap variable would escape its `with-state` scope.
    HeapEscape,
    /// `main` does not yield a value convertible to I32.
    MainSignature,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::KindMismatch,
        Category::TypeMismatch,
        Category::OccursCheck,
        Category::AmbiguousOverload,
        Category::NonConfluentContext,
        Category::UndefinedName,
        Category::InstanceNotFound,
        Category::HeapEscape,
        Category::MainSignature,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::KindMismatch => "kind_mismatch",
            Category::TypeMismatch => "type_mismatch",
            Category::OccursCheck => "occurs_check",
            Category::AmbiguousOverload => "ambiguous_overload",
            Category::NonConfluentContext => "non_confluent_context",
            Category::UndefinedName => "undefined_name",
            Category::InstanceNotFound => "instance_not_found",
            Category::HeapEscape => "heap_escape",
            Category::MainSignature => "main_signature",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::KindMismatch => "E0001",
            Category::TypeMismatch => "E0002",
            Category::OccursCheck => "E0003",
            Category::AmbiguousOverload => "E0004",
            Category::NonConfluentContext => "E0005",
            Category::UndefinedName => "E0006",
            Category::InstanceNotFound => "E0007",
            Category::HeapEscape => "E0008",
            Category::MainSignature => "E0009",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::KindMismatch => "A substitution or type application violates kinding.",
            Category::TypeMismatch => "Two incompatible rigid types were unified.",
            Category::OccursCheck => "A variable occurs inside its own binding (infinite type).",
            Category::AmbiguousOverload => {
                "A constraint mentions type variables the result type does not determine."
            }
            Category::NonConfluentContext => {
                "The constraint rules reduce the context to more than one normal form."
            }
            Category::UndefinedName => "A referenced word, pattern, or type is undefined.",
            Category::InstanceNotFound => "No declared instance matches the required constraint.",
            Category::HeapEscape => "A reference cell would outlive its state scope.",
            Category::MainSignature => "`main` must leave a value convertible to I32.",
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations
// ---------------------------------------------------------------------------

/// A source location carried through from the parser, in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
///
/// Every diagnostic carries enough context to produce an actionable error
/// message without exposing internal compiler state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0002).
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong, when the AST position survived to this point.
    pub location: Option<SourceLocation>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

impl From<Diagnostic> for DiagnosticError {
    fn from(diag: Diagnostic) -> Self {
        Self::single(diag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_builder() {
        let loc = SourceLocation {
            file_id: 0,
            start: 4,
            end: 9,
        };
        let diag = Diagnostic::error(Category::UndefinedName, "unknown word `frobnicate`")
            .at(loc)
            .with_help("did you mean `frob`?");
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("E0006"));
        assert!(diag.help.unwrap().contains("frob"));
    }

    #[test]
    fn diagnostic_display() {
        let diag = Diagnostic::error(Category::TypeMismatch, "cannot unify `I32` with `Bool`");
        let s = format!("{diag}");
        assert!(s.starts_with("error[E0002]: cannot unify"));
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }
}
