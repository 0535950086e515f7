//! Diagnostics for the TPL front-end.
//!
//! The parser and the semantic analyzer both accumulate diagnostics here
//! instead of failing fast, so one compile surfaces as many problems as
//! possible. A non-empty reporter suppresses later phases; it never
//! short-circuits the phase that is running.

use thiserror::Error;

use crate::ast::SourcePos;

/// Every diagnostic the front-end can produce.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ErrorMessage {
    // Parse errors
    #[error("unexpected token '{got}', expecting '{want}'")]
    UnexpectedToken { got: String, want: String },
    #[error("expecting expression")]
    ExpectingExpression,
    #[error("expecting type")]
    ExpectingType,
    #[error("lexical error: {0}")]
    Lexical(String),

    // Declaration and scope errors
    #[error("'{0}' redeclared in this block")]
    VariableRedeclared(String),
    #[error("undefined: '{0}'")]
    UndefinedVariable(String),
    #[error("undefined type: '{0}'")]
    UndefinedType(String),
    #[error("duplicate field name '{0}' in struct")]
    DuplicateStructFieldName(String),
    #[error("duplicate named argument '{0}'")]
    DuplicateArgName(String),
    #[error("variable '{0}' needs a type or an initial value")]
    UntypedVariable(String),

    // Expression typing errors
    #[error("invalid operation: '{op}' on type '{ty}'")]
    InvalidOperation { op: String, ty: String },
    #[error("mismatched types '{left}' and '{right}'")]
    MismatchedTypes { left: String, right: String },
    #[error("pointers of types '{left}' and '{right}' cannot be compared")]
    MismatchedPointerComparison { left: String, right: String },
    #[error("pointers support only equality comparison, not '{0}'")]
    InvalidPointerComparison(String),
    #[error("cannot call non-function '{0}'")]
    NonFunction(String),
    #[error("not enough arguments in call to '{0}'")]
    NotEnoughCallArgs(String),
    #[error("too many arguments in call to '{0}'")]
    TooManyCallArgs(String),
    #[error("cannot use '{got}' as '{expected}' in argument {index} to '{func}'")]
    IncorrectCallArg {
        index: usize,
        expected: String,
        got: String,
        func: String,
    },
    #[error("unknown builtin '@{0}'")]
    UnknownBuiltin(String),
    #[error("field '{field}' does not exist in '{ty}'")]
    FieldNotFound { field: String, ty: String },
    #[error("'{0}' is not a struct; cannot access member")]
    NotAStruct(String),
    #[error("cannot dereference non-pointer type '{0}'")]
    CannotDereference(String),
    #[error("non-integer index into array")]
    NonIntegerIndex,
    #[error("array index {index} out of range [0, {len})")]
    ArrayIndexOutOfRange { index: i64, len: u64 },
    #[error("non-integer literal used as array length")]
    NonIntegerArrayLength,
    #[error("array length must be non-negative")]
    NegativeArrayLength,

    // Statement errors
    #[error("non-bool used as if condition")]
    NonBoolIfCondition,
    #[error("non-bool used as for condition")]
    NonBoolForCondition,
    #[error("return outside function")]
    ReturnOutsideFunction,
    #[error("function expects a '{0}' return value")]
    MissingReturnValue(String),
    #[error("cannot return a value from a function returning nil")]
    UnexpectedReturnValue,
    #[error("return type '{got}' does not match declared '{expected}'")]
    MismatchedReturnType { expected: String, got: String },
}

/// A positioned diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub pos: SourcePos,
    pub message: ErrorMessage,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

/// Accumulates diagnostics across the parse and sema phases.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, pos: SourcePos, message: ErrorMessage) {
        self.diagnostics.push(Diagnostic { pos, message });
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render every diagnostic, one per line.
    pub fn format_all(&self) -> String {
        self.diagnostics
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_in_order() {
        let mut reporter = ErrorReporter::new();
        assert!(!reporter.has_errors());
        reporter.report(
            SourcePos { line: 1, column: 2 },
            ErrorMessage::ExpectingExpression,
        );
        reporter.report(
            SourcePos { line: 3, column: 4 },
            ErrorMessage::UndefinedVariable("x".into()),
        );
        assert!(reporter.has_errors());
        assert_eq!(reporter.diagnostics().len(), 2);
        let rendered = reporter.format_all();
        assert!(rendered.contains("1:2: expecting expression"));
        assert!(rendered.contains("undefined: 'x'"));
    }
}
