use thiserror::Error;

use super::ast::Span;

/// A compilation error with source location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub span: Span,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IllegalChar(char),
    IllegalNumber,
    Syntax,
    Semantic,
    /// The annotated AST (or the instruction stream built from it) broke an
    /// invariant code generation relies on. Never caused by user input that
    /// got past the type checker.
    Internal,
}

impl CompileError {
    pub fn illegal_char(ch: char, span: Span) -> Self {
        Self {
            message: format!("illegal character '{}'", ch.escape_default()),
            span,
            kind: ErrorKind::IllegalChar(ch),
        }
    }

    pub fn illegal_number(text: &str, span: Span) -> Self {
        Self {
            message: format!("integer literal {text} does not fit in 32 bits"),
            span,
            kind: ErrorKind::IllegalNumber,
        }
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind: ErrorKind::Syntax,
        }
    }

    pub fn semantic(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind: ErrorKind::Semantic,
        }
    }

    pub fn internal(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind: ErrorKind::Internal,
        }
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        format!(
            "[{}] line {}:{}: {}",
            match self.kind {
                ErrorKind::IllegalChar(_) | ErrorKind::IllegalNumber => "lexer",
                ErrorKind::Syntax => "syntax",
                ErrorKind::Semantic => "semantic",
                ErrorKind::Internal => "internal",
            },
            line,
            col,
            self.message,
        )
    }
}

/// 1-based line and column (in characters) of a byte offset.
pub fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_one() {
        let src = "p {\n  x <- 1;\n}";
        assert_eq!(offset_to_line_col(src, 0), (1, 1));
        assert_eq!(offset_to_line_col(src, 6), (2, 3));
    }

    #[test]
    fn formats_kind_and_position() {
        let err = CompileError::syntax("expected '}'", Span::new(4, 5));
        assert_eq!(
            err.format_with_source("p {\n;"),
            "[syntax] line 2:1: expected '}'"
        );
    }
}
