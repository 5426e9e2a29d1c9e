use serde::Serialize;

use super::ast::Span;
use super::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Kind {
    Ident,
    IntLit,

    // Type keywords
    KwInteger,
    KwBoolean,
    KwImage,
    KwUrl,
    KwFile,
    KwFrame,

    // Control keywords
    KwWhile,
    KwIf,
    KwTrue,
    KwFalse,

    // Punctuation
    Semi,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,

    // Operators
    Arrow,    // ->
    BarArrow, // |->
    Or,       // |
    And,      // &
    Equal,    // ==
    NotEqual, // !=
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Times,
    Div,
    Mod,
    Not,
    Assign, // <-

    // Chain operators & constants
    OpBlur,
    OpGray,
    OpConvolve,
    KwScreenHeight,
    KwScreenWidth,
    OpWidth,
    OpHeight,
    KwXloc,
    KwYloc,
    KwHide,
    KwShow,
    KwMove,
    OpSleep,
    KwScale,

    Eof,
}

impl Kind {
    fn keyword(text: &str) -> Option<Kind> {
        Some(match text {
            "integer" => Kind::KwInteger,
            "boolean" => Kind::KwBoolean,
            "image" => Kind::KwImage,
            "url" => Kind::KwUrl,
            "file" => Kind::KwFile,
            "frame" => Kind::KwFrame,
            "while" => Kind::KwWhile,
            "if" => Kind::KwIf,
            "true" => Kind::KwTrue,
            "false" => Kind::KwFalse,
            "blur" => Kind::OpBlur,
            "gray" => Kind::OpGray,
            "convolve" => Kind::OpConvolve,
            "screenheight" => Kind::KwScreenHeight,
            "screenwidth" => Kind::KwScreenWidth,
            "width" => Kind::OpWidth,
            "height" => Kind::OpHeight,
            "xloc" => Kind::KwXloc,
            "yloc" => Kind::KwYloc,
            "hide" => Kind::KwHide,
            "show" => Kind::KwShow,
            "move" => Kind::KwMove,
            "sleep" => Kind::OpSleep,
            "scale" => Kind::KwScale,
            _ => return None,
        })
    }

    /// Human-readable spelling, used in syntax error messages.
    pub fn describe(self) -> &'static str {
        match self {
            Kind::Ident => "identifier",
            Kind::IntLit => "integer literal",
            Kind::KwInteger => "'integer'",
            Kind::KwBoolean => "'boolean'",
            Kind::KwImage => "'image'",
            Kind::KwUrl => "'url'",
            Kind::KwFile => "'file'",
            Kind::KwFrame => "'frame'",
            Kind::KwWhile => "'while'",
            Kind::KwIf => "'if'",
            Kind::KwTrue => "'true'",
            Kind::KwFalse => "'false'",
            Kind::Semi => "';'",
            Kind::Comma => "','",
            Kind::LParen => "'('",
            Kind::RParen => "')'",
            Kind::LBrace => "'{'",
            Kind::RBrace => "'}'",
            Kind::Arrow => "'->'",
            Kind::BarArrow => "'|->'",
            Kind::Or => "'|'",
            Kind::And => "'&'",
            Kind::Equal => "'=='",
            Kind::NotEqual => "'!='",
            Kind::Lt => "'<'",
            Kind::Gt => "'>'",
            Kind::Le => "'<='",
            Kind::Ge => "'>='",
            Kind::Plus => "'+'",
            Kind::Minus => "'-'",
            Kind::Times => "'*'",
            Kind::Div => "'/'",
            Kind::Mod => "'%'",
            Kind::Not => "'!'",
            Kind::Assign => "'<-'",
            Kind::OpBlur => "'blur'",
            Kind::OpGray => "'gray'",
            Kind::OpConvolve => "'convolve'",
            Kind::KwScreenHeight => "'screenheight'",
            Kind::KwScreenWidth => "'screenwidth'",
            Kind::OpWidth => "'width'",
            Kind::OpHeight => "'height'",
            Kind::KwXloc => "'xloc'",
            Kind::KwYloc => "'yloc'",
            Kind::KwHide => "'hide'",
            Kind::KwShow => "'show'",
            Kind::KwMove => "'move'",
            Kind::OpSleep => "'sleep'",
            Kind::KwScale => "'scale'",
            Kind::Eof => "end of input",
        }
    }
}

/// A token with its byte span and 1-based line/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: Kind,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

impl Token {
    /// The exact source text of this token.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.span.start..self.span.end).unwrap_or("")
    }
}

/// Scan the whole source. The result always ends with exactly one `Eof`.
pub fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source).tokenize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    AfterMinus,
    AfterDiv,
    AfterNot,
    AfterEqual,
    AfterOr,
    AfterLessThan,
    AfterGreaterThan,
    InIdent,
    InIntLit,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    /// Index into `chars`.
    pos: usize,
    line: usize,
    /// Index into `chars` of the first character of the current line.
    line_start: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            pos: 0,
            line: 1,
            line_start: 0,
            tokens: Vec::new(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut state = State::Start;
        let mut start = 0;
        loop {
            state = match state {
                State::Start => {
                    self.skip_whitespace();
                    start = self.pos;
                    let Some(ch) = self.current() else {
                        self.push(Kind::Eof, start);
                        return Ok(self.tokens);
                    };
                    self.pos += 1;
                    match ch {
                        ';' => self.emit(Kind::Semi, start),
                        ',' => self.emit(Kind::Comma, start),
                        '(' => self.emit(Kind::LParen, start),
                        ')' => self.emit(Kind::RParen, start),
                        '{' => self.emit(Kind::LBrace, start),
                        '}' => self.emit(Kind::RBrace, start),
                        '&' => self.emit(Kind::And, start),
                        '+' => self.emit(Kind::Plus, start),
                        '*' => self.emit(Kind::Times, start),
                        '%' => self.emit(Kind::Mod, start),
                        '0' => self.emit(Kind::IntLit, start),
                        '-' => State::AfterMinus,
                        '/' => State::AfterDiv,
                        '!' => State::AfterNot,
                        '=' => State::AfterEqual,
                        '|' => State::AfterOr,
                        '<' => State::AfterLessThan,
                        '>' => State::AfterGreaterThan,
                        c if c.is_ascii_digit() => State::InIntLit,
                        c if is_ident_start(c) => State::InIdent,
                        c => return Err(CompileError::illegal_char(c, self.span_from(start))),
                    }
                }
                State::AfterMinus => {
                    if self.eat('>') {
                        self.emit(Kind::Arrow, start)
                    } else {
                        self.emit(Kind::Minus, start)
                    }
                }
                State::AfterDiv => {
                    if self.eat('*') {
                        self.skip_comment();
                        State::Start
                    } else {
                        self.emit(Kind::Div, start)
                    }
                }
                State::AfterNot => {
                    if self.eat('=') {
                        self.emit(Kind::NotEqual, start)
                    } else {
                        self.emit(Kind::Not, start)
                    }
                }
                State::AfterEqual => {
                    if self.eat('=') {
                        self.emit(Kind::Equal, start)
                    } else {
                        return Err(CompileError::illegal_char('=', self.span_from(start)));
                    }
                }
                State::AfterOr => {
                    // `|-` only combines when a `>` follows; otherwise the `-`
                    // is left for the next token.
                    if self.current() == Some('-') && self.peek() == Some('>') {
                        self.pos += 2;
                        self.emit(Kind::BarArrow, start)
                    } else {
                        self.emit(Kind::Or, start)
                    }
                }
                State::AfterLessThan => {
                    if self.eat('=') {
                        self.emit(Kind::Le, start)
                    } else if self.eat('-') {
                        self.emit(Kind::Assign, start)
                    } else {
                        self.emit(Kind::Lt, start)
                    }
                }
                State::AfterGreaterThan => {
                    if self.eat('=') {
                        self.emit(Kind::Ge, start)
                    } else {
                        self.emit(Kind::Gt, start)
                    }
                }
                State::InIdent => {
                    while self.current().is_some_and(is_ident_part) {
                        self.pos += 1;
                    }
                    let span = self.span_from(start);
                    let text = self.source.get(span.start..span.end).unwrap_or("");
                    // Spans containing `$` or `_` are never keywords.
                    let kind = if text.contains(['$', '_']) {
                        Kind::Ident
                    } else {
                        Kind::keyword(text).unwrap_or(Kind::Ident)
                    };
                    self.emit(kind, start)
                }
                State::InIntLit => {
                    while self.current().is_some_and(|c| c.is_ascii_digit()) {
                        self.pos += 1;
                    }
                    let span = self.span_from(start);
                    let text = self.source.get(span.start..span.end).unwrap_or("");
                    if text.parse::<i32>().is_err() {
                        return Err(CompileError::illegal_number(text, span));
                    }
                    self.emit(Kind::IntLit, start)
                }
            };
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).map(|&(_, c)| c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.current() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn byte_offset(&self, index: usize) -> usize {
        self.chars.get(index).map_or(self.source.len(), |&(b, _)| b)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(self.byte_offset(start), self.byte_offset(self.pos))
    }

    fn push(&mut self, kind: Kind, start: usize) {
        let span = self.span_from(start);
        self.tokens.push(Token {
            kind,
            span,
            line: self.line,
            column: start - self.line_start + 1,
        });
    }

    /// Push a token ending at the current position and return to `Start`.
    fn emit(&mut self, kind: Kind, start: usize) -> State {
        self.push(kind, start);
        State::Start
    }

    fn newline(&mut self) {
        self.line += 1;
        self.line_start = self.pos + 1;
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if !ch.is_whitespace() {
                break;
            }
            if ch == '\n' {
                self.newline();
            }
            self.pos += 1;
        }
    }

    /// Consume a block comment body through `*/`. End of input also closes it.
    fn skip_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '*' && self.peek() == Some('/') {
                self.pos += 2;
                return;
            }
            if ch == '\n' {
                self.newline();
            }
            self.pos += 1;
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;

    fn kinds(src: &str) -> Vec<Kind> {
        lex(src).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn arrow_is_one_token() {
        assert_eq!(kinds("->"), vec![Kind::Arrow, Kind::Eof]);
        assert_eq!(kinds("- >"), vec![Kind::Minus, Kind::Gt, Kind::Eof]);
    }

    #[test]
    fn bar_minus_without_gt_splits() {
        assert_eq!(kinds("|->"), vec![Kind::BarArrow, Kind::Eof]);
        assert_eq!(kinds("|-"), vec![Kind::Or, Kind::Minus, Kind::Eof]);
        assert_eq!(kinds("|-x"), vec![Kind::Or, Kind::Minus, Kind::Ident, Kind::Eof]);
        assert_eq!(kinds("|"), vec![Kind::Or, Kind::Eof]);
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(
            kinds("< <= <- > >= == != !"),
            vec![
                Kind::Lt,
                Kind::Le,
                Kind::Assign,
                Kind::Gt,
                Kind::Ge,
                Kind::Equal,
                Kind::NotEqual,
                Kind::Not,
                Kind::Eof,
            ]
        );
    }

    #[test]
    fn bare_equals_is_illegal() {
        let err = lex("x = 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalChar('='));
        assert_eq!(err.span.start, 2);
    }

    #[test]
    fn unknown_character_is_illegal() {
        let err = lex("a # b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalChar('#'));
    }

    #[test]
    fn leading_zero_is_its_own_literal() {
        let src = "007 10";
        let tokens = lex(src).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text(src)).collect();
        assert_eq!(texts, vec!["0", "0", "7", "10", ""]);
    }

    #[test]
    fn int_literal_range() {
        assert!(lex("2147483647").is_ok());
        let err = lex("2147483648").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalNumber);
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("integer image frame url file boolean while if true false"),
            vec![
                Kind::KwInteger,
                Kind::KwImage,
                Kind::KwFrame,
                Kind::KwUrl,
                Kind::KwFile,
                Kind::KwBoolean,
                Kind::KwWhile,
                Kind::KwIf,
                Kind::KwTrue,
                Kind::KwFalse,
                Kind::Eof,
            ]
        );
        assert_eq!(
            kinds("blur gray convolve show hide move xloc yloc width height scale sleep"),
            vec![
                Kind::OpBlur,
                Kind::OpGray,
                Kind::OpConvolve,
                Kind::KwShow,
                Kind::KwHide,
                Kind::KwMove,
                Kind::KwXloc,
                Kind::KwYloc,
                Kind::OpWidth,
                Kind::OpHeight,
                Kind::KwScale,
                Kind::OpSleep,
                Kind::Eof,
            ]
        );
        assert_eq!(kinds("blurry"), vec![Kind::Ident, Kind::Eof]);
    }

    #[test]
    fn underscore_and_dollar_spans_are_never_keywords() {
        assert_eq!(
            kinds("_blur $if show_ if$"),
            vec![Kind::Ident, Kind::Ident, Kind::Ident, Kind::Ident, Kind::Eof]
        );
    }

    #[test]
    fn comments_are_skipped_and_count_lines() {
        let src = "a /* one\ntwo */ b\n  c";
        let tokens = lex(src).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 8));
        assert_eq!((tokens[2].line, tokens[2].column), (3, 3));
    }

    #[test]
    fn unterminated_comment_ends_at_eof() {
        assert_eq!(kinds("x /* never closed"), vec![Kind::Ident, Kind::Eof]);
    }

    #[test]
    fn divide_without_star() {
        assert_eq!(kinds("a/b"), vec![Kind::Ident, Kind::Div, Kind::Ident, Kind::Eof]);
    }

    #[test]
    fn exactly_one_eof() {
        assert_eq!(kinds(""), vec![Kind::Eof]);
        assert_eq!(kinds("  \n\t "), vec![Kind::Eof]);
    }

    #[test]
    fn spans_cover_source_text() {
        let src = "img |-> blur;";
        let tokens = lex(src).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text(src)).collect();
        assert_eq!(texts, vec!["img", "|->", "blur", ";", ""]);
    }

    const FRAGMENTS: &[&str] = &[
        "x", "img", "a_b", "$f", "0", "42", "integer", "image", "frame", "blur", "show",
        "->", "|->", "|", "-", "<-", "<", "<=", ">", ">=", "==", "!=", "!", "+", "*", "/",
        "%", "&", ";", ",", "(", ")", "{", "}", "/* c */",
    ];

    fn relex_matches(picks: Vec<u8>) -> bool {
        let src: Vec<&str> = picks
            .iter()
            .map(|&b| FRAGMENTS[usize::from(b) % FRAGMENTS.len()])
            .collect();
        let src = src.join(" ");
        let first = lex(&src).unwrap();
        let rebuilt: Vec<&str> = first.iter().map(|t| t.text(&src)).collect();
        let rebuilt = rebuilt.join(" ");
        let second = lex(&rebuilt).unwrap();
        first.iter().map(|t| t.kind).eq(second.iter().map(|t| t.kind))
            && first.iter().map(|t| t.text(&src)).eq(second.iter().map(|t| t.text(&rebuilt)))
    }

    #[test]
    fn relexing_token_texts_reproduces_tokens() {
        quickcheck::QuickCheck::new()
            .tests(300)
            .quickcheck(relex_matches as fn(Vec<u8>) -> bool);
    }
}
