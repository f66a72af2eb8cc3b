//! CompactTransform - JavaScript 風ソースの空白・コメントを詰める小さな変換
//!
//! 本物のミニファイアではありません。プールの動作確認と CLI のための同梱実装です。
//!
//! # 挙動
//! - コメントと不要な空白を削除し、トークンを最短で連結する
//! - 改行による文の区切りは `;` に置き換える（ASI 相当）
//! - 同じ行でキーワードでない名前が 2 つ並んだら構文エラー
//!   `Unexpected token name «jug», expected punc «;»`
//! - 括弧の対応が取れなければ構文エラー
//!
//! # オプション
//! `{ "max_line_len": number | null }`。指定すると `; , { }` の直後で改行する。

use serde::Deserialize;
use serde_json::{json, Value};

use crate::ports::{Transform, TransformError};

/// Words that may sit next to another word on the same line.
const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "case", "catch", "class", "const", "continue", "default",
    "delete", "do", "else", "export", "extends", "finally", "for", "from", "function", "get",
    "if", "import", "in", "instanceof", "let", "new", "of", "return", "set", "static", "switch",
    "throw", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// A newline after one of these does not end the statement.
const CONTINUES_AFTER: &[&str] = &[
    "async", "await", "case", "class", "const", "delete", "do", "else", "export", "extends",
    "function", "import", "in", "instanceof", "let", "new", "of", "static", "throw", "typeof",
    "var", "void",
];

/// A newline before one of these does not end the statement.
const CONTINUES_BEFORE: &[&str] = &[
    "as", "catch", "else", "extends", "finally", "from", "in", "instanceof", "of", "while",
];

/// Longest first.
const OPERATORS: &[&str] = &[
    ">>>=", "===", "!==", "**=", "<<=", ">>=", ">>>", "...", "&&=", "||=", "??=", "==", "!=",
    "<=", ">=", "=>", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

const SINGLE_PUNCT: &str = "{}()[];,<>+-*/%&|^!~?:=.@#";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompactOptions {
    pub max_line_len: Option<usize>,
}

impl CompactOptions {
    fn from_value(options: &Value) -> Result<Self, TransformError> {
        if options.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(options.clone())
            .map_err(|e| TransformError::invalid_options(format!("invalid options: {e}")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactTransform;

impl Transform for CompactTransform {
    fn default_options(&self) -> Value {
        json!({ "max_line_len": null })
    }

    fn transform(&self, input: &str, options: &Value) -> Result<String, TransformError> {
        let options = CompactOptions::from_value(options)?;
        let tokens = tokenize(input)?;
        validate(&tokens)?;
        Ok(emit(&tokens, &options))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Name,
    Num,
    Str,
    Punc,
}

impl Kind {
    fn label(self) -> &'static str {
        match self {
            Kind::Name => "name",
            Kind::Num => "num",
            Kind::Str => "string",
            Kind::Punc => "punc",
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: Kind,
    text: String,
    line: usize,
    col: usize,
    newline_before: bool,
}

impl Token {
    fn is_keyword(&self) -> bool {
        self.kind == Kind::Name && KEYWORDS.contains(&self.text.as_str())
    }

    fn is_word(&self) -> bool {
        matches!(self.kind, Kind::Name | Kind::Num)
    }

    fn is_one_of(&self, words: &[&str]) -> bool {
        self.kind == Kind::Name && words.contains(&self.text.as_str())
    }

    fn error(&self, message: String) -> TransformError {
        let mut e = TransformError::syntax(message);
        e.stack = Some(format!("at line {}, col {}", self.line, self.col));
        e
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(input: &str) -> Result<Vec<Token>, TransformError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let (mut i, mut line, mut col) = (0usize, 1usize, 1usize);
    let mut newline_before = false;

    let at = |line: usize, col: usize, message: &str| {
        let mut e = TransformError::syntax(message);
        e.stack = Some(format!("at line {line}, col {col}"));
        e
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\n' {
            newline_before = true;
            i += 1;
            line += 1;
            col = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && next == Some('*') {
            let (start_line, start_col) = (line, col);
            i += 2;
            col += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err(at(start_line, start_col, "Unterminated comment"));
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    col += 2;
                    break;
                }
                if chars[i] == '\n' {
                    newline_before = true;
                    line += 1;
                    col = 1;
                } else {
                    col += 1;
                }
                i += 1;
            }
            continue;
        }

        let (kind, end) = if is_ident_start(c) {
            (Kind::Name, scan_while(&chars, i, is_ident_char))
        } else if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            (Kind::Num, scan_while(&chars, i, |c| is_ident_char(c) || c == '.'))
        } else if matches!(c, '"' | '\'' | '`') {
            let end = scan_string(&chars, i)
                .ok_or_else(|| at(line, col, "Unterminated string constant"))?;
            (Kind::Str, end)
        } else if let Some(op) = OPERATORS.iter().find(|op| starts_with(&chars, i, op)) {
            (Kind::Punc, i + op.chars().count())
        } else if SINGLE_PUNCT.contains(c) {
            (Kind::Punc, i + 1)
        } else {
            return Err(at(line, col, &format!("Unexpected character '{c}'")));
        };

        let text: String = chars[i..end].iter().collect();
        tokens.push(Token {
            kind,
            text: text.clone(),
            line,
            col,
            newline_before,
        });
        newline_before = false;

        for ch in text.chars() {
            if ch == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        i = end;
    }

    Ok(tokens)
}

fn scan_while(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    end
}

/// Returns the index just past the closing quote.
fn scan_string(chars: &[char], start: usize) -> Option<usize> {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' if quote != '`' => return None,
            c if c == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn starts_with(chars: &[char], at: usize, pattern: &str) -> bool {
    let mut i = at;
    for p in pattern.chars() {
        if chars.get(i) != Some(&p) {
            return false;
        }
        i += 1;
    }
    true
}

fn closer(open: &str) -> &'static str {
    match open {
        "(" => ")",
        "[" => "]",
        _ => "}",
    }
}

fn validate(tokens: &[Token]) -> Result<(), TransformError> {
    let mut open: Vec<&Token> = Vec::new();
    let mut prev: Option<&Token> = None;

    for token in tokens {
        if token.kind == Kind::Punc {
            match token.text.as_str() {
                "(" | "[" | "{" => open.push(token),
                ")" | "]" | "}" => match open.pop() {
                    Some(o) if closer(&o.text) == token.text => {}
                    _ => {
                        return Err(token.error(format!("Unexpected token punc «{}»", token.text)));
                    }
                },
                _ => {}
            }
        }

        if let Some(p) = prev
            && p.is_word()
            && token.is_word()
            && !token.newline_before
            && !p.is_keyword()
            && !token.is_keyword()
        {
            return Err(token.error(format!(
                "Unexpected token {} «{}», expected punc «;»",
                token.kind.label(),
                token.text
            )));
        }
        prev = Some(token);
    }

    match open.last() {
        Some(o) => Err(o.error(format!(
            "Unexpected token eof «undefined», expected punc «{}»",
            closer(&o.text)
        ))),
        None => Ok(()),
    }
}

/// A newline between these two tokens ends a statement.
fn ends_statement(prev: &Token, next: &Token) -> bool {
    let prev_completes = matches!(prev.kind, Kind::Name | Kind::Num | Kind::Str)
        || matches!(prev.text.as_str(), ")" | "]" | "}" | "++" | "--");
    next.newline_before
        && prev_completes
        && matches!(next.kind, Kind::Name | Kind::Num | Kind::Str)
        && !prev.is_one_of(CONTINUES_AFTER)
        && !next.is_one_of(CONTINUES_BEFORE)
}

fn needs_space(prev: &Token, next: &Token) -> bool {
    let (Some(a), Some(b)) = (prev.text.chars().last(), next.text.chars().next()) else {
        return false;
    };
    (is_ident_char(a) && is_ident_char(b))
        || (prev.kind == Kind::Num && b == '.')
        || (a == '+' && b == '+')
        || (a == '-' && b == '-')
}

fn emit(tokens: &[Token], options: &CompactOptions) -> String {
    let mut out = String::new();
    let mut line_len = 0usize;
    let mut prev: Option<&Token> = None;

    for token in tokens {
        if let Some(p) = prev {
            if ends_statement(p, token) {
                out.push(';');
                line_len += 1;
            } else if needs_space(p, token) {
                out.push(' ');
                line_len += 1;
            }
        }

        out.push_str(&token.text);
        match token.text.rfind('\n') {
            Some(pos) => line_len = token.text[pos + 1..].chars().count(),
            None => line_len += token.text.chars().count(),
        }

        if let Some(max) = options.max_line_len
            && line_len >= max
            && matches!(token.text.as_str(), ";" | "," | "{" | "}")
        {
            out.push('\n');
            line_len = 0;
        }
        prev = Some(token);
    }
    out
}
