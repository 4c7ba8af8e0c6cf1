//! Module transformer.
//!
//! Realms have no module loader, so the two export forms documents use are
//! rewritten into assignments on an `__exports` object:
//!
//! - `export default <expr>` becomes `__exports.default = <expr>`
//! - `export const name = <expr>` becomes `const name = <expr>` with a
//!   trailing `__exports.name = name;`
//!
//! Only `export` keywords in statement position are rewritten. Strings,
//! template text, regex literals, and comments are left alone. Anything else
//! is passed through and surfaces as a syntax error at compile time.

use regex::Regex;
use std::sync::LazyLock;

/// Name of the exports object inside the compiled module function.
pub const EXPORTS_BINDING: &str = "__exports";

const EXPORT_KEYWORD: &str = "export";

static EXPORT_DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^export\s+default\b\s*").unwrap());

static EXPORT_CONST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^export(\s+)const(\s+)([A-Za-z_$][A-Za-z0-9_$]*)(\s*=)").unwrap()
});

/// What a source byte belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Code,
    Comment,
    Literal,
}

#[derive(Clone, Copy)]
enum Mode {
    Code,
    Quoted(u8),
    Template,
    LineComment,
    BlockComment,
    Regex { in_class: bool },
}

/// Whether a `/` after `prev` starts a regex literal rather than a division.
fn regex_allowed(prev: Option<u8>) -> bool {
    prev.map_or(true, |p| b"(,=:[!&|?{};+-*%<>~^}".contains(&p))
}

/// Classify every byte of `source` as code, comment, or literal text.
fn classify(source: &str) -> Vec<Class> {
    let b = source.as_bytes();
    let mut classes = vec![Class::Literal; b.len()];
    let mut mode = Mode::Code;
    // Brace depth inside each open `${ ... }` substitution.
    let mut substitutions: Vec<usize> = Vec::new();
    let mut prev: Option<u8> = None;
    let mut i = 0;

    while i < b.len() {
        let c = b[i];
        let next = b.get(i + 1).copied();
        match mode {
            Mode::Code => match c {
                b'\'' | b'"' => mode = Mode::Quoted(c),
                b'`' => mode = Mode::Template,
                b'/' if next == Some(b'/') => {
                    classes[i] = Class::Comment;
                    mode = Mode::LineComment;
                }
                b'/' if next == Some(b'*') => {
                    classes[i..i + 2].fill(Class::Comment);
                    mode = Mode::BlockComment;
                    i += 2;
                    continue;
                }
                b'/' if regex_allowed(prev) => mode = Mode::Regex { in_class: false },
                b'}' if substitutions.last() == Some(&0) => {
                    substitutions.pop();
                    mode = Mode::Template;
                }
                _ => {
                    classes[i] = Class::Code;
                    match c {
                        b'{' => {
                            if let Some(depth) = substitutions.last_mut() {
                                *depth += 1;
                            }
                        }
                        b'}' => {
                            if let Some(depth) = substitutions.last_mut() {
                                *depth -= 1;
                            }
                        }
                        _ => {}
                    }
                    if !c.is_ascii_whitespace() {
                        prev = Some(c);
                    }
                }
            },
            Mode::Quoted(quote) => {
                if c == b'\\' {
                    i += 2;
                    continue;
                }
                if c == quote || c == b'\n' {
                    mode = Mode::Code;
                    prev = Some(quote);
                }
            }
            Mode::Template => {
                if c == b'\\' {
                    i += 2;
                    continue;
                }
                if c == b'`' {
                    mode = Mode::Code;
                    prev = Some(c);
                } else if c == b'$' && next == Some(b'{') {
                    substitutions.push(0);
                    mode = Mode::Code;
                    prev = Some(b'{');
                    i += 2;
                    continue;
                }
            }
            Mode::LineComment => {
                if c == b'\n' {
                    classes[i] = Class::Code;
                    mode = Mode::Code;
                } else {
                    classes[i] = Class::Comment;
                }
            }
            Mode::BlockComment => {
                classes[i] = Class::Comment;
                if c == b'*' && next == Some(b'/') {
                    classes[i + 1] = Class::Comment;
                    mode = Mode::Code;
                    i += 2;
                    continue;
                }
            }
            Mode::Regex { in_class } => {
                if c == b'\\' {
                    i += 2;
                    continue;
                }
                match c {
                    b'[' => mode = Mode::Regex { in_class: true },
                    b']' => mode = Mode::Regex { in_class: false },
                    b'/' if !in_class => {
                        mode = Mode::Code;
                        prev = Some(c);
                    }
                    b'\n' => mode = Mode::Code,
                    _ => {}
                }
            }
        }
        i += 1;
    }

    classes
}

/// Whether the code before `pos` ends a statement (or there is none).
fn at_statement_start(source: &[u8], classes: &[Class], pos: usize) -> bool {
    for j in (0..pos).rev() {
        match classes[j] {
            Class::Comment => continue,
            Class::Literal => return false,
            Class::Code => match source[j] {
                b'\n' | b';' | b'{' | b'}' => return true,
                c if c.is_ascii_whitespace() => continue,
                _ => return false,
            },
        }
    }
    true
}

/// Rewrite module export syntax into plain assignments.
pub fn transform_module(source: &str) -> String {
    let bytes = source.as_bytes();
    let classes = classify(source);

    let mut out = String::with_capacity(source.len());
    let mut names = Vec::new();
    let mut copied = 0;

    for (pos, _) in source.match_indices(EXPORT_KEYWORD) {
        if pos < copied
            || classes[pos] != Class::Code
            || !at_statement_start(bytes, &classes, pos)
        {
            continue;
        }
        let rest = &source[pos..];

        // Newlines inside the matched keywords are kept so line numbers hold.
        if let Some(m) = EXPORT_DEFAULT_RE.find(rest) {
            out.push_str(&source[copied..pos]);
            out.push_str(EXPORTS_BINDING);
            out.push_str(".default = ");
            out.push_str(&"\n".repeat(m.as_str().matches('\n').count()));
            copied = pos + m.end();
        } else if let Some(caps) = EXPORT_CONST_RE.captures(rest) {
            let name = &caps[3];
            out.push_str(&source[copied..pos]);
            out.push_str(&"\n".repeat(caps[1].matches('\n').count()));
            out.push_str("const");
            out.push_str(&caps[2]);
            out.push_str(name);
            out.push_str(&caps[4]);
            names.push(name.to_string());
            copied = pos + caps[0].len();
        }
    }
    out.push_str(&source[copied..]);

    if !names.is_empty() {
        // Keeps author line numbers intact: the bindings go after the last line.
        out.push_str("\n;");
        for name in &names {
            out.push_str(&format!("{EXPORTS_BINDING}.{name} = {name};"));
        }
    }
    out
}
