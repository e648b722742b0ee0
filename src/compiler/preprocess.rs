//! Preprocessing
//!
//! Compiler pass that removes comments from a _Quill_ source file. Every
//! removed byte other than a newline is replaced with a space, so the line and
//! column of each surviving character is unchanged.

use crate::{CompileError, Context, Result, fmt_token_err};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    /// Inside `/* ... */`, opened at (line, col).
    BlockComment(usize, usize),
    /// Inside a string or char literal delimited by the given quote.
    Literal(char),
}

/// Returns `ctx.src` with all `//` and `/* */` comments blanked out.
///
/// Comment markers inside string and char literals are left untouched.
///
/// # Errors
///
/// Returns an error if a block comment is not terminated.
pub fn remove_comments(ctx: &Context<'_>) -> Result<String> {
    let src = ctx.src;
    let mut out = String::with_capacity(src.len());
    let mut state = State::Code;
    let mut chars = src.chars().peekable();
    let mut line = 1;
    let mut col = 1;

    while let Some(c) = chars.next() {
        let (c_line, c_col) = (line, col);

        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }

        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    col += 1;
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    col += 1;
                    out.push_str("  ");
                    state = State::BlockComment(c_line, c_col);
                }
                '"' | '\'' => {
                    out.push(c);
                    state = State::Literal(c);
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    blank(&mut out, c);
                }
            }
            State::BlockComment(..) => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    col += 1;
                    out.push_str("  ");
                    state = State::Code;
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    blank(&mut out, c);
                }
            }
            State::Literal(quote) => {
                out.push(c);

                if c == '\\' {
                    // Escaped character can never close the literal.
                    if let Some(&next) = chars.peek()
                        && next != '\n'
                    {
                        chars.next();
                        col += 1;
                        out.push(next);
                    }
                } else if c == quote || c == '\n' {
                    // Unterminated literals are reported by the lexer.
                    state = State::Code;
                }
            }
        }
    }

    if let State::BlockComment(line, col) = state {
        return Err(CompileError::Preprocess(fmt_token_err!(
            ctx.in_path.display(),
            line,
            col,
            1,
            ctx.src_line(line),
            "unterminated comment"
        )));
    }

    Ok(out)
}

/// Blanks out a comment character, keeping the byte length of the source.
fn blank(out: &mut String, c: char) {
    if c == '\r' || c == '\t' {
        out.push(c);
    } else {
        for _ in 0..c.len_utf8() {
            out.push(' ');
        }
    }
}
