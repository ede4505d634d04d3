use std::ops::Range;

use crate::instruction::Instruction;
use crate::program::LabelMap;

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `"..."`, quotes stripped. No escape sequences.
    StringLiteral(String),
    /// A run made only of ASCII digits.
    IntLiteral(u64),
    /// Any other run of non-whitespace characters: a native to invoke.
    Identifier(String),
    /// `#name`: binds `name` to the offset of the next emitted instruction.
    LabelDecl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte range within the fragment.
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString { span: Range<usize> },
    #[error("integer literal `{text}` is out of range")]
    IntegerOverflow { text: String, span: Range<usize> },
    #[error("label declaration `#` has no name")]
    EmptyLabel { span: Range<usize> },
    #[error("could not parse token `{text}`")]
    InvalidToken { text: String, span: Range<usize> },
    #[error("label `{name}` is defined more than once")]
    DuplicateLabel { name: String, span: Range<usize> },
}

impl LexError {
    pub fn span(&self) -> &Range<usize> {
        match self {
            LexError::UnterminatedString { span }
            | LexError::IntegerOverflow { span, .. }
            | LexError::EmptyLabel { span }
            | LexError::InvalidToken { span, .. }
            | LexError::DuplicateLabel { span, .. } => span,
        }
    }
}

/// Instructions and labels produced from one code fragment.
/// Label offsets are relative to the fragment's first instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub instructions: Vec<Instruction>,
    pub labels: LabelMap,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Tokenize and transform a code fragment in one step.
pub fn compile_fragment(code: &str) -> Result<Fragment, LexError> {
    transform(tokenize(code)?)
}

/// Split a fragment into raw tokens.
///
/// A `"` opens a string that runs to the next `"`, whitespace included, and the
/// closing quote always ends the token. Outside strings, whitespace separates
/// tokens and everything else accumulates.
pub fn tokenize(code: &str) -> Result<Vec<Token>, LexError> {
    let mut raw: Vec<(String, Range<usize>)> = Vec::new();
    let mut partial = String::new();
    let mut start = 0;
    let mut in_string = false;

    let mut flush = |partial: &mut String, start: usize, end: usize| {
        if !partial.is_empty() {
            raw.push((std::mem::take(partial), start..end));
        }
    };

    for (pos, c) in code.char_indices() {
        if partial.is_empty() {
            start = pos;
        }
        if c == '"' {
            partial.push(c);
            if in_string {
                in_string = false;
                flush(&mut partial, start, pos + 1);
            } else {
                in_string = true;
            }
            continue;
        }
        if in_string {
            partial.push(c);
            continue;
        }
        if c.is_whitespace() {
            flush(&mut partial, start, pos);
            continue;
        }
        partial.push(c);
    }

    if in_string {
        return Err(LexError::UnterminatedString {
            span: start..code.len(),
        });
    }
    flush(&mut partial, start, code.len());

    raw.into_iter().map(|(text, span)| classify(text, span)).collect()
}

/// Map tokens to instructions, collecting label declarations on the way.
/// A label points at the instruction emitted right after it.
pub fn transform(tokens: Vec<Token>) -> Result<Fragment, LexError> {
    let mut fragment = Fragment::default();

    for token in tokens {
        let instruction = match token.kind {
            TokenKind::LabelDecl(name) => {
                if fragment.labels.contains_key(&name) {
                    return Err(LexError::DuplicateLabel {
                        name,
                        span: token.span,
                    });
                }
                fragment.labels.insert(name, fragment.instructions.len());
                continue;
            }
            TokenKind::StringLiteral(s) => Instruction::PushString(s),
            TokenKind::IntLiteral(n) => Instruction::PushNumber(n as f64),
            TokenKind::Identifier(name) => Instruction::from_function_name(name),
        };
        fragment.instructions.push(instruction);
    }

    Ok(fragment)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn classify(text: String, span: Range<usize>) -> Result<Token, LexError> {
    let kind = if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        TokenKind::StringLiteral(text[1..text.len() - 1].to_string())
    } else if text.contains(|c: char| c == '"' || c.is_whitespace()) {
        // A quote opened mid-word swallowed whitespace into a bare token.
        return Err(LexError::InvalidToken { text, span });
    } else if text.bytes().all(|b| b.is_ascii_digit()) {
        let value = text.parse::<u64>().map_err(|_| LexError::IntegerOverflow {
            text: text.clone(),
            span: span.clone(),
        })?;
        TokenKind::IntLiteral(value)
    } else if let Some(name) = text.strip_prefix('#') {
        if name.is_empty() {
            return Err(LexError::EmptyLabel { span });
        }
        TokenKind::LabelDecl(name.to_string())
    } else {
        TokenKind::Identifier(text)
    };
    Ok(Token { kind, span })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(code: &str) -> Vec<TokenKind> {
        tokenize(code)
            .expect("tokenize failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn splits_on_whitespace_and_keeps_strings_whole() {
        assert_eq!(
            kinds("\"gold coins\" getContext   5 +"),
            vec![
                TokenKind::StringLiteral("gold coins".into()),
                TokenKind::Identifier("getContext".into()),
                TokenKind::IntLiteral(5),
                TokenKind::Identifier("+".into()),
            ]
        );
    }

    #[test]
    fn closing_quote_ends_the_token() {
        assert_eq!(
            kinds("\"a\"b"),
            vec![
                TokenKind::StringLiteral("a".into()),
                TokenKind::Identifier("b".into()),
            ]
        );
    }

    #[test]
    fn empty_string_literal() {
        assert_eq!(kinds("\"\""), vec![TokenKind::StringLiteral(String::new())]);
    }

    #[test]
    fn label_declarations() {
        assert_eq!(
            kinds("#start \"x\" emit"),
            vec![
                TokenKind::LabelDecl("start".into()),
                TokenKind::StringLiteral("x".into()),
                TokenKind::Identifier("emit".into()),
            ]
        );
    }

    #[test]
    fn mixed_digit_runs_are_identifiers() {
        assert_eq!(kinds("12abc"), vec![TokenKind::Identifier("12abc".into())]);
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let err = tokenize("1 \"open").unwrap_err();
        assert_eq!(err, LexError::UnterminatedString { span: 2..7 });
    }

    #[test]
    fn bare_hash_is_a_lex_error() {
        assert!(matches!(tokenize("# 1"), Err(LexError::EmptyLabel { .. })));
    }

    #[test]
    fn quote_inside_a_word_is_a_lex_error() {
        let err = tokenize("a\"b c\" emit").unwrap_err();
        assert_eq!(
            err,
            LexError::InvalidToken {
                text: "a\"b c\"".into(),
                span: 0..6,
            }
        );
        assert!(matches!(
            tokenize("#at\"x y\""),
            Err(LexError::InvalidToken { .. })
        ));
    }

    #[test]
    fn huge_integer_is_a_lex_error() {
        assert!(matches!(
            tokenize("99999999999999999999999"),
            Err(LexError::IntegerOverflow { .. })
        ));
    }

    #[test]
    fn labels_point_at_the_next_instruction() {
        let fragment = compile_fragment("\"a\" emit #here \"b\" emit #end").unwrap();
        assert_eq!(fragment.instructions.len(), 4);
        assert_eq!(fragment.labels.get("here"), Some(&2));
        assert_eq!(fragment.labels.get("end"), Some(&4));
    }

    #[test]
    fn label_declared_twice_in_one_fragment_is_rejected() {
        let err = compile_fragment("#x 1 #x 2").unwrap_err();
        assert_eq!(
            err,
            LexError::DuplicateLabel {
                name: "x".into(),
                span: 5..7,
            }
        );
    }

    #[test]
    fn braces_become_block_instructions() {
        let fragment = compile_fragment("1 jz { \"x\" emit }").unwrap();
        assert_eq!(
            fragment.instructions,
            vec![
                Instruction::PushNumber(1.0),
                Instruction::InvokeFunction("jz".into()),
                Instruction::OpenBlock,
                Instruction::PushString("x".into()),
                Instruction::InvokeFunction("emit".into()),
                Instruction::CloseBlock,
            ]
        );
    }
}
