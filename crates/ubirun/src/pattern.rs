//! Node-name patterns.
//!
//! Topology filters select nodes by a small anchored pattern language:
//! literal characters, `.` for any character, postfix `*`/`+`/`?`
//! quantifiers, `[a-z0-9]` classes (with leading `^` negation), `|`
//! alternation, and `\` escapes. A pattern matches the whole name, never a
//! substring, so `s0` matches exactly `s0` and `//.*/s[0-9]` matches the
//! qualified form of any single-digit server name.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// A `[` class was never closed.
    UnclosedClass,
    /// `*`, `+`, or `?` with nothing before it.
    DanglingQuantifier(usize),
    /// `\` at the end of the pattern.
    TrailingEscape,
    /// `[]` or `[^]` with no members.
    EmptyClass,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::UnclosedClass => write!(f, "unclosed character class"),
            PatternError::DanglingQuantifier(pos) => {
                write!(f, "quantifier at position {} has nothing to repeat", pos)
            }
            PatternError::TrailingEscape => write!(f, "trailing escape"),
            PatternError::EmptyClass => write!(f, "empty character class"),
        }
    }
}

impl std::error::Error for PatternError {}

#[derive(Debug, Clone, PartialEq)]
enum Atom {
    Any,
    Lit(char),
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
}

impl Atom {
    fn matches(&self, c: char) -> bool {
        match self {
            Atom::Any => true,
            Atom::Lit(l) => *l == c,
            Atom::Class { negated, ranges } => {
                let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                hit != *negated
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quant {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq)]
struct Piece {
    atom: Atom,
    quant: Quant,
}

/// A compiled, anchored name pattern.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    alternatives: Vec<Vec<Piece>>,
}

impl NamePattern {
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        let chars: Vec<char> = source.chars().collect();
        let mut alternatives = Vec::new();
        let mut seq: Vec<Piece> = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '|' => {
                    alternatives.push(std::mem::take(&mut seq));
                    i += 1;
                }
                '*' | '+' | '?' => {
                    let last = seq.last_mut().ok_or(PatternError::DanglingQuantifier(i))?;
                    if last.quant != Quant::One {
                        return Err(PatternError::DanglingQuantifier(i));
                    }
                    last.quant = match chars[i] {
                        '*' => Quant::ZeroOrMore,
                        '+' => Quant::OneOrMore,
                        _ => Quant::ZeroOrOne,
                    };
                    i += 1;
                }
                '[' => {
                    let (atom, next) = parse_class(&chars, i + 1)?;
                    seq.push(Piece {
                        atom,
                        quant: Quant::One,
                    });
                    i = next;
                }
                '\\' => {
                    let lit = *chars.get(i + 1).ok_or(PatternError::TrailingEscape)?;
                    seq.push(Piece {
                        atom: Atom::Lit(lit),
                        quant: Quant::One,
                    });
                    i += 2;
                }
                '.' => {
                    seq.push(Piece {
                        atom: Atom::Any,
                        quant: Quant::One,
                    });
                    i += 1;
                }
                c => {
                    seq.push(Piece {
                        atom: Atom::Lit(c),
                        quant: Quant::One,
                    });
                    i += 1;
                }
            }
        }
        alternatives.push(seq);
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whole-name match.
    pub fn matches(&self, name: &str) -> bool {
        let chars: Vec<char> = name.chars().collect();
        self.alternatives
            .iter()
            .any(|seq| match_seq(seq, &chars, 0, 0))
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn parse_class(chars: &[char], mut i: usize) -> Result<(Atom, usize), PatternError> {
    let negated = chars.get(i) == Some(&'^');
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    loop {
        match chars.get(i) {
            None => return Err(PatternError::UnclosedClass),
            Some(']') => {
                if ranges.is_empty() {
                    return Err(PatternError::EmptyClass);
                }
                return Ok((Atom::Class { negated, ranges }, i + 1));
            }
            Some(&lo) => {
                if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|c| *c != ']') {
                    ranges.push((lo, chars[i + 2]));
                    i += 3;
                } else {
                    ranges.push((lo, lo));
                    i += 1;
                }
            }
        }
    }
}

fn match_seq(seq: &[Piece], chars: &[char], pi: usize, ci: usize) -> bool {
    let Some(piece) = seq.get(pi) else {
        return ci == chars.len();
    };
    match piece.quant {
        Quant::One => {
            ci < chars.len()
                && piece.atom.matches(chars[ci])
                && match_seq(seq, chars, pi + 1, ci + 1)
        }
        Quant::ZeroOrOne => {
            match_seq(seq, chars, pi + 1, ci)
                || (ci < chars.len()
                    && piece.atom.matches(chars[ci])
                    && match_seq(seq, chars, pi + 1, ci + 1))
        }
        Quant::ZeroOrMore | Quant::OneOrMore => {
            let mut taken = 0;
            if piece.quant == Quant::OneOrMore {
                if ci >= chars.len() || !piece.atom.matches(chars[ci]) {
                    return false;
                }
                taken = 1;
            }
            loop {
                if match_seq(seq, chars, pi + 1, ci + taken) {
                    return true;
                }
                if ci + taken < chars.len() && piece.atom.matches(chars[ci + taken]) {
                    taken += 1;
                } else {
                    return false;
                }
            }
        }
    }
}
