//! Position-anchored byte signatures.
//!
//! A pattern holds up to [`MAX_PATTERN_VALUES`] positions; each position
//! accepts a set of byte values. Textual form, whitespace separated:
//! `4D` (literal byte), `??` (any byte), `[4D|5A]` (alternatives) and
//! `"PDF"` (one literal position per ASCII character).

use thiserror::Error;

/// Position ceiling. Kept below 255 so the count fits in a `u8`.
pub const MAX_PATTERN_VALUES: usize = 21;
const _: () = assert!(MAX_PATTERN_VALUES < 255);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern has {count} positions, at most {max} are allowed")]
    TooLong { count: usize, max: usize },
    #[error("invalid pattern token `{0}`")]
    InvalidToken(String),
    #[error("empty alternative set `{0}`")]
    EmptySet(String),
    #[error("unterminated string literal in pattern")]
    UnterminatedString,
    #[error("anchor offset {0} is larger than {}", u16::MAX)]
    OffsetTooLarge(u64),
}

/// 256-bit membership set of byte values.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteSet([u64; 4]);

impl ByteSet {
    pub const ANY: ByteSet = ByteSet([u64::MAX; 4]);

    pub fn single(value: u8) -> Self {
        let mut set = Self::default();
        set.insert(value);
        set
    }

    pub fn insert(&mut self, value: u8) {
        self.0[(value >> 6) as usize] |= 1u64 << (value & 63);
    }

    pub fn contains(&self, value: u8) -> bool {
        self.0[(value >> 6) as usize] & (1u64 << (value & 63)) != 0
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }
}

impl std::fmt::Debug for ByteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::ANY {
            return f.write_str("??");
        }
        let values: Vec<String> = (0u8..=255)
            .filter(|b| self.contains(*b))
            .map(|b| format!("{b:02X}"))
            .collect();
        write!(f, "[{}]", values.join("|"))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PatternMatcher {
    positions: [ByteSet; MAX_PATTERN_VALUES],
    count: u8,
    offset: u16,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::empty()
    }
}

impl PatternMatcher {
    /// A matcher with no positions; it never matches.
    pub fn empty() -> Self {
        Self {
            positions: [ByteSet::default(); MAX_PATTERN_VALUES],
            count: 0,
            offset: 0,
        }
    }

    pub fn from_positions(positions: &[ByteSet], offset: u64) -> Result<Self, PatternError> {
        if positions.len() > MAX_PATTERN_VALUES {
            return Err(PatternError::TooLong {
                count: positions.len(),
                max: MAX_PATTERN_VALUES,
            });
        }
        let offset = u16::try_from(offset).map_err(|_| PatternError::OffsetTooLarge(offset))?;
        let mut matcher = Self::empty();
        for (slot, set) in matcher.positions.iter_mut().zip(positions) {
            if set.is_empty() {
                return Err(PatternError::EmptySet(format!("{set:?}")));
            }
            *slot = *set;
        }
        matcher.count = positions.len() as u8;
        matcher.offset = offset;
        Ok(matcher)
    }

    pub fn from_literal(bytes: &[u8], offset: u64) -> Result<Self, PatternError> {
        let positions: Vec<ByteSet> = bytes.iter().map(|b| ByteSet::single(*b)).collect();
        Self::from_positions(&positions, offset)
    }

    pub fn parse(text: &str, offset: u64) -> Result<Self, PatternError> {
        let positions = parse_positions(text)?;
        Self::from_positions(&positions, offset)
    }

    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn positions(&self) -> &[ByteSet] {
        &self.positions[..self.len()]
    }

    pub fn matches(&self, buf: &[u8]) -> bool {
        if self.count == 0 {
            return false;
        }
        let start = self.offset();
        let Some(window) = buf.get(start..start + self.len()) else {
            return false;
        };
        self.positions()
            .iter()
            .zip(window)
            .all(|(set, byte)| set.contains(*byte))
    }
}

impl std::fmt::Debug for PatternMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternMatcher")
            .field("offset", &self.offset)
            .field("positions", &self.positions())
            .finish()
    }
}

fn parse_positions(text: &str) -> Result<Vec<ByteSet>, PatternError> {
    let mut positions = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        let ch = bytes[i];
        if ch.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        match ch {
            b'"' => {
                i += 1;
                let mut closed = false;
                while i < bytes.len() {
                    let c = bytes[i];
                    i += 1;
                    if c == b'"' {
                        closed = true;
                        break;
                    }
                    if !c.is_ascii() {
                        return Err(PatternError::InvalidToken(text.to_string()));
                    }
                    positions.push(ByteSet::single(c));
                }
                if !closed {
                    return Err(PatternError::UnterminatedString);
                }
            }
            b'[' => {
                let close = text[i..]
                    .find(']')
                    .map(|rel| i + rel)
                    .ok_or_else(|| PatternError::InvalidToken(text[i..].to_string()))?;
                let body = &text[i + 1..close];
                let mut set = ByteSet::default();
                for alt in body.split('|') {
                    let alt = alt.trim();
                    if alt.is_empty() {
                        continue;
                    }
                    set.insert(parse_hex_byte(alt)?);
                }
                if set.is_empty() {
                    return Err(PatternError::EmptySet(text[i..=close].to_string()));
                }
                positions.push(set);
                i = close + 1;
            }
            _ => {
                let end = text[i..]
                    .find(|c: char| c.is_ascii_whitespace())
                    .map(|rel| i + rel)
                    .unwrap_or(text.len());
                let token = &text[i..end];
                if token == "??" {
                    positions.push(ByteSet::ANY);
                } else {
                    positions.push(ByteSet::single(parse_hex_byte(token)?));
                }
                i = end;
            }
        }
    }

    Ok(positions)
}

fn parse_hex_byte(token: &str) -> Result<u8, PatternError> {
    match hex::decode(token) {
        Ok(bytes) if bytes.len() == 1 => Ok(bytes[0]),
        _ => Err(PatternError::InvalidToken(token.to_string())),
    }
}
