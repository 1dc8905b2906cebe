//! Line-oriented record reader shared by every text format
//!
//! Records are trimmed lines. Empty lines and `//` comments are skipped.
//! Fields are whitespace separated except inside double quotes, which keep
//! embedded spaces and may be empty (`""`).

use std::io::BufRead;

use glam::{DVec2, DVec3};

use crate::error::FormatError;

/// One logical line of input
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 1-based line number in the source stream
    pub line: usize,
    /// Trimmed line text
    pub text: String,
}

impl Record {
    /// Split into fields, labelling any later error with `what`
    pub fn fields(&self, what: impl Into<String>) -> Result<Fields, FormatError> {
        let label = what.into();
        match split_fields(&self.text) {
            Some(tokens) => Ok(Fields {
                label,
                line: self.line,
                tokens,
            }),
            None => Err(FormatError::UnterminatedQuote {
                record: label,
                line: self.line,
            }),
        }
    }

    /// Split into fields and require exactly `expected` of them
    pub fn fields_exact(
        &self,
        what: impl Into<String>,
        expected: usize,
    ) -> Result<Fields, FormatError> {
        let fields = self.fields(what)?;
        fields.expect_len(expected)?;
        Ok(fields)
    }

    /// Text of a line holding a single quoted name, with the quotes removed
    pub fn quoted(&self, what: impl Into<String>) -> Result<String, FormatError> {
        let fields = self.fields_exact(what, 1)?;
        Ok(fields.str(0)?.to_string())
    }

    /// Parse the whole line as one count
    pub fn count(&self, what: impl Into<String>) -> Result<usize, FormatError> {
        self.fields_exact(what, 1)?.count(0)
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.text.starts_with(prefix)
    }

    fn missing(&self, what: impl Into<String>, expected: &str) -> FormatError {
        FormatError::MissingLiteral {
            record: what.into(),
            line: self.line,
            expected: expected.to_string(),
            found: self.text.clone(),
        }
    }
}

/// Split a line into fields; `None` on an unterminated quote
pub fn split_fields(text: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return None;
    }
    if in_token {
        tokens.push(current);
    }
    Some(tokens)
}

/// Fields of one record, with typed accessors that report the record label
#[derive(Debug, Clone)]
pub struct Fields {
    label: String,
    line: usize,
    tokens: Vec<String>,
}

impl Fields {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn expect_len(&self, expected: usize) -> Result<(), FormatError> {
        self.expect_len_in(&[expected])
    }

    /// Accept any of the listed arities
    pub fn expect_len_in(&self, allowed: &[usize]) -> Result<(), FormatError> {
        if allowed.contains(&self.tokens.len()) {
            return Ok(());
        }
        let expected = allowed
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        Err(FormatError::Arity {
            record: self.label.clone(),
            line: self.line,
            expected,
            found: self.tokens.len(),
        })
    }

    pub fn str(&self, index: usize) -> Result<&str, FormatError> {
        self.tokens
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| FormatError::Arity {
                record: self.label.clone(),
                line: self.line,
                expected: format!("at least {}", index + 1),
                found: self.tokens.len(),
            })
    }

    pub fn f64(&self, index: usize) -> Result<f64, FormatError> {
        let token = self.str(index)?;
        token.parse::<f64>().map_err(|_| self.invalid_number(token))
    }

    /// Integer field; integral floats such as `3.0` are accepted
    pub fn int(&self, index: usize) -> Result<i64, FormatError> {
        let token = self.str(index)?;
        if let Ok(value) = token.parse::<i64>() {
            return Ok(value);
        }
        match token.parse::<f64>() {
            Ok(value) if value.fract() == 0.0 && value.is_finite() => Ok(value as i64),
            _ => Err(self.invalid_number(token)),
        }
    }

    pub fn i32(&self, index: usize) -> Result<i32, FormatError> {
        let value = self.int(index)?;
        i32::try_from(value).map_err(|_| self.invalid_number(&value.to_string()))
    }

    /// Non-negative element count
    pub fn count(&self, index: usize) -> Result<usize, FormatError> {
        let value = self.int(index)?;
        usize::try_from(value).map_err(|_| FormatError::InvalidCount {
            record: self.label.clone(),
            line: self.line,
            value,
        })
    }

    pub fn vec2(&self, start: usize) -> Result<DVec2, FormatError> {
        Ok(DVec2::new(self.f64(start)?, self.f64(start + 1)?))
    }

    pub fn vec3(&self, start: usize) -> Result<DVec3, FormatError> {
        Ok(DVec3::new(
            self.f64(start)?,
            self.f64(start + 1)?,
            self.f64(start + 2)?,
        ))
    }

    /// `N` consecutive floats starting at `start`
    pub fn floats<const N: usize>(&self, start: usize) -> Result<[f64; N], FormatError> {
        let mut out = [0.0; N];
        for (i, value) in out.iter_mut().enumerate() {
            *value = self.f64(start + i)?;
        }
        Ok(out)
    }

    fn invalid_number(&self, token: &str) -> FormatError {
        FormatError::InvalidNumber {
            record: self.label.clone(),
            line: self.line,
            value: token.to_string(),
        }
    }
}

/// Buffered record reader with one-record lookahead
pub struct LineReader<R> {
    inner: R,
    line: usize,
    peeked: Option<Record>,
    buf: String,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            peeked: None,
            buf: String::new(),
        }
    }

    /// Line number of the last physical line read
    pub fn line(&self) -> usize {
        self.line
    }

    fn read_physical(&mut self) -> Result<Option<Record>, FormatError> {
        self.buf.clear();
        if self.inner.read_line(&mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        Ok(Some(Record {
            line: self.line,
            text: self.buf.trim().to_string(),
        }))
    }

    /// Next non-blank, non-comment record, or `None` at end of stream
    pub fn next_record(&mut self) -> Result<Option<Record>, FormatError> {
        if let Some(record) = self.peeked.take() {
            return Ok(Some(record));
        }
        while let Some(record) = self.read_physical()? {
            if record.text.is_empty() || record.text.starts_with("//") {
                continue;
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    pub fn peek(&mut self) -> Result<Option<&Record>, FormatError> {
        if self.peeked.is_none() {
            self.peeked = self.next_record()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Next physical line without skipping blanks or comments
    pub fn next_raw(&mut self) -> Result<Option<Record>, FormatError> {
        if let Some(record) = self.peeked.take() {
            return Ok(Some(record));
        }
        self.read_physical()
    }

    /// Next record; end of stream is fatal here
    pub fn require(&mut self, what: impl Into<String>) -> Result<Record, FormatError> {
        match self.next_record()? {
            Some(record) => Ok(record),
            None => Err(FormatError::UnexpectedEof {
                record: what.into(),
                line: self.line,
            }),
        }
    }

    pub fn require_fields(
        &mut self,
        what: impl Into<String>,
        expected: usize,
    ) -> Result<Fields, FormatError> {
        let what = what.into();
        self.require(what.clone())?.fields_exact(what, expected)
    }

    /// Record that must be exactly `literal`
    pub fn require_literal(&mut self, literal: &str) -> Result<Record, FormatError> {
        let record = self.require(literal)?;
        if record.text != literal {
            return Err(record.missing(literal, literal));
        }
        Ok(record)
    }

    /// `Key: <n>` header record
    pub fn require_keyed_count(
        &mut self,
        key: &str,
        what: impl Into<String>,
    ) -> Result<usize, FormatError> {
        let what = what.into();
        let record = self.require(what.clone())?;
        let fields = record.fields_exact(what.clone(), 2)?;
        if fields.str(0)? != key {
            return Err(record.missing(what, key));
        }
        fields.count(1)
    }

    /// Signed `Key: <n>` header record
    pub fn require_keyed_int(
        &mut self,
        key: &str,
        what: impl Into<String>,
    ) -> Result<i64, FormatError> {
        let what = what.into();
        let record = self.require(what.clone())?;
        let fields = record.fields_exact(what.clone(), 2)?;
        if fields.str(0)? != key {
            return Err(record.missing(what, key));
        }
        fields.int(1)
    }
}

/// Fixed eight-decimal rendering used by every writer
pub fn fmt_float(value: f64) -> String {
    format!("{:.8}", value)
}
