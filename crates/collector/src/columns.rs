#![forbid(unsafe_code)]

//! Whitespace-delimited columns of command output.
//!
//! Columns are numbered from 1, the way the tools that print them document
//! their output. Every accessor returns a [`Result`] instead of a sentinel,
//! so a missing column and a column holding `0` stay distinguishable; chain
//! them and decide once, at the end, whether to propagate or default.

use regex::Regex;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("column {column} out of range for a line of {len} columns")]
    OutOfRange { column: usize, len: usize },

    #[error("`{text}` does not match `{pattern}`")]
    NoMatch { text: String, pattern: String },

    #[error("`{text}` is not a valid {target}")]
    Parse { text: String, target: &'static str },
}

/// One line of command output, split into columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    fields: Vec<String>,
}

impl Line {
    /// Split `text` on runs of whitespace.
    ///
    /// With `max_fields` set, at most that many columns are produced and the
    /// last one keeps the rest of the line verbatim, inner whitespace
    /// included. Without `trim`, leading or trailing whitespace yields an
    /// empty first or last column.
    pub fn parse(text: &str, trim: bool, max_fields: Option<usize>) -> Self {
        let text = if trim { text.trim() } else { text };
        Self {
            text: text.to_owned(),
            fields: split_fields(text, max_fields),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `n`th column, counting from 1.
    pub fn column(&self, n: usize) -> Field<'_> {
        match n.checked_sub(1).and_then(|idx| self.fields.get(idx)) {
            Some(text) => Field(Ok(text)),
            None => Field(Err(FieldError::OutOfRange {
                column: n,
                len: self.fields.len(),
            })),
        }
    }

    /// The `n`th column counting back from the end; `column_back(1)` is the
    /// last column.
    pub fn column_back(&self, n: usize) -> Field<'_> {
        match (self.fields.len() + 1).checked_sub(n) {
            Some(column) if n > 0 => self.column(column),
            _ => Field(Err(FieldError::OutOfRange {
                column: n,
                len: self.fields.len(),
            })),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Split every line of `output`.
pub fn split_lines(output: &str, trim: bool, max_fields: Option<usize>) -> Vec<Line> {
    output
        .lines()
        .map(|line| Line::parse(line, trim, max_fields))
        .collect()
}

fn split_fields(text: &str, max_fields: Option<usize>) -> Vec<String> {
    let mut fields = Vec::new();
    if text.is_empty() {
        return fields;
    }

    let limit = max_fields.unwrap_or(usize::MAX).max(1);
    let mut rest = text;
    while fields.len() + 1 < limit {
        let Some(start) = rest.find(char::is_whitespace) else {
            break;
        };
        fields.push(rest[..start].to_owned());
        rest = rest[start..].trim_start();
    }
    fields.push(rest.to_owned());
    fields
}

/// A column, or the reason it could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field<'a>(Result<&'a str, FieldError>);

impl<'a> Field<'a> {
    pub fn text(&self) -> Result<&'a str, FieldError> {
        self.0.clone()
    }

    /// Parse the column as any [`FromStr`] type: integers, floats, ...
    pub fn parse<T: FromStr>(&self) -> Result<T, FieldError> {
        let text = self.text()?;
        text.parse().map_err(|_| FieldError::Parse {
            text: text.to_owned(),
            target: std::any::type_name::<T>(),
        })
    }

    /// Narrow the column to the first capture group of `pattern`.
    pub fn capture(&self, pattern: &Regex) -> Field<'a> {
        let text = match &self.0 {
            Ok(text) => *text,
            Err(_) => return self.clone(),
        };
        match pattern.captures(text).and_then(|caps| caps.get(1)) {
            Some(m) => Field(Ok(m.as_str())),
            None => Field(Err(FieldError::NoMatch {
                text: text.to_owned(),
                pattern: pattern.as_str().to_owned(),
            })),
        }
    }

    pub fn into_result(self) -> Result<&'a str, FieldError> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const RULE: &str =
        "1 0 23453 tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:1080 /* pid=10234;type=server */";

    #[test]
    fn natural_split() {
        let line = Line::parse(RULE, true, None);
        assert_eq!(line.len(), 14);
        assert_eq!(line.column(3).parse::<u64>(), Ok(23453));
        assert_eq!(line.column(13).text(), Ok("pid=10234;type=server"));
        assert_eq!(line.column_back(1).text(), Ok("*/"));
    }

    #[test]
    fn capped_split_keeps_the_tail() {
        let line = Line::parse(
            "root  4242  1  0 10:00 ?  00:00:01 /usr/bin/java -jar  app.jar",
            true,
            Some(8),
        );
        assert_eq!(line.len(), 8);
        assert_eq!(line.column(2).parse::<u32>(), Ok(4242));
        assert_eq!(line.column(8).text(), Ok("/usr/bin/java -jar  app.jar"));
    }

    #[test]
    fn untrimmed_edges_produce_empty_columns() {
        let line = Line::parse("  a b ", false, None);
        assert_eq!(line.column(1).text(), Ok(""));
        assert_eq!(line.column(2).text(), Ok("a"));
        assert_eq!(line.column_back(1).text(), Ok(""));
    }

    #[test]
    fn errors_short_circuit_through_the_chain() {
        let line = Line::parse(RULE, true, None);
        let dpt = Regex::new(r"dpt:(\d+)").unwrap();
        let spt = Regex::new(r"spt:(\d+)").unwrap();

        assert_eq!(line.column(11).capture(&dpt).parse::<u16>(), Ok(1080));
        assert!(matches!(
            line.column(11).capture(&spt).parse::<u16>(),
            Err(FieldError::NoMatch { .. })
        ));
        assert!(matches!(
            line.column(40).capture(&dpt).parse::<u16>(),
            Err(FieldError::OutOfRange { column: 40, len: 14 })
        ));
        assert_eq!(line.column(0).parse::<u16>().unwrap_or_default(), 0);
        assert_eq!(line.column_back(0).text().ok(), None);
        assert_eq!(line.column_back(15).text().ok(), None);
    }

    #[test]
    fn typed_accessors() {
        let line = Line::parse("1 root 20 0 1.2g 13120 8400 S 12.5 0.1 0:05.12 a b", true, Some(12));
        assert_eq!(line.column(9).parse::<f32>(), Ok(12.5));
        assert_eq!(line.column(1).parse::<i64>(), Ok(1));
        assert!(matches!(
            line.column(2).parse::<u64>(),
            Err(FieldError::Parse { .. })
        ));
    }

    #[test]
    fn empty_and_multiline_output() {
        let lines = split_lines("header\n\n  x  y \n", true, None);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].is_empty());
        assert_eq!(lines[2].as_str(), "x  y");
        assert_eq!(lines[2].len(), 2);
    }

    proptest! {
        #[test]
        fn cap_bounds_column_count(
            words in prop::collection::vec("[a-z0-9]{1,6}", 1..20),
            cap in 1usize..10,
        ) {
            let text = words.join("  ");
            let line = Line::parse(&text, true, Some(cap));
            prop_assert_eq!(line.len(), words.len().min(cap));
            for (i, word) in words.iter().take(cap - 1).enumerate() {
                prop_assert_eq!(line.column(i + 1).text(), Ok(word.as_str()));
            }
        }
    }
}
