//! A small query language for ad-hoc filters.
//!
//! Queries are whitespace-separated tokens. Text inside double quotes is a
//! single token with its spaces preserved; `\"` is a literal quote and a
//! backslash before whitespace keeps the whitespace in the token.
//!
//! Each plain token is compared against the *current field*, which starts
//! as the caller's default field. Directives change how later tokens are
//! interpreted:
//!
//! | token | effect |
//! |---|---|
//! | `@field` | switch the current field (must be allowed) and reset modifiers |
//! | `@not` | negate later comparisons |
//! | `@like` | compare with `LIKE` instead of `=` |
//! | `@file` | read later tokens as files whose non-empty lines form an `IN` list |
//! | `@null`, `@notnull` | match `IS NULL` / `IS NOT NULL` |
//! | `@true`, `@false` | match `IS TRUE` / `IS FALSE` |
//!
//! Negation flips the polarity of the last two rows as well. Quoted tokens
//! are never directives, so `"@null"` matches the literal text, while a
//! quoted path after `@file` is still read as a file.
//!
//! # Example
//!
//! ```
//! use modelstore_sqlite::query::{tokenize, tokens_to_where};
//! use modelstore_sqlite::SqlValue;
//!
//! let tokens = tokenize(r#"@name "foo bar" @not @like baz"#, "path", &["path", "name"]).unwrap();
//! let clause = tokens_to_where(&tokens);
//! assert_eq!(clause.sql, "(name = ?) and (name not like ?)");
//! assert_eq!(
//!     clause.params,
//!     vec![SqlValue::Text("foo bar".into()), SqlValue::Text("baz".into())]
//! );
//! ```

use std::fs;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::filter::{SqlValue, WhereClause};

/// Value side of a [`QueryToken`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValue {
    /// SQL `NULL`.
    Null,
    /// A boolean literal.
    Bool(bool),
    /// A text operand.
    Text(String),
    /// A list of text operands.
    List(Vec<String>),
}

/// Comparison applied by a [`QueryToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `IS`
    Is,
    /// `IS NOT`
    IsNot,
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `IN` for lists, substring match for text.
    In,
    /// `NOT IN` for lists, no substring match for text.
    NotIn,
}

impl Operation {
    /// Returns `true` for comparisons that exclude rows. Exclusions on one
    /// field are combined with `AND`, inclusions with `OR`.
    pub fn is_exclusion(self) -> bool {
        matches!(self, Operation::Ne | Operation::NotLike | Operation::NotIn)
    }
}

/// One field/value/operation triple of a parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryToken {
    /// Field compared.
    pub field: String,
    /// Operand.
    pub value: TokenValue,
    /// Comparison.
    pub operation: Operation,
}

impl QueryToken {
    fn new(field: &str, value: TokenValue, operation: Operation) -> Self {
        Self {
            field: field.to_string(),
            value,
            operation,
        }
    }
}

struct RawToken {
    text: String,
    quoted: bool,
}

/// Parses a query string into tokens.
///
/// # Errors
///
/// Returns [`StoreError::InvalidField`] if an `@field` directive names a
/// field outside `allowed_fields`, and [`StoreError::Io`] if a file given
/// after `@file` cannot be read.
pub fn tokenize(query: &str, default_field: &str, allowed_fields: &[&str]) -> Result<Vec<QueryToken>> {
    let mut field = default_field.to_string();
    let mut like = false;
    let mut negate = false;
    let mut from_file = false;
    let mut tokens = Vec::new();

    for raw in split(query) {
        if raw.quoted {
            let token = if from_file {
                file_list(&field, Path::new(&raw.text), negate)?
            } else {
                comparison(&field, raw.text, negate, like)
            };
            tokens.push(token);
            continue;
        }

        match raw.text.as_str() {
            "@null" => tokens.push(QueryToken::new(
                &field,
                TokenValue::Null,
                if negate { Operation::IsNot } else { Operation::Is },
            )),
            "@notnull" => tokens.push(QueryToken::new(
                &field,
                TokenValue::Null,
                if negate { Operation::Is } else { Operation::IsNot },
            )),
            "@true" => tokens.push(QueryToken::new(
                &field,
                TokenValue::Bool(!negate),
                Operation::Is,
            )),
            "@false" => tokens.push(QueryToken::new(
                &field,
                TokenValue::Bool(negate),
                Operation::Is,
            )),
            "@not" => negate = true,
            "@like" => like = true,
            "@file" => from_file = true,
            directive if directive.starts_with('@') => {
                let name = &directive[1..];
                if !allowed_fields.contains(&name) {
                    return Err(StoreError::InvalidField(name.to_string()));
                }
                field = name.to_string();
                like = false;
                negate = false;
                from_file = false;
            }
            path if from_file => tokens.push(file_list(&field, Path::new(path), negate)?),
            _ => tokens.push(comparison(&field, raw.text.clone(), negate, like)),
        }
    }

    Ok(tokens)
}

fn comparison(field: &str, text: String, negate: bool, like: bool) -> QueryToken {
    let operation = match (negate, like) {
        (false, false) => Operation::Eq,
        (true, false) => Operation::Ne,
        (false, true) => Operation::Like,
        (true, true) => Operation::NotLike,
    };
    QueryToken::new(field, TokenValue::Text(text), operation)
}

fn file_list(field: &str, path: &Path, negate: bool) -> Result<QueryToken> {
    Ok(QueryToken::new(
        field,
        TokenValue::List(read_lines(path)?),
        if negate { Operation::NotIn } else { Operation::In },
    ))
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn split(query: &str) -> Vec<RawToken> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = query.chars().peekable();

    let mut flush = |current: &mut String, quoted: bool| {
        if !current.is_empty() {
            tokens.push(RawToken {
                text: std::mem::take(current),
                quoted,
            });
        }
    };

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.peek() {
                Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                Some(&next) if next.is_whitespace() && !in_quotes => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push('\\'),
            },
            '"' if in_quotes => {
                flush(&mut current, true);
                in_quotes = false;
            }
            '"' => {
                flush(&mut current, false);
                in_quotes = true;
            }
            c if c.is_whitespace() && !in_quotes => flush(&mut current, false),
            c => current.push(c),
        }
    }
    // an unterminated quote runs to the end of the query
    flush(&mut current, in_quotes);

    tokens
}

/// Compiles tokens into a where clause.
///
/// Tokens are grouped by field, fields in order of first occurrence. Each
/// field contributes its inclusive comparisons combined with `or`, then its
/// exclusive ones combined with `and`; groups are combined with `and`.
/// Every operand is a positional parameter.
pub fn tokens_to_where(tokens: &[QueryToken]) -> WhereClause {
    let mut fields: Vec<(&str, Vec<&QueryToken>, Vec<&QueryToken>)> = Vec::new();
    for token in tokens {
        let index = match fields.iter().position(|(f, _, _)| *f == token.field) {
            Some(index) => index,
            None => {
                fields.push((token.field.as_str(), Vec::new(), Vec::new()));
                fields.len() - 1
            }
        };
        let (_, inclusive, exclusive) = &mut fields[index];
        if token.operation.is_exclusion() {
            exclusive.push(token);
        } else {
            inclusive.push(token);
        }
    }

    let mut clauses = Vec::with_capacity(fields.len() * 2);
    let mut params = Vec::new();

    for (field, inclusive, exclusive) in fields {
        for (members, joiner) in [(inclusive, " or "), (exclusive, " and ")] {
            let group: Vec<String> = members
                .into_iter()
                .filter_map(|token| compile_token(field, token, &mut params))
                .collect();
            if !group.is_empty() {
                clauses.push(format!("({})", group.join(joiner)));
            }
        }
    }

    WhereClause::new(clauses.join(" and "), params)
}

fn compile_token(field: &str, token: &QueryToken, params: &mut Vec<SqlValue>) -> Option<String> {
    use Operation::*;

    let sql = match (&token.value, token.operation) {
        (TokenValue::Null, Is) => format!("{field} is null"),
        (TokenValue::Null, IsNot) => format!("{field} is not null"),
        (TokenValue::Bool(b), Is) => format!("{field} is {b}"),
        (TokenValue::Bool(b), IsNot) => format!("{field} is {}", !b),
        (TokenValue::List(values), In | NotIn) => {
            let placeholders = vec!["?"; values.len()].join(",");
            params.extend(values.iter().cloned().map(SqlValue::Text));
            let negation = if token.operation == NotIn { "not " } else { "" };
            format!("{field} {negation}in ({placeholders})")
        }
        (TokenValue::Text(value), op) => {
            let sql = match op {
                In => format!("instr({field}, ?) != 0"),
                NotIn => format!("instr({field}, ?) = 0"),
                Eq => format!("{field} = ?"),
                Ne => format!("{field} != ?"),
                Like => format!("{field} like ?"),
                NotLike => format!("{field} not like ?"),
                Is | IsNot => return None,
            };
            params.push(SqlValue::Text(value.clone()));
            sql
        }
        _ => return None,
    };
    Some(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[&str] = &["path", "name", "puid", "warning", "processed"];

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn test_quoted_phrases_and_grouping() {
        let tokens = tokenize(r#"@name "foo bar" @not @like baz"#, "path", FIELDS).unwrap();
        assert_eq!(
            tokens,
            vec![
                QueryToken::new("name", TokenValue::Text("foo bar".into()), Operation::Eq),
                QueryToken::new("name", TokenValue::Text("baz".into()), Operation::NotLike),
            ]
        );
        let clause = tokens_to_where(&tokens);
        assert_eq!(clause.sql, "(name = ?) and (name not like ?)");
        assert_eq!(clause.params, vec![text("foo bar"), text("baz")]);
    }

    #[test]
    fn test_default_field_and_or_within_field() {
        let clause = tokens_to_where(&tokenize("a.txt b.txt @puid fmt/18", "path", FIELDS).unwrap());
        assert_eq!(clause.sql, "(path = ? or path = ?) and (puid = ?)");
        assert_eq!(clause.params, vec![text("a.txt"), text("b.txt"), text("fmt/18")]);
    }

    #[test]
    fn test_exclusions_are_anded() {
        let clause = tokens_to_where(&tokenize("@not a b", "path", FIELDS).unwrap());
        assert_eq!(clause.sql, "(path != ? and path != ?)");
    }

    #[test]
    fn test_field_switch_resets_modifiers() {
        let tokens = tokenize("@not @like %x% @name y", "path", FIELDS).unwrap();
        assert_eq!(tokens[0].operation, Operation::NotLike);
        assert_eq!(tokens[1].field, "name");
        assert_eq!(tokens[1].operation, Operation::Eq);
    }

    #[test]
    fn test_null_and_boolean_directives() {
        let tokens = tokenize(
            "@warning @null @not @notnull @processed @true @not @false",
            "path",
            FIELDS,
        )
        .unwrap();
        let clause = tokens_to_where(&tokens);
        assert_eq!(
            clause.sql,
            "(warning is null or warning is null) and (processed is true or processed is true)"
        );
        assert!(clause.params.is_empty());

        let negated = tokens_to_where(&tokenize("@not @null @not @true", "warning", FIELDS).unwrap());
        assert_eq!(negated.sql, "(warning is not null or warning is false)");

        let plain = tokens_to_where(&tokenize("@notnull @false", "warning", FIELDS).unwrap());
        assert_eq!(plain.sql, "(warning is not null or warning is false)");
    }

    #[test]
    fn test_escaped_quotes_and_spaces() {
        let tokens = tokenize(r#""say \"hi\"" a\ b c\d"#, "name", FIELDS).unwrap();
        let values: Vec<_> = tokens.iter().map(|t| t.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                TokenValue::Text(r#"say "hi""#.into()),
                TokenValue::Text("a b".into()),
                TokenValue::Text(r"c\d".into()),
            ]
        );
    }

    #[test]
    fn test_quoted_directive_is_literal() {
        let tokens = tokenize(r#""@null""#, "name", FIELDS).unwrap();
        assert_eq!(tokens[0].value, TokenValue::Text("@null".into()));
        assert_eq!(tokens[0].operation, Operation::Eq);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = tokenize("@size 10", "path", FIELDS).unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(ref f) if f == "size"));
        assert_eq!(err.to_string(), "invalid field name size");
    }

    #[test]
    fn test_file_lists() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("puids.txt");
        fs::write(&list, "fmt/18\n\nfmt/19\r\nfmt/20\n").unwrap();
        let query = format!("@puid @file {} @not @file {}", list.display(), list.display());

        let tokens = tokenize(&query, "path", FIELDS).unwrap();
        assert_eq!(
            tokens[0].value,
            TokenValue::List(vec!["fmt/18".into(), "fmt/19".into(), "fmt/20".into()])
        );
        assert_eq!(tokens[0].operation, Operation::In);
        assert_eq!(tokens[1].operation, Operation::NotIn);

        let clause = tokens_to_where(&tokens);
        assert_eq!(clause.sql, "(puid in (?,?,?)) and (puid not in (?,?,?))");
        assert_eq!(clause.params.len(), 6);
    }

    #[test]
    fn test_quoted_file_path_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("my list.txt");
        fs::write(&list, "fmt/18\nfmt/19\n").unwrap();
        let query = format!("@puid @file \"{}\"", list.display());

        let tokens = tokenize(&query, "path", FIELDS).unwrap();
        assert_eq!(
            tokens,
            vec![QueryToken::new(
                "puid",
                TokenValue::List(vec!["fmt/18".into(), "fmt/19".into()]),
                Operation::In,
            )]
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = tokenize("@file /nonexistent/list.txt", "path", FIELDS).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn test_substring_tokens() {
        let tokens = vec![
            QueryToken::new("name", TokenValue::Text("abc".into()), Operation::In),
            QueryToken::new("name", TokenValue::Text("xyz".into()), Operation::NotIn),
        ];
        let clause = tokens_to_where(&tokens);
        assert_eq!(clause.sql, "(instr(name, ?) != 0) and (instr(name, ?) = 0)");
    }

    #[test]
    fn test_empty_query() {
        assert!(tokenize("   ", "path", FIELDS).unwrap().is_empty());
        assert!(tokens_to_where(&[]).is_empty());
    }

    #[test]
    fn test_determinism() {
        let query = "@name a @puid b @name c @not d";
        let first = tokens_to_where(&tokenize(query, "path", FIELDS).unwrap());
        let second = tokens_to_where(&tokenize(query, "path", FIELDS).unwrap());
        assert_eq!(first, second);
        assert_eq!(first.sql, "(name = ? or name = ?) and (name != ?) and (puid = ?)");
        assert_eq!(
            first.params,
            vec![text("a"), text("c"), text("d"), text("b")]
        );
    }
}
