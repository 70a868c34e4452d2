//! SQL statement shape classification.
//!
//! Classification is purely lexical and runs before any connection is
//! touched, so a rejected statement never reaches the store.

use crate::error::DbError;

/// Leading keywords accepted as reads.
const READ_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "VALUES"];

/// Pragmas that only introspect the schema.
const INTROSPECTION_PRAGMAS: &[&str] = &[
    "table_info",
    "table_xinfo",
    "table_list",
    "index_list",
    "index_info",
    "foreign_key_list",
];

/// The shape of a single SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// A query that only reads rows.
    Read,
    /// A schema introspection pragma.
    Introspection,
    /// Anything else, tagged with its leading keyword.
    Write(String),
}

impl StatementKind {
    pub fn is_read(&self) -> bool {
        !matches!(self, StatementKind::Write(_))
    }
}

/// Classifies a single SQL statement.
///
/// Leading whitespace and comments are skipped. A trailing `;` is tolerated,
/// but any SQL after a top-level `;` is rejected outright: only one statement
/// may be submitted at a time.
///
/// # Errors
///
/// Returns `DbError::Validation` for empty input and `DbError::Permission`
/// for multi-statement input.
pub fn classify(sql: &str) -> Result<StatementKind, DbError> {
    let body = skip_trivia(sql);
    if body.is_empty() {
        return Err(DbError::Validation("empty SQL statement".to_string()));
    }
    if has_trailing_statement(body) {
        return Err(DbError::Permission(
            "multiple statements are not allowed".to_string(),
        ));
    }

    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    if READ_KEYWORDS.contains(&keyword.as_str()) {
        return Ok(StatementKind::Read);
    }

    if keyword == "PRAGMA" && is_introspection_pragma(&body[keyword.len()..]) {
        return Ok(StatementKind::Introspection);
    }

    if keyword.is_empty() {
        return Err(DbError::Validation(
            "statement does not start with a keyword".to_string(),
        ));
    }
    Ok(StatementKind::Write(keyword))
}

/// Strips leading whitespace, `-- line` and `/* block */` comments.
fn skip_trivia(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            s = match rest.find('\n') {
                Some(i) => &rest[i + 1..],
                None => "",
            };
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = match rest.find("*/") {
                Some(i) => &rest[i + 2..],
                None => "",
            };
        } else {
            return s;
        }
    }
}

/// Returns `true` if a top-level `;` is followed by anything but trivia.
fn has_trailing_statement(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // Doubled quote is an escaped quote.
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b';' => {
                let rest = skip_trivia(&sql[i + 1..]);
                return !rest.is_empty() && !rest.chars().all(|c| c == ';');
            }
            _ => {}
        }
        i += 1;
    }
    false
}

fn is_introspection_pragma(after_keyword: &str) -> bool {
    let rest = after_keyword.trim_start();
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    // Schema-qualified form: main.table_info(...)
    let name = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    // An assignment turns any pragma into a write.
    INTROSPECTION_PRAGMAS.contains(&name.as_str()) && !rest.contains('=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_accepted() {
        for sql in [
            "SELECT COUNT(*) FROM usuarios",
            "  select * from usuarios limit 3;",
            "-- how many\nSELECT 1",
            "/* c */ WITH x AS (SELECT 1) SELECT * FROM x",
            "EXPLAIN QUERY PLAN SELECT * FROM usuarios",
            "VALUES (1), (2)",
        ] {
            assert_eq!(classify(sql).unwrap(), StatementKind::Read, "{sql}");
        }
    }

    #[test]
    fn introspection_pragmas_are_accepted() {
        assert_eq!(
            classify("PRAGMA table_info(usuarios)").unwrap(),
            StatementKind::Introspection
        );
        assert_eq!(
            classify("pragma main.table_list").unwrap(),
            StatementKind::Introspection
        );
    }

    #[test]
    fn writes_are_tagged() {
        for (sql, kw) in [
            ("DROP TABLE usuarios", "DROP"),
            ("delete from usuarios", "DELETE"),
            ("INSERT INTO usuarios VALUES (1)", "INSERT"),
            ("update usuarios set nombre = 'x'", "UPDATE"),
            ("PRAGMA query_only = OFF", "PRAGMA"),
            ("ATTACH DATABASE 'x' AS y", "ATTACH"),
        ] {
            assert_eq!(
                classify(sql).unwrap(),
                StatementKind::Write(kw.to_string()),
                "{sql}"
            );
        }
    }

    #[test]
    fn stacked_statements_are_rejected() {
        let err = classify("SELECT 1; DROP TABLE usuarios").unwrap_err();
        assert!(matches!(err, DbError::Permission(_)));
    }

    #[test]
    fn semicolons_inside_literals_are_ignored() {
        assert_eq!(
            classify("SELECT * FROM usuarios WHERE nombre = 'a;b'").unwrap(),
            StatementKind::Read
        );
        assert_eq!(
            classify("SELECT 1; -- trailing comment").unwrap(),
            StatementKind::Read
        );
        assert_eq!(classify("SELECT 1;;").unwrap(), StatementKind::Read);
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(classify("   "), Err(DbError::Validation(_))));
        assert!(matches!(classify("-- only"), Err(DbError::Validation(_))));
    }
}
