//! T-SQL formatter backed by `sqlparser`.

use crate::error::SyntaxError;
use crate::formatter::{FormatOptions, Formatter};
use sqlparser::ast::{visit_expressions, visit_relations, Expr, Ident, ObjectNamePart, Statement};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::{Parser, ParserOptions};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};
use std::ops::ControlFlow;
use tracing::debug;

/// T-SQL reserved words that may only name an object when bracketed or
/// double-quoted. Sorted for binary search.
const RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BACKUP", "BEGIN", "BETWEEN", "BREAK",
    "BROWSE", "BULK", "BY", "CASCADE", "CASE", "CHECK", "CHECKPOINT", "CLOSE", "CLUSTERED",
    "COLLATE", "COLUMN", "COMMIT", "COMPUTE", "CONSTRAINT", "CONTINUE", "CONVERT", "CREATE",
    "CROSS", "CURSOR", "DEALLOCATE", "DECLARE", "DELETE", "DENY", "DESC", "DISTINCT", "DROP",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXEC", "EXECUTE", "EXISTS", "FETCH", "FOR", "FOREIGN",
    "FROM", "FULL", "FUNCTION", "GOTO", "GRANT", "GROUP", "HAVING", "IF", "IN", "INDEX", "INNER",
    "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "LEFT", "LIKE", "MERGE", "NOT", "OPEN", "OR",
    "ORDER", "OUTER", "OVER", "PRIMARY", "PROCEDURE", "RETURN", "REVOKE", "RIGHT", "ROLLBACK",
    "SELECT", "SET", "TABLE", "THEN", "TOP", "TRAN", "TRANSACTION", "TRUNCATE", "UNION", "UNIQUE",
    "UPDATE", "VALUES", "VIEW", "WHEN", "WHERE", "WHILE", "WITH",
];

/// Formats T-SQL by parsing it with the MS SQL dialect and pretty-printing
/// the resulting statements.
#[derive(Debug)]
pub struct TsqlFormatter {
    dialect: MsSqlDialect,
}

impl TsqlFormatter {
    pub fn new() -> Self {
        Self {
            dialect: MsSqlDialect {},
        }
    }

    fn tokenize(
        &self,
        sql: &str,
        options: FormatOptions,
    ) -> Result<Vec<TokenWithSpan>, SyntaxError> {
        let mut tokens = Tokenizer::new(&self.dialect, sql)
            .tokenize_with_location()
            .map_err(|e| SyntaxError::from_parser_message(&e.to_string()))?;

        if !options.initial_quoted_identifiers {
            // QUOTED_IDENTIFIER OFF: "text" is a string literal, not a name.
            for t in &mut tokens {
                if let Token::Word(word) = &t.token {
                    if word.quote_style == Some('"') {
                        t.token = Token::SingleQuotedString(word.value.clone());
                    }
                }
            }
        }
        Ok(tokens)
    }

    fn parse(&self, sql: &str, options: FormatOptions) -> Result<Vec<Statement>, SyntaxError> {
        let tokens = self.tokenize(sql, options)?;
        let end = end_of_input(&tokens);

        // Batches separate statements with newlines as often as semicolons.
        let parser_options = ParserOptions {
            require_semicolon_stmt_delimiter: false,
            ..ParserOptions::default()
        };
        Parser::new(&self.dialect)
            .with_options(parser_options)
            .with_tokens_with_locations(tokens)
            .parse_statements()
            .map_err(|e| {
                let error = SyntaxError::from_parser_message(&e.to_string());
                match (error.line, end) {
                    // Running out of input carries no location of its own.
                    (None, Some(end)) => error.at(end.line, end.column),
                    _ => error,
                }
            })
    }
}

/// Location just past the last meaningful token, if there is one.
fn end_of_input(tokens: &[TokenWithSpan]) -> Option<Location> {
    tokens
        .iter()
        .rev()
        .find(|t| !matches!(t.token, Token::Whitespace(_) | Token::EOF))
        .map(|t| t.span.end)
        .filter(|end| end.line > 0)
}

/// Reports unquoted reserved words that the parser accepted as names, such as
/// the second `select` in `select select`.
fn reserved_word_misuse(statements: &[Statement]) -> Vec<SyntaxError> {
    let mut errors = Vec::new();
    let mut check = |ident: &Ident| {
        if ident.quote_style.is_none()
            && RESERVED
                .binary_search(&ident.value.to_ascii_uppercase().as_str())
                .is_ok()
        {
            let error = SyntaxError::new(format!(
                "Incorrect syntax near '{}': reserved keyword used as an identifier",
                ident.value
            ));
            let start = ident.span.start;
            errors.push(if start.line > 0 {
                error.at(start.line, start.column)
            } else {
                error
            });
        }
    };

    for statement in statements {
        let _ = visit_expressions(statement, |expr| {
            match expr {
                Expr::Identifier(ident) => check(ident),
                Expr::CompoundIdentifier(idents) => idents.iter().for_each(&mut check),
                _ => {}
            }
            ControlFlow::<()>::Continue(())
        });
        let _ = visit_relations(statement, |name| {
            for part in &name.0 {
                if let ObjectNamePart::Identifier(ident) = part {
                    check(ident);
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }

    errors.sort_by_key(|e| (e.line, e.column));
    errors
}

impl Default for TsqlFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for TsqlFormatter {
    fn format(&self, sql: &str, options: FormatOptions) -> Result<String, Vec<SyntaxError>> {
        let statements = self.parse(sql, options).map_err(|e| {
            debug!("SQL rejected: {}", e);
            vec![e]
        })?;

        let errors = reserved_word_misuse(&statements);
        if !errors.is_empty() {
            debug!("SQL rejected: {} reserved word(s) used as names", errors.len());
            return Err(errors);
        }

        if statements.is_empty() {
            return Ok(String::new());
        }

        let mut formatted = statements
            .iter()
            .map(|statement| format!("{:#}", statement))
            .collect::<Vec<_>>()
            .join(";\n");
        formatted.push(';');

        debug!(
            "Formatted {} statement(s), {} -> {} bytes",
            statements.len(),
            sql.len(),
            formatted.len()
        );
        Ok(formatted)
    }
}
