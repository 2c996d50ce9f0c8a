//! Identifier and placeholder helpers.

use crate::{AdapterError, Result};
use unicode_normalization::UnicodeNormalization;

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Quotes a SQL identifier.
///
/// Handles schema-qualified names by quoting each part separately.
/// Embedded double quotes are doubled.
pub fn quote_identifier(name: &str) -> String {
    if name.contains('.') {
        name.split('.')
            .map(quote_part)
            .collect::<Vec<_>>()
            .join(".")
    } else {
        quote_part(name)
    }
}

fn quote_part(part: &str) -> String {
    format!("\"{}\"", part.replace('"', "\"\""))
}

/// Quotes `table.column` as `"table"."column"`.
pub fn qualify(table: &str, column: &str) -> String {
    format!("{}.{}", quote_part(table), quote_part(column))
}

/// Truncates an identifier to 63 bytes without splitting a character.
pub fn truncate_identifier(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name.to_string();
    }
    let mut end = MAX_IDENTIFIER_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Validates a SQL identifier (table/column name).
///
/// Supports both simple identifiers and schema-qualified names (e.g., "public.users").
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AdapterError::Compilation("Identifier cannot be empty".to_string()));
    }

    if name.contains('.') {
        let parts: Vec<&str> = name.split('.').collect();

        if parts.len() != 2 {
            return Err(AdapterError::Compilation(format!(
                "Invalid schema-qualified identifier '{}': must be in format 'schema.table'",
                name
            )));
        }

        for part in parts {
            validate_identifier_part(part)?;
        }

        return Ok(());
    }

    validate_identifier_part(name)
}

/// Validates a single part of an identifier (no dots allowed).
pub fn validate_identifier_part(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AdapterError::Compilation("Identifier part cannot be empty".to_string()));
    }

    // Normalize to NFKC to prevent Unicode confusables
    let name = name.nfkc().collect::<String>();

    let first_char = name.chars().next().ok_or_else(|| {
        AdapterError::Compilation(format!("Identifier '{}' is empty or invalid", name))
    })?;
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(AdapterError::Compilation(format!(
            "Identifier '{}' must start with a letter or underscore",
            name
        )));
    }

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(AdapterError::Compilation(format!(
                "Identifier '{}' contains invalid character '{}'",
                name, ch
            )));
        }
    }

    let name_lower = name.to_lowercase();
    if name_lower.starts_with("pg_") {
        return Err(AdapterError::Compilation(format!(
            "Access to PostgreSQL system catalog '{}' is not allowed",
            name
        )));
    }

    if name_lower == "information_schema" {
        return Err(AdapterError::Compilation(
            "Access to information_schema is not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Rewrites `?` placeholders into `$n`, numbering from `first_index`.
///
/// Question marks inside single-quoted literals or double-quoted identifiers
/// are left alone. Returns the rewritten SQL and the number of placeholders.
pub fn rewrite_placeholders(sql: &str, first_index: usize) -> (String, usize) {
    let mut result = String::with_capacity(sql.len() + 8);
    let mut count = 0;
    let mut in_literal = false;
    let mut in_identifier = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_identifier => {
                in_literal = !in_literal;
                result.push(ch);
            }
            '"' if !in_literal => {
                in_identifier = !in_identifier;
                result.push(ch);
            }
            '?' if !in_literal && !in_identifier => {
                result.push('$');
                result.push_str(&(first_index + count).to_string());
                count += 1;
            }
            _ => result.push(ch),
        }
    }

    (result, count)
}

/// Collects every `$n` index referenced outside quoted text.
pub fn placeholder_indices(sql: &str) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;
    let mut in_identifier = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_identifier => in_literal = !in_literal,
            '"' if !in_literal => in_identifier = !in_identifier,
            '$' if !in_literal && !in_identifier => {
                let mut num_str = String::new();
                while let Some(&next_ch) = chars.peek() {
                    if !next_ch.is_ascii_digit() {
                        break;
                    }
                    num_str.push(next_ch);
                    chars.next();
                }
                if let Ok(num) = num_str.parse::<usize>() {
                    indices.push(num);
                }
            }
            _ => {}
        }
    }

    indices
}
