//! Translation of persisted column types into resolved fields.
//!
//! Discovered backend types go through three steps: a single outer
//! `Nullable(...)` wrapper is dropped, array types have their named tuple
//! elements reduced to plain element types (the backend reports array of
//! struct columns with element names it cannot read back), and the result is
//! mapped onto the field vocabulary.

use serde::Serialize;
use thiserror::Error;

use crate::schema::column::{ColumnSchema, FieldSchema, RawColumnType};
use crate::schema::field_type::{FieldDef, FieldType};

const NULLABLE_PREFIX: &str = "Nullable(";
const ARRAY_PREFIX: &str = "Array(";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown backend type '{backend_type}' for column '{column}'")]
    UnknownBackendType { column: String, backend_type: String },

    #[error("cannot flatten type '{backend_type}' for column '{column}': {reason}")]
    UnflattenableType {
        column: String,
        backend_type: String,
        reason: String,
    },
}

/// Output of normalization: the resolved fields plus the column structure
/// string the virtual table function is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedSchema {
    pub fields: FieldSchema,
    pub structure: String,
}

pub fn normalize(columns: &ColumnSchema) -> Result<FieldSchema, SchemaError> {
    normalize_columns(columns).map(|normalized| normalized.fields)
}

pub fn normalize_columns(columns: &ColumnSchema) -> Result<NormalizedSchema, SchemaError> {
    let mut fields = FieldSchema::with_capacity(columns.len());
    let mut structure = Vec::with_capacity(columns.len());

    for (column, raw) in columns {
        let backend_type = clean_backend_type(column, raw.backend_type())?;
        structure.push(format!("{} {}", column, backend_type));

        let field_type = match raw {
            RawColumnType::Legacy(_) => FieldType::from_backend_type(&backend_type).ok_or_else(|| {
                SchemaError::UnknownBackendType {
                    column: column.clone(),
                    backend_type: backend_type.clone(),
                }
            })?,
            RawColumnType::Structured { hogql, .. } => *hogql,
        };

        fields.insert(column.clone(), FieldDef::new(column.clone(), field_type));
    }

    Ok(NormalizedSchema {
        fields,
        structure: structure.join(", "),
    })
}

/// Backend type with the outer nullable wrapper removed and array element
/// names flattened away.
pub fn clean_backend_type(column: &str, backend_type: &str) -> Result<String, SchemaError> {
    let stripped = strip_nullable(backend_type);
    if stripped.starts_with(ARRAY_PREFIX) {
        remove_named_tuples(stripped).map_err(|reason| SchemaError::UnflattenableType {
            column: column.to_string(),
            backend_type: backend_type.to_string(),
            reason,
        })
    } else {
        Ok(stripped.to_string())
    }
}

/// Strips exactly one outer `Nullable(...)`.
pub fn strip_nullable(backend_type: &str) -> &str {
    backend_type
        .strip_prefix(NULLABLE_PREFIX)
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(backend_type)
}

/// Rewrites a composite type so tuple elements carry types only:
/// `Array(Tuple(id String, tags Array(String)))` becomes
/// `Array(Tuple(String, Array(String)))`.
///
/// Any other type is kept as written, arguments included (`FixedString(16)`,
/// `Enum8('a' = 1)`). Only input whose nesting cannot be parsed is an error.
pub fn remove_named_tuples(backend_type: &str) -> Result<String, String> {
    let tokens = tokenize(backend_type)?;
    let mut parser = TypeParser { tokens, pos: 0 };
    let rendered = parser.parse_type()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected trailing input after '{}'", rendered));
    }
    Ok(rendered)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Literal(String),
    Open,
    Close,
    Comma,
    Eq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            ',' => tokens.push(Token::Comma),
            '=' => tokens.push(Token::Eq),
            c if c.is_whitespace() => {}
            '\'' | '`' => {
                let quote = c;
                let mut end = None;
                let mut escaped = false;
                for (idx, ch) in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == quote {
                        end = Some(idx);
                        break;
                    }
                }
                let end = end.ok_or_else(|| format!("unterminated quote at offset {}", start))?;
                if quote == '`' {
                    tokens.push(Token::Ident(input[start + 1..end].to_string()));
                } else {
                    tokens.push(Token::Literal(input[start..=end].to_string()));
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' => {
                let mut end = start + c.len_utf8();
                while let Some(&(idx, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' || next == '.' {
                        end = idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &input[start..end];
                if c.is_alphabetic() || c == '_' {
                    tokens.push(Token::Ident(word.to_string()));
                } else {
                    tokens.push(Token::Literal(word.to_string()));
                }
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

struct TypeParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl TypeParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of input", expected)),
        }
    }

    fn parse_type(&mut self) -> Result<String, String> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(token) => return Err(format!("expected a type, found {:?}", token)),
            None => return Err("expected a type, found end of input".to_string()),
        };

        match name.as_str() {
            "Nullable" | "LowCardinality" | "Array" => {
                self.expect(Token::Open)?;
                let inner = self.parse_type()?;
                self.expect(Token::Close)?;
                Ok(format!("{}({})", name, inner))
            }
            "Tuple" => {
                let elements = self.parse_list(Self::parse_tuple_element)?;
                Ok(format!("Tuple({})", elements.join(", ")))
            }
            "Map" => {
                let elements = self.parse_list(Self::parse_type)?;
                if elements.len() != 2 {
                    return Err(format!("Map takes two types, found {}", elements.len()));
                }
                Ok(format!("Map({})", elements.join(", ")))
            }
            _ if self.peek() == Some(&Token::Open) => {
                let args = self.parse_list(Self::parse_argument)?;
                Ok(format!("{}({})", name, args.join(", ")))
            }
            _ => Ok(name),
        }
    }

    fn parse_tuple_element(&mut self) -> Result<String, String> {
        let named = matches!(
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)),
            (Some(Token::Ident(_)), Some(Token::Ident(_)))
        );
        if named {
            self.pos += 1;
        }
        self.parse_type()
    }

    /// One argument of a parameterised type: a nested type, a literal, or a
    /// run of words such as `'a' = 1`.
    fn parse_argument(&mut self) -> Result<String, String> {
        let mut parts = Vec::new();
        loop {
            let part = match self.peek().cloned() {
                None | Some(Token::Comma) | Some(Token::Close) => break,
                Some(Token::Open) => return Err("unexpected '(' in type arguments".to_string()),
                Some(Token::Ident(_)) if self.tokens.get(self.pos + 1) == Some(&Token::Open) => {
                    self.parse_type()?
                }
                Some(Token::Ident(value)) | Some(Token::Literal(value)) => {
                    self.pos += 1;
                    value
                }
                Some(Token::Eq) => {
                    self.pos += 1;
                    "=".to_string()
                }
            };
            parts.push(part);
        }

        if parts.is_empty() {
            Err("empty type argument".to_string())
        } else {
            Ok(parts.join(" "))
        }
    }

    fn parse_list(
        &mut self,
        mut element: impl FnMut(&mut Self) -> Result<String, String>,
    ) -> Result<Vec<String>, String> {
        self.expect(Token::Open)?;
        let mut items = Vec::new();
        loop {
            items.push(element(self)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::Close) => return Ok(items),
                Some(token) => return Err(format!("expected ',' or ')', found {:?}", token)),
                None => return Err("unbalanced parentheses".to_string()),
            }
        }
    }
}
