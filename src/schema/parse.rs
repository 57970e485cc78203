//! Parser for the indentation-based schema language.
//!
//! The language is line-oriented. Two spaces of indentation per level.
//! Blank lines and `#` comments are ignored. A line with a `:` (outside a
//! string literal) declares a field; any other line declares a class. Class
//! lines nested under a class line declare subclasses:
//!
//! ```text
//! # A component parameter.
//! Param (concrete)
//!   @WeakRef variable: Var
//!   @Const uuid: String
//!   defaultExpr: Expr?
//!
//! Expr
//!   CustomCode (concrete)
//!     code: String
//! ```
//!
//! A class is *abstract* when it has subclasses and no `(concrete)` marker.
//! Leaf classes are always concrete. Field annotations (`@Const`,
//! `@Transient`, `@WeakRef`) prefix the field name; anything else starting
//! with `@` is rejected loudly rather than skipped.
//!
//! The parser produces flat [`RawClass`] declarations with parent links;
//! [`SchemaMeta`](super::meta::SchemaMeta) resolves inheritance and validates
//! cross-references.

use crate::error::SchemaError;
use crate::schema::types::Ty;

// ---------------------------------------------------------------------------
// RawClass / RawField
// ---------------------------------------------------------------------------

/// A class declaration as written, before inheritance resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawClass {
    /// Declared class name.
    pub name: String,
    /// The enclosing class, if nested.
    pub parent: Option<String>,
    /// `true` when the declaration carries the `(concrete)` marker.
    pub concrete_marker: bool,
    /// Own fields, in declaration order.
    pub fields: Vec<RawField>,
    /// 1-based line of the declaration.
    pub line: usize,
}

/// A field declaration as written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawField {
    /// Field name.
    pub name: String,
    /// Parsed type expression.
    pub ty: Ty,
    /// `@Const` — immutable after construction.
    pub const_: bool,
    /// `@Transient` — not persisted, excluded from merging.
    pub transient: bool,
    /// `@WeakRef` — a non-owning reference edge.
    pub weak_ref: bool,
    /// 1-based line of the declaration.
    pub line: usize,
}

// ---------------------------------------------------------------------------
// parse_schema
// ---------------------------------------------------------------------------

/// Parses schema text into flat class declarations.
///
/// # Errors
///
/// Returns a [`SchemaError`] for indentation off the two-space grid, levels
/// jumping deeper than one step, unknown annotations, unparsable type
/// expressions, fields outside any class, or duplicate class names.
pub fn parse_schema(text: &str) -> Result<Vec<RawClass>, SchemaError> {
    let mut classes: Vec<RawClass> = Vec::new();
    // Indices into `classes` for the chain of enclosing declarations.
    let mut stack: Vec<usize> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim_end();
        let body = trimmed.trim_start();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }

        let indent = trimmed.len() - body.len();
        if trimmed[..indent].contains('\t') {
            return Err(SchemaError::BadIndent {
                line: line_no,
                detail: "tabs are not allowed".to_owned(),
            });
        }
        if indent % 2 != 0 {
            return Err(SchemaError::BadIndent {
                line: line_no,
                detail: format!("{indent} spaces is off the two-space grid"),
            });
        }
        let level = indent / 2;

        if is_field_line(body) {
            // A field at level N belongs to the class declared at level N-1.
            if level == 0 || level > stack.len() {
                return Err(SchemaError::FieldOutsideClass { line: line_no });
            }
            stack.truncate(level);
            let field = parse_field(body, line_no)?;
            let owner = stack[stack.len() - 1];
            classes[owner].fields.push(field);
        } else {
            if level > stack.len() {
                return Err(SchemaError::BadIndent {
                    line: line_no,
                    detail: format!(
                        "class nested {level} levels deep under {} enclosing classes",
                        stack.len()
                    ),
                });
            }
            stack.truncate(level);
            let (name, concrete_marker) = parse_class_line(body, line_no)?;
            if classes.iter().any(|c| c.name == name) {
                return Err(SchemaError::DuplicateClass { class: name });
            }
            let parent = stack.last().map(|&i| classes[i].name.clone());
            classes.push(RawClass {
                name,
                parent,
                concrete_marker,
                fields: Vec::new(),
                line: line_no,
            });
            stack.push(classes.len() - 1);
        }
    }

    Ok(classes)
}

/// A line declares a field when it contains a `:` outside any string literal.
fn is_field_line(body: &str) -> bool {
    let mut in_str = false;
    for ch in body.chars() {
        match ch {
            '\'' => in_str = !in_str,
            ':' if !in_str => return true,
            _ => {}
        }
    }
    false
}

fn parse_class_line(body: &str, line: usize) -> Result<(String, bool), SchemaError> {
    if let Some(name) = body.strip_suffix("(concrete)") {
        let name = name.trim_end();
        check_ident(name, body, line)?;
        return Ok((name.to_owned(), true));
    }
    check_ident(body, body, line)?;
    Ok((body.to_owned(), false))
}

fn check_ident(name: &str, text: &str, line: usize) -> Result<(), SchemaError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(SchemaError::BadTypeExpr {
            line,
            text: text.to_owned(),
            detail: format!("{name:?} is not a valid identifier"),
        })
    }
}

fn parse_field(body: &str, line: usize) -> Result<RawField, SchemaError> {
    let mut rest = body;
    let mut const_ = false;
    let mut transient = false;
    let mut weak_ref = false;

    while rest.starts_with('@') {
        let (token, tail) = match rest.split_once(char::is_whitespace) {
            Some((t, tail)) => (t, tail.trim_start()),
            None => (rest, ""),
        };
        match token {
            "@Const" => const_ = true,
            "@Transient" => transient = true,
            "@WeakRef" => weak_ref = true,
            other => {
                return Err(SchemaError::UnknownAnnotation {
                    annotation: other.to_owned(),
                    line,
                });
            }
        }
        rest = tail;
    }

    let Some((name, ty_text)) = rest.split_once(':') else {
        return Err(SchemaError::BadTypeExpr {
            line,
            text: body.to_owned(),
            detail: "expected `name: Type`".to_owned(),
        });
    };
    let name = name.trim();
    check_ident(name, body, line)?;
    let ty = parse_type_expr(ty_text.trim(), line)?;

    Ok(RawField {
        name: name.to_owned(),
        ty,
        const_,
        transient,
        weak_ref,
        line,
    })
}

// ---------------------------------------------------------------------------
// Type expressions
// ---------------------------------------------------------------------------

/// Parses a type expression like `[Variant]`, `Map[String, Expr?]`, or
/// `'page' | 'mixed'`.
///
/// # Errors
///
/// Returns [`SchemaError::BadTypeExpr`] when the text does not match the
/// grammar.
pub fn parse_type_expr(text: &str, line: usize) -> Result<Ty, SchemaError> {
    let mut p = TyParser {
        src: text,
        chars: text.char_indices().peekable(),
        line,
    };
    let ty = p.union()?;
    p.skip_ws();
    match p.chars.peek() {
        None => Ok(ty),
        Some(&(pos, _)) => Err(p.err(format!("trailing input at offset {pos}"))),
    }
}

struct TyParser<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
}

impl TyParser<'_> {
    fn err(&self, detail: String) -> SchemaError {
        SchemaError::BadTypeExpr {
            line: self.line,
            text: self.src.to_owned(),
            detail,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(&(_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, expected: char) -> Result<(), SchemaError> {
        self.skip_ws();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((pos, c)) => Err(self.err(format!("expected {expected:?} at offset {pos}, found {c:?}"))),
            None => Err(self.err(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn union(&mut self) -> Result<Ty, SchemaError> {
        let mut alts = vec![self.postfix()?];
        loop {
            self.skip_ws();
            if matches!(self.chars.peek(), Some(&(_, '|'))) {
                self.chars.next();
                alts.push(self.postfix()?);
            } else {
                break;
            }
        }
        if alts.len() == 1 {
            // Single-alternative "union" is just the type.
            Ok(alts.into_iter().next().unwrap_or(Ty::Any))
        } else {
            Ok(Ty::Union { alts })
        }
    }

    fn postfix(&mut self) -> Result<Ty, SchemaError> {
        let mut ty = self.atom()?;
        while matches!(self.chars.peek(), Some(&(_, '?'))) {
            self.chars.next();
            ty = Ty::optional(ty);
        }
        Ok(ty)
    }

    fn atom(&mut self) -> Result<Ty, SchemaError> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some((_, '[')) => {
                self.chars.next();
                let elem = self.union()?;
                self.eat(']')?;
                Ok(Ty::list(elem))
            }
            Some((_, '{')) => {
                self.chars.next();
                let elem = self.union()?;
                self.eat('}')?;
                Ok(Ty::Set {
                    elem: Box::new(elem),
                })
            }
            Some((_, '(')) => {
                self.chars.next();
                let ty = self.union()?;
                self.eat(')')?;
                Ok(ty)
            }
            Some((_, '\'')) => {
                self.chars.next();
                let mut value = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, '\'')) => break,
                        Some((_, c)) => value.push(c),
                        None => return Err(self.err("unterminated string literal".to_owned())),
                    }
                }
                Ok(Ty::StringLiteral { value })
            }
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = self.chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                // `Map[K, V]` is the one identifier with type arguments.
                if ident == "Map" {
                    self.skip_ws();
                    if matches!(self.chars.peek(), Some(&(_, '['))) {
                        self.chars.next();
                        let key = self.union()?;
                        self.eat(',')?;
                        let value = self.union()?;
                        self.eat(']')?;
                        return Ok(Ty::Map {
                            key: Box::new(key),
                            value: Box::new(value),
                        });
                    }
                    return Err(self.err("Map requires [Key, Value] arguments".to_owned()));
                }
                Ok(match ident.as_str() {
                    "Bool" => Ty::Bool,
                    "Num" | "Number" => Ty::Num,
                    "String" | "Text" => Ty::Text,
                    "Any" => Ty::Any,
                    _ => Ty::Instance { class: ident },
                })
            }
            Some((pos, c)) => Err(self.err(format!("unexpected {c:?} at offset {pos}"))),
            None => Err(self.err("unexpected end of input".to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
