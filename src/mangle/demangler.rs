//! Reverse direction: mangled string back to descriptor tree.
//!
//! The tokenizer runs a small mode stack. Plain mode lexes builtin codes
//! and the structural capitals; the array / class-name / type-list modes
//! are pushed when their `X$` opener is consumed and popped at the paired
//! closing delimiter. Class and struct name segments lex as "any character
//! except the delimiter", so dotted package paths pass through verbatim.

use crate::descriptor::{BuiltinTag, Type};

use super::{
    DemangleError, FunctionSignature, StructResolver, DELIMITER, NULLABLE_SUFFIX, WILDCARD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Plain,
    InArray,
    InClassName,
    InTypeList,
}

struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    modes: Vec<Mode>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            modes: vec![Mode::Plain],
        }
    }

    fn mode(&self) -> Mode {
        *self.modes.last().unwrap_or(&Mode::Plain)
    }

    fn at_end(&self) -> bool {
        self.cursor >= self.input.len()
    }

    // The cursor only ever advances by whole characters, so the slices
    // below stay on char boundaries even for non-ASCII input.
    fn peek(&self) -> Option<char> {
        self.input[self.cursor..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.cursor += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> DemangleError {
        let rest = &self.input[self.cursor.min(self.input.len())..];
        let offending = if rest.is_empty() { self.input } else { rest };
        DemangleError::new(message, offending, self.cursor)
    }

    fn expect_delimiter(&mut self, context: &str) -> Result<(), DemangleError> {
        match self.bump() {
            Some(DELIMITER) => Ok(()),
            Some(found) => Err(self.error(format!(
                "expected `{DELIMITER}` to close {context}, found `{found}`"
            ))),
            None => Err(self.error(format!("unbalanced {context}: input ended early"))),
        }
    }

    /// Lex a name segment up to (not including) the delimiter.
    fn lex_name(&mut self, what: &str) -> Result<&'a str, DemangleError> {
        let start = self.cursor;
        while let Some(c) = self.peek() {
            if c == DELIMITER {
                break;
            }
            self.cursor += c.len_utf8();
        }
        if self.at_end() {
            return Err(self.error(format!("unbalanced {what}: missing closing delimiter")));
        }
        if self.cursor == start {
            return Err(self.error(format!("empty {what}")));
        }
        Ok(&self.input[start..self.cursor])
    }

    fn parse_type(&mut self, resolver: &dyn StructResolver) -> Result<Type, DemangleError> {
        let position = self.cursor;
        let mut ty = match self.bump() {
            Some(WILDCARD) => Type::Wildcard,
            Some('A') => {
                self.expect_delimiter("array opener")?;
                self.modes.push(Mode::InArray);
                let element = self.parse_type(resolver)?;
                self.expect_delimiter("array")?;
                self.modes.pop();
                Type::Array(Box::new(element))
            }
            Some('C') => {
                self.expect_delimiter("class opener")?;
                self.modes.push(Mode::InClassName);
                let name = self.lex_name("class name")?.to_string();
                self.expect_delimiter("class name")?;
                self.modes.pop();
                let type_args = if self.peek() == Some('T') {
                    self.cursor += 1;
                    self.expect_delimiter("type-list opener")?;
                    self.modes.push(Mode::InTypeList);
                    let args = self.parse_sequence(resolver)?;
                    self.expect_delimiter("type list")?;
                    self.modes.pop();
                    args
                } else {
                    Vec::new()
                };
                Type::Reference { name, type_args }
            }
            Some('S') => {
                self.expect_delimiter("struct opener")?;
                self.modes.push(Mode::InClassName);
                let name = self.lex_name("struct name")?.to_string();
                self.expect_delimiter("struct name")?;
                self.modes.pop();
                let Some(fields) = resolver.resolve(&name) else {
                    return Err(DemangleError::new(
                        "unresolvable struct name",
                        name,
                        position,
                    ));
                };
                Type::Struct { name, fields }
            }
            Some(code) if code.is_ascii_lowercase() => match BuiltinTag::from_code(code) {
                Some(tag) => Type::Builtin(tag),
                None => {
                    return Err(DemangleError::new(
                        "unknown builtin code",
                        code.to_string(),
                        position,
                    ));
                }
            },
            Some(other) => {
                return Err(DemangleError::new(
                    "unexpected character in type position",
                    other.to_string(),
                    position,
                ));
            }
            None => return Err(self.error("expected a type, found end of input")),
        };
        while self.peek() == Some(NULLABLE_SUFFIX) {
            self.cursor += 1;
            ty = Type::Nullable(Box::new(ty));
        }
        Ok(ty)
    }

    /// Parse types until the current segment's delimiter or end of input.
    fn parse_sequence(&mut self, resolver: &dyn StructResolver) -> Result<Vec<Type>, DemangleError> {
        let mut out = Vec::new();
        while !self.at_end() && self.peek() != Some(DELIMITER) {
            out.push(self.parse_type(resolver)?);
        }
        Ok(out)
    }

    fn finish(&self) -> Result<(), DemangleError> {
        if self.at_end() && self.mode() == Mode::Plain && self.modes.len() == 1 {
            Ok(())
        } else {
            Err(self.error("trailing input after a complete type"))
        }
    }
}

/// Demangle a single type. Exact inverse of [`super::mangle`].
pub fn demangle(input: &str, resolver: &dyn StructResolver) -> Result<Type, DemangleError> {
    let mut tokenizer = Tokenizer::new(input);
    let ty = tokenizer.parse_type(resolver)?;
    tokenizer.finish()?;
    Ok(ty)
}

/// Demangle a function name produced by [`super::mangle_function`].
pub fn demangle_function(
    input: &str,
    resolver: &dyn StructResolver,
) -> Result<FunctionSignature, DemangleError> {
    let mut tokenizer = Tokenizer::new(input);
    let name = tokenizer.lex_name("function name")?.to_string();
    tokenizer.expect_delimiter("function name")?;

    let signature = tokenizer.parse_sequence(resolver)?;
    tokenizer.expect_delimiter("signature segment")?;
    let mut signature = signature.into_iter();
    let Some(ret) = signature.next() else {
        return Err(DemangleError::new("missing return type", input, 0));
    };
    let params: Vec<Type> = signature.collect();

    let dispatch_receiver = parse_receiver(&mut tokenizer, resolver, "dispatch receiver")?;
    let extension_receiver = parse_receiver(&mut tokenizer, resolver, "extension receiver")?;

    let context_receivers = tokenizer.parse_sequence(resolver)?;
    tokenizer.expect_delimiter("context receiver segment")?;

    let type_args = tokenizer.parse_sequence(resolver)?;
    tokenizer.finish()?;

    Ok(FunctionSignature {
        name,
        ret,
        params,
        dispatch_receiver,
        extension_receiver,
        context_receivers,
        type_args,
    })
}

fn parse_receiver(
    tokenizer: &mut Tokenizer<'_>,
    resolver: &dyn StructResolver,
    what: &str,
) -> Result<Option<Type>, DemangleError> {
    let mut types = tokenizer.parse_sequence(resolver)?;
    tokenizer.expect_delimiter(what)?;
    if types.len() > 1 {
        return Err(DemangleError::new(
            format!("{what} segment holds more than one type"),
            format!("{} types", types.len()),
            tokenizer.cursor,
        ));
    }
    Ok(types.pop())
}
