use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_until},
    combinator::complete,
    error::{ErrorKind, ParseError},
    multi::{many0, many1},
    sequence::delimited,
    Err, IResult,
};
use thiserror::Error;

/// Errors for names in the DNA that don't follow the C declarator grammar Blender uses.
#[derive(Debug, Error, PartialEq)]
pub enum FieldParseError {
    #[error("field name parse error ({kind:?})")]
    NomError {
        kind: ErrorKind,
        other: Option<Box<FieldParseError>>,
    },
    #[error("invalid array size in field name")]
    InvalidArraySize,
    #[error("array in field name is too large")]
    ArrayTooLarge,
    #[error("unexpected '{0}' after field name")]
    TrailingInput(String),
    #[error("empty field name")]
    EmptyName,
}

impl ParseError<&str> for FieldParseError {
    fn from_error_kind(_input: &str, kind: ErrorKind) -> Self {
        FieldParseError::NomError { kind, other: None }
    }

    fn append(_input: &str, kind: ErrorKind, other: Self) -> Self {
        FieldParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}

type Result<'a, T> = IResult<&'a str, T, FieldParseError>;

/// How a field is declared: `name`, `name[4]`, `*name`, `*name[4]` or `(*name)()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInfo {
    Value,
    ValueArray {
        len: usize,
        dimensions: Vec<usize>,
    },
    Pointer {
        indirection_count: usize,
    },
    PointerArray {
        indirection_count: usize,
        len: usize,
        dimensions: Vec<usize>,
    },
    FnPointer,
}

impl FieldInfo {
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            FieldInfo::Pointer { .. } | FieldInfo::PointerArray { .. } | FieldInfo::FnPointer
        )
    }

    /// Number of elements the field holds, 1 for non arrays.
    pub fn len(&self) -> usize {
        match self {
            FieldInfo::ValueArray { len, .. } | FieldInfo::PointerArray { len, .. } => *len,
            _ => 1,
        }
    }

    /// Array dimensions, outermost first. Empty for non arrays.
    pub fn dimensions(&self) -> &[usize] {
        match self {
            FieldInfo::ValueArray { dimensions, .. } | FieldInfo::PointerArray { dimensions, .. } => {
                dimensions
            }
            _ => &[],
        }
    }
}

fn fn_pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = delimited(tag("(*"), take_until(")"), tag(")"))(input)?;

    let (input, _) = delimited(tag("("), take_until(")"), tag(")"))(input)?;

    Ok((input, (name, FieldInfo::FnPointer)))
}

fn array_dimensions(input: &str) -> Result<Vec<usize>> {
    let (input, array_dimensions) =
        many0(complete(delimited(tag("["), take_until("]"), tag("]"))))(input)?;

    let mut dimensions = Vec::new();
    for dimension_str in array_dimensions {
        dimensions.push(
            dimension_str
                .trim()
                .parse::<usize>()
                .map_err(|_| Err::Failure(FieldParseError::InvalidArraySize))?,
        );
    }

    Ok((input, dimensions))
}

/// Number of elements of an array. Folds from the innermost dimension so that every sub-array length fits in a
/// `usize` too, even when an outer dimension is 0.
fn array_len(dimensions: &[usize]) -> std::result::Result<usize, Err<FieldParseError>> {
    dimensions
        .iter()
        .rev()
        .try_fold(1_usize, |len, dimension| len.checked_mul(*dimension))
        .ok_or(Err::Failure(FieldParseError::ArrayTooLarge))
}

fn pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, asterisks) = many1(tag("*"))(input)?;
    let (input, name) = take_till(|c: char| c == '[')(input)?;

    if !input.is_empty() {
        let (input, dimensions) = array_dimensions(input)?;
        let len = array_len(&dimensions)?;
        Ok((
            input,
            (
                name,
                FieldInfo::PointerArray {
                    indirection_count: asterisks.len(),
                    len,
                    dimensions,
                },
            ),
        ))
    } else {
        Ok((
            input,
            (
                name,
                FieldInfo::Pointer {
                    indirection_count: asterisks.len(),
                },
            ),
        ))
    }
}

fn value(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = take_till(|c: char| c == '[')(input)?;
    if !input.is_empty() {
        let (input, dimensions) = array_dimensions(input)?;
        let len = array_len(&dimensions)?;
        Ok((input, (name, FieldInfo::ValueArray { len, dimensions })))
    } else {
        Ok((input, (name, FieldInfo::Value)))
    }
}

fn field(input: &str) -> Result<(&str, FieldInfo)> {
    alt((fn_pointer, pointer, value))(input)
}

/// Splits a DNA name like `*mat[4]` into the bare field name and how it is declared.
pub fn parse_field(input: &str) -> std::result::Result<(&str, FieldInfo), FieldParseError> {
    let (rest, (name, info)) = match field(input) {
        Ok(v) => v,
        Err(Err::Error(e)) | Err(Err::Failure(e)) => return Err(e),
        Err(Err::Incomplete(_)) => return Err(FieldParseError::EmptyName),
    };

    if !rest.is_empty() {
        return Err(FieldParseError::TrailingInput(rest.to_string()));
    }
    if name.is_empty() {
        return Err(FieldParseError::EmptyName);
    }

    Ok((name, info))
}
