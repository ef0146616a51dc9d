use crate::parsers::{
    blend::Block,
    primitive::{read_u16, read_u32},
    BlendParseError, Endianness, Result,
};
use nom::{
    bytes::complete::{tag, take, take_while},
    combinator::map,
    multi::count,
    sequence::terminated,
    Err,
};
use std::{collections::HashMap, convert::TryInto, result::Result as StdResult};

/// The structure catalog of a blend file: every name, type and struct layout used when it was written.
#[derive(Debug)]
pub struct Dna {
    pub names: Vec<String>,
    pub types: Vec<DnaType>,
    pub structs: Vec<DnaStruct>,
    struct_by_type: HashMap<usize, usize>,
}

#[derive(Debug)]
pub struct DnaType {
    pub name: String,
    pub bytes_len: usize, //size in bytes of the type, 0 for opaque types like void
}

#[derive(Debug)]
pub struct DnaField {
    pub type_index: usize, //index on Dna::types array
    pub name_index: usize, //index on Dna::names array
}

#[derive(Debug)]
pub struct DnaStruct {
    pub type_index: usize, //index on Dna::types array
    pub fields: Vec<DnaField>,
}

impl Dna {
    /// Parses the payload of a DNA1 block.
    pub fn from_block(block: &Block, endianness: Endianness) -> StdResult<Dna, BlendParseError> {
        Dna::parse(&block.data, endianness)
    }

    pub fn parse(data: &[u8], endianness: Endianness) -> StdResult<Dna, BlendParseError> {
        let ctx = DnaParseContext::new(endianness, data.len());

        let dna = match ctx.dna(data) {
            Ok((_, dna)) => dna,
            Err(Err::Failure(e)) | Err(Err::Error(e)) => return Err(ctx.schema_error(e)),
            Err(Err::Incomplete(..)) => {
                return Err(BlendParseError::schema(data.len(), "unexpected end of DNA"))
            }
        };

        tracing::debug!(
            names = dna.names.len(),
            types = dna.types.len(),
            structs = dna.structs.len(),
            "parsed DNA"
        );

        Ok(dna)
    }

    /// The struct describing the type at `type_index`, with its position in `structs`.
    pub fn struct_for_type(&self, type_index: usize) -> Option<(usize, &DnaStruct)> {
        self.struct_by_type
            .get(&type_index)
            .map(|i| (*i, &self.structs[*i]))
    }

    /// Finds a struct by its type name, e.g. "Object". Scans the type table.
    pub fn struct_index(&self, name: &str) -> Option<usize> {
        let type_index = self.types.iter().position(|t| t.name == name)?;
        self.struct_by_type.get(&type_index).copied()
    }

    pub fn type_name(&self, type_index: usize) -> Option<&str> {
        self.types.get(type_index).map(|t| t.name.as_str())
    }

    /// The type name of the struct at `struct_index`.
    pub fn struct_name(&self, struct_index: usize) -> Option<&str> {
        let dna_struct = self.structs.get(struct_index)?;
        Some(&self.types[dna_struct.type_index].name)
    }
}

#[derive(Debug)]
pub struct DnaParseContext {
    endianness: Endianness,
    /// Length of the whole payload, used to turn remaining input into offsets.
    total_len: usize,
}

impl DnaParseContext {
    pub fn new(endianness: Endianness, total_len: usize) -> Self {
        Self {
            endianness,
            total_len,
        }
    }

    fn offset(&self, input: &[u8]) -> usize {
        self.total_len - input.len()
    }

    fn schema_error(&self, e: BlendParseError) -> BlendParseError {
        match e {
            BlendParseError::NomError {
                kind, remaining, ..
            } => BlendParseError::schema(
                self.total_len.saturating_sub(remaining),
                format!("unexpected data ({:?})", kind),
            ),
            e => e,
        }
    }

    /// Skips the NUL padding that keeps sections 4 byte aligned.
    fn align<'b>(&self, input: &'b [u8]) -> Result<'b, ()> {
        let skip_len = (4 - self.offset(input) % 4) % 4;
        let (input, _) = take(skip_len)(input)?;
        Ok((input, ()))
    }

    /// Reads a section tag, skipping the alignment padding in front of it if there is any.
    fn section<'b>(&self, input: &'b [u8], expected: &'static [u8; 4]) -> Result<'b, ()> {
        let input = if input.starts_with(expected) {
            input
        } else {
            self.align(input).map(|(input, _)| input).unwrap_or(input)
        };

        match tag::<_, _, BlendParseError>(&expected[..])(input) {
            Ok((input, _)) => Ok((input, ())),
            Err(_) => {
                let found = &input[..input.len().min(4)];
                Err(Err::Failure(BlendParseError::schema(
                    self.offset(input),
                    format!(
                        "expected section {:?}, found {:?}",
                        String::from_utf8_lossy(expected),
                        String::from_utf8_lossy(found)
                    ),
                )))
            }
        }
    }

    fn len<'b>(&self, input: &'b [u8]) -> Result<'b, usize> {
        let (input, len) = read_u32(input, self.endianness)?;
        // Every entry takes at least one byte, anything larger can't be satisfied.
        if len as usize > input.len() {
            return Err(Err::Failure(BlendParseError::schema(
                self.offset(input),
                format!("count {} exceeds the {} remaining bytes", len, input.len()),
            )));
        }
        Ok((input, len.try_into().unwrap_or(usize::MAX)))
    }

    /// A list of `len` NUL terminated strings, byte packed.
    fn strings<'b>(&self, input: &'b [u8], len: usize) -> Result<'b, Vec<String>> {
        count(
            terminated(
                map(take_while(|b: u8| b != 0), |b: &[u8]| {
                    String::from_utf8_lossy(b).into_owned()
                }),
                tag("\0"),
            ),
            len,
        )(input)
    }

    fn names<'b>(&self, input: &'b [u8]) -> Result<'b, Vec<String>> {
        let (input, _) = self.section(input, b"NAME")?;
        let (input, names_len) = self.len(input)?;
        self.strings(input, names_len)
    }

    fn types<'b>(&self, input: &'b [u8]) -> Result<'b, Vec<DnaType>> {
        let (input, _) = self.section(input, b"TYPE")?;
        let (input, types_len) = self.len(input)?;
        let (input, type_names) = self.strings(input, types_len)?;

        let (input, _) = self.section(input, b"TLEN")?;
        let mut type_lengths = Vec::with_capacity(types_len);
        let mut input = input;
        for _ in 0..types_len {
            let (rest, length) = read_u16(input, self.endianness)?;
            type_lengths.push(usize::from(length));
            input = rest;
        }

        Ok((
            input,
            type_names
                .into_iter()
                .zip(type_lengths)
                .map(|(name, bytes_len)| DnaType { name, bytes_len })
                .collect(),
        ))
    }

    fn check_index(&self, input: &[u8], what: &str, index: usize, len: usize) -> Result<'static, ()> {
        if index < len {
            Ok((&[], ()))
        } else {
            Err(Err::Failure(BlendParseError::schema(
                self.offset(input),
                format!("{} index {} out of range (table has {} entries)", what, index, len),
            )))
        }
    }

    fn structs<'b>(
        &self,
        input: &'b [u8],
        names_len: usize,
        types_len: usize,
    ) -> Result<'b, Vec<DnaStruct>> {
        let (input, _) = self.section(input, b"STRC")?;
        let (input, structs_len) = self.len(input)?;

        let mut structs = Vec::with_capacity(structs_len);
        let mut final_input = input;
        for _ in 0..structs_len {
            let start = final_input;
            let (input, type_index) = read_u16(final_input, self.endianness)?;
            let type_index = usize::from(type_index);
            self.check_index(start, "struct type", type_index, types_len)?;

            let (input, fields_num) = read_u16(input, self.endianness)?;

            let mut next_input = input;
            let mut fields = Vec::with_capacity(usize::from(fields_num));
            for _ in 0..fields_num {
                let start = next_input;
                let (input, field_type_index) = read_u16(next_input, self.endianness)?;
                let (input, field_name_index) = read_u16(input, self.endianness)?;
                let field = DnaField {
                    type_index: usize::from(field_type_index),
                    name_index: usize::from(field_name_index),
                };
                self.check_index(start, "field type", field.type_index, types_len)?;
                self.check_index(start, "field name", field.name_index, names_len)?;

                next_input = input;
                fields.push(field);
            }

            final_input = next_input;
            structs.push(DnaStruct { type_index, fields });
        }

        Ok((final_input, structs))
    }

    pub fn dna<'b>(&self, input: &'b [u8]) -> Result<'b, Dna> {
        let (input, _) = self.section(input, b"SDNA")?;
        let (input, names) = self.names(input)?;
        let (input, types) = self.types(input)?;
        let (input, structs) = self.structs(input, names.len(), types.len())?;

        let mut struct_by_type = HashMap::with_capacity(structs.len());
        for (i, dna_struct) in structs.iter().enumerate() {
            if struct_by_type.insert(dna_struct.type_index, i).is_some() {
                return Err(Err::Failure(BlendParseError::schema(
                    self.offset(input),
                    format!(
                        "type '{}' is described by more than one struct",
                        types[dna_struct.type_index].name
                    ),
                )));
            }
        }

        Ok((
            input,
            Dna {
                names,
                types,
                structs,
                struct_by_type,
            },
        ))
    }
}
