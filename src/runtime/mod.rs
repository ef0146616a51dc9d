//! Typed access to the records of an opened file.
//!
//! `File` owns the bytes of every block, the catalog indexes and the DNA. Everything it hands out borrows from it,
//! so a `File` can be shared between threads and decoded from all of them at once.

pub mod decode;
pub mod layout;
pub mod value;

use crate::parsers::{
    blend::{header, Block, BlockCatalog, BlockCode, BlockKind, Header, HEADER_LEN},
    dna::Dna,
    finish,
    primitive::BlendPrimitive,
    BlendParseError,
};
use decode::{DecodeContext, Records};
use layout::{build_layouts, StructLayout};
use std::{collections::HashSet, io::Read, num::NonZeroU64, result::Result as StdResult};
use thiserror::Error;
use value::{Pointer, Resolved, StructValue, Value};

/// Errors raised while decoding records. None of them affect other blocks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("the DNA could not be read, only raw block data is available")]
    SchemaUnavailable,
    #[error("block '{code}' at offset {offset} has no struct type (dna index {dna_index})")]
    UntypedBlock {
        code: BlockCode,
        offset: usize,
        dna_index: usize,
    },
    #[error("no struct with index {0}")]
    UnknownStruct(usize),
    #[error(
        "instance {instance} of '{type_name}' in block '{code}' needs {needed} bytes at {offset}, {available} remain"
    )]
    RecordTruncated {
        code: BlockCode,
        instance: usize,
        type_name: String,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("pointer {address:#x} doesn't match any block")]
    DanglingPointer { address: NonZeroU64 },
    #[error("block '{code}' holds {len} bytes, not a multiple of {element_len}")]
    UnexpectedSize {
        code: BlockCode,
        len: usize,
        element_len: usize,
    },
    #[error("'{0}' is not a ListBase")]
    NotAList(String),
}

/// What a pointer refers to, typed as well as the DNA allows.
#[derive(Debug)]
pub enum Pointee<'a> {
    Records(Records<'a>),
    /// The target of a `**` pointer: an array of pointers with one less indirection.
    Pointers(Vec<Pointer<'a>>),
    /// Data of a primitive or unknown type. See `File::primitives`.
    Raw(&'a Block),
}

impl<'a> std::fmt::Debug for Records<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Records")
            .field("type_name", &self.layout().type_name)
            .field("block", self.block())
            .finish()
    }
}

/// Settings for opening a file.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    lenient_catalog: bool,
    strict_struct_sizes: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the blocks read before a framing error instead of failing. The error is available from
    /// `File::catalog_error`.
    pub fn lenient_catalog(&mut self, lenient: bool) -> &mut Self {
        self.lenient_catalog = lenient;
        self
    }

    /// Treat a struct whose fields don't add up to its type table size as a corrupt DNA.
    pub fn strict_struct_sizes(&mut self, strict: bool) -> &mut Self {
        self.strict_struct_sizes = strict;
        self
    }

    pub fn open(&self, data: &[u8]) -> StdResult<File, BlendParseError> {
        let header = finish(header(data))?;

        // Blocks start right after the header.
        let blocks = data.get(HEADER_LEN..).unwrap_or(&[]);
        let (catalog, catalog_error) = BlockCatalog::read_lenient(&header, blocks);
        let catalog_error = match catalog_error {
            Some(e) if !self.lenient_catalog => return Err(e),
            other => other,
        };

        let schema = catalog
            .dna_block()
            .and_then(|block| Dna::from_block(block, header.endianness))
            .and_then(|dna| {
                let layouts = build_layouts(&dna, header.pointer_size, self.strict_struct_sizes)?;
                Ok(Schema { dna, layouts })
            });

        match &schema {
            Ok(schema) => tracing::debug!(
                names = schema.dna.names.len(),
                types = schema.dna.types.len(),
                structs = schema.dna.structs.len(),
                "dna ready"
            ),
            Err(e) => tracing::debug!(error = %e, "file has no usable dna"),
        }

        Ok(File {
            header,
            catalog,
            catalog_error,
            schema,
        })
    }

    pub fn open_reader<R: Read>(&self, mut reader: R) -> StdResult<File, BlendParseError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.open(&data)
    }
}

struct Schema {
    dna: Dna,
    layouts: Vec<StructLayout>,
}

/// An opened file. Immutable once built.
pub struct File {
    header: Header,
    catalog: BlockCatalog,
    catalog_error: Option<BlendParseError>,
    schema: StdResult<Schema, BlendParseError>,
}

impl File {
    pub fn from_data(data: &[u8]) -> StdResult<File, BlendParseError> {
        OpenOptions::new().open(data)
    }

    pub fn from_reader<R: Read>(reader: R) -> StdResult<File, BlendParseError> {
        OpenOptions::new().open_reader(reader)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn catalog(&self) -> &BlockCatalog {
        &self.catalog
    }

    /// The framing error a lenient open stopped at, if any.
    pub fn catalog_error(&self) -> Option<&BlendParseError> {
        self.catalog_error.as_ref()
    }

    /// The parsed DNA, or why it couldn't be read. Raw block access works either way.
    pub fn dna(&self) -> StdResult<&Dna, &BlendParseError> {
        self.schema.as_ref().map(|schema| &schema.dna)
    }

    pub fn layouts(&self) -> &[StructLayout] {
        match &self.schema {
            Ok(schema) => &schema.layouts,
            Err(_) => &[],
        }
    }

    pub fn layout(&self, struct_index: usize) -> Option<&StructLayout> {
        self.layouts().get(struct_index)
    }

    pub fn layout_by_name(&self, type_name: &str) -> Option<&StructLayout> {
        self.layouts().iter().find(|layout| layout.type_name == type_name)
    }

    /// Every distinct block code, in the order it first appears.
    pub fn codes(&self) -> impl Iterator<Item = BlockCode> + '_ {
        self.catalog.codes()
    }

    pub fn blocks_by_code<C: AsRef<[u8]>>(&self, code: C) -> impl Iterator<Item = &Block> + '_ {
        self.catalog.by_code(code)
    }

    pub fn block_at(&self, address: u64) -> Option<&Block> {
        self.catalog.by_address(address)
    }

    /// Blocks holding ID datablocks (objects, meshes, materials...), in file order.
    pub fn root_blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.catalog.iter().filter(|b| b.kind() == BlockKind::Principal)
    }

    fn context(&self) -> StdResult<DecodeContext<'_>, DecodeError> {
        let schema = self.schema.as_ref().map_err(|_| DecodeError::SchemaUnavailable)?;
        Ok(DecodeContext {
            layouts: &schema.layouts,
            catalog: &self.catalog,
            endianness: self.header.endianness,
            pointer_size: self.header.pointer_size,
        })
    }

    /// Decodes the instances of a block using its own struct index.
    pub fn records<'a>(&'a self, block: &'a Block) -> StdResult<Records<'a>, DecodeError> {
        let ctx = self.context()?;
        let untyped = || DecodeError::UntypedBlock {
            code: block.code,
            offset: block.offset,
            dna_index: block.dna_index,
        };

        if matches!(block.kind(), BlockKind::Dna | BlockKind::End) {
            return Err(untyped());
        }
        let layout = ctx.layouts.get(block.dna_index).ok_or_else(untyped)?;

        Ok(Records::new(ctx, layout, block))
    }

    /// Decodes a block as instances of `struct_index`, whatever the block header says.
    pub fn records_as<'a>(
        &'a self,
        block: &'a Block,
        struct_index: usize,
    ) -> StdResult<Records<'a>, DecodeError> {
        let ctx = self.context()?;
        let layout = ctx
            .layouts
            .get(struct_index)
            .ok_or(DecodeError::UnknownStruct(struct_index))?;

        Ok(Records::new(ctx, layout, block))
    }

    /// Decodes every instance of a block, failing on the first truncated one.
    pub fn decode_all<'a>(&'a self, block: &'a Block) -> StdResult<Vec<StructValue<'a>>, DecodeError> {
        self.records(block)?.collect()
    }

    /// Resolves a raw address. Zero is null and never looked up.
    pub fn resolve(&self, address: u64) -> Resolved<'_> {
        self.catalog.resolve(address)
    }

    /// Follows a pointer and types the data it lands on. Null pointers give `Ok(None)`.
    pub fn deref<'a>(&'a self, pointer: &Pointer<'a>) -> StdResult<Option<Pointee<'a>>, DecodeError> {
        let block = match pointer.resolve().into_result()? {
            Some(block) => block,
            None => return Ok(None),
        };

        if pointer.is_function {
            return Ok(Some(Pointee::Raw(block)));
        }
        if pointer.indirection > 1 {
            return self
                .pointer_array(block, pointer.type_index, pointer.indirection - 1)
                .map(|pointers| Some(Pointee::Pointers(pointers)));
        }

        let dna = self.dna().map_err(|_| DecodeError::SchemaUnavailable)?;

        // A principal block always knows its own type better than the pointer does, e.g. an `ID *`
        // pointing at an object.
        if block.kind() == BlockKind::Principal {
            return self.records(block).map(|records| Some(Pointee::Records(records)));
        }

        match dna.struct_for_type(pointer.type_index) {
            Some((struct_index, _)) => self
                .records_as(block, struct_index)
                .map(|records| Some(Pointee::Records(records))),
            None if dna.types.get(pointer.type_index).map(|t| t.name.as_str()) == Some("void") => {
                match self.records(block) {
                    Ok(records) => Ok(Some(Pointee::Records(records))),
                    Err(DecodeError::UntypedBlock { .. }) => Ok(Some(Pointee::Raw(block))),
                    Err(e) => Err(e),
                }
            }
            None => Ok(Some(Pointee::Raw(block))),
        }
    }

    /// Reads a block as a packed array of pointers.
    pub fn pointer_array<'a>(
        &'a self,
        block: &'a Block,
        type_index: usize,
        indirection: usize,
    ) -> StdResult<Vec<Pointer<'a>>, DecodeError> {
        let element_len = self.header.pointer_size.bytes_num();
        if block.data.len() % element_len != 0 {
            return Err(DecodeError::UnexpectedSize {
                code: block.code,
                len: block.data.len(),
                element_len,
            });
        }

        let ctx = DecodeContext {
            layouts: self.layouts(),
            catalog: &self.catalog,
            endianness: self.header.endianness,
            pointer_size: self.header.pointer_size,
        };

        Ok(block
            .data
            .chunks_exact(element_len)
            .filter_map(|chunk| ctx.address(chunk))
            .map(|address| Pointer {
                address,
                type_index,
                indirection,
                is_function: false,
                catalog: &self.catalog,
            })
            .collect())
    }

    /// Reads a block as a packed array of primitives, like the vertex coordinates behind a `float *`.
    pub fn primitives<T: BlendPrimitive>(&self, block: &Block) -> StdResult<Vec<T>, DecodeError> {
        let element_len = std::mem::size_of::<T>();
        tracing::trace!(code = %block.code, element = T::blender_name(), "reading primitives");
        if element_len == 0 || block.data.len() % element_len != 0 {
            return Err(DecodeError::UnexpectedSize {
                code: block.code,
                len: block.data.len(),
                element_len,
            });
        }

        Ok(block
            .data
            .chunks_exact(element_len)
            .filter_map(|chunk| T::parse(chunk, self.header.endianness))
            .collect())
    }

    /// Walks the nodes of a `ListBase`. Stops at a null `next`, at `last`, or when a node repeats.
    pub fn list<'a>(&'a self, list_base: &StructValue<'a>) -> StdResult<ListIter<'a>, DecodeError> {
        let not_a_list = || DecodeError::NotAList(list_base.type_name().to_string());
        let first = list_base
            .get("first")
            .and_then(Value::as_pointer)
            .ok_or_else(not_a_list)?;
        let last = list_base
            .get("last")
            .and_then(Value::as_pointer)
            .ok_or_else(not_a_list)?;

        Ok(ListIter {
            file: self,
            next: Some(first),
            last: last.address,
            seen: HashSet::new(),
        })
    }
}

/// Iterator returned by `File::list`.
pub struct ListIter<'a> {
    file: &'a File,
    next: Option<Pointer<'a>>,
    last: u64,
    seen: HashSet<u64>,
}

impl<'a> ListIter<'a> {
    fn node(&self, block: &'a Block) -> StdResult<StructValue<'a>, DecodeError> {
        let mut records = self.file.records(block)?;
        match records.next() {
            Some(node) => node,
            None => Err(DecodeError::RecordTruncated {
                code: block.code,
                instance: 0,
                type_name: records.layout().type_name.clone(),
                offset: 0,
                needed: records.layout().size,
                available: block.data.len(),
            }),
        }
    }
}

/// Finds the `next` link of a list node, looking into the leading embedded struct when the node starts with one
/// (nodes that begin with a `Link` or an `ID`).
fn next_link<'a>(node: &StructValue<'a>) -> Option<Pointer<'a>> {
    if let Some(next) = node.get("next").and_then(Value::as_pointer) {
        return Some(next);
    }
    match node.fields().next() {
        Some((_, Value::Struct(inner))) => next_link(inner),
        _ => None,
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = StdResult<StructValue<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let pointer = self.next.take()?;
        if pointer.is_null() || !self.seen.insert(pointer.address) {
            return None;
        }

        let block = match pointer.resolve().into_result() {
            Ok(Some(block)) => block,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };

        let node = match self.node(block) {
            Ok(node) => node,
            Err(e) => return Some(Err(e)),
        };

        if pointer.address != self.last {
            self.next = next_link(&node);
        }

        Some(Ok(node))
    }
}
