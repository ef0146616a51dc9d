use crate::parsers::{
    primitive::{read_address, read_u32},
    BlendParseError, Endianness, PointerSize, Result,
};
use linked_hash_map::LinkedHashMap;
use nom::{
    bytes::complete::{tag, take},
    number::complete::u8 as byte,
    Err,
};
use std::{
    collections::HashMap,
    convert::TryInto,
    fmt::{self, Debug, Display, Formatter},
    num::NonZeroU64,
    result::Result as StdResult,
};

/// Every uncompressed .blend file starts with these 7 bytes.
pub const IDENTIFIER: &[u8; 7] = b"BLENDER";
/// Length of the file header.
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The size of the pointer on the machine used to save the blend file.
    pub pointer_size: PointerSize,
    /// The endianness on the machine used to save the blend file.
    pub endianness: Endianness,
    /// The version of Blender used to save the blend file, as three ASCII digits.
    pub version: [u8; 3],
}

impl Header {
    /// The version as a number, `b"280"` becomes `280`. `None` if a digit isn't an ASCII digit, which only happens
    /// for headers built by hand.
    pub fn version_number(&self) -> Option<u32> {
        self.version.iter().try_fold(0, |acc, digit| {
            let digit = digit.checked_sub(b'0').filter(|d| *d <= 9)?;
            Some(acc * 10 + u32::from(digit))
        })
    }

    /// Encodes the header back into its 12 bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0; HEADER_LEN];
        bytes[..7].copy_from_slice(IDENTIFIER);
        bytes[7] = self.pointer_size.marker();
        bytes[8] = self.endianness.marker();
        bytes[9..].copy_from_slice(&self.version);
        bytes
    }

    /// Size of a block header for this file: the memory address is pointer sized.
    pub fn block_header_len(&self) -> usize {
        16 + self.pointer_size.bytes_num()
    }
}

// The two markers are single bytes, so they are read before anything else depends on the byte order.
fn pointer_size(input: &[u8]) -> Result<PointerSize> {
    let (input, marker) = byte(input)?;
    match marker {
        b'_' => Ok((input, PointerSize::Bits32)),
        b'-' => Ok((input, PointerSize::Bits64)),
        found => Err(Err::Failure(BlendParseError::InvalidHeaderField {
            offset: 7,
            field: "pointer size",
            found,
        })),
    }
}

fn endianness(input: &[u8]) -> Result<Endianness> {
    let (input, marker) = byte(input)?;
    match marker {
        b'v' => Ok((input, Endianness::Little)),
        b'V' => Ok((input, Endianness::Big)),
        found => Err(Err::Failure(BlendParseError::InvalidHeaderField {
            offset: 8,
            field: "endianness",
            found,
        })),
    }
}

fn version(input: &[u8]) -> Result<[u8; 3]> {
    let (input, v) = take(3_usize)(input)?;
    if let Some(position) = v.iter().position(|b| !b.is_ascii_digit()) {
        return Err(Err::Failure(BlendParseError::InvalidHeaderField {
            offset: 9 + position,
            field: "version",
            found: v[position],
        }));
    }
    Ok((input, [v[0], v[1], v[2]]))
}

/// Parses the 12 byte file header.
pub fn header(input: &[u8]) -> Result<Header> {
    if input.len() >= IDENTIFIER.len() && &input[..IDENTIFIER.len()] != IDENTIFIER {
        return Err(Err::Failure(BlendParseError::InvalidIdentifier {
            found: input[..IDENTIFIER.len()].to_vec(),
        }));
    }
    if input.len() < HEADER_LEN {
        return Err(Err::Failure(BlendParseError::MalformedHeader {
            available: input.len(),
        }));
    }

    let (input, _) = tag(&IDENTIFIER[..])(input)?;
    let (input, pointer_size) = pointer_size(input)?;
    let (input, endianness) = endianness(input)?;
    let (input, version) = version(input)?;

    Ok((
        input,
        Header {
            pointer_size,
            endianness,
            version,
        },
    ))
}

/// The 4 byte code of a block. Codes shorter than 4 characters are padded with NULs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCode(pub [u8; 4]);

impl BlockCode {
    pub const DNA: BlockCode = BlockCode(*b"DNA1");
    pub const END: BlockCode = BlockCode(*b"ENDB");
    pub const DATA: BlockCode = BlockCode(*b"DATA");
    pub const GLOBAL: BlockCode = BlockCode(*b"GLOB");
    pub const RENDER: BlockCode = BlockCode(*b"REND");
    pub const TEST: BlockCode = BlockCode(*b"TEST");

    /// Builds a code from its text, `"OB"` becomes `b"OB\0\0"`. Returns `None` for codes longer than 4 bytes.
    pub fn from_bytes(code: &[u8]) -> Option<BlockCode> {
        if code.len() > 4 {
            return None;
        }
        let mut padded = [0; 4];
        padded[..code.len()].copy_from_slice(code);
        Some(BlockCode(padded))
    }

    /// The code without its trailing NULs.
    pub fn trimmed(&self) -> &[u8] {
        let len = self.0.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
        &self.0[..len]
    }

    /// Two letter codes like "OB" or "ME" mark the root blocks of Blender's ID types.
    pub fn is_id(&self) -> bool {
        self.0[2] == 0 && self.0[3] == 0 && self.0[0] != 0 && self.0[1] != 0
    }
}

impl Display for BlockCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.trimmed()))
    }
}

impl Debug for BlockCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "BlockCode({:?})", self.to_string())
    }
}

/// What a block holds, derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// A principal (or root) block has a two letter code and its `dna_index` is always valid. If we have a
    /// pointer to a principal block, we can ignore the type of the pointer and use the block type.
    Principal,
    /// Subsidiary blocks have the code "DATA". Their `dna_index` is not always correct and is only used when
    /// whichever field points to them has an "invalid" type (like void*).
    Subsidiary,
    /// The DNA of the blend file. Used to interpret all the other blocks.
    Dna,
    /// The terminal block.
    End,
    Global,
    Render,
    Test,
    Other,
}

/// A framed record of the file. Blocks are owned by the `BlockCatalog`.
pub struct Block {
    pub code: BlockCode,
    /// Memory address the data occupied when the file was written. Only used as a key.
    pub memory_address: u64,
    /// Index into `Dna::structs` describing the records of this block.
    pub dna_index: usize,
    /// The data field can contain more than one struct, count tells us how many there is.
    pub count: usize,
    /// The entire binary data of the `Block` in the blend file.
    pub data: Vec<u8>,
    /// Position of the block header in the file.
    pub offset: usize,
}

impl Debug for Block {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Block")
            .field("code", &self.code)
            .field("memory_address", &format_args!("{:#x}", self.memory_address))
            .field("dna_index", &self.dna_index)
            .field("len/count", &format_args!("{}/{}", self.data.len(), self.count))
            .field("offset", &self.offset)
            .finish()
    }
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self.code {
            BlockCode::DNA => BlockKind::Dna,
            BlockCode::END => BlockKind::End,
            BlockCode::DATA => BlockKind::Subsidiary,
            BlockCode::GLOBAL => BlockKind::Global,
            BlockCode::RENDER => BlockKind::Render,
            BlockCode::TEST => BlockKind::Test,
            code if code.is_id() => BlockKind::Principal,
            _ => BlockKind::Other,
        }
    }

    /// The memory address, or `None` if the block was written with a null address.
    pub fn address(&self) -> Option<NonZeroU64> {
        NonZeroU64::new(self.memory_address)
    }
}

/// The fields of a block header, before the payload is framed.
struct BlockHeader {
    code: BlockCode,
    size: usize,
    memory_address: u64,
    dna_index: usize,
    count: usize,
}

/// All blocks of a file in file order, indexed by code and by memory address.
#[derive(Debug, Default)]
pub struct BlockCatalog {
    blocks: Vec<Block>,
    //We use a LinkedHashMap here because we want to list codes in the order they first appear
    by_code: LinkedHashMap<BlockCode, Vec<usize>>,
    by_address: HashMap<NonZeroU64, usize>,
}

impl BlockCatalog {
    /// Scans every block after the file header, stopping at the first error.
    pub fn read(header: &Header, input: &[u8]) -> StdResult<BlockCatalog, BlendParseError> {
        match BlockScanner::new(*header).scan(input, HEADER_LEN) {
            (catalog, None) => Ok(catalog),
            (_, Some(e)) => Err(e),
        }
    }

    /// Like `read`, but keeps the blocks indexed before an error instead of discarding them.
    pub fn read_lenient(header: &Header, input: &[u8]) -> (BlockCatalog, Option<BlendParseError>) {
        BlockScanner::new(*header).scan(input, HEADER_LEN)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks in file order.
    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    /// Every distinct code, in the order it first appears in the file.
    pub fn codes(&self) -> impl Iterator<Item = BlockCode> + '_ {
        self.by_code.keys().copied()
    }

    /// Blocks sharing `code`, in file order. `code` may omit trailing NULs ("OB", "DNA1").
    pub fn by_code<C: AsRef<[u8]>>(&self, code: C) -> impl Iterator<Item = &Block> + '_ {
        let indices = BlockCode::from_bytes(code.as_ref())
            .and_then(|code| self.by_code.get(&code))
            .map(|indices| &indices[..])
            .unwrap_or(&[]);
        indices.iter().map(move |i| &self.blocks[*i])
    }

    /// The block stored at a memory address. A zero address never matches.
    pub fn by_address(&self, address: u64) -> Option<&Block> {
        NonZeroU64::new(address)
            .and_then(|address| self.by_address.get(&address))
            .map(|i| &self.blocks[*i])
    }

    /// The block holding the DNA. Files carry a single one, the first wins if there are more.
    pub fn dna_block(&self) -> StdResult<&Block, BlendParseError> {
        let mut blocks = self.by_code(BlockCode::DNA.0);
        let dna = blocks.next().ok_or(BlendParseError::MissingSchema)?;

        let extra = blocks.count();
        if extra > 0 {
            tracing::warn!(offset = dna.offset, extra, "more than one DNA1 block, using the first");
        }

        Ok(dna)
    }

    fn insert(&mut self, block: Block) -> StdResult<(), BlendParseError> {
        let index = self.blocks.len();

        if let Some(address) = block.address() {
            if let Some(first) = self.by_address.get(&address) {
                return Err(BlendParseError::CorruptCatalog {
                    offset: block.offset,
                    first_offset: self.blocks[*first].offset,
                    address,
                });
            }
            self.by_address.insert(address, index);
        }

        self.by_code
            .entry(block.code)
            .or_insert_with(Vec::new)
            .push(index);
        self.blocks.push(block);

        Ok(())
    }
}

/// Frames blocks one after the other until the terminal block.
pub struct BlockScanner {
    header: Header,
}

impl BlockScanner {
    pub fn new(header: Header) -> Self {
        Self { header }
    }

    fn block_header<'a>(&self, input: &'a [u8]) -> Result<'a, BlockHeader> {
        let endianness = self.header.endianness;

        let (input, code) = take(4_usize)(input)?;
        let (input, size) = read_u32(input, endianness)?;
        let (input, memory_address) = read_address(input, endianness, self.header.pointer_size)?;
        let (input, dna_index) = read_u32(input, endianness)?;
        let (input, count) = read_u32(input, endianness)?;

        Ok((
            input,
            BlockHeader {
                code: BlockCode([code[0], code[1], code[2], code[3]]),
                size: to_usize(size),
                memory_address,
                dna_index: to_usize(dna_index),
                count: to_usize(count),
            },
        ))
    }

    /// Returns the catalog built so far and the error that stopped the scan, if any.
    /// `offset` is the position of `input` in the file.
    pub fn scan(&self, mut input: &[u8], mut offset: usize) -> (BlockCatalog, Option<BlendParseError>) {
        let header_len = self.header.block_header_len();
        let mut catalog = BlockCatalog::default();

        loop {
            if input.len() < header_len {
                // Some writers stop right after the terminal code.
                if input.starts_with(&BlockCode::END.0) {
                    let end = Block {
                        code: BlockCode::END,
                        memory_address: 0,
                        dna_index: 0,
                        count: 0,
                        data: Vec::new(),
                        offset,
                    };
                    if let Err(e) = catalog.insert(end) {
                        return (catalog, Some(e));
                    }
                    tracing::debug!(blocks = catalog.len(), "block catalog complete (bare ENDB)");
                    return (catalog, None);
                }

                let last_code = catalog.blocks.last().map(|b| b.code);
                return (catalog, Some(BlendParseError::TruncatedFile { offset, last_code }));
            }

            let (rest, block_header) = match self.block_header(input) {
                Ok(v) => v,
                Err(_) => {
                    let last_code = catalog.blocks.last().map(|b| b.code);
                    return (catalog, Some(BlendParseError::TruncatedFile { offset, last_code }));
                }
            };

            if block_header.size > rest.len() {
                let e = BlendParseError::TruncatedBlock {
                    offset,
                    code: block_header.code,
                    declared: block_header.size,
                    available: rest.len(),
                };
                return (catalog, Some(e));
            }

            let (data, rest) = rest.split_at(block_header.size);
            let block = Block {
                code: block_header.code,
                memory_address: block_header.memory_address,
                dna_index: block_header.dna_index,
                count: block_header.count,
                data: data.to_vec(),
                offset,
            };
            tracing::trace!(
                code = %block.code,
                offset,
                size = block_header.size,
                address = block.memory_address,
                "framed block"
            );

            let terminal = block.code == BlockCode::END;
            if let Err(e) = catalog.insert(block) {
                return (catalog, Some(e));
            }

            offset += header_len + block_header.size;
            input = rest;

            if terminal {
                if !input.is_empty() {
                    tracing::warn!(trailing = input.len(), "ignoring bytes after ENDB");
                }
                tracing::debug!(blocks = catalog.len(), "block catalog complete");
                return (catalog, None);
            }
        }
    }
}

/// Sizes that don't fit a usize saturate, which later fails as a truncated block.
fn to_usize(n: u32) -> usize {
    n.try_into().unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{finish, test_support::FileBuilder};

    fn parse_header(data: &[u8]) -> StdResult<Header, BlendParseError> {
        finish(header(data))
    }

    fn scan(data: &[u8]) -> StdResult<BlockCatalog, BlendParseError> {
        let header = parse_header(data)?;
        BlockCatalog::read(&header, &data[HEADER_LEN..])
    }

    #[test]
    fn header_round_trips() {
        for pointer_size in &[b'_', b'-'] {
            for endianness in &[b'v', b'V'] {
                for version in &[b"000", b"249", b"280", b"999"] {
                    let mut bytes = Vec::from(&IDENTIFIER[..]);
                    bytes.push(*pointer_size);
                    bytes.push(*endianness);
                    bytes.extend_from_slice(*version);

                    let header = parse_header(&bytes).unwrap();
                    assert_eq!(&header.to_bytes()[..], &bytes[..]);
                }
            }
        }
    }

    #[test]
    fn header_fields() {
        let header = parse_header(b"BLENDER_V272").unwrap();
        assert_eq!(header.pointer_size, PointerSize::Bits32);
        assert_eq!(header.endianness, Endianness::Big);
        assert_eq!(header.version_number(), Some(272));
        assert_eq!(header.block_header_len(), 20);
    }

    #[test]
    fn wrong_identifier() {
        for data in &[&b"BLENDEX-v280"[..], b"\x1f\x8b\x08\x00\x00\x00\x00", b"blender-v280 and more"] {
            assert!(matches!(
                parse_header(data),
                Err(BlendParseError::InvalidIdentifier { .. })
            ));
        }
    }

    #[test]
    fn short_header() {
        assert!(matches!(
            parse_header(b"BLENDER-v2"),
            Err(BlendParseError::MalformedHeader { available: 10 })
        ));
        assert!(matches!(
            parse_header(b"BLE"),
            Err(BlendParseError::MalformedHeader { available: 3 })
        ));
    }

    #[test]
    fn invalid_header_fields() {
        assert!(matches!(
            parse_header(b"BLENDER*v280"),
            Err(BlendParseError::InvalidHeaderField { offset: 7, found: b'*', .. })
        ));
        assert!(matches!(
            parse_header(b"BLENDER-x280"),
            Err(BlendParseError::InvalidHeaderField { offset: 8, found: b'x', .. })
        ));
        assert!(matches!(
            parse_header(b"BLENDER-v2a0"),
            Err(BlendParseError::InvalidHeaderField { offset: 10, .. })
        ));
    }

    #[test]
    fn catalog_preserves_order() {
        let data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[1; 4])
            .block(b"DATA", 0x20, 0, 1, &[2; 8])
            .block(b"OB", 0x30, 1, 1, &[3; 4])
            .block(b"DATA", 0x40, 0, 2, &[4; 8])
            .end()
            .build();

        let catalog = scan(&data).unwrap();
        assert_eq!(catalog.len(), 5);

        let codes: Vec<String> = catalog.codes().map(|c| c.to_string()).collect();
        assert_eq!(codes, ["OB", "DATA", "ENDB"]);

        let objects: Vec<u64> = catalog.by_code("OB").map(|b| b.memory_address).collect();
        assert_eq!(objects, [0x10, 0x30]);
        let data_blocks: Vec<u64> = catalog.by_code(b"DATA").map(|b| b.memory_address).collect();
        assert_eq!(data_blocks, [0x20, 0x40]);

        for address in &[0x10, 0x20, 0x30, 0x40] {
            assert_eq!(catalog.by_address(*address).unwrap().memory_address, *address);
        }
        assert_eq!(catalog.by_address(0x40).unwrap().count, 2);
        assert!(catalog.by_address(0).is_none());
        assert_eq!(catalog.by_code("XX").count(), 0);
        assert_eq!(catalog.by_code("TOOLONG").count(), 0);
    }

    #[test]
    fn catalog_big_endian_32_bits() {
        let data = FileBuilder::new(Endianness::Big, PointerSize::Bits32)
            .block(b"ME", 0xdead_beef, 3, 1, &[9; 12])
            .end()
            .build();

        let catalog = scan(&data).unwrap();
        let block = catalog.by_address(0xdead_beef).unwrap();
        assert_eq!(block.code.to_string(), "ME");
        assert_eq!(block.dna_index, 3);
        assert_eq!(block.data, vec![9; 12]);
        assert_eq!(block.kind(), BlockKind::Principal);
        assert_eq!(block.offset, HEADER_LEN);
    }

    #[test]
    fn duplicate_address() {
        let data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[0; 4])
            .block(b"DATA", 0x10, 0, 1, &[0; 4])
            .end()
            .build();

        assert!(matches!(
            scan(&data),
            Err(BlendParseError::CorruptCatalog { first_offset: HEADER_LEN, .. })
        ));
    }

    #[test]
    fn truncated_block() {
        let mut data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[0; 16])
            .build();
        data.truncate(data.len() - 6);

        assert!(matches!(
            scan(&data),
            Err(BlendParseError::TruncatedBlock { declared: 16, available: 10, .. })
        ));
    }

    #[test]
    fn missing_end_block() {
        let data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[0; 4])
            .build();

        match scan(&data) {
            Err(BlendParseError::TruncatedFile { offset, last_code }) => {
                assert_eq!(offset, data.len());
                assert_eq!(last_code, Some(BlockCode::from_bytes(b"OB").unwrap()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lenient_scan_keeps_earlier_blocks() {
        let data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[0; 4])
            .block(b"ME", 0x10, 2, 1, &[0; 4])
            .build();
        let header = parse_header(&data).unwrap();

        let (catalog, error) = BlockCatalog::read_lenient(&header, &data[HEADER_LEN..]);
        assert!(matches!(error, Some(BlendParseError::CorruptCatalog { .. })));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.by_address(0x10).is_some());
    }

    #[test]
    fn scanning_stops_at_end_block() {
        let mut data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[0; 4])
            .end()
            .build();
        data.extend_from_slice(b"garbage after the end");

        let catalog = scan(&data).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.iter().last().unwrap().kind(), BlockKind::End);
    }

    #[test]
    fn bare_end_code() {
        let mut data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[0; 4])
            .build();
        data.extend_from_slice(b"ENDB");

        let catalog = scan(&data).unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn bare_end_code_offset() {
        let mut data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"OB", 0x10, 1, 1, &[0; 4])
            .build();
        data.extend_from_slice(b"ENDB");

        let catalog = scan(&data).unwrap();
        let end = catalog.iter().last().unwrap();
        assert_eq!(end.kind(), BlockKind::End);
        assert_eq!(end.offset, HEADER_LEN + 24 + 4);
    }

    #[test]
    fn hand_built_version() {
        let mut header = parse_header(b"BLENDER-v280").unwrap();
        header.version = *b"2x0";
        assert_eq!(header.version_number(), None);
        header.version = *b"2/0";
        assert_eq!(header.version_number(), None);
    }

    #[test]
    fn first_dna_block_wins() {
        let data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .block(b"DNA1", 0x10, 0, 1, &[1])
            .block(b"DNA1", 0x20, 0, 1, &[2])
            .end()
            .build();
        let catalog = scan(&data).unwrap();
        assert_eq!(catalog.dna_block().unwrap().data, [1]);
    }

    #[test]
    fn missing_dna() {
        let data = FileBuilder::new(Endianness::Little, PointerSize::Bits64)
            .end()
            .build();
        let catalog = scan(&data).unwrap();
        assert!(matches!(catalog.dna_block(), Err(BlendParseError::MissingSchema)));
    }
}
