mod common;

use blendfile::{
    BlendParseError, BlockCode, BlockKind, DecodeError, Endianness, File, OpenOptions, Pointee, PointerSize,
    Resolved, Value,
};
use blendfile::parsers::test_support::{DnaBuilder, FileBuilder};
use common::mesh_file;

const LE: Endianness = Endianness::Little;
const BE: Endianness = Endianness::Big;
const P32: PointerSize = PointerSize::Bits32;
const P64: PointerSize = PointerSize::Bits64;

#[test]
fn minimal_file() {
    let data = FileBuilder::new(LE, P64)
        .block(b"TEST", 0x7f00, 0, 1, &[1, 2, 3, 4, 5, 6, 7, 8])
        .end()
        .build();
    assert_eq!(&data[..12], b"BLENDER-v280");

    let file = File::from_data(&data).unwrap();
    assert_eq!(file.header().pointer_size, PointerSize::Bits64);
    assert_eq!(file.header().endianness, Endianness::Little);
    assert_eq!(file.header().version_number(), Some(280));

    assert_eq!(file.catalog().len(), 2);
    let block = file.block_at(0x7f00).unwrap();
    assert_eq!(block.code, BlockCode::TEST);
    assert_eq!(block.data, [1, 2, 3, 4, 5, 6, 7, 8]);

    assert!(matches!(file.dna(), Err(BlendParseError::MissingSchema)));
}

#[test]
fn from_reader() {
    let data = mesh_file(LE, P64);
    let file = File::from_reader(&data[..]).unwrap();
    assert_eq!(file.catalog().len(), 4);
    assert_eq!(file.header().version_number(), Some(293));
}

#[test]
fn wrong_magic() {
    let mut data = mesh_file(LE, P64);
    data[0] = b'b';
    assert!(matches!(
        File::from_data(&data),
        Err(BlendParseError::InvalidIdentifier { .. })
    ));
}

#[test]
fn decode_mesh_every_layout() {
    for &(endianness, pointer_size) in &[(LE, P64), (LE, P32), (BE, P64), (BE, P32)] {
        let data = mesh_file(endianness, pointer_size);
        let file = OpenOptions::new()
            .strict_struct_sizes(true)
            .open(&data)
            .unwrap();

        let codes: Vec<BlockCode> = file.codes().collect();
        assert_eq!(
            codes,
            [BlockCode(*b"ME\0\0"), BlockCode::DATA, BlockCode::DNA, BlockCode::END]
        );

        let block = file.root_blocks().next().unwrap();
        assert_eq!(block.kind(), BlockKind::Principal);
        let mesh = file.decode_all(block).unwrap().remove(0);
        assert_eq!(mesh.get_path("id.name").and_then(Value::as_str).unwrap(), "MECube");
        assert_eq!(mesh.get("totvert").and_then(Value::as_i64), Some(2));

        let mvert = mesh.get("mvert").and_then(Value::as_pointer).unwrap();
        let verts: Vec<_> = match file.deref(&mvert).unwrap() {
            Some(Pointee::Records(records)) => records.map(Result::unwrap).collect(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(verts.len(), 2);
        assert_eq!(verts[1].type_name(), "MVert");
        let co: Vec<f64> = verts[1]
            .get("co")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        assert_eq!(co, [-1.0, -2.0, 0.5]);
        assert_eq!(verts[1].get("flag").and_then(Value::as_i64), Some(1));
    }
}

#[test]
fn decode_from_many_threads() {
    let data = mesh_file(LE, P64);
    let file = File::from_data(&data).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let block = file.block_at(0x2000).unwrap();
                    file.records(block)
                        .unwrap()
                        .map(|vert| vert.unwrap().get("flag").and_then(Value::as_i64).unwrap())
                        .sum::<i64>()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
    });
}

#[test]
fn lenient_catalog() {
    let data = FileBuilder::new(LE, P64)
        .block(b"TEST", 0x10, 0, 1, &[9; 4])
        .block(b"TEST", 0x20, 0, 1, &[7; 4])
        .block(b"DATA", 0x10, 0, 1, &[0; 4])
        .end()
        .build();

    assert!(matches!(
        File::from_data(&data),
        Err(BlendParseError::CorruptCatalog { .. })
    ));

    let file = OpenOptions::new().lenient_catalog(true).open(&data).unwrap();
    assert_eq!(file.catalog().len(), 2);
    assert!(matches!(
        file.catalog_error(),
        Some(BlendParseError::CorruptCatalog { offset, first_offset: 12, .. }) if *offset == 12 + 2 * 28
    ));
    assert_eq!(file.block_at(0x20).unwrap().data, [7; 4]);
}

#[test]
fn truncated_file() {
    let mut data = mesh_file(LE, P64);
    data.truncate(data.len() - 30);
    assert!(matches!(
        File::from_data(&data),
        Err(BlendParseError::TruncatedBlock { .. }) | Err(BlendParseError::TruncatedFile { .. })
    ));
}

#[test]
fn dangling_and_null_pointers() {
    let data = mesh_file(LE, P64);
    let file = File::from_data(&data).unwrap();

    assert!(matches!(file.resolve(0), Resolved::Null));
    assert!(matches!(file.resolve(0xdead), Resolved::Dangling(_)));

    let mesh = file.decode_all(file.block_at(0x1000).unwrap()).unwrap().remove(0);
    let next = mesh.get_path("id.next").and_then(Value::as_pointer).unwrap();
    assert!(next.is_null());
    assert!(matches!(file.deref(&next), Ok(None)));
}

#[test]
fn schema_errors_keep_raw_access() {
    let data = FileBuilder::new(LE, P64)
        .block(b"DATA", 0x10, 0, 1, &[1, 0, 0, 0])
        .block(b"DNA1", 0x20, 0, 1, b"SDNANAMX\0\0\0\0")
        .end()
        .build();

    let file = File::from_data(&data).unwrap();
    assert!(matches!(file.dna(), Err(BlendParseError::SchemaCorrupt { .. })));

    let block = file.block_at(0x10).unwrap();
    assert!(matches!(file.records(block), Err(DecodeError::SchemaUnavailable)));
    assert_eq!(file.primitives::<i32>(block).unwrap(), [1]);
}

#[test]
fn first_block_follows_header() {
    let data = mesh_file(BE, P32);
    let file = OpenOptions::new().open(&data).unwrap();

    let offsets: Vec<(BlockCode, usize)> = file.catalog().iter().map(|b| (b.code, b.offset)).collect();
    let mesh_len = 24 + 4 + 4;
    let verts_len = 2 * 16;
    assert_eq!(offsets[0], (BlockCode(*b"ME\0\0"), 12));
    assert_eq!(offsets[1], (BlockCode::DATA, 12 + 20 + mesh_len));
    assert_eq!(offsets[2], (BlockCode::DNA, 12 + 2 * 20 + mesh_len + verts_len));
}

#[test]
fn oversized_dna_names() {
    let dna = DnaBuilder {
        names: vec!["a[4294967295][4294967295][4294967295]"],
        types: vec![("char", 1), ("Thing", 0)],
        structs: vec![(1, vec![(0, 0)])],
    }
    .build(LE);
    let data = FileBuilder::new(LE, P64)
        .block(b"DATA", 0x10, 0, 1, &[0; 4])
        .block(b"DNA1", 0x20, 0, 1, &dna)
        .end()
        .build();

    let file = File::from_data(&data).unwrap();
    assert!(matches!(file.dna(), Err(BlendParseError::SchemaCorrupt { .. })));
    assert_eq!(file.block_at(0x10).unwrap().data, [0; 4]);
}
