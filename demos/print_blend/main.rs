//! Writes every root record of every .blend file under a directory to a text file.
//!
//! `cargo run --example print_blend -- <blend dir> [output dir]`
//!
//! No .blend files ship with this repository since they can carry personal data from the machine that wrote them.

use blendfile::File;
use libflate::gzip::Decoder;
use std::{
    env,
    error::Error,
    fs,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

fn print_file(blend_path: &Path, output_path: &Path) -> Result<(), Box<dyn Error>> {
    println!("{}", blend_path.display());
    let mut data = fs::read(blend_path)?;

    if !data.starts_with(b"BLENDER") {
        let mut decoder = Decoder::new(&data[..])?;
        let mut gzip_data = Vec::new();
        decoder.read_to_end(&mut gzip_data)?;

        data = gzip_data;
    }

    let file = File::from_data(&data)?;
    if let Err(e) = file.dna() {
        println!("skipping {}: {}", blend_path.display(), e);
        return Ok(());
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut buffer = BufWriter::new(fs::File::create(output_path)?);

    writeln!(
        buffer,
        "version {}, {:?}, {:?}",
        String::from_utf8_lossy(&file.header().version),
        file.header().pointer_size,
        file.header().endianness
    )?;

    for block in file.root_blocks() {
        for record in file.records(block)? {
            match record {
                Ok(record) => write!(buffer, "{}", record)?,
                Err(e) => writeln!(buffer, "<{}>", e)?,
            }
        }
    }

    buffer.write_all(b"\n")?;
    buffer.flush()?;

    println!("done: {}", output_path.display());

    Ok(())
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args_os().skip(1);
    let input = PathBuf::from(args.next().unwrap_or_else(|| "demos/blend_files".into()));
    let output = PathBuf::from(args.next().unwrap_or_else(|| "demos/print_blend/output".into()));

    for entry in WalkDir::new(&input) {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || path.extension().map_or(true, |e| e != "blend") {
            continue;
        }

        let relative = path.strip_prefix(&input)?;
        let output_path = output.join(relative).with_extension("txt");

        if let Err(e) = print_file(path, &output_path) {
            println!("failed: {}: {}", path.display(), e);
        }
    }

    Ok(())
}
