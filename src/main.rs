//! disc-verify
//!
//! Command line front end: inspect a session of a disc image and verify its
//! checksum manifest.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use disc_verify::checksum::verify_session;
use disc_verify::config::get_config;
use disc_verify::disc::volume::{FileId, VolumeTree};
use disc_verify::disc::{Iso9660Volume, VolumeFile, VolumeSource};

const USAGE: &str = "Usage: disc-verify <image> [--session BLOCK] <command>

Commands:
  info          Show the volume label and size
  ls [PATH]     List a directory (the root by default)
  tree          List every file of the volume
  cat PATH      Write a file to standard output
  verify        Check files against the session's checksum manifest";

enum Command {
    Info,
    List(Option<String>),
    Tree,
    Cat(String),
    Verify,
}

struct Args {
    image: PathBuf,
    session: u64,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut session = 0;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--session" {
            let value = iter.next().ok_or("--session needs a block number")?;
            session = value
                .parse()
                .map_err(|_| format!("Invalid session block: {}", value))?;
        } else {
            positional.push(arg.as_str());
        }
    }

    let (image, rest) = positional.split_first().ok_or("Missing image path")?;
    let command = match rest {
        ["info"] => Command::Info,
        ["ls"] => Command::List(None),
        ["ls", path] => Command::List(Some(path.to_string())),
        ["tree"] => Command::Tree,
        ["cat", path] => Command::Cat(path.to_string()),
        ["verify"] => Command::Verify,
        [] => return Err("Missing command".to_string()),
        other => return Err(format!("Unknown command: {}", other.join(" "))),
    };

    Ok(Args {
        image: PathBuf::from(*image),
        session,
        command,
    })
}

fn print_entry(file: &VolumeFile) {
    if file.is_directory() {
        println!("{:>12}  {}/", "<DIR>", file.display_name());
    } else {
        println!("{:>12}  {}", file.size(), file.display_name());
    }
}

fn print_tree(tree: &VolumeTree, id: FileId, depth: usize) {
    for &child in tree.children(id) {
        let Some(file) = tree.get(child) else { continue };
        if file.is_directory() {
            println!("{}{}/", "  ".repeat(depth), file.display_name());
            print_tree(tree, child, depth + 1);
        } else {
            println!("{}{} ({} bytes)", "  ".repeat(depth), file.display_name(), file.size());
        }
    }
}

fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let config = get_config();
    let source = VolumeSource::open_file(&args.image)?;
    let volume = Iso9660Volume::open(&source, args.session)?
        .with_buffer_blocks(config.reader.buffer_blocks);

    match args.command {
        Command::Info => {
            let descriptor = volume.descriptor();
            println!("Label:       {}", volume.label());
            println!("System:      {}", descriptor.system_id);
            println!("Publisher:   {}", descriptor.publisher_id);
            println!("Application: {}", descriptor.application_id);
            println!(
                "Size:        {} blocks ({} bytes)",
                volume.size(),
                volume.size() as u64 * descriptor.block_size as u64
            );
        }
        Command::List(path) => {
            let listing = match path {
                Some(path) => {
                    let file = volume.file(&path)?;
                    if file.is_directory() {
                        volume.directory(file.address())?
                    } else {
                        vec![file]
                    }
                }
                None => volume.directory(None)?,
            };
            for file in &listing {
                print_entry(file);
            }
        }
        Command::Tree => {
            let contents = volume.contents()?;
            println!("{} ({} data blocks)", contents.label, contents.data_blocks);
            print_tree(&contents.tree, contents.tree.root(), 1);
        }
        Command::Cat(path) => {
            let file = volume.file(&path)?;
            let mut reader = volume.open_file(&file)?;
            let mut stdout = std::io::stdout().lock();
            std::io::copy(&mut reader, &mut stdout)?;
            stdout.flush()?;
        }
        Command::Verify => {
            let report = verify_session(&volume, config, &AtomicBool::new(false))?;
            for path in &report.mismatched {
                println!("FAILED   {}", path);
            }
            for path in &report.missing {
                println!("MISSING  {}", path);
            }
            println!(
                "{}: {} checked, {} mismatched, {} missing",
                report.manifest,
                report.checked,
                report.mismatched.len(),
                report.missing.len()
            );
            return Ok(report.is_ok());
        }
    }

    Ok(true)
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
