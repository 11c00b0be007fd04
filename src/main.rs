use clap::{Parser, Subcommand};
use mpqstream::{Archive, ArchiveEngine, ArchiveOffset, EntryKey, NativeEngine, OpenOptions};
use std::io::{self, Read, SeekFrom, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mpq", about = "Inspect and stream MPQ archives")]
struct Cli {
    /// Do not load (listfile) at open
    #[arg(long, global = true)]
    no_listfile: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show archive metadata
    Info {
        input: PathBuf,
        /// Absolute header offset (default: scan for it)
        #[arg(long)]
        offset: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// List entries
    List {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Stream an entry to stdout
    Cat {
        input: PathBuf,
        /// Entry name, or `#N` for entry index N
        entry: String,
        /// Skip this many bytes first
        #[arg(long, default_value = "0")]
        skip: u64,
        /// Stop after this many bytes
        #[arg(long)]
        length: Option<u64>,
    },
    /// Print an entry line by line with line numbers
    Lines {
        input: PathBuf,
        entry: String,
    },
    /// List the entries of an archive stored inside an entry
    Nested {
        input: PathBuf,
        entry: String,
        #[arg(long)]
        json: bool,
    },
}

fn parse_key(s: &str) -> EntryKey<'_> {
    match s.strip_prefix('#').and_then(|n| n.parse().ok()) {
        Some(index) => EntryKey::Index(index),
        None        => EntryKey::Name(s),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli     = Cli::parse();
    let options = OpenOptions::new().load_listfile(!cli.no_listfile);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, offset, json } => {
            let offset = offset.map_or(ArchiveOffset::Detect, ArchiveOffset::At);
            let ar     = Archive::open_with(NativeEngine, &input, offset, options)?;
            let info   = ar.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }
            println!("── MPQ Archive ──────────────────────────────────────────");
            println!("  Path           {}", info.path.display());
            println!("  Offset         {} B", info.offset);
            println!("  Format version {}", info.version);
            println!("  Files          {}", info.files);
            println!("  Packed size    {} B", info.packed_size);
            println!("  Unpacked size  {} B", info.unpacked_size);
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let ar = Archive::open_with_options(&input, options)?;
            println!("Archive: {}", input.display());
            print_entries(&ar, json)?;
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, entry, skip, length } => {
            let ar     = Archive::open_with_options(&input, options)?;
            let entry  = ar.entry(parse_key(&entry))?;
            let mut reader = entry.reader()?;
            reader.seek(SeekFrom::Start(skip))?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            match length {
                Some(n) => io::copy(&mut (&mut reader).take(n), &mut out)?,
                None    => io::copy(&mut reader, &mut out)?,
            };
            out.flush()?;
        }

        // ── Lines ────────────────────────────────────────────────────────────
        Commands::Lines { input, entry } => {
            let ar    = Archive::open_with_options(&input, options)?;
            let entry = ar.entry(parse_key(&entry))?;
            let mut reader = entry.reader()?;
            let mut open_ended = false;
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                open_ended = lacks_terminator(&line);
                print!("{:>6}  {}", n + 1, String::from_utf8_lossy(&line));
            }
            if open_ended {
                println!();
            }
        }

        // ── Nested ───────────────────────────────────────────────────────────
        Commands::Nested { input, entry, json } => {
            let ar     = Archive::open_with_options(&input, options)?;
            let entry  = ar.entry(parse_key(&entry))?;
            let nested = entry.open_archive()?;
            println!("Archive: {} @ {}", input.display(), nested.offset());
            print_entries(&nested, json)?;
        }
    }
    Ok(())
}

/// Only the final line of an entry can end without `\r` or `\n`.
fn lacks_terminator(line: &[u8]) -> bool {
    !matches!(line.last(), Some(b'\r' | b'\n'))
}

fn print_entries<E: ArchiveEngine>(ar: &Archive<E>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let infos = ar
        .entries()
        .map(|entry| entry.and_then(|e| e.info()))
        .collect::<Result<Vec<_>, _>>()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    println!("{:>5}  {:<40} {:>10} {:>10} {:>6}  Flags", "#", "Name", "Size", "Packed", "Blocks");
    for info in infos {
        let flags: String = [
            (info.compressed, 'c'),
            (info.encrypted, 'e'),
            (info.imploded, 'i'),
        ]
        .iter()
        .map(|&(set, c)| if set { c } else { '-' })
        .collect();
        println!(
            "{:>5}  {:<40} {:>10} {:>10} {:>6}  {}",
            info.index,
            info.name.as_deref().unwrap_or("?"),
            info.unpacked_size,
            info.packed_size,
            info.blocks,
            flags
        );
    }
    Ok(())
}
