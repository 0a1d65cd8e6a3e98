use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use muxdemux::writer::DEFAULT_BLOCK_SIZE;
use muxdemux::{HashAlgorithm, Metadata, PartReader, StreamReader, StreamWriter, WriterOptions};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "muxdemux", version, about = "Multiplex byte streams into one container and back")]
struct Cli {
    /// Log progress messages
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log every block
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one part to stdout; append several runs to build a container
    Mux(MuxArgs),
    /// Split a container read from stdin back into its parts
    Demux(DemuxArgs),
}

#[derive(Args)]
struct MuxArgs {
    /// Plaintext bytes per DATA block
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE,
          value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    blocksize: usize,
    /// Write a digest of the part into its END block
    #[arg(short = 'k', long)]
    checksum: bool,
    /// Digest algorithm: sha224, sha256 (default), sha384, sha512, blake3, sha1, md5
    #[arg(short = 'H', long)]
    hashalgo: Option<HashAlgorithm>,
    /// Compress every DATA block with zstd
    #[arg(short = 'z', long)]
    compress: bool,
    /// Part name (defaults to PATH)
    #[arg(short, long)]
    name: Option<String>,
    /// KEY=VALUE metadata entry, repeatable
    #[arg(short, long = "metadata", value_parser = parse_metadata)]
    metadata: Vec<(String, String)>,
    /// Input file (defaults to stdin)
    path: Option<PathBuf>,
}

#[derive(Args)]
struct DemuxArgs {
    /// Output file name; `{strno}` and `{name}` are substituted
    #[arg(short, long, default_value = "stream-{strno}.out")]
    output_template: String,
    /// Write selected parts to stdout instead of files
    #[arg(long)]
    stdout: bool,
    /// Only list the parts
    #[arg(short, long)]
    list: bool,
    /// With --list, print one JSON object per part
    #[arg(long, requires = "list")]
    json: bool,
    /// Keep going after a part fails its integrity check
    #[arg(short = 'c', long = "continue")]
    keep_going: bool,
    /// Replace existing output files
    #[arg(short = 'f', long)]
    overwrite: bool,
    /// Parts to extract, by index or name (default: all)
    streams: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    match cli.command {
        Commands::Mux(args)   => mux(args)?,
        Commands::Demux(args) => demux(args)?,
    }
    Ok(())
}

fn init_logging(verbose: bool, debug: bool) {
    let level = if debug {
        LevelFilter::DEBUG
    } else if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .try_init();
}

// ── Mux ──────────────────────────────────────────────────────────────────────

fn mux(args: MuxArgs) -> muxdemux::Result<()> {
    let options = WriterOptions {
        name:           args.name.or_else(|| args.path.as_ref().map(|p| p.display().to_string())),
        hash_algorithm: args.hashalgo,
        write_hash:     args.checksum,
        compress:       args.compress,
        ..WriterOptions::default()
    };

    let stdout = io::stdout().lock();
    let mut writer = StreamWriter::with_options(BufWriter::new(stdout), options);
    for (k, v) in args.metadata {
        writer.add_metadata(k, v)?;
    }

    let source: Box<dyn Read> = match &args.path {
        Some(path) => Box::new(File::open(path)?),
        None       => Box::new(io::stdin().lock()),
    };
    writer.copy_from(source, args.blocksize)?;
    let trailer = writer.finish()?;
    info!(size = trailer.size, digest = ?trailer.digest_hex(), "wrote part");
    Ok(())
}

fn parse_metadata(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

// ── Demux ────────────────────────────────────────────────────────────────────

fn demux(args: DemuxArgs) -> muxdemux::Result<()> {
    let mut reader = StreamReader::new(io::stdin().lock());

    while let Some(mut part) = reader.next_part()? {
        let strno = part.index();

        if args.list {
            list_part(&mut part, args.json)?;
            continue;
        }

        // Unselected parts still have to be read through.
        if !is_selected(&args.streams, strno, part.name()) {
            if let Err(e) = part.drain() {
                if !e.is_integrity() {
                    return Err(e);
                }
                warn!("integrity check failed on stream {strno}: {e}");
            }
            continue;
        }

        let name = part.name().map(str::to_owned).unwrap_or_else(|| format!("stream{strno}"));
        let result = if args.stdout {
            info!("writing stream {strno} (name={name}) to <stdout>");
            copy_to(&mut part, io::stdout().lock())
        } else {
            let path = render_template(&args.output_template, strno, &name);
            info!("writing stream {strno} (name={name}) to {}", path.display());
            write_part_file(&mut part, &path, args.overwrite)
        };

        match result {
            Ok(_) => {}
            Err(e) if e.is_integrity() && args.keep_going => {
                warn!("integrity check failed on stream {strno}: {e}");
            }
            Err(e) => {
                error!("stream {strno}: {e}");
                return Err(e);
            }
        }
    }
    Ok(())
}

fn is_selected(streams: &[String], strno: usize, name: Option<&str>) -> bool {
    streams.is_empty()
        || streams
            .iter()
            .any(|s| *s == strno.to_string() || Some(s.as_str()) == name)
}

fn render_template(template: &str, strno: usize, name: &str) -> PathBuf {
    PathBuf::from(
        template
            .replace("{strno}", &strno.to_string())
            .replace("{name}", name),
    )
}

fn copy_to<R: Read, W: Write>(part: &mut PartReader<'_, R>, mut out: W) -> muxdemux::Result<u64> {
    for chunk in part.by_ref() {
        out.write_all(&chunk?)?;
    }
    out.flush()?;
    Ok(part.bytes_read())
}

/// Stream a part into a temporary file next to `path` and move it into place
/// only once the part has verified.
fn write_part_file<R: Read>(
    part:      &mut PartReader<'_, R>,
    path:      &Path,
    overwrite: bool,
) -> muxdemux::Result<u64> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _                                    => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    let written = copy_to(part, BufWriter::new(&mut tmp))?;

    let persisted = if overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("a file named {} already exists (use --overwrite to replace)", path.display()),
            )
        } else {
            e.error
        }
    })?;
    Ok(written)
}

// ── Listing ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PartSummary {
    strno:      usize,
    size:       u64,
    name:       Option<String>,
    hashalgo:   Option<String>,
    compressed: bool,
    valid:      bool,
    metadata:   Metadata,
}

impl PartSummary {
    /// Drain `part` and summarise it.  Integrity failures mark the part
    /// invalid; any other error is returned.
    fn collect<R: Read>(part: &mut PartReader<'_, R>) -> muxdemux::Result<Self> {
        let valid = match part.drain() {
            Ok(_) => true,
            Err(e) if e.is_integrity() => false,
            Err(e) => return Err(e),
        };
        Ok(Self {
            strno:      part.index(),
            size:       part.trailer().map_or(part.bytes_read(), |t| t.size),
            name:       part.name().map(str::to_owned),
            hashalgo:   part.hash_algorithm().map(|a| a.name().to_owned()),
            compressed: part.compressed(),
            valid,
            metadata:   part.metadata().clone(),
        })
    }
}

impl fmt::Display for PartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{:03}]: size={}, name={}, hashalgo={}, compressed={}, valid={}",
            self.strno,
            self.size,
            self.name.as_deref().unwrap_or("(none)"),
            self.hashalgo.as_deref().unwrap_or("(none)"),
            self.compressed,
            self.valid,
        )?;
        for (k, v) in &self.metadata {
            writeln!(f, "       {k} = {v}")?;
        }
        Ok(())
    }
}

fn list_part<R: Read>(part: &mut PartReader<'_, R>, json: bool) -> muxdemux::Result<()> {
    let summary = PartSummary::collect(part)?;
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer(&mut out, &summary).map_err(io::Error::from)?;
        writeln!(out)?;
    } else {
        write!(out, "{summary}")?;
    }
    Ok(())
}
