use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nwscript::bytecode::{decode, disasm};
use nwscript::frontend::lexer::Lexer;
use nwscript::frontend::token_dumper::TokenDumper;
use nwscript::{Catalog, CompileOptions, DecompileOptions, Error};

#[derive(Parser)]
#[command(name = "nwscript", version, about = "NWScript compiler and NCS decompiler")]
struct Cli {
    /// More output: -v info, -vv debug, -vvv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .nss source file to .ncs bytecode
    Compile {
        input: PathBuf,
        /// Output file (defaults to the input with an .ncs extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Include search directory; may be repeated
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
        /// Routine catalog (.yaml/.yml, or postcard bytes)
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Compile a unit without main or StartingConditional
        #[arg(long)]
        library: bool,
    },
    /// Decompile .ncs bytecode to source
    Decompile {
        input: PathBuf,
        /// Output file (defaults to standard output)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Carry the original bytecode in the output
        #[arg(long)]
        embed: bool,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Print an instruction listing of a .ncs file, or of a compiled .nss file
    Disasm {
        input: PathBuf,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Print the tokens of a source file
    Tokens {
        input: PathBuf,
        #[arg(long)]
        no_color: bool,
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over `-v` when set.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Compile {
            input,
            output,
            include,
            catalog,
            library,
        } => {
            let catalog = load_catalog(catalog.as_deref())?;
            let options = CompileOptions {
                include_paths: include_paths(&input, include),
                entry_point_required: !library,
                ..CompileOptions::default()
            };
            let source = fs::read_to_string(&input)?;
            let bytes = nwscript::compile(&source, &catalog, &options)?;
            let output = output.unwrap_or_else(|| input.with_extension("ncs"));
            fs::write(&output, &bytes)?;
            info!(output = %output.display(), bytes = bytes.len(), "wrote bytecode");
            Ok(())
        }
        Command::Decompile {
            input,
            output,
            embed,
            catalog,
        } => {
            let catalog = load_catalog(catalog.as_deref())?;
            let bytes = fs::read(&input)?;
            let options = DecompileOptions {
                embed_bytecode: embed,
            };
            let source = nwscript::decompile(&bytes, &catalog, &options)?;
            match output {
                Some(path) => {
                    fs::write(&path, source)?;
                    info!(output = %path.display(), "wrote source");
                }
                None => print!("{}", source),
            }
            Ok(())
        }
        Command::Disasm { input, catalog } => {
            let catalog = load_catalog(catalog.as_deref())?;
            let program = if has_extension(&input, "nss") {
                let source = fs::read_to_string(&input)?;
                let options = CompileOptions {
                    include_paths: include_paths(&input, Vec::new()),
                    ..CompileOptions::default()
                };
                nwscript::compile_program(&source, &catalog, &options)?
            } else {
                decode(&fs::read(&input)?)?
            };
            disasm::print_program(&program, Some(&catalog));
            Ok(())
        }
        Command::Tokens {
            input,
            no_color,
            pretty,
        } => {
            let source = fs::read_to_string(&input)?;
            let tokens = Lexer::new(&source).tokenize()?;
            let mut dumper = TokenDumper::new();
            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }
            dumper.dump(&tokens);
            Ok(())
        }
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog, Error> {
    match path {
        Some(path) => Ok(Catalog::load(path)?),
        None => Ok(Catalog::builtin()),
    }
}

/// The input's own directory is searched after the explicit ones.
fn include_paths(input: &Path, mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if let Some(dir) = input.parent() {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir.to_path_buf()
        };
        if !paths.contains(&dir) {
            paths.push(dir);
        }
    }
    paths
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
