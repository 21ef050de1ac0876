//! `git-interleave`: reads the translation queue from stdin and prints the
//! merged monorepo head line to stdout, per the external interface.

use std::io::Read as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mono_interleave_lib::dir_list::DirList;
use mono_interleave_lib::error::InterleaveError;
use mono_interleave_lib::error::exit_code;
use mono_interleave_lib::git_cache::GitCache;
use mono_interleave_lib::git_subprocess::GitSubprocessContext;
use mono_interleave_lib::interleaver;
use mono_interleave_lib::queue::parse_queue;

#[derive(Parser, Debug)]
#[command(name = "git-interleave", version, about)]
struct Args {
    /// Directory holding the `commits`/`svnbase` tables and per-source
    /// `<dir>.svn2git` files.
    #[arg(long)]
    db_dir: PathBuf,

    /// The `--git-dir` of the repository holding both the split and
    /// monorepo commits, used as the external object store.
    #[arg(long)]
    git_dir: PathBuf,

    /// Declares a source directory; may be repeated. `-` declares the
    /// monorepo root.
    #[arg(long = "dir")]
    dirs: Vec<String>,

    /// Parse and validate the queue, but make no calls into the object
    /// store.
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing() {
    let default_directive = match std::env::var("VERBOSE") {
        Ok(v) if !v.is_empty() && v != "0" => "debug",
        _ => "info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn run(args: &Args) -> Result<String, InterleaveError> {
    let mut dirs = DirList::new();
    for name in &args.dirs {
        dirs.add_dir(name)?;
    }

    let ctx = GitSubprocessContext::new(&args.git_dir);
    let mut cache = GitCache::open(ctx, &args.db_dir)?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .expect("stdin is readable");

    let queue = parse_queue(&input, &dirs, &mut cache)?;

    if args.dry_run {
        return Ok(String::new());
    }

    interleaver::run(&queue, &mut dirs, &mut cache)
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(&args) {
        Ok(line) => {
            if !line.is_empty() {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(&err) as u8)
        }
    }
}
