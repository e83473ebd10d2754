//! Strata CLI - three-tier code index and patch engine

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use strata_core::{
    Config, ContentQuery, CoderResult, PatchOperation, PatchOptions, RenderOptions, Strata,
    StrataError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Three-tier code index and patch engine", long_about = None)]
struct Cli {
    /// Override repo root detection
    #[arg(long, global = true, env = "STRATA_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Keep analysis results in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    /// Log verbosity on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .strata/ and config.toml
    Init,

    /// Analyze the repository and print the L1 map
    Analyze {
        /// Execution log (JSON lines, traceback or profile output)
        #[arg(short, long)]
        trajectory: Option<PathBuf>,

        /// Re-rank key symbols against this query
        #[arg(short, long)]
        focus: Option<String>,

        /// Render unexecuted files and symbols in full
        #[arg(long)]
        no_prune: bool,
    },

    /// Print the L2 skeleton of a file (all analyzed files if omitted)
    Skeleton { file: Option<String> },

    /// Print lines START..=END of a file (L3)
    Read {
        file: String,
        start: usize,
        end: usize,
    },

    /// Search file contents
    Search {
        pattern: String,

        /// Treat the pattern as a regex
        #[arg(short = 'e', long)]
        regex: bool,

        #[arg(short, long)]
        ignore_case: bool,

        /// Restrict to files matching this glob
        #[arg(short, long)]
        scope: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// List files matching a glob
    Glob { pattern: String },

    /// Print a file
    Cat { path: String },

    /// Zip a directory before patching
    Snapshot {
        /// Directory to archive (defaults to the root)
        #[arg(default_value = ".")]
        target: PathBuf,
    },

    /// Re-extract a snapshot archive over a directory
    Restore {
        archive: PathBuf,
        #[arg(default_value = ".")]
        target: PathBuf,
    },

    /// Search/replace patch
    Patch {
        file: String,

        /// File holding the search block
        #[arg(long)]
        search: PathBuf,

        /// File holding the replacement block
        #[arg(long)]
        replace: PathBuf,

        /// Disable similarity matching
        #[arg(long)]
        no_fuzzy: bool,

        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Apply a unified diff to one file
    Diff {
        file: String,
        /// Diff file ("-" for stdin)
        diff: PathBuf,
    },

    /// Apply line operations given as a JSON array
    Ops {
        file: String,
        /// JSON file ("-" for stdin)
        ops: PathBuf,
    },

    /// Rank symbols against a query
    Symbols {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show where a symbol is referenced
    Refs { name: String },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli.command, cli.root, cli.json, cli.no_cache) {
        if cli.json {
            let error_json = serde_json::json!({ "code": e.code(), "message": e.to_string() });
            eprintln!("{error_json}");
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(
    command: Commands,
    root: Option<PathBuf>,
    json: bool,
    no_cache: bool,
) -> strata_core::Result<()> {
    let repo_root = detect_repo_root(root)?;
    tracing::debug!(root = %repo_root.display(), "repository root");

    if let Commands::Init = command {
        let path = Config::init(&repo_root)?;
        if json {
            print_json(&serde_json::json!({ "config": path }))?;
        } else {
            println!("{} {}", "Created".green(), path.display());
        }
        return Ok(());
    }

    let mut strata = if no_cache {
        Strata::open_uncached(&repo_root)?
    } else {
        Strata::open(&repo_root)?
    };
    match command {
        Commands::Init => Ok(()),
        Commands::Analyze {
            trajectory,
            focus,
            no_prune,
        } => cmd_analyze(&mut strata, trajectory.as_deref(), focus.as_deref(), no_prune, json),
        Commands::Skeleton { file } => cmd_skeleton(&mut strata, file.as_deref(), json),
        Commands::Read { file, start, end } => {
            let node = strata.read_implementation(&file, start, end)?;
            if json {
                print_json(&node)
            } else {
                print!("{}", node.text);
                Ok(())
            }
        }
        Commands::Search {
            pattern,
            regex,
            ignore_case,
            scope,
            limit,
        } => {
            let mut query = if regex {
                ContentQuery::regex(&pattern)
            } else {
                ContentQuery::literal(&pattern)
            };
            query.case_insensitive = ignore_case;
            query.scope = scope;
            query.max_results = limit;
            cmd_search(&strata, &query, json)
        }
        Commands::Glob { pattern } => {
            let paths = strata.search_glob(&pattern)?;
            if json {
                print_json(&paths)
            } else {
                for path in &paths {
                    println!("{path}");
                }
                Ok(())
            }
        }
        Commands::Cat { path } => {
            print!("{}", strata.read_file(&path)?);
            Ok(())
        }
        Commands::Snapshot { target } => {
            let archive = strata.generate_snapshot(&target)?;
            if json {
                print_json(&serde_json::json!({ "archive": archive }))
            } else {
                println!("{} {}", "Snapshot".green(), archive.display());
                Ok(())
            }
        }
        Commands::Restore { archive, target } => {
            let restored = strata.restore_snapshot(&archive, &target)?;
            if json {
                print_json(&serde_json::json!({ "restored": restored }))
            } else {
                println!("{}: {} files", "Restored".green(), restored);
                Ok(())
            }
        }
        Commands::Patch {
            file,
            search,
            replace,
            no_fuzzy,
            threshold,
        } => {
            let search = read_input(&search)?;
            let replace = read_input(&replace)?;
            let options = PatchOptions {
                fuzzy: no_fuzzy.then_some(false),
                threshold,
            };
            let result = strata.apply_patch(&file, &search, &replace, &options)?;
            print_coder_result(&result, json)
        }
        Commands::Diff { file, diff } => {
            let result = strata.apply_diff(&file, &read_input(&diff)?)?;
            print_coder_result(&result, json)
        }
        Commands::Ops { file, ops } => {
            let ops: Vec<PatchOperation> = serde_json::from_str(&read_input(&ops)?)?;
            let result = strata.apply_operations(&file, &ops)?;
            print_coder_result(&result, json)
        }
        Commands::Symbols { query, limit } => {
            strata.analyze_repository(None, None)?;
            let hits = strata.search_symbols(&query, limit)?;
            if json {
                return print_json(&hits);
            }
            for hit in &hits {
                println!(
                    "{} {}:{} {} ({:.3} relevance, {:.4} importance)",
                    hit.kind.to_string().dimmed(),
                    hit.path,
                    hit.lines,
                    hit.qualified_name.cyan(),
                    hit.relevance.total,
                    hit.importance
                );
            }
            println!("({} symbols)", hits.len());
            Ok(())
        }
        Commands::Refs { name } => {
            strata.analyze_repository(None, None)?;
            let refs = strata.references(&name)?;
            if json {
                return print_json(&refs);
            }
            for symbol in &refs {
                println!("{} ({} references)", symbol.name.cyan(), symbol.locations.len());
                for location in &symbol.locations {
                    println!("  {}:{}", location.path, location.line);
                }
            }
            Ok(())
        }
    }
}

fn cmd_analyze(
    strata: &mut Strata,
    trajectory: Option<&Path>,
    focus: Option<&str>,
    no_prune: bool,
    json: bool,
) -> strata_core::Result<()> {
    let trajectory = trajectory.map(read_input).transpose()?;
    let map = strata.analyze_repository(trajectory.as_deref(), focus)?;
    if json {
        return print_json(map.as_ref());
    }

    let mut options = RenderOptions::from_config(strata.config());
    if no_prune {
        options.prune_unexecuted = false;
    }
    let rendered = map.render(&options);
    print!("{}", rendered.text);
    eprintln!(
        "{}: {} files, {} symbols (~{} tokens)",
        "Analyzed".green(),
        map.stats.files,
        map.stats.symbols,
        rendered.tokens
    );
    Ok(())
}

fn cmd_skeleton(strata: &mut Strata, file: Option<&str>, json: bool) -> strata_core::Result<()> {
    if file.is_none() && strata.analysis().is_none() {
        strata.analyze_repository(None, None)?;
    }
    let skeletons = strata.get_skeleton(file)?;
    if json {
        let rendered: Vec<_> = skeletons
            .iter()
            .map(|s| {
                serde_json::json!({
                    "path": s.path,
                    "language": s.language,
                    "content_hash": s.content_hash,
                    "signatures": s.signatures,
                    "line_map": s.line_map(),
                    "text": s.render(),
                })
            })
            .collect();
        return print_json(&rendered);
    }
    for skeleton in &skeletons {
        if skeletons.len() > 1 {
            println!("{}", format!("// {}", skeleton.path).dimmed());
        }
        print!("{}", skeleton.render());
        if skeletons.len() > 1 {
            println!();
        }
    }
    Ok(())
}

fn cmd_search(strata: &Strata, query: &ContentQuery, json: bool) -> strata_core::Result<()> {
    let outcome = strata.search_content(query)?;
    if json {
        return print_json(&outcome);
    }
    for m in &outcome.matches {
        println!("{}:{}:{}: {}", m.path.cyan(), m.line, m.column, m.text.trim_end());
    }
    if outcome.truncated {
        println!("... ({})", "truncated".yellow());
    }
    if let Some(issue) = &outcome.degraded {
        eprintln!("{}: {:?}", "Degraded".yellow(), issue);
    }
    println!("({} matches via {})", outcome.matches.len(), outcome.backend);
    Ok(())
}

fn print_coder_result(result: &CoderResult, json: bool) -> strata_core::Result<()> {
    if json {
        print_json(result)?;
    } else if result.success {
        let strategy = result.strategy.map(|s| s.as_str()).unwrap_or("unknown");
        match result.lines {
            Some(lines) => println!(
                "{}: {} lines {} via {}",
                "Patched".green(),
                result.file,
                lines,
                strategy
            ),
            None => println!("{}: {} via {}", "Patched".green(), result.file, strategy),
        }
        if let Some(diff) = &result.diff {
            print!("{diff}");
        }
    } else {
        let reason = result
            .failure
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_default();
        println!("{}: {}: {}", "Rejected".red(), result.file, reason);
        for suggestion in &result.suggestions {
            println!("  {} {}", "hint:".yellow(), suggestion);
        }
    }
    if !result.success {
        std::process::exit(2);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> strata_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// File contents, or stdin for "-"
fn read_input(path: &Path) -> strata_core::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
        return Ok(buf);
    }
    fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StrataError::FileNotFound(path.to_path_buf()),
        _ => StrataError::Io(e),
    })
}

fn detect_repo_root(override_path: Option<PathBuf>) -> strata_core::Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    // Walk up from current directory looking for .strata or .git
    let mut current = std::env::current_dir()?;
    loop {
        if current.join(".strata").exists() || current.join(".git").exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Ok(std::env::current_dir()?);
        }
    }
}
