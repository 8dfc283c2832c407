use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

use rym_genres::cache::{CacheStore, SystemClock};
use rym_genres::config::Config;
use rym_genres::engine::Engine;
use rym_genres::hierarchy::GenreHierarchy;
use rym_genres::import::{retag, ImportHook, ImportOutcome};
use rym_genres::library::{AlbumFilter, Library};
use rym_genres::models::MatchQuery;
use rym_genres::progress::set_log_only;
use rym_genres::projector::TagSet;

#[derive(Parser)]
#[command(name = "rym-genres")]
#[command(about = "Tag albums with Rate Your Music genres, descriptors and genre-tree groupings")]
struct Args {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Library database (overrides library_file)
    #[arg(long)]
    library: Option<PathBuf>,

    /// Worker threads for re-tagging (0 = all cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Hide progress bars and log progress lines instead
    #[arg(long)]
    log_only: bool,

    /// -v for debug, -vv for trace
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-fetch RYM tags for albums already in the library
    Rym {
        /// Filter terms: artist:NAME, album:TITLE, or bare words
        query: Vec<String>,

        /// Re-apply tags even when they are already up to date
        #[arg(long, short)]
        force: bool,

        /// Write run statistics as JSON
        #[arg(long)]
        stats: Option<PathBuf>,
    },

    /// Import one album, tagging it from the RYM dataset
    Import { artist: String, album: String },

    /// Show the RYM match and projected tags for an album without storing anything
    Match {
        artist: String,
        album: String,

        /// Print the match as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a genre's position in the RYM genre tree
    Genre { name: String },

    /// Drop expired cache entries
    Sweep,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load config {:?}", path))?,
        None => Config::default(),
    };
    if let Some(library) = &args.library {
        config.library_file = library.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    Ok(config)
}

fn print_tags(tags: &TagSet) {
    for (label, values) in tags.fields() {
        if !values.is_empty() {
            println!("  {}: {}", label, values.join(", "));
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    set_log_only(args.log_only);

    let config = load_config(&args)?;

    match args.command {
        Command::Rym { query, force, stats } => {
            let engine = Engine::open(config.clone()).context("Failed to start RYM engine")?;
            let mut library = Library::open(&config.library_file)
                .with_context(|| format!("Failed to open library {:?}", config.library_file))?;
            let filter = AlbumFilter::parse(&query);
            let run = retag(&engine, &mut library, &filter, force)?;

            println!("\n{:=<60}", "");
            println!(
                "Summary: Updated {}/{} albums, skipped {} (up-to-date), missing {}",
                run.updated, run.processed, run.skipped_up_to_date, run.missing
            );
            println!(
                "  Match methods: exact {}, similarity {}, flexible title {}",
                run.exact_matches, run.similarity_matches, run.flexible_matches
            );
            println!("  Elapsed: {:.2}s", run.elapsed_seconds);
            println!("{:=<60}", "");

            if let Some(path) = stats {
                run.write_to_file(&path)
                    .with_context(|| format!("Failed to write stats to {:?}", path))?;
                info!("Wrote run statistics to {:?}", path);
            }
        }
        Command::Import { artist, album } => {
            let engine = Engine::open(config.clone()).context("Failed to start RYM engine")?;
            let mut library = Library::open(&config.library_file)
                .with_context(|| format!("Failed to open library {:?}", config.library_file))?;
            let hook = ImportHook::new(&engine);
            let (id, outcome) = hook
                .import_into(&mut library, &artist, &album)
                .with_context(|| format!("Import of {} - {} stopped", artist, album))?;
            match outcome {
                ImportOutcome::Tagged { tags, .. } => {
                    println!("Imported {} - {} (id {}) with RYM tags", artist, album, id);
                    print_tags(&tags);
                }
                ImportOutcome::Untagged => println!("Imported {} - {} (id {}) without RYM tags", artist, album, id),
            }
        }
        Command::Match { artist, album, json } => {
            let engine = Engine::open(config.clone()).context("Failed to start RYM engine")?;
            let Some(enrichment) = engine.enrich(&MatchQuery::new(artist.as_str(), album.as_str()))? else {
                bail!("No RYM match for {} - {}", artist, album);
            };
            let tags = TagSet::project(&enrichment, &config);
            if json {
                println!("{}", serde_json::to_string_pretty(&(&enrichment.result, &tags))?);
            } else {
                let result = &enrichment.result;
                println!(
                    "{} - {} ({}, score {:.3}; artist {:.3}, title {:.3})",
                    result.record.artist_name,
                    result.record.release_title,
                    result.matched_by.as_str(),
                    result.score,
                    result.artist_similarity,
                    result.title_similarity
                );
                print_tags(&tags);
            }
        }
        Command::Genre { name } => {
            let hierarchy = GenreHierarchy::load(&config.genre_tree_file, &config.excluded_genres_file)
                .context("Failed to load the RYM genre tree")?;
            if !hierarchy.tree.contains(&name) {
                bail!("{:?} is not in the RYM genre tree", name);
            }
            println!("{}", name);
            println!("  Parents: {}", hierarchy.tree.parents(&name).join(", "));
            let excluded: Vec<String> = hierarchy
                .tree
                .ancestors(&name)
                .into_iter()
                .filter(|g| hierarchy.exclusions.contains(g))
                .collect();
            if !excluded.is_empty() {
                println!("  Excluded ancestors: {}", excluded.join(", "));
            }
            for path in hierarchy.tree.genre_paths(&name) {
                println!("  Path: {}", path.join(" > "));
            }
            let groupings = hierarchy.groupings(
                std::slice::from_ref(&name),
                &[],
                config.max_hierarchy_depth,
                config.max_groupings,
            );
            println!("  Groupings: {}", groupings.join(", "));
        }
        Command::Sweep => {
            let cache = CacheStore::open(&config.cache_file, &[config.library_file.as_path()], Arc::new(SystemClock))
                .with_context(|| format!("Failed to open cache {:?}", config.cache_file))?;
            let removed = cache.invalidate_expired()?;
            println!("Removed {} expired cache entries", removed);
        }
    }

    Ok(())
}
