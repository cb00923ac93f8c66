//! Batch skeleton generation utility
//!
//! Generates tree skeletons and writes each one as a JSON file.
//!
//! Usage:
//!     generate_trees [OPTIONS] <OUTPUT_DIR>
//!
//! Options:
//!     -s, --species <NAME>    quaking_aspen, black_tupelo, weeping_willow, or all (default: all)
//!     -p, --params <FILE>     Species parameters from a JSON file (overrides --species)
//!     -n, --count <N>         Number of trees per species (default: 10)
//!     --seed <SEED>           Base seed for RNG (default: 12345)
//!     --no-leaves             Skip leaf placement
//!     -h, --help              Show this help message

use std::env;
use std::path::PathBuf;
use std::time::Instant;

use arbor::core::logging;
use arbor::generation::{generate_batch, GenerationConfig};
use arbor::tree::{TreeParams, TreeSpecies};

fn print_help() {
    eprintln!("generate_trees - Batch skeleton generation utility");
    eprintln!();
    eprintln!("Usage: generate_trees [OPTIONS] <OUTPUT_DIR>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("    -s, --species <NAME>    quaking_aspen, black_tupelo, weeping_willow, or all (default: all)");
    eprintln!("    -p, --params <FILE>     Species parameters from a JSON file (overrides --species)");
    eprintln!("    -n, --count <N>         Number of trees per species (default: 10)");
    eprintln!("    --seed <SEED>           Base seed for RNG (default: 12345)");
    eprintln!("    --no-leaves             Skip leaf placement");
    eprintln!("    -h, --help              Show this help message");
    eprintln!();
    eprintln!("Example:");
    eprintln!("    generate_trees -s willow -n 20 ./assets/skeletons");
    eprintln!("    generate_trees -p my_species.json --seed 42 ./assets/skeletons");
}

#[derive(Debug)]
struct Args {
    output_dir: PathBuf,
    species: Option<TreeSpecies>, // None means all presets
    params_file: Option<PathBuf>,
    count: u64,
    seed: u64,
    generate_leaves: bool,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        return Err("Missing output directory".to_string());
    }

    let mut species: Option<TreeSpecies> = None;
    let mut params_file: Option<PathBuf> = None;
    let mut count: u64 = 10;
    let mut seed: u64 = 12345;
    let mut generate_leaves = true;
    let mut output_dir: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-s" | "--species" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --species".to_string());
                }
                species = match args[i].as_str() {
                    "all" => None,
                    name => Some(TreeSpecies::from_name(name).ok_or_else(|| {
                        format!("Unknown species: {}. Valid species: quaking_aspen, black_tupelo, weeping_willow, all", name)
                    })?),
                };
            }
            "-p" | "--params" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --params".to_string());
                }
                params_file = Some(PathBuf::from(&args[i]));
            }
            "-n" | "--count" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --count".to_string());
                }
                count = args[i].parse().map_err(|_| format!("Invalid count: {}", args[i]))?;
            }
            "--seed" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --seed".to_string());
                }
                seed = args[i].parse().map_err(|_| format!("Invalid seed: {}", args[i]))?;
            }
            "--no-leaves" => generate_leaves = false,
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            path => {
                if output_dir.is_some() {
                    return Err("Multiple output directories specified".to_string());
                }
                output_dir = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    let output_dir = output_dir.ok_or("Missing output directory")?;

    Ok(Args {
        output_dir,
        species,
        params_file,
        count,
        seed,
        generate_leaves,
    })
}

/// Generate one batch and write `<name>_<index>.json` files
fn generate_species(name: &str, params: &TreeParams, args: &Args) -> arbor::core::Result<usize> {
    println!("Generating {} {} trees...", args.count, name);
    let start = Instant::now();

    let config = GenerationConfig {
        seed: args.seed,
        generate_leaves: args.generate_leaves,
        ..Default::default()
    };

    let mut stems = 0;
    for (i, result) in generate_batch(params, &config, args.count).into_iter().enumerate() {
        let skeleton = result?;
        stems += skeleton.stems.len();
        let path = args.output_dir.join(format!("{name}_{i:04}.json"));
        skeleton.save_sync(&path)?;
    }

    let elapsed = start.elapsed();
    println!("  Completed in {:.2}s ({} stems total)", elapsed.as_secs_f64(), stems);
    Ok(stems)
}

fn main() {
    logging::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    println!("Tree Skeleton Generator");
    println!("=======================");
    println!("Output directory: {}", args.output_dir.display());
    println!("Trees per species: {}", args.count);
    println!("Base seed: {}", args.seed);
    println!("Leaves: {}", if args.generate_leaves { "on" } else { "off" });
    println!();

    let batches: Vec<(String, TreeParams)> = match (&args.params_file, args.species) {
        (Some(path), _) => {
            let params = match TreeParams::load_sync(path) {
                Ok(params) => params,
                Err(e) => {
                    eprintln!("Error loading params: {}", e);
                    std::process::exit(1);
                }
            };
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom".to_string());
            vec![(name, params)]
        }
        (None, Some(species)) => vec![(species.name().to_string(), TreeParams::from_species(species))],
        (None, None) => TreeSpecies::ALL
            .iter()
            .map(|s| (s.name().to_string(), TreeParams::from_species(*s)))
            .collect(),
    };

    let total_start = Instant::now();
    let mut total_stems = 0;

    for (name, params) in &batches {
        match generate_species(name, params, &args) {
            Ok(stems) => total_stems += stems,
            Err(e) => {
                eprintln!("Error generating {} trees: {}", name, e);
                std::process::exit(1);
            }
        }
    }

    let total_elapsed = total_start.elapsed();

    println!();
    println!("Summary:");
    println!("  Total trees generated: {}", batches.len() as u64 * args.count);
    println!("  Total stems: {}", total_stems);
    println!("  Total time: {:.2}s", total_elapsed.as_secs_f64());
    println!("  Output: {}", args.output_dir.display());
}
