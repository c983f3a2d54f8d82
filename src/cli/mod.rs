use std::fs::canonicalize;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use itertools::Itertools;

use crate::cli::args::{Args, Command, RenameArgs, SizeArgs, TraceArgs};
use crate::cli::progress::StepContext;
use crate::netlist::trace::{HierarchyTracer, TerminalKind, TxType};
use crate::netlist::SpiceHierarchy;
use crate::paths::{out_sizes, out_spice};
use crate::strategy::{parse_sizing_config, Dispatcher, SizingCache, SizingResults};
use crate::tech::TechConfig;

pub mod args;
pub mod progress;

pub const BANNER: &str = r"
 ________  ________  ________  _____ ______     _______   _______
|\   ____\|\   __  \|\   __  \|\   _ \  _   \  /  ___  \ /  ___  \
\ \  \___|\ \  \|\  \ \  \|\  \ \  \\\__\ \  \/__/|_/  //__/|_/  /|
 \ \_____  \ \   _  _\ \   __  \ \  \\|__| \  \__|//  / /__|//  / /
  \|____|\  \ \  \\  \\ \  \ \  \ \  \    \ \  \  /  /_/__  /  /_/__
    ____\_\  \ \__\\ _\\ \__\ \__\ \__\    \ \__\|\________\\________\
   |\_________\|__|\|__|\|__|\|__|\|__|     \|__| \|_______|\|_______|
   \|_________|


SRAM22 sizing v0.2
";

pub fn run() -> Result<()> {
    let args = Args::parse();

    let tech_path = canonicalize(&args.tech)
        .with_context(|| format!("technology file {:?} not found", args.tech))?;
    let tech = TechConfig::load(&tech_path)?;

    match args.command {
        Command::Size(size) => run_size(&tech, &tech_path, size),
        Command::Trace(trace) => run_trace(&tech, trace),
        Command::Rename(rename) => run_rename(&tech, rename),
    }
}

/// Resolves `path` against the directory of the file that named it.
fn relative_to(config_path: &Path, path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn run_size(tech: &TechConfig, tech_path: &Path, args: SizeArgs) -> Result<()> {
    let config_path = canonicalize(&args.config)
        .with_context(|| format!("sizing configuration {:?} not found", args.config))?;

    println!("{BANNER}");

    println!("Reading configuration files...\n");
    let mut config = parse_sizing_config(&config_path)?;
    if config.driver_c_drain <= 0.0 {
        bail!("driver_c_drain must be positive, got {}", config.driver_c_drain);
    }
    if let Some(cache) = config.cache.as_mut() {
        cache.dir = relative_to(&config_path, &cache.dir);
    }

    println!("Technology file: {:?}", tech_path);
    println!("Configuration file: {:?}", &config_path);
    println!("Array parameters:");
    println!("\tTechnology: {}", tech.name);
    println!("\tNumber of rows: {}", config.array.num_rows);
    println!("\tNumber of columns: {}", config.array.num_cols);

    let families = config.families.configured();
    if families.is_empty() {
        bail!("no signal families configured in {:?}", config_path);
    }

    let cells = match config.cells.as_ref() {
        Some(path) => {
            let path = relative_to(&config_path, path);
            let cells = SpiceHierarchy::from_file(&path, &tech.models)?;
            println!("\tCell netlist: {:?} ({} modules)", path, cells.len());
            Some(cells)
        }
        None => None,
    };

    let mut dispatcher = Dispatcher::new(tech, &config);
    if let Some(cells) = cells.as_ref() {
        dispatcher = dispatcher.with_cells(cells);
    }
    if !args.no_cache {
        if let Some(path) = config.cache_path(tech) {
            println!("\tSizing cache: {:?}", path);
            dispatcher = dispatcher.with_cache(SizingCache::open(path)?);
        }
    }
    println!();

    let mut ctx = StepContext::new(families.iter().filter_map(|family| {
        config
            .families
            .get(*family)
            .map(|fc| (*family, &fc.strategy))
    }));

    let mut results = SizingResults {
        tech: tech.name.clone(),
        num_rows: config.array.num_rows,
        num_cols: config.array.num_cols,
        ..Default::default()
    };
    for family in families {
        let cached = dispatcher.is_cached(family);
        let sizes = ctx.check(dispatcher.size(family).map_err(anyhow::Error::from))?;
        results.sizes.insert(family.name().to_string(), sizes);
        ctx.finish(family, cached)?;
    }

    let sizes_path = out_sizes(&args.output_dir, &args.name);
    results.write(&sizes_path)?;

    for (family, sizes) in results.sizes.iter() {
        let sizes = sizes.iter().map(|s| format!("{s:.3}")).join(", ");
        println!("\t{:16} [{}]", family.bold(), sizes);
    }
    println!("\nSizes saved to: {:?}\n", canonicalize(&sizes_path)?);

    Ok(())
}

fn run_trace(tech: &TechConfig, args: TraceArgs) -> Result<()> {
    let hier = SpiceHierarchy::from_file(&args.netlist, &tech.models)?;
    let tracer = HierarchyTracer::new(&hier);

    let paths = tracer.deduce_hierarchy_for_node(&args.node, &args.module)?;
    if paths.is_empty() {
        println!("{} {} does not reach any transistor", "warning:".yellow().bold(), args.node);
    }
    for path in paths.iter() {
        println!("{path}");
    }

    if args.caps {
        let caps = tracer.extract_caps_for_node(&args.node, &args.module)?;
        println!("\n{}", "Device widths:".bold());
        for tx_type in [TxType::Nmos, TxType::Pmos] {
            for terminal in [TerminalKind::D, TerminalKind::G, TerminalKind::B] {
                let width = caps.width(tx_type, terminal);
                if width > 0.0 {
                    println!("\t{tx_type}{terminal}: {:.3e}m", width);
                }
            }
        }
        println!("\tgate capacitance: {:.3e}F", caps.gate_cap(tech));
    }

    if args.res {
        if args.node.contains('.') {
            bail!("pull paths are traced from a pin of `{}`, not a dotted node", args.module);
        }
        let networks = tracer.extract_res_for_pin(
            &args.node,
            &args.module,
            &args.vdd,
            &args.gnd,
            args.max_depth,
        )?;
        println!("\n{}", "Pull networks:".bold());
        for tx_type in [TxType::Nmos, TxType::Pmos] {
            let paths = networks.paths(tx_type);
            let worst = networks
                .worst_resistance(tech, tx_type)
                .map(|r| format!("{r:.1} ohm"))
                .unwrap_or_else(|| "-".to_string());
            println!("\t{tx_type}: {} paths, worst {}", paths.len(), worst);
        }
    }

    Ok(())
}

fn run_rename(tech: &TechConfig, args: RenameArgs) -> Result<()> {
    let mut hier = SpiceHierarchy::from_file(&args.netlist, &tech.models)?;
    let exclusions = args.exclude.iter().map(String::as_str).collect::<Vec<_>>();
    hier.rename_modules(&args.suffix, &exclusions);

    let stem = args
        .netlist
        .file_stem()
        .and_then(|s| s.to_str())
        .context("netlist path has no file name")?;
    let out = out_spice(&args.output_dir, &format!("{stem}{}", args.suffix));
    if let Some(dir) = out.parent() {
        std::fs::create_dir_all(dir)?;
    }
    hier.write_spice(&out)?;
    println!("Renamed {} modules; netlist saved to: {:?}", hier.len(), out);

    Ok(())
}
