use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about,
    help_template(
        "{before-help}{name} {version}\n{author-with-newline}{about-with-newline}\n{usage-heading} {usage}\n\n{all-args}{after-help}"
    )
)]
pub struct Args {
    /// Path to the TOML technology file.
    #[arg(short, long, global = true, default_value = "tech.toml")]
    pub tech: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Size the configured control chains.
    Size(SizeArgs),
    /// Trace a pin or dotted node down to the transistors it touches.
    Trace(TraceArgs),
    /// Append a suffix to the module names of a netlist.
    Rename(RenameArgs),
}

#[derive(ClapArgs, Debug)]
pub struct SizeArgs {
    /// Path to the TOML sizing configuration.
    #[arg(short, long, default_value = "sizing.toml")]
    pub config: PathBuf,

    /// Directory to which the sizing results should be saved.
    #[arg(short, long, default_value = "build")]
    pub output_dir: PathBuf,

    /// Name of the results file, without extension.
    #[arg(short, long, default_value = "sram")]
    pub name: String,

    /// Ignore and do not update the sizing cache.
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(ClapArgs, Debug)]
pub struct TraceArgs {
    /// Netlist to trace in.
    pub netlist: PathBuf,

    /// Module the node belongs to.
    pub module: String,

    /// Pin name or dotted node path (e.g. `xmaster.clk`).
    pub node: String,

    /// Report the device widths loading the node.
    #[arg(long)]
    pub caps: bool,

    /// Report the pull-up and pull-down paths out of the node.
    #[arg(long)]
    pub res: bool,

    #[arg(long, default_value = "vdd")]
    pub vdd: String,

    #[arg(long, default_value = "gnd")]
    pub gnd: String,

    /// Maximum number of series devices in a pull path.
    #[arg(long, default_value_t = 8)]
    pub max_depth: usize,
}

#[derive(ClapArgs, Debug)]
pub struct RenameArgs {
    /// Netlist to rename.
    pub netlist: PathBuf,

    /// Suffix appended to every module name.
    pub suffix: String,

    /// Modules to leave untouched.
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Directory to which the renamed netlist should be saved.
    #[arg(short, long, default_value = "build")]
    pub output_dir: PathBuf,
}
