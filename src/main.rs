use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gridx::sim::config::RunConfig;
use gridx::sim::summary::write_summary;
use gridx::sim::top::GridTop;
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct GridxArgs {
    #[arg(help = "Path to config.toml; built-in defaults when omitted")]
    config_path: Option<PathBuf>,
    #[arg(long, help = "Override mesh width")]
    mesh_width: Option<usize>,
    #[arg(long, help = "Override mesh height")]
    mesh_height: Option<usize>,
    #[arg(long, help = "Override number of threads per core")]
    threads_per_core: Option<usize>,
    #[arg(long, help = "Override number of banks per core")]
    num_banks: Option<usize>,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug, 3:trace)")]
    log: Option<u64>,
    #[arg(long, help = "Write the run summary as JSON")]
    results_json: Option<PathBuf>,
}

fn log_filter(level: u64) -> &'static str {
    match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

pub fn main() -> anyhow::Result<()> {
    let argv = GridxArgs::parse();
    let config_table: Table = match &argv.config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&text).context("cannot parse config toml")?
        }
        None => Table::new(),
    };
    let mut config = RunConfig::from_table(&config_table);

    // override toml configs with argv
    config.sim.log_level = argv.log.unwrap_or(config.sim.log_level);
    config.sim.results_json = argv.results_json.or(config.sim.results_json);
    config.grid.mesh.width = argv.mesh_width.unwrap_or(config.grid.mesh.width);
    config.grid.mesh.height = argv.mesh_height.unwrap_or(config.grid.mesh.height);
    if argv.mesh_width.is_some() || argv.mesh_height.is_some() {
        // the mesh interval follows the grid size
        let mesh = &config.grid.mesh;
        let slices = (mesh.width * mesh.height) as u64;
        config.grid.mem.sram_limit = config.grid.mem.sram_base + slices * mesh.slice_words - 1;
    }
    config.grid.mem.num_banks = argv.num_banks.unwrap_or(config.grid.mem.num_banks);
    config.traffic.threads_per_core = argv
        .threads_per_core
        .unwrap_or(config.traffic.threads_per_core);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(config.sim.log_level)),
    )
    .init();

    let mut top = GridTop::new(&config)?;
    let summary = top.run()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(path) = &config.sim.results_json {
        write_summary(path, &summary)?;
    }
    Ok(())
}
