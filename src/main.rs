use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use rpgm_translator::observability::init_tracing;
use rpgm_translator::pipeline::{dump2csv, init_default_config, PipelineConfig, TranslatorPipeline};

#[derive(Parser, Debug)]
#[command(name = "rpgm-translator")]
#[command(about = "Translate RPG Maker MV/MZ data files through an LLM completion service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate every *.json file in the input folder
    Translate {
        /// Config file path (default: search for rpgm-translator.toml upwards)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input folder (overrides paths.inputs)
        #[arg(long, value_name = "DIR")]
        inputs: Option<PathBuf>,

        /// Output folder (overrides paths.outputs)
        #[arg(long, value_name = "DIR")]
        outputs: Option<PathBuf>,
    },

    /// Convert every *_dump.json in the output folder into a tab-separated *_dump_csv.csv
    Dump2csv {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_name = "DIR")]
        outputs: Option<PathBuf>,
    },

    /// Write a default config, knowledge base and sample file, then exit
    InitConfig {
        /// Target directory (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Command::InitConfig { dir, force } => {
            let dir = dir.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
            let cfg_path = init_default_config(&dir, force).context("init default config")?;
            eprintln!("Wrote config: {}", cfg_path.display());
        }
        Command::Dump2csv { config, outputs } => {
            let cfg = PipelineConfig::from_paths_and_args(config, None, outputs)
                .context("load config")?;
            let written = dump2csv(&cfg.outputs)?;
            info!(files = written, outputs = %cfg.outputs.display(), "dump tables written");
        }
        Command::Translate {
            config,
            inputs,
            outputs,
        } => {
            let cfg = PipelineConfig::from_paths_and_args(config, inputs, outputs)
                .context("load config")?;
            info!(
                config = %cfg.config_path.display(),
                inputs = %cfg.inputs.display(),
                outputs = %cfg.outputs.display(),
                model = %cfg.model,
                "starting"
            );
            let pipeline = TranslatorPipeline::new(cfg)?;
            let summary = pipeline.run().await?;
            if summary.failed > 0 {
                anyhow::bail!("{} file(s) failed", summary.failed);
            }
        }
    }
    Ok(())
}
