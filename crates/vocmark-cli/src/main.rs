//! vocmark CLI - adversarial audio watermark training.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use vocmark_core::RunConfig;
use vocmark_trainer::WatermarkTrainer;

#[derive(Parser, Debug)]
#[command(name = "vocmark")]
#[command(author, version, about = "Train an audio watermark encoder/decoder", long_about = None)]
struct Cli {
    /// Path to process.yaml (audio framing)
    #[arg(short = 'p', long)]
    process_config: PathBuf,

    /// Path to model.yaml (architecture)
    #[arg(short = 'm', long)]
    model_config: PathBuf,

    /// Path to train.yaml (paths, optimizer, schedule)
    #[arg(short = 't', long)]
    train_config: PathBuf,

    /// Resume from the checkpoint saved at this global step (0 starts fresh)
    #[arg(long, alias = "restore_step", default_value_t = 0)]
    restore_step: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    run(&cli)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = RunConfig::load(&cli.process_config, &cli.model_config, &cli.train_config)
        .context("Failed to load configuration")?;

    tracing::info!(
        process = %cli.process_config.display(),
        model = %cli.model_config.display(),
        train = %cli.train_config.display(),
        checkpoints = %config.checkpoint_dir().display(),
        "configuration loaded"
    );

    let mut trainer = WatermarkTrainer::new(config)
        .context("Failed to set up training")?
        .with_default_callbacks()
        .context("Failed to open metric logs")?;

    if cli.restore_step > 0 {
        trainer
            .restore(cli.restore_step)
            .with_context(|| format!("Failed to restore step {}", cli.restore_step))?;
    }

    let summary = trainer.train().context("Training failed")?;

    println!();
    println!("Training complete");
    println!("  Pipeline:       {}", trainer.pipeline());
    println!("  Epochs:         {}", summary.epoch);
    println!("  Global step:    {}", summary.global_step);
    println!("  Checkpoints:    {}", summary.checkpoints.len());
    if let Some(path) = summary.checkpoints.last() {
        println!("  Last saved:     {}", path.display());
    }
    if let Some(val) = &summary.last_validation {
        let acc = val
            .acc
            .iter()
            .map(|a| format!("{a:.4}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  Val msg loss:   {:.6}", val.msg_loss);
        println!("  Val accuracy:   [{acc}]");
        println!("  Val SNR:        {:.2} dB", val.snr);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_short_flags_and_restore_default() {
        let cli = Cli::try_parse_from(["vocmark", "-p", "p.yaml", "-m", "m.yaml", "-t", "t.yaml"])
            .unwrap();
        assert_eq!(cli.process_config, PathBuf::from("p.yaml"));
        assert_eq!(cli.model_config, PathBuf::from("m.yaml"));
        assert_eq!(cli.train_config, PathBuf::from("t.yaml"));
        assert_eq!(cli.restore_step, 0);
    }

    #[test]
    fn test_restore_step_accepts_both_spellings() {
        let base = ["vocmark", "-p", "p", "-m", "m", "-t", "t"];
        for flag in ["--restore-step", "--restore_step"] {
            let mut args = base.to_vec();
            args.extend([flag, "120"]);
            let cli = Cli::try_parse_from(args).unwrap();
            assert_eq!(cli.restore_step, 120);
        }
    }

    #[test]
    fn test_sample_configs_load() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../configs");
        let config = RunConfig::load(
            dir.join("process.yaml"),
            dir.join("model.yaml"),
            dir.join("train.yaml"),
        )
        .unwrap();
        assert!(config.train.adv);
        assert!(config.checkpoint_dir().ends_with("pth"));
    }

    #[test]
    fn test_config_paths_are_required() {
        assert!(Cli::try_parse_from(["vocmark", "-p", "p", "-m", "m"]).is_err());
    }
}
