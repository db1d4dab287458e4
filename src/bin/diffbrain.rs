//! diffbrain CLI — train and sample the conditional DiffWave generator.
//!
//! # Subcommands
//!
//! - `train --config train.json` — fit a model, writing
//!   `<checkpoint_dir>/last.safetensors` and its JSON sidecar every epoch
//! - `generate --config model.json --checkpoint ckpt.safetensors --inputs ...`
//!   — synthesise one WAV per input
//!
//! With a class encoder, each input names a word (a bare word or any
//! dataset filename such as `goed3_pitch1.wav`) and `--words-file` is
//! required. With a brain encoder, each input is an ECoG `.npy` recording.
//!
//! `generate` prints a one-line JSON summary per written file:
//!
//! ```json
//! {"path":"out/goed.wav","input":"goed","samples":16000,"sample_rate":16000}
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::{Device, Tensor};
use clap::{Parser, Subcommand};
use diffbrain_rs::{
    audio::{peak_normalize, write_wav},
    config::{EncoderConfig, ModelConfig, TrainConfig},
    data::{ClassConditionalLoader, ecog::process_ecog},
    pipeline::{GenerationParams, Pipeline},
};

#[derive(Parser, Debug)]
#[command(
    name = "diffbrain",
    about = "Speech synthesis from brain recordings with a conditional DiffWave"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a conditional generator.
    Train {
        /// Training configuration (JSON).
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
    /// Generate audio from class labels or ECoG recordings.
    Generate {
        /// Model configuration (JSON).
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Checkpoint written by `train`.
        #[arg(long)]
        checkpoint: PathBuf,

        /// Comma-separated word list; required for class encoders.
        #[arg(long)]
        words_file: Option<PathBuf>,

        /// Words, dataset filenames or `.npy` recordings.
        #[arg(long, required = true, num_args = 1..)]
        inputs: Vec<String>,

        #[arg(long, short = 'o', default_value = "generated")]
        output_dir: PathBuf,

        /// Random seed for the sampling noise.
        #[arg(long, short = 's', default_value_t = 0)]
        seed: u64,

        /// Sample over every training step instead of the fast schedule.
        #[arg(long)]
        full: bool,

        /// Scale each clip to peak amplitude 1 before writing.
        #[arg(long)]
        normalize: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = Device::cuda_if_available(0)?;
    tracing::info!("Using device: {:?}", device);

    match args.command {
        Command::Train { config } => {
            let cfg = TrainConfig::from_file(&config)
                .with_context(|| format!("failed to read {}", config.display()))?;
            let state = diffbrain_rs::training::train(&cfg, &device)?;
            println!("{}", serde_json::to_string(&state)?);
        }
        Command::Generate {
            config,
            checkpoint,
            words_file,
            inputs,
            output_dir,
            seed,
            full,
            normalize,
        } => {
            let cfg = ModelConfig::from_file(&config)
                .with_context(|| format!("failed to read {}", config.display()))?;
            let conditioning = conditioning_input(&cfg, words_file, &inputs, &device)?;

            let pipeline = Pipeline::load(&cfg, &checkpoint, &device)
                .map_err(|e| anyhow::anyhow!("failed to load pipeline: {e}"))?;
            let params = GenerationParams { fast: !full, seed };
            let clips = pipeline
                .generate(&conditioning, &params)
                .map_err(|e| anyhow::anyhow!("generation failed: {e}"))?;

            std::fs::create_dir_all(&output_dir)?;
            let names = output_names(&inputs);
            for ((input, name), mut clip) in inputs.iter().zip(names).zip(clips) {
                if normalize {
                    peak_normalize(&mut clip);
                }
                let path = output_dir.join(format!("{name}.wav"));
                write_wav(&path, &clip, pipeline.sample_rate())
                    .map_err(|e| anyhow::anyhow!("failed to write audio: {e}"))?;

                println!(
                    "{}",
                    file_summary(&path, input, clip.len(), pipeline.sample_rate())
                );
            }
        }
    }
    Ok(())
}

fn file_summary(path: &Path, input: &str, samples: usize, sample_rate: u32) -> serde_json::Value {
    serde_json::json!({
        "path": path.display().to_string(),
        "input": input,
        "samples": samples,
        "sample_rate": sample_rate,
    })
}

/// Output file stem for every input.
///
/// Stems shared by several inputs get the input's position appended, so
/// `goed goed hoe` writes `goed_0`, `goed_1` and `hoe`.
fn output_names(inputs: &[String]) -> Vec<String> {
    let stems: Vec<String> = inputs
        .iter()
        .map(|input| {
            Path::new(input)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.clone())
        })
        .collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.as_str()).or_default() += 1;
    }
    stems
        .iter()
        .enumerate()
        .map(|(i, stem)| {
            if counts[stem.as_str()] > 1 {
                format!("{stem}_{i}")
            } else {
                stem.clone()
            }
        })
        .collect()
}

/// Stack the encoder input for every CLI input, batch first.
fn conditioning_input(
    cfg: &ModelConfig,
    words_file: Option<PathBuf>,
    inputs: &[String],
    device: &Device,
) -> anyhow::Result<Tensor> {
    match cfg.encoder {
        EncoderConfig::Class(_) => {
            let words_file =
                words_file.context("--words-file is required for a class encoder")?;
            let loader = ClassConditionalLoader::from_file(&words_file, device)?;
            Ok(loader.batch_call(inputs, true)?)
        }
        EncoderConfig::Brain(_) | EncoderConfig::BrainClass(_) => {
            let recordings = inputs
                .iter()
                .map(|p| process_ecog(Path::new(p), device))
                .collect::<diffbrain_rs::Result<Vec<_>>>()?;
            Ok(Tensor::stack(&recordings, 0)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(inputs: &[&str]) -> Vec<String> {
        output_names(&inputs.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn distinct_inputs_keep_their_stem() {
        assert_eq!(names(&["goed", "data/hoe3.npy"]), vec!["goed", "hoe3"]);
    }

    #[test]
    fn repeated_inputs_get_distinct_names() {
        assert_eq!(
            names(&["goed", "hoe", "out/goed.wav"]),
            vec!["goed_0", "hoe", "goed_2"]
        );
    }

    #[test]
    fn summary_escapes_input() {
        let line = file_summary(Path::new("out/a.wav"), r#"we"ird\in"#, 16, 8000).to_string();
        let back: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(back["input"], r#"we"ird\in"#);
        assert_eq!(back["samples"], 16);
        assert_eq!(back["path"], "out/a.wav");
    }
}
