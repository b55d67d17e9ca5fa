use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};

use phrasal::lm::pipeline::Pipeline;
use phrasal::lm::{HashedModel, NgramLookup};

#[derive(Parser)]
#[command(name = "lmtool", about = "Phrasal language model utilities")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile an ARPA text model into a binary PHLM file
    Compile {
        /// Path to the ARPA input
        arpa_file: String,
        /// Path to the binary output
        out_file: String,
    },

    /// Score whitespace-tokenized sentences from stdin, one per line
    Score {
        /// Path to the compiled PHLM model
        model_file: String,
        /// Route lookups through the scoring pipeline instead of the
        /// one-shot scorer (results are identical; this exists to
        /// exercise and time the pipelined path)
        #[arg(long)]
        pipeline: bool,
        /// Pipeline slot count
        #[arg(long, default_value = "16")]
        slots: usize,
    },
}

fn open_model(path: &str) -> HashedModel {
    HashedModel::open(Path::new(path)).unwrap_or_else(|e| {
        eprintln!("Failed to open model at {path}: {e}");
        process::exit(1);
    })
}

fn main() {
    phrasal::trace_init::init_tracing(Path::new("."));
    let cli = Cli::parse();

    match cli.command {
        Command::Compile {
            arpa_file,
            out_file,
        } => {
            let file = File::open(&arpa_file).unwrap_or_else(|e| {
                eprintln!("Failed to open {arpa_file}: {e}");
                process::exit(1);
            });
            let model = HashedModel::from_arpa_reader(BufReader::new(file)).unwrap_or_else(|e| {
                eprintln!("Failed to build model from {arpa_file}: {e}");
                process::exit(1);
            });
            model.save(Path::new(&out_file)).unwrap_or_else(|e| {
                eprintln!("Failed to write {out_file}: {e}");
                process::exit(1);
            });
            println!(
                "compiled order-{} model with {} words",
                model.order(),
                model.vocab().len()
            );
        }

        Command::Score {
            model_file,
            pipeline,
            slots,
        } => {
            let model = open_model(&model_file);
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        eprintln!("stdin: {e}");
                        process::exit(1);
                    }
                };
                let words = model.vocab().ids_for(&line);
                let total = if pipeline {
                    score_pipelined(&model, &words, slots)
                } else {
                    let (prob, state) =
                        model.score_sequence(&model.begin_sentence_state(), &words);
                    let (eos, _) = model.full_score(&state, model.eos_word());
                    prob + eos.prob
                };
                println!("{total}\t{line}");
            }
        }
    }
}

fn score_pipelined(model: &HashedModel, words: &[u32], slots: usize) -> f32 {
    let mut total = 0.0f32;
    let mut final_state = model.begin_sentence_state();
    {
        let mut pipe = Pipeline::new(model, slots.max(1), |_token, ret, state| {
            total += ret.prob;
            final_state = state;
        });
        let mut iter = words.iter();
        if let Some(&first) = iter.next() {
            pipe.begin_score(&model.begin_sentence_state(), first, 0);
            for (i, &w) in iter.enumerate() {
                pipe.append_word(w, i as u64 + 1);
            }
        }
        pipe.drain();
    }
    let (eos, _) = model.full_score(&final_state, model.eos_word());
    total + eos.prob
}
