use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::path::Path;
use std::process;

use clap::Parser;
use serde::Serialize;

use phrasal::config::DecodeConfig;
use phrasal::lm::HashedModel;
use phrasal::search::{
    DecodingContext, Note, PhraseManager, PhraseOption, PhraseSource, Span,
};
use phrasal::vocab::WordId;

/// Phrase-based decoder over a text phrase table.
///
/// The phrase table has one entry per line: `source ||| target ||| score`,
/// with whitespace-tokenized sides and a log10 feature score. Source
/// sentences arrive on stdin, one per line.
#[derive(Parser)]
#[command(name = "decode", about = "Phrasal demo decoder")]
struct Cli {
    /// Path to the compiled PHLM language model
    model_file: String,
    /// Path to the text phrase table
    table_file: String,
    /// Optional TOML config overriding the embedded defaults
    #[arg(long)]
    config: Option<String>,
    /// Number of translations to print per sentence
    #[arg(short, long)]
    nbest: Option<usize>,
    /// Emit JSON lines instead of plain text
    #[arg(long)]
    json: bool,
}

struct PhraseTable {
    entries: HashMap<Vec<String>, Vec<(Vec<String>, f32)>>,
}

impl PhraseTable {
    fn load(path: &str) -> io::Result<Self> {
        let mut entries: HashMap<Vec<String>, Vec<(Vec<String>, f32)>> = HashMap::new();
        for (n, line) in fs::read_to_string(path)?.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split("|||").collect();
            if fields.len() != 3 {
                eprintln!("{path}:{}: expected 'src ||| tgt ||| score'", n + 1);
                process::exit(1);
            }
            let source: Vec<String> = fields[0].split_whitespace().map(str::to_string).collect();
            let target: Vec<String> = fields[1].split_whitespace().map(str::to_string).collect();
            let score: f32 = fields[2].trim().parse().unwrap_or_else(|_| {
                eprintln!("{path}:{}: bad score '{}'", n + 1, fields[2].trim());
                process::exit(1);
            });
            entries.entry(source).or_default().push((target, score));
        }
        Ok(PhraseTable { entries })
    }
}

/// Per-sentence option collection. Covers every span the table knows and
/// adds a pass-through option for unknown single words, so the search core
/// always sees a coverable input.
struct SentenceOptions {
    by_span: HashMap<(usize, usize), Vec<PhraseOption>>,
    empty: Vec<PhraseOption>,
    /// Target surface strings, indexed by `Note`.
    targets: Vec<String>,
}

impl SentenceOptions {
    fn build(table: &PhraseTable, model: &HashedModel, words: &[String]) -> Self {
        let mut opts = SentenceOptions {
            by_span: HashMap::new(),
            empty: Vec::new(),
            targets: Vec::new(),
        };
        for start in 0..words.len() {
            let mut covered_single = false;
            for end in (start + 1)..=words.len() {
                if let Some(entries) = table.entries.get(&words[start..end].to_vec()) {
                    for (target, score) in entries {
                        let ids: Vec<WordId> =
                            target.iter().map(|w| model.vocab().get(w)).collect();
                        let note = Note(opts.targets.len());
                        opts.targets.push(target.join(" "));
                        opts.by_span
                            .entry((start, end))
                            .or_default()
                            .push(PhraseOption {
                                span: Span::new(start, end),
                                words: ids,
                                score: *score,
                                note,
                            });
                        if end == start + 1 {
                            covered_single = true;
                        }
                    }
                }
            }
            // Unknown-word pass-through keeps the sentence coverable.
            if !covered_single {
                let note = Note(opts.targets.len());
                opts.targets.push(words[start].clone());
                opts.by_span
                    .entry((start, start + 1))
                    .or_default()
                    .push(PhraseOption {
                        span: Span::new(start, start + 1),
                        words: vec![model.vocab().get(&words[start])],
                        score: 0.0,
                        note,
                    });
            }
        }
        opts
    }
}

impl PhraseSource for SentenceOptions {
    fn options(&self, span: Span) -> &[PhraseOption] {
        self.by_span
            .get(&(span.start, span.end))
            .map(|v| v.as_slice())
            .unwrap_or(&self.empty)
    }
}

#[derive(Serialize)]
struct JsonTranslation<'a> {
    score: f32,
    target: String,
    phrases: Vec<(usize, usize, &'a str)>,
}

fn main() {
    phrasal::trace_init::init_tracing(Path::new("."));
    let cli = Cli::parse();

    let model = HashedModel::open(Path::new(&cli.model_file)).unwrap_or_else(|e| {
        eprintln!("Failed to open model at {}: {e}", cli.model_file);
        process::exit(1);
    });
    let table = PhraseTable::load(&cli.table_file).unwrap_or_else(|e| {
        eprintln!("Failed to read phrase table {}: {e}", cli.table_file);
        process::exit(1);
    });
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("Failed to read config {path}: {e}");
                process::exit(1);
            });
            DecodeConfig::from_toml(&text).unwrap_or_else(|e| {
                eprintln!("Bad config {path}: {e}");
                process::exit(1);
            })
        }
        None => DecodeConfig::default(),
    };
    if let Some(n) = cli.nbest {
        config.search.nbest = n.max(1);
    }

    let ctx = DecodingContext::new(&config, &model);
    let mut manager = PhraseManager::new(&ctx);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("stdin: {e}");
                process::exit(1);
            }
        };
        let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let options = SentenceOptions::build(&table, &model, &words);
        let paths = manager.decode(&options, words.len());

        if paths.is_empty() {
            println!();
            continue;
        }
        for path in &paths {
            let target: Vec<&str> = path
                .phrases
                .iter()
                .map(|(_, note)| options.targets[note.0].as_str())
                .collect();
            if cli.json {
                let json = JsonTranslation {
                    score: path.score,
                    target: target.join(" "),
                    phrases: path
                        .phrases
                        .iter()
                        .map(|(span, note)| {
                            (span.start, span.end, options.targets[note.0].as_str())
                        })
                        .collect(),
                };
                println!("{}", serde_json::to_string(&json).expect("serializable"));
            } else {
                println!("{} ||| {}", path.score, target.join(" "));
            }
        }
    }
}
