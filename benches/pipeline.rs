use criterion::{black_box, criterion_group, criterion_main, Criterion};

use phrasal::lm::pipeline::Pipeline;
use phrasal::lm::{HashedModel, NgramLookup};
use phrasal::vocab::WordId;

const VOCAB: usize = 200;

/// Deterministic synthetic order-3 model: a word chain with bigrams and
/// trigrams along it, so scoring walks the full lookup ladder.
fn build_model() -> HashedModel {
    let mut arpa = String::from("\\data\\\n");
    arpa.push_str(&format!("ngram 1={}\n", VOCAB + 3));
    arpa.push_str(&format!("ngram 2={}\n", VOCAB - 1));
    arpa.push_str(&format!("ngram 3={}\n\n", VOCAB - 2));

    arpa.push_str("\\1-grams:\n-3.0\t<unk>\n-2.0\t<s>\t-0.5\n-2.0\t</s>\n");
    for i in 0..VOCAB {
        let prob = -1.0 - (i % 7) as f32 * 0.1;
        arpa.push_str(&format!("{prob}\tw{i}\t-0.4\n"));
    }
    arpa.push_str("\n\\2-grams:\n");
    for i in 0..VOCAB - 1 {
        let prob = -0.5 - (i % 5) as f32 * 0.1;
        arpa.push_str(&format!("{prob}\tw{i} w{}\t-0.2\n", i + 1));
    }
    arpa.push_str("\n\\3-grams:\n");
    for i in 0..VOCAB - 2 {
        let prob = -0.2 - (i % 3) as f32 * 0.1;
        arpa.push_str(&format!("{prob}\tw{i} w{} w{}\n", i + 1, i + 2));
    }
    arpa.push_str("\n\\end\\\n");
    HashedModel::from_arpa_reader(arpa.as_bytes()).unwrap()
}

fn corpus(model: &HashedModel) -> Vec<Vec<WordId>> {
    (0..64)
        .map(|s| {
            (0..30)
                .map(|i| model.vocab().get(&format!("w{}", (s * 13 + i) % VOCAB)))
                .collect()
        })
        .collect()
}

fn bench_scoring(c: &mut Criterion) {
    let model = build_model();
    let sentences = corpus(&model);

    c.bench_function("naive_full_score", |b| {
        b.iter(|| {
            let mut total = 0.0f32;
            for sentence in &sentences {
                let (p, _) = model.score_sequence(&model.begin_sentence_state(), sentence);
                total += p;
            }
            black_box(total)
        })
    });

    c.bench_function("pipelined_16_slots", |b| {
        b.iter(|| {
            let mut total = 0.0f32;
            {
                let mut pipe = Pipeline::new(&model, 16, |_t, ret, _s| total += ret.prob);
                for sentence in &sentences {
                    let mut iter = sentence.iter();
                    if let Some(&first) = iter.next() {
                        pipe.begin_score(&model.begin_sentence_state(), first, 0);
                        for &w in iter {
                            pipe.append_word(w, 0);
                        }
                    }
                }
                pipe.drain();
            }
            black_box(total)
        })
    });
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
