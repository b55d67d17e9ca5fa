//! End-to-end decoding through both managers.

use crate::search::chart::{ChartManager, RuleApplication, RuleToken};
use crate::search::context::DecodingContext;
use crate::search::phrase::PhraseManager;
use crate::search::testutil::{test_config, tiny_model, uniform_model, TablePhraseSource, TableRuleSource};
use crate::search::{Note, Span};
use crate::vocab::WordId;

/// Toy round trip: one rule covering the whole input yields its target.
#[test]
fn trivial_grammar_round_trip() {
    let model = uniform_model(&["x", "y"], -1.0);
    let config = test_config();
    let ctx = DecodingContext::new(&config, &model);
    let x = model.vocab().get("x");
    let y = model.vocab().get("y");

    let mut rules = TableRuleSource::new();
    rules.add(
        0,
        2,
        RuleApplication {
            lhs: 0,
            body: vec![RuleToken::Word(x), RuleToken::Word(y)],
            score: 0.0,
            note: Note(7),
        },
    );

    let mut manager = ChartManager::new(&ctx);
    let best = manager.decode(&rules, 2).unwrap();
    assert_eq!(best.len(), 1);
    assert_eq!(best[0].note, Note(7));
    assert!(best[0].children.is_empty());
    // Uniform unigrams: two words at -1.0 each.
    assert!((best[0].score + 2.0).abs() < 1e-5);
}

/// Same toy setup through the phrase-based decoder.
#[test]
fn trivial_phrase_round_trip() {
    let model = uniform_model(&["x", "y"], -1.0);
    let config = test_config();
    let ctx = DecodingContext::new(&config, &model);
    let x = model.vocab().get("x");
    let y = model.vocab().get("y");

    let mut options = TablePhraseSource::new();
    options.add(0, 2, vec![x, y], 0.0, Note(7));

    let mut manager = PhraseManager::new(&ctx);
    let paths = manager.decode(&options, 2);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].phrases, vec![(Span::new(0, 2), Note(7))]);
}

/// Chart decoding with a real model: the grammar offers two fillers for
/// the non-terminal; boundary rescoring must pick the one that bigrams
/// well with the following terminal, and the emitted scores must match
/// hand-computed language model sums.
#[test]
fn chart_boundary_rescoring_picks_fluent_filler() {
    let model = tiny_model();
    let v = model.vocab();
    let (the, sat, cat) = (v.get("the"), v.get("sat"), v.get("cat"));

    let mut rules = TableRuleSource::new();
    for (word, note) in [(the, 1), (sat, 2)] {
        rules.add(
            0,
            1,
            RuleApplication {
                lhs: 0,
                body: vec![RuleToken::Word(word)],
                score: 0.0,
                note: Note(note),
            },
        );
    }
    rules.add(
        0,
        2,
        RuleApplication {
            lhs: 0,
            body: vec![
                RuleToken::NonTerminal {
                    start: 0,
                    end: 1,
                    label: 0,
                },
                RuleToken::Word(cat),
            ],
            score: 0.0,
            note: Note(3),
        },
    );

    let mut config2 = test_config();
    config2.search.nbest = 2;
    let ctx2 = DecodingContext::new(&config2, &model);
    let mut manager = ChartManager::new(&ctx2);
    let best = manager.decode(&rules, 2).unwrap();

    assert_eq!(best.len(), 2);
    // "the cat": P(the) + P(cat | the) = -1.0 + -0.6.
    assert_eq!(best[0].children[0].note, Note(1));
    assert!((best[0].score + 1.6).abs() < 1e-5);
    // "sat cat": P(sat) + P(cat | sat) = -1.4 + (-1.2 + b(sat)).
    assert_eq!(best[1].children[0].note, Note(2));
    assert!((best[1].score + 2.8).abs() < 1e-5);
}

/// The phrase decoder prefers the reordering whose target side the
/// language model likes, and charges `<s>`/`</s>` transitions.
#[test]
fn phrase_decoder_reorders_for_fluency() {
    let model = tiny_model();
    let config = test_config();
    let ctx = DecodingContext::new(&config, &model);
    let v = model.vocab();
    let (the, cat) = (v.get("the"), v.get("cat"));

    // Source position 0 translates to "cat", position 1 to "the".
    let mut options = TablePhraseSource::new();
    options.add(0, 1, vec![cat], 0.0, Note(10));
    options.add(1, 2, vec![the], 0.0, Note(11));

    let mut manager = PhraseManager::new(&ctx);
    let paths = manager.decode(&options, 2);
    assert!(!paths.is_empty());

    // Reordered target "the cat": <s> the cat </s>.
    assert_eq!(
        paths[0].phrases,
        vec![(Span::new(1, 2), Note(11)), (Span::new(0, 1), Note(10))]
    );
    // P(the|<s>) + P(cat|<s> the) + P(</s>|the cat backoff chain)
    // = -0.5 + -0.3 + (-1.3 - 0.3 - 0.25).
    assert!((paths[0].score + 2.65).abs() < 1e-4);
}

/// Pools are reset between sentences: decoding sentence 2 after sentence
/// 1 equals decoding sentence 2 alone.
#[test]
fn pools_do_not_leak_across_sentences() {
    let model = uniform_model(&["x", "y", "z"], -1.0);
    let config = test_config();
    let ctx = DecodingContext::new(&config, &model);
    let (x, y, z) = (
        model.vocab().get("x"),
        model.vocab().get("y"),
        model.vocab().get("z"),
    );

    let mut g1 = TableRuleSource::new();
    g1.add(
        0,
        1,
        RuleApplication {
            lhs: 0,
            body: vec![RuleToken::Word(x)],
            score: 0.0,
            note: Note(1),
        },
    );
    g1.add(
        0,
        2,
        RuleApplication {
            lhs: 0,
            body: vec![
                RuleToken::NonTerminal {
                    start: 0,
                    end: 1,
                    label: 0,
                },
                RuleToken::Word(y),
            ],
            score: 0.0,
            note: Note(2),
        },
    );

    let mut g2 = TableRuleSource::new();
    g2.add(
        0,
        1,
        RuleApplication {
            lhs: 0,
            body: vec![RuleToken::Word(z)],
            score: -0.25,
            note: Note(9),
        },
    );

    let mut manager = ChartManager::new(&ctx);
    let first = manager.decode(&g1, 2).unwrap();
    let second = manager.decode(&g2, 1).unwrap();

    let mut fresh_manager = ChartManager::new(&ctx);
    let fresh = fresh_manager.decode(&g2, 1).unwrap();

    assert_eq!(second, fresh);
    assert_eq!(first[0].note, Note(2));

    // Phrase-based managers reset the same way.
    let mut p1 = TablePhraseSource::new();
    p1.add(0, 1, vec![x], 0.0, Note(1));
    p1.add(1, 2, vec![y], 0.0, Note(2));
    let mut p2 = TablePhraseSource::new();
    p2.add(0, 1, vec![z], 0.0, Note(3));

    let mut pm = PhraseManager::new(&ctx);
    let _ = pm.decode(&p1, 2);
    let reused = pm.decode(&p2, 1);
    let mut pm_fresh = PhraseManager::new(&ctx);
    let fresh = pm_fresh.decode(&p2, 1);
    assert_eq!(reused.len(), fresh.len());
    assert_eq!(reused[0].phrases, fresh[0].phrases);
    assert!((reused[0].score - fresh[0].score).abs() < 1e-6);
}

/// A span with zero translation options produces empty cells; rules that
/// depend on it drop out, and decoding degrades gracefully instead of
/// crashing.
#[test]
fn empty_span_is_tolerated() {
    let model = uniform_model(&["x"], -1.0);
    let config = test_config();
    let ctx = DecodingContext::new(&config, &model);
    let x = model.vocab().get("x");

    // The root rule needs a (0,1) cell that no rule fills.
    let mut rules = TableRuleSource::new();
    rules.add(
        0,
        2,
        RuleApplication {
            lhs: 0,
            body: vec![
                RuleToken::NonTerminal {
                    start: 0,
                    end: 1,
                    label: 0,
                },
                RuleToken::Word(x),
            ],
            score: 0.0,
            note: Note(1),
        },
    );

    let mut manager = ChartManager::new(&ctx);
    let best = manager.decode(&rules, 2).unwrap();
    assert!(best.is_empty());

    // Phrase side: position 1 has no options, so coverage can never
    // complete; no paths, no crash.
    let mut options = TablePhraseSource::new();
    options.add(0, 1, vec![x], 0.0, Note(1));
    let mut pm = PhraseManager::new(&ctx);
    assert!(pm.decode(&options, 2).is_empty());
}

/// Empty input decodes to nothing on both managers.
#[test]
fn empty_input() {
    let model = uniform_model(&[], -1.0);
    let config = test_config();
    let ctx = DecodingContext::new(&config, &model);
    assert!(ChartManager::new(&ctx)
        .decode(&TableRuleSource::new(), 0)
        .unwrap()
        .is_empty());
    assert!(PhraseManager::new(&ctx)
        .decode(&TablePhraseSource::new(), 0)
        .is_empty());
}

/// Arity three is a construction error, not a silent truncation.
#[test]
fn arity_three_is_rejected() {
    let model = uniform_model(&[], -1.0);
    let config = test_config();
    let ctx = DecodingContext::new(&config, &model);

    let nt = |start: usize, end: usize| RuleToken::NonTerminal {
        start,
        end,
        label: 0,
    };
    let mut rules = TableRuleSource::new();
    // Fill the child cells so the arity check is what trips.
    let w: WordId = 0;
    for i in 0..3 {
        rules.add(
            i,
            i + 1,
            RuleApplication {
                lhs: 0,
                body: vec![RuleToken::Word(w)],
                score: 0.0,
                note: Note(i),
            },
        );
    }
    rules.add(
        0,
        3,
        RuleApplication {
            lhs: 0,
            body: vec![nt(0, 1), nt(1, 2), nt(2, 3)],
            score: 0.0,
            note: Note(9),
        },
    );

    let err = ChartManager::new(&ctx).decode(&rules, 3).unwrap_err();
    assert!(err.to_string().contains("arity 3"));
}

/// N-best from the root vertex is distinct-state and sorted.
#[test]
fn nbest_extraction() {
    let model = tiny_model();
    let mut config = test_config();
    config.search.nbest = 5;
    let ctx = DecodingContext::new(&config, &model);
    let v = model.vocab();

    let mut rules = TableRuleSource::new();
    for (w, note) in [("the", 1), ("cat", 2), ("sat", 3)] {
        rules.add(
            0,
            1,
            RuleApplication {
                lhs: 0,
                body: vec![RuleToken::Word(v.get(w))],
                score: 0.0,
                note: Note(note),
            },
        );
    }

    let best = ChartManager::new(&ctx).decode(&rules, 1).unwrap();
    assert_eq!(best.len(), 3);
    assert!(best[0].score >= best[1].score && best[1].score >= best[2].score);
    assert_eq!(best[0].note, Note(1)); // P(the) = -1.0 beats cat and sat
}
