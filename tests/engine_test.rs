//! Integration tests for Qwen3Generator.

mod common;

use implicit_tokens::config::SamplingConfig;
use implicit_tokens::data::TextGenerator;
use implicit_tokens::tokenizer::TextTokenizer;
use implicit_tokens::Qwen3Generator;

use common::{tiny_model, WhitespaceTokenizer};

fn greedy(max_tokens: usize) -> SamplingConfig {
    SamplingConfig {
        temperature: 0.0,
        max_tokens,
        ..SamplingConfig::default()
    }
}

#[test]
fn test_greedy_completions_are_identical() {
    let (model, _) = tiny_model();
    let mut generator = Qwen3Generator::new(model, WhitespaceTokenizer::new(), Some(0));

    let outputs = generator
        .generate("<bos> two plus two <assistant>", 2, &greedy(6))
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_seeded_generators_agree() {
    let (model, _) = tiny_model();
    let sampling = SamplingConfig {
        temperature: 1.0,
        max_tokens: 8,
        ..SamplingConfig::default()
    };
    let mut first = Qwen3Generator::new(model.clone(), WhitespaceTokenizer::new(), Some(11));
    let mut second = Qwen3Generator::new(model, WhitespaceTokenizer::new(), Some(11));

    let a = first.generate("<user> count <assistant>", 3, &sampling).unwrap();
    let b = second.generate("<user> count <assistant>", 3, &sampling).unwrap();

    assert_eq!(a, b);
}

#[test]
fn test_zero_max_tokens_generates_nothing() {
    let (model, _) = tiny_model();
    let mut generator = Qwen3Generator::new(model, WhitespaceTokenizer::new(), Some(0));
    let prompt = generator.tokenizer().encode("<bos> hello").unwrap();

    assert_eq!(generator.complete(&prompt, &greedy(0)).unwrap(), "");
}

#[test]
fn test_empty_prompt_rejected() {
    let (model, _) = tiny_model();
    let mut generator = Qwen3Generator::new(model, WhitespaceTokenizer::new(), None);

    assert!(generator.complete(&[], &greedy(4)).is_err());
}
