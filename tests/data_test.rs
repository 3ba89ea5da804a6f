//! Integration tests for the label-masking pipeline.

mod common;

use implicit_tokens::aligner::{RegionSpan, SpanLocator};
use implicit_tokens::data::{
    build_labels, collate, label_records, prepare_example, CotRecord, Dataset, PreparedExample,
    PromptTemplate,
};
use implicit_tokens::tokenizer::TextTokenizer;
use implicit_tokens::IGNORE_INDEX;

use common::{prompt_config, test_device, WhitespaceTokenizer, EOS, THINK_CLOSE, THINK_OPEN};

// <bos> + 16 system tokens + <user> + 4 problem words + <assistant>
// + <think> + 2 logic words + </think> + <answer>
const PROMPT_TOKENS: usize = 28;

fn record(logic: &str) -> CotRecord {
    CotRecord {
        problem: "what is two plus".to_string(),
        solution: "4".to_string(),
        logic_trajectory: logic.to_string(),
        answer: "four".to_string(),
    }
}

#[test]
fn test_prompt_tokens_are_masked() {
    let tokenizer = WhitespaceTokenizer::new();
    let template = PromptTemplate::new(prompt_config());

    let prepared = prepare_example(&record("add them"), &template, &tokenizer).unwrap();
    assert_eq!(prepared.prompt_length, PROMPT_TOKENS);
    assert!(prepared.full_text.ends_with("<answer>four</answer>"));

    let labeled = build_labels(&prepared, &tokenizer).unwrap();
    assert_eq!(labeled.len(), PROMPT_TOKENS + 2);
    assert!(labeled.labels[..PROMPT_TOKENS].iter().all(|&l| l == IGNORE_INDEX));
    let answer: Vec<i64> = labeled.input_ids[PROMPT_TOKENS..].iter().map(|&id| id as i64).collect();
    assert_eq!(labeled.labels[PROMPT_TOKENS..], answer[..]);
    assert_eq!(tokenizer.decode(&labeled.input_ids[PROMPT_TOKENS..]).unwrap(), "four </answer>");
}

#[test]
fn test_eos_text_is_stripped_from_prompt() {
    let tokenizer = WhitespaceTokenizer::new();
    let template = PromptTemplate::new(prompt_config());

    let prepared = prepare_example(&record("add <eos> them"), &template, &tokenizer).unwrap();

    assert_eq!(prepared.prompt_length, PROMPT_TOKENS);
    assert!(!prepared.full_text.contains("<eos>"));
    let labeled = build_labels(&prepared, &tokenizer).unwrap();
    assert!(!labeled.input_ids.contains(&EOS));
}

#[test]
fn test_prompt_length_is_clamped() {
    let tokenizer = WhitespaceTokenizer::new();
    let prepared = PreparedExample {
        full_text: "a b".to_string(),
        prompt_length: 10,
    };

    let labeled = build_labels(&prepared, &tokenizer).unwrap();

    assert_eq!(labeled.len(), 2);
    assert_eq!(labeled.labels, vec![IGNORE_INDEX, IGNORE_INDEX]);
}

#[test]
fn test_locator_finds_reasoning_region_after_system_tags() {
    let tokenizer = WhitespaceTokenizer::new();
    let template = PromptTemplate::new(prompt_config());
    assert_eq!(template.open_tags_in_prefix(), 2);

    let examples = label_records(&[record("add them")], &template, &tokenizer);
    let locator = SpanLocator::new(THINK_OPEN, THINK_CLOSE, template.open_tags_in_prefix());
    let span = locator.locate(&examples[0].input_ids).unwrap();

    // <think> sits right after <assistant> at position 23.
    assert_eq!(span, Some(RegionSpan { start: 23, end: 26 }));
    assert_eq!(
        tokenizer
            .decode(&examples[0].input_ids[24..26])
            .unwrap(),
        "add them"
    );
}

#[test]
fn test_collate_labeled_records() {
    let tokenizer = WhitespaceTokenizer::new();
    let template = PromptTemplate::new(prompt_config());
    let records = vec![record("add them"), record("add both numbers together")];

    let examples = label_records(&records, &template, &tokenizer);
    assert_eq!(examples.len(), 2);
    let batch = collate(&examples, tokenizer.pad_token_id(), &test_device()).unwrap();

    assert_eq!(batch.batch_size(), 2);
    assert_eq!(batch.input_ids.dims(), &[2, PROMPT_TOKENS + 4]);
    let mask = batch.attention_mask.to_vec2::<u32>().unwrap();
    assert_eq!(mask[0].iter().sum::<u32>() as usize, PROMPT_TOKENS + 2);
    assert_eq!(mask[1].iter().sum::<u32>() as usize, PROMPT_TOKENS + 4);
    let labels = batch.labels.unwrap().to_vec2::<i64>().unwrap();
    assert_eq!(labels[0][PROMPT_TOKENS + 2..], [IGNORE_INDEX, IGNORE_INDEX]);
}

#[test]
fn test_records_survive_dataset_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let records = vec![record("add them"), record("count up")];

    let dataset = Dataset::from_records(&records).unwrap();
    dataset.save_to_disk(dir.path()).unwrap();
    let loaded = Dataset::load_from_disk(dir.path()).unwrap();

    assert!(Dataset::is_dataset_dir(dir.path()));
    assert_eq!(loaded.records::<CotRecord>().unwrap(), records);
}
