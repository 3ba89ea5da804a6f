//! Chain-of-thought trajectory collection.
//!
//! A reasoning model is prompted with each problem; completions that carry
//! a well-formed reasoning region and a non-empty answer become
//! [`CotRecord`]s, the rest are discarded and re-requested.

use tracing::{debug, info, warn};

use super::dataset::{CotRecord, ProblemRecord};
use super::prompt::PromptTemplate;
use crate::config::{GenerationConfig, PromptConfig, SamplingConfig};
use crate::error::{Error, Result};

/// Something that samples completions for a prompt.
pub trait TextGenerator {
    /// Samples `n` independent completions (without the prompt).
    fn generate(&mut self, prompt: &str, n: usize, sampling: &SamplingConfig) -> Result<Vec<String>>;
}

/// True when the completion contains both reasoning tags.
pub fn validate_output(output: &str, tags: &PromptConfig) -> bool {
    output.contains(tags.think_open.as_str()) && output.contains(tags.think_close.as_str())
}

/// Splits a completion into (reasoning, answer).
///
/// The answer is the text inside the answer tags when both are present,
/// otherwise everything after the reasoning close tag. Both parts are
/// trimmed and must be non-empty.
pub fn parse_generation(output: &str, tags: &PromptConfig) -> Result<(String, String)> {
    let malformed = |why: &str| Error::MalformedGenerationOutput(why.to_string());

    let logic = output
        .split(tags.think_open.as_str())
        .nth(1)
        .and_then(|s| s.split(tags.think_close.as_str()).next())
        .ok_or_else(|| malformed("missing reasoning open tag"))?
        .trim();

    let has_answer_tags = output.contains(tags.answer_open.as_str())
        && output.contains(tags.answer_close.as_str());
    let answer = if has_answer_tags {
        output
            .split(tags.answer_open.as_str())
            .nth(1)
            .and_then(|s| s.split(tags.answer_close.as_str()).next())
    } else {
        output.split(tags.think_close.as_str()).nth(1)
    };
    let answer = answer.ok_or_else(|| malformed("missing answer"))?.trim();

    if logic.is_empty() {
        return Err(malformed("empty reasoning"));
    }
    if answer.is_empty() {
        return Err(malformed("empty answer"));
    }
    Ok((logic.to_string(), answer.to_string()))
}

/// Counters reported after a collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub problems: usize,
    pub completions: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Generator calls that returned an error.
    pub failed_rounds: usize,
    /// Problems that ended with fewer samples than requested.
    pub incomplete_problems: usize,
}

/// Collects reasoning trajectories with retries.
pub struct TrajectoryCollector<G> {
    generator: G,
    template: PromptTemplate,
    config: GenerationConfig,
}

impl<G: TextGenerator> TrajectoryCollector<G> {
    pub fn new(generator: G, template: PromptTemplate, config: GenerationConfig) -> Self {
        Self {
            generator,
            template,
            config,
        }
    }

    pub fn into_generator(self) -> G {
        self.generator
    }

    /// Runs generation over `problems[split_start..split_end]`.
    pub fn collect(&mut self, problems: &[ProblemRecord]) -> Result<(Vec<CotRecord>, GenerationStats)> {
        let end = self
            .config
            .split_end
            .unwrap_or(problems.len())
            .min(problems.len());
        let start = self.config.split_start;
        if start > end {
            return Err(Error::Config(format!(
                "split start {start} is past split end {end}"
            )));
        }

        let mut stats = GenerationStats::default();
        let mut records = Vec::new();
        for (offset, problem) in problems[start..end].iter().enumerate() {
            let accepted = self.collect_one(problem, &mut stats);
            if accepted.len() < self.config.samples_per_problem {
                stats.incomplete_problems += 1;
                warn!(
                    "problem {}: {} of {} samples after {} rounds",
                    start + offset,
                    accepted.len(),
                    self.config.samples_per_problem,
                    self.config.max_retries
                );
            }
            records.extend(accepted);
            stats.problems += 1;
            if stats.problems % 10 == 0 {
                info!("processed {}/{} problems", stats.problems, end - start);
            }
        }

        info!(
            "generation finished: {} records from {} problems ({} rejected completions)",
            records.len(),
            stats.problems,
            stats.rejected
        );
        Ok((records, stats))
    }

    /// Generator errors count as failed rounds; they never abort the run.
    fn collect_one(&mut self, problem: &ProblemRecord, stats: &mut GenerationStats) -> Vec<CotRecord> {
        let wanted = self.config.samples_per_problem;
        let prompt = self.template.generation_prompt(&problem.problem);
        let tags = self.template.config().clone();

        let mut accepted = Vec::with_capacity(wanted);
        let mut rounds = 0;
        while accepted.len() < wanted && rounds < self.config.max_retries {
            rounds += 1;
            let outputs = match self.generator.generate(
                &prompt,
                wanted - accepted.len(),
                &self.config.sampling,
            ) {
                Ok(outputs) => outputs,
                Err(e) => {
                    stats.failed_rounds += 1;
                    warn!("round {rounds}: generation failed: {e}");
                    continue;
                }
            };
            stats.completions += outputs.len();

            for output in outputs {
                let output = output.trim();
                let parsed = if validate_output(output, &tags) {
                    parse_generation(output, &tags)
                } else {
                    Err(Error::MalformedGenerationOutput(
                        "reasoning tags missing".to_string(),
                    ))
                };
                match parsed {
                    Ok((logic, answer)) => {
                        accepted.push(CotRecord {
                            problem: problem.problem.clone(),
                            solution: problem.solution.clone(),
                            logic_trajectory: logic,
                            answer,
                        });
                        stats.accepted += 1;
                        if accepted.len() >= wanted {
                            break;
                        }
                    }
                    Err(e) => {
                        stats.rejected += 1;
                        debug!("round {rounds}: discarding completion: {e}");
                    }
                }
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> PromptConfig {
        PromptConfig::default()
    }

    #[test]
    fn test_parse_with_answer_tags() {
        let (logic, answer) =
            parse_generation("<think> add them </think>\n<answer> 4 </answer>", &tags()).unwrap();
        assert_eq!(logic, "add them");
        assert_eq!(answer, "4");
    }

    #[test]
    fn test_parse_without_answer_tags() {
        let (_, answer) = parse_generation("<think>x</think> The answer is 4.", &tags()).unwrap();
        assert_eq!(answer, "The answer is 4.");
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(parse_generation("<think>  </think>4", &tags()).is_err());
        assert!(parse_generation("<think>x</think>   ", &tags()).is_err());
        assert!(parse_generation("no tags at all", &tags()).is_err());
    }

    #[test]
    fn test_validate_output() {
        assert!(validate_output("<think>a</think>b", &tags()));
        assert!(!validate_output("<think>a", &tags()));
    }

    /// Replays canned completions, one batch per call. A `None` round fails.
    struct Scripted {
        rounds: Vec<Option<Vec<&'static str>>>,
        calls: usize,
    }

    impl Scripted {
        fn new(rounds: Vec<Vec<&'static str>>) -> Self {
            Self {
                rounds: rounds.into_iter().map(Some).collect(),
                calls: 0,
            }
        }
    }

    impl TextGenerator for Scripted {
        fn generate(&mut self, _: &str, n: usize, _: &SamplingConfig) -> Result<Vec<String>> {
            let round = self.rounds.get(self.calls).cloned().unwrap_or(Some(Vec::new()));
            self.calls += 1;
            match round {
                Some(round) => Ok(round.into_iter().take(n).map(String::from).collect()),
                None => Err(Error::Tokenization("prompt could not be encoded".into())),
            }
        }
    }

    fn problems(n: usize) -> Vec<ProblemRecord> {
        (0..n)
            .map(|i| ProblemRecord {
                problem: format!("q{i}"),
                solution: format!("s{i}"),
            })
            .collect()
    }

    #[test]
    fn test_collector_retries_until_enough() {
        let generator = Scripted::new(vec![
            vec!["garbage", "<think>a</think>1"],
            vec!["<think>b</think><answer>2</answer>"],
        ]);
        let config = GenerationConfig {
            samples_per_problem: 2,
            ..GenerationConfig::default()
        };
        let mut collector = TrajectoryCollector::new(generator, PromptTemplate::default(), config);
        let problems = vec![ProblemRecord {
            problem: "q".into(),
            solution: "s".into(),
        }];

        let (records, stats) = collector.collect(&problems).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].answer, "2");
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.incomplete_problems, 0);
        assert_eq!(collector.into_generator().calls, 2);
    }

    #[test]
    fn test_collector_gives_up_after_max_retries() {
        let generator = Scripted::new(vec![vec!["bad"], vec!["bad"], vec!["bad"], vec!["<think>a</think>1"]]);
        let mut collector =
            TrajectoryCollector::new(generator, PromptTemplate::default(), GenerationConfig::default());
        let problems = vec![ProblemRecord {
            problem: "q".into(),
            solution: "s".into(),
        }];

        let (records, stats) = collector.collect(&problems).unwrap();

        assert!(records.is_empty());
        assert_eq!(stats.incomplete_problems, 1);
    }

    #[test]
    fn test_generator_error_skips_only_that_round() {
        // Fails on the first problem's only round, then serves the other two.
        let generator = Scripted {
            rounds: vec![None, Some(vec!["<think>a</think>1"]), Some(vec!["<think>b</think>2"])],
            calls: 0,
        };
        let config = GenerationConfig {
            max_retries: 1,
            ..GenerationConfig::default()
        };
        let mut collector = TrajectoryCollector::new(generator, PromptTemplate::default(), config);

        let (records, stats) = collector.collect(&problems(3)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].problem, "q1");
        assert_eq!(records[1].problem, "q2");
        assert_eq!(stats.failed_rounds, 1);
        assert_eq!(stats.incomplete_problems, 1);
        assert_eq!(stats.problems, 3);
    }

    #[test]
    fn test_generator_error_is_retried() {
        let generator = Scripted {
            rounds: vec![None, Some(vec!["<think>a</think>1"])],
            calls: 0,
        };
        let mut collector =
            TrajectoryCollector::new(generator, PromptTemplate::default(), GenerationConfig::default());

        let (records, stats) = collector.collect(&problems(1)).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(stats.failed_rounds, 1);
        assert_eq!(stats.incomplete_problems, 0);
    }
}
