//! Demo workflows runnable by name from the CLI and the interactive UI.

use serde_json::{json, Value};

use agenticflow_core::error::Result;
use agenticflow_core::types::DataMap;
use agenticflow_engine::{Context, FnBehavior, WorkflowGraph};

/// Names accepted by [`by_name`].
pub const NAMES: [&str; 2] = ["sample", "analysis"];

const DEFAULT_QUESTION: &str = "How does AgenticFlow compare to LangChain?";

const DEFAULT_TEXT: &str = "AgenticFlow is a strategic AI agent framework capable of executing \
complex workflows using both symbolic and learned planning techniques. It enables the development \
of flexible, extensible, and trainable agent-based applications with robust planning and reasoning \
capabilities.";

pub fn by_name(name: &str) -> Option<Result<WorkflowGraph>> {
    match name {
        "sample" => Some(qa_pipeline()),
        "analysis" => Some(text_analysis()),
        _ => None,
    }
}

fn single(key: &str, value: Value) -> DataMap {
    let mut out = DataMap::new();
    out.insert(key.to_string(), value);
    out
}

fn text<'a>(inputs: &'a DataMap, key: &str) -> &'a str {
    inputs.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Five-step question answering chain:
/// `input -> process -> search -> generate -> output`.
pub fn qa_pipeline() -> Result<WorkflowGraph> {
    let mut g = WorkflowGraph::new("Sample Workflow")
        .with_description("A sample workflow demonstrating AgenticFlow capabilities");

    g.add_context(
        Context::new("input", "User Input")
            .with_description("Collect input from the user")
            .with_inputs(["user_input"])
            .with_outputs(["user_input"])
            .with_prompt("Please provide your question or request: {user_input}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let question = match text(&inputs, "user_input") {
                "" => DEFAULT_QUESTION,
                q => q,
            };
            Ok(single("user_input", json!(question)))
        }),
    )?;

    g.add_context(
        Context::new("process", "Process Input")
            .with_description("Process the user input")
            .with_inputs(["user_input"])
            .with_outputs(["processed_input"])
            .with_prompt("Process the following user input: {user_input}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let processed = text(&inputs, "user_input")
                .trim()
                .trim_end_matches('?')
                .to_lowercase();
            Ok(single("processed_input", json!(processed)))
        }),
    )?;

    g.add_context(
        Context::new("search", "Search Information")
            .with_description("Search for information related to the user input")
            .with_inputs(["processed_input"])
            .with_outputs(["search_results"])
            .with_prompt("Search for information about: {processed_input}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let topic = text(&inputs, "processed_input");
            let results = json!([
                format!("Background on '{}'", topic),
                "AgenticFlow focuses on workflow execution with symbolic and learned planning.",
                "LangChain focuses on composing LLM components and integrations.",
                "AgenticFlow strategies can be steered by a trained selector.",
            ]);
            Ok(single("search_results", results))
        }),
    )?;

    g.add_context(
        Context::new("generate", "Generate Response")
            .with_description("Generate a response based on the search results")
            .with_inputs(["user_input", "processed_input", "search_results"])
            .with_outputs(["generated_response"])
            .with_prompt(
                "Generate a response based on the following information:\n\n\
                 User input: {user_input}\nProcessed input: {processed_input}\n\
                 Search results: {search_results}",
            ),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let findings: Vec<&str> = inputs
                .get("search_results")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let response = format!(
                "\n  Based on your question \"{}\":\n\n{}\n",
                text(&inputs, "user_input"),
                findings
                    .iter()
                    .map(|f| format!("  - {}", f))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            Ok(single("generated_response", json!(response)))
        }),
    )?;

    g.add_context(
        Context::new("output", "Format Output")
            .with_description("Format the response for the user")
            .with_inputs(["generated_response"])
            .with_outputs(["formatted_response"])
            .with_prompt("Format the following response for the user:\n\n{generated_response}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let formatted = text(&inputs, "generated_response").trim().to_string();
            Ok(single("formatted_response", json!(formatted)))
        }),
    )?;

    g.connect("input", "process")?;
    g.connect("process", "search")?;
    g.connect("search", "generate")?;
    g.connect("generate", "output")?;
    Ok(g)
}

/// Fan-out/fan-in text analysis: `text_input` feeds three analyses that
/// all feed `insights`.
pub fn text_analysis() -> Result<WorkflowGraph> {
    let mut g = WorkflowGraph::new("Text Analysis Workflow")
        .with_description("A workflow that analyzes text and provides insights");

    g.add_context(
        Context::new("text_input", "Text Input")
            .with_description("Get text input for analysis")
            .with_inputs(["text_input"])
            .with_outputs(["text_input"])
            .with_prompt("Please provide text for analysis: {text_input}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let body = match text(&inputs, "text_input") {
                "" => DEFAULT_TEXT,
                t => t,
            };
            Ok(single("text_input", json!(body)))
        }),
    )?;

    g.add_context(
        Context::new("sentiment_analysis", "Sentiment Analysis")
            .with_description("Analyze the sentiment of the text")
            .with_inputs(["text_input"])
            .with_outputs(["sentiment"])
            .with_prompt("Analyze the sentiment of the following text: {text_input}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            const POSITIVE: [&str; 5] = ["flexible", "extensible", "robust", "trainable", "strategic"];
            const NEGATIVE: [&str; 4] = ["slow", "broken", "fragile", "complex"];
            let body = text(&inputs, "text_input").to_lowercase();
            let pos: Vec<&str> = POSITIVE.into_iter().filter(|w| body.contains(w)).collect();
            let neg = NEGATIVE.iter().filter(|w| body.contains(*w)).count();
            let label = match pos.len().cmp(&neg) {
                std::cmp::Ordering::Greater => "Positive",
                std::cmp::Ordering::Less => "Negative",
                std::cmp::Ordering::Equal => "Neutral",
            };
            let sentiment = if pos.is_empty() {
                label.to_string()
            } else {
                format!("{} - mentions {}", label, pos.join(", "))
            };
            Ok(single("sentiment", json!(sentiment)))
        }),
    )?;

    g.add_context(
        Context::new("entity_extraction", "Entity Extraction")
            .with_description("Extract entities from the text")
            .with_inputs(["text_input"])
            .with_outputs(["entities"])
            .with_prompt("Extract entities from the following text: {text_input}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let mut seen = Vec::new();
            let entities: Vec<Value> = text(&inputs, "text_input")
                .split_whitespace()
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
                .filter(|w| w.len() > 1 && w.chars().next().is_some_and(char::is_uppercase))
                .filter(|w| {
                    let fresh = !seen.contains(w);
                    if fresh {
                        seen.push(*w);
                    }
                    fresh
                })
                .map(|w| {
                    let kind = if w.chars().skip(1).any(char::is_uppercase) {
                        "FRAMEWORK"
                    } else {
                        "TERM"
                    };
                    json!({ "type": kind, "text": w })
                })
                .collect();
            Ok(single("entities", Value::Array(entities)))
        }),
    )?;

    g.add_context(
        Context::new("summary", "Text Summary")
            .with_description("Generate a summary of the text")
            .with_inputs(["text_input"])
            .with_outputs(["summary"])
            .with_prompt("Generate a summary of the following text: {text_input}"),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let body = text(&inputs, "text_input");
            let first = body.split_terminator('.').next().unwrap_or(body).trim();
            Ok(single("summary", json!(format!("{}.", first))))
        }),
    )?;

    g.add_context(
        Context::new("insights", "Generate Insights")
            .with_description("Generate insights based on all analyses")
            .with_inputs(["text_input", "sentiment", "entities", "summary"])
            .with_outputs(["insights"])
            .with_prompt(
                "Generate insights based on the following analyses:\n\n\
                 Text: {text_input}\nSentiment: {sentiment}\nEntities: {entities}\nSummary: {summary}",
            ),
        FnBehavior::new(|_: &Context, inputs: DataMap| {
            let entities = inputs
                .get("entities")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let insights = format!(
                "Key Insights:\n  1. Sentiment: {}\n  2. {} named entities found\n  3. Gist: {}",
                text(&inputs, "sentiment"),
                entities,
                text(&inputs, "summary"),
            );
            Ok(single("insights", json!(insights)))
        }),
    )?;

    for analysis in ["sentiment_analysis", "entity_extraction", "summary"] {
        g.connect("text_input", analysis)?;
    }
    for analysis in ["sentiment_analysis", "entity_extraction", "summary"] {
        g.connect(analysis, "insights")?;
    }
    Ok(g)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenticflow_core::config::AppConfig;
    use agenticflow_core::types::StrategyId;
    use agenticflow_engine::{ActionModel, ExecutionRequest};

    #[tokio::test]
    async fn test_qa_pipeline_runs_end_to_end() {
        let graph = qa_pipeline().unwrap();
        let model = ActionModel::new(AppConfig::default());
        for strategy in [StrategyId::Dfs, StrategyId::Bfs, StrategyId::Mcts] {
            let result = model
                .execute(&graph, ExecutionRequest::new("").with_strategy(strategy))
                .await
                .unwrap();
            assert_eq!(
                result.path,
                vec!["input", "process", "search", "generate", "output"]
            );
            let formatted = result.outputs["formatted_response"].as_str().unwrap();
            assert!(formatted.contains(DEFAULT_QUESTION));
        }
    }

    #[tokio::test]
    async fn test_text_analysis_fans_in() {
        let graph = text_analysis().unwrap();
        let model = ActionModel::new(AppConfig::default());
        let result = model
            .execute(
                &graph,
                ExecutionRequest::new("")
                    .with_strategy(StrategyId::Bfs)
                    .with_input("text_input", json!("Rust is robust. Tokio is fast.")),
            )
            .await
            .unwrap();
        assert_eq!(
            result.path,
            vec!["text_input", "sentiment_analysis", "entity_extraction", "summary", "insights"]
        );
        assert_eq!(result.outputs["summary"], json!("Rust is robust."));
        assert_eq!(result.outputs["entities"].as_array().unwrap().len(), 2);
        assert!(result.outputs["sentiment"].as_str().unwrap().starts_with("Positive"));
    }

    #[test]
    fn test_names_resolve() {
        for name in NAMES {
            assert!(by_name(name).unwrap().is_ok());
        }
        assert!(by_name("nope").is_none());
    }
}
