//! The shipped prompt templates render with exactly the variables the steps
//! supply.

use std::path::PathBuf;

use llm::FilePromptLoader;
use pipeline::{PromptTemplates, TemplateName, TemplateVars};

fn loader() -> FilePromptLoader {
    FilePromptLoader::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../prompts"))
}

fn render(name: &str, vars: &TemplateVars) -> String {
    let name = TemplateName::new(name).expect("non-blank");
    loader().render(&name, vars).expect("template renders")
}

#[test]
fn test_extraction_prompt() {
    let prompt = render("01-extraction", &TemplateVars::new().with("notes", "Met Jane."));
    assert!(prompt.contains("Met Jane."));
    assert!(prompt.contains("\"affiant_name\": \"Jane Doe\""));
}

#[test]
fn test_writing_prompt() {
    let prompt = render("02-writing", &TemplateVars::new().with("components", "{\"a\": 1}"));
    assert!(prompt.contains("{\"a\": 1}"));
}

#[test]
fn test_evaluation_prompt() {
    let vars = TemplateVars::new()
        .with("components", "{}")
        .with("draft", "1. I saw it.")
        .with("case_specifics", "None provided");
    let prompt = render("03-evaluation", &vars);
    assert!(prompt.contains("1. I saw it."));
    assert!(prompt.contains("\"needs_revision\": true"));
}

#[test]
fn test_revision_prompt() {
    let vars = TemplateVars::new()
        .with("components", "{}")
        .with("draft", "1. I saw it.")
        .with("evaluation", "{\"needs_revision\": true}")
        .with("case_specifics", "Witness is a minor.");
    let prompt = render("04-revision", &vars);
    assert!(prompt.contains("Witness is a minor."));
}
