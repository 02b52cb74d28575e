//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nodes::{IterationController, PipelineSteps, StepContext};
use pipeline::{
    GenerationError, GenerationRequest, GenerationSettings, JobInput, JobName, PipelineConfig,
    PipelineState, ProgressReporter, ProgressUpdate, PromptTemplates, TemplateError,
    TemplateName, TemplateVars, TextGenerator,
};

pub const EXTRACTION: &str = "```json\n{\"affiant_name\": \"Jane Doe\", \"incident_date\": \"MISSING\", \"events\": [\"arrived\", \"left\"]}\n```";
pub const DRAFT: &str = "I, Jane Doe, state the following.";
pub const APPROVE: &str = r#"{"needs_revision": false}"#;
pub const REJECT: &str = r#"{"needs_revision": true, "unsupported_statements": ["He was present."]}"#;

/// Variables echoed into every rendered prompt, in this order.
const ECHOED_VARS: [&str; 5] = ["notes", "components", "draft", "evaluation", "case_specifics"];

enum Reply {
    Text(String),
    Fail(u16),
}

/// Answers each template with a queue of scripted replies.
///
/// The last reply for a template repeats once the queue is down to one entry.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extraction, draft, and an evaluator that always asks for revision.
    pub fn standard() -> Self {
        Self::new()
            .reply("01-extraction", EXTRACTION)
            .reply("02-writing", DRAFT)
            .reply("03-evaluation", REJECT)
            .reply("04-revision", "Revised draft")
    }

    pub fn reply(self, template: &str, text: impl Into<String>) -> Self {
        self.push(template, Reply::Text(text.into()));
        self
    }

    pub fn fail(self, template: &str, status: u16) -> Self {
        self.push(template, Reply::Fail(status));
        self
    }

    fn push(&self, template: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(template.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Number of generation calls made for `template`.
    pub fn calls(&self, template: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.lines().next() == Some(template))
            .count()
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let template = request.prompt.lines().next().unwrap_or_default().to_string();
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(&template);
        let reply = match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().map(|r| match r {
                Reply::Text(t) => Reply::Text(t.clone()),
                Reply::Fail(s) => Reply::Fail(*s),
            }),
            None => None,
        };
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(status)) => Err(GenerationError::Api {
                status,
                message: format!("scripted failure for {template}"),
            }),
            None => Err(GenerationError::InvalidResponse(format!(
                "no reply scripted for {template}"
            ))),
        }
    }
}

/// Renders a template as its name on the first line followed by the
/// supplied variables, one `name=value` per line.
pub struct EchoTemplates;

impl PromptTemplates for EchoTemplates {
    fn render(&self, name: &TemplateName, vars: &TemplateVars) -> Result<String, TemplateError> {
        let mut prompt = name.to_string();
        for var in ECHOED_VARS {
            if let Some(value) = vars.get(var) {
                prompt.push('\n');
                prompt.push_str(var);
                prompt.push('=');
                prompt.push_str(value);
            }
        }
        Ok(prompt)
    }
}

/// Has no templates at all.
pub struct NoTemplates;

impl PromptTemplates for NoTemplates {
    fn render(&self, name: &TemplateName, _vars: &TemplateVars) -> Result<String, TemplateError> {
        Err(TemplateError::NotFound {
            name: name.to_string(),
            path: format!("prompts/{name}.md"),
        })
    }
}

/// Collects every progress update.
#[derive(Default)]
pub struct RecordingReporter {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingReporter {
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, update: ProgressUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

pub fn input(case_specifics: Option<&str>) -> JobInput {
    JobInput {
        notes: "Met Jane on Monday. She saw the incident.".to_string(),
        output_dir: "out".into(),
        job: JobName::new("doe").expect("non-blank"),
        case_specifics: case_specifics.map(str::to_string),
    }
}

pub fn state() -> PipelineState {
    PipelineState::new(input(None))
}

pub fn context(generator: Arc<ScriptedGenerator>) -> StepContext {
    StepContext::new(generator, Arc::new(EchoTemplates), GenerationSettings::default())
}

pub fn controller(generator: Arc<ScriptedGenerator>, max_iterations: u32) -> IterationController {
    let config = PipelineConfig::default().with_max_iterations(max_iterations);
    IterationController::new(PipelineSteps::standard(context(generator)), &config)
        .expect("valid controller")
}
