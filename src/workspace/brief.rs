// BRIEF.md rendering using Tera

use anyhow::{anyhow, Result};
use serde::Serialize;
use tera::{Context, Tera};

use crate::models::Task;

/// Default mission brief written into every workspace. Overridable from
/// config (`workspace.brief_template`).
pub const DEFAULT_BRIEF_TEMPLATE: &str = r#"# Worker Brief: {{ feature }}

You are worker slot {{ slot_number }} on branch `{{ branch_name }}`.

## Protocol

- Your assigned tasks are listed in `tasks.json` in this directory.
- Report progress by updating the shared status document at
  `{{ status_doc_path }}` (also in the `TASKWAVE_STATUS_DOC` environment
  variable): set each task to `in_progress` when you start it and `complete`
  when its acceptance criteria pass. Only modify entries for your own tasks.
- Commit your work to this branch as you go. Do not push or merge.
- Append a short note to `progress.log` after each task.

## Tasks
{% for task in tasks %}
### {{ task.id }}: {{ task.title }}

{{ task.description }}
{% if task.acceptanceCriteria %}
Acceptance criteria:
{% for criterion in task.acceptanceCriteria %}- {{ criterion }}
{% endfor %}{% endif %}{% if task.unitTestSpec %}
Unit tests: {{ task.unitTestSpec }}
{% endif %}{% endfor %}
{% if recent_progress %}## Handoff notes

{{ recent_progress }}
{% endif %}"#;

/// Everything the brief template can reference
#[derive(Debug, Clone, Serialize)]
pub struct BriefContext {
    pub feature: String,
    pub slot_number: u32,
    pub branch_name: String,
    pub status_doc_path: String,
    pub tasks: Vec<Task>,
    pub recent_progress: Option<String>,
}

impl BriefContext {
    fn to_tera_context(&self) -> Result<Context> {
        let mut ctx = Context::new();
        ctx.insert("feature", &self.feature);
        ctx.insert("slot_number", &self.slot_number);
        ctx.insert("branch_name", &self.branch_name);
        ctx.insert("status_doc_path", &self.status_doc_path);
        ctx.insert("tasks", &self.tasks);
        if let Some(progress) = &self.recent_progress {
            ctx.insert("recent_progress", progress);
        }
        Ok(ctx)
    }
}

/// Render a brief from a template string (one-off, no template cache)
pub fn render_brief(template: &str, context: &BriefContext) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("brief", template)
        .map_err(|e| anyhow!("Invalid brief template: {}", e))?;

    let ctx = context.to_tera_context()?;
    tera.render("brief", &ctx)
        .map_err(|e| anyhow!("Failed to render brief: {}", e))
}
