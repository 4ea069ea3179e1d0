//! Row models for the content-version tables.
//!
//! Component payloads are stored table-per-kind-column-group: one
//! `component_versions` row carries the kind discriminant plus nullable
//! columns for each kind. [`ComponentVersionRow::into_domain`] enforces
//! that exactly the discriminated group is populated and rebuilds the
//! tagged union; a row violating that is reported as a validation fault,
//! never silently coerced.

use serde::Serialize;
use sqlx::FromRow;

use ramp_core::error::CoreError;
use ramp_core::flow::{
    ApprovalPolicy, ArticleBody, ComponentBody, ComponentKind, ComponentVersion, ContentStatus,
    FlowPriority, FlowVersion, QuizBody, QuizOption, StepVersion, SubmissionKind, TaskBody,
};
use ramp_core::types::{EntityId, Timestamp};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A row from the `flow_versions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FlowVersionRow {
    pub id: EntityId,
    pub flow_id: EntityId,
    pub version: i32,
    pub active: bool,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub status: String,
    pub priority: String,
    pub required: bool,
    pub deadline_days: Option<i32>,
    pub created_at: Timestamp,
}

/// A row from the `flow_step_versions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StepVersionRow {
    pub id: EntityId,
    pub step_id: EntityId,
    pub flow_version_id: EntityId,
    pub version: i32,
    pub active: bool,
    pub title: String,
    pub description: Option<String>,
    pub rank: String,
    pub required: bool,
    pub estimated_minutes: Option<i32>,
    pub status: String,
}

/// A row from the `component_versions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ComponentVersionRow {
    pub id: EntityId,
    pub component_id: EntityId,
    pub step_version_id: EntityId,
    pub version: i32,
    pub active: bool,
    pub title: String,
    pub rank: String,
    pub required: bool,
    pub max_attempts: Option<i32>,
    pub min_passing_score: Option<i32>,
    pub kind: String,
    pub article_content_md: Option<String>,
    pub article_reading_minutes: Option<i32>,
    pub quiz_passing_score_pct: Option<i32>,
    pub quiz_time_limit_minutes: Option<i32>,
    pub quiz_shuffle_options: Option<bool>,
    pub task_instructions_md: Option<String>,
    pub task_submission: Option<String>,
    pub task_allowed_file_types: Option<Vec<String>>,
    pub task_max_file_size_mb: Option<i32>,
    pub task_approval: Option<String>,
}

/// A row from the `quiz_options` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuizOptionRow {
    pub id: EntityId,
    pub component_version_id: EntityId,
    pub text: String,
    pub correct: bool,
    pub points: i32,
    pub rank: String,
}

// ---------------------------------------------------------------------------
// Row → domain
// ---------------------------------------------------------------------------

impl FlowVersionRow {
    pub fn into_domain(self, steps: Vec<StepVersion>) -> Result<FlowVersion, CoreError> {
        Ok(FlowVersion {
            id: self.id,
            flow_id: self.flow_id,
            version: self.version,
            active: self.active,
            title: self.title,
            description: self.description,
            tags: self.tags,
            status: ContentStatus::from_str_db(&self.status)?,
            priority: FlowPriority::from_str_db(&self.priority)?,
            required: self.required,
            deadline_days: self.deadline_days,
            created_at: self.created_at,
            steps,
        })
    }
}

impl StepVersionRow {
    pub fn into_domain(self, components: Vec<ComponentVersion>) -> Result<StepVersion, CoreError> {
        Ok(StepVersion {
            id: self.id,
            step_id: self.step_id,
            flow_version_id: self.flow_version_id,
            version: self.version,
            active: self.active,
            title: self.title,
            description: self.description,
            rank: self.rank,
            required: self.required,
            estimated_minutes: self.estimated_minutes,
            status: ContentStatus::from_str_db(&self.status)?,
            components,
        })
    }
}

impl ComponentVersionRow {
    pub fn into_domain(self, options: Vec<QuizOptionRow>) -> Result<ComponentVersion, CoreError> {
        let kind = ComponentKind::from_str_db(&self.kind)?;
        let body = match kind {
            ComponentKind::Article => ComponentBody::Article(ArticleBody {
                content_md: self
                    .article_content_md
                    .ok_or_else(|| payload_mismatch(self.id, kind, "article_content_md"))?,
                reading_minutes: self.article_reading_minutes,
            }),
            ComponentKind::Quiz => ComponentBody::Quiz(QuizBody {
                passing_score_pct: self
                    .quiz_passing_score_pct
                    .ok_or_else(|| payload_mismatch(self.id, kind, "quiz_passing_score_pct"))?,
                time_limit_minutes: self.quiz_time_limit_minutes,
                shuffle_options: self
                    .quiz_shuffle_options
                    .ok_or_else(|| payload_mismatch(self.id, kind, "quiz_shuffle_options"))?,
                options: options.into_iter().map(QuizOptionRow::into_option).collect(),
            }),
            ComponentKind::Task => ComponentBody::Task(TaskBody {
                instructions_md: self
                    .task_instructions_md
                    .ok_or_else(|| payload_mismatch(self.id, kind, "task_instructions_md"))?,
                submission: SubmissionKind::from_str_db(
                    self.task_submission
                        .as_deref()
                        .ok_or_else(|| payload_mismatch(self.id, kind, "task_submission"))?,
                )?,
                allowed_file_types: self.task_allowed_file_types.unwrap_or_default(),
                max_file_size_mb: self.task_max_file_size_mb,
                approval: ApprovalPolicy::from_str_db(
                    self.task_approval
                        .as_deref()
                        .ok_or_else(|| payload_mismatch(self.id, kind, "task_approval"))?,
                )?,
            }),
        };
        Ok(ComponentVersion {
            id: self.id,
            component_id: self.component_id,
            step_version_id: self.step_version_id,
            version: self.version,
            active: self.active,
            title: self.title,
            rank: self.rank,
            required: self.required,
            max_attempts: self.max_attempts,
            min_passing_score: self.min_passing_score,
            body,
        })
    }
}

impl QuizOptionRow {
    fn into_option(self) -> QuizOption {
        QuizOption {
            id: self.id,
            text: self.text,
            correct: self.correct,
            points: self.points,
            rank: self.rank,
        }
    }
}

fn payload_mismatch(id: EntityId, kind: ComponentKind, column: &str) -> CoreError {
    CoreError::Validation(format!(
        "Component version {id} has kind '{}' but no value in '{column}'",
        kind.as_str()
    ))
}

// ---------------------------------------------------------------------------
// Domain → columns
// ---------------------------------------------------------------------------

/// Per-kind payload columns of a `component_versions` row, flattened for
/// insert binding. Exactly the group matching the kind is populated.
#[derive(Debug, Clone, Default)]
pub struct PayloadColumns {
    pub article_content_md: Option<String>,
    pub article_reading_minutes: Option<i32>,
    pub quiz_passing_score_pct: Option<i32>,
    pub quiz_time_limit_minutes: Option<i32>,
    pub quiz_shuffle_options: Option<bool>,
    pub task_instructions_md: Option<String>,
    pub task_submission: Option<String>,
    pub task_allowed_file_types: Option<Vec<String>>,
    pub task_max_file_size_mb: Option<i32>,
    pub task_approval: Option<String>,
}

impl PayloadColumns {
    pub fn from_body(body: &ComponentBody) -> Self {
        match body {
            ComponentBody::Article(article) => Self {
                article_content_md: Some(article.content_md.clone()),
                article_reading_minutes: article.reading_minutes,
                ..Default::default()
            },
            ComponentBody::Quiz(quiz) => Self {
                quiz_passing_score_pct: Some(quiz.passing_score_pct),
                quiz_time_limit_minutes: quiz.time_limit_minutes,
                quiz_shuffle_options: Some(quiz.shuffle_options),
                ..Default::default()
            },
            ComponentBody::Task(task) => Self {
                task_instructions_md: Some(task.instructions_md.clone()),
                task_submission: Some(task.submission.as_str().to_string()),
                task_allowed_file_types: Some(task.allowed_file_types.clone()),
                task_max_file_size_mb: task.max_file_size_mb,
                task_approval: Some(task.approval.as_str().to_string()),
                ..Default::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
