//! Content-version tree for training flows.
//!
//! Authoring produces a tree of steps and components under a flow. Every
//! content change freezes a new, fully independent version of that tree;
//! versions are immutable once written and edits always target the *next*
//! version. Each node carries the id of the original entity it descends
//! from so lineage is traceable across versions, while the node id itself
//! is fresh per version.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::{new_entity_id, EntityId, Timestamp};

// ---------------------------------------------------------------------------
// Status & priority enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a content node (flow or step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Published,
    Archived,
}

impl ContentStatus {
    /// Parse a status string from the database.
    pub fn from_str_db(s: &str) -> Result<Self, CoreError> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            _ => Err(CoreError::Validation(format!(
                "Invalid content status '{s}'. Must be one of: draft, published, archived"
            ))),
        }
    }

    /// Convert to a database-compatible string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

/// Scheduling priority of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPriority {
    Low,
    Medium,
    High,
}

impl FlowPriority {
    pub fn from_str_db(s: &str) -> Result<Self, CoreError> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(CoreError::Validation(format!(
                "Invalid flow priority '{s}'. Must be one of: low, medium, high"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// ---------------------------------------------------------------------------
// Component payloads
// ---------------------------------------------------------------------------

/// Discriminant for the component payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Article,
    Quiz,
    Task,
}

impl ComponentKind {
    pub fn from_str_db(s: &str) -> Result<Self, CoreError> {
        match s {
            "article" => Ok(Self::Article),
            "quiz" => Ok(Self::Quiz),
            "task" => Ok(Self::Task),
            _ => Err(CoreError::Validation(format!(
                "Invalid component kind '{s}'. Must be one of: article, quiz, task"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Quiz => "quiz",
            Self::Task => "task",
        }
    }
}

/// How a task submission is handed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Text,
    File,
    Link,
}

impl SubmissionKind {
    pub fn from_str_db(s: &str) -> Result<Self, CoreError> {
        match s {
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            "link" => Ok(Self::Link),
            _ => Err(CoreError::Validation(format!(
                "Invalid submission kind '{s}'. Must be one of: text, file, link"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Link => "link",
        }
    }
}

/// Whether a task submission completes on its own or waits for a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    Automatic,
    Manual,
}

impl ApprovalPolicy {
    pub fn from_str_db(s: &str) -> Result<Self, CoreError> {
        match s {
            "automatic" => Ok(Self::Automatic),
            "manual" => Ok(Self::Manual),
            _ => Err(CoreError::Validation(format!(
                "Invalid approval policy '{s}'. Must be one of: automatic, manual"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }
}

/// A single selectable answer on a quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizOption {
    pub id: EntityId,
    pub text: String,
    pub correct: bool,
    pub points: i32,
    /// Fractional ordering key among sibling options.
    pub rank: String,
}

/// Article reading material.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ArticleBody {
    #[validate(length(min = 1, message = "Article content must not be empty"))]
    pub content_md: String,
    #[validate(range(min = 0, message = "Reading time must be non-negative"))]
    pub reading_minutes: Option<i32>,
}

/// A scored quiz with its answer options.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuizBody {
    /// Percentage score required to pass, 0..=100.
    #[validate(range(min = 0, max = 100, message = "Passing score must be within 0..=100"))]
    pub passing_score_pct: i32,
    #[validate(range(min = 1, message = "Time limit must be positive"))]
    pub time_limit_minutes: Option<i32>,
    pub shuffle_options: bool,
    #[validate(length(min = 1, max = 20, message = "A quiz needs between 1 and 20 options"))]
    pub options: Vec<QuizOption>,
}

/// A practical task reviewed by submission.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TaskBody {
    #[validate(length(min = 1, message = "Task instructions must not be empty"))]
    pub instructions_md: String,
    pub submission: SubmissionKind,
    pub allowed_file_types: Vec<String>,
    #[validate(range(min = 1, message = "File size limit must be positive"))]
    pub max_file_size_mb: Option<i32>,
    pub approval: ApprovalPolicy,
}

/// Kind-specific payload of a component. Exactly one variant is present by
/// construction; the discriminant is derived, never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentBody {
    Article(ArticleBody),
    Quiz(QuizBody),
    Task(TaskBody),
}

impl ComponentBody {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Article(_) => ComponentKind::Article,
            Self::Quiz(_) => ComponentKind::Quiz,
            Self::Task(_) => ComponentKind::Task,
        }
    }
}

// ---------------------------------------------------------------------------
// Version tree
// ---------------------------------------------------------------------------

/// One frozen version of a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentVersion {
    pub id: EntityId,
    /// Id of the original component this version descends from.
    pub component_id: EntityId,
    pub step_version_id: EntityId,
    pub version: i32,
    pub active: bool,
    pub title: String,
    /// Fractional ordering key among sibling components.
    pub rank: String,
    pub required: bool,
    pub max_attempts: Option<i32>,
    pub min_passing_score: Option<i32>,
    pub body: ComponentBody,
}

/// One frozen version of a step, owning its ordered components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepVersion {
    pub id: EntityId,
    /// Id of the original step this version descends from.
    pub step_id: EntityId,
    pub flow_version_id: EntityId,
    pub version: i32,
    pub active: bool,
    pub title: String,
    pub description: Option<String>,
    /// Fractional ordering key among sibling steps.
    pub rank: String,
    pub required: bool,
    pub estimated_minutes: Option<i32>,
    pub status: ContentStatus,
    pub components: Vec<ComponentVersion>,
}

/// One frozen version of a flow, owning its ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    pub id: EntityId,
    /// Id of the original flow this version descends from.
    pub flow_id: EntityId,
    pub version: i32,
    pub active: bool,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub status: ContentStatus,
    pub priority: FlowPriority,
    pub required: bool,
    /// Days granted to complete the flow; feeds the assignment deadline.
    pub deadline_days: Option<i32>,
    pub created_at: Timestamp,
    pub steps: Vec<StepVersion>,
}

impl FlowVersion {
    /// Steps ordered by rank key. Stored order is not trusted; ordering is
    /// always recomputed from the keys.
    pub fn steps_in_order(&self) -> Vec<&StepVersion> {
        let mut steps: Vec<&StepVersion> = self.steps.iter().collect();
        steps.sort_by(|a, b| a.rank.cmp(&b.rank));
        steps
    }

    /// Total component count across all steps.
    pub fn component_count(&self) -> usize {
        self.steps.iter().map(|s| s.components.len()).sum()
    }

    /// Deep-clone the whole tree as the next version.
    ///
    /// Every node gets a fresh id, keeps the id of its original entity, and
    /// is written with `active = false`; rank keys are copied verbatim so
    /// cloning never reorders. Children are built after their parent so the
    /// new parent id is known up front.
    pub fn clone_as_version(&self, next_version: i32, now: Timestamp) -> FlowVersion {
        let flow_version_id = new_entity_id();
        let steps = self
            .steps
            .iter()
            .map(|step| step.clone_under(flow_version_id, next_version))
            .collect();
        FlowVersion {
            id: flow_version_id,
            flow_id: self.flow_id,
            version: next_version,
            active: false,
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            status: self.status,
            priority: self.priority,
            required: self.required,
            deadline_days: self.deadline_days,
            created_at: now,
            steps,
        }
    }
}

impl StepVersion {
    /// Components ordered by rank key.
    pub fn components_in_order(&self) -> Vec<&ComponentVersion> {
        let mut components: Vec<&ComponentVersion> = self.components.iter().collect();
        components.sort_by(|a, b| a.rank.cmp(&b.rank));
        components
    }

    fn clone_under(&self, flow_version_id: EntityId, next_version: i32) -> StepVersion {
        let step_version_id = new_entity_id();
        let components = self
            .components
            .iter()
            .map(|component| component.clone_under(step_version_id, next_version))
            .collect();
        StepVersion {
            id: step_version_id,
            step_id: self.step_id,
            flow_version_id,
            version: next_version,
            active: false,
            title: self.title.clone(),
            description: self.description.clone(),
            rank: self.rank.clone(),
            required: self.required,
            estimated_minutes: self.estimated_minutes,
            status: self.status,
            components,
        }
    }
}

impl ComponentVersion {
    fn clone_under(&self, step_version_id: EntityId, next_version: i32) -> ComponentVersion {
        let mut body = self.body.clone();
        // Quiz options are part of the frozen tree and get fresh ids too.
        if let ComponentBody::Quiz(quiz) = &mut body {
            for option in &mut quiz.options {
                option.id = new_entity_id();
            }
        }
        ComponentVersion {
            id: new_entity_id(),
            component_id: self.component_id,
            step_version_id,
            version: next_version,
            active: false,
            title: self.title.clone(),
            rank: self.rank.clone(),
            required: self.required,
            max_attempts: self.max_attempts,
            min_passing_score: self.min_passing_score,
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank;

    fn article(step_version_id: EntityId, rank: &str) -> ComponentVersion {
        ComponentVersion {
            id: new_entity_id(),
            component_id: new_entity_id(),
            step_version_id,
            version: 1,
            active: true,
            title: "Reading".into(),
            rank: rank.to_string(),
            required: true,
            max_attempts: None,
            min_passing_score: None,
            body: ComponentBody::Article(ArticleBody {
                content_md: "# Welcome".into(),
                reading_minutes: Some(5),
            }),
        }
    }

    fn quiz(step_version_id: EntityId, rank: &str) -> ComponentVersion {
        let option_ranks = rank::generate_default_ranks(2);
        ComponentVersion {
            id: new_entity_id(),
            component_id: new_entity_id(),
            step_version_id,
            version: 1,
            active: true,
            title: "Checkpoint quiz".into(),
            rank: rank.to_string(),
            required: true,
            max_attempts: Some(3),
            min_passing_score: Some(80),
            body: ComponentBody::Quiz(QuizBody {
                passing_score_pct: 80,
                time_limit_minutes: Some(10),
                shuffle_options: true,
                options: vec![
                    QuizOption {
                        id: new_entity_id(),
                        text: "Yes".into(),
                        correct: true,
                        points: 1,
                        rank: option_ranks[0].clone(),
                    },
                    QuizOption {
                        id: new_entity_id(),
                        text: "No".into(),
                        correct: false,
                        points: 0,
                        rank: option_ranks[1].clone(),
                    },
                ],
            }),
        }
    }

    fn sample_flow_version() -> FlowVersion {
        let flow_version_id = new_entity_id();
        let step_ranks = rank::generate_default_ranks(2);
        let steps = step_ranks
            .iter()
            .map(|step_rank| {
                let step_version_id = new_entity_id();
                let component_ranks = rank::generate_default_ranks(2);
                StepVersion {
                    id: step_version_id,
                    step_id: new_entity_id(),
                    flow_version_id,
                    version: 1,
                    active: true,
                    title: "Step".into(),
                    description: None,
                    rank: step_rank.clone(),
                    required: true,
                    estimated_minutes: Some(30),
                    status: ContentStatus::Published,
                    components: vec![
                        article(step_version_id, &component_ranks[0]),
                        quiz(step_version_id, &component_ranks[1]),
                    ],
                }
            })
            .collect();
        FlowVersion {
            id: flow_version_id,
            flow_id: new_entity_id(),
            version: 1,
            active: true,
            title: "Backend onboarding".into(),
            description: Some("Ramp-up for new backend engineers".into()),
            tags: vec!["backend".into()],
            status: ContentStatus::Published,
            priority: FlowPriority::High,
            required: true,
            deadline_days: Some(30),
            created_at: chrono::Utc::now(),
            steps,
        }
    }

    // -- clone_as_version --

    #[test]
    fn clone_increments_version_and_deactivates() {
        let v1 = sample_flow_version();
        let v2 = v1.clone_as_version(2, chrono::Utc::now());
        assert_eq!(v2.version, 2);
        assert!(!v2.active);
        assert!(v2.steps.iter().all(|s| s.version == 2 && !s.active));
        assert!(v2
            .steps
            .iter()
            .flat_map(|s| &s.components)
            .all(|c| c.version == 2 && !c.active));
    }

    #[test]
    fn clone_preserves_lineage_ids() {
        let v1 = sample_flow_version();
        let v2 = v1.clone_as_version(2, chrono::Utc::now());
        assert_eq!(v2.flow_id, v1.flow_id);
        for (a, b) in v1.steps.iter().zip(&v2.steps) {
            assert_eq!(a.step_id, b.step_id);
            for (ca, cb) in a.components.iter().zip(&b.components) {
                assert_eq!(ca.component_id, cb.component_id);
            }
        }
    }

    #[test]
    fn clone_generates_fresh_node_ids() {
        let v1 = sample_flow_version();
        let v2 = v1.clone_as_version(2, chrono::Utc::now());
        assert_ne!(v1.id, v2.id);
        for (a, b) in v1.steps.iter().zip(&v2.steps) {
            assert_ne!(a.id, b.id);
            assert_eq!(b.flow_version_id, v2.id);
            for (ca, cb) in a.components.iter().zip(&b.components) {
                assert_ne!(ca.id, cb.id);
                assert_eq!(cb.step_version_id, b.id);
            }
        }
    }

    #[test]
    fn clone_copies_rank_keys_verbatim() {
        let v1 = sample_flow_version();
        let v2 = v1.clone_as_version(2, chrono::Utc::now());
        for (a, b) in v1.steps.iter().zip(&v2.steps) {
            assert_eq!(a.rank, b.rank);
            for (ca, cb) in a.components.iter().zip(&b.components) {
                assert_eq!(ca.rank, cb.rank);
            }
        }
    }

    #[test]
    fn clone_gives_quiz_options_fresh_ids() {
        let v1 = sample_flow_version();
        let v2 = v1.clone_as_version(2, chrono::Utc::now());
        let options = |v: &FlowVersion| -> Vec<EntityId> {
            v.steps
                .iter()
                .flat_map(|s| &s.components)
                .filter_map(|c| match &c.body {
                    ComponentBody::Quiz(q) => Some(q.options.iter().map(|o| o.id)),
                    _ => None,
                })
                .flatten()
                .collect()
        };
        let old_ids = options(&v1);
        let new_ids = options(&v2);
        assert_eq!(old_ids.len(), new_ids.len());
        assert!(new_ids.iter().all(|id| !old_ids.contains(id)));
    }

    #[test]
    fn clone_is_independent_of_source() {
        let v1 = sample_flow_version();
        let mut v2 = v1.clone_as_version(2, chrono::Utc::now());
        v2.steps[0].title = "Edited".into();
        v2.steps[0].components[0].title = "Edited".into();
        assert_eq!(v1.steps[0].title, "Step");
        assert_eq!(v1.steps[0].components[0].title, "Reading");
    }

    // -- ordering helpers --

    #[test]
    fn steps_in_order_sorts_by_rank() {
        let mut flow = sample_flow_version();
        flow.steps.reverse();
        let ordered = flow.steps_in_order();
        for pair in ordered.windows(2) {
            assert!(pair[0].rank < pair[1].rank);
        }
    }

    #[test]
    fn component_count_sums_all_steps() {
        let flow = sample_flow_version();
        assert_eq!(flow.component_count(), 4);
    }

    // -- ComponentBody --

    #[test]
    fn body_kind_matches_variant() {
        let step_id = new_entity_id();
        assert_eq!(article(step_id, "i").body.kind(), ComponentKind::Article);
        assert_eq!(quiz(step_id, "i").body.kind(), ComponentKind::Quiz);
    }
}
