//! Authoring-side validation for content version trees.
//!
//! Field-level rules (ranges, lengths) live as `validator` attributes on
//! the payload structs; the checks here add the cross-field invariants the
//! derive cannot express and fold everything into [`CoreError::Validation`]
//! with enough context to surface to an author.

use validator::Validate;

use crate::error::CoreError;
use crate::flow::{ComponentBody, ComponentVersion, FlowVersion, StepVersion};

/// Validate a whole version tree before it is frozen.
pub fn validate_flow_version(flow: &FlowVersion) -> Result<(), CoreError> {
    require_title("Flow", &flow.title)?;
    if flow.version < 1 {
        return Err(CoreError::Validation(format!(
            "Flow version number must be positive, got {}",
            flow.version
        )));
    }
    for step in &flow.steps {
        validate_step_version(step)?;
    }
    Ok(())
}

/// Validate one step and its components.
pub fn validate_step_version(step: &StepVersion) -> Result<(), CoreError> {
    require_title("Step", &step.title)?;
    if step.estimated_minutes.is_some_and(|m| m < 0) {
        return Err(CoreError::Validation(format!(
            "Step '{}' has a negative estimated duration",
            step.title
        )));
    }
    for component in &step.components {
        validate_component_version(component)?;
    }
    Ok(())
}

/// Validate one component, including its kind-specific payload.
pub fn validate_component_version(component: &ComponentVersion) -> Result<(), CoreError> {
    require_title("Component", &component.title)?;
    if component.max_attempts.is_some_and(|n| n < 1) {
        return Err(CoreError::Validation(format!(
            "Component '{}' must allow at least one attempt",
            component.title
        )));
    }
    if component
        .min_passing_score
        .is_some_and(|s| !(0..=100).contains(&s))
    {
        return Err(CoreError::Validation(format!(
            "Component '{}' passing score must be within 0..=100",
            component.title
        )));
    }

    match &component.body {
        ComponentBody::Article(article) => field_rules(&component.title, article),
        ComponentBody::Quiz(quiz) => {
            field_rules(&component.title, quiz)?;
            if !quiz.options.iter().any(|o| o.correct) {
                return Err(CoreError::Validation(format!(
                    "Quiz '{}' needs at least one correct option",
                    component.title
                )));
            }
            if let Some(option) = quiz.options.iter().find(|o| o.points < 0) {
                return Err(CoreError::Validation(format!(
                    "Quiz '{}' option '{}' has negative points",
                    component.title, option.text
                )));
            }
            Ok(())
        }
        ComponentBody::Task(task) => field_rules(&component.title, task),
    }
}

fn require_title(entity: &str, title: &str) -> Result<(), CoreError> {
    if title.trim().is_empty() {
        return Err(CoreError::Validation(format!(
            "{entity} title must not be empty"
        )));
    }
    Ok(())
}

/// Run the derive-level rules and flatten violations into one message.
fn field_rules<T: Validate>(title: &str, payload: &T) -> Result<(), CoreError> {
    payload.validate().map_err(|errors| {
        let detail: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, violations)| {
                violations.iter().map(move |v| {
                    v.message
                        .as_ref()
                        .map_or_else(|| format!("{field} is invalid"), |m| m.to_string())
                })
            })
            .collect();
        CoreError::Validation(format!("Component '{title}': {}", detail.join("; ")))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{
        ApprovalPolicy, ArticleBody, QuizBody, QuizOption, SubmissionKind, TaskBody,
    };
    use crate::types::new_entity_id;

    fn component(body: ComponentBody) -> ComponentVersion {
        ComponentVersion {
            id: new_entity_id(),
            component_id: new_entity_id(),
            step_version_id: new_entity_id(),
            version: 1,
            active: false,
            title: "Component".into(),
            rank: "i".into(),
            required: true,
            max_attempts: Some(3),
            min_passing_score: Some(70),
            body,
        }
    }

    fn option(text: &str, correct: bool, points: i32) -> QuizOption {
        QuizOption {
            id: new_entity_id(),
            text: text.into(),
            correct,
            points,
            rank: "i".into(),
        }
    }

    #[test]
    fn valid_article_passes() {
        let c = component(ComponentBody::Article(ArticleBody {
            content_md: "Read me".into(),
            reading_minutes: Some(5),
        }));
        assert!(validate_component_version(&c).is_ok());
    }

    #[test]
    fn empty_article_content_rejected() {
        let c = component(ComponentBody::Article(ArticleBody {
            content_md: String::new(),
            reading_minutes: None,
        }));
        assert!(validate_component_version(&c).is_err());
    }

    #[test]
    fn quiz_without_options_rejected() {
        let c = component(ComponentBody::Quiz(QuizBody {
            passing_score_pct: 80,
            time_limit_minutes: None,
            shuffle_options: false,
            options: vec![],
        }));
        assert!(validate_component_version(&c).is_err());
    }

    #[test]
    fn quiz_without_correct_option_rejected() {
        let c = component(ComponentBody::Quiz(QuizBody {
            passing_score_pct: 80,
            time_limit_minutes: None,
            shuffle_options: false,
            options: vec![option("A", false, 1), option("B", false, 1)],
        }));
        assert!(validate_component_version(&c).is_err());
    }

    #[test]
    fn quiz_with_negative_points_rejected() {
        let c = component(ComponentBody::Quiz(QuizBody {
            passing_score_pct: 80,
            time_limit_minutes: None,
            shuffle_options: false,
            options: vec![option("A", true, -1)],
        }));
        assert!(validate_component_version(&c).is_err());
    }

    #[test]
    fn quiz_passing_score_out_of_range_rejected() {
        let c = component(ComponentBody::Quiz(QuizBody {
            passing_score_pct: 120,
            time_limit_minutes: None,
            shuffle_options: false,
            options: vec![option("A", true, 1)],
        }));
        assert!(validate_component_version(&c).is_err());
    }

    #[test]
    fn valid_quiz_passes() {
        let c = component(ComponentBody::Quiz(QuizBody {
            passing_score_pct: 80,
            time_limit_minutes: Some(15),
            shuffle_options: true,
            options: vec![option("A", true, 2), option("B", false, 0)],
        }));
        assert!(validate_component_version(&c).is_ok());
    }

    #[test]
    fn task_with_zero_file_size_rejected() {
        let c = component(ComponentBody::Task(TaskBody {
            instructions_md: "Do the thing".into(),
            submission: SubmissionKind::File,
            allowed_file_types: vec!["pdf".into()],
            max_file_size_mb: Some(0),
            approval: ApprovalPolicy::Manual,
        }));
        assert!(validate_component_version(&c).is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut c = component(ComponentBody::Article(ArticleBody {
            content_md: "Read me".into(),
            reading_minutes: None,
        }));
        c.max_attempts = Some(0);
        assert!(validate_component_version(&c).is_err());
    }

    #[test]
    fn passing_score_bounds_enforced() {
        let mut c = component(ComponentBody::Article(ArticleBody {
            content_md: "Read me".into(),
            reading_minutes: None,
        }));
        c.min_passing_score = Some(101);
        assert!(validate_component_version(&c).is_err());
    }
}
