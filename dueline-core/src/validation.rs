//! Validation rules applied before anything reaches a store.

use crate::entities::{NewTodo, TodoPatch};
use crate::error::ValidationError;
use crate::identity::Timestamp;

/// Maximum title length, counted in characters after trimming.
pub const TITLE_MAX_CHARS: usize = 120;

/// Maximum description length, counted in characters after trimming.
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// Trim text fields and check limits and the due date of a new todo.
pub fn normalize_new_todo(new: NewTodo, now: Timestamp) -> Result<NewTodo, ValidationError> {
    let title = normalize_title(&new.title)?;
    let description = normalize_description(&new.description)?;
    if let Some(due_at) = new.due_at {
        check_due_at(due_at, now)?;
    }

    Ok(NewTodo {
        title,
        description,
        due_at: new.due_at,
    })
}

/// Same rules as [`normalize_new_todo`], applied only to the fields present.
pub fn normalize_patch(patch: TodoPatch, now: Timestamp) -> Result<TodoPatch, ValidationError> {
    let title = patch.title.as_deref().map(normalize_title).transpose()?;
    let description = patch
        .description
        .as_deref()
        .map(normalize_description)
        .transpose()?;
    if let Some(due_at) = patch.due_at {
        check_due_at(due_at, now)?;
    }

    Ok(TodoPatch {
        title,
        description,
        due_at: patch.due_at,
        is_done: patch.is_done,
    })
}

fn normalize_title(raw: &str) -> Result<String, ValidationError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        });
    }
    check_length("title", title, TITLE_MAX_CHARS)?;
    Ok(title.to_string())
}

fn normalize_description(raw: &str) -> Result<String, ValidationError> {
    let description = raw.trim();
    check_length("description", description, DESCRIPTION_MAX_CHARS)?;
    Ok(description.to_string())
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    let actual = value.chars().count();
    if actual > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
            actual,
        });
    }
    Ok(())
}

fn check_due_at(due_at: Timestamp, now: Timestamp) -> Result<(), ValidationError> {
    if due_at < now {
        return Err(ValidationError::DueDateInPast { due_at });
    }
    Ok(())
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn fixed_now() -> Timestamp {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn arb_padding() -> impl Strategy<Value = String> {
        proptest::collection::vec(prop_oneof![Just(' '), Just('\t'), Just('\n')], 0..4)
            .prop_map(|chars| chars.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Surrounding whitespace never survives, and the inner text is kept.
        #[test]
        fn prop_title_and_description_are_trimmed(
            title in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,40}[a-zA-Z0-9]",
            description in "[a-z ]{0,60}",
            left in arb_padding(),
            right in arb_padding(),
        ) {
            let new = NewTodo::new(format!("{left}{title}{right}"))
                .with_description(format!("{right}{description}{left}"));
            let normalized = normalize_new_todo(new, fixed_now()).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(normalized.title, title);
            prop_assert_eq!(normalized.description, description.trim());
        }

        /// Title limit is inclusive, counted in characters after trimming.
        #[test]
        fn prop_title_limit(len in 1usize..=TITLE_MAX_CHARS + 40, wide in any::<bool>()) {
            let unit = if wide { "ü" } else { "t" };
            let result = normalize_new_todo(NewTodo::new(format!(" {} ", unit.repeat(len))), fixed_now());
            if len <= TITLE_MAX_CHARS {
                prop_assert!(result.is_ok());
            } else {
                let is_too_long = matches!(
                    result,
                    Err(ValidationError::TooLong { max: TITLE_MAX_CHARS, actual, .. }) if actual == len
                );
                prop_assert!(is_too_long);
            }
        }

        /// Description limit applies to both new todos and patches.
        #[test]
        fn prop_description_limit(len in 0usize..=DESCRIPTION_MAX_CHARS + 40) {
            let description = "d".repeat(len);
            let new = normalize_new_todo(NewTodo::new("ok").with_description(description.clone()), fixed_now());
            let patch = normalize_patch(
                TodoPatch { description: Some(description), ..Default::default() },
                fixed_now(),
            );
            prop_assert_eq!(new.is_ok(), len <= DESCRIPTION_MAX_CHARS);
            prop_assert_eq!(patch.is_ok(), len <= DESCRIPTION_MAX_CHARS);
        }

        /// Any due date before now is rejected; now and later are accepted.
        #[test]
        fn prop_due_at_must_not_be_past(offset_secs in -10_000_000i64..10_000_000) {
            let now = fixed_now();
            let due_at = now + Duration::seconds(offset_secs);
            let new = normalize_new_todo(NewTodo::new("due").with_due_at(due_at), now);
            let patch = normalize_patch(TodoPatch { due_at: Some(due_at), ..Default::default() }, now);

            if offset_secs < 0 {
                let new_rejected = matches!(new, Err(ValidationError::DueDateInPast { .. }));
                let patch_rejected = matches!(patch, Err(ValidationError::DueDateInPast { .. }));
                prop_assert!(new_rejected);
                prop_assert!(patch_rejected);
            } else {
                prop_assert_eq!(new.map(|n| n.due_at), Ok(Some(due_at)));
                prop_assert_eq!(patch.map(|p| p.due_at), Ok(Some(due_at)));
            }
        }

        /// A patch trims its title the same way a new todo does.
        #[test]
        fn prop_patch_title_matches_new_todo(
            title in "[a-zA-Z]{1,30}",
            left in arb_padding(),
            right in arb_padding(),
        ) {
            let raw = format!("{left}{title}{right}");
            let new = normalize_new_todo(NewTodo::new(raw.clone()), fixed_now());
            let patch = normalize_patch(TodoPatch { title: Some(raw), ..Default::default() }, fixed_now());
            prop_assert_eq!(new.map(|n| n.title), Ok(title.clone()));
            prop_assert_eq!(patch.map(|p| p.title), Ok(Some(title)));
        }
    }
}
