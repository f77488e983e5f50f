use std::collections::HashSet;
use std::path::Path;

use super::engine::{MatchMode, Predicate, Rule, RuleSet, TextField};
use super::schema::{ConditionSpec, RuleDocument, RuleSpec};
use super::RuleError;
use crate::model::Category;

const SCHEMA_JSON: &str = include_str!("../../schema/rules-v1.json");

pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<RuleSet, RuleError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| RuleError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_rules_from_str(&content)
}

/// Parses, schema-checks and compiles a YAML rule document. Any problem rejects the whole document.
pub fn load_rules_from_str(content: &str) -> Result<RuleSet, RuleError> {
    let json_value: serde_json::Value = serde_yaml::from_str(content)?;

    validate_schema(&json_value)?;

    let document: RuleDocument = serde_json::from_value(json_value)?;

    compile(document)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), RuleError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| RuleError::Schema {
            errors: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| RuleError::Schema {
        errors: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(RuleError::Schema {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

fn compile(document: RuleDocument) -> Result<RuleSet, RuleError> {
    let mut names = HashSet::new();
    let mut rules = Vec::with_capacity(document.rules.len());

    for spec in document.rules {
        if !names.insert(spec.name.clone()) {
            return Err(RuleError::InvalidRule {
                name: spec.name,
                reason: "Duplicate rule name".to_string(),
            });
        }
        rules.push(compile_rule(spec)?);
    }

    Ok(RuleSet::new(rules))
}

fn compile_rule(spec: RuleSpec) -> Result<Rule, RuleError> {
    let invalid = |reason: String| RuleError::InvalidRule {
        name: spec.name.clone(),
        reason,
    };

    let category: Category = spec
        .category
        .parse()
        .map_err(|e: crate::model::UnknownCategory| invalid(e.to_string()))?;

    let conditions = spec
        .conditions
        .as_ref()
        .ok_or_else(|| invalid("Missing conditions block".to_string()))?;
    if conditions.is_empty() {
        return Err(invalid("Rule has no conditions".to_string()));
    }
    let predicates = compile_conditions(conditions).map_err(invalid)?;

    let folder = spec
        .folder
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string);
    if folder.is_some() && spec.auto_delete {
        return Err(invalid(
            "A rule cannot both move to a folder and auto-delete".to_string(),
        ));
    }

    Ok(Rule {
        name: spec.name,
        priority: spec.priority,
        predicates,
        category,
        folder,
        auto_delete: spec.auto_delete,
    })
}

fn compile_conditions(conditions: &ConditionSpec) -> Result<Vec<Predicate>, String> {
    let text_conditions = [
        ("sender_contains", &conditions.sender_contains, TextField::Sender, MatchMode::Contains),
        ("sender_equals", &conditions.sender_equals, TextField::Sender, MatchMode::Equals),
        ("subject_contains", &conditions.subject_contains, TextField::Subject, MatchMode::Contains),
        ("subject_equals", &conditions.subject_equals, TextField::Subject, MatchMode::Equals),
        ("body_contains", &conditions.body_contains, TextField::Body, MatchMode::Contains),
        (
            "attachment_name_contains",
            &conditions.attachment_name_contains,
            TextField::AttachmentName,
            MatchMode::Contains,
        ),
    ];

    let mut predicates = Vec::new();
    for (key, value, field, mode) in text_conditions {
        if let Some(value) = value {
            let predicate = Predicate::text(field, mode, value)
                .ok_or_else(|| format!("Condition '{}' has no non-empty alternatives", key))?;
            predicates.push(predicate);
        }
    }
    if let Some(expected) = conditions.has_attachments {
        predicates.push(Predicate::HasAttachments(expected));
    }
    Ok(predicates)
}
