//! Configuration checks for opted-in models.
//!
//! Checks report problems as [`CheckError`] values instead of failing, so a
//! startup routine can collect every finding before deciding what to do.

use crate::manager::PREFETCH_MANAGER;
use autoprefetch_core::{Model, RelationshipInfo, RelationshipKind};
use std::fmt;

/// Opted-in model whose base manager is not the prefetch manager.
pub const E001: &str = "autoprefetch.E001";

/// Forward to-one relationship without a local key column.
pub const E002: &str = "autoprefetch.E002";

/// A configuration problem found by a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckError {
    pub id: &'static str,
    /// The model the finding is about.
    pub obj: String,
    pub msg: String,
    pub hint: Option<String>,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({}) {}", self.obj, self.id, self.msg)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n\tHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Last path segment of the Rust type name, without generics.
fn short_type_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn check_base_manager<M: Model>(name: &'static str) -> Option<CheckError> {
    let base_manager_name = M::META.base_manager_name;
    if base_manager_name == Some(PREFETCH_MANAGER) {
        return None;
    }
    let shown = match base_manager_name {
        Some(value) => format!("'{value}'"),
        None => "None".to_string(),
    };
    Some(CheckError {
        id: E001,
        obj: name.to_string(),
        msg: format!(
            "{name} inherits from AutoPrefetch but its base_manager_name is not '{PREFETCH_MANAGER}'"
        ),
        hint: Some(format!(
            "The base_manager_name is instead {shown}. Check the META constant inherits from PREFETCH_META."
        )),
    })
}

/// The owning side of a one-to-one names only the column on the other table.
fn is_reverse_one_to_one(rel: &RelationshipInfo) -> bool {
    rel.kind == RelationshipKind::OneToOne && rel.local_key.is_none() && rel.remote_key.is_some()
}

fn check_relationship(name: &'static str, rel: &RelationshipInfo) -> Option<CheckError> {
    if !rel.kind.is_to_one() || rel.local_key.is_some() || is_reverse_one_to_one(rel) {
        return None;
    }
    Some(CheckError {
        id: E002,
        obj: name.to_string(),
        msg: format!(
            "{name}.{} is a to-one relationship without a local_key",
            rel.name
        ),
        hint: Some(
            "Set local_key on the RelationshipInfo so null keys can be detected without a query."
                .to_string(),
        ),
    })
}

/// Run every check for the opted-in model `M`.
pub fn check_model<M: Model>() -> Vec<CheckError> {
    let name = short_type_name::<M>();
    let mut errors = Vec::new();
    errors.extend(check_base_manager::<M>(name));
    errors.extend(
        M::RELATIONSHIPS
            .iter()
            .filter_map(|rel| check_relationship(name, rel)),
    );
    errors
}

/// Run a list of model checks and collect their findings.
///
/// ```ignore
/// let errors = run_checks(&[Hero::check, Team::check]);
/// ```
pub fn run_checks(checks: &[fn() -> Vec<CheckError>]) -> Vec<CheckError> {
    let errors: Vec<CheckError> = checks.iter().flat_map(|check| check()).collect();
    for error in &errors {
        tracing::warn!(id = error.id, obj = %error.obj, "{}", error.msg);
    }
    errors
}
