//! Constraint representation and the delegation intersection rules of
//! spec §4.1.
//!
//! Constraints are stored as a normalized set of recognised fields plus a
//! bag of unknown keys (forward compatibility: unknown keys pass through
//! child-overrides-parent on delegation).

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `max_delegations` is either a finite count or unlimited. Unlimited is
/// the intersection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxDelegations {
    Unlimited,
    Count(u32),
}

impl MaxDelegations {
    /// Smaller of the two, with `Unlimited` acting as the identity.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unlimited, x) | (x, Self::Unlimited) => x,
            (Self::Count(a), Self::Count(b)) => Self::Count(a.min(b)),
        }
    }

    /// Whether at least one more delegation is permitted.
    #[must_use]
    pub fn allows_another(self) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Count(n) => n > 0,
        }
    }

    /// Decrement by one delegation, saturating at zero.
    #[must_use]
    pub fn decremented(self) -> Self {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Count(n) => Self::Count(n.saturating_sub(1)),
        }
    }
}

/// The constraint set attached to a capability.
///
/// Recognised keys (`operations`, `paths`, `allowed_tools`,
/// `max_delegations`, `expires_at`, `max_file_size`, `allowed_extensions`,
/// `rate_limit`, `time_window`) are typed fields. Anything else lands in
/// `extra` and is passed through unchanged except that the child overrides
/// the parent on delegation (spec §4.1: "Unknown keys: child overrides
/// parent").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Empty set means unrestricted for the *parent*; for the child it
    /// means "no change" per the intersection rule, so at the call site we
    /// distinguish "field absent" (no constraint supplied) via `Option`.
    pub operations: Option<FxHashSet<String>>,
    pub allowed_tools: Option<FxHashSet<String>>,
    /// Ordered so the first matching prefix wins deterministically.
    pub paths: Option<Vec<String>>,
    pub max_delegations: Option<MaxDelegations>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_file_size: Option<u64>,
    pub allowed_extensions: Option<FxHashSet<String>>,
    pub rate_limit: Option<u32>,
    pub time_window: Option<String>,
    #[serde(default)]
    pub extra: FxHashMap<String, Value>,
}

impl Constraints {
    /// Build an empty, unrestricted constraint set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intersect `self` (parent) with `child`, per spec §4.1:
    ///
    /// - `operations`/`allowed_tools`: set intersection; empty-parent means
    ///   unrestricted (child wins as-is), empty-child means no change
    ///   (parent wins as-is). Both `None` fields behave like empty sets for
    ///   this purpose, i.e. "no explicit restriction was ever set".
    /// - `paths`: a child path survives iff it is prefixed by some parent
    ///   path.
    /// - `expires_at`: earlier of the two.
    /// - `max_delegations`: smaller of the two.
    /// - Unknown/extra keys: child overrides parent.
    #[must_use]
    pub fn intersect(&self, child: &Constraints) -> Constraints {
        Constraints {
            operations: intersect_set_field(&self.operations, &child.operations),
            allowed_tools: intersect_set_field(&self.allowed_tools, &child.allowed_tools),
            paths: intersect_paths(&self.paths, &child.paths),
            max_delegations: intersect_opt(self.max_delegations, child.max_delegations, |a, b| {
                a.intersect(b)
            }),
            expires_at: intersect_opt(self.expires_at, child.expires_at, |a, b| a.min(b)),
            max_file_size: child.max_file_size.or(self.max_file_size),
            allowed_extensions: intersect_set_field(
                &self.allowed_extensions,
                &child.allowed_extensions,
            ),
            rate_limit: child.rate_limit.or(self.rate_limit),
            time_window: child.time_window.clone().or_else(|| self.time_window.clone()),
            extra: {
                let mut merged = self.extra.clone();
                for (k, v) in &child.extra {
                    merged.insert(k.clone(), v.clone());
                }
                merged
            },
        }
    }
}

fn intersect_opt<T: Copy>(a: Option<T>, b: Option<T>, f: impl Fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn intersect_set_field(
    parent: &Option<FxHashSet<String>>,
    child: &Option<FxHashSet<String>>,
) -> Option<FxHashSet<String>> {
    match (parent, child) {
        (None, None) => None,
        (Some(p), None) => Some(p.clone()),
        (None, Some(c)) => Some(c.clone()),
        (Some(p), Some(c)) => {
            if p.is_empty() {
                Some(c.clone())
            } else if c.is_empty() {
                Some(p.clone())
            } else {
                Some(p.intersection(c).cloned().collect())
            }
        }
    }
}

fn intersect_paths(parent: &Option<Vec<String>>, child: &Option<Vec<String>>) -> Option<Vec<String>> {
    match (parent, child) {
        (None, None) => None,
        (Some(p), None) => Some(p.clone()),
        (None, Some(c)) => Some(c.clone()),
        (Some(p), Some(c)) => {
            let retained: Vec<String> = c
                .iter()
                .filter(|child_path| p.iter().any(|parent_path| child_path.starts_with(parent_path.as_str())))
                .cloned()
                .collect();
            Some(retained)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parent_operations_means_unrestricted() {
        let parent = Constraints::new();
        let mut child = Constraints::new();
        child.operations = Some(["read".to_string()].into_iter().collect());
        let result = parent.intersect(&child);
        assert_eq!(result.operations, child.operations);
    }

    #[test]
    fn empty_child_operations_means_no_change() {
        let mut parent = Constraints::new();
        parent.operations = Some(["read".to_string(), "write".to_string()].into_iter().collect());
        let child = Constraints::new();
        let result = parent.intersect(&child);
        assert_eq!(result.operations, parent.operations);
    }

    #[test]
    fn paths_are_retained_only_when_prefixed_by_parent() {
        let mut parent = Constraints::new();
        parent.paths = Some(vec!["/tmp".to_string()]);
        let mut child = Constraints::new();
        child.paths = Some(vec!["/tmp/logs".to_string(), "/etc".to_string()]);
        let result = parent.intersect(&child);
        assert_eq!(result.paths, Some(vec!["/tmp/logs".to_string()]));
    }

    #[test]
    fn expires_at_takes_the_earlier_value() {
        let now = Utc::now();
        let later = now + chrono::Duration::hours(1);
        let mut parent = Constraints::new();
        parent.expires_at = Some(later);
        let mut child = Constraints::new();
        child.expires_at = Some(now);
        let result = parent.intersect(&child);
        assert_eq!(result.expires_at, Some(now));
    }

    #[test]
    fn max_delegations_takes_the_smaller_value() {
        let mut parent = Constraints::new();
        parent.max_delegations = Some(MaxDelegations::Count(3));
        let mut child = Constraints::new();
        child.max_delegations = Some(MaxDelegations::Count(1));
        let result = parent.intersect(&child);
        assert_eq!(result.max_delegations, Some(MaxDelegations::Count(1)));
    }

    #[test]
    fn unlimited_is_the_max_delegations_identity() {
        let a = MaxDelegations::Count(5);
        assert_eq!(a.intersect(MaxDelegations::Unlimited), a);
    }

    #[test]
    fn unknown_keys_have_child_override_parent() {
        let mut parent = Constraints::new();
        parent.extra.insert("custom".to_string(), serde_json::json!("parent"));
        let mut child = Constraints::new();
        child.extra.insert("custom".to_string(), serde_json::json!("child"));
        let result = parent.intersect(&child);
        assert_eq!(result.extra.get("custom"), Some(&serde_json::json!("child")));
    }
}
