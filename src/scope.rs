//! Scope resolution: which calls belong to an account or opportunity.
//!
//! CRM cross-references on calls are frequently missing, so resolution runs an
//! ordered list of tiers and stops at the first that returns anything:
//! 1. Exact cross-reference to the scoped opportunity (or account)
//! 2. Parent-account cross-reference, when scoping to an opportunity whose
//!    account is known
//! 3. Fuzzy match of the display name against title and participants
//!
//! Pure and deterministic; input order is preserved.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::CallRecord;

/// Entity the caller wants signals for. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub account_id: Option<String>,
    pub opportunity_id: Option<String>,
    pub account_name: Option<String>,
    pub opportunity_name: Option<String>,
}

impl Scope {
    pub fn opportunity(opportunity_id: &str, account_id: Option<&str>) -> Self {
        Self {
            opportunity_id: Some(opportunity_id.to_string()),
            account_id: account_id.map(String::from),
            ..Default::default()
        }
    }

    pub fn account(account_id: &str) -> Self {
        Self {
            account_id: Some(account_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_account_name(mut self, name: &str) -> Self {
        self.account_name = Some(name.to_string());
        self
    }

    pub fn with_opportunity_name(mut self, name: &str) -> Self {
        self.opportunity_name = Some(name.to_string());
        self
    }

    /// True when neither an opportunity nor an account id is known.
    pub fn is_global(&self) -> bool {
        self.opportunity_id.is_none() && self.account_id.is_none()
    }

    /// Name used for fuzzy matching.
    pub fn display_name(&self) -> Option<&str> {
        let name = if self.opportunity_id.is_some() {
            self.opportunity_name.as_deref().or(self.account_name.as_deref())
        } else {
            self.account_name.as_deref().or(self.opportunity_name.as_deref())
        };
        name.filter(|n| !n.trim().is_empty())
    }
}

/// Which tier produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    /// Call carries the scoped opportunity (or account) id.
    ExactReference,
    /// Call carries the scoped opportunity's parent account id.
    ParentAccount,
    /// Display-name tokens found in title or participants.
    FuzzyName,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::ExactReference => "exact-reference",
            MatchMethod::ParentAccount => "parent-account",
            MatchMethod::FuzzyName => "fuzzy-name",
        }
    }
}

/// One resolution strategy.
pub trait MatchTier: Sync {
    fn method(&self) -> MatchMethod;

    /// Whether this tier can run for `scope` at all.
    fn applies(&self, scope: &Scope) -> bool;

    fn matches(&self, call: &CallRecord, scope: &Scope) -> bool;
}

pub struct ExactReference;

impl MatchTier for ExactReference {
    fn method(&self) -> MatchMethod {
        MatchMethod::ExactReference
    }

    fn applies(&self, scope: &Scope) -> bool {
        !scope.is_global()
    }

    fn matches(&self, call: &CallRecord, scope: &Scope) -> bool {
        match (&scope.opportunity_id, &scope.account_id) {
            (Some(opp), _) => call.cross_references.has_opportunity(opp),
            (None, Some(acc)) => call.cross_references.has_account(acc),
            (None, None) => false,
        }
    }
}

pub struct ParentAccount;

impl MatchTier for ParentAccount {
    fn method(&self) -> MatchMethod {
        MatchMethod::ParentAccount
    }

    fn applies(&self, scope: &Scope) -> bool {
        scope.opportunity_id.is_some() && scope.account_id.is_some()
    }

    fn matches(&self, call: &CallRecord, scope: &Scope) -> bool {
        scope
            .account_id
            .as_deref()
            .is_some_and(|acc| call.cross_references.has_account(acc))
    }
}

pub struct FuzzyName;

impl FuzzyName {
    /// Distinct lowercase tokens longer than two characters.
    pub fn tokens(name: &str) -> BTreeSet<String> {
        name.split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| t.chars().count() > 2)
            .collect()
    }

    /// Matches needed: one for the global case, otherwise up to two.
    pub fn required_matches(scope: &Scope, token_count: usize) -> usize {
        if scope.is_global() {
            1
        } else {
            token_count.min(2)
        }
    }
}

impl MatchTier for FuzzyName {
    fn method(&self) -> MatchMethod {
        MatchMethod::FuzzyName
    }

    fn applies(&self, scope: &Scope) -> bool {
        scope
            .display_name()
            .is_some_and(|name| !Self::tokens(name).is_empty())
    }

    fn matches(&self, call: &CallRecord, scope: &Scope) -> bool {
        let Some(name) = scope.display_name() else {
            return false;
        };
        let tokens = Self::tokens(name);
        let required = Self::required_matches(scope, tokens.len());
        if required == 0 {
            return false;
        }

        let haystack = format!("{} {}", call.title.to_lowercase(), call.participant_text());
        let found = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
        found >= required
    }
}

/// Tiers in the order they are tried.
pub static TIERS: [&dyn MatchTier; 3] = [&ExactReference, &ParentAccount, &FuzzyName];

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub calls: Vec<CallRecord>,
    /// `None` when no tier matched anything.
    pub method: Option<MatchMethod>,
}

/// Calls belonging to `scope`, from the first tier that matches anything.
pub fn resolve(candidates: &[CallRecord], scope: &Scope) -> Vec<CallRecord> {
    resolve_with_method(candidates, scope).calls
}

pub fn resolve_with_method(candidates: &[CallRecord], scope: &Scope) -> Resolution {
    for tier in TIERS.iter() {
        if !tier.applies(scope) {
            continue;
        }
        let calls: Vec<CallRecord> = candidates
            .iter()
            .filter(|call| tier.matches(call, scope))
            .cloned()
            .collect();
        if !calls.is_empty() {
            return Resolution {
                calls,
                method: Some(tier.method()),
            };
        }
    }
    Resolution::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gong::fake::call;

    fn ids(calls: &[CallRecord]) -> Vec<&str> {
        calls.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_exact_opportunity_reference_preserves_order() {
        let candidates = vec![
            call("c1", "Kickoff").with_opportunity("opp-1", "acc-1"),
            call("c2", "Other deal").with_opportunity("opp-2", "acc-1"),
            call("c3", "Pricing").with_opportunity("opp-1", "acc-1"),
        ];

        let scope = Scope::opportunity("opp-1", Some("acc-1"));
        let resolution = resolve_with_method(&candidates, &scope);
        assert_eq!(ids(&resolution.calls), vec!["c1", "c3"]);
        assert_eq!(resolution.method, Some(MatchMethod::ExactReference));
    }

    #[test]
    fn test_exact_account_reference() {
        let candidates = vec![
            call("c1", "Sync").with_account("acc-1"),
            call("c2", "Sync").with_account("acc-2"),
        ];
        assert_eq!(ids(&resolve(&candidates, &Scope::account("acc-2"))), vec!["c2"]);
    }

    #[test]
    fn test_parent_account_fallback() {
        let candidates = vec![
            call("c1", "QBR").with_account("acc-1"),
            call("c2", "QBR").with_account("acc-9"),
            call("c3", "Unlinked"),
        ];

        let scope = Scope::opportunity("opp-1", Some("acc-1"));
        let resolution = resolve_with_method(&candidates, &scope);
        assert_eq!(ids(&resolution.calls), vec!["c1"]);
        assert_eq!(resolution.method, Some(MatchMethod::ParentAccount));
    }

    #[test]
    fn test_parent_account_needs_known_account() {
        let candidates = vec![call("c1", "QBR").with_account("acc-1")];
        let scope = Scope::opportunity("opp-1", None);
        assert!(!ParentAccount.applies(&scope));
        assert!(resolve(&candidates, &scope).is_empty());
    }

    #[test]
    fn test_parent_account_skipped_for_account_scope() {
        assert!(!ParentAccount.applies(&Scope::account("acc-1")));
    }

    #[test]
    fn test_earlier_tier_wins_over_fuzzy() {
        let candidates = vec![
            call("c1", "Acme renewal").with_opportunity("opp-1", "acc-1"),
            call("c2", "Acme renewal planning"),
        ];
        let scope =
            Scope::opportunity("opp-1", Some("acc-1")).with_opportunity_name("Acme Renewal 2026");
        let resolution = resolve_with_method(&candidates, &scope);
        assert_eq!(ids(&resolution.calls), vec!["c1"]);
        assert_eq!(resolution.method, Some(MatchMethod::ExactReference));
    }

    #[test]
    fn test_fuzzy_scoped_requires_two_tokens() {
        let candidates = vec![
            call("c1", "Acme sync"),
            call("c2", "Renewal planning").with_participant("Dana", "dana@acme.com"),
            call("c3", "Globex intro"),
        ];
        let scope = Scope::opportunity("opp-404", Some("acc-404"))
            .with_opportunity_name("Acme Corp Renewal");

        let resolution = resolve_with_method(&candidates, &scope);
        assert_eq!(ids(&resolution.calls), vec!["c2"]);
        assert_eq!(resolution.method, Some(MatchMethod::FuzzyName));
    }

    #[test]
    fn test_fuzzy_uses_account_name_for_account_scope() {
        let candidates = vec![call("c1", "Initech Holdings weekly")];
        let scope = Scope::account("acc-404")
            .with_account_name("Initech Holdings")
            .with_opportunity_name("Something else entirely");
        assert_eq!(ids(&resolve(&candidates, &scope)), vec!["c1"]);
    }

    #[test]
    fn test_fuzzy_global_requires_one_token() {
        let candidates = vec![call("c1", "Globex intro"), call("c2", "Initech intro")];
        let scope = Scope::default().with_account_name("Globex Corporation");
        assert_eq!(ids(&resolve(&candidates, &scope)), vec!["c1"]);
    }

    #[test]
    fn test_fuzzy_single_token_name_needs_one_match() {
        let candidates = vec![call("c1", "Umbrella check-in")];
        let scope = Scope::account("acc-404").with_account_name("Umbrella");
        assert_eq!(ids(&resolve(&candidates, &scope)), vec!["c1"]);
    }

    #[test]
    fn test_short_tokens_ignored() {
        assert_eq!(
            FuzzyName::tokens("IT of Acme Co"),
            BTreeSet::from(["acme".to_string()])
        );
        let scope = Scope::default().with_account_name("AB IT");
        assert!(!FuzzyName.applies(&scope));
    }

    #[test]
    fn test_no_match_is_empty() {
        let candidates = vec![call("c1", "Unrelated").with_account("acc-2")];
        let scope =
            Scope::opportunity("opp-1", Some("acc-1")).with_opportunity_name("Acme Renewal");
        let resolution = resolve_with_method(&candidates, &scope);
        assert!(resolution.calls.is_empty());
        assert_eq!(resolution.method, None);
    }

    #[test]
    fn test_global_scope_without_name_matches_nothing() {
        let candidates = vec![call("c1", "Anything")];
        assert!(resolve(&candidates, &Scope::default()).is_empty());
    }
}
