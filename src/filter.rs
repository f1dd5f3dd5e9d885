//! Client-side filtering of Implementation revisions.
//!
//! The filter is a pipeline of four independent stages; each consumes the
//! output of the previous one and is skipped when its criterion is empty:
//!
//! 1. path pattern (regular expression on the Implementation path),
//! 2. attribute include/exclude,
//! 3. requirements satisfied by the currently available TypeInstances,
//! 4. TypeRefs the Implementation must declare in its `requires` section.
//!
//! Hub implementations without native filtering run the same pipeline, so the
//! functions here work on any candidate list.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::policy::{AttributeFilter, FilterRule, Rule};
use crate::types::{
    AttributeRevision, ImplementationRequirement, ImplementationRevision, ManifestRef, RequirementCombinator,
    RequirementItem, TypeRef,
};

/// TypeRefs of the resources currently available, indexed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableTypeRefs {
    by_path: HashMap<String, HashSet<String>>,
}

impl AvailableTypeRefs {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource Type.
    pub fn insert(&mut self, type_ref: TypeRef) {
        self.by_path.entry(type_ref.path).or_default().insert(type_ref.revision);
    }

    /// Returns true if a resource of the given Type is available.
    ///
    /// An empty revision on `type_ref` matches any available revision.
    #[must_use]
    pub fn contains(&self, type_ref: &TypeRef) -> bool {
        let Some(revisions) = self.by_path.get(&type_ref.path) else {
            return false;
        };
        type_ref.revision.is_empty() || revisions.contains(&type_ref.revision)
    }

    /// Returns true if no resource is available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

impl FromIterator<TypeRef> for AvailableTypeRefs {
    fn from_iter<I: IntoIterator<Item = TypeRef>>(iter: I) -> Self {
        let mut out = Self::new();
        out.extend(iter);
        out
    }
}

impl Extend<TypeRef> for AvailableTypeRefs {
    fn extend<I: IntoIterator<Item = TypeRef>>(&mut self, iter: I) {
        for type_ref in iter {
            self.insert(type_ref);
        }
    }
}

/// Criteria narrowing a list of Implementation revisions.
///
/// # Example
/// ```rust,ignore
/// let filter = ImplementationFilter::new()
///     .path_pattern("cap.implementation.bitnami.*")
///     .attribute(&AttributeFilter::exclude("cap.attribute.cloud.provider.aws", None))
///     .requirements_satisfied_by(available);
/// let candidates = filter_implementation_revisions(candidates, &filter);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImplementationFilter {
    path_pattern: Option<String>,
    included_attributes: HashMap<String, Option<String>>,
    excluded_attributes: HashMap<String, Option<String>>,
    requirements_satisfied_by: AvailableTypeRefs,
    requires: Vec<ManifestRef>,
}

impl ImplementationFilter {
    /// Creates a filter that keeps every candidate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the filter for a policy rule.
    ///
    /// `available` is used as is. TypeInstances the rule injects do not count
    /// towards requirements satisfaction.
    #[must_use]
    pub fn for_rule(rule: &Rule, available: AvailableTypeRefs) -> Self {
        let constraints = &rule.implementation_constraints;

        let mut filter = Self::new().requirements_satisfied_by(available);
        if let Some(pattern) = &constraints.path {
            filter = filter.path_pattern(pattern.clone());
        }
        for attr in constraints.attributes.iter().flatten() {
            filter = filter.attribute(attr);
        }
        for req in constraints.requires.iter().flatten() {
            filter = filter.require(req.clone());
        }
        filter
    }

    /// Keep only candidates whose path matches `pattern`.
    #[must_use]
    pub fn path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.path_pattern = Some(pattern.into());
        self
    }

    /// Add an attribute include/exclude criterion.
    #[must_use]
    pub fn attribute(mut self, filter: &AttributeFilter) -> Self {
        let target = match filter.rule {
            FilterRule::Include => &mut self.included_attributes,
            FilterRule::Exclude => &mut self.excluded_attributes,
        };
        target.insert(filter.path.clone(), filter.revision.clone());
        self
    }

    /// Keep only candidates whose requirements are satisfied by `available`.
    #[must_use]
    pub fn requirements_satisfied_by(mut self, available: AvailableTypeRefs) -> Self {
        self.requirements_satisfied_by = available;
        self
    }

    /// Keep only candidates declaring `type_ref` in their `requires` section.
    #[must_use]
    pub fn require(mut self, type_ref: ManifestRef) -> Self {
        self.requires.push(type_ref);
        self
    }

    /// Returns true if no criterion is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path_pattern.is_none()
            && self.included_attributes.is_empty()
            && self.excluded_attributes.is_empty()
            && self.requirements_satisfied_by.is_empty()
            && self.requires.is_empty()
    }
}

/// Runs the filter pipeline. Order of the surviving candidates is preserved.
#[must_use]
pub fn filter_implementation_revisions(
    revs: Vec<ImplementationRevision>,
    filter: &ImplementationFilter,
) -> Vec<ImplementationRevision> {
    let revs = filter_by_path_pattern(revs, filter.path_pattern.as_deref());
    let revs = filter_by_attributes(revs, &filter.included_attributes, &filter.excluded_attributes);
    let revs = filter_by_requirements_satisfied_by(revs, &filter.requirements_satisfied_by);
    filter_by_requires(revs, &filter.requires)
}

fn filter_by_path_pattern(revs: Vec<ImplementationRevision>, pattern: Option<&str>) -> Vec<ImplementationRevision> {
    let Some(pattern) = pattern else {
        return revs;
    };

    // An invalid pattern matches nothing.
    let Ok(re) = Regex::new(pattern) else {
        tracing::debug!(pattern, "ignoring candidates for invalid Implementation path pattern");
        return Vec::new();
    };

    revs.into_iter()
        .filter(|rev| rev.path().is_some_and(|path| re.is_match(path)))
        .collect()
}

fn filter_by_attributes(
    revs: Vec<ImplementationRevision>,
    included: &HashMap<String, Option<String>>,
    excluded: &HashMap<String, Option<String>>,
) -> Vec<ImplementationRevision> {
    if included.is_empty() && excluded.is_empty() {
        return revs;
    }

    revs.into_iter()
        .filter(|rev| {
            let attrs = rev.attributes();
            !contains_at_least_one(attrs, excluded) && contains_all(attrs, included)
        })
        .collect()
}

fn attribute_matches(path: &str, revision: Option<&String>, attr: &AttributeRevision) -> bool {
    attr.path == path && revision.map_or(true, |rev| *rev == attr.revision)
}

fn contains_at_least_one(attrs: &[AttributeRevision], expected: &HashMap<String, Option<String>>) -> bool {
    attrs.iter().any(|attr| {
        expected
            .get(&attr.path)
            .is_some_and(|rev| attribute_matches(&attr.path, rev.as_ref(), attr))
    })
}

fn contains_all(attrs: &[AttributeRevision], expected: &HashMap<String, Option<String>>) -> bool {
    expected
        .iter()
        .all(|(path, rev)| attrs.iter().any(|attr| attribute_matches(path, rev.as_ref(), attr)))
}

fn filter_by_requirements_satisfied_by(
    revs: Vec<ImplementationRevision>,
    available: &AvailableTypeRefs,
) -> Vec<ImplementationRevision> {
    if available.is_empty() {
        return revs;
    }

    revs.into_iter()
        .filter(|rev| {
            rev.spec
                .as_ref()
                .is_some_and(|spec| spec.requires.iter().all(|req| is_requirement_satisfied(req, available)))
        })
        .collect()
}

/// Returns true if all three combinators of `req` hold against `available`.
#[must_use]
pub fn is_requirement_satisfied(req: &ImplementationRequirement, available: &AvailableTypeRefs) -> bool {
    RequirementCombinator::ALL
        .iter()
        .all(|&combinator| is_combinator_satisfied(combinator, req.items(combinator), available))
}

/// Evaluates a single combinator. Empty lists are vacuously satisfied and
/// items without a TypeRef are ignored.
fn is_combinator_satisfied(
    combinator: RequirementCombinator,
    items: &[RequirementItem],
    available: &AvailableTypeRefs,
) -> bool {
    if items.is_empty() {
        return true;
    }

    let typed: Vec<&TypeRef> = items.iter().filter_map(|item| item.type_ref.as_ref()).collect();
    let satisfied = typed.iter().filter(|type_ref| available.contains(type_ref)).count();

    match combinator {
        RequirementCombinator::AllOf => satisfied == typed.len(),
        RequirementCombinator::AnyOf => satisfied > 0,
        // Exactly one. Do not relax to "at least one".
        RequirementCombinator::OneOf => satisfied == 1,
    }
}

fn filter_by_requires(revs: Vec<ImplementationRevision>, requires: &[ManifestRef]) -> Vec<ImplementationRevision> {
    if requires.is_empty() {
        return revs;
    }

    revs.into_iter()
        .filter(|rev| {
            requires.iter().all(|expected| {
                rev.requires()
                    .iter()
                    .flat_map(ImplementationRequirement::all_items)
                    .filter_map(|item| item.type_ref.as_ref())
                    .any(|type_ref| expected.matches(type_ref))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ImplementationConstraints, InjectData, RequiredTypeInstanceToInject};

    fn tr(path: &str, rev: &str) -> TypeRef {
        TypeRef::new(path, rev)
    }

    fn one_of(items: Vec<TypeRef>) -> ImplementationRequirement {
        ImplementationRequirement {
            prefix: "cap.type".to_string(),
            one_of: items.into_iter().map(RequirementItem::new).collect(),
            ..ImplementationRequirement::default()
        }
    }

    fn paths(revs: &[ImplementationRevision]) -> Vec<&str> {
        revs.iter().filter_map(ImplementationRevision::path).collect()
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let revs = vec![
            ImplementationRevision::new("cap.implementation.a", "0.1.0"),
            ImplementationRevision::default(),
        ];
        let filter = ImplementationFilter::new();
        assert!(filter.is_empty());
        assert_eq!(filter_implementation_revisions(revs.clone(), &filter), revs);
    }

    #[test]
    fn path_pattern_is_a_regex() {
        let revs = vec![
            ImplementationRevision::new("cap.implementation.bitnami.postgresql.install", "0.1.0"),
            ImplementationRevision::new("cap.implementation.gcp.cloudsql.postgresql.install", "0.1.0"),
            ImplementationRevision {
                metadata: None,
                ..ImplementationRevision::default()
            },
        ];

        let filter = ImplementationFilter::new().path_pattern("cap.implementation.bitnami.*");
        let got = filter_implementation_revisions(revs, &filter);
        assert_eq!(paths(&got), vec!["cap.implementation.bitnami.postgresql.install"]);
    }

    #[test]
    fn invalid_path_pattern_matches_nothing() {
        let revs = vec![ImplementationRevision::new("cap.implementation.a", "0.1.0")];
        let filter = ImplementationFilter::new().path_pattern("cap.(");
        assert!(filter_implementation_revisions(revs, &filter).is_empty());
    }

    #[test]
    fn attributes_include_all_and_exclude_any() {
        let gcp_stateful = ImplementationRevision::new("cap.implementation.gcp", "0.1.0")
            .with_attribute("cap.attribute.cloud.provider.gcp", "0.1.1")
            .with_attribute("cap.core.attribute.workload.stateful", "0.1.0");
        let gcp_only = ImplementationRevision::new("cap.implementation.gcp-only", "0.1.0")
            .with_attribute("cap.attribute.cloud.provider.gcp", "0.1.1");
        let old_gcp = ImplementationRevision::new("cap.implementation.old-gcp", "0.1.0")
            .with_attribute("cap.attribute.cloud.provider.gcp", "0.1.0")
            .with_attribute("cap.core.attribute.workload.stateful", "0.1.0");

        let filter = ImplementationFilter::new()
            .attribute(&AttributeFilter::include("cap.attribute.cloud.provider.gcp", Some("0.1.1")))
            .attribute(&AttributeFilter::include("cap.core.attribute.workload.stateful", None));

        let got = filter_implementation_revisions(vec![gcp_stateful, gcp_only, old_gcp], &filter);
        assert_eq!(paths(&got), vec!["cap.implementation.gcp"]);
    }

    #[test]
    fn exclude_wins_over_include() {
        let both = ImplementationRevision::new("cap.implementation.both", "0.1.0")
            .with_attribute("cap.attribute.cloud.provider.gcp", "0.1.0")
            .with_attribute("cap.attribute.cloud.provider.aws", "0.1.0");
        let gcp = ImplementationRevision::new("cap.implementation.gcp", "0.1.0")
            .with_attribute("cap.attribute.cloud.provider.gcp", "0.1.0");

        let filter = ImplementationFilter::new()
            .attribute(&AttributeFilter::include("cap.attribute.cloud.provider.gcp", None))
            .attribute(&AttributeFilter::exclude("cap.attribute.cloud.provider.aws", None));

        let got = filter_implementation_revisions(vec![both, gcp], &filter);
        assert_eq!(paths(&got), vec!["cap.implementation.gcp"]);
    }

    #[test]
    fn exclude_honours_revision() {
        let rev = ImplementationRevision::new("cap.implementation.a", "0.1.0")
            .with_attribute("cap.attribute.cloud.provider.aws", "0.2.0");
        let filter = ImplementationFilter::new()
            .attribute(&AttributeFilter::exclude("cap.attribute.cloud.provider.aws", Some("0.1.0")));
        assert_eq!(filter_implementation_revisions(vec![rev], &filter).len(), 1);
    }

    #[test]
    fn one_of_requires_exactly_one() {
        let a = tr("cap.type.a", "0.1.0");
        let b = tr("cap.type.b", "0.1.0");
        let rev = ImplementationRevision::new("cap.implementation.x", "0.1.0")
            .with_requirement(one_of(vec![a.clone(), b.clone()]));

        let run = |available: Vec<TypeRef>| {
            let filter = ImplementationFilter::new().requirements_satisfied_by(available.into_iter().collect());
            filter_implementation_revisions(vec![rev.clone()], &filter).len()
        };

        assert_eq!(run(vec![a.clone()]), 1);
        assert_eq!(run(vec![b.clone()]), 1);
        assert_eq!(run(vec![a, b]), 0);
        assert_eq!(run(vec![tr("cap.type.c", "0.1.0")]), 0);
    }

    #[test]
    fn all_of_and_any_of() {
        let a = tr("cap.type.a", "0.1.0");
        let b = tr("cap.type.b", "0.1.0");
        let req = ImplementationRequirement {
            prefix: "cap.type".to_string(),
            all_of: vec![RequirementItem::new(a.clone())],
            any_of: vec![RequirementItem::new(b.clone()), RequirementItem::new(tr("cap.type.c", "0.1.0"))],
            one_of: Vec::new(),
        };

        let only_a: AvailableTypeRefs = vec![a.clone()].into_iter().collect();
        assert!(!is_requirement_satisfied(&req, &only_a));

        let a_and_b: AvailableTypeRefs = vec![a, b].into_iter().collect();
        assert!(is_requirement_satisfied(&req, &a_and_b));
    }

    #[test]
    fn every_requirement_group_must_hold() {
        let a = tr("cap.type.a", "0.1.0");
        let rev = ImplementationRevision::new("cap.implementation.x", "0.1.0")
            .with_requirement(one_of(vec![a.clone()]))
            .with_requirement(one_of(vec![tr("cap.type.missing", "0.1.0")]));
        let filter = ImplementationFilter::new().requirements_satisfied_by(vec![a].into_iter().collect());
        assert!(filter_implementation_revisions(vec![rev], &filter).is_empty());
    }

    #[test]
    fn revision_must_match_unless_item_leaves_it_empty() {
        let available: AvailableTypeRefs = vec![tr("cap.type.a", "0.1.0")].into_iter().collect();
        assert!(available.contains(&tr("cap.type.a", "0.1.0")));
        assert!(available.contains(&tr("cap.type.a", "")));
        assert!(!available.contains(&tr("cap.type.a", "0.2.0")));
    }

    #[test]
    fn no_requirements_pass_but_missing_spec_is_dropped() {
        let plain = ImplementationRevision::new("cap.implementation.plain", "0.1.0");
        let no_spec = ImplementationRevision {
            spec: None,
            ..ImplementationRevision::new("cap.implementation.no-spec", "0.1.0")
        };
        let filter =
            ImplementationFilter::new().requirements_satisfied_by(vec![tr("cap.type.a", "0.1.0")].into_iter().collect());
        let got = filter_implementation_revisions(vec![plain, no_spec], &filter);
        assert_eq!(paths(&got), vec!["cap.implementation.plain"]);
    }

    #[test]
    fn requires_must_be_declared() {
        let sa = tr("cap.type.gcp.auth.service-account", "0.1.0");
        let declares = ImplementationRevision::new("cap.implementation.gcp", "0.1.0").with_requirement(
            ImplementationRequirement {
                prefix: "cap.type.gcp".to_string(),
                all_of: vec![RequirementItem::aliased(sa.clone(), "gcp-sa")],
                ..ImplementationRequirement::default()
            },
        );
        let plain = ImplementationRevision::new("cap.implementation.plain", "0.1.0");

        let filter = ImplementationFilter::new().require(ManifestRef::path("cap.type.gcp.auth.service-account"));
        let got = filter_implementation_revisions(vec![declares.clone(), plain], &filter);
        assert_eq!(paths(&got), vec!["cap.implementation.gcp"]);

        let filter = ImplementationFilter::new().require(ManifestRef::exact("cap.type.gcp.auth.service-account", "0.2.0"));
        assert!(filter_implementation_revisions(vec![declares], &filter).is_empty());
    }

    #[test]
    fn for_rule_applies_constraints() {
        let rule = Rule::new(ImplementationConstraints {
            path: Some("cap.implementation.gcp.*".to_string()),
            requires: Some(vec![ManifestRef::path("cap.type.gcp.auth.service-account")]),
            attributes: Some(vec![AttributeFilter::exclude("cap.attribute.deprecated", None)]),
        });
        let sa = tr("cap.type.gcp.auth.service-account", "0.1.0");
        let declares = |path: &str| {
            ImplementationRevision::new(path, "0.1.0").with_requirement(ImplementationRequirement {
                prefix: "cap.type.gcp".to_string(),
                all_of: vec![RequirementItem::aliased(sa.clone(), "gcp-sa")],
                ..ImplementationRequirement::default()
            })
        };

        let filter = ImplementationFilter::for_rule(&rule, std::iter::once(sa.clone()).collect());
        let got = filter_implementation_revisions(
            vec![
                declares("cap.implementation.gcp.cloudsql"),
                declares("cap.implementation.gcp.old").with_attribute("cap.attribute.deprecated", "0.1.0"),
                declares("cap.implementation.aws.rds"),
                ImplementationRevision::new("cap.implementation.gcp.bare", "0.1.0"),
            ],
            &filter,
        );
        assert_eq!(paths(&got), vec!["cap.implementation.gcp.cloudsql"]);
    }

    #[test]
    fn for_rule_does_not_count_injected_type_instances_as_available() {
        let gcp = tr("cap.type.gcp.auth.service-account", "0.1.0");
        let aws = tr("cap.type.aws.auth.credentials", "0.1.0");
        let rule = Rule::default().with_inject(InjectData {
            required_type_instances: vec![RequiredTypeInstanceToInject::new("gcp-sa-id", gcp.clone())],
            ..InjectData::default()
        });
        let rev = ImplementationRevision::new("cap.implementation.cloud", "0.1.0").with_requirement(one_of(vec![
            gcp.clone(),
            aws.clone(),
        ]));
        let available: AvailableTypeRefs = std::iter::once(aws).collect();

        let plain = ImplementationFilter::new().requirements_satisfied_by(available.clone());
        assert_eq!(filter_implementation_revisions(vec![rev.clone()], &plain).len(), 1);

        let filter = ImplementationFilter::for_rule(&rule, available);
        assert_eq!(filter_implementation_revisions(vec![rev.clone()], &filter).len(), 1);

        // Injection alone does not satisfy a requirement missing from the Hub.
        let rev = ImplementationRevision::new("cap.implementation.gcp", "0.1.0").with_requirement(
            ImplementationRequirement {
                prefix: "cap.type.gcp".to_string(),
                all_of: vec![RequirementItem::new(gcp)],
                ..ImplementationRequirement::default()
            },
        );
        let filter = ImplementationFilter::for_rule(&rule, std::iter::once(tr("cap.type.other", "0.1.0")).collect());
        assert!(filter_implementation_revisions(vec![rev], &filter).is_empty());
    }
}
