//! Classification of generated policies against live pods.

use std::collections::HashSet;

use serde::Serialize;
use tracedeck_id::PolicyId;

/// Read-only view of a policy as needed for classification.
pub trait PolicyView {
    fn id(&self) -> &PolicyId;

    /// Returns true while the policy is being deleted.
    fn is_terminating(&self) -> bool;

    /// Returns true if at least one workload currently applies the policy.
    fn is_applied(&self) -> bool;

    /// Name of the pod the policy was generated for, if recorded.
    fn generated_for_pod(&self) -> Option<&str>;
}

/// One of the three disjoint policy buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Generated for a pod that is still alive, not applied anywhere.
    Available,
    /// Referenced by at least one active workload.
    Applied,
    /// Generated for a pod that no longer exists, not applied anywhere.
    Dangling,
}

/// A partition of the non-terminating policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets<P> {
    pub available: Vec<P>,
    pub applied: Vec<P>,
    pub dangling: Vec<P>,
}

impl<P> Default for Buckets<P> {
    fn default() -> Self {
        Self {
            available: Vec::new(),
            applied: Vec::new(),
            dangling: Vec::new(),
        }
    }
}

impl<P: PolicyView> Buckets<P> {
    /// Total number of classified policies.
    pub fn len(&self) -> usize {
        self.available.len() + self.applied.len() + self.dangling.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket(&self, which: Bucket) -> &[P] {
        match which {
            Bucket::Available => &self.available,
            Bucket::Applied => &self.applied,
            Bucket::Dangling => &self.dangling,
        }
    }

    pub(crate) fn bucket_mut(&mut self, which: Bucket) -> &mut Vec<P> {
        match which {
            Bucket::Available => &mut self.available,
            Bucket::Applied => &mut self.applied,
            Bucket::Dangling => &mut self.dangling,
        }
    }

    /// Finds which bucket holds the given policy.
    pub fn locate(&self, id: &PolicyId) -> Option<(Bucket, &P)> {
        [Bucket::Available, Bucket::Applied, Bucket::Dangling]
            .into_iter()
            .find_map(|b| self.bucket(b).iter().find(|p| p.id() == id).map(|p| (b, p)))
    }

    /// Iterates over every policy in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &P> {
        self.available
            .iter()
            .chain(self.applied.iter())
            .chain(self.dangling.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut P> {
        self.available
            .iter_mut()
            .chain(self.applied.iter_mut())
            .chain(self.dangling.iter_mut())
    }
}

/// Classify policies into available, applied and dangling buckets.
///
/// Terminating policies are dropped. Input order is preserved within each
/// bucket.
pub fn classify<P, I>(policies: I, live_pods: &HashSet<String>) -> Buckets<P>
where
    P: PolicyView,
    I: IntoIterator<Item = P>,
{
    let mut buckets = Buckets::default();

    for policy in policies {
        if policy.is_terminating() {
            continue;
        }

        if policy.is_applied() {
            buckets.applied.push(policy);
            continue;
        }

        let alive = policy
            .generated_for_pod()
            .is_some_and(|pod| live_pods.contains(pod));
        if alive {
            buckets.available.push(policy);
        } else {
            buckets.dangling.push(policy);
        }
    }

    buckets
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct TestPolicy {
        pub id: PolicyId,
        pub terminating: bool,
        pub applied: bool,
        pub pod: Option<String>,
    }

    impl TestPolicy {
        pub(crate) fn new(name: &str, pod: Option<&str>) -> Self {
            Self {
                id: PolicyId::new("shop", name, format!("uid-{name}")),
                terminating: false,
                applied: false,
                pod: pod.map(str::to_string),
            }
        }

        pub(crate) fn applied(mut self) -> Self {
            self.applied = true;
            self
        }

        pub(crate) fn terminating(mut self) -> Self {
            self.terminating = true;
            self
        }
    }

    impl PolicyView for TestPolicy {
        fn id(&self) -> &PolicyId {
            &self.id
        }

        fn is_terminating(&self) -> bool {
            self.terminating
        }

        fn is_applied(&self) -> bool {
            self.applied
        }

        fn generated_for_pod(&self) -> Option<&str> {
            self.pod.as_deref()
        }
    }

    fn pods(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_buckets() {
        let policies = vec![
            TestPolicy::new("a", Some("web-1")),
            TestPolicy::new("b", Some("gone-1")),
            TestPolicy::new("c", Some("web-1")).applied(),
            TestPolicy::new("d", Some("web-2")).terminating(),
            TestPolicy::new("e", None),
        ];

        let buckets = classify(policies, &pods(&["web-1", "web-2"]));

        let names = |ps: &[TestPolicy]| ps.iter().map(|p| p.id.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&buckets.available), vec!["a"]);
        assert_eq!(names(&buckets.applied), vec!["c"]);
        assert_eq!(names(&buckets.dangling), vec!["b", "e"]);
        assert_eq!(buckets.len(), 4);
    }

    #[test]
    fn test_applied_wins_over_dangling() {
        // An applied policy whose pod is gone is still applied.
        let buckets = classify(
            vec![TestPolicy::new("a", Some("gone")).applied()],
            &pods(&[]),
        );
        assert_eq!(buckets.applied.len(), 1);
        assert!(buckets.dangling.is_empty());
    }

    #[test]
    fn test_locate() {
        let buckets = classify(
            vec![
                TestPolicy::new("a", Some("web-1")),
                TestPolicy::new("b", None),
            ],
            &pods(&["web-1"]),
        );
        let id = PolicyId::new("shop", "b", "uid-b");
        assert_eq!(buckets.locate(&id).map(|(b, _)| b), Some(Bucket::Dangling));
        assert!(buckets
            .locate(&PolicyId::new("shop", "zz", "uid-zz"))
            .is_none());
    }

    fn arb_policy() -> impl Strategy<Value = TestPolicy> {
        (
            "[a-z]{1,6}",
            any::<bool>(),
            any::<bool>(),
            proptest::option::of(0u8..6),
        )
            .prop_map(|(name, terminating, applied, pod)| TestPolicy {
                id: PolicyId::new("shop", name.clone(), format!("uid-{name}")),
                terminating,
                applied,
                pod: pod.map(|i| format!("pod-{i}")),
            })
    }

    proptest! {
        #[test]
        fn prop_buckets_partition_non_terminating(
            policies in proptest::collection::vec(arb_policy(), 0..40),
            live in proptest::collection::hash_set(0u8..6, 0..6),
        ) {
            let live: HashSet<String> = live.into_iter().map(|i| format!("pod-{i}")).collect();
            let expected: Vec<TestPolicy> =
                policies.iter().filter(|p| !p.terminating).cloned().collect();

            let buckets = classify(policies, &live);

            // Union equals the non-terminating input as a multiset.
            let mut got: Vec<String> = buckets.iter().map(|p| format!("{p:?}")).collect();
            let mut want: Vec<String> = expected.iter().map(|p| format!("{p:?}")).collect();
            got.sort();
            want.sort();
            prop_assert_eq!(got, want);

            // Bucket predicates are mutually exclusive, so this also proves disjointness.
            prop_assert!(buckets.applied.iter().all(|p| p.applied));
            prop_assert!(buckets.available.iter().all(|p| !p.applied
                && p.pod.as_ref().is_some_and(|pod| live.contains(pod))));
            prop_assert!(buckets.dangling.iter().all(|p| !p.applied
                && !p.pod.as_ref().is_some_and(|pod| live.contains(pod))));
        }
    }
}
