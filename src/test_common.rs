#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use maplit::hashmap;

use crate::big_segments::{BigSegmentMembership, BigSegmentsStatus};
use crate::flag::Flag;
use crate::queries::Queries;
use crate::segment::Segment;
use crate::{PrerequisiteEvent, PrerequisiteEventRecorder};

/// An in-memory snapshot of flags and segments, with an optional canned big-segment answer.
pub struct TestQueries {
    flags: HashMap<String, Arc<Flag>>,
    segments: HashMap<String, Arc<Segment>>,
    big_segments: Option<(BigSegmentMembership, BigSegmentsStatus)>,
    big_segment_queries: AtomicUsize,
}

fn flag(json: &str) -> Arc<Flag> {
    Arc::new(serde_json::from_str(json).unwrap())
}

fn segment(json: &str) -> Arc<Segment> {
    Arc::new(serde_json::from_str(json).unwrap())
}

impl TestQueries {
    pub fn new() -> Self {
        let flags = hashmap! {
            "flagWithTarget".to_string() => flag(r#"{
                "key": "flagWithTarget",
                "version": 42,
                "on": false,
                "targets": [{"values": ["bob"], "variation": 0}],
                "rules": [],
                "prerequisites": [],
                "fallthrough": {"variation": 1},
                "offVariation": 0,
                "variations": [false, true],
                "clientSide": true,
                "salt": "salty"
            }"#),
            "flagWithRuleExclusion".to_string() => flag(r#"{
                "key": "flagWithRuleExclusion",
                "version": 42,
                "on": true,
                "rules": [{
                    "id": "rule-with-exclusion",
                    "variation": 0,
                    "trackEvents": true,
                    "clauses": [{"attribute": "key", "op": "in", "values": ["alice"]}]
                }],
                "fallthrough": {"variation": 1},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty",
                "trackEvents": false,
                "trackEventsFallthrough": true
            }"#),
            "flagWithExperiment".to_string() => flag(r#"{
                "key": "flagWithExperiment",
                "version": 42,
                "on": true,
                "fallthrough": {
                    "rollout": {
                        "kind": "experiment",
                        "seed": 61,
                        "variations": [
                            {"variation": 0, "weight": 10000, "untracked": false},
                            {"variation": 1, "weight": 20000, "untracked": false},
                            {"variation": 0, "weight": 70000, "untracked": true}
                        ]
                    }
                },
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty",
                "trackEventsFallthrough": false
            }"#),
            "flagWithContextTarget".to_string() => flag(r#"{
                "key": "flagWithContextTarget",
                "version": 1,
                "on": true,
                "targets": [{"values": ["bob"], "variation": 0}],
                "contextTargets": [
                    {"contextKind": "org", "values": ["o1"], "variation": 0},
                    {"contextKind": "user", "values": [], "variation": 0}
                ],
                "fallthrough": {"variation": 1},
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithTargetAndRule".to_string() => flag(r#"{
                "key": "flagWithTargetAndRule",
                "version": 1,
                "on": true,
                "targets": [{"values": ["alice"], "variation": 0}],
                "rules": [{
                    "id": "key-rule",
                    "variation": 1,
                    "clauses": [{"attribute": "key", "op": "in", "values": ["alice", "bob"]}]
                }],
                "fallthrough": {"variation": 2},
                "variations": ["zero", "one", "two"],
                "salt": "salty"
            }"#),
            "flagWithMissingPrereq".to_string() => flag(r#"{
                "key": "flagWithMissingPrereq",
                "version": 1,
                "on": true,
                "prerequisites": [{"key": "badPrereq", "variation": 1}],
                "fallthrough": {"variation": 1},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithOffPrereq".to_string() => flag(r#"{
                "key": "flagWithOffPrereq",
                "version": 1,
                "on": true,
                "prerequisites": [{"key": "offPrereq", "variation": 1}],
                "fallthrough": {"variation": 1},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "offPrereq".to_string() => flag(r#"{
                "key": "offPrereq",
                "version": 1,
                "on": false,
                "fallthrough": {"variation": 1},
                "offVariation": 1,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "prereq".to_string() => flag(r#"{
                "key": "prereq",
                "version": 1,
                "on": true,
                "fallthrough": {"variation": 1},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithSatisfiedPrereq".to_string() => flag(r#"{
                "key": "flagWithSatisfiedPrereq",
                "version": 1,
                "on": true,
                "prerequisites": [{"key": "prereq", "variation": 1}],
                "fallthrough": {"variation": 1},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithNestedPrereq".to_string() => flag(r#"{
                "key": "flagWithNestedPrereq",
                "version": 1,
                "on": true,
                "prerequisites": [{"key": "flagWithSatisfiedPrereq", "variation": 1}],
                "fallthrough": {"variation": 1},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithSegmentMatchRule".to_string() => flag(r#"{
                "key": "flagWithSegmentMatchRule",
                "version": 1,
                "on": true,
                "rules": [{
                    "id": "segment-rule",
                    "variation": 1,
                    "clauses": [{"attribute": "key", "op": "segmentMatch", "values": ["segment"]}]
                }],
                "fallthrough": {"variation": 0},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithPrereqWhichDuplicatesSegmentRuleCheck".to_string() => flag(r#"{
                "key": "flagWithPrereqWhichDuplicatesSegmentRuleCheck",
                "version": 1,
                "on": true,
                "prerequisites": [{"key": "flagWithSegmentMatchRule", "variation": 1}],
                "rules": [{
                    "id": "segment-rule",
                    "variation": 1,
                    "clauses": [{"attribute": "key", "op": "segmentMatch", "values": ["segment"]}]
                }],
                "fallthrough": {"variation": 0},
                "offVariation": 0,
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithInRule".to_string() => flag(r#"{
                "key": "flagWithInRule",
                "version": 1,
                "on": true,
                "rules": [{
                    "id": "in-rule",
                    "variation": 0,
                    "clauses": [{"attribute": "groups", "op": "in", "values": ["b"]}]
                }],
                "fallthrough": {"variation": 1},
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "flagWithMalformedRule".to_string() => flag(r#"{
                "key": "flagWithMalformedRule",
                "version": 1,
                "on": true,
                "rules": [{
                    "id": "no-variation",
                    "clauses": [{"attribute": "key", "op": "in", "values": ["u"]}]
                }],
                "fallthrough": {"variation": 1},
                "variations": [false, true],
                "salt": "salty"
            }"#),
            "hashKey".to_string() => flag(r#"{
                "key": "hashKey",
                "version": 1,
                "on": true,
                "fallthrough": {
                    "rollout": {
                        "variations": [
                            {"variation": 0, "weight": 60000},
                            {"variation": 1, "weight": 40000}
                        ]
                    }
                },
                "variations": ["a", "b"],
                "salt": "saltyA"
            }"#),
        };

        let segments = hashmap! {
            "segment".to_string() => segment(r#"{
                "key": "segment",
                "version": 1,
                "included": ["alice"],
                "salt": "salty"
            }"#),
        };

        TestQueries {
            flags,
            segments,
            big_segments: None,
            big_segment_queries: AtomicUsize::new(0),
        }
    }

    /// A snapshot holding exactly the given flag and segment JSON documents.
    pub fn from_json(flags: &[&str], segments: &[&str]) -> Self {
        let flags = flags
            .iter()
            .map(|json| flag(json))
            .map(|f| (f.key.clone(), f))
            .collect();
        let segments = segments
            .iter()
            .map(|json| segment(json))
            .map(|s| (s.key.clone(), s))
            .collect();
        TestQueries {
            flags,
            segments,
            big_segments: None,
            big_segment_queries: AtomicUsize::new(0),
        }
    }

    pub fn with_segments(segments: Vec<Segment>) -> Self {
        TestQueries {
            flags: HashMap::new(),
            segments: segments
                .into_iter()
                .map(|s| (s.key.clone(), Arc::new(s)))
                .collect(),
            big_segments: None,
            big_segment_queries: AtomicUsize::new(0),
        }
    }

    /// Answers every big-segment query with `membership` and `status`.
    pub fn with_big_segments(
        mut self,
        membership: BigSegmentMembership,
        status: BigSegmentsStatus,
    ) -> Self {
        self.big_segments = Some((membership, status));
        self
    }

    pub fn get_flag(&self, key: &str) -> Arc<Flag> {
        self.flags
            .get(key)
            .cloned()
            .unwrap_or_else(|| panic!("no test flag '{}'", key))
    }

    pub fn update_flag(&mut self, flag: Flag) {
        self.flags.insert(flag.key.clone(), Arc::new(flag));
    }

    /// How many times the big-segment store has been asked for a membership.
    pub fn big_segment_queries(&self) -> usize {
        self.big_segment_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Queries for TestQueries {
    async fn flag(&self, flag_key: &str) -> Option<Arc<Flag>> {
        self.flags.get(flag_key).cloned()
    }

    async fn segment(&self, segment_key: &str) -> Option<Arc<Segment>> {
        self.segments.get(segment_key).cloned()
    }

    async fn big_segment_membership(
        &self,
        _context_key: &str,
    ) -> Option<(BigSegmentMembership, BigSegmentsStatus)> {
        self.big_segment_queries.fetch_add(1, Ordering::SeqCst);
        self.big_segments.clone()
    }
}

#[derive(Default)]
pub struct InMemoryPrerequisiteEventRecorder {
    events: Mutex<Vec<PrerequisiteEvent>>,
}

impl InMemoryPrerequisiteEventRecorder {
    pub fn events(&self) -> Vec<PrerequisiteEvent> {
        self.events.lock().unwrap().clone()
    }

    /// (target flag, prerequisite flag) pairs in recording order.
    pub fn keys(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| {
                (
                    event.target_flag_key.clone(),
                    event.prerequisite_flag.key.clone(),
                )
            })
            .collect()
    }
}

impl PrerequisiteEventRecorder for InMemoryPrerequisiteEventRecorder {
    fn record(&self, event: PrerequisiteEvent) {
        self.events.lock().unwrap().push(event);
    }
}
