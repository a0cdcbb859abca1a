use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, Result};
use crate::runtime::TaskId;
use crate::status::StepInfo;

/// Identifier yielded by [`StepMapping::get_ids`]: the scheduler's id for a
/// managed step, the supervisor's task id for an unmanaged one.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TrackingId {
    Step(String),
    Task(TaskId),
}

impl Display for TrackingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingId::Step(id) => f.write_str(id),
            TrackingId::Task(id) => write!(f, "{id}"),
        }
    }
}

/// Registry entry for one running step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepMapEntry {
    pub step_id: Option<String>,
    pub task_id: Option<TaskId>,
    pub managed: bool,
    /// Last snapshot returned for this step.
    pub last: Option<StepInfo>,
}

impl StepMapEntry {
    fn tracking_id(&self) -> Option<TrackingId> {
        if self.managed {
            self.step_id.clone().map(TrackingId::Step)
        } else {
            self.task_id.map(TrackingId::Task)
        }
    }
}

#[derive(Default, Debug)]
struct Registry {
    entries: HashMap<String, StepMapEntry>,
    /// Names held by a [`Reservation`] while their launch is in flight.
    pending: HashSet<String>,
}

impl Registry {
    fn insert(&mut self, name: String, entry: StepMapEntry) {
        if self.entries.insert(name.clone(), entry).is_some() {
            tracing::debug!(step = %name, "replaced step mapping");
        }
    }
}

fn check_identifiers(
    name: &str,
    step_id: Option<&String>,
    task_id: Option<&TaskId>,
    managed: bool,
) -> Result<()> {
    if managed && step_id.is_none() {
        return Err(LaunchError::Configuration(format!(
            "managed step `{name}` needs a step id"
        )));
    }
    if !managed && task_id.is_none() {
        return Err(LaunchError::Configuration(format!(
            "unmanaged step `{name}` needs a task id"
        )));
    }
    Ok(())
}

/// Name-keyed registry of launched steps.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default, Debug)]
pub struct StepMapping {
    inner: Arc<Mutex<Registry>>,
}

/// Exclusive claim on a step name, held while the step launches.
///
/// Dropping it without [`Reservation::commit`] releases the name.
#[derive(Debug)]
#[must_use = "dropping a reservation releases the name"]
pub struct Reservation {
    mapping: StepMapping,
    name: String,
    committed: bool,
}

impl Reservation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the launched step under the reserved name.
    ///
    /// A validation error releases the name.
    pub fn commit(
        mut self,
        step_id: Option<String>,
        task_id: Option<TaskId>,
        managed: bool,
    ) -> Result<()> {
        check_identifiers(&self.name, step_id.as_ref(), task_id.as_ref(), managed)?;
        let entry = StepMapEntry {
            step_id,
            task_id,
            managed,
            last: None,
        };
        let mut registry = self.mapping.inner.lock();
        registry.pending.remove(&self.name);
        registry.insert(self.name.clone(), entry);
        self.committed = true;
        Ok(())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.mapping.inner.lock().pending.remove(&self.name);
            tracing::debug!(step = %self.name, "released step name");
        }
    }
}

impl StepMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the entry for `name`.
    ///
    /// A managed entry needs a step id and an unmanaged one needs a task id.
    pub fn add(
        &self,
        name: impl Into<String>,
        step_id: Option<String>,
        task_id: Option<TaskId>,
        managed: bool,
    ) -> Result<()> {
        let name = name.into();
        check_identifiers(&name, step_id.as_ref(), task_id.as_ref(), managed)?;
        let entry = StepMapEntry {
            step_id,
            task_id,
            managed,
            last: None,
        };
        self.inner.lock().insert(name, entry);
        Ok(())
    }

    /// Claim `name` for a launch in flight.
    ///
    /// Fails with [`LaunchError::DuplicateStep`] if the name is registered or
    /// already reserved.
    pub fn reserve(&self, name: &str) -> Result<Reservation> {
        let mut registry = self.inner.lock();
        if registry.entries.contains_key(name) || !registry.pending.insert(name.to_string()) {
            return Err(LaunchError::DuplicateStep(name.to_string()));
        }
        Ok(Reservation {
            mapping: self.clone(),
            name: name.to_string(),
            committed: false,
        })
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.inner.lock().pending.contains(name)
    }

    /// Split `names` by the `managed` filter.
    ///
    /// Returns the matching names and their tracking ids, position for
    /// position, in request order. Unknown names and names on the other side
    /// of the filter are skipped.
    pub fn get_ids<S: AsRef<str>>(
        &self,
        names: &[S],
        managed: bool,
    ) -> (Vec<String>, Vec<TrackingId>) {
        let registry = self.inner.lock();
        let mut matched_names = Vec::new();
        let mut matched_ids = Vec::new();
        for name in names {
            let name = name.as_ref();
            let Some(entry) = registry.entries.get(name) else {
                continue;
            };
            if entry.managed != managed {
                continue;
            }
            if let Some(id) = entry.tracking_id() {
                matched_names.push(name.to_string());
                matched_ids.push(id);
            }
        }
        (matched_names, matched_ids)
    }

    pub fn get(&self, name: &str) -> Option<StepMapEntry> {
        self.inner.lock().entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<StepMapEntry> {
        self.inner.lock().entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Record a fresh snapshot for `name` and return what the caller should
    /// see: the fresh snapshot, or the earlier terminal one it may not
    /// replace. Names without an entry pass through unchanged.
    pub fn observe(&self, name: &str, fresh: StepInfo) -> StepInfo {
        let mut registry = self.inner.lock();
        match registry.entries.get_mut(name) {
            Some(entry) => {
                let merged = StepInfo::supersede(entry.last.as_ref(), fresh);
                entry.last = Some(merged.clone());
                merged
            }
            None => fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    fn sample() -> (StepMapping, TaskId) {
        let mapping = StepMapping::new();
        let task = TaskId::new();
        mapping.add("a", Some("1.pbs".into()), None, true).unwrap();
        mapping.add("b", None, Some(task), false).unwrap();
        mapping.add("c", Some("3.pbs".into()), None, true).unwrap();
        (mapping, task)
    }

    #[test]
    fn get_ids_keeps_request_order_and_filters() {
        let (mapping, task) = sample();

        let (names, ids) = mapping.get_ids(&["c", "missing", "b", "a"], true);
        assert_eq!(names, vec!["c", "a"]);
        assert_eq!(
            ids,
            vec![TrackingId::Step("3.pbs".into()), TrackingId::Step("1.pbs".into())]
        );

        let (names, ids) = mapping.get_ids(&["c", "missing", "b", "a"], false);
        assert_eq!(names, vec!["b"]);
        assert_eq!(ids, vec![TrackingId::Task(task)]);
    }

    #[test]
    fn managed_and_unmanaged_partitions_are_disjoint() {
        let (mapping, _) = sample();
        let all = ["a", "b", "c"];
        let (managed, _) = mapping.get_ids(&all, true);
        let (unmanaged, _) = mapping.get_ids(&all, false);
        assert!(managed.iter().all(|name| !unmanaged.contains(name)));
        assert_eq!(managed.len() + unmanaged.len(), all.len());
    }

    #[test]
    fn add_replaces_existing_entry() {
        let (mapping, _) = sample();
        mapping.add("a", Some("9.pbs".into()), None, true).unwrap();
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.get("a").unwrap().step_id.as_deref(), Some("9.pbs"));
    }

    #[test]
    fn add_requires_matching_identifier() {
        let mapping = StepMapping::new();
        assert!(mapping.add("x", None, None, true).is_err());
        assert!(mapping.add("x", Some("1".into()), None, false).is_err());
        assert!(mapping.is_empty());
    }

    #[test]
    fn managed_entry_may_carry_submission_task() {
        let mapping = StepMapping::new();
        let task = TaskId::new();
        mapping.add("x", Some("1".into()), Some(task), true).unwrap();
        let (_, ids) = mapping.get_ids(&["x"], true);
        assert_eq!(ids, vec![TrackingId::Step("1".into())]);
        assert_eq!(mapping.get("x").unwrap().task_id, Some(task));
    }

    #[test]
    fn observe_is_monotonic() {
        let (mapping, _) = sample();
        let done = mapping.observe("a", StepInfo::new(Status::Completed, Some(0)));
        assert_eq!(done.status, Status::Completed);

        let later = mapping.observe("a", StepInfo::unknown());
        assert_eq!(later.status, Status::Completed);
        assert_eq!(later.returncode, Some(0));

        let untracked = mapping.observe("missing", StepInfo::unknown());
        assert_eq!(untracked.status, Status::Unknown);
    }

    #[test]
    fn reserve_blocks_second_claim_until_released() {
        let (mapping, _) = sample();
        assert!(matches!(
            mapping.reserve("a"),
            Err(LaunchError::DuplicateStep(name)) if name == "a"
        ));

        let held = mapping.reserve("d").unwrap();
        assert!(mapping.is_reserved("d"));
        assert!(!mapping.contains("d"));
        assert!(mapping.reserve("d").is_err());
        assert_eq!(mapping.get_ids(&["d"], true).0.len(), 0);

        drop(held);
        assert!(!mapping.is_reserved("d"));
        let again = mapping.reserve("d").unwrap();
        again.commit(Some("4.pbs".into()), None, true).unwrap();
        assert!(!mapping.is_reserved("d"));
        assert_eq!(mapping.get("d").unwrap().step_id.as_deref(), Some("4.pbs"));
        assert!(mapping.reserve("d").is_err());
    }

    #[test]
    fn failed_commit_releases_on_drop() {
        let mapping = StepMapping::new();
        let reservation = mapping.reserve("x").unwrap();
        assert!(reservation.commit(None, None, true).is_err());
        assert!(!mapping.is_reserved("x"));
        assert!(mapping.is_empty());
    }

    #[test]
    fn remove_drops_entry() {
        let (mapping, _) = sample();
        assert!(mapping.remove("a").is_some());
        assert!(!mapping.contains("a"));
        assert!(mapping.remove("a").is_none());
        assert_eq!(mapping.names(), vec!["b", "c"]);
    }
}
