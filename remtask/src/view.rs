//! Reconciling view over the latest snapshot: full replacement, text filter, grouping by name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Performance, ProcessInfo, Snapshot};

/// Case-insensitive substring match against process name or executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFilter {
    needle: String,
    text: String,
}

impl ProcessFilter {
    /// Blank text means no filter.
    pub fn parse(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            needle: text.to_lowercase(),
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, p: &ProcessInfo) -> bool {
        p.name.to_lowercase().contains(&self.needle)
            || p
                .exe_path
                .as_deref()
                .is_some_and(|path| path.to_lowercase().contains(&self.needle))
    }
}

#[derive(Debug, Default)]
pub struct ReconcilingView {
    snapshot: Option<Arc<Snapshot>>,
    // Indices into the snapshot, clustered by name in order of first appearance.
    groups: Vec<Vec<usize>>,
    filter: Option<ProcessFilter>,
    performance: Performance,
}

impl ReconcilingView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in `snapshot` wholesale. No diffing: ids may be reused across snapshots.
    pub fn replace(&mut self, snapshot: Arc<Snapshot>) {
        self.groups = group_by_name(snapshot.processes());
        self.performance = Performance::Available(snapshot.performance());
        self.snapshot = Some(snapshot);
    }

    /// Drop all processes and mark performance unavailable. The filter is kept.
    pub fn clear(&mut self) {
        self.snapshot = None;
        self.groups.clear();
        self.performance = Performance::Unavailable;
    }

    pub fn set_filter(&mut self, text: &str) {
        self.filter = ProcessFilter::parse(text);
    }

    pub fn filter(&self) -> Option<&ProcessFilter> {
        self.filter.as_ref()
    }

    pub fn performance(&self) -> Performance {
        self.performance
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.snapshot.as_ref()
    }

    pub fn generation(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.generation())
    }

    pub fn len(&self) -> usize {
        self.processes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes().is_empty()
    }

    pub fn find(&self, pid: u32) -> Option<&ProcessInfo> {
        self.processes().iter().find(|p| p.pid == pid)
    }

    /// Processes passing the filter, clustered by name. Cheap to clone and re-run.
    pub fn visible(&self) -> impl Iterator<Item = &ProcessInfo> + Clone + '_ {
        let procs = self.processes();
        let filter = self.filter.as_ref();
        self.groups
            .iter()
            .flat_map(move |g| g.iter().map(move |&i| &procs[i]))
            .filter(move |p| filter.map_or(true, |f| f.matches(p)))
    }

    /// Non-empty groups of visible processes as `(name, members)`.
    pub fn visible_groups(&self) -> Vec<(&str, Vec<&ProcessInfo>)> {
        let procs = self.processes();
        self.groups
            .iter()
            .filter_map(|g| {
                let members: Vec<&ProcessInfo> = g
                    .iter()
                    .map(|&i| &procs[i])
                    .filter(|p| self.filter.as_ref().map_or(true, |f| f.matches(p)))
                    .collect();
                let first: &ProcessInfo = *members.first()?;
                Some((first.name.as_str(), members))
            })
            .collect()
    }

    fn processes(&self) -> &[ProcessInfo] {
        match &self.snapshot {
            Some(s) => s.processes(),
            None => &[],
        }
    }
}

fn group_by_name(procs: &[ProcessInfo]) -> Vec<Vec<usize>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, p) in procs.iter().enumerate() {
        let slot = *index.entry(p.name.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PerformanceSummary, ProcessHandle};

    fn proc(pid: u32, name: &str, path: Option<&str>) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: name.into(),
            mem_bytes: pid as u64 * 1_048_576,
            threads: 1,
            exe_path: path.map(Into::into),
            handle: ProcessHandle::new(format!("{pid}:0")),
        }
    }

    fn snapshot(generation: u64, procs: Vec<ProcessInfo>) -> Arc<Snapshot> {
        let perf = PerformanceSummary {
            cpu_percent: 10.0,
            free_memory_mb: 512.0,
        };
        Arc::new(Snapshot::assemble(generation, "h", procs, perf))
    }

    fn pids(v: &ReconcilingView) -> Vec<u32> {
        v.visible().map(|p| p.pid).collect()
    }

    #[test]
    fn unfiltered_view_groups_by_name_keeping_order() {
        let mut v = ReconcilingView::new();
        v.replace(snapshot(
            1,
            vec![
                proc(1, "b.exe", None),
                proc(2, "a.exe", None),
                proc(3, "b.exe", None),
                proc(4, "c.exe", None),
                proc(5, "a.exe", None),
            ],
        ));
        assert_eq!(pids(&v), vec![1, 3, 2, 5, 4]);
        let names: Vec<&str> = v.visible_groups().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["b.exe", "a.exe", "c.exe"]);
    }

    #[test]
    fn filter_matches_name_or_path_case_insensitively() {
        let mut v = ReconcilingView::new();
        v.replace(snapshot(
            1,
            vec![
                proc(1, "a.exe", None),
                proc(2, "b.exe", Some(r"C:\Tools\Alpha\b.exe")),
                proc(3, "c.exe", Some(r"C:\Windows\c.exe")),
            ],
        ));
        v.set_filter("ALPHA");
        assert_eq!(pids(&v), vec![2]);
        v.set_filter("a");
        assert_eq!(pids(&v), vec![1, 2]);
    }

    #[test]
    fn single_letter_filter_scenario() {
        let mut v = ReconcilingView::new();
        v.replace(snapshot(
            1,
            vec![proc(1, "a.exe", None), proc(2, "b.exe", None)],
        ));
        v.set_filter("a");
        assert_eq!(pids(&v), vec![1]);
    }

    #[test]
    fn filter_and_replace_commute() {
        let procs = vec![
            proc(1, "svc.exe", None),
            proc(2, "shell.exe", None),
            proc(3, "svc.exe", None),
        ];

        let mut before = ReconcilingView::new();
        before.set_filter("svc");
        before.replace(snapshot(1, procs.clone()));

        let mut after = ReconcilingView::new();
        after.replace(snapshot(1, procs));
        after.set_filter("svc");

        assert_eq!(pids(&before), pids(&after));
        assert_eq!(pids(&before), vec![1, 3]);
    }

    #[test]
    fn clearing_filter_restores_unfiltered_view() {
        let mut v = ReconcilingView::new();
        v.replace(snapshot(
            1,
            vec![
                proc(1, "x", None),
                proc(2, "y", None),
                proc(3, "x", None),
            ],
        ));
        let baseline = pids(&v);
        v.set_filter("y");
        assert_eq!(pids(&v), vec![2]);
        v.set_filter("");
        assert_eq!(pids(&v), baseline);
        v.set_filter("   ");
        assert!(v.filter().is_none());
    }

    #[test]
    fn replace_discards_previous_entities() {
        let mut v = ReconcilingView::new();
        v.replace(snapshot(1, vec![proc(1, "x", None), proc(2, "y", None)]));
        v.replace(snapshot(2, vec![proc(2, "y", None)]));
        assert_eq!(pids(&v), vec![2]);
        assert_eq!(v.generation(), Some(2));
        assert!(v.find(1).is_none());
    }

    #[test]
    fn clear_marks_performance_unavailable() {
        let mut v = ReconcilingView::new();
        v.replace(snapshot(1, vec![proc(1, "x", None)]));
        assert!(v.performance().summary().is_some());
        v.set_filter("x");
        v.clear();
        assert!(v.is_empty());
        assert_eq!(v.performance(), Performance::Unavailable);
        assert_eq!(v.generation(), None);
        assert_eq!(v.filter().map(|f| f.text()), Some("x"));
    }

    #[test]
    fn visible_is_restartable() {
        let mut v = ReconcilingView::new();
        v.replace(snapshot(1, vec![proc(1, "x", None), proc(2, "y", None)]));
        let it = v.visible();
        let first: Vec<u32> = it.clone().map(|p| p.pid).collect();
        let second: Vec<u32> = it.map(|p| p.pid).collect();
        assert_eq!(first, second);
    }
}
