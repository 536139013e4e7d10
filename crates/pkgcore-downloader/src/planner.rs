//! Fetch scheduling: converts a set of desired entries into coalesced HTTP
//! range runs (spec §4.5.3).

use pkgcore_types::FilePath;

/// One entry considered for fetching: enough of `PackageFileEntry` to plan
/// a range, without pulling in `pkgcore-archive`'s types here.
#[derive(Debug, Clone)]
pub struct DesiredEntry {
    pub path: FilePath,
    pub offset: u64,
    pub compressed_size: u64,
}

/// A single HTTP range `[begin_offset, end_offset)` covering one or more
/// coalesced entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRun {
    pub begin_offset: u64,
    pub end_offset: u64,
    pub entries: Vec<FilePath>,
}

impl FetchRun {
    pub fn len(&self) -> u64 {
        self.end_offset - self.begin_offset
    }
}

/// Greedily coalesce `desired` (assumed already filtered to not-present
/// entries) into runs (spec §4.5.3 steps 2-4).
///
/// - Entries are sorted by offset.
/// - A run is extended by the next entry if the gap since the run's end is
///   `<= max_redownload_overflow_bytes` *and* the resulting run total is
///   `<= upper_bound_max_bytes_per_request`.
/// - A single entry larger than `upper_bound_max_bytes_per_request` becomes
///   its own run rather than being split.
pub fn plan_runs(
    desired: &[DesiredEntry],
    upper_bound_max_bytes_per_request: u64,
    max_redownload_overflow_bytes: u64,
) -> Vec<FetchRun> {
    let mut sorted: Vec<&DesiredEntry> = desired.iter().collect();
    sorted.sort_by_key(|e| e.offset);

    let mut runs: Vec<FetchRun> = Vec::new();

    for entry in sorted {
        let entry_end = entry.offset + entry.compressed_size;

        if let Some(run) = runs.last_mut() {
            let gap = entry.offset.saturating_sub(run.end_offset);
            let resulting_total = entry_end - run.begin_offset;
            if gap <= max_redownload_overflow_bytes && resulting_total <= upper_bound_max_bytes_per_request
            {
                run.end_offset = entry_end;
                run.entries.push(entry.path.clone());
                continue;
            }
        }

        runs.push(FetchRun {
            begin_offset: entry.offset,
            end_offset: entry_end,
            entries: vec![entry.path.clone()],
        });
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgcore_types::GameDirectory;

    fn entry(path: &str, offset: u64, size: u64) -> DesiredEntry {
        DesiredEntry {
            path: FilePath::from_relative_path(GameDirectory::Content, path),
            offset,
            compressed_size: size,
        }
    }

    #[test]
    fn adjacent_entries_coalesce_into_one_run() {
        let desired = vec![entry("a.json", 0, 100), entry("b.json", 100, 100)];
        let runs = plan_runs(&desired, 10_000, 0);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].begin_offset, 0);
        assert_eq!(runs[0].end_offset, 200);
        assert_eq!(runs[0].entries.len(), 2);
    }

    #[test]
    fn gap_within_overflow_budget_still_coalesces() {
        let desired = vec![entry("a.json", 0, 100), entry("b.json", 150, 100)];
        let runs = plan_runs(&desired, 10_000, 64);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].end_offset, 250);
    }

    #[test]
    fn gap_beyond_overflow_budget_splits_runs() {
        let desired = vec![entry("a.json", 0, 100), entry("b.json", 1000, 100)];
        let runs = plan_runs(&desired, 10_000, 64);
        assert_eq!(runs.len(), 2);
    }

    #[test]
    fn exceeding_ceiling_splits_even_with_no_gap() {
        let desired = vec![entry("a.json", 0, 900), entry("b.json", 900, 900)];
        let runs = plan_runs(&desired, 1000, 64);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].len(), 900);
        assert_eq!(runs[1].len(), 900);
    }

    #[test]
    fn oversized_single_entry_becomes_its_own_run_unsplit() {
        let desired = vec![entry("huge.json", 0, 5000)];
        let runs = plan_runs(&desired, 1000, 64);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 5000);
    }

    #[test]
    fn entries_out_of_order_are_sorted_before_planning() {
        let desired = vec![entry("b.json", 100, 100), entry("a.json", 0, 100)];
        let runs = plan_runs(&desired, 10_000, 0);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].begin_offset, 0);
    }
}
