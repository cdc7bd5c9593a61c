//! CPU topology detection and CPU-set keyword resolution.
//!
//! The topology is read from sysfs once and kept as an owned value. It
//! partitions the online CPUs into physical cores and hyper-thread siblings,
//! and on hybrid processors additionally into performance (P) and efficiency
//! (E) cores. Rule CPU specs such as `"P"`, `"all-logical"` or `"physical+E"`
//! are resolved against it.

use {
    crate::{
        affinity::{format_cpu_list, looks_like_cpu_list, parse_cpu_list},
        mask::CpuSet,
    },
    log::{debug, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt, fs,
        path::Path,
    },
};

/// Where the kernel exposes per-CPU topology.
pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Named CPU subsets a rule can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuKeyword {
    /// Performance cores including their hyper-threads (hybrid only)
    PCores,
    /// Efficiency cores (hybrid only)
    ECores,
    /// First hardware thread of each P-core (hybrid only)
    PCoresPhysical,
    /// Hyper-thread siblings of P-cores (hybrid only)
    PCoresLogical,
    /// First hardware thread of every core
    Physical,
    /// Every hyper-thread sibling that is not the first of its core
    Logical,
    /// Every online CPU
    All,
}

/// Case-insensitive aliases, grouped by the keyword they name.
pub const KEYWORD_ALIASES: &[(CpuKeyword, &[&str])] = &[
    (
        CpuKeyword::PCores,
        &["p", "pcore", "pcores", "p-core", "p-cores", "performance"],
    ),
    (
        CpuKeyword::ECores,
        &["e", "ecore", "ecores", "e-core", "e-cores", "efficiency"],
    ),
    (
        CpuKeyword::PCoresPhysical,
        &["p-physical", "pcore-physical", "pcores-physical"],
    ),
    (
        CpuKeyword::PCoresLogical,
        &[
            "p-logical",
            "p-ht",
            "pcore-logical",
            "pcore-ht",
            "pcores-logical",
            "pcores-ht",
        ],
    ),
    (
        CpuKeyword::Physical,
        &["physical", "physical-cores", "no-ht", "noht"],
    ),
    (
        CpuKeyword::Logical,
        &["logical", "ht", "hyperthread", "hyperthreads", "smt"],
    ),
    (CpuKeyword::All, &["all"]),
];

impl CpuKeyword {
    pub fn from_alias(alias: &str) -> Option<Self> {
        let alias = alias.trim().to_ascii_lowercase();
        KEYWORD_ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&alias.as_str()))
            .map(|(keyword, _)| *keyword)
    }

    /// Keywords that only exist on hybrid processors.
    pub fn is_hybrid_only(self) -> bool {
        matches!(
            self,
            Self::PCores | Self::ECores | Self::PCoresPhysical | Self::PCoresLogical
        )
    }
}

/// Detected CPU topology.
///
/// Invariants: `physical_cores ∪ logical_threads == all_cpus` and the two are
/// disjoint; the four hybrid sets are either all derived from a non-empty
/// P/E split or all empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    all_cpus: CpuSet,
    physical_cores: CpuSet,
    logical_threads: CpuSet,
    p_cores: CpuSet,
    e_cores: CpuSet,
    p_cores_physical: CpuSet,
    p_cores_logical: CpuSet,
}

struct HybridSplit {
    p_cores: CpuSet,
    e_cores: CpuSet,
    p_cores_physical: CpuSet,
    p_cores_logical: CpuSet,
}

impl Topology {
    /// Detect the topology of the running machine.
    pub fn detect() -> Self {
        Self::detect_from(Path::new(SYSFS_CPU_ROOT))
    }

    /// Detect the topology from a sysfs-like tree rooted at `root`
    /// (normally `/sys/devices/system/cpu`).
    ///
    /// A missing or unreadable tree degrades to an empty, non-hybrid topology.
    pub fn detect_from(root: &Path) -> Self {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "Cannot read CPU topology from {}: {err}; CPU keywords are unavailable",
                    root.display()
                );
                return Self::default();
            }
        };

        let mut cpu_ids: Vec<usize> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                name.to_str()?.strip_prefix("cpu")?.parse::<usize>().ok()
            })
            .collect();
        cpu_ids.sort_unstable();

        let mut siblings = BTreeMap::new();
        let mut capacities = BTreeMap::new();
        for cpu in cpu_ids {
            let cpu_dir = root.join(format!("cpu{cpu}"));
            if let Ok(online) = fs::read_to_string(cpu_dir.join("online")) {
                if online.trim() == "0" {
                    debug!("cpu{cpu} is offline");
                    continue;
                }
            }

            let group = fs::read_to_string(cpu_dir.join("topology/thread_siblings_list"))
                .ok()
                .and_then(|content| parse_cpu_list(content.trim()).ok())
                .unwrap_or_default();
            siblings.insert(cpu, group);

            if let Some(capacity) = fs::read_to_string(cpu_dir.join("cpu_capacity"))
                .ok()
                .and_then(|content| content.trim().parse::<u64>().ok())
            {
                capacities.insert(cpu, capacity);
            }
        }

        Self::from_siblings(&siblings, &capacities)
    }

    /// Build a topology from each online CPU's sibling list and the optional
    /// per-CPU relative capacity.
    ///
    /// Sibling lists are clipped to the online CPUs and always include the
    /// CPU itself, so a missing list means "no hyper-thread sibling".
    pub fn from_siblings(
        siblings: &BTreeMap<usize, CpuSet>,
        capacities: &BTreeMap<usize, u64>,
    ) -> Self {
        let all_cpus: CpuSet = siblings.keys().copied().collect();

        // A sorted set is an order-independent key, so each core is counted once
        let groups: BTreeSet<CpuSet> = siblings
            .iter()
            .map(|(cpu, group)| {
                let mut group: CpuSet = group.intersection(&all_cpus).copied().collect();
                group.insert(*cpu);
                group
            })
            .collect();

        let mut physical_cores = CpuSet::new();
        let mut logical_threads = CpuSet::new();
        for group in &groups {
            let mut members = group.iter().copied();
            if let Some(first) = members.next() {
                physical_cores.insert(first);
                logical_threads.extend(members);
            }
        }
        // Overlapping sibling lists must not put a CPU on both sides
        logical_threads.retain(|cpu| !physical_cores.contains(cpu));

        let mut topology = Self {
            all_cpus,
            physical_cores,
            logical_threads,
            ..Self::default()
        };

        let split = topology
            .split_by_capacity(capacities)
            .unwrap_or_else(|| Self::split_by_siblings(&groups));
        if !split.p_cores.is_empty() && !split.e_cores.is_empty() {
            topology.p_cores = split.p_cores;
            topology.e_cores = split.e_cores;
            topology.p_cores_physical = split.p_cores_physical;
            topology.p_cores_logical = split.p_cores_logical;
        }

        topology
    }

    /// CPUs at the maximum capacity are P-cores, the rest E-cores. Only
    /// applies when every online CPU exposes a capacity and at least two
    /// distinct values are seen.
    fn split_by_capacity(&self, capacities: &BTreeMap<usize, u64>) -> Option<HybridSplit> {
        let online = || {
            capacities
                .iter()
                .filter(|(cpu, _)| self.all_cpus.contains(cpu))
        };
        let covered = online().count();
        if covered < self.all_cpus.len() {
            if covered > 0 {
                debug!(
                    "Only {covered} of {} online CPUs expose cpu_capacity, ignoring it",
                    self.all_cpus.len()
                );
            }
            return None;
        }
        let distinct: BTreeSet<u64> = online().map(|(_, capacity)| *capacity).collect();
        if distinct.len() < 2 {
            return None;
        }
        let max_capacity = distinct.last().copied()?;

        let mut p_cores = CpuSet::new();
        let mut e_cores = CpuSet::new();
        for (cpu, capacity) in online() {
            if *capacity == max_capacity {
                p_cores.insert(*cpu);
            } else {
                e_cores.insert(*cpu);
            }
        }

        let p_cores_physical = p_cores
            .intersection(&self.physical_cores)
            .copied()
            .collect();
        let p_cores_logical = p_cores
            .intersection(&self.logical_threads)
            .copied()
            .collect();
        Some(HybridSplit {
            p_cores,
            e_cores,
            p_cores_physical,
            p_cores_logical,
        })
    }

    /// Cores with hyper-threading are assumed to be P-cores, single-thread
    /// cores E-cores.
    fn split_by_siblings(groups: &BTreeSet<CpuSet>) -> HybridSplit {
        let mut split = HybridSplit {
            p_cores: CpuSet::new(),
            e_cores: CpuSet::new(),
            p_cores_physical: CpuSet::new(),
            p_cores_logical: CpuSet::new(),
        };
        for group in groups {
            let mut members = group.iter().copied();
            let Some(first) = members.next() else {
                continue;
            };
            if group.len() > 1 {
                split.p_cores.extend(group.iter().copied());
                split.p_cores_physical.insert(first);
                split.p_cores_logical.extend(members);
            } else {
                split.e_cores.insert(first);
            }
        }
        split
    }

    pub fn all_cpus(&self) -> &CpuSet {
        &self.all_cpus
    }

    pub fn physical_cores(&self) -> &CpuSet {
        &self.physical_cores
    }

    pub fn logical_threads(&self) -> &CpuSet {
        &self.logical_threads
    }

    pub fn p_cores(&self) -> &CpuSet {
        &self.p_cores
    }

    pub fn e_cores(&self) -> &CpuSet {
        &self.e_cores
    }

    pub fn p_cores_physical(&self) -> &CpuSet {
        &self.p_cores_physical
    }

    pub fn p_cores_logical(&self) -> &CpuSet {
        &self.p_cores_logical
    }

    pub fn is_hybrid(&self) -> bool {
        !self.p_cores.is_empty() && !self.e_cores.is_empty()
    }

    pub fn has_hyper_threading(&self) -> bool {
        !self.logical_threads.is_empty()
    }

    /// Resolve a keyword alias. Hybrid-only keywords are not found on
    /// non-hybrid machines.
    pub fn resolve_keyword(&self, name: &str) -> Option<&CpuSet> {
        let keyword = CpuKeyword::from_alias(name)?;
        if keyword.is_hybrid_only() && !self.is_hybrid() {
            return None;
        }
        Some(match keyword {
            CpuKeyword::PCores => &self.p_cores,
            CpuKeyword::ECores => &self.e_cores,
            CpuKeyword::PCoresPhysical => &self.p_cores_physical,
            CpuKeyword::PCoresLogical => &self.p_cores_logical,
            CpuKeyword::Physical => &self.physical_cores,
            CpuKeyword::Logical => &self.logical_threads,
            CpuKeyword::All => &self.all_cpus,
        })
    }

    /// Resolve a keyword expression such as `"P+E"`, `"all-logical"` or
    /// `"physical+E-4-7"`.
    ///
    /// Terms are joined by `+` (union) and `-` (difference); the first term is
    /// added. Aliases that themselves contain a hyphen (`"P-logical"`) are
    /// matched greedily before the hyphen is read as an operator, and two
    /// numbers around a hyphen form a range. Any term that is neither a
    /// keyword nor a CPU list makes the whole expression invalid.
    ///
    /// Strings that look like a plain numeric list return `None`; use
    /// [`Topology::resolve_cpu_spec`] to handle both forms.
    pub fn resolve_expression(&self, expr: &str) -> Option<CpuSet> {
        let expr = expr.trim();
        if expr.is_empty() || looks_like_cpu_list(expr) {
            return None;
        }
        if let Some(cpus) = self.resolve_keyword(expr) {
            return Some(cpus.clone());
        }

        let (segments, operators) = split_expression(expr);
        let mut result = CpuSet::new();
        let mut index = 0;
        let mut add = true;
        while index < segments.len() {
            let (cpus, consumed) = self.resolve_term(&segments[index..], &operators[index..])?;
            if add {
                result.extend(cpus);
            } else {
                result.retain(|cpu| !cpus.contains(cpu));
            }
            index = index.saturating_add(consumed);
            if let Some(operator) = operators.get(index.saturating_sub(1)) {
                add = *operator == '+';
            }
        }
        Some(result)
    }

    /// Resolve the term starting at `segments[0]`, returning its CPUs and how
    /// many segments it spans. `operators[i]` joins `segments[i]` and
    /// `segments[i + 1]`.
    fn resolve_term(&self, segments: &[&str], operators: &[char]) -> Option<(CpuSet, usize)> {
        // Longest run of hyphen-joined segments first
        let max_span = 1 + operators.iter().take_while(|op| **op == '-').count();
        for span in (1..=max_span.min(segments.len())).rev() {
            let candidate = segments[..span].join("-");
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }
            if let Some(cpus) = self.resolve_keyword(candidate) {
                return Some((cpus.clone(), span));
            }
            if span <= 2 && looks_like_cpu_list(candidate) {
                if let Ok(cpus) = parse_cpu_list(candidate) {
                    if !cpus.is_empty() {
                        return Some((cpus, span));
                    }
                }
            }
        }
        None
    }

    /// Resolve a textual CPU spec: a plain numeric list/range is parsed
    /// literally and never routed through keyword resolution; anything else
    /// is a keyword expression.
    pub fn resolve_cpu_spec(&self, spec: &str) -> Option<CpuSet> {
        let spec = spec.trim();
        if looks_like_cpu_list(spec) {
            return parse_cpu_list(spec).ok();
        }
        self.resolve_expression(spec)
    }
}

/// Splits `expr` at `+` and `-`, returning the segments and the operators
/// between them (`operators.len() == segments.len() - 1`).
fn split_expression(expr: &str) -> (Vec<&str>, Vec<char>) {
    let mut segments = Vec::new();
    let mut operators = Vec::new();
    let mut start = 0;
    for (index, c) in expr.char_indices() {
        if c == '+' || c == '-' {
            segments.push(&expr[start..index]);
            operators.push(c);
            start = index.saturating_add(1);
        }
    }
    segments.push(&expr[start..]);
    (segments, operators)
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPU topology:")?;
        writeln!(
            f,
            "  Total CPUs: {} ({})",
            self.all_cpus.len(),
            format_cpu_list(&self.all_cpus)
        )?;
        writeln!(
            f,
            "  Physical cores: {} ({})",
            self.physical_cores.len(),
            format_cpu_list(&self.physical_cores)
        )?;
        if self.has_hyper_threading() {
            writeln!(
                f,
                "  Logical threads (HT): {} ({})",
                self.logical_threads.len(),
                format_cpu_list(&self.logical_threads)
            )?;
        }
        if self.is_hybrid() {
            writeln!(
                f,
                "  P-cores: {} ({})",
                self.p_cores.len(),
                format_cpu_list(&self.p_cores)
            )?;
            writeln!(
                f,
                "    physical: {} ({})",
                self.p_cores_physical.len(),
                format_cpu_list(&self.p_cores_physical)
            )?;
            writeln!(
                f,
                "    logical (HT): {} ({})",
                self.p_cores_logical.len(),
                format_cpu_list(&self.p_cores_logical)
            )?;
            write!(
                f,
                "  E-cores: {} ({})",
                self.e_cores.len(),
                format_cpu_list(&self.e_cores)
            )
        } else {
            write!(f, "  Not a hybrid CPU architecture")
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::mask::{CpuMask, CPU_SETSIZE},
        std::path::PathBuf,
        tempfile::TempDir,
        test_case::test_case,
    };

    fn set(cpus: &[usize]) -> CpuSet {
        cpus.iter().copied().collect()
    }

    fn siblings(groups: &[&[usize]]) -> BTreeMap<usize, CpuSet> {
        let mut map = BTreeMap::new();
        for group in groups {
            for cpu in group.iter() {
                map.insert(*cpu, set(group));
            }
        }
        map
    }

    /// 4 hyper-threaded P-cores (0-7) and 4 single-thread E-cores (8-11)
    fn hybrid() -> Topology {
        Topology::from_siblings(
            &siblings(&[&[0, 1], &[2, 3], &[4, 5], &[6, 7], &[8], &[9], &[10], &[11]]),
            &BTreeMap::new(),
        )
    }

    /// 4 cores, 2 threads each
    fn smt_only() -> Topology {
        Topology::from_siblings(
            &siblings(&[&[0, 4], &[1, 5], &[2, 6], &[3, 7]]),
            &BTreeMap::new(),
        )
    }

    fn assert_invariants(topology: &Topology) {
        let union: CpuSet = topology
            .physical_cores()
            .union(topology.logical_threads())
            .copied()
            .collect();
        assert_eq!(&union, topology.all_cpus());
        assert!(topology.physical_cores().is_disjoint(topology.logical_threads()));
        assert!(topology.p_cores().is_disjoint(topology.e_cores()));
        assert_eq!(topology.p_cores().is_empty(), topology.e_cores().is_empty());
        if !topology.is_hybrid() {
            assert!(topology.p_cores_physical().is_empty());
            assert!(topology.p_cores_logical().is_empty());
        }
    }

    #[test]
    fn test_sibling_partition() {
        let topology = smt_only();
        assert_eq!(topology.all_cpus(), &set(&[0, 1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(topology.physical_cores(), &set(&[0, 1, 2, 3]));
        assert_eq!(topology.logical_threads(), &set(&[4, 5, 6, 7]));
        assert!(topology.has_hyper_threading());
        assert!(!topology.is_hybrid());
        assert_invariants(&topology);
    }

    #[test]
    fn test_sibling_heuristic_hybrid() {
        let topology = hybrid();
        assert!(topology.is_hybrid());
        assert_eq!(topology.p_cores(), &set(&[0, 1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(topology.e_cores(), &set(&[8, 9, 10, 11]));
        assert_eq!(topology.p_cores_physical(), &set(&[0, 2, 4, 6]));
        assert_eq!(topology.p_cores_logical(), &set(&[1, 3, 5, 7]));
        assert_invariants(&topology);
    }

    #[test]
    fn test_no_ht_is_not_hybrid() {
        let topology = Topology::from_siblings(&siblings(&[&[0], &[1], &[2]]), &BTreeMap::new());
        assert!(!topology.is_hybrid());
        assert!(!topology.has_hyper_threading());
        assert_eq!(topology.physical_cores(), topology.all_cpus());
        assert_invariants(&topology);
    }

    #[test]
    fn test_capacity_heuristic_wins() {
        // All cores hyper-threaded, but capacity distinguishes them
        let capacities = BTreeMap::from([
            (0, 1024),
            (1, 1024),
            (2, 1024),
            (3, 1024),
            (4, 512),
            (5, 512),
            (6, 512),
            (7, 512),
        ]);
        let topology = Topology::from_siblings(
            &siblings(&[&[0, 1], &[2, 3], &[4, 5], &[6, 7]]),
            &capacities,
        );
        assert!(topology.is_hybrid());
        assert_eq!(topology.p_cores(), &set(&[0, 1, 2, 3]));
        assert_eq!(topology.e_cores(), &set(&[4, 5, 6, 7]));
        assert_eq!(topology.p_cores_physical(), &set(&[0, 2]));
        assert_eq!(topology.p_cores_logical(), &set(&[1, 3]));
        assert_invariants(&topology);
    }

    #[test]
    fn test_uniform_capacity_falls_back_to_siblings() {
        let capacities: BTreeMap<usize, u64> = (0..12).map(|cpu| (cpu, 1024)).collect();
        let topology = Topology::from_siblings(
            &siblings(&[&[0, 1], &[2, 3], &[4, 5], &[6, 7], &[8], &[9], &[10], &[11]]),
            &capacities,
        );
        assert_eq!(topology, hybrid());
    }

    #[test]
    fn test_partial_capacity_falls_back_to_siblings() {
        // Only the single-thread cores report a capacity
        let capacities: BTreeMap<usize, u64> =
            BTreeMap::from([(8, 1024), (9, 1024), (10, 512), (11, 512)]);
        let topology = Topology::from_siblings(
            &siblings(&[&[0, 1], &[2, 3], &[4, 5], &[6, 7], &[8], &[9], &[10], &[11]]),
            &capacities,
        );
        assert_eq!(topology, hybrid());
        let split: CpuSet = topology
            .p_cores()
            .union(topology.e_cores())
            .copied()
            .collect();
        assert_eq!(&split, topology.all_cpus());
        assert_invariants(&topology);
    }

    #[test]
    fn test_overlapping_and_offline_siblings() {
        // cpu3's sibling list names an offline cpu 7
        let mut map = siblings(&[&[0, 1], &[2]]);
        map.insert(3, set(&[3, 7]));
        let topology = Topology::from_siblings(&map, &BTreeMap::new());
        assert_eq!(topology.all_cpus(), &set(&[0, 1, 2, 3]));
        assert_eq!(topology.logical_threads(), &set(&[1]));
        assert_invariants(&topology);
    }

    #[test_case("P", Some(&[0, 1, 2, 3, 4, 5, 6, 7]); "p cores")]
    #[test_case("performance", Some(&[0, 1, 2, 3, 4, 5, 6, 7]); "performance alias")]
    #[test_case("e-cores", Some(&[8, 9, 10, 11]); "e cores")]
    #[test_case("P-physical", Some(&[0, 2, 4, 6]); "p physical")]
    #[test_case("pcore-ht", Some(&[1, 3, 5, 7]); "p logical")]
    #[test_case("NO-HT", Some(&[0, 2, 4, 6, 8, 9, 10, 11]); "physical")]
    #[test_case("smt", Some(&[1, 3, 5, 7]); "logical")]
    #[test_case("All", Some(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]); "all")]
    #[test_case("bogus", None; "unknown")]
    fn test_resolve_keyword_hybrid(name: &str, expected: Option<&[usize]>) {
        assert_eq!(hybrid().resolve_keyword(name), expected.map(set).as_ref());
    }

    #[test]
    fn test_hybrid_keywords_not_found_on_non_hybrid() {
        let topology = smt_only();
        for name in ["P", "E", "P-physical", "P-logical"] {
            assert_eq!(topology.resolve_keyword(name), None, "{name}");
        }
        assert_eq!(topology.resolve_keyword("all"), Some(topology.all_cpus()));
    }

    #[test_case("P+E", Some(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]); "union")]
    #[test_case("all-logical", Some(&[0, 2, 4, 6, 8, 9, 10, 11]); "difference")]
    #[test_case("physical+E", Some(&[0, 2, 4, 6, 8, 9, 10, 11]); "physical plus e")]
    #[test_case("all-P-logical", Some(&[0, 2, 4, 6, 8, 9, 10, 11]); "hyphenated alias term")]
    #[test_case("P-P-logical", Some(&[0, 2, 4, 6]); "hyphenated alias subtracted")]
    #[test_case("E+0-1", Some(&[0, 1, 8, 9, 10, 11]); "numeric range term")]
    #[test_case("all-4-7", Some(&[0, 1, 2, 3, 8, 9, 10, 11]); "subtract range")]
    #[test_case("E + 2", Some(&[2, 8, 9, 10, 11]); "spaces")]
    #[test_case("P+bogus", None; "invalid term")]
    #[test_case("", None; "empty")]
    fn test_resolve_expression_hybrid(expr: &str, expected: Option<&[usize]>) {
        assert_eq!(hybrid().resolve_expression(expr), expected.map(set));
    }

    #[test]
    fn test_expression_algebra() {
        for topology in [hybrid(), smt_only()] {
            let expected: CpuSet = topology
                .all_cpus()
                .difference(topology.logical_threads())
                .copied()
                .collect();
            assert_eq!(topology.resolve_expression("all-logical"), Some(expected));
        }
        let topology = hybrid();
        let expected: CpuSet = topology
            .p_cores()
            .union(topology.e_cores())
            .copied()
            .collect();
        assert_eq!(topology.resolve_expression("P+E"), Some(expected));
        assert_eq!(smt_only().resolve_expression("P+E"), None);
    }

    #[test]
    fn test_numeric_list_is_not_an_expression() {
        let topology = hybrid();
        assert_eq!(topology.resolve_expression("0-3,6"), None);
        assert_eq!(topology.resolve_cpu_spec("0-3,6"), Some(set(&[0, 1, 2, 3, 6])));
        assert_eq!(topology.resolve_cpu_spec("4-7"), Some(set(&[4, 5, 6, 7])));
        assert_eq!(topology.resolve_cpu_spec("7-4"), None);
        assert_eq!(topology.resolve_cpu_spec("E"), Some(set(&[8, 9, 10, 11])));
    }

    #[test]
    fn test_huge_numeric_range_is_clamped() {
        let cpus = hybrid().resolve_cpu_spec("0-4000000000").unwrap();
        assert_eq!(cpus.len(), CPU_SETSIZE);
        assert_eq!(CpuMask::from(&cpus).count(), CPU_SETSIZE);
    }

    struct FakeSysfs {
        dir: TempDir,
    }

    impl FakeSysfs {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn cpu(&self, cpu: usize, siblings: &str, online: Option<&str>, capacity: Option<u64>) {
            let cpu_dir = self.dir.path().join(format!("cpu{cpu}"));
            fs::create_dir_all(cpu_dir.join("topology")).unwrap();
            fs::write(cpu_dir.join("topology/thread_siblings_list"), siblings).unwrap();
            if let Some(online) = online {
                fs::write(cpu_dir.join("online"), online).unwrap();
            }
            if let Some(capacity) = capacity {
                fs::write(cpu_dir.join("cpu_capacity"), format!("{capacity}\n")).unwrap();
            }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().to_path_buf()
        }
    }

    #[test]
    fn test_detect_from_sysfs() {
        let sysfs = FakeSysfs::new();
        sysfs.cpu(0, "0-1\n", None, None);
        sysfs.cpu(1, "0-1\n", Some("1\n"), None);
        sysfs.cpu(2, "2,3\n", Some("1\n"), None);
        sysfs.cpu(3, "2,3\n", Some("1\n"), None);
        sysfs.cpu(4, "4\n", Some("1\n"), None);
        sysfs.cpu(5, "5\n", Some("0\n"), None);
        // Unrelated entries are ignored
        fs::create_dir_all(sysfs.root().join("cpufreq")).unwrap();
        fs::write(sysfs.root().join("online"), "0-4\n").unwrap();

        let topology = Topology::detect_from(&sysfs.root());
        assert_eq!(topology.all_cpus(), &set(&[0, 1, 2, 3, 4]));
        assert_eq!(topology.physical_cores(), &set(&[0, 2, 4]));
        assert_eq!(topology.logical_threads(), &set(&[1, 3]));
        assert_eq!(topology.p_cores(), &set(&[0, 1, 2, 3]));
        assert_eq!(topology.e_cores(), &set(&[4]));
        assert_invariants(&topology);
    }

    #[test]
    fn test_detect_from_sysfs_capacity() {
        let sysfs = FakeSysfs::new();
        sysfs.cpu(0, "0", None, Some(1024));
        sysfs.cpu(1, "1", None, Some(1024));
        sysfs.cpu(2, "2", None, Some(430));
        sysfs.cpu(3, "3", None, Some(430));

        let topology = Topology::detect_from(&sysfs.root());
        assert!(topology.is_hybrid());
        assert_eq!(topology.p_cores(), &set(&[0, 1]));
        assert_eq!(topology.e_cores(), &set(&[2, 3]));
        assert_eq!(topology.p_cores_physical(), &set(&[0, 1]));
        assert!(topology.p_cores_logical().is_empty());
    }

    #[test]
    fn test_detect_from_sysfs_partial_capacity() {
        let sysfs = FakeSysfs::new();
        sysfs.cpu(0, "0-1", None, Some(1024));
        sysfs.cpu(1, "0-1", None, None);
        sysfs.cpu(2, "2", None, Some(430));
        sysfs.cpu(3, "3", None, None);

        let topology = Topology::detect_from(&sysfs.root());
        assert_eq!(topology.p_cores(), &set(&[0, 1]));
        assert_eq!(topology.e_cores(), &set(&[2, 3]));
        assert_invariants(&topology);
    }

    #[test]
    fn test_detect_from_missing_sysfs() {
        let topology = Topology::detect_from(Path::new("/nonexistent/taskpin/cpu"));
        assert_eq!(topology, Topology::default());
        assert!(!topology.is_hybrid());
        assert_eq!(topology.resolve_keyword("P"), None);
        assert_eq!(topology.resolve_keyword("all"), Some(&CpuSet::new()));
    }

    #[test]
    fn test_display() {
        let report = hybrid().to_string();
        assert!(report.contains("Total CPUs: 12 (0-11)"));
        assert!(report.contains("E-cores: 4 (8-11)"));
        assert!(smt_only().to_string().contains("Not a hybrid CPU architecture"));
    }
}
