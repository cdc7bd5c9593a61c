//! The validated, in-memory form of an affinity rule.
//!
//! A [`RuleConfig`] is what a rule file decodes to. [`AffinityRule::initialize`]
//! validates it, resolves its CPU spec against the [`Topology`] and classifies
//! its pattern; the resulting rule is immutable.

use {
    crate::{error::RuleError, matcher::PatternMatcher},
    log::warn,
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
    taskpin_cpu_utils::{
        check_nice, format_cpu_list, CpuMask, CpuSet, IoPriority, IoPriorityClass, Topology,
    },
};

/// Which attribute of a process a rule's pattern is matched against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchType {
    #[default]
    #[serde(rename = "name")]
    ProcessName,
    #[serde(rename = "path")]
    ExecutablePath,
    #[serde(rename = "command")]
    CommandLine,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessName => "name",
            Self::ExecutablePath => "path",
            Self::CommandLine => "command",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::ProcessName),
            "path" => Ok(Self::ExecutablePath),
            "command" => Ok(Self::CommandLine),
            other => Err(format!(
                "unknown match type {other:?}, expected name, path or command"
            )),
        }
    }
}

/// CPU spec as written in a rule file: either a list of CPU ids or a string
/// holding a numeric list/range or a topology keyword expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CpuSpec {
    List(Vec<usize>),
    Text(String),
}

impl CpuSpec {
    pub fn resolve(&self, topology: &Topology) -> Option<CpuSet> {
        match self {
            Self::List(cpus) => Some(cpus.iter().copied().collect()),
            Self::Text(spec) => topology.resolve_cpu_spec(spec),
        }
    }
}

impl fmt::Display for CpuSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(cpus) => f.write_str(&format_cpu_list(cpus)),
            Self::Text(spec) => f.write_str(spec),
        }
    }
}

impl From<&str> for CpuSpec {
    fn from(spec: &str) -> Self {
        Self::Text(spec.to_string())
    }
}

/// One decoded rule record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "type", default)]
    pub match_type: MatchType,
    pub pattern: String,
    pub cpus: CpuSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nice: Option<i32>,
    #[serde(
        rename = "iopriorityclass",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub io_priority_class: Option<u8>,
    #[serde(
        rename = "ioprioritydata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub io_priority_data: Option<u8>,
}

impl RuleConfig {
    pub fn new(match_type: MatchType, pattern: impl Into<String>, cpus: CpuSpec) -> Self {
        Self {
            match_type,
            pattern: pattern.into(),
            cpus,
            nice: None,
            io_priority_class: None,
            io_priority_data: None,
        }
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            match_type: self.match_type,
            pattern: self.pattern.clone(),
        }
    }

    /// Rules that the flat text format can express.
    pub fn is_flat_compatible(&self) -> bool {
        self.match_type == MatchType::ProcessName
            && self.nice.is_none()
            && self.io_priority_class.is_none()
            && self.io_priority_data.is_none()
            && match &self.cpus {
                CpuSpec::List(_) => true,
                CpuSpec::Text(spec) => taskpin_cpu_utils::looks_like_cpu_list(spec),
            }
    }

    /// Validates the optional scheduling fields.
    ///
    /// A data value without a class means best-effort; a class without a
    /// data value gets the class default.
    pub fn validate(&self) -> Result<(Option<i32>, Option<IoPriority>), RuleError> {
        if self.pattern.trim().is_empty() {
            return Err(RuleError::EmptyPattern);
        }

        let nice = self
            .nice
            .map(|nice| check_nice(nice).map_err(|_| RuleError::InvalidNice(nice)))
            .transpose()?;

        let io_priority = match (self.io_priority_class, self.io_priority_data) {
            (None, None) => None,
            (class, data) => {
                let class = class.unwrap_or(IoPriorityClass::BestEffort as u8);
                let data = data.unwrap_or_else(|| {
                    IoPriorityClass::from_raw(class).map_or(0, IoPriorityClass::default_data)
                });
                let io_priority = IoPriority::new(class, data)
                    .map_err(|_| RuleError::InvalidIoPriority { class, data })?;
                Some(io_priority)
            }
        };

        Ok((nice, io_priority))
    }
}

/// Identity of a rule across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
    pub match_type: MatchType,
    pub pattern: String,
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.match_type, self.pattern)
    }
}

/// How a rule's pattern is compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Case-insensitive substring; stored lowercased
    Text(String),
    /// Case-insensitive regular expression; the source between the slashes
    Regex(String),
}

impl Pattern {
    /// `/…/` is a regex, anything else a substring.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        match raw
            .strip_prefix('/')
            .and_then(|inner| inner.strip_suffix('/'))
        {
            Some(inner) => Self::Regex(inner.to_string()),
            None => Self::Text(raw.to_lowercase()),
        }
    }
}

/// Process attributes a rule can match against.
///
/// The executable path and command line may be unknown, e.g. for kernel
/// threads; rules on an unknown attribute do not match.
pub trait ProcessInfo {
    fn name(&self) -> &str;
    fn exe_path(&self) -> Option<&str>;
    fn command_line(&self) -> Option<&str>;
}

/// Fully resolved [`ProcessInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub name: String,
    pub exe_path: Option<String>,
    pub command_line: Option<String>,
}

impl ProcessIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl ProcessInfo for ProcessIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    fn exe_path(&self) -> Option<&str> {
        self.exe_path.as_deref()
    }

    fn command_line(&self) -> Option<&str> {
        self.command_line.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityRule {
    match_type: MatchType,
    pattern: String,
    matcher: Pattern,
    cpus: CpuSet,
    mask: CpuMask,
    nice: Option<i32>,
    io_priority: Option<IoPriority>,
}

impl AffinityRule {
    /// Validate `config` and resolve its CPU spec against `topology`.
    ///
    /// A spec that resolves to no usable CPU produces an inert rule rather
    /// than an error.
    pub fn initialize(config: &RuleConfig, topology: &Topology) -> Result<Self, RuleError> {
        let (nice, io_priority) = config.validate()?;

        let cpus = config.cpus.resolve(topology).unwrap_or_default();
        let mask = CpuMask::from(&cpus);
        if mask.is_empty() {
            warn!(
                "Rule {}:{} has no usable CPUs for spec {:?}; it will never match",
                config.match_type, config.pattern, config.cpus.to_string()
            );
        }

        Ok(Self {
            match_type: config.match_type,
            pattern: config.pattern.clone(),
            matcher: Pattern::classify(&config.pattern),
            cpus,
            mask,
            nice,
            io_priority,
        })
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            match_type: self.match_type,
            pattern: self.pattern.clone(),
        }
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn cpus(&self) -> &CpuSet {
        &self.cpus
    }

    pub fn mask(&self) -> &CpuMask {
        &self.mask
    }

    pub fn nice(&self) -> Option<i32> {
        self.nice
    }

    pub fn io_priority(&self) -> Option<IoPriority> {
        self.io_priority
    }

    pub fn has_nice(&self) -> bool {
        self.nice.is_some()
    }

    pub fn has_io_priority(&self) -> bool {
        self.io_priority.is_some()
    }

    /// Inert rules are kept for diffing but never match.
    pub fn is_active(&self) -> bool {
        !self.mask.is_empty()
    }

    pub fn matches<P: ProcessInfo + ?Sized>(&self, process: &P, matcher: &PatternMatcher) -> bool {
        let subject = match self.match_type {
            MatchType::ProcessName => Some(process.name()),
            MatchType::ExecutablePath => process.exe_path(),
            MatchType::CommandLine => process.command_line(),
        };
        let Some(subject) = subject else {
            return false;
        };

        match &self.matcher {
            Pattern::Text(needle) => subject.to_lowercase().contains(needle.as_str()),
            Pattern::Regex(source) => matcher.is_match(source, subject),
        }
    }
}

impl fmt::Display for AffinityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> [{}]",
            self.match_type,
            self.pattern,
            format_cpu_list(&self.cpus)
        )?;
        if let Some(nice) = self.nice {
            write!(f, " nice={nice}")?;
        }
        if let Some(io_priority) = self.io_priority {
            write!(f, " io={io_priority}")?;
        }
        Ok(())
    }
}

/// Ordered rule list; the first active matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<AffinityRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<AffinityRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AffinityRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|rule| rule.is_active()).count()
    }

    pub fn first_match<P: ProcessInfo + ?Sized>(
        &self,
        process: &P,
        matcher: &PatternMatcher,
    ) -> Option<&AffinityRule> {
        self.rules
            .iter()
            .filter(|rule| rule.is_active())
            .find(|rule| rule.matches(process, matcher))
    }
}
