//! Rule file decoding, encoding and editing.
//!
//! Two formats are accepted and detected by content: a JSON array of
//! [`RuleConfig`] records, and a flat text format with one `pattern:cpus`
//! name rule per line and `#` comments.

use {
    crate::{
        error::ConfigError,
        rule::{AffinityRule, CpuSpec, MatchType, RuleConfig, RuleSet},
    },
    log::{info, warn},
    std::{
        fs,
        io::ErrorKind,
        path::{Path, PathBuf},
    },
    taskpin_cpu_utils::{looks_like_cpu_list, Topology},
};

pub const CONFIG_FILE_NAME: &str = "taskpin.conf";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/taskpin.conf";

const TEMPLATE: &str = "\
# taskpin rule file
#
# Flat format, one rule per line:
#   process-name-pattern:cpu-list
#
# The pattern is a case-insensitive substring of the process name, or a
# regular expression when wrapped in slashes. The CPU list is a comma
# separated list of CPU ids and ranges.
#
# Examples:
#   firefox:0-3
#   /^chrom(e|ium)$/:4-7,12
#
# For path or command line rules, niceness, I/O priority and CPU keywords
# such as P, E, physical or all-logical, use the JSON format instead:
#   [
#     {\"type\": \"command\", \"pattern\": \"--type=renderer\", \"cpus\": \"E\",
#      \"nice\": 5, \"iopriorityclass\": 3}
#   ]
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Flat,
}

impl ConfigFormat {
    /// JSON iff the first non-whitespace character opens an array.
    pub fn detect(content: &str) -> Self {
        if content.trim_start().starts_with('[') {
            Self::Json
        } else {
            Self::Flat
        }
    }
}

/// Decode rule records, detecting the format.
pub fn decode(content: &str) -> Result<Vec<RuleConfig>, ConfigError> {
    match ConfigFormat::detect(content) {
        ConfigFormat::Json => Ok(serde_json::from_str(content)?),
        ConfigFormat::Flat => decode_flat(content),
    }
}

/// Splits a flat line into pattern and CPU list. `None` for blank and comment
/// lines.
fn parse_flat_line(line: &str) -> Option<Result<(&str, &str), &'static str>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    // Process names may contain ':' (e.g. kworker/0:1), CPU lists never do
    let Some((pattern, cpus)) = line.rsplit_once(':') else {
        return Some(Err("expected pattern:cpus"));
    };
    let (pattern, cpus) = (pattern.trim(), cpus.trim());
    if pattern.is_empty() {
        return Some(Err("empty pattern"));
    }
    if cpus.is_empty() || !looks_like_cpu_list(cpus) {
        return Some(Err("CPU list must be numeric, e.g. 0-3,6"));
    }
    Some(Ok((pattern, cpus)))
}

pub fn decode_flat(content: &str) -> Result<Vec<RuleConfig>, ConfigError> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            parse_flat_line(line).map(|parsed| {
                parsed
                    .map(|(pattern, cpus)| {
                        RuleConfig::new(MatchType::ProcessName, pattern, CpuSpec::from(cpus))
                    })
                    .map_err(|reason| ConfigError::Malformed {
                        location: format!("line {}", index.saturating_add(1)),
                        reason: reason.to_string(),
                    })
            })
        })
        .collect()
}

fn flat_line(record: &RuleConfig) -> String {
    format!("{}:{}", record.pattern, record.cpus)
}

pub fn encode(format: ConfigFormat, records: &[RuleConfig]) -> Result<String, ConfigError> {
    match format {
        ConfigFormat::Json => {
            let mut content = serde_json::to_string_pretty(records)?;
            content.push('\n');
            Ok(content)
        }
        ConfigFormat::Flat => {
            if let Some(record) = records.iter().find(|record| !record.is_flat_compatible()) {
                return Err(flat_unsupported(record));
            }
            Ok(records
                .iter()
                .map(|record| flat_line(record) + "\n")
                .collect())
        }
    }
}

fn flat_unsupported(record: &RuleConfig) -> ConfigError {
    ConfigError::Unsupported(format!(
        "rule {} cannot be stored in a flat rule file; only name rules with a numeric CPU list \
         are supported, use a JSON rule file instead",
        record.key()
    ))
}

/// Initialize every record against `topology`.
///
/// Any invalid record rejects the whole set, and so does a set in which no
/// rule has a usable CPU.
pub fn build_rule_set(records: &[RuleConfig], topology: &Topology) -> Result<RuleSet, ConfigError> {
    let rules = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            AffinityRule::initialize(record, topology).map_err(|source| ConfigError::InvalidRule {
                index,
                pattern: record.pattern.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rule_set = RuleSet::new(rules);
    if rule_set.active_count() == 0 {
        return Err(ConfigError::NoValidRules);
    }
    Ok(rule_set)
}

pub fn load_rule_set(path: &Path, topology: &Topology) -> Result<RuleSet, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
    let records = decode(&content)?;
    build_rule_set(&records, topology)
}

/// `~/.config/taskpin.conf` when it exists, otherwise `/etc/taskpin.conf`.
pub fn default_config_path() -> PathBuf {
    default_config_path_in(dirs::home_dir().as_deref())
}

fn default_config_path_in(home: Option<&Path>) -> PathBuf {
    home.map(|home| home.join(".config").join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH))
}

/// Write a commented example rule file to `path`, creating parent
/// directories.
pub fn write_template(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| ConfigError::io(parent, err))?;
    }
    fs::write(path, TEMPLATE).map_err(|err| ConfigError::io(path, err))?;
    info!("Wrote example rule file to {}", path.display());
    Ok(())
}

/// Write `records` to `path` in `format`, replacing the file atomically.
pub fn persist(path: &Path, format: ConfigFormat, records: &[RuleConfig]) -> Result<(), ConfigError> {
    let content = encode(format, records)?;
    write_atomically(path, &content)
}

fn write_atomically(path: &Path, content: &str) -> Result<(), ConfigError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content).map_err(|err| ConfigError::io(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| ConfigError::io(path, err))
}

fn same_key(record: &RuleConfig, match_type: MatchType, pattern: &str) -> bool {
    record.match_type == match_type && record.pattern.eq_ignore_ascii_case(pattern)
}

/// A rule file opened for editing.
///
/// Rules are keyed by match type and a case-insensitive pattern. Edits to a
/// flat file rewrite only the affected lines, so comments and the order of
/// unrelated rules survive.
#[derive(Debug)]
pub struct RuleFile {
    path: PathBuf,
    format: ConfigFormat,
    lines: Vec<String>,
    records: Vec<RuleConfig>,
}

impl RuleFile {
    /// Open `path`; a missing file is an empty flat file.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(ConfigError::io(path, err)),
        };
        let format = ConfigFormat::detect(&content);
        let records = decode(&content)?;
        let lines = match format {
            ConfigFormat::Flat => content.lines().map(str::to_string).collect(),
            ConfigFormat::Json => Vec::new(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            format,
            lines,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ConfigFormat {
        self.format
    }

    pub fn records(&self) -> &[RuleConfig] {
        &self.records
    }

    pub fn contains(&self, match_type: MatchType, pattern: &str) -> bool {
        self.records
            .iter()
            .any(|record| same_key(record, match_type, pattern))
    }

    /// Replace the rule with the same key, or append it. Returns whether an
    /// existing rule was replaced.
    pub fn upsert(&mut self, record: RuleConfig) -> Result<bool, ConfigError> {
        let existed = self.contains(record.match_type, &record.pattern);
        match self.format {
            ConfigFormat::Json => {
                if let Some(index) = self
                    .records
                    .iter()
                    .position(|existing| same_key(existing, record.match_type, &record.pattern))
                {
                    self.records[index] = record;
                    let key = self.records[index].key();
                    let mut position = 0;
                    self.records.retain(|existing| {
                        let keep = position <= index
                            || !same_key(existing, key.match_type, &key.pattern);
                        position = position.saturating_add(1);
                        keep
                    });
                } else {
                    self.records.push(record);
                }
            }
            ConfigFormat::Flat => {
                if !record.is_flat_compatible() {
                    return Err(flat_unsupported(&record));
                }
                let replacement = flat_line(&record);
                let mut replaced = false;
                self.lines.retain_mut(|line| {
                    let matches = matches!(
                        parse_flat_line(line),
                        Some(Ok((pattern, _))) if pattern.eq_ignore_ascii_case(&record.pattern)
                    );
                    if !matches {
                        return true;
                    }
                    if replaced {
                        return false;
                    }
                    replaced = true;
                    *line = replacement.clone();
                    true
                });
                if !replaced {
                    self.lines.push(replacement);
                }
                self.records = decode_flat(&self.lines.join("\n"))?;
            }
        }
        Ok(existed)
    }

    /// Like [`RuleFile::upsert`], but the rule must already exist.
    pub fn update(&mut self, record: RuleConfig) -> Result<(), ConfigError> {
        if !self.contains(record.match_type, &record.pattern) {
            return Err(ConfigError::RuleNotFound {
                match_type: record.match_type.to_string(),
                pattern: record.pattern,
            });
        }
        self.upsert(record).map(|_| ())
    }

    /// Remove every rule with the given key. Returns how many were removed.
    pub fn remove(&mut self, match_type: MatchType, pattern: &str) -> Result<usize, ConfigError> {
        let before = self.records.len();
        match self.format {
            ConfigFormat::Json => self
                .records
                .retain(|record| !same_key(record, match_type, pattern)),
            ConfigFormat::Flat => {
                if match_type == MatchType::ProcessName {
                    self.lines.retain(|line| {
                        !matches!(
                            parse_flat_line(line),
                            Some(Ok((existing, _))) if existing.eq_ignore_ascii_case(pattern)
                        )
                    });
                }
                self.records = decode_flat(&self.lines.join("\n"))?;
            }
        }
        Ok(before.saturating_sub(self.records.len()))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        match self.format {
            ConfigFormat::Json => persist(&self.path, ConfigFormat::Json, &self.records),
            ConfigFormat::Flat => {
                let mut content = self.lines.join("\n");
                content.push('\n');
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent).map_err(|err| ConfigError::io(parent, err))?;
                }
                write_atomically(&self.path, &content)
            }
        }
    }
}

/// Warn about rules whose CPU spec cannot be resolved on this machine.
pub fn warn_unresolved(records: &[RuleConfig], topology: &Topology) {
    for record in records {
        if record.cpus.resolve(topology).is_none_or(|cpus| cpus.is_empty()) {
            warn!(
                "Rule {} uses CPU spec {:?}, which resolves to no CPU on this machine",
                record.key(),
                record.cpus.to_string()
            );
        }
    }
}
