use {
    anyhow::Context,
    clap::Args,
    std::{path::Path, slice},
    taskpin_cpu_utils::{format_cpu_list, Topology},
    taskpin_thread_pinner::{config::warn_unresolved, CpuSpec, MatchType, RuleConfig, RuleFile},
};

#[derive(Debug, Args)]
pub struct RuleArgs {
    /// CPU list, keyword or expression, e.g. 0-3, P, all-e
    cpus: String,

    /// Case-insensitive substring, or a regular expression wrapped in slashes
    pattern: String,

    /// What the pattern is matched against
    #[arg(long = "type", default_value_t = MatchType::ProcessName)]
    match_type: MatchType,

    /// Niceness, -20 to 19
    #[arg(long, allow_negative_numbers = true)]
    nice: Option<i32>,

    /// I/O scheduling class: 1 real-time, 2 best-effort, 3 idle
    #[arg(long)]
    io_class: Option<u8>,

    /// I/O priority level within the class, 0 (highest) to 7
    #[arg(long)]
    io_data: Option<u8>,
}

impl RuleArgs {
    pub fn record(&self) -> RuleConfig {
        RuleConfig {
            nice: self.nice,
            io_priority_class: self.io_class,
            io_priority_data: self.io_data,
            ..RuleConfig::new(
                self.match_type,
                self.pattern.as_str(),
                CpuSpec::from(self.cpus.as_str()),
            )
        }
    }

    fn validated_record(&self) -> anyhow::Result<RuleConfig> {
        let record = self.record();
        record
            .validate()
            .with_context(|| format!("Invalid rule {}", record.key()))?;
        warn_unresolved(slice::from_ref(&record), &Topology::detect());
        Ok(record)
    }
}

pub fn save(config_path: &Path, args: &RuleArgs) -> anyhow::Result<()> {
    let record = args.validated_record()?;
    let key = record.key();
    let mut file = RuleFile::open(config_path)?;
    let replaced = file.upsert(record)?;
    file.save()?;
    println!(
        "{} rule {key} in {}",
        if replaced { "Updated" } else { "Added" },
        config_path.display()
    );
    Ok(())
}

pub fn update(config_path: &Path, args: &RuleArgs) -> anyhow::Result<()> {
    let record = args.validated_record()?;
    let key = record.key();
    let mut file = RuleFile::open(config_path)?;
    file.update(record)?;
    file.save()?;
    println!("Updated rule {key} in {}", config_path.display());
    Ok(())
}

pub fn remove(config_path: &Path, match_type: MatchType, pattern: &str) -> anyhow::Result<()> {
    let mut file = RuleFile::open(config_path)?;
    let removed = file.remove(match_type, pattern)?;
    if removed > 0 {
        file.save()?;
    }
    println!(
        "Removed {removed} rule(s) matching {match_type}:{pattern} from {}",
        config_path.display()
    );
    Ok(())
}

pub fn list(config_path: &Path) -> anyhow::Result<()> {
    let file = RuleFile::open(config_path)?;
    if file.records().is_empty() {
        println!("No rules in {}", config_path.display());
        return Ok(());
    }
    let topology = Topology::detect();
    println!("Rules in {} ({:?} format):", config_path.display(), file.format());
    for record in file.records() {
        println!("  {}", describe(record, &topology));
    }
    Ok(())
}

fn describe(record: &RuleConfig, topology: &Topology) -> String {
    let resolved = match record.cpus.resolve(topology) {
        Some(cpus) if !cpus.is_empty() => format_cpu_list(&cpus),
        _ => "none on this machine".to_string(),
    };
    let mut line = format!(
        "{:<8} {:<32} cpus={} ({resolved})",
        record.match_type, record.pattern, record.cpus
    );
    if let Some(nice) = record.nice {
        line.push_str(&format!(" nice={nice}"));
    }
    if let Ok((_, Some(io_priority))) = record.validate() {
        line.push_str(&format!(" io={io_priority}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{collections::BTreeMap, fs},
        taskpin_cpu_utils::CpuSet,
        taskpin_thread_pinner::ConfigError,
        tempfile::TempDir,
    };

    fn args(cpus: &str, pattern: &str) -> RuleArgs {
        RuleArgs {
            cpus: cpus.to_string(),
            pattern: pattern.to_string(),
            match_type: MatchType::ProcessName,
            nice: None,
            io_class: None,
            io_data: None,
        }
    }

    #[test]
    fn test_save_update_remove_flat() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taskpin.conf");
        fs::write(&path, "# keep me\nfirefox:0-3\n").unwrap();

        save(&path, &args("4-7", "chrome")).unwrap();
        update(&path, &args("1", "firefox")).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# keep me\nfirefox:1\nchrome:4-7\n"
        );

        let err = update(&path, &args("1", "thunderbird")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::RuleNotFound { .. })
        ));

        remove(&path, MatchType::ProcessName, "firefox").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# keep me\nchrome:4-7\n");
    }

    #[test]
    fn test_invalid_rule_is_not_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taskpin.conf");
        fs::write(&path, "[]").unwrap();
        let mut bad = args("0", "db");
        bad.io_class = Some(9);
        assert!(save(&path, &bad).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn test_describe() {
        let siblings: BTreeMap<usize, CpuSet> =
            (0..4).map(|cpu| (cpu, CpuSet::from([cpu]))).collect();
        let topology = Topology::from_siblings(&siblings, &BTreeMap::new());
        let mut rule = args("all", "db");
        rule.nice = Some(-3);
        rule.io_class = Some(3);
        let line = describe(&rule.record(), &topology);
        assert!(line.starts_with("name"));
        assert!(line.contains("cpus=all (0-3)"));
        assert!(line.ends_with("nice=-3 io=idle/0"));

        let line = describe(&args("P", "db").record(), &topology);
        assert!(line.contains("(none on this machine)"));
    }
}
