use taskpin_cpu_utils::{format_cpu_list, Topology, KEYWORD_ALIASES};

pub fn print_topology() {
    let topology = Topology::detect();
    print!("{topology}");
    println!();
    print!("{}", keyword_table(&topology));
}

fn keyword_table(topology: &Topology) -> String {
    let mut table = String::from("CPU keywords (combine with + and -, e.g. all-e):\n");
    for (_, aliases) in KEYWORD_ALIASES {
        let resolved = aliases
            .first()
            .and_then(|alias| topology.resolve_keyword(alias))
            .filter(|cpus| !cpus.is_empty())
            .map_or_else(|| "-".to_string(), format_cpu_list);
        table.push_str(&format!("  {:<56} {resolved}\n", aliases.join(", ")));
    }
    table
}
