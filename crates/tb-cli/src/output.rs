use colored::Colorize;
use tb_core::{EntryLevel, ReportSection, TestExecutionResult};

pub fn print_section(group: &str, section: &ReportSection) {
    let mark = if section.was_successful() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!("{} {} {}", mark, section.name().bold(), format!("[{group}]").dimmed());

    for (at, entry) in section.entries() {
        let level = match entry.level {
            EntryLevel::Error => entry.level.icon().red(),
            EntryLevel::Warning => entry.level.icon().yellow(),
            EntryLevel::Info => entry.level.icon().cyan(),
        };
        println!(
            "    {} {} {}",
            at.format("%H:%M:%S%.3f").to_string().dimmed(),
            level,
            entry.text
        );
    }
}

pub fn print_result(result: TestExecutionResult) {
    match result {
        TestExecutionResult::Passed => println!("\n{}", "Run passed".green().bold()),
        TestExecutionResult::Failed => println!("\n{}", "Run failed".red().bold()),
    }
}
