use crate::dependents::ResolvedTable;
use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info),
        label.style(theme().dim),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim).to_string()
}

pub fn timing(elapsed: &str) {
    println!("{} {}", Icons::CLOCK.style(theme().dim), elapsed);
}

/// One line of a dependent-table listing: `label  class  schema.table`
pub fn dependent(entry: &ResolvedTable) {
    println!(
        "  {:<8} {} {}",
        entry.label.as_str().style(theme().label(entry.label)),
        entry.class_name,
        dim(&entry.table.to_string())
    );
}

pub fn deleted(table: &str, rows: usize) {
    println!("{} {} {}", Icons::DEL.style(theme().warn), table, dim(&format!("({} rows)", rows)));
}
