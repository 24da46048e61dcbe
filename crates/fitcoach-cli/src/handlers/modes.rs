//! `modes`: list the coaching modes.

use fitcoach_realtime::CoachMode;

pub fn execute() {
    println!("{}", render());
}

pub fn render() -> String {
    CoachMode::ALL
        .iter()
        .map(|mode| format!("  {:<10} {}", mode.as_str(), mode.description()))
        .collect::<Vec<_>>()
        .join("\n")
}
