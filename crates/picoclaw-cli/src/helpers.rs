//! Terminal output helpers for the CLI.

use colored::Colorize;

/// Print the startup banner.
pub fn print_banner() {
    println!();
    println!("{}", "  picoclaw — multi-channel AI gateway".bold());
    println!("{}", "  type 'exit' or Ctrl-D to quit".dimmed());
    println!();
}

/// Print an agent response.
pub fn print_response(response: &str) {
    println!();
    println!("{} {}", "Agent:".green().bold(), response);
    println!();
}

/// Print a transient "thinking" indicator.
pub fn print_thinking() {
    use std::io::Write;
    print!("{}", "… thinking".dimmed());
    let _ = std::io::stdout().flush();
}

/// Clear the "thinking" indicator line.
pub fn clear_thinking() {
    use std::io::Write;
    print!("\r{}\r", " ".repeat(20));
    let _ = std::io::stdout().flush();
}

/// Print an error to stderr.
pub fn print_error(e: &anyhow::Error) {
    eprintln!("\n{} {e:#}\n", "error:".red().bold());
}
