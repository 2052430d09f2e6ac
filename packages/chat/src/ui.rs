//! UI utilities for the terminal client.

use std::io::Write;

pub(crate) const PROMPT: &str = "> ";

/// Redisplay the prompt after printing asynchronous output
pub(crate) fn redisplay_prompt() {
    print!("{}", PROMPT);
    std::io::stdout().flush().ok();
}

/// Print a block of output on its own lines, then restore the prompt
pub(crate) fn print_block(text: &str) {
    print!("\n{}", text);
    if !text.ends_with('\n') {
        println!();
    }
    redisplay_prompt();
}
