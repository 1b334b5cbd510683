//! Choosing one entry from a list (accounts, roles).

use std::io::{BufRead, Write};

use crate::app::error::{AwscError, Result};

pub trait Picker: Send + Sync {
    /// Index of the chosen item, or `None` when the user quits.
    fn pick(&self, title: &str, items: &[String]) -> Result<Option<usize>>;
}

/// Numbered list on stdout, answer read from stdin. `q` or an empty line quits.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptPicker;

impl Picker for PromptPicker {
    fn pick(&self, title: &str, items: &[String]) -> Result<Option<usize>> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        pick_from(&mut stdin.lock(), &mut stdout.lock(), title, items)
    }
}

pub fn pick_from<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    title: &str,
    items: &[String],
) -> Result<Option<usize>> {
    let out_err = |e: std::io::Error| AwscError::io("<stdout>", e);

    writeln!(output, "{}", title).map_err(out_err)?;
    for (i, item) in items.iter().enumerate() {
        writeln!(output, "  {:>3}) {}", i + 1, item).map_err(out_err)?;
    }

    loop {
        write!(output, "Choice [1-{}, q to quit]: ", items.len()).map_err(out_err)?;
        output.flush().map_err(out_err)?;

        let mut line = String::new();
        if input.read_line(&mut line).map_err(|e| AwscError::io("<stdin>", e))? == 0 {
            return Ok(None);
        }
        let answer = line.trim();
        if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        match answer.parse::<usize>() {
            Ok(n) if (1..=items.len()).contains(&n) => {
                writeln!(output, "✓ Selected: {}", items[n - 1]).map_err(out_err)?;
                return Ok(Some(n - 1));
            }
            _ => writeln!(output, "Please enter a number between 1 and {}", items.len()).map_err(out_err)?,
        }
    }
}
