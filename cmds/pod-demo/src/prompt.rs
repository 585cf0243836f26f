//! Operator acknowledgment between demo phases.

use std::io::{BufRead, Write};

use crate::error::DemoError;

pub const PROMPT: &str = "-> Press Return key to continue.";

/// Print the prompt and block until a line (or end of input) arrives on `input`.
///
/// The content of the line is ignored and need not be UTF-8.
pub fn wait_for_ack<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<(), DemoError> {
	write!(output, "{}", PROMPT)?;
	output.flush()?;

	input
		.read_until(b'\n', &mut Vec::new())
		.map_err(DemoError::InputRead)?;

	writeln!(output)?;
	Ok(())
}
