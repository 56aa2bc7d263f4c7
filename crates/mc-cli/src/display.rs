//! Terminal rendering of a turn in progress.
//!
//! The core pushes the full current text of a region on every update; a
//! scrolling terminal can only append, so the sink remembers how much of each
//! region it already printed and writes the remainder.

use std::io::{self, Write};

use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use mc_core::{DisplaySink, TraceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Answer,
    ToolTrace,
}

pub struct TerminalSink<W: Write> {
    out: W,
    color: bool,
    answer_printed: usize,
    trace_printed: usize,
    active: Option<Region>,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), true)
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            answer_printed: 0,
            trace_printed: 0,
            active: None,
        }
    }

    /// End the turn's output and reset for the next one.
    pub fn finish(&mut self) {
        if self.active.is_some() {
            if let Err(e) = writeln!(self.out, "\n").and_then(|_| self.out.flush()) {
                tracing::debug!(error = %e, "Failed to write to terminal");
            }
        }
        self.answer_printed = 0;
        self.trace_printed = 0;
        self.active = None;
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, region: Region, text: &str) {
        if let Err(e) = self.write_region(region, text) {
            tracing::debug!(error = %e, "Failed to write to terminal");
        }
    }

    fn write_region(&mut self, region: Region, text: &str) -> io::Result<()> {
        let printed = match region {
            Region::Answer => self.answer_printed,
            Region::ToolTrace => self.trace_printed,
        };

        let suffix = if printed <= text.len() && text.is_char_boundary(printed) {
            &text[printed..]
        } else {
            // Buffer no longer extends what we printed; start the region over.
            writeln!(self.out)?;
            text
        };
        if suffix.is_empty() {
            return Ok(());
        }

        if self.active != Some(region) {
            if self.active.is_some() {
                writeln!(self.out)?;
            }
            if region == Region::Answer {
                self.write_styled(Color::Cyan, "assistant> ")?;
            }
            self.active = Some(region);
        }

        match region {
            Region::Answer => write!(self.out, "{suffix}")?,
            Region::ToolTrace => self.write_styled(Color::DarkGrey, suffix)?,
        }
        self.out.flush()?;

        match region {
            Region::Answer => self.answer_printed = text.len(),
            Region::ToolTrace => self.trace_printed = text.len(),
        }
        Ok(())
    }

    fn write_styled(&mut self, color: Color, text: &str) -> io::Result<()> {
        if self.color {
            queue!(self.out, SetForegroundColor(color), Print(text), ResetColor)
        } else {
            write!(self.out, "{text}")
        }
    }
}

impl<W: Write> DisplaySink for TerminalSink<W> {
    fn update_answer(&mut self, text: &str) {
        self.render(Region::Answer, text);
    }

    fn update_tool_trace(&mut self, text: &str, status: TraceStatus) {
        self.render(Region::ToolTrace, text);
        if status == TraceStatus::Complete {
            tracing::trace!(len = text.len(), "Tool trace complete");
        }
    }
}

/// Print a line in the given color.
pub fn print_colored(color: Color, text: &str) {
    let mut stdout = io::stdout();
    let result = queue!(stdout, SetForegroundColor(color), Print(text), Print("\n"), ResetColor)
        .and_then(|_| stdout.flush());
    if let Err(e) = result {
        tracing::debug!(error = %e, "Failed to write to terminal");
    }
}
