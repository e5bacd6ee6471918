use super::Editor;
use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Front-end that drives an [`Editor`] until the operator commits or discards.
pub trait PeakReviewer {
    fn review(&mut self, label: &str, editor: &mut Editor) -> Result<()>;
}

const HELP: &str = "\
commands:
  a <i>          add peak at sample i
  n <i>          add peak at the largest sample near i
  d <i>          delete peak at sample i
  r <start> <end> reject peaks in [start, end)
  u <start> <end> restore rejected peaks in [start, end)
  z              undo last edit
  p              print peaks
  s | q          save and finish
  x              abort without saving";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Add(usize),
    AddNear(usize),
    Delete(usize),
    Reject(usize, usize),
    Restore(usize, usize),
    Undo,
    Print,
    Help,
    Commit,
    Discard,
}

fn parse_command(line: &str) -> std::result::Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(Command::Help);
    };
    let mut arg = |name: &str| -> std::result::Result<usize, String> {
        let raw = parts
            .next()
            .ok_or_else(|| format!("'{verb}' needs <{name}>"))?;
        raw.parse::<usize>()
            .map_err(|_| format!("<{name}> must be a sample index, got '{raw}'"))
    };
    let cmd = match verb {
        "a" | "add" => Command::Add(arg("i")?),
        "n" | "near" => Command::AddNear(arg("i")?),
        "d" | "del" | "delete" => Command::Delete(arg("i")?),
        "r" | "reject" => Command::Reject(arg("start")?, arg("end")?),
        "u" | "restore" => Command::Restore(arg("start")?, arg("end")?),
        "z" | "undo" => Command::Undo,
        "p" | "print" => Command::Print,
        "h" | "help" | "?" => Command::Help,
        "s" | "save" | "q" | "quit" => Command::Commit,
        "x" | "abort" => Command::Discard,
        other => return Err(format!("unknown command '{other}' (h for help)")),
    };
    Ok(cmd)
}

/// Line-oriented reviewer reading commands from any buffered source.
pub struct ConsoleReviewer<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn print_state(&mut self, editor: &Editor) -> Result<()> {
        let record = editor.record();
        writeln!(
            self.output,
            "{} peak(s), {} rejected, {} edit(s) this session",
            editor.peaks().len(),
            editor.rejected().len(),
            editor.session_ops().len()
        )?;
        writeln!(self.output, "peaks: {:?}", editor.peaks())?;
        if !editor.rejected().is_empty() {
            writeln!(self.output, "rejected: {:?}", editor.rejected())?;
        }
        let ibi: Vec<String> = editor
            .peaks()
            .windows(2)
            .map(|w| format!("{:.0}", (w[1] - w[0]) as f64 / record.fs() * 1000.0))
            .collect();
        if !ibi.is_empty() {
            writeln!(self.output, "ibi (ms): {}", ibi.join(" "))?;
        }
        Ok(())
    }

    fn execute(&mut self, editor: &mut Editor, cmd: Command) -> Result<bool> {
        let outcome = match cmd {
            Command::Add(i) => editor.add_peak(i).map(|_| format!("added {i}")),
            Command::AddNear(i) => match editor.nearest_extremum(i, editor.tolerance() * 5) {
                Some(best) => editor.add_peak(best).map(|_| format!("added {best}")),
                None => Ok(format!("no sample near {i}")),
            },
            Command::Delete(i) => editor.delete_peak(i).map(|_| format!("deleted {i}")),
            Command::Reject(s, e) => editor
                .reject_range(s, e)
                .map(|n| format!("rejected {n} peak(s)")),
            Command::Restore(s, e) => editor
                .restore_range(s, e)
                .map(|n| format!("restored {n} peak(s)")),
            Command::Undo => editor.undo().map(|op| format!("undid {op:?}")),
            Command::Print => {
                self.print_state(editor)?;
                return Ok(false);
            }
            Command::Help => {
                writeln!(self.output, "{HELP}")?;
                return Ok(false);
            }
            Command::Commit => {
                editor.commit()?;
                writeln!(self.output, "saved {} peak(s)", editor.peaks().len())?;
                return Ok(true);
            }
            Command::Discard => {
                editor.discard()?;
                writeln!(self.output, "discarded session edits")?;
                return Ok(true);
            }
        };
        match outcome {
            Ok(msg) => writeln!(self.output, "{msg}")?,
            Err(err) if err.is_recoverable() => writeln!(self.output, "error: {err}")?,
            Err(err) => return Err(err.into()),
        }
        Ok(false)
    }
}

impl<R: BufRead, W: Write> PeakReviewer for ConsoleReviewer<R, W> {
    fn review(&mut self, label: &str, editor: &mut Editor) -> Result<()> {
        writeln!(self.output, "reviewing {label} (h for help)")?;
        self.print_state(editor)?;
        let mut line = String::new();
        loop {
            write!(self.output, "> ")?;
            self.output.flush()?;
            line.clear();
            let read = self
                .input
                .read_line(&mut line)
                .context("reading operator input")?;
            if read == 0 {
                writeln!(self.output)?;
                editor.discard()?;
                log::warn!("input closed while reviewing {label}; edits discarded");
                return Ok(());
            }
            match parse_command(line.trim()) {
                Ok(cmd) => {
                    if self.execute(editor, cmd)? {
                        return Ok(());
                    }
                }
                Err(msg) => writeln!(self.output, "{msg}")?,
            }
        }
    }
}
