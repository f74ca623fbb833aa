use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use masonshell_installer::{PipelineReporter, Stage};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_tty: bool, _stderr_tty: bool) -> OutputStyle {
    if stdout_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || std::env::var_os("MASONSHELL_PLAIN").is_some() {
        return OutputStyle::Plain;
    }
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    )
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status.to_ascii_uppercase()),
    }
}

const SECTION_COLOR: AnsiColor = AnsiColor::BrightBlue;
const PROGRESS_LABEL_COLOR: AnsiColor = AnsiColor::BrightCyan;
const PROGRESS_BAR_COLOR: AnsiColor = AnsiColor::BrightBlue;

fn paint(color: AnsiColor, bold: bool, text: &str) -> String {
    let mut style = Style::new().fg_color(Some(color.into()));
    if bold {
        style = style.effects(Effects::BOLD);
    }
    format!("{}{text}{}", style.render(), style.render_reset())
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    /// Section headers only make sense on an interactive terminal; plain
    /// output stays a flat stream of status lines.
    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", paint(SECTION_COLOR, true, &format!("== {title} ==")));
        }
    }

    pub(crate) fn start_progress(self, label: &str, total: Option<u64>) -> TerminalProgress {
        let progress_bar = match self.style {
            OutputStyle::Plain => None,
            OutputStyle::Rich => Some(build_progress_bar(label, total)),
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }
}

fn build_progress_bar(label: &str, total: Option<u64>) -> ProgressBar {
    let (bar, template) = match total {
        Some(total) => (
            ProgressBar::new(total.max(1)),
            "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {bytes:>9}/{total_bytes:9}",
        ),
        None => (
            ProgressBar::new_spinner(),
            "{spinner:.cyan.bold} {msg:<12} {bytes:>9}",
        ),
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style.tick_chars(".oO@* ").progress_chars("=>-"));
    }
    bar.set_message(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: Option<u64>,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalProgress {
    /// Later callbacks can learn the total (redirect resolved to a sized
    /// response), so a known total always wins over an earlier unknown.
    pub(crate) fn set(&mut self, current: u64, total: Option<u64>) {
        if total.is_some() {
            self.total = total;
        }
        self.current = match self.total {
            Some(total) => current.min(total),
            None => current,
        };

        if let Some(bar) = &self.progress_bar {
            if let Some(total) = self.total {
                bar.set_length(total.max(1));
            }
            bar.set_position(self.current);
        }
    }

    pub(crate) fn completed(&self) -> bool {
        match self.total {
            Some(total) => self.current >= total.max(1),
            None => self.current > 0,
        }
    }

    pub(crate) fn finish_success(mut self) {
        if let Some(bar) = self.progress_bar.take() {
            bar.finish_and_clear();
            let elapsed = self.started_at.elapsed();
            if let Some(line) = render_progress_line(
                self.style,
                &self.label,
                self.current,
                self.total,
                Some(elapsed),
            ) {
                println!("{line}");
            }
        }
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(bar) = self.progress_bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Relays pipeline events to the terminal: stage changes become section
/// headers, notes and warnings become status lines, download callbacks drive
/// one progress bar at a time.
pub(crate) struct PipelineConsole {
    renderer: TerminalRenderer,
    progress: Option<TerminalProgress>,
}

impl PipelineConsole {
    pub(crate) fn new(renderer: TerminalRenderer) -> Self {
        Self {
            renderer,
            progress: None,
        }
    }

    fn take_progress(&mut self) {
        let Some(progress) = self.progress.take() else {
            return;
        };
        if progress.completed() {
            progress.finish_success();
        } else {
            progress.finish_abandon();
        }
    }
}

impl PipelineReporter for PipelineConsole {
    fn stage_changed(&mut self, stage: Stage) {
        self.take_progress();
        if stage != Stage::Done {
            self.renderer.print_section(stage.as_str());
        }
    }

    fn progress(&mut self, bytes: u64, total: Option<u64>) {
        if self.progress.is_none() {
            self.progress = Some(self.renderer.start_progress("download", total));
        }
        if let Some(progress) = self.progress.as_mut() {
            progress.set(bytes, total);
        }
    }

    fn note(&mut self, message: &str) {
        self.renderer.print_status("ok", message);
    }

    fn warn(&mut self, message: &str) {
        eprintln!("{}", render_status_line(self.renderer.style, "warn", message));
    }
}

impl Drop for PipelineConsole {
    fn drop(&mut self) {
        self.take_progress();
    }
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    format!("{}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis())
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: Option<u64>,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let label = paint(PROGRESS_LABEL_COLOR, true, label);
    let suffix = match elapsed {
        Some(value) => format!(" complete in {}", format_elapsed(value)),
        None => String::new(),
    };

    let Some(total) = total else {
        return Some(format!("{label} {}{suffix}", HumanBytes(current)));
    };

    let total = total.max(1);
    let current = current.min(total);
    let width = 18_u64;
    let filled = ((current * width) / total) as usize;
    let mut bar = "=".repeat(filled);
    bar.push_str(&"-".repeat(width as usize - filled));
    Some(format!(
        "{label} [{}] {:>3}% {}/{}{suffix}",
        paint(PROGRESS_BAR_COLOR, false, &bar),
        (current * 100) / total,
        HumanBytes(current),
        HumanBytes(total),
    ))
}
