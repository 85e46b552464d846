// Rich terminal output for dutrun

use std::io::{self, IsTerminal};
use std::path::Path;

use colored::*;
use console::{Key, Term};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::watch;

use super::device_log::LogEntry;
use super::events::{DeviceStatus, RunEvent, UnitStatus};
use crate::executor::RunReport;
use crate::parser::RunConfig;

/// Terminal output manager
pub struct TerminalOutput {
    multi_progress: MultiProgress,
    verbose: bool,
    quiet: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = io::stdout().is_terminal();

        // Respect NO_COLOR environment variable (https://no-color.org/)
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        let multi_progress = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        TerminalOutput {
            multi_progress,
            verbose,
            quiet,
            is_tty,
        }
    }

    /// Print the configuration about to run, passwords masked
    pub fn print_config(&self, config: &RunConfig) {
        if self.quiet {
            return;
        }

        println!();
        println!(
            "{} {} ({} devices, {} commands)",
            "CONFIG".green().bold(),
            config.name.cyan(),
            config.devices.len(),
            config.commands.len()
        );
        println!("{}", "─".repeat(60).dimmed());

        println!("{}", "Devices".yellow().bold());
        for device in &config.devices {
            println!(
                "  {:<30} user={}  password={}",
                format!("{}:{}", device.hostname, device.port).white().bold(),
                device.username,
                device.credential.masked().dimmed()
            );
        }

        println!("{}", "Commands".yellow().bold());
        for (i, command) in config.commands.iter().enumerate() {
            println!("  {:>3}. {}", i + 1, command);
        }
        println!();
    }

    /// Ask to go ahead: Enter continues, Esc or Ctrl+C cancels
    pub fn confirm(&self) -> io::Result<bool> {
        let term = Term::stderr();
        if !term.is_term() {
            return Ok(true);
        }

        term.write_line(&format!(
            "{}",
            "Press Enter to start, Esc to cancel".yellow().bold()
        ))?;

        loop {
            match term.read_key()? {
                Key::Enter => return Ok(true),
                Key::Escape | Key::CtrlC => return Ok(false),
                _ => {}
            }
        }
    }

    /// Progress bar counting execution units across the whole run
    pub fn unit_progress(&self, total: usize) -> ProgressBar {
        let pb = self.multi_progress.add(ProgressBar::new(total as u64));

        let style = if self.is_tty {
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} units")
                .map(|s| s.progress_chars("█▓░"))
        } else {
            ProgressStyle::default_bar().template("{pos}/{len} units")
        };
        if let Ok(style) = style {
            pb.set_style(style);
        }

        pb
    }

    /// Print a live event above the progress bar
    pub fn print_event(&self, event: &RunEvent) {
        if self.quiet {
            return;
        }

        let line = match event {
            RunEvent::DeviceStarted { host } => {
                if !self.verbose {
                    return;
                }
                format!("{} {}", "START".cyan(), host.white().bold())
            }
            RunEvent::UnitFinished {
                host,
                index,
                status,
            } => {
                let label = match status {
                    UnitStatus::Ok | UnitStatus::Slept => {
                        if !self.verbose {
                            return;
                        }
                        "OK".green()
                    }
                    UnitStatus::RemoteError => "STDERR".yellow(),
                    UnitStatus::TimedOut => "TIMEOUT".red(),
                    UnitStatus::ConnectionLost => "DROPPED".red(),
                    UnitStatus::Skipped => "SKIPPED".cyan(),
                };
                format!("  {} {} unit {}", label, "=>".dimmed(), format!("{}#{}", host, index + 1).white())
            }
            RunEvent::DeviceFinished {
                host,
                status,
                duration,
            } => format!(
                "{} {} ({:.1}s)",
                status_label(*status),
                host.white().bold(),
                duration.as_secs_f64()
            ),
        };

        let _ = self.multi_progress.println(line);
    }

    /// Print the per-device recap
    pub fn print_recap(&self, report: &RunReport) {
        if self.quiet {
            return;
        }

        println!();
        println!("{}", "RUN RECAP".green().bold());
        println!("{}", "─".repeat(60).dimmed());

        for device in &report.devices {
            println!(
                "{:<30} : {}    {}",
                device.host.white().bold(),
                status_label(device.status),
                device.log_path.display().to_string().dimmed()
            );
        }

        println!();
        let failed = report.failed();
        let summary = format!("{} completed, {} failed", report.completed(), failed);
        if failed > 0 {
            println!("{}", summary.red().bold());
        } else {
            println!("{}", summary.green());
        }
        println!("Total time: {:.2}s", report.elapsed_secs);
    }

    /// Print one device transcript for `dutrun log`
    pub fn print_log(&self, path: &Path, entries: &[LogEntry]) {
        println!("{} {}", "LOG".green().bold(), path.display().to_string().cyan());
        println!("{}", "─".repeat(60).dimmed());

        for entry in entries {
            let unit = entry
                .unit
                .map(|u| format!("#{} ", u).yellow().to_string())
                .unwrap_or_default();
            let mut lines = entry.message.lines();
            println!(
                "{} {}{}",
                format!("[{}]", entry.timestamp).dimmed(),
                unit,
                lines.next().unwrap_or_default()
            );
            for line in lines {
                println!("    {}", line);
            }
        }
        println!();
    }
}

fn status_label(status: DeviceStatus) -> ColoredString {
    match status {
        DeviceStatus::Completed => "COMPLETED".green(),
        DeviceStatus::Failed => "FAILED".red().bold(),
    }
}

/// Mirror the run-wide completed count onto a progress bar until the run ends
pub async fn follow_progress(mut completed: watch::Receiver<usize>, bar: ProgressBar) {
    loop {
        let done = *completed.borrow_and_update();
        bar.set_position(done as u64);
        if completed.changed().await.is_err() {
            break;
        }
    }
    bar.set_position(*completed.borrow() as u64);
}
