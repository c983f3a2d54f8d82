use std::fmt::Display;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::strategy::{SignalFamily, Strategy};

#[derive(PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Pending,
    InProgress,
    Cached,
    Skipped,
    Failed,
}

/// One spinner per signal family being sized.
pub struct StepContext {
    step_num: usize,
    steps: Vec<Step>,
}

pub struct Step {
    family: SignalFamily,
    progress_bar: ProgressBar,
}

impl StepContext {
    pub fn new<'a>(families: impl IntoIterator<Item = (SignalFamily, &'a Strategy)>) -> Self {
        println!("Signal families:");

        let mut steps = families
            .into_iter()
            .map(|(family, strategy)| {
                let step = Step {
                    family,
                    progress_bar: ProgressBar::new_spinner(),
                };
                step.progress_bar
                    .set_message(format!("{family} ({})", strategy.name()));
                step
            })
            .collect::<Vec<_>>();

        let mp = MultiProgress::new();
        let num_steps = steps.len();
        let width = format!("{num_steps}").len();
        for (i, step) in steps.iter_mut().enumerate() {
            mp.insert(i, step.progress_bar.clone());
            let msg = format!(
                "[{:width$}/{:width$}] {}",
                i + 1,
                num_steps,
                step.progress_bar.message()
            );
            step.set_status(StepStatus::Pending, Some(msg));
        }
        if let Some(first) = steps.first_mut() {
            first.set_status(StepStatus::InProgress, None);
        }
        StepContext { step_num: 0, steps }
    }

    #[inline]
    pub fn current_step(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.step_num)
    }

    /// Marks the current step and every later step when `res` is an error.
    pub fn check<T>(&mut self, res: Result<T>) -> Result<T> {
        if res.is_err() {
            if let Some(current_step) = self.current_step() {
                current_step.set_status(StepStatus::Failed, None);
            }
            for step in self.steps.iter_mut().skip(self.step_num + 1) {
                step.set_status(StepStatus::Skipped, None);
            }
            self.step_num = self.steps.len();
            println!("\n");
        }
        res
    }

    pub fn finish(&mut self, family: SignalFamily, cached: bool) -> Result<()> {
        let Some(current_step) = self.current_step() else {
            anyhow::bail!("{family} was sized after all families were marked complete");
        };
        if current_step.family != family {
            anyhow::bail!("{family} was sized out of order");
        }
        let status = if cached {
            StepStatus::Cached
        } else {
            StepStatus::Done
        };
        current_step.set_status(status, None);

        self.step_num += 1;
        if let Some(next) = self.current_step() {
            next.set_status(StepStatus::InProgress, None);
        } else {
            println!("\n\nSized all signal families");
        }
        Ok(())
    }
}

fn format_template(spinner: bool, status: impl Display) -> String {
    if spinner {
        format!("{{spinner:.green}} {:16} {{msg}}", status)
    } else {
        format!("  {:16} {{msg}}", status)
    }
}

impl Step {
    fn set_status(&mut self, status: StepStatus, msg: Option<String>) {
        let status_template = match status {
            StepStatus::Cached => format_template(false, "Cached".truecolor(120, 120, 120).bold()),
            StepStatus::Done => format_template(false, "Done".green().bold()),
            StepStatus::Failed => format_template(false, "Failed".bright_white().on_red().bold()),
            StepStatus::InProgress => format_template(true, "In Progress".bright_white().bold()),
            StepStatus::Pending => format_template(true, "Pending".blue().bold()),
            StepStatus::Skipped => format_template(false, "Skipped".yellow().bold()),
        };
        if let Ok(style) = ProgressStyle::with_template(&status_template) {
            self.progress_bar.set_style(style);
        }

        if let Some(msg) = msg {
            self.progress_bar.set_message(msg);
        }

        if status == StepStatus::InProgress {
            self.progress_bar
                .enable_steady_tick(Duration::from_millis(200));
        } else if status != StepStatus::Pending {
            self.progress_bar.finish();
        }
    }
}
