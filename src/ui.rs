use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

/// Stage reporting on stderr: spinners on a terminal, plain lines otherwise.
#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode) -> Self {
        let is_tty = std::io::stderr().is_terminal();
        let pretty = match mode {
            UiMode::Plain => false,
            UiMode::Pretty => is_tty,
            UiMode::Auto => is_tty && std::env::var_os("NO_COLOR").is_none(),
        };
        Self { pretty }
    }

    pub fn stage(&self, name: &str) -> Stage {
        if !self.pretty {
            eprintln!("==> {}", name);
            return Stage::new(name, None);
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("{name}…"));
        Stage::new(name, Some(spinner))
    }
}

/// Running stage; reports completion and elapsed time when dropped.
pub struct Stage {
    name: String,
    detail: Option<String>,
    started: Instant,
    spinner: Option<ProgressBar>,
}

impl Stage {
    fn new(name: &str, spinner: Option<ProgressBar>) -> Self {
        Self {
            name: name.to_string(),
            detail: None,
            started: Instant::now(),
            spinner,
        }
    }

    /// Short result shown next to the stage name on completion.
    pub fn detail(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let elapsed = format_elapsed(self.started.elapsed());
        let message = match &self.detail {
            Some(detail) => format!("✔ {}: {} ({})", self.name, detail, elapsed),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
