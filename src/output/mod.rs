mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::StepProgress;
pub use summary::{print_incident, print_incidents};

use styling::{dim, magenta_bold};

/// Prints the `pipefix` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🔧 pipefix"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI failure remediation")
    );
}
